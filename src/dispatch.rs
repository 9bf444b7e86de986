use ash::vk;
use std::os::raw::c_void;

// ── Raw function pointer types ───────────────────────────────────────────────

pub type PfnCreateInstance = unsafe extern "system" fn(
    *const vk::InstanceCreateInfo,
    *const vk::AllocationCallbacks,
    *mut vk::Instance,
) -> vk::Result;

pub type PfnDestroyInstance =
    unsafe extern "system" fn(vk::Instance, *const vk::AllocationCallbacks);

pub type PfnCreateDevice = unsafe extern "system" fn(
    vk::PhysicalDevice,
    *const vk::DeviceCreateInfo,
    *const vk::AllocationCallbacks,
    *mut vk::Device,
) -> vk::Result;

pub type PfnDestroyDevice = unsafe extern "system" fn(vk::Device, *const vk::AllocationCallbacks);

pub type PfnCreateSwapchainKHR = unsafe extern "system" fn(
    vk::Device,
    *const vk::SwapchainCreateInfoKHR,
    *const vk::AllocationCallbacks,
    *mut vk::SwapchainKHR,
) -> vk::Result;

pub type PfnDestroySwapchainKHR =
    unsafe extern "system" fn(vk::Device, vk::SwapchainKHR, *const vk::AllocationCallbacks);

pub type PfnQueuePresentKHR =
    unsafe extern "system" fn(vk::Queue, *const vk::PresentInfoKHR) -> vk::Result;

// VK_NV_low_latency2

pub type PfnSetLatencySleepModeNV = unsafe extern "system" fn(
    vk::Device,
    vk::SwapchainKHR,
    *const vk::LatencySleepModeInfoNV,
) -> vk::Result;

pub type PfnLatencySleepNV = unsafe extern "system" fn(
    vk::Device,
    vk::SwapchainKHR,
    *const vk::LatencySleepInfoNV,
) -> vk::Result;

pub type PfnSetLatencyMarkerNV =
    unsafe extern "system" fn(vk::Device, vk::SwapchainKHR, *const vk::SetLatencyMarkerInfoNV);

pub type PfnGetLatencyTimingsNV =
    unsafe extern "system" fn(vk::Device, vk::SwapchainKHR, *mut vk::GetLatencyMarkerInfoNV);

pub type PfnQueueNotifyOutOfBandNV =
    unsafe extern "system" fn(vk::Queue, *const vk::OutOfBandQueueTypeInfoNV);

// VK_KHR_present_wait

pub type PfnWaitForPresentKHR =
    unsafe extern "system" fn(vk::Device, vk::SwapchainKHR, u64, u64) -> vk::Result;

// ── Loader helper ─────────────────────────────────────────────────────────────

pub unsafe fn load_device<F: Copy>(
    gdpa: vk::PFN_vkGetDeviceProcAddr,
    device: vk::Device,
    name: &[u8],
) -> Option<F> {
    let raw: *const c_void = unsafe { std::mem::transmute(gdpa(device, name.as_ptr() as _)) };
    (!raw.is_null()).then(|| unsafe { std::mem::transmute_copy(&raw) })
}

pub unsafe fn load_instance<F: Copy>(
    gipa: vk::PFN_vkGetInstanceProcAddr,
    instance: vk::Instance,
    name: &[u8],
) -> Option<F> {
    let raw: *const c_void = unsafe { std::mem::transmute(gipa(instance, name.as_ptr() as _)) };
    (!raw.is_null()).then(|| unsafe { std::mem::transmute_copy(&raw) })
}

/// Erases a hook's signature for return from a proc-addr router.
pub fn void_fn(f: *const ()) -> vk::PFN_vkVoidFunction {
    unsafe { std::mem::transmute::<*const (), vk::PFN_vkVoidFunction>(f) }
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Downstream device functions, resolved once at device creation. Every
/// entry is optional: a device that did not enable an extension gets null
/// from the next link, and each call site checks before forwarding.
#[derive(Clone, Copy)]
pub struct DeviceTable {
    pub destroy_device: Option<PfnDestroyDevice>,
    // VK_KHR_swapchain
    pub create_swapchain_khr: Option<PfnCreateSwapchainKHR>,
    pub destroy_swapchain_khr: Option<PfnDestroySwapchainKHR>,
    pub queue_present_khr: Option<PfnQueuePresentKHR>,
    // VK_NV_low_latency2
    pub set_latency_sleep_mode_nv: Option<PfnSetLatencySleepModeNV>,
    pub latency_sleep_nv: Option<PfnLatencySleepNV>,
    pub set_latency_marker_nv: Option<PfnSetLatencyMarkerNV>,
    pub get_latency_timings_nv: Option<PfnGetLatencyTimingsNV>,
    pub queue_notify_out_of_band_nv: Option<PfnQueueNotifyOutOfBandNV>,
    // VK_KHR_present_wait
    pub wait_for_present_khr: Option<PfnWaitForPresentKHR>,
}

impl DeviceTable {
    pub unsafe fn load(device: vk::Device, gdpa: vk::PFN_vkGetDeviceProcAddr) -> Self {
        macro_rules! ld {
            ($name:literal) => {
                unsafe { load_device(gdpa, device, concat!($name, "\0").as_bytes()) }
            };
        }
        Self {
            destroy_device: ld!("vkDestroyDevice"),
            create_swapchain_khr: ld!("vkCreateSwapchainKHR"),
            destroy_swapchain_khr: ld!("vkDestroySwapchainKHR"),
            queue_present_khr: ld!("vkQueuePresentKHR"),
            set_latency_sleep_mode_nv: ld!("vkSetLatencySleepModeNV"),
            latency_sleep_nv: ld!("vkLatencySleepNV"),
            set_latency_marker_nv: ld!("vkSetLatencyMarkerNV"),
            get_latency_timings_nv: ld!("vkGetLatencyTimingsNV"),
            queue_notify_out_of_band_nv: ld!("vkQueueNotifyOutOfBandNV"),
            wait_for_present_khr: ld!("vkWaitForPresentKHR"),
        }
    }

    /// All four entry points the low-latency hooks forward to.
    pub fn has_low_latency2(&self) -> bool {
        self.set_latency_sleep_mode_nv.is_some()
            && self.latency_sleep_nv.is_some()
            && self.set_latency_marker_nv.is_some()
            && self.get_latency_timings_nv.is_some()
    }

    pub fn has_present_wait(&self) -> bool {
        self.wait_for_present_khr.is_some()
    }
}

#[derive(Clone, Copy)]
pub struct InstanceTable {
    pub destroy_instance: Option<PfnDestroyInstance>,
}

impl InstanceTable {
    pub unsafe fn load(instance: vk::Instance, gipa: vk::PFN_vkGetInstanceProcAddr) -> Self {
        Self {
            destroy_instance: unsafe { load_instance(gipa, instance, b"vkDestroyInstance\0") },
        }
    }
}
