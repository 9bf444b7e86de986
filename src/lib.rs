//! `VK_LAYER_LATENCY_telemetry`: a Vulkan layer that watches presents and
//! `VK_NV_low_latency2` markers and turns them into frame pacing and
//! latency statistics for in-process consumers (HUD, tuning, CLI).

pub mod chain;
mod clock;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod markers;
mod present;
pub mod registry;
pub mod stats;
pub mod telemetry;

use ash::vk;
use crossbeam_channel::Receiver;
use once_cell::sync::Lazy;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use config::LayerConfig;
use context::LayerContext;
use dispatch::void_fn;
use telemetry::{LatencyStatsSnapshot, TelemetryReport};

pub const LAYER_NAME: &CStr = c"VK_LAYER_LATENCY_telemetry";
const LAYER_DESCRIPTION: &CStr = c"Frame pacing and latency telemetry layer";

// ── Global state ─────────────────────────────────────────────────────────────

static LAYER: Lazy<LayerContext> = Lazy::new(|| {
    let _ = env_logger::try_init();
    let config = LayerConfig::from_env();
    if config.disabled {
        log::info!("Latency layer: disabled, device calls pass straight through");
    }
    LayerContext::new(config)
});

// ── Loader ABI structures ────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_EnumerateInstanceExtensionProperties(
    _p_layer_name: *const c_char,
    p_property_count: *mut u32,
    _p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if !p_property_count.is_null() {
        unsafe {
            *p_property_count = 0;
        }
    }
    vk::Result::SUCCESS
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_EnumerateInstanceLayerProperties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    unsafe {
        if p_properties.is_null() {
            if !p_property_count.is_null() {
                *p_property_count = 1;
            }
            return vk::Result::SUCCESS;
        }

        if p_property_count.is_null() {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }

        if *p_property_count == 0 {
            return vk::Result::INCOMPLETE;
        }

        *p_property_count = 1;
        *p_properties = layer_properties();
    }

    vk::Result::SUCCESS
}

fn layer_properties() -> vk::LayerProperties {
    let mut props = vk::LayerProperties::default();
    copy_c_str(&mut props.layer_name, LAYER_NAME);
    copy_c_str(&mut props.description, LAYER_DESCRIPTION);
    props.spec_version = vk::API_VERSION_1_3;
    props.implementation_version = 1;
    props
}

fn copy_c_str(dst: &mut [c_char], src: &CStr) {
    let bytes = src.to_bytes_with_nul();
    let n = bytes.len().min(dst.len());
    for (d, &b) in dst[..n].iter_mut().zip(bytes) {
        *d = b as c_char;
    }
    // Truncated names still end in NUL.
    if n > 0 && n == dst.len() {
        dst[n - 1] = 0;
    }
}

// ── Loader negotiate ─────────────────────────────────────────────────────────

#[repr(C)]
pub struct VkNegotiateLayerInterface {
    s_type: u32,
    p_next: *mut c_void,
    loader_layer_interface_version: u32,
    pfn_get_instance_proc_addr: *const c_void,
    pfn_get_device_proc_addr: *const c_void,
    pfn_get_physical_device_proc_addr: *const c_void,
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
    p: *mut VkNegotiateLayerInterface,
) -> vk::Result {
    let _ = env_logger::try_init();

    if p.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    unsafe {
        if (*p).loader_layer_interface_version < 2 {
            log::error!(
                "Latency layer: loader interface {} is too old",
                (*p).loader_layer_interface_version
            );
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }
        (*p).loader_layer_interface_version = 2;
        (*p).pfn_get_instance_proc_addr = latency_layer_GetInstanceProcAddr as _;
        (*p).pfn_get_device_proc_addr = latency_layer_GetDeviceProcAddr as _;
        (*p).pfn_get_physical_device_proc_addr = std::ptr::null();
    }
    vk::Result::SUCCESS
}

// ── Proc-addr routers ────────────────────────────────────────────────────────

fn instance_hook(name: &[u8]) -> Option<*const ()> {
    Some(match name {
        b"vkGetInstanceProcAddr" => latency_layer_GetInstanceProcAddr as *const (),
        b"vkCreateInstance" => latency_layer_CreateInstance as *const (),
        b"vkDestroyInstance" => latency_layer_DestroyInstance as *const (),
        b"vkCreateDevice" => latency_layer_CreateDevice as *const (),
        b"vkEnumerateInstanceExtensionProperties" => {
            latency_layer_EnumerateInstanceExtensionProperties as *const ()
        }
        b"vkEnumerateInstanceLayerProperties" => {
            latency_layer_EnumerateInstanceLayerProperties as *const ()
        }
        _ => return None,
    })
}

/// Device-level functions the layer implements. Each one tolerates handles
/// the registry does not know.
fn device_hook(name: &[u8]) -> Option<*const ()> {
    Some(match name {
        b"vkGetDeviceProcAddr" => latency_layer_GetDeviceProcAddr as *const (),
        b"vkDestroyDevice" => latency_layer_DestroyDevice as *const (),
        b"vkCreateSwapchainKHR" => latency_layer_CreateSwapchainKHR as *const (),
        b"vkDestroySwapchainKHR" => latency_layer_DestroySwapchainKHR as *const (),
        b"vkQueuePresentKHR" => latency_layer_QueuePresentKHR as *const (),
        b"vkSetLatencySleepModeNV" => latency_layer_SetLatencySleepModeNV as *const (),
        b"vkLatencySleepNV" => latency_layer_LatencySleepNV as *const (),
        b"vkSetLatencyMarkerNV" => latency_layer_SetLatencyMarkerNV as *const (),
        b"vkGetLatencyTimingsNV" => latency_layer_GetLatencyTimingsNV as *const (),
        b"vkQueueNotifyOutOfBandNV" => latency_layer_QueueNotifyOutOfBandNV as *const (),
        b"vkWaitForPresentKHR" => latency_layer_WaitForPresentKHR as *const (),
        _ => return None,
    })
}

/// With the layer disabled only the hooks that keep the registry
/// consistent stay in the chain.
fn device_hook_enabled(ctx: &LayerContext, name: &[u8]) -> Option<*const ()> {
    if ctx.config().disabled && !matches!(name, b"vkGetDeviceProcAddr" | b"vkDestroyDevice") {
        return None;
    }
    device_hook(name)
}

unsafe fn get_instance_proc_addr(
    ctx: &LayerContext,
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(p_name).to_bytes() };
    if let Some(hook) = instance_hook(name) {
        return void_fn(hook);
    }
    if instance == vk::Instance::null() {
        return None;
    }
    let next_gipa = {
        let registry = ctx.registry();
        let tracked = registry.instance(instance).is_some();
        if tracked {
            if let Some(hook) = device_hook_enabled(ctx, name) {
                return void_fn(hook);
            }
        }
        registry.instance_resolver(instance)
    };
    match next_gipa {
        Some(gipa) => unsafe { gipa(instance, p_name) },
        None => None,
    }
}

unsafe fn get_device_proc_addr(
    ctx: &LayerContext,
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() || device == vk::Device::null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(p_name).to_bytes() };
    let next_gdpa = {
        let registry = ctx.registry();
        if registry.device(device).is_some() {
            if let Some(hook) = device_hook_enabled(ctx, name) {
                return void_fn(hook);
            }
        }
        // Untracked devices bypass the layer entirely.
        registry.device_resolver(device)
    };
    match next_gdpa {
        Some(gdpa) => unsafe { gdpa(device, p_name) },
        None => None,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_GetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { get_instance_proc_addr(&LAYER, instance, p_name) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_GetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { get_device_proc_addr(&LAYER, device, p_name) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { latency_layer_GetInstanceProcAddr(instance, p_name) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn vkGetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { latency_layer_GetDeviceProcAddr(device, p_name) }
}

// ── Instance / device lifecycle ──────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_CreateInstance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    unsafe { hooks::instance::create_instance(&LAYER, p_create_info, p_allocator, p_instance) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_DestroyInstance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    unsafe { hooks::instance::destroy_instance(&LAYER, instance, p_allocator) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_CreateDevice(
    phys_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    unsafe {
        hooks::instance::create_device(&LAYER, phys_device, p_create_info, p_allocator, p_device)
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_DestroyDevice(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    unsafe { hooks::instance::destroy_device(&LAYER, device, p_allocator) }
}

// ── Swapchain / present ──────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_CreateSwapchainKHR(
    device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR,
    p_allocator: *const vk::AllocationCallbacks,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    unsafe {
        hooks::swapchain::create_swapchain(&LAYER, device, p_create_info, p_allocator, p_swapchain)
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_DestroySwapchainKHR(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_allocator: *const vk::AllocationCallbacks,
) {
    unsafe { hooks::swapchain::destroy_swapchain(&LAYER, device, swapchain, p_allocator) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_QueuePresentKHR(
    queue: vk::Queue,
    p_present: *const vk::PresentInfoKHR,
) -> vk::Result {
    unsafe { hooks::swapchain::queue_present(&LAYER, queue, p_present) }
}

// ── Low latency ──────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_SetLatencySleepModeNV(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_sleep_mode_info: *const vk::LatencySleepModeInfoNV,
) -> vk::Result {
    unsafe { hooks::latency::set_latency_sleep_mode(&LAYER, device, swapchain, p_sleep_mode_info) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_LatencySleepNV(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_sleep_info: *const vk::LatencySleepInfoNV,
) -> vk::Result {
    unsafe { hooks::latency::latency_sleep(&LAYER, device, swapchain, p_sleep_info) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_SetLatencyMarkerNV(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_latency_marker_info: *const vk::SetLatencyMarkerInfoNV,
) {
    unsafe { hooks::latency::set_latency_marker(&LAYER, device, swapchain, p_latency_marker_info) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_GetLatencyTimingsNV(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_latency_marker_info: *mut vk::GetLatencyMarkerInfoNV,
) {
    unsafe { hooks::latency::get_latency_timings(&LAYER, device, swapchain, p_latency_marker_info) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_QueueNotifyOutOfBandNV(
    queue: vk::Queue,
    p_queue_type_info: *const vk::OutOfBandQueueTypeInfoNV,
) {
    unsafe { hooks::latency::queue_notify_out_of_band(&LAYER, queue, p_queue_type_info) }
}

#[unsafe(no_mangle)]
pub unsafe extern "system" fn latency_layer_WaitForPresentKHR(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    present_id: u64,
    timeout: u64,
) -> vk::Result {
    unsafe { hooks::latency::wait_for_present(&LAYER, device, swapchain, present_id, timeout) }
}

// ── Telemetry queries ────────────────────────────────────────────────────────
//
// Readers never initialise the layer: before the loader has called in,
// every query reports zeros.

fn loaded() -> Option<&'static LayerContext> {
    Lazy::get(&LAYER)
}

pub fn latency_stats() -> LatencyStatsSnapshot {
    loaded()
        .map(|ctx| ctx.telemetry().snapshot())
        .unwrap_or_default()
}

pub fn avg_latency_ms() -> f64 {
    loaded().map_or(0.0, |ctx| ctx.telemetry().avg_latency_ms())
}

pub fn avg_gpu_ms() -> f64 {
    loaded().map_or(0.0, |ctx| ctx.telemetry().avg_gpu_ms())
}

pub fn frame_count() -> u64 {
    loaded().map_or(0, |ctx| ctx.telemetry().frame_count())
}

pub fn fps() -> f64 {
    loaded().map_or(0.0, |ctx| ctx.telemetry().fps())
}

pub fn frame_time_ms() -> f64 {
    loaded().map_or(0.0, |ctx| ctx.telemetry().frame_time_ms())
}

pub fn predicted_latency_ms() -> f64 {
    loaded().map_or(0.0, |ctx| ctx.telemetry().predicted_latency_ms())
}

pub fn recommended_queue_depth() -> u32 {
    loaded().map_or(1, |ctx| ctx.telemetry().recommended_queue_depth())
}

/// Periodic reports from the present path. Initialises the layer if the
/// loader has not yet done so.
pub fn telemetry_reports() -> Receiver<TelemetryReport> {
    LAYER.telemetry().reports()
}

/// C entry point for consumers that `dlsym` the layer library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn latency_layer_get_stats(out: *mut LatencyStatsSnapshot) -> bool {
    match unsafe { out.as_mut() } {
        Some(out) => {
            *out = latency_stats();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const MANIFEST: &str = include_str!("../layer/VkLayer_latency_telemetry.json");

    #[test]
    fn manifest_matches_exports() {
        let manifest: serde_json::Value = serde_json::from_str(MANIFEST).expect("valid JSON");
        let layer = &manifest["layer"];
        assert_eq!(layer["name"], LAYER_NAME.to_str().unwrap());
        assert_eq!(layer["library_path"], "./libvk_latency_layer.so");
        assert_eq!(
            layer["functions"]["vkGetInstanceProcAddr"],
            "latency_layer_GetInstanceProcAddr"
        );
        assert_eq!(
            layer["functions"]["vkGetDeviceProcAddr"],
            "latency_layer_GetDeviceProcAddr"
        );
        assert_eq!(
            layer["functions"]["vkNegotiateLoaderLayerInterfaceVersion"],
            "vkNegotiateLoaderLayerInterfaceVersion"
        );
    }

    #[test]
    fn layer_properties_are_nul_terminated() {
        let props = layer_properties();
        let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
        assert_eq!(name, LAYER_NAME);
        let desc = unsafe { CStr::from_ptr(props.description.as_ptr()) };
        assert_eq!(desc, LAYER_DESCRIPTION);
    }

    #[test]
    fn copy_c_str_truncates_with_terminator() {
        let mut short = [0x7f as c_char; 4];
        copy_c_str(&mut short, c"VK_LAYER");
        assert_eq!(short, [b'V' as c_char, b'K' as c_char, b'_' as c_char, 0]);

        let mut roomy = [0x7f as c_char; 8];
        copy_c_str(&mut roomy, c"ab");
        assert_eq!(&roomy[..4], &[b'a' as c_char, b'b' as c_char, 0, 0x7f]);

        copy_c_str(&mut [], c"ab");
    }

    #[test]
    fn layer_properties_two_call_idiom() {
        let mut count = 0u32;
        let r = unsafe {
            latency_layer_EnumerateInstanceLayerProperties(&mut count, std::ptr::null_mut())
        };
        assert_eq!(r, vk::Result::SUCCESS);
        assert_eq!(count, 1);

        let mut props = vk::LayerProperties::default();
        let r = unsafe { latency_layer_EnumerateInstanceLayerProperties(&mut count, &mut props) };
        assert_eq!(r, vk::Result::SUCCESS);

        count = 0;
        let r = unsafe { latency_layer_EnumerateInstanceLayerProperties(&mut count, &mut props) };
        assert_eq!(r, vk::Result::INCOMPLETE);
    }

    #[test]
    fn negotiate_reports_interface_two() {
        let mut iface = VkNegotiateLayerInterface {
            s_type: 0,
            p_next: std::ptr::null_mut(),
            loader_layer_interface_version: 5,
            pfn_get_instance_proc_addr: std::ptr::null(),
            pfn_get_device_proc_addr: std::ptr::null(),
            pfn_get_physical_device_proc_addr: std::ptr::null(),
        };
        let r = unsafe { vkNegotiateLoaderLayerInterfaceVersion(&mut iface) };
        assert_eq!(r, vk::Result::SUCCESS);
        assert_eq!(iface.loader_layer_interface_version, 2);
        assert!(!iface.pfn_get_instance_proc_addr.is_null());
        assert!(!iface.pfn_get_device_proc_addr.is_null());

        iface.loader_layer_interface_version = 1;
        let r = unsafe { vkNegotiateLoaderLayerInterfaceVersion(&mut iface) };
        assert_eq!(r, vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    #[test]
    fn instance_hooks_resolve_without_instance() {
        let ctx = LayerContext::default();
        for name in [c"vkCreateInstance", c"vkGetInstanceProcAddr", c"vkCreateDevice"] {
            let f = unsafe { get_instance_proc_addr(&ctx, vk::Instance::null(), name.as_ptr()) };
            assert!(f.is_some(), "{name:?}");
        }
        let f = unsafe {
            get_instance_proc_addr(&ctx, vk::Instance::null(), c"vkQueuePresentKHR".as_ptr())
        };
        assert!(f.is_none());
    }

    #[test]
    fn cold_registry_lookups_return_null() {
        let ctx = LayerContext::default();
        let instance = vk::Instance::from_raw(0x1234);
        let device = vk::Device::from_raw(0x5678);
        let name = c"vkQueuePresentKHR".as_ptr();
        assert!(unsafe { get_instance_proc_addr(&ctx, instance, name) }.is_none());
        assert!(unsafe { get_device_proc_addr(&ctx, device, name) }.is_none());
        assert!(unsafe { get_device_proc_addr(&ctx, device, std::ptr::null()) }.is_none());
    }

    #[test]
    fn disabled_layer_keeps_only_bookkeeping_hooks() {
        let ctx = LayerContext::new(LayerConfig {
            disabled: true,
            ..LayerConfig::default()
        });
        assert!(device_hook_enabled(&ctx, b"vkDestroyDevice").is_some());
        assert!(device_hook_enabled(&ctx, b"vkQueuePresentKHR").is_none());
        assert!(device_hook_enabled(&LayerContext::default(), b"vkQueuePresentKHR").is_some());
    }

    #[test]
    fn stats_export_handles_null() {
        assert!(!unsafe { latency_layer_get_stats(std::ptr::null_mut()) });
        let mut snap = LatencyStatsSnapshot::default();
        assert!(unsafe { latency_layer_get_stats(&mut snap) });
    }
}
