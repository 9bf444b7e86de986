//! Loader ↔ layer ABI for `vkCreateInstance` / `vkCreateDevice`.
//!
//! The loader puts a `VkLayer*CreateInfo` with `VK_LAYER_LINK_INFO` in the
//! create-info `pNext` chain. Each layer reads its next link, then moves the
//! cursor one step down before calling the next `vkCreate*`. All raw chain
//! walking lives here; callers get validated copies.

use ash::vk;
use std::ffi::CStr;
use std::os::raw::c_void;

pub const VK_STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO: vk::StructureType =
    vk::StructureType::from_raw(47);

pub const VK_STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO: vk::StructureType =
    vk::StructureType::from_raw(48);

pub const VK_LAYER_LINK_INFO: u32 = 0;

#[repr(C)]
pub struct VkLayerInstanceLink {
    pub p_next: *mut VkLayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_phys_dev_proc_addr: Option<unsafe extern "system" fn()>,
}

#[repr(C)]
pub struct VkLayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: u32,
    pub u_layer_info: *mut VkLayerInstanceLink,
}

#[repr(C)]
pub struct VkLayerDeviceLink {
    pub p_next: *mut VkLayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
pub struct VkLayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: u32,
    pub u_layer_info: *mut VkLayerDeviceLink,
}

/// Next link for instance-level calls, captured at `vkCreateInstance`.
#[derive(Clone, Copy)]
pub struct InstanceLink {
    pub next_gipa: vk::PFN_vkGetInstanceProcAddr,
}

/// Next link for device-level calls, captured at `vkCreateDevice`.
#[derive(Clone, Copy)]
pub struct DeviceLink {
    pub next_gipa: vk::PFN_vkGetInstanceProcAddr,
    pub next_gdpa: vk::PFN_vkGetDeviceProcAddr,
}

/// Reads this layer's link from `create_info` and advances the loader's
/// cursor to the next layer. `None` means the call arrived outside the
/// loader protocol.
pub unsafe fn take_instance_link(
    create_info: *const vk::InstanceCreateInfo,
) -> Option<InstanceLink> {
    if create_info.is_null() {
        return None;
    }
    let info: *mut VkLayerInstanceCreateInfo = unsafe {
        find_link_info(
            (*create_info).p_next as _,
            VK_STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO,
        )
    }?;
    unsafe {
        let link = (*info).u_layer_info;
        if link.is_null() {
            return None;
        }
        let next_gipa = (*link).pfn_next_get_instance_proc_addr;
        (*info).u_layer_info = (*link).p_next;
        Some(InstanceLink { next_gipa })
    }
}

pub unsafe fn take_device_link(create_info: *const vk::DeviceCreateInfo) -> Option<DeviceLink> {
    if create_info.is_null() {
        return None;
    }
    let info: *mut VkLayerDeviceCreateInfo = unsafe {
        find_link_info(
            (*create_info).p_next as _,
            VK_STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO,
        )
    }?;
    unsafe {
        let link = (*info).u_layer_info;
        if link.is_null() {
            return None;
        }
        let next_gipa = (*link).pfn_next_get_instance_proc_addr;
        let next_gdpa = (*link).pfn_next_get_device_proc_addr;
        (*info).u_layer_info = (*link).p_next;
        Some(DeviceLink {
            next_gipa,
            next_gdpa,
        })
    }
}

/// Link-info structs share the `{sType, pNext, function}` prefix.
trait LinkInfo {
    fn function(&self) -> u32;
}

impl LinkInfo for VkLayerInstanceCreateInfo {
    fn function(&self) -> u32 {
        self.function
    }
}

impl LinkInfo for VkLayerDeviceCreateInfo {
    fn function(&self) -> u32 {
        self.function
    }
}

unsafe fn find_link_info<T: LinkInfo>(
    mut p: *mut c_void,
    s_type: vk::StructureType,
) -> Option<*mut T> {
    while !p.is_null() {
        let base = unsafe { &*(p as *const vk::BaseOutStructure) };
        if base.s_type == s_type {
            let info = p as *mut T;
            if unsafe { (*info).function() } == VK_LAYER_LINK_INFO {
                return Some(info);
            }
        }
        p = base.p_next as _;
    }
    None
}

// ── Enabled device extensions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceExtensions {
    pub low_latency2: bool,
    pub present_wait: bool,
}

pub unsafe fn enabled_device_extensions(
    create_info: *const vk::DeviceCreateInfo,
) -> DeviceExtensions {
    let mut exts = DeviceExtensions::default();
    if create_info.is_null() {
        return exts;
    }
    let info = unsafe { &*create_info };
    if info.pp_enabled_extension_names.is_null() {
        return exts;
    }
    let names = unsafe {
        std::slice::from_raw_parts(
            info.pp_enabled_extension_names,
            info.enabled_extension_count as usize,
        )
    };
    for &name in names {
        if name.is_null() {
            continue;
        }
        match unsafe { CStr::from_ptr(name) }.to_bytes() {
            b"VK_NV_low_latency2" => exts.low_latency2 = true,
            b"VK_KHR_present_wait" => exts.present_wait = true,
            _ => {}
        }
    }
    exts
}
