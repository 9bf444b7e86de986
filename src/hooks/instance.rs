use ash::vk;
use ash::vk::Handle;

use crate::chain;
use crate::context::LayerContext;
use crate::dispatch::{
    DeviceTable, InstanceTable, PfnCreateDevice, PfnCreateInstance, PfnDestroyDevice,
    PfnDestroyInstance, load_instance,
};
use crate::error::{LayerError, Result};
use crate::registry::{DeviceEntry, InstanceEntry};

use super::{dispatch_key, untracked_device_fn};

fn report_failure(call: &str, err: LayerError) -> vk::Result {
    match &err {
        LayerError::Vk(code) => log::warn!("{call}: downstream returned {code}"),
        other => log::error!("{call}: {other}"),
    }
    err.into()
}

// ── vkCreateInstance ─────────────────────────────────────────────────────────

pub unsafe fn create_instance(
    ctx: &LayerContext,
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    match unsafe { try_create_instance(ctx, p_create_info, p_allocator, p_instance) } {
        Ok(()) => vk::Result::SUCCESS,
        Err(e) => report_failure("vkCreateInstance", e),
    }
}

unsafe fn try_create_instance(
    ctx: &LayerContext,
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> Result<()> {
    let link =
        unsafe { chain::take_instance_link(p_create_info) }.ok_or(LayerError::MissingLayerLink)?;

    let create_fn: PfnCreateInstance =
        unsafe { load_instance(link.next_gipa, vk::Instance::null(), b"vkCreateInstance\0") }
            .ok_or(LayerError::MissingFunction("vkCreateInstance"))?;
    unsafe { create_fn(p_create_info, p_allocator, p_instance) }.result()?;

    let instance = unsafe { *p_instance };
    let table = unsafe { InstanceTable::load(instance, link.next_gipa) };

    let mut registry = ctx.registry();
    registry.fallback_gipa = Some(link.next_gipa);
    let stored = registry.instances.store(InstanceEntry {
        handle: instance,
        next_gipa: link.next_gipa,
        table,
    });
    drop(registry);

    if stored {
        log::info!("Latency layer: vkCreateInstance hooked ({:#x})", instance.as_raw());
    } else {
        log::warn!(
            "Latency layer: instance table full, {:#x} passes through untracked",
            instance.as_raw()
        );
    }
    Ok(())
}

// ── vkDestroyInstance ────────────────────────────────────────────────────────

pub unsafe fn destroy_instance(
    ctx: &LayerContext,
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let destroy_fn: Option<PfnDestroyInstance> = {
        let mut registry = ctx.registry();
        match registry.instances.remove(instance.as_raw()) {
            Some(entry) => entry.table.destroy_instance,
            None => registry.fallback_gipa.and_then(|gipa| unsafe {
                load_instance(gipa, instance, b"vkDestroyInstance\0")
            }),
        }
    };
    match destroy_fn {
        Some(f) => unsafe { f(instance, p_allocator) },
        None => log::error!(
            "vkDestroyInstance: no downstream function for {:#x}",
            instance.as_raw()
        ),
    }
}

// ── vkCreateDevice ───────────────────────────────────────────────────────────

pub unsafe fn create_device(
    ctx: &LayerContext,
    phys_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    match unsafe { try_create_device(ctx, phys_device, p_create_info, p_allocator, p_device) } {
        Ok(()) => vk::Result::SUCCESS,
        Err(e) => report_failure("vkCreateDevice", e),
    }
}

unsafe fn try_create_device(
    ctx: &LayerContext,
    phys_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> Result<()> {
    let link =
        unsafe { chain::take_device_link(p_create_info) }.ok_or(LayerError::MissingLayerLink)?;
    let exts = unsafe { chain::enabled_device_extensions(p_create_info) };

    let create_fn: PfnCreateDevice =
        unsafe { load_instance(link.next_gipa, vk::Instance::null(), b"vkCreateDevice\0") }
            .ok_or(LayerError::MissingFunction("vkCreateDevice"))?;
    unsafe { create_fn(phys_device, p_create_info, p_allocator, p_device) }.result()?;

    let device = unsafe { *p_device };
    let table = unsafe { DeviceTable::load(device, link.next_gdpa) };
    let entry = DeviceEntry {
        handle: device,
        dispatch_key: unsafe { dispatch_key(device.as_raw()) }.unwrap_or(0),
        next_gdpa: link.next_gdpa,
        has_low_latency2: exts.low_latency2 && table.has_low_latency2(),
        has_present_wait: exts.present_wait && table.has_present_wait(),
        table,
    };
    let (low_latency2, present_wait) = (entry.has_low_latency2, entry.has_present_wait);

    let mut registry = ctx.registry();
    registry.fallback_gdpa = Some(link.next_gdpa);
    let stored = registry.devices.store(entry);
    drop(registry);

    if stored {
        log::info!(
            "Latency layer: vkCreateDevice hooked ({:#x}, low_latency2={}, present_wait={})",
            device.as_raw(),
            low_latency2,
            present_wait
        );
    } else {
        log::warn!(
            "Latency layer: device table full, {:#x} passes through untracked",
            device.as_raw()
        );
    }
    Ok(())
}

// ── vkDestroyDevice ──────────────────────────────────────────────────────────

pub unsafe fn destroy_device(
    ctx: &LayerContext,
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let destroy_fn: Option<PfnDestroyDevice> = {
        let mut registry = ctx.registry();
        let orphans = registry.swapchains.remove_where(|sc| sc.device == device);
        if orphans > 0 {
            log::debug!("vkDestroyDevice: dropping {orphans} swapchain(s) still tracked");
        }
        match registry.devices.remove(device.as_raw()) {
            Some(entry) => entry.table.destroy_device,
            None => unsafe { untracked_device_fn(&registry, device, b"vkDestroyDevice\0") },
        }
    };
    match destroy_fn {
        Some(f) => unsafe { f(device, p_allocator) },
        None => log::error!(
            "vkDestroyDevice: no downstream function for {:#x}",
            device.as_raw()
        ),
    }
}
