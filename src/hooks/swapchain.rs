use ash::vk;
use ash::vk::Handle;

use crate::clock::timestamp_now;
use crate::context::LayerContext;
use crate::dispatch::{PfnCreateSwapchainKHR, PfnDestroySwapchainKHR};
use crate::markers::LatencySource;
use crate::registry::SwapchainEntry;

use super::{dispatch_key, untracked_device_fn};

// ── vkCreateSwapchainKHR ─────────────────────────────────────────────────────

pub unsafe fn create_swapchain(
    ctx: &LayerContext,
    device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR,
    p_allocator: *const vk::AllocationCallbacks,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    let (create_fn, source): (Option<PfnCreateSwapchainKHR>, Option<LatencySource>) = {
        let registry = ctx.registry();
        match registry.device(device) {
            Some(d) => (
                d.table.create_swapchain_khr,
                Some(LatencySource::for_device(d.has_low_latency2)),
            ),
            None => (
                unsafe { untracked_device_fn(&registry, device, b"vkCreateSwapchainKHR\0") },
                None,
            ),
        }
    };
    let Some(create_fn) = create_fn else {
        log::error!(
            "vkCreateSwapchainKHR: no downstream function for device {:#x}",
            device.as_raw()
        );
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let result = unsafe { create_fn(device, p_create_info, p_allocator, p_swapchain) };
    if result != vk::Result::SUCCESS {
        return result;
    }
    // Telemetry only for swapchains of tracked devices.
    let Some(source) = source else {
        return result;
    };

    let swapchain = unsafe { *p_swapchain };
    let info = unsafe { &*p_create_info };
    let entry = SwapchainEntry::new(swapchain, device, info, source);
    let (width, height, format, present_mode) =
        (entry.width, entry.height, entry.format, entry.present_mode);

    if ctx.registry().swapchains.store(entry) {
        log::info!(
            "Latency layer: swapchain {:#x} created: {}x{} {:?} {:?} ({:?} latency)",
            swapchain.as_raw(),
            width,
            height,
            format,
            present_mode,
            source
        );
    } else {
        log::warn!(
            "Latency layer: swapchain table full, {:#x} presents untracked",
            swapchain.as_raw()
        );
    }
    result
}

// ── vkDestroySwapchainKHR ────────────────────────────────────────────────────

pub unsafe fn destroy_swapchain(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let destroy_fn: Option<PfnDestroySwapchainKHR> = {
        let mut registry = ctx.registry();
        if let Some(entry) = registry.swapchains.remove(swapchain.as_raw()) {
            log::info!(
                "Latency layer: swapchain {:#x} destroyed after {} frames",
                swapchain.as_raw(),
                entry.frame_count
            );
        }
        match registry.device(device) {
            Some(d) => d.table.destroy_swapchain_khr,
            None => unsafe { untracked_device_fn(&registry, device, b"vkDestroySwapchainKHR\0") },
        }
    };
    match destroy_fn {
        Some(f) => unsafe { f(device, swapchain, p_allocator) },
        None => log::error!(
            "vkDestroySwapchainKHR: no downstream function for device {:#x}",
            device.as_raw()
        ),
    }
}

// ── vkQueuePresentKHR ────────────────────────────────────────────────────────

pub unsafe fn queue_present(
    ctx: &LayerContext,
    queue: vk::Queue,
    p_present: *const vk::PresentInfoKHR,
) -> vk::Result {
    let now_ns = timestamp_now();

    if let Some(present) = unsafe { p_present.as_ref() } {
        let swapchains: &[vk::SwapchainKHR] =
            if present.p_swapchains.is_null() || present.swapchain_count == 0 {
                &[]
            } else {
                let count = present.swapchain_count as usize;
                unsafe { std::slice::from_raw_parts(present.p_swapchains, count) }
            };
        ctx.on_present(swapchains, now_ns);
    }

    let queue_key = unsafe { dispatch_key(queue.as_raw()) };
    let present_fn = ctx
        .registry()
        .present_device(queue_key)
        .and_then(|d| d.table.queue_present_khr);

    match present_fn {
        Some(f) => unsafe { f(queue, p_present) },
        None => {
            log::error!(
                "vkQueuePresentKHR: no device state for queue {:#x}",
                queue.as_raw()
            );
            vk::Result::ERROR_DEVICE_LOST
        }
    }
}
