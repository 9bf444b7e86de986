//! `VK_NV_low_latency2` and `VK_KHR_present_wait` hooks.
//!
//! These are optional on every device. Result-returning calls on a device
//! without the extension answer `ERROR_EXTENSION_NOT_PRESENT`; void calls
//! still do local bookkeeping and simply have nothing to forward to.

use ash::vk;

use crate::clock::timestamp_now;
use crate::context::LayerContext;
use crate::registry::DeviceEntry;

use super::dispatch_key;

/// Copies a downstream function out of a tracked device that has the
/// capability, so no lock is held across the call.
fn device_fn<F: Copy>(
    ctx: &LayerContext,
    device: vk::Device,
    pick: impl FnOnce(&DeviceEntry) -> Option<F>,
) -> Option<F> {
    ctx.registry().device(device).and_then(pick)
}

// ── vkSetLatencySleepModeNV ──────────────────────────────────────────────────

pub unsafe fn set_latency_sleep_mode(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_sleep_mode_info: *const vk::LatencySleepModeInfoNV,
) -> vk::Result {
    let Some(f) = device_fn(ctx, device, |d| {
        d.has_low_latency2
            .then_some(d.table.set_latency_sleep_mode_nv)
            .flatten()
    }) else {
        return vk::Result::ERROR_EXTENSION_NOT_PRESENT;
    };

    let result = unsafe { f(device, swapchain, p_sleep_mode_info) };
    if result == vk::Result::SUCCESS {
        let enabled = unsafe { p_sleep_mode_info.as_ref() }
            .is_some_and(|info| info.low_latency_mode == vk::TRUE);
        ctx.set_low_latency_requested(enabled);
        log::info!("Latency layer: low latency mode {}", if enabled { "on" } else { "off" });
    }
    result
}

// ── vkLatencySleepNV ─────────────────────────────────────────────────────────

pub unsafe fn latency_sleep(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_sleep_info: *const vk::LatencySleepInfoNV,
) -> vk::Result {
    match device_fn(ctx, device, |d| {
        d.has_low_latency2.then_some(d.table.latency_sleep_nv).flatten()
    }) {
        Some(f) => unsafe { f(device, swapchain, p_sleep_info) },
        None => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
    }
}

// ── vkSetLatencyMarkerNV ─────────────────────────────────────────────────────

pub unsafe fn set_latency_marker(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_latency_marker_info: *const vk::SetLatencyMarkerInfoNV,
) {
    if let Some(info) = unsafe { p_latency_marker_info.as_ref() } {
        ctx.on_marker(swapchain, info.marker, info.present_id, timestamp_now());
    }

    if let Some(f) = device_fn(ctx, device, |d| {
        d.has_low_latency2
            .then_some(d.table.set_latency_marker_nv)
            .flatten()
    }) {
        unsafe { f(device, swapchain, p_latency_marker_info) };
    }
}

// ── vkGetLatencyTimingsNV ────────────────────────────────────────────────────

pub unsafe fn get_latency_timings(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_latency_marker_info: *mut vk::GetLatencyMarkerInfoNV,
) {
    let Some(f) = device_fn(ctx, device, |d| {
        d.has_low_latency2
            .then_some(d.table.get_latency_timings_nv)
            .flatten()
    }) else {
        return;
    };
    unsafe { f(device, swapchain, p_latency_marker_info) };

    // Count-only queries leave p_timings null.
    let Some(info) = (unsafe { p_latency_marker_info.as_ref() }) else {
        return;
    };
    if info.p_timings.is_null() || info.timing_count == 0 {
        return;
    }
    let reports = unsafe { std::slice::from_raw_parts(info.p_timings, info.timing_count as usize) };
    let accepted = ctx.on_driver_timings(swapchain, reports);
    if accepted > 0 {
        log::debug!("Latency layer: {accepted} driver timing report(s) recorded");
    }
}

// ── vkQueueNotifyOutOfBandNV ─────────────────────────────────────────────────

pub unsafe fn queue_notify_out_of_band(
    ctx: &LayerContext,
    queue: vk::Queue,
    p_queue_type_info: *const vk::OutOfBandQueueTypeInfoNV,
) {
    use ash::vk::Handle;

    let Some(key) = (unsafe { dispatch_key(queue.as_raw()) }) else {
        return;
    };
    let f = ctx
        .registry()
        .devices
        .iter()
        .find(|d| d.dispatch_key == key && d.has_low_latency2)
        .and_then(|d| d.table.queue_notify_out_of_band_nv);
    if let Some(f) = f {
        unsafe { f(queue, p_queue_type_info) };
    }
}

// ── vkWaitForPresentKHR ──────────────────────────────────────────────────────

pub unsafe fn wait_for_present(
    ctx: &LayerContext,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    present_id: u64,
    timeout: u64,
) -> vk::Result {
    match device_fn(ctx, device, |d| {
        d.has_present_wait
            .then_some(d.table.wait_for_present_khr)
            .flatten()
    }) {
        Some(f) => unsafe { f(device, swapchain, present_id, timeout) },
        None => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
    }
}
