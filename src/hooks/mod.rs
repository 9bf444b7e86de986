//! Intercepted Vulkan entry points, written against an explicit
//! [`LayerContext`](crate::context::LayerContext). The exported `extern
//! "system"` symbols in the crate root forward here with the process-wide
//! context.
//!
//! Every hook forwards to the next link whether or not the object is
//! tracked; tracking only affects telemetry.

pub mod instance;
pub mod latency;
pub mod swapchain;


use ash::vk;

use crate::dispatch::load_device;
use crate::registry::Registry;

/// Loader dispatch pointer stored in the first word of every dispatchable
/// handle. A device and the queues it hands out share it.
pub(crate) unsafe fn dispatch_key(handle: u64) -> Option<usize> {
    if handle == 0 {
        return None;
    }
    Some(unsafe { *(handle as *const usize) })
}

/// Resolves a device function for a device the registry could not hold,
/// through the last known downstream resolver.
pub(crate) unsafe fn untracked_device_fn<F: Copy>(
    registry: &Registry,
    device: vk::Device,
    name: &[u8],
) -> Option<F> {
    let gdpa = registry.device_resolver(device)?;
    unsafe { load_device(gdpa, device, name) }
}
