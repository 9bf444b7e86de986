//! Fixed-capacity tables of interception state for instances, devices and
//! swapchains. Nothing here allocates after construction.

use ash::vk;
use ash::vk::Handle;

use crate::dispatch::{DeviceTable, InstanceTable};
use crate::markers::{LatencySource, MarkerTracker};

pub const MAX_INSTANCES: usize = 4;
pub const MAX_DEVICES: usize = 8;
pub const MAX_SWAPCHAINS: usize = 16;

/// An entry that is looked up by the raw value of its Vulkan handle.
pub trait Keyed {
    fn key(&self) -> u64;
}

/// Flat slot array with a stack of free indices.
///
/// `find` is a linear scan over live slots, which is fine at these sizes.
pub struct SlotTable<T, const N: usize> {
    slots: [Option<T>; N],
    free: [usize; N],
    free_len: usize,
}

impl<T: Keyed, const N: usize> SlotTable<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            // Pop order hands out slot 0 first.
            free: std::array::from_fn(|i| N - 1 - i),
            free_len: N,
        }
    }

    fn position(&self, key: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.key() == key))
    }

    pub fn find(&self, key: u64) -> Option<&T> {
        self.position(key).and_then(|i| self.slots[i].as_ref())
    }

    pub fn find_mut(&mut self, key: u64) -> Option<&mut T> {
        self.position(key).and_then(|i| self.slots[i].as_mut())
    }

    /// Stores `entry`, replacing a live entry with the same key. Returns
    /// false when the table is full; the entry is dropped.
    pub fn store(&mut self, entry: T) -> bool {
        if let Some(i) = self.position(entry.key()) {
            self.slots[i] = Some(entry);
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.free_len -= 1;
        let i = self.free[self.free_len];
        self.slots[i] = Some(entry);
        true
    }

    pub fn remove(&mut self, key: u64) -> Option<T> {
        let i = self.position(key)?;
        let entry = self.slots[i].take();
        self.free[self.free_len] = i;
        self.free_len += 1;
        entry
    }

    /// Removes every entry matching `pred`, returning how many went.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut removed = 0;
        for i in 0..N {
            if self.slots[i].as_ref().is_some_and(&mut pred) {
                self.slots[i] = None;
                self.free[self.free_len] = i;
                self.free_len += 1;
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        N - self.free_len
    }

    pub fn is_empty(&self) -> bool {
        self.free_len == N
    }

    pub fn is_full(&self) -> bool {
        self.free_len == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

impl<T: Keyed, const N: usize> Default for SlotTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Entries ──────────────────────────────────────────────────────────────────

pub struct InstanceEntry {
    pub handle: vk::Instance,
    pub next_gipa: vk::PFN_vkGetInstanceProcAddr,
    pub table: InstanceTable,
}

impl Keyed for InstanceEntry {
    fn key(&self) -> u64 {
        self.handle.as_raw()
    }
}

pub struct DeviceEntry {
    pub handle: vk::Device,
    /// Loader dispatch pointer; queues created from this device share it.
    pub dispatch_key: usize,
    pub next_gdpa: vk::PFN_vkGetDeviceProcAddr,
    pub table: DeviceTable,
    pub has_low_latency2: bool,
    pub has_present_wait: bool,
}

impl Keyed for DeviceEntry {
    fn key(&self) -> u64 {
        self.handle.as_raw()
    }
}

pub struct SwapchainEntry {
    pub handle: vk::SwapchainKHR,
    pub device: vk::Device,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub frame_count: u64,
    pub last_present_ns: u64,
    pub markers: MarkerTracker,
}

impl SwapchainEntry {
    pub fn new(
        handle: vk::SwapchainKHR,
        device: vk::Device,
        info: &vk::SwapchainCreateInfoKHR<'_>,
        source: LatencySource,
    ) -> Self {
        Self {
            handle,
            device,
            width: info.image_extent.width,
            height: info.image_extent.height,
            format: info.image_format,
            present_mode: info.present_mode,
            frame_count: 0,
            last_present_ns: 0,
            markers: MarkerTracker::new(source),
        }
    }
}

impl Keyed for SwapchainEntry {
    fn key(&self) -> u64 {
        self.handle.as_raw()
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// All per-object interception state of one layer instance.
pub struct Registry {
    pub instances: SlotTable<InstanceEntry, MAX_INSTANCES>,
    pub devices: SlotTable<DeviceEntry, MAX_DEVICES>,
    pub swapchains: SlotTable<SwapchainEntry, MAX_SWAPCHAINS>,
    /// Last downstream resolvers seen at creation time. Objects that did not
    /// fit in a table are passed through to these so they keep working.
    pub fallback_gipa: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub fallback_gdpa: Option<vk::PFN_vkGetDeviceProcAddr>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            instances: SlotTable::new(),
            devices: SlotTable::new(),
            swapchains: SlotTable::new(),
            fallback_gipa: None,
            fallback_gdpa: None,
        }
    }

    pub fn instance(&self, instance: vk::Instance) -> Option<&InstanceEntry> {
        self.instances.find(instance.as_raw())
    }

    pub fn device(&self, device: vk::Device) -> Option<&DeviceEntry> {
        self.devices.find(device.as_raw())
    }

    pub fn swapchain(&self, swapchain: vk::SwapchainKHR) -> Option<&SwapchainEntry> {
        self.swapchains.find(swapchain.as_raw())
    }

    pub fn swapchain_mut(&mut self, swapchain: vk::SwapchainKHR) -> Option<&mut SwapchainEntry> {
        self.swapchains.find_mut(swapchain.as_raw())
    }

    /// Device owning a queue with the given dispatch key, or else any device
    /// that can present.
    pub fn present_device(&self, queue_dispatch_key: Option<usize>) -> Option<&DeviceEntry> {
        queue_dispatch_key
            .and_then(|key| self.devices.iter().find(|d| d.dispatch_key == key))
            .filter(|d| d.table.queue_present_khr.is_some())
            .or_else(|| {
                self.devices
                    .iter()
                    .find(|d| d.table.queue_present_khr.is_some())
            })
    }

    /// Device-level resolver for `device`, falling back to the last one seen
    /// for devices the table could not hold.
    pub fn device_resolver(&self, device: vk::Device) -> Option<vk::PFN_vkGetDeviceProcAddr> {
        self.device(device)
            .map(|d| d.next_gdpa)
            .or(self.fallback_gdpa)
    }

    pub fn instance_resolver(
        &self,
        instance: vk::Instance,
    ) -> Option<vk::PFN_vkGetInstanceProcAddr> {
        self.instance(instance)
            .map(|i| i.next_gipa)
            .or(self.fallback_gipa)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(u64, &'static str);

    impl Keyed for Item {
        fn key(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn store_find_remove() {
        let mut t = SlotTable::<Item, 2>::new();
        assert!(t.is_empty());
        assert!(t.store(Item(10, "a")));
        assert!(t.store(Item(20, "b")));
        assert_eq!(t.find(10).map(|i| i.1), Some("a"));
        assert_eq!(t.remove(10).map(|i| i.1), Some("a"));
        assert!(t.find(10).is_none());
        assert!(t.remove(10).is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn full_table_rejects_and_recovers_after_remove() {
        let mut t = SlotTable::<Item, 2>::new();
        assert!(t.store(Item(1, "a")));
        assert!(t.store(Item(2, "b")));
        assert!(t.is_full());
        assert!(!t.store(Item(3, "c")));
        assert!(t.find(3).is_none());

        t.remove(1);
        assert!(t.store(Item(3, "c")));
        assert_eq!(t.find(3).map(|i| i.1), Some("c"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn storing_same_key_replaces() {
        let mut t = SlotTable::<Item, 2>::new();
        t.store(Item(1, "old"));
        assert!(t.store(Item(1, "new")));
        assert_eq!(t.len(), 1);
        assert_eq!(t.find(1).map(|i| i.1), Some("new"));
    }

    #[test]
    fn remove_where_frees_slots() {
        let mut t = SlotTable::<Item, 4>::new();
        for k in 1..=4 {
            t.store(Item(k, if k % 2 == 0 { "even" } else { "odd" }));
        }
        assert_eq!(t.remove_where(|i| i.1 == "even"), 2);
        assert_eq!(t.len(), 2);
        assert!(t.store(Item(5, "x")));
        assert!(t.store(Item(6, "y")));
        assert!(!t.store(Item(7, "z")));
    }

    #[test]
    fn registry_capacities() {
        let r = Registry::new();
        assert_eq!(r.instances.capacity(), 4);
        assert_eq!(r.devices.capacity(), 8);
        assert_eq!(r.swapchains.capacity(), 16);
        assert!(r.device_resolver(vk::Device::null()).is_none());
    }
}
