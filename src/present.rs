use crate::registry::SwapchainEntry;
use crate::stats::RollingBuffer;

/// Four seconds of frames at 60 fps.
pub const FRAME_TIME_WINDOW: usize = 240;

/// Process-wide frame pacing derived from present calls on every tracked
/// swapchain.
#[derive(Debug, Clone, Default)]
pub struct FramePacing {
    ema_ns: u64,
    total_frames: u64,
    frame_times_ms: RollingBuffer<FRAME_TIME_WINDOW>,
    last_report_ns: u64,
}

impl FramePacing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts one present on `swapchain` at `now_ns`. Returns the frame
    /// time when a previous present on the same swapchain exists.
    pub fn record_present(&mut self, swapchain: &mut SwapchainEntry, now_ns: u64) -> Option<u64> {
        let previous = swapchain.last_present_ns;
        swapchain.last_present_ns = now_ns;
        swapchain.frame_count += 1;
        self.total_frames += 1;

        if previous == 0 {
            return None;
        }
        let frame_time = now_ns.saturating_sub(previous);
        if frame_time == 0 {
            return None;
        }
        self.ema_ns = if self.ema_ns == 0 {
            frame_time
        } else {
            (self.ema_ns * 9 + frame_time) / 10
        };
        self.frame_times_ms.push(frame_time as f64 / 1e6);
        Some(frame_time)
    }

    /// True once per `interval_ns`. The first call only arms the timer.
    pub fn report_due(&mut self, now_ns: u64, interval_ns: u64) -> bool {
        if self.last_report_ns == 0 {
            self.last_report_ns = now_ns;
            return false;
        }
        if now_ns.saturating_sub(self.last_report_ns) > interval_ns {
            self.last_report_ns = now_ns;
            return true;
        }
        false
    }

    pub fn ema_ns(&self) -> u64 {
        self.ema_ns
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn fps(&self) -> f64 {
        if self.ema_ns == 0 {
            0.0
        } else {
            1e9 / self.ema_ns as f64
        }
    }

    pub fn frame_time_percentile_ms(&self, p: f64) -> f64 {
        self.frame_times_ms.percentile(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::LatencySource;
    use ash::vk;
    use ash::vk::Handle;

    fn swapchain() -> SwapchainEntry {
        let info = vk::SwapchainCreateInfoKHR::default()
            .image_extent(vk::Extent2D {
                width: 1920,
                height: 1080,
            })
            .image_format(vk::Format::B8G8R8A8_SRGB)
            .present_mode(vk::PresentModeKHR::FIFO);
        SwapchainEntry::new(
            vk::SwapchainKHR::from_raw(0x51),
            vk::Device::from_raw(0xD1),
            &info,
            LatencySource::Bridged,
        )
    }

    #[test]
    fn first_present_has_no_frame_time() {
        let mut pacing = FramePacing::new();
        let mut sc = swapchain();
        assert_eq!(pacing.record_present(&mut sc, 1_000), None);
        assert_eq!(pacing.ema_ns(), 0);
        assert_eq!(pacing.fps(), 0.0);
        assert_eq!(sc.frame_count, 1);
    }

    #[test]
    fn frame_count_matches_presents_and_ema_smooths() {
        let mut pacing = FramePacing::new();
        let mut sc = swapchain();
        let deltas = [16_000_000u64, 33_000_000, 8_000_000, 20_000_000, 16_000_000];
        let mut now = 1_000_000;
        pacing.record_present(&mut sc, now);
        for d in deltas {
            now += d;
            pacing.record_present(&mut sc, now);
        }
        assert_eq!(sc.frame_count, deltas.len() as u64 + 1);
        assert_eq!(pacing.total_frames(), deltas.len() as u64 + 1);
        assert_ne!(pacing.ema_ns(), deltas[0]);
        let expected = deltas[1..]
            .iter()
            .fold(deltas[0], |ema, &d| (ema * 9 + d) / 10);
        assert_eq!(pacing.ema_ns(), expected);
    }

    #[test]
    fn two_presents_seed_ema_with_the_only_frame_time() {
        let mut pacing = FramePacing::new();
        let mut sc = swapchain();
        pacing.record_present(&mut sc, 1_000_000);
        assert_eq!(pacing.record_present(&mut sc, 17_000_000), Some(16_000_000));
        assert_eq!(sc.frame_count, 2);
        assert_eq!(pacing.ema_ns(), 16_000_000);

        // Smoothing shows from the second frame time on.
        pacing.record_present(&mut sc, 27_000_000);
        assert_eq!(pacing.ema_ns(), 15_400_000);
    }

    #[test]
    fn fixed_spacing_converges() {
        let mut pacing = FramePacing::new();
        let mut sc = swapchain();
        let spacing = 16_600_000u64;
        for i in 0..10 {
            pacing.record_present(&mut sc, 1 + i * spacing);
        }
        assert_eq!(sc.frame_count, 10);
        let ema_ms = pacing.ema_ns() as f64 / 1e6;
        assert!((ema_ms - 16.6).abs() < 1.0, "ema {ema_ms}ms");
        assert!((pacing.fps() - 60.24).abs() < 0.1);
        assert!((pacing.frame_time_percentile_ms(99.0) - 16.6).abs() < 1e-6);
    }

    #[test]
    fn clock_skew_is_not_a_frame() {
        let mut pacing = FramePacing::new();
        let mut sc = swapchain();
        pacing.record_present(&mut sc, 5_000);
        assert_eq!(pacing.record_present(&mut sc, 4_000), None);
        assert_eq!(pacing.ema_ns(), 0);
    }

    #[test]
    fn report_fires_once_per_interval() {
        let mut pacing = FramePacing::new();
        let interval = 5_000_000_000;
        assert!(!pacing.report_due(10, interval));
        assert!(!pacing.report_due(interval, interval));
        assert!(pacing.report_due(interval + 11, interval));
        assert!(!pacing.report_due(interval + 12, interval));
    }
}
