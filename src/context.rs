use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::LayerConfig;
use crate::markers::LatencyMarker;
use crate::present::FramePacing;
use crate::registry::Registry;
use crate::stats::{LATENCY_WINDOW, LatencySample, LatencyStats};
use crate::telemetry::{Telemetry, TelemetryReport};

/// Everything one loaded layer knows. The exported entry points share a
/// single process-wide instance; tests build their own.
///
/// Lock order: registry, then pacing, then stats. No lock is held while a
/// downstream function runs.
pub struct LayerContext {
    config: LayerConfig,
    registry: Mutex<Registry>,
    pacing: Mutex<FramePacing>,
    stats: Mutex<LatencyStats<LATENCY_WINDOW>>,
    telemetry: Telemetry,
    low_latency_requested: AtomicBool,
}

impl LayerContext {
    pub fn new(config: LayerConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::new()),
            pacing: Mutex::new(FramePacing::new()),
            stats: Mutex::new(LatencyStats::new()),
            telemetry: Telemetry::new(),
            low_latency_requested: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Records the application's sleep-mode request. The exported queue
    /// depth follows immediately.
    pub fn set_low_latency_requested(&self, requested: bool) {
        self.low_latency_requested.store(requested, Ordering::Relaxed);
        let depth = self
            .stats
            .lock()
            .recommended_queue_depth(self.low_latency_requested());
        self.telemetry.publish_queue_depth(depth);
    }

    pub fn low_latency_requested(&self) -> bool {
        self.config.force_low_latency || self.low_latency_requested.load(Ordering::Relaxed)
    }

    pub fn record_latency(&self, sample: LatencySample) {
        let mut stats = self.stats.lock();
        stats.record(sample);
        self.telemetry.publish_latency(
            stats.average_latency_ms(),
            stats.average_gpu_ms(),
            stats.len() as u64,
        );
        self.telemetry
            .publish_queue_depth(stats.recommended_queue_depth(self.low_latency_requested()));
    }

    /// Frame accounting for one present call. Untracked swapchains are
    /// skipped. Returns the report when one was due.
    pub fn on_present(
        &self,
        swapchains: &[vk::SwapchainKHR],
        now_ns: u64,
    ) -> Option<TelemetryReport> {
        let mut registry = self.registry.lock();
        let mut pacing = self.pacing.lock();
        for &handle in swapchains {
            if let Some(entry) = registry.swapchain_mut(handle) {
                pacing.record_present(entry, now_ns);
            }
        }
        drop(registry);

        self.telemetry
            .publish_frames(pacing.total_frames(), pacing.ema_ns());

        let interval_ns = self.config.report_interval.as_nanos() as u64;
        if !pacing.report_due(now_ns, interval_ns) {
            return None;
        }
        let report = self.build_report(&pacing);
        drop(pacing);

        self.telemetry.publish_report(report);
        if report.fps > 0.0 {
            log::info!(
                "Latency layer: {:.1} fps ({:.2} ms, p99 {:.2} ms), \
                 latency {:.2} ms, gpu {:.2} ms, queue depth {}",
                report.fps,
                report.frame_time_ms,
                report.frame_time_p99_ms,
                report.avg_latency_ms,
                report.avg_gpu_ms,
                report.recommended_queue_depth,
            );
        }
        Some(report)
    }

    fn build_report(&self, pacing: &FramePacing) -> TelemetryReport {
        let mut stats = self.stats.lock();
        let predicted_latency_ms = if self.config.prediction {
            stats.update_prediction()
        } else {
            stats.predicted_latency_ms()
        };
        let queue_depth = stats.recommended_queue_depth(self.low_latency_requested());
        self.telemetry.publish_prediction(predicted_latency_ms);
        self.telemetry.publish_queue_depth(queue_depth);

        TelemetryReport {
            fps: pacing.fps(),
            frame_time_ms: pacing.ema_ns() as f64 / 1e6,
            frame_time_p99_ms: pacing.frame_time_percentile_ms(99.0),
            avg_latency_ms: stats.average_latency_ms(),
            avg_gpu_ms: stats.average_gpu_ms(),
            avg_sim_to_present_ms: stats.average_sim_to_present_ms(),
            predicted_latency_ms,
            recommended_queue_depth: queue_depth,
            frame_count: pacing.total_frames(),
            sample_count: stats.len() as u64,
        }
    }

    /// Local bookkeeping for `vkSetLatencyMarkerNV`. Unknown swapchains and
    /// marker values are ignored.
    pub fn on_marker(
        &self,
        swapchain: vk::SwapchainKHR,
        marker: vk::LatencyMarkerNV,
        present_id: u64,
        now_ns: u64,
    ) -> Option<LatencySample> {
        let Some(marker) = LatencyMarker::from_raw(marker) else {
            log::debug!("Latency layer: unknown marker {:?}", marker);
            return None;
        };
        let sample = {
            let mut registry = self.registry.lock();
            let entry = registry.swapchain_mut(swapchain)?;
            let sample = entry.markers.on_marker(marker, present_id, now_ns);
            log::trace!(
                "Latency layer: {marker:?} on frame {present_id}, now {:?}",
                entry.markers.state()
            );
            sample
        };
        if let Some(sample) = sample {
            log::debug!(
                "Latency layer: frame {} sim→present {} us",
                sample.frame_id,
                sample.sim_to_present_us
            );
            self.record_latency(sample);
        }
        sample
    }

    /// Local bookkeeping for the reports returned by `vkGetLatencyTimingsNV`.
    pub fn on_driver_timings(
        &self,
        swapchain: vk::SwapchainKHR,
        reports: &[vk::LatencyTimingsFrameReportNV<'_>],
    ) -> usize {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.swapchain_mut(swapchain) else {
            return 0;
        };
        entry
            .markers
            .on_driver_timings(reports, |sample| self.record_latency(sample))
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.stats.lock().average_latency_ms()
    }

    pub fn frame_time_percentile_ms(&self, p: f64) -> f64 {
        self.pacing.lock().frame_time_percentile_ms(p)
    }
}

impl Default for LayerContext {
    fn default() -> Self {
        Self::new(LayerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::LatencySource;
    use crate::registry::SwapchainEntry;
    use ash::vk::Handle;
    use std::time::Duration;

    const MS: u64 = 1_000_000;

    fn with_swapchain(ctx: &LayerContext, raw: u64, source: LatencySource) -> vk::SwapchainKHR {
        let handle = vk::SwapchainKHR::from_raw(raw);
        let info = vk::SwapchainCreateInfoKHR::default()
            .image_extent(vk::Extent2D {
                width: 1920,
                height: 1080,
            })
            .present_mode(vk::PresentModeKHR::FIFO);
        assert!(ctx.registry().swapchains.store(SwapchainEntry::new(
            handle,
            vk::Device::from_raw(0xD1),
            &info,
            source,
        )));
        handle
    }

    #[test]
    fn present_spacing_without_markers() {
        let ctx = LayerContext::default();
        let sc = with_swapchain(&ctx, 0x5C1, LatencySource::Bridged);
        let spacing = 16_600_000;
        for i in 0..10 {
            ctx.on_present(&[sc], MS + i * spacing);
        }
        assert_eq!(ctx.registry().swapchain(sc).map(|s| s.frame_count), Some(10));
        assert_eq!(ctx.average_latency_ms(), 0.0);
        assert!((ctx.telemetry().frame_time_ms() - 16.6).abs() < 1.0);
        assert_eq!(ctx.telemetry().frame_count(), 10);
        assert_eq!(ctx.telemetry().snapshot().sample_count, 0);
    }

    #[test]
    fn untracked_swapchain_is_skipped() {
        let ctx = LayerContext::default();
        ctx.on_present(&[vk::SwapchainKHR::from_raw(0xBAD)], MS);
        assert_eq!(ctx.telemetry().frame_count(), 0);
        assert!(
            ctx.on_marker(
                vk::SwapchainKHR::from_raw(0xBAD),
                vk::LatencyMarkerNV::SIMULATION_START,
                1,
                MS
            )
            .is_none()
        );
    }

    #[test]
    fn periodic_report_is_published() {
        let ctx = LayerContext::new(LayerConfig {
            report_interval: Duration::from_millis(100),
            ..LayerConfig::default()
        });
        let rx = ctx.telemetry().reports();
        let sc = with_swapchain(&ctx, 0x5C2, LatencySource::Bridged);

        let mut report = None;
        for i in 0..20 {
            report = report.or(ctx.on_present(&[sc], MS + i * 10 * MS));
        }
        let report = report.expect("report within 200ms of presents");
        assert!((report.fps - 100.0).abs() < 0.5);
        assert_eq!(report.recommended_queue_depth, 1);
        assert_eq!(rx.try_recv().ok(), Some(report));
    }

    #[test]
    fn report_carries_latency_averages() {
        let ctx = LayerContext::new(LayerConfig {
            report_interval: Duration::from_millis(50),
            prediction: true,
            ..LayerConfig::default()
        });
        let sc = with_swapchain(&ctx, 0x5C6, LatencySource::Driver);
        for frame in 1..=4 {
            ctx.record_latency(LatencySample {
                frame_id: frame,
                sim_to_present_us: 12_000,
                gpu_render_us: 5_000,
                total_latency_us: 30_000,
            });
        }

        let mut report = None;
        for i in 0..10 {
            report = report.or(ctx.on_present(&[sc], MS + i * 10 * MS));
        }
        let report = report.expect("report within 100ms of presents");
        assert_eq!(report.avg_latency_ms, 30.0);
        assert_eq!(report.avg_gpu_ms, 5.0);
        assert_eq!(report.avg_sim_to_present_ms, 12.0);
        assert_eq!(report.predicted_latency_ms, 30.0);
        assert_eq!(report.recommended_queue_depth, 2);
        assert_eq!(report.sample_count, 4);
    }

    #[test]
    fn bridged_markers_feed_statistics() {
        let ctx = LayerContext::default();
        let sc = with_swapchain(&ctx, 0x5C3, LatencySource::Bridged);
        for frame in 1..=3u64 {
            let base = frame * 100 * MS;
            ctx.on_marker(sc, vk::LatencyMarkerNV::SIMULATION_START, frame, base);
            ctx.on_marker(sc, vk::LatencyMarkerNV::RENDERSUBMIT_START, frame, base + 2 * MS);
            ctx.on_marker(sc, vk::LatencyMarkerNV::RENDERSUBMIT_END, frame, base + 6 * MS);
            ctx.on_marker(sc, vk::LatencyMarkerNV::PRESENT_START, frame, base + 25 * MS);
            ctx.on_marker(sc, vk::LatencyMarkerNV::PRESENT_END, frame, base + 26 * MS);
        }
        let snap = ctx.telemetry().snapshot();
        assert_eq!(snap.sample_count, 3);
        assert_eq!(snap.avg_latency_ms, 25.0);
        assert_eq!(snap.avg_gpu_ms, 4.0);
    }

    #[test]
    fn driver_timings_only_count_for_driver_source() {
        let ctx = LayerContext::default();
        let bridged = with_swapchain(&ctx, 0x5C4, LatencySource::Bridged);
        let driver = with_swapchain(&ctx, 0x5C5, LatencySource::Driver);
        let reports = [vk::LatencyTimingsFrameReportNV::default()
            .present_id(1)
            .sim_start_time_us(1_000)
            .present_end_time_us(21_000)];

        assert_eq!(ctx.on_driver_timings(bridged, &reports), 0);
        assert_eq!(ctx.on_driver_timings(driver, &reports), 1);
        assert_eq!(ctx.on_driver_timings(driver, &reports), 0);
        assert_eq!(ctx.average_latency_ms(), 20.0);

        ctx.on_marker(driver, vk::LatencyMarkerNV::SIMULATION_START, 2, MS);
        ctx.on_marker(driver, vk::LatencyMarkerNV::PRESENT_START, 2, 40 * MS);
        assert_eq!(ctx.telemetry().snapshot().sample_count, 1);
    }

    fn latency_sample(frame_id: u64, total_ms: u64) -> LatencySample {
        LatencySample {
            frame_id,
            sim_to_present_us: total_ms * 1_000,
            gpu_render_us: 0,
            total_latency_us: total_ms * 1_000,
        }
    }

    #[test]
    fn queue_depth_tracks_latency_between_reports() {
        let ctx = LayerContext::default();
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 1);
        for frame in 1..=10 {
            ctx.record_latency(latency_sample(frame, 31));
        }
        assert_eq!(ctx.telemetry().avg_latency_ms(), 31.0);
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 3);

        for frame in 11..=130 {
            ctx.record_latency(latency_sample(frame, 21));
        }
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 2);
    }

    #[test]
    fn sleep_mode_request_updates_queue_depth_immediately() {
        let ctx = LayerContext::default();
        for frame in 1..=5 {
            ctx.record_latency(latency_sample(frame, 50));
        }
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 3);

        ctx.set_low_latency_requested(true);
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 1);

        ctx.set_low_latency_requested(false);
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 3);
    }

    #[test]
    fn forced_low_latency_overrides_queue_depth() {
        let ctx = LayerContext::new(LayerConfig {
            force_low_latency: true,
            ..LayerConfig::default()
        });
        assert!(ctx.low_latency_requested());
        ctx.record_latency(latency_sample(1, 50));
        assert_eq!(ctx.telemetry().recommended_queue_depth(), 1);
    }
}
