//! Per-swapchain correlation of `VK_NV_low_latency2` markers.

use ash::vk;

use crate::stats::LatencySample;

/// Marker values as defined by `VkLatencyMarkerNV`. The discriminants cross
/// the driver ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LatencyMarker {
    SimulationStart = 0,
    SimulationEnd = 1,
    RenderSubmitStart = 2,
    RenderSubmitEnd = 3,
    PresentStart = 4,
    PresentEnd = 5,
    InputSample = 6,
    TriggerFlash = 7,
    OutOfBandRenderSubmitStart = 8,
    OutOfBandRenderSubmitEnd = 9,
    OutOfBandPresentStart = 10,
    OutOfBandPresentEnd = 11,
}

impl LatencyMarker {
    pub fn from_raw(marker: vk::LatencyMarkerNV) -> Option<Self> {
        Some(match marker.as_raw() {
            0 => Self::SimulationStart,
            1 => Self::SimulationEnd,
            2 => Self::RenderSubmitStart,
            3 => Self::RenderSubmitEnd,
            4 => Self::PresentStart,
            5 => Self::PresentEnd,
            6 => Self::InputSample,
            7 => Self::TriggerFlash,
            8 => Self::OutOfBandRenderSubmitStart,
            9 => Self::OutOfBandRenderSubmitEnd,
            10 => Self::OutOfBandPresentStart,
            11 => Self::OutOfBandPresentEnd,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> vk::LatencyMarkerNV {
        vk::LatencyMarkerNV::from_raw(self as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerState {
    #[default]
    Idle,
    SimStarted,
    RenderSubmitted,
    Presenting,
}

/// Where a swapchain's latency samples come from. Exactly one source feeds
/// the statistics for a given swapchain, so a frame is never counted twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySource {
    /// Locally timestamped markers; used when the driver cannot report timings.
    Bridged,
    /// `vkGetLatencyTimingsNV` reports from the driver.
    Driver,
}

impl LatencySource {
    pub fn for_device(has_low_latency2: bool) -> Self {
        if has_low_latency2 {
            Self::Driver
        } else {
            Self::Bridged
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkerTracker {
    source: LatencySource,
    state: MarkerState,
    present_id: u64,
    last_sim_start_ns: u64,
    render_submit_start_ns: u64,
    last_gpu_render_ns: u64,
    last_driver_present_id: u64,
}

impl MarkerTracker {
    pub fn new(source: LatencySource) -> Self {
        Self {
            source,
            state: MarkerState::Idle,
            present_id: 0,
            last_sim_start_ns: 0,
            render_submit_start_ns: 0,
            last_gpu_render_ns: 0,
            last_driver_present_id: 0,
        }
    }

    pub fn source(&self) -> LatencySource {
        self.source
    }

    pub fn state(&self) -> MarkerState {
        self.state
    }

    pub fn present_id(&self) -> u64 {
        self.present_id
    }

    /// Applies one marker. Returns a bridged sample when a present starts for
    /// a frame whose simulation start was seen and this swapchain is fed by
    /// local markers.
    pub fn on_marker(
        &mut self,
        marker: LatencyMarker,
        present_id: u64,
        now_ns: u64,
    ) -> Option<LatencySample> {
        self.present_id = present_id;
        match marker {
            LatencyMarker::SimulationStart => {
                self.last_sim_start_ns = now_ns;
                self.state = MarkerState::SimStarted;
                None
            }
            LatencyMarker::RenderSubmitStart => {
                self.render_submit_start_ns = now_ns;
                self.state = MarkerState::RenderSubmitted;
                None
            }
            LatencyMarker::RenderSubmitEnd => {
                if self.render_submit_start_ns != 0 {
                    self.last_gpu_render_ns = now_ns.saturating_sub(self.render_submit_start_ns);
                    self.render_submit_start_ns = 0;
                }
                self.state = MarkerState::RenderSubmitted;
                None
            }
            LatencyMarker::PresentStart => {
                self.state = MarkerState::Presenting;
                if self.last_sim_start_ns == 0 {
                    return None;
                }
                let latency_us = now_ns.saturating_sub(self.last_sim_start_ns) / 1_000;
                // One sample per simulated frame.
                self.last_sim_start_ns = 0;
                (self.source == LatencySource::Bridged).then(|| LatencySample {
                    frame_id: present_id,
                    sim_to_present_us: latency_us,
                    gpu_render_us: self.last_gpu_render_ns / 1_000,
                    total_latency_us: latency_us,
                })
            }
            LatencyMarker::PresentEnd => {
                self.state = MarkerState::Idle;
                None
            }
            _ => None,
        }
    }

    /// Feeds driver timing reports, calling `emit` once for every frame not
    /// seen before. The driver returns a history window on every query, so
    /// reports at or below the last accepted present-id are skipped.
    pub fn on_driver_timings(
        &mut self,
        reports: &[vk::LatencyTimingsFrameReportNV<'_>],
        mut emit: impl FnMut(LatencySample),
    ) -> usize {
        if self.source != LatencySource::Driver {
            return 0;
        }
        let watermark = self.last_driver_present_id;
        let mut accepted = 0;
        for report in reports {
            if report.present_id == 0 || report.present_id <= watermark {
                continue;
            }
            emit(LatencySample::from_timings_report(report));
            self.last_driver_present_id = self.last_driver_present_id.max(report.present_id);
            accepted += 1;
        }
        accepted
    }
}
