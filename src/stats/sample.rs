use ash::vk;

/// Raw timestamps for one frame, in nanoseconds on a common clock.
///
/// A field left at 0 was not observed. Derived durations clamp to 0 when a
/// later stage reports an earlier timestamp than the stage before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSample {
    pub input_ns: u64,
    pub cpu_start_ns: u64,
    pub cpu_end_ns: u64,
    pub gpu_submit_ns: u64,
    pub gpu_complete_ns: u64,
    pub present_ns: u64,
    pub scanout_ns: u64,
}

impl FrameSample {
    /// Input to the last observed display stage (scanout, or present when
    /// scanout is older or missing).
    pub fn total_latency_ns(&self) -> u64 {
        self.scanout_ns
            .max(self.present_ns)
            .saturating_sub(self.input_ns)
    }

    pub fn cpu_time_ns(&self) -> u64 {
        self.cpu_end_ns.saturating_sub(self.cpu_start_ns)
    }

    pub fn gpu_time_ns(&self) -> u64 {
        self.gpu_complete_ns.saturating_sub(self.gpu_submit_ns)
    }

    /// Driver timing reports carry microsecond timestamps. Simulation start
    /// stands in for the input point and present end for the display point;
    /// the driver does not report scanout.
    pub fn from_timings_report(report: &vk::LatencyTimingsFrameReportNV<'_>) -> Self {
        let us = |t: u64| t.saturating_mul(1_000);
        Self {
            input_ns: us(report.sim_start_time_us),
            cpu_start_ns: us(report.sim_start_time_us),
            cpu_end_ns: us(report.render_submit_end_time_us),
            gpu_submit_ns: us(report.gpu_render_start_time_us),
            gpu_complete_ns: us(report.gpu_render_end_time_us),
            present_ns: us(report.present_end_time_us),
            scanout_ns: 0,
        }
    }
}

/// One completed latency measurement, all durations in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySample {
    pub frame_id: u64,
    pub sim_to_present_us: u64,
    pub gpu_render_us: u64,
    pub total_latency_us: u64,
}

impl LatencySample {
    pub fn from_timings_report(report: &vk::LatencyTimingsFrameReportNV<'_>) -> Self {
        let frame = FrameSample::from_timings_report(report);
        Self {
            frame_id: report.present_id,
            sim_to_present_us: report
                .present_start_time_us
                .saturating_sub(report.sim_start_time_us),
            gpu_render_us: frame.gpu_time_ns() / 1_000,
            total_latency_us: frame.total_latency_ns() / 1_000,
        }
    }
}
