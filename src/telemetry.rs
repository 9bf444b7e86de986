//! Lock-free read side of the layer's statistics.
//!
//! Writers publish aggregated values after each update; readers copy them
//! out of atomics. A snapshot is not transactional: fields may come from
//! neighbouring updates.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const REPORT_QUEUE_DEPTH: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStatsSnapshot {
    pub avg_latency_ms: f64,
    pub avg_gpu_ms: f64,
    pub frame_count: u64,
    pub sample_count: u64,
}

/// Periodic summary emitted from the present path.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryReport {
    pub fps: f64,
    pub frame_time_ms: f64,
    pub frame_time_p99_ms: f64,
    pub avg_latency_ms: f64,
    pub avg_gpu_ms: f64,
    pub avg_sim_to_present_ms: f64,
    pub predicted_latency_ms: f64,
    pub recommended_queue_depth: u32,
    pub frame_count: u64,
    pub sample_count: u64,
}

#[derive(Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

pub struct Telemetry {
    avg_latency_ms: AtomicF64,
    avg_gpu_ms: AtomicF64,
    predicted_latency_ms: AtomicF64,
    frame_count: AtomicU64,
    sample_count: AtomicU64,
    frame_time_ns: AtomicU64,
    recommended_queue_depth: AtomicU32,
    report_tx: Sender<TelemetryReport>,
    report_rx: Receiver<TelemetryReport>,
}

impl Telemetry {
    pub fn new() -> Self {
        let (report_tx, report_rx) = bounded(REPORT_QUEUE_DEPTH);
        Self {
            avg_latency_ms: AtomicF64::default(),
            avg_gpu_ms: AtomicF64::default(),
            predicted_latency_ms: AtomicF64::default(),
            frame_count: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
            frame_time_ns: AtomicU64::new(0),
            recommended_queue_depth: AtomicU32::new(1),
            report_tx,
            report_rx,
        }
    }

    pub fn publish_latency(&self, avg_latency_ms: f64, avg_gpu_ms: f64, sample_count: u64) {
        self.avg_latency_ms.store(avg_latency_ms);
        self.avg_gpu_ms.store(avg_gpu_ms);
        self.sample_count.store(sample_count, Ordering::Relaxed);
    }

    pub fn publish_frames(&self, frame_count: u64, frame_time_ns: u64) {
        self.frame_count.store(frame_count, Ordering::Relaxed);
        self.frame_time_ns.store(frame_time_ns, Ordering::Relaxed);
    }

    pub fn publish_prediction(&self, predicted_latency_ms: f64) {
        self.predicted_latency_ms.store(predicted_latency_ms);
    }

    pub fn publish_queue_depth(&self, queue_depth: u32) {
        self.recommended_queue_depth.store(queue_depth, Ordering::Relaxed);
    }

    /// Queues a report for subscribers. Best effort: a full queue drops it.
    pub fn publish_report(&self, report: TelemetryReport) -> bool {
        match self.report_tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Latency layer: report queue full, dropping report");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Receiving end of the periodic report queue. Clones share one queue,
    /// so each report reaches a single receiver.
    pub fn reports(&self) -> Receiver<TelemetryReport> {
        self.report_rx.clone()
    }

    pub fn snapshot(&self) -> LatencyStatsSnapshot {
        LatencyStatsSnapshot {
            avg_latency_ms: self.avg_latency_ms(),
            avg_gpu_ms: self.avg_gpu_ms(),
            frame_count: self.frame_count(),
            sample_count: self.sample_count.load(Ordering::Relaxed),
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.avg_latency_ms.load()
    }

    pub fn avg_gpu_ms(&self) -> f64 {
        self.avg_gpu_ms.load()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.frame_time_ns.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub fn fps(&self) -> f64 {
        match self.frame_time_ns.load(Ordering::Relaxed) {
            0 => 0.0,
            ns => 1e9 / ns as f64,
        }
    }

    pub fn predicted_latency_ms(&self) -> f64 {
        self.predicted_latency_ms.load()
    }

    pub fn recommended_queue_depth(&self) -> u32 {
        self.recommended_queue_depth.load(Ordering::Relaxed)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_published_values() {
        let t = Telemetry::new();
        assert_eq!(t.snapshot(), LatencyStatsSnapshot::default());
        assert_eq!(t.fps(), 0.0);

        t.publish_latency(12.5, 4.25, 30);
        t.publish_frames(600, 16_000_000);
        let snap = t.snapshot();
        assert_eq!(snap.avg_latency_ms, 12.5);
        assert_eq!(snap.avg_gpu_ms, 4.25);
        assert_eq!(snap.frame_count, 600);
        assert_eq!(snap.sample_count, 30);
        assert_eq!(t.fps(), 62.5);
        assert_eq!(t.frame_time_ms(), 16.0);

        assert_eq!(t.recommended_queue_depth(), 1);
        t.publish_queue_depth(3);
        t.publish_prediction(18.0);
        assert_eq!(t.recommended_queue_depth(), 3);
        assert_eq!(t.predicted_latency_ms(), 18.0);
    }

    #[test]
    fn reports_drop_when_queue_full() {
        let t = Telemetry::new();
        let rx = t.reports();
        for _ in 0..REPORT_QUEUE_DEPTH {
            assert!(t.publish_report(TelemetryReport::default()));
        }
        assert!(!t.publish_report(TelemetryReport::default()));
        assert_eq!(rx.try_iter().count(), REPORT_QUEUE_DEPTH);
        assert!(t.publish_report(TelemetryReport::default()));
    }
}
