//! Rolling latency aggregation shared by the present and marker paths.

mod rolling;
mod sample;

pub use rolling::RollingBuffer;
pub use sample::{FrameSample, LatencySample};

/// About two seconds of frames at 60 fps.
pub const LATENCY_WINDOW: usize = 120;

const PREDICTION_ALPHA: f64 = 0.3;

/// Circular window of latency samples with running sums, so averages are
/// O(1) regardless of window size.
#[derive(Debug, Clone)]
pub struct LatencyStats<const N: usize> {
    samples: [LatencySample; N],
    count: usize,
    next: usize,
    sum_total_us: u64,
    sum_gpu_us: u64,
    sum_sim_to_present_us: u64,
    recorded: u64,
    predicted_ms: Option<f64>,
}

impl<const N: usize> LatencyStats<N> {
    pub fn new() -> Self {
        Self {
            samples: [LatencySample::default(); N],
            count: 0,
            next: 0,
            sum_total_us: 0,
            sum_gpu_us: 0,
            sum_sim_to_present_us: 0,
            recorded: 0,
            predicted_ms: None,
        }
    }

    pub fn record(&mut self, sample: LatencySample) {
        if N == 0 {
            return;
        }
        if self.count == N {
            let evicted = self.samples[self.next];
            // Saturating: a desynchronised sum must clamp at zero rather than wrap.
            self.sum_total_us = self.sum_total_us.saturating_sub(evicted.total_latency_us);
            self.sum_gpu_us = self.sum_gpu_us.saturating_sub(evicted.gpu_render_us);
            self.sum_sim_to_present_us = self
                .sum_sim_to_present_us
                .saturating_sub(evicted.sim_to_present_us);
        } else {
            self.count += 1;
        }

        self.samples[self.next] = sample;
        self.next = (self.next + 1) % N;
        self.sum_total_us = self.sum_total_us.saturating_add(sample.total_latency_us);
        self.sum_gpu_us = self.sum_gpu_us.saturating_add(sample.gpu_render_us);
        self.sum_sim_to_present_us = self
            .sum_sim_to_present_us
            .saturating_add(sample.sim_to_present_us);
        self.recorded += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Samples recorded since creation, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.recorded
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.average_ms(self.sum_total_us)
    }

    pub fn average_gpu_ms(&self) -> f64 {
        self.average_ms(self.sum_gpu_us)
    }

    pub fn average_sim_to_present_ms(&self) -> f64 {
        self.average_ms(self.sum_sim_to_present_us)
    }

    fn average_ms(&self, sum_us: u64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        sum_us as f64 / self.count as f64 / 1_000.0
    }

    /// Folds the current average latency into the prediction EMA and returns
    /// the new prediction. An empty window leaves the prediction unchanged.
    pub fn update_prediction(&mut self) -> f64 {
        if self.count == 0 {
            return self.predicted_ms.unwrap_or(0.0);
        }
        let avg = self.average_latency_ms();
        let next = match self.predicted_ms {
            Some(prev) => prev * (1.0 - PREDICTION_ALPHA) + avg * PREDICTION_ALPHA,
            None => avg,
        };
        self.predicted_ms = Some(next);
        next
    }

    pub fn predicted_latency_ms(&self) -> f64 {
        self.predicted_ms.unwrap_or(0.0)
    }

    pub fn recommended_queue_depth(&self, low_latency_requested: bool) -> u32 {
        recommended_queue_depth(self.average_latency_ms(), low_latency_requested)
    }

    pub fn last(&self) -> Option<&LatencySample> {
        if self.count == 0 {
            return None;
        }
        Some(&self.samples[(self.next + N - 1) % N])
    }
}

impl<const N: usize> Default for LatencyStats<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames the swapchain queue should hold for the given average latency.
pub fn recommended_queue_depth(avg_latency_ms: f64, low_latency_requested: bool) -> u32 {
    if low_latency_requested {
        1
    } else if avg_latency_ms > 30.0 {
        3
    } else if avg_latency_ms > 20.0 {
        2
    } else {
        1
    }
}
