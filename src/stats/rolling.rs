/// Fixed-capacity window of the most recent `N` samples.
///
/// Once full, each push overwrites the oldest sample. Queries only look at
/// the filled part of the window and never allocate.
#[derive(Debug, Clone)]
pub struct RollingBuffer<const N: usize> {
    samples: [f64; N],
    count: usize,
    next: usize,
}

impl<const N: usize> RollingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            samples: [0.0; N],
            count: 0,
            next: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if N == 0 {
            return;
        }
        self.samples[self.next] = value;
        self.next = (self.next + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Most recently pushed sample.
    pub fn latest(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.samples[(self.next + N - 1) % N])
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.filled().iter().sum::<f64>() / self.count as f64
    }

    pub fn min(&self) -> f64 {
        self.filled().iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.filled().iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    /// Nearest-rank percentile, `p` in `0..=100`.
    ///
    /// Sorts a stack copy of the window ascending and picks
    /// `floor((count - 1) * p / 100)`.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted = [0.0f64; N];
        let sorted = &mut sorted[..self.count];
        sorted.copy_from_slice(self.filled());
        sorted.sort_unstable_by(f64::total_cmp);

        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
        let idx = ((self.count - 1) as f64 * p / 100.0).floor() as usize;
        sorted[idx.min(self.count - 1)]
    }

    // Slots past `count` are stale or zero; the order inside the filled part
    // does not matter to any query.
    fn filled(&self) -> &[f64] {
        &self.samples[..self.count]
    }
}

impl<const N: usize> Default for RollingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_reports_zero() {
        let buf = RollingBuffer::<8>::new();
        assert!(buf.is_empty());
        assert_eq!(buf.average(), 0.0);
        assert_eq!(buf.percentile(99.0), 0.0);
        assert_eq!(buf.latest(), None);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut buf = RollingBuffer::<4>::new();
        for v in [100.0, 1.0, 2.0, 3.0, 4.0] {
            buf.push(v);
        }
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.average(), 2.5);
        assert_eq!(buf.max(), 4.0);
        assert_eq!(buf.min(), 1.0);
        assert_eq!(buf.latest(), Some(4.0));
    }

    #[test]
    fn percentile_uses_floor_index() {
        let mut buf = RollingBuffer::<16>::new();
        for v in [50.0, 10.0, 40.0, 20.0, 30.0] {
            buf.push(v);
        }
        // (5 - 1) * p / 100
        assert_eq!(buf.percentile(0.0), 10.0);
        assert_eq!(buf.percentile(50.0), 30.0);
        assert_eq!(buf.percentile(74.0), 30.0);
        assert_eq!(buf.percentile(75.0), 40.0);
        assert_eq!(buf.percentile(100.0), 50.0);
    }

    #[test]
    fn percentile_is_monotonic() {
        let mut buf = RollingBuffer::<64>::new();
        let mut x = 17u64;
        for _ in 0..100 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            buf.push((x >> 40) as f64 / 1000.0);
        }
        let mut prev = f64::MIN;
        for p in 0..=100 {
            let v = buf.percentile(p as f64);
            assert!(v >= prev, "p{p} = {v} dropped below {prev}");
            prev = v;
        }
    }

    #[test]
    fn percentile_ignores_unfilled_slots() {
        let mut buf = RollingBuffer::<8>::new();
        buf.push(5.0);
        buf.push(7.0);
        assert_eq!(buf.percentile(0.0), 5.0);
        assert_eq!(buf.min(), 5.0);
    }
}
