use once_cell::sync::Lazy;
use std::time::Instant;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the layer was loaded.
///
/// Never returns 0 so that 0 can keep meaning "no timestamp recorded".
pub fn timestamp_now() -> u64 {
    (ORIGIN.elapsed().as_nanos() as u64).max(1)
}
