//! Monotonic process-local timestamps.
//!
//! Modification and cook-start times are compared against each other to
//! detect stale work, so they come from one monotonic clock. The value is
//! also used as the `hot` search param, which only needs to change.

use std::sync::LazyLock;
use std::time::Instant;

/// Microseconds since the process clock was first read.
pub type Timestamp = u64;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Current timestamp. Strictly greater than any previously returned value.
pub fn now() -> Timestamp {
    use std::sync::atomic::{AtomicU64, Ordering};
    static LAST: AtomicU64 = AtomicU64::new(0);

    #[allow(clippy::cast_possible_truncation)]
    let raw = EPOCH.elapsed().as_micros() as u64 + 1;
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = raw.max(last + 1);
        match LAST.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}
