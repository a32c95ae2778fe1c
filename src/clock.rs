use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since an arbitrary process-local epoch.
///
/// Stamps are only ever compared by difference, never interpreted as wall
/// time.
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
