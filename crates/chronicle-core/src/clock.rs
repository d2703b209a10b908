//! Time source for event timestamps and projection lock deadlines.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Supplies the instant stamped on new events, snapshots and checkpoint
/// locks. Tests substitute a fixed or manually advanced clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The instant `ttl` after `from`, or `None` if it is not representable.
#[must_use]
pub fn deadline(from: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| from.checked_add_signed(ttl))
}
