use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Wall clock that never hands out the same instant twice.
///
/// Every write stamps `updated_at`/`created_at` from here, so two rapid writes
/// to the same row still order correctly under last-writer-wins.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}
