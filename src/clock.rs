use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::UserId;

/// Source of "now" in a user's own local wall-clock time.
///
/// Times in the ledger are naive local times of the owning admin; this trait
/// is where that local time comes from. No timezone conversion happens here.
pub trait Clock: Send + Sync {
    fn now(&self, user: UserId) -> NaiveDateTime;

    fn today(&self, user: UserId) -> NaiveDate {
        self.now(user).date()
    }
}

/// Host-local time for every user.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self, _user: UserId) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self, _user: UserId) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn fixed_clock_can_be_moved() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(Ulid::new()), start);

        let later = start + chrono::TimeDelta::days(2);
        clock.set(later);
        assert_eq!(clock.today(Ulid::new()), later.date());
    }
}
