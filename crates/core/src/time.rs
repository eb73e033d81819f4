//! Clock injection.
//!
//! `update` falls back to "now UTC" when a draft carries no time; routing
//! that through a trait keeps writes deterministic under test.

use chrono::{DateTime, Utc};

use crate::limits::TIME_FORMAT;

pub trait Clock {
    /// Current UTC time rendered in the canonical `YYYY-MM-DD HH:MM:SS` form.
    fn now_str(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_str(&self) -> String {
        render_time(&Utc::now())
    }
}

pub fn render_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}
