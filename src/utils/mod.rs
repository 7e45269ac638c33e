//! Shared utilities.

pub mod decimal;
pub mod poll;

pub use decimal::*;
pub use poll::{poll_until, sleep_or_cancel, Clock, ManualClock, PollOutcome, PollPolicy, SystemClock};
