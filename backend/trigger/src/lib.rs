//! Trigger calculators: pure functions from (trigger spec, now) to the next
//! fire time. No I/O, no clock reads — callers pass `now` in.

pub mod calc;
pub mod lunar;
pub mod visual;

pub use calc::{is_recurring, next_fire_time, NeverReason, NextFire};
