//! Discretizing an event stream onto screenshot-anchored intervals

mod click;
mod interval;

pub use click::{unify_clicks, ClickClassifier, NUM_BUTTONS};
pub use interval::{shift_backward, Assign, Interval, IntervalSet, Timed};
