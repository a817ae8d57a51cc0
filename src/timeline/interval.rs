//! Half-open time buckets anchored at screenshot timestamps

use crate::event::Event;
use log::warn;
use std::fmt;

/// One `[ge, lt)` slot and everything assigned to it
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub ge: f64,
    pub lt: f64,
    pub image: Option<Event>,
    pub xy: Option<(i32, i32)>,
    pub key_event: Option<Event>,
    pub button_event: Option<Event>,
    pub cursor_event: Option<Event>,
    pub control_events: Vec<Event>,
}

impl Interval {
    fn new(ge: f64, lt: f64) -> Self {
        Self {
            ge,
            lt,
            image: None,
            xy: None,
            key_event: None,
            button_event: None,
            cursor_event: None,
            control_events: Vec::new(),
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        self.ge <= t && t < self.lt
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3})", self.ge, self.lt)?;
        if let Some(image) = &self.image {
            write!(f, " {}", image)?;
        }
        if let Some((x, y)) = self.xy {
            write!(f, " xy=({}, {})", x, y)?;
        }
        for ev in [&self.key_event, &self.button_event, &self.cursor_event].into_iter().flatten() {
            write!(f, " {}", ev)?;
        }
        for ev in &self.control_events {
            write!(f, " {}", ev)?;
        }
        Ok(())
    }
}

/// A value placed on the timeline at `time_rel`
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub time_rel: f64,
    pub value: T,
}

impl<T> Timed<T> {
    pub fn new(time_rel: f64, value: T) -> Self {
        Self { time_rel, value }
    }
}

impl From<Event> for Timed<Event> {
    fn from(event: Event) -> Self {
        Self::new(event.time_rel, event)
    }
}

/// How bucketed items end up on an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    /// Keep the last item of each bucket and push the rest into earlier
    /// intervals, so no interval holds more than one
    Shift,
    First,
    Last,
    All,
}

/// Contiguous intervals covering the whole real line
#[derive(Debug, Clone)]
pub struct IntervalSet {
    boundaries: Vec<f64>,
    intervals: Vec<Interval>,
    average_length: f64,
}

impl IntervalSet {
    /// `n` boundaries make `n + 1` intervals; the first and last are open ended
    pub fn new(mut boundaries: Vec<f64>) -> Self {
        boundaries.sort_by(f64::total_cmp);

        let mut intervals = Vec::with_capacity(boundaries.len() + 1);
        let mut ge = f64::NEG_INFINITY;
        for &lt in boundaries.iter().chain(std::iter::once(&f64::INFINITY)) {
            intervals.push(Interval::new(ge, lt));
            ge = lt;
        }

        let average_length = if intervals.len() >= 3 {
            let span = boundaries[boundaries.len() - 1] - boundaries[0];
            span / (intervals.len() - 2) as f64
        } else {
            1.0
        };

        Self {
            boundaries,
            intervals,
            average_length,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    pub fn average_length(&self) -> f64 {
        self.average_length
    }

    pub fn get(&self, id: usize) -> Option<&Interval> {
        self.intervals.get(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    pub fn into_intervals(self) -> Vec<Interval> {
        self.intervals
    }

    /// Index of the interval with `B[i-1] <= t < B[i]`
    ///
    /// The search starts from `t / average_length` and walks to the true
    /// interval, so uneven boundaries only cost extra steps.
    pub fn get_id(&self, t: f64) -> usize {
        let n = self.intervals.len();
        let b = &self.boundaries;
        match n {
            1 => return 0,
            2 => return if t < b[0] { 0 } else { 1 },
            _ => {}
        }
        if t >= b[b.len() - 1] {
            return n - 1;
        }
        // also catches NaN
        if !(t >= b[0]) {
            return 0;
        }

        let seed = (t / self.average_length).round() as i64;
        let mut i = seed.clamp(1, n as i64 - 2) as usize;
        loop {
            if t < b[i - 1] {
                i -= 1;
            } else if t >= b[i] {
                i += 1;
            } else {
                return i;
            }
        }
    }

    /// Group items by the interval their time falls in, keeping input order
    pub fn bucket<T>(&self, objects: impl IntoIterator<Item = Timed<T>>) -> Vec<Vec<Timed<T>>> {
        let mut buckets: Vec<Vec<Timed<T>>> = (0..self.len()).map(|_| Vec::new()).collect();
        for obj in objects {
            let id = self.get_id(obj.time_rel);
            buckets[id].push(obj);
        }
        buckets
    }

    /// Assign items to intervals through `set`, which receives the selected
    /// values of one interval (a single value unless `Assign::All`).
    pub fn set_objects<T, F>(&mut self, objects: impl IntoIterator<Item = Timed<T>>, assign: Assign, mut set: F)
    where
        F: FnMut(&mut Interval, Vec<T>),
    {
        let mut buckets = self.bucket(objects);
        if assign == Assign::Shift {
            let dropped = shift_backward(&mut buckets);
            if !dropped.is_empty() {
                warn!(
                    "{} item(s) before the first screenshot did not fit and were dropped (first at t={:.3})",
                    dropped.len(),
                    dropped[0].time_rel
                );
            }
        }

        for (interval, bucket) in self.intervals.iter_mut().zip(buckets) {
            if bucket.is_empty() {
                continue;
            }
            let mut values: Vec<T> = bucket.into_iter().map(|t| t.value).collect();
            let selected = match assign {
                Assign::First => {
                    values.truncate(1);
                    values
                }
                Assign::Shift | Assign::Last => values.split_off(values.len() - 1),
                Assign::All => values,
            };
            set(interval, selected);
        }
    }

    /// Fill unset values of a field from the nearest observation, scanning in
    /// one direction and then the other. With `backward_first` an empty
    /// interval takes the next observation when there is one.
    pub fn set_defaults_with_neighbors<T, F>(&mut self, backward_first: bool, field: F)
    where
        T: Clone,
        F: Fn(&mut Interval) -> &mut Option<T>,
    {
        let passes = if backward_first { [true, false] } else { [false, true] };
        for reverse in passes {
            let mut last: Option<T> = None;
            let mut fill = |interval: &mut Interval| {
                let slot = field(interval);
                if slot.is_some() {
                    last = slot.clone();
                } else {
                    *slot = last.clone();
                }
            };
            if reverse {
                self.intervals.iter_mut().rev().for_each(&mut fill);
            } else {
                self.intervals.iter_mut().for_each(&mut fill);
            }
        }
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

/// Walk buckets from last to first, keeping only the last item of each and
/// prepending the rest to the previous bucket. Overflow of the first bucket
/// has nowhere to go and is returned.
pub fn shift_backward<T>(buckets: &mut [Vec<T>]) -> Vec<T> {
    for i in (1..buckets.len()).rev() {
        if buckets[i].len() > 1 {
            let keep = buckets[i].len() - 1;
            let moved: Vec<T> = buckets[i].drain(..keep).collect();
            buckets[i - 1].extend(moved);
        }
    }
    match buckets.first_mut() {
        Some(first) if first.len() > 1 => {
            let keep = first.len() - 1;
            first.drain(..keep).collect()
        }
        _ => Vec::new(),
    }
}
