//! Button edges to click/down/up events
//!
//! Pointer samples carry a button bitmask. Each of the eight buttons is
//! tracked on its own: a press released within the click threshold becomes a
//! `click` at the press position, a longer press becomes `down` then `up`.
//! Optionally, clicks in quick succession merge into double and triple clicks.

use crate::event::{ButtonAction, ButtonEvent, Event, EventPayload, PointerState};
use log::debug;

pub const NUM_BUTTONS: u8 = 8;

#[derive(Debug, Clone)]
enum ButtonState {
    Idle,
    /// Pressed, not yet known whether this is a click
    DownPending(Event),
    /// Pressed and already reported as `down` (or pressed before capture began)
    DownConfirmed,
}

/// Derives button events from a pointer stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickClassifier {
    /// Longest press (seconds) still reported as a click; `None` means any
    pub click_threshold: Option<f64>,
    /// Window (seconds from the first click) for merging repeated clicks
    pub unification_interval: Option<f64>,
}

impl Default for ClickClassifier {
    fn default() -> Self {
        Self {
            click_threshold: Some(1.0 / 3.0),
            unification_interval: Some(1.0 / 3.0),
        }
    }
}

impl ClickClassifier {
    pub fn new(click_threshold: Option<f64>, unification_interval: Option<f64>) -> Self {
        Self {
            click_threshold,
            unification_interval,
        }
    }

    /// Button events for `pointer_events` (chronological), sorted by time.
    /// Non-pointer events in the input are ignored.
    pub fn classify(&self, pointer_events: &[Event]) -> Vec<Event> {
        let samples: Vec<(&Event, PointerState)> = pointer_events
            .iter()
            .filter_map(|ev| match &ev.payload {
                EventPayload::Pointer(p) => Some((ev, *p)),
                _ => None,
            })
            .collect();

        let mut per_button: Vec<Vec<Event>> = Vec::with_capacity(NUM_BUTTONS as usize);
        for button in 0..NUM_BUTTONS {
            let events = self.track_button(button, &samples);
            per_button.push(match self.unification_interval {
                Some(window) => unify_clicks(events, window),
                None => events,
            });
        }

        let mut all: Vec<Event> = per_button.into_iter().flatten().collect();
        all.sort_by(|a, b| a.time_abs.total_cmp(&b.time_abs));
        all
    }

    fn track_button(&self, button: u8, samples: &[(&Event, PointerState)]) -> Vec<Event> {
        let mut out = Vec::new();
        let Some((_, first)) = samples.first() else {
            return out;
        };
        let mut state = if first.is_pressed(button) {
            ButtonState::DownConfirmed
        } else {
            ButtonState::Idle
        };
        let mut was_pressed = first.is_pressed(button);

        for &(ev, sample) in &samples[1..] {
            let pressed = sample.is_pressed(button);
            state = match (was_pressed, pressed, state) {
                (false, true, _) => ButtonState::DownPending(ev.clone()),
                (true, false, ButtonState::DownPending(down)) => {
                    let held = ev.time_rel - down.time_rel;
                    if self.click_threshold.map_or(true, |limit| held <= limit) {
                        out.push(button_event(&down, button, ButtonAction::Click));
                    } else {
                        out.push(button_event(&down, button, ButtonAction::Down));
                        out.push(button_event(ev, button, ButtonAction::Up));
                    }
                    ButtonState::Idle
                }
                (true, false, _) => {
                    out.push(button_event(ev, button, ButtonAction::Up));
                    ButtonState::Idle
                }
                (true, true, ButtonState::DownPending(down)) => {
                    out.push(button_event(&down, button, ButtonAction::Down));
                    ButtonState::DownConfirmed
                }
                (_, _, unchanged) => unchanged,
            };
            was_pressed = pressed;
        }

        if let ButtonState::DownPending(down) = state {
            debug!("Button {} still pressed at end of capture", button);
            out.push(button_event(&down, button, ButtonAction::Down));
        }
        out
    }
}

fn button_event(at: &Event, button_id: u8, action: ButtonAction) -> Event {
    let (x, y) = match &at.payload {
        EventPayload::Pointer(p) => p.xy(),
        EventPayload::Button(b) => b.xy(),
        _ => (0, 0),
    };
    Event::new(
        at.time_abs,
        at.time_origin_abs,
        EventPayload::Button(ButtonEvent {
            x,
            y,
            button_id,
            action,
        }),
    )
}

fn action_of(ev: &Event) -> Option<ButtonAction> {
    match &ev.payload {
        EventPayload::Button(b) => Some(b.action),
        _ => None,
    }
}

/// Merge runs of clicks on one button. A run is at most three clicks, each
/// within `window` seconds of the run's first click.
pub fn unify_clicks(events: Vec<Event>, window: f64) -> Vec<Event> {
    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter().peekable();

    while let Some(ev) = iter.next() {
        let (button_id, action) = match &ev.payload {
            EventPayload::Button(b) => (b.button_id, b.action),
            _ => {
                out.push(ev);
                continue;
            }
        };
        if action != ButtonAction::Click {
            out.push(ev);
            continue;
        }

        let mut level = 1;
        while level < 3 {
            let continues = iter.peek().map_or(false, |next| {
                action_of(next) == Some(ButtonAction::Click) && (next.time_rel - ev.time_rel).abs() <= window
            });
            if !continues {
                break;
            }
            iter.next();
            level += 1;
        }
        let action = match level {
            1 => ButtonAction::Click,
            2 => ButtonAction::DoubleClick,
            _ => ButtonAction::TripleClick,
        };
        out.push(button_event(&ev, button_id, action));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(t: f64, x: i32, y: i32, mask: u8) -> Event {
        Event::new(
            100.0 + t,
            100.0,
            EventPayload::Pointer(PointerState {
                x,
                y,
                button_mask: mask,
            }),
        )
    }

    fn summary(events: &[Event]) -> Vec<(f64, u8, ButtonAction, (i32, i32))> {
        events
            .iter()
            .map(|ev| match &ev.payload {
                EventPayload::Button(b) => ((ev.time_rel * 1000.0).round() / 1000.0, b.button_id, b.action, b.xy()),
                other => panic!("not a button event: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn quick_press_is_one_click_at_down_position() {
        let events = [pointer(0.0, 1, 1, 0), pointer(0.1, 5, 6, 1), pointer(0.15, 9, 9, 0)];
        let out = ClickClassifier::new(Some(0.33), None).classify(&events);
        assert_eq!(summary(&out), vec![(0.1, 0, ButtonAction::Click, (5, 6))]);
    }

    #[test]
    fn slow_release_is_down_then_up() {
        let events = [pointer(0.0, 0, 0, 0), pointer(0.1, 5, 5, 4), pointer(1.0, 8, 8, 0)];
        let out = ClickClassifier::new(Some(0.33), None).classify(&events);
        assert_eq!(
            summary(&out),
            vec![
                (0.1, 2, ButtonAction::Down, (5, 5)),
                (1.0, 2, ButtonAction::Up, (8, 8)),
            ]
        );
    }

    #[test]
    fn held_press_reports_down_once() {
        let events = [
            pointer(0.0, 0, 0, 0),
            pointer(0.1, 1, 1, 1),
            pointer(0.2, 2, 2, 1),
            pointer(0.3, 3, 3, 1),
            pointer(0.4, 4, 4, 1),
            pointer(0.5, 5, 5, 0),
        ];
        let out = ClickClassifier::new(Some(0.33), None).classify(&events);
        assert_eq!(
            summary(&out),
            vec![
                (0.1, 0, ButtonAction::Down, (1, 1)),
                (0.5, 0, ButtonAction::Up, (5, 5)),
            ]
        );
    }

    #[test]
    fn unreleased_press_yields_only_down() {
        let events = [pointer(0.0, 0, 0, 0), pointer(0.1, 3, 3, 1)];
        let out = ClickClassifier::default().classify(&events);
        assert_eq!(summary(&out), vec![(0.1, 0, ButtonAction::Down, (3, 3))]);
    }

    #[test]
    fn pressed_before_capture_releases_as_bare_up() {
        let events = [pointer(0.0, 0, 0, 1), pointer(0.2, 2, 2, 0)];
        let out = ClickClassifier::default().classify(&events);
        assert_eq!(summary(&out), vec![(0.2, 0, ButtonAction::Up, (2, 2))]);
    }

    #[test]
    fn three_quick_clicks_make_a_triple_click() {
        let mut events = vec![pointer(0.0, 0, 0, 0)];
        for k in 0..3 {
            let t = 0.1 * k as f64 + 0.01;
            events.push(pointer(t, 10, 10, 1));
            events.push(pointer(t + 0.05, 10, 10, 0));
        }
        let out = ClickClassifier::new(Some(0.33), Some(0.33)).classify(&events);
        assert_eq!(summary(&out), vec![(0.01, 0, ButtonAction::TripleClick, (10, 10))]);
    }

    #[test]
    fn gap_breaks_click_chain() {
        let events = [
            pointer(0.0, 0, 0, 0),
            pointer(0.1, 1, 1, 1),
            pointer(0.15, 1, 1, 0),
            pointer(0.2, 1, 1, 1),
            pointer(0.25, 1, 1, 0),
            pointer(2.0, 2, 2, 1),
            pointer(2.05, 2, 2, 0),
        ];
        let out = ClickClassifier::new(Some(0.33), Some(0.33)).classify(&events);
        assert_eq!(
            summary(&out),
            vec![
                (0.1, 0, ButtonAction::DoubleClick, (1, 1)),
                (2.0, 0, ButtonAction::Click, (2, 2)),
            ]
        );
    }

    #[test]
    fn buttons_are_tracked_independently_and_sorted() {
        let events = [
            pointer(0.0, 0, 0, 0),
            pointer(0.1, 1, 1, 0b100),
            pointer(0.2, 2, 2, 0b101),
            pointer(0.25, 3, 3, 0b100),
            pointer(0.9, 4, 4, 0),
        ];
        let out = ClickClassifier::new(Some(0.33), None).classify(&events);
        assert_eq!(
            summary(&out),
            vec![
                (0.1, 2, ButtonAction::Down, (1, 1)),
                (0.2, 0, ButtonAction::Click, (2, 2)),
                (0.9, 2, ButtonAction::Up, (4, 4)),
            ]
        );
    }
}
