//! Session events and their JSON-lines encoding
//!
//! The on-disk log is one JSON object per line:
//! `{"time": <unix seconds>, "event": <kind>, "args": [...]}`.
//! [`LogRecord`] is that wire form; [`Event`] is the typed, immutable view the
//! serializer works with, anchored to a session time origin.

pub mod keys;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Stop,
    Task,
    Cursor,
    Image,
    Pointer,
    Key,
    /// Derived by the click classifier, never written to a log
    Button,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Task => "task",
            EventKind::Cursor => "cursor",
            EventKind::Image => "image",
            EventKind::Pointer => "pointer",
            EventKind::Key => "key",
            EventKind::Button => "button",
        }
    }

    /// Control kinds are never deduplicated per interval
    pub fn is_control(&self) -> bool {
        matches!(self, EventKind::Start | EventKind::Stop | EventKind::Task)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed log line {line}: {source}")]
    MalformedLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("event kind '{0}' cannot appear in a session log")]
    UnexpectedKind(EventKind),

    #[error("bad arguments for {kind} event at t={time}: {reason}")]
    BadArgs {
        kind: EventKind,
        time: f64,
        reason: String,
    },
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: f64,
    pub event: EventKind,
    pub args: Vec<Value>,
}

impl LogRecord {
    pub fn new(time: f64, event: EventKind, args: Vec<Value>) -> Self {
        Self { time, event, args }
    }

    /// Encode as a single log line (no trailing newline)
    pub fn to_line(&self) -> String {
        // A record is built from finite numbers and JSON values, which always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse a JSON-lines log. Blank lines are skipped; any malformed line or unknown
/// kind fails the whole log.
pub fn parse_log(text: &str) -> Result<Vec<LogRecord>, EventError> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<LogRecord>(line).map_err(|source| {
            EventError::MalformedLine {
                line: idx + 1,
                source,
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Cursor shape as reported by the server: hotspot, size, and base64 bitmaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub rgba_base64: String,
    pub mask_base64: String,
}

impl CursorShape {
    pub fn to_args(&self) -> Vec<Value> {
        vec![
            Value::from(self.x),
            Value::from(self.y),
            Value::from(self.width),
            Value::from(self.height),
            Value::from(self.rgba_base64.clone()),
            Value::from(self.mask_base64.clone()),
        ]
    }

    pub fn from_args(args: &[Value]) -> Result<Self, String> {
        if args.len() != 6 {
            return Err(format!("expected 6 cursor arguments, got {}", args.len()));
        }
        Ok(Self {
            x: ranged_arg::<i32>(&args[0], "x")?,
            y: ranged_arg::<i32>(&args[1], "y")?,
            width: ranged_arg::<u32>(&args[2], "width")?,
            height: ranged_arg::<u32>(&args[3], "height")?,
            rgba_base64: str_arg(&args[4], "image")?.to_string(),
            mask_base64: str_arg(&args[5], "mask")?.to_string(),
        })
    }
}

/// Named sub-arguments carried by start/stop/task events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlArgs {
    /// Initial cursor (start events only)
    pub cursor: Option<CursorShape>,
    /// `[message, sub_args...]` (task events)
    pub task_args: Option<Vec<Value>>,
    /// Why a session stopped
    pub reason: Option<String>,
    pub detail: Option<Value>,
}

impl ControlArgs {
    pub fn from_args(args: &[Value]) -> Result<Self, String> {
        let map = match args.first() {
            Some(Value::Object(map)) => map,
            Some(other) => return Err(format!("expected an object, got {}", other)),
            None => return Ok(Self::default()),
        };

        let mut parsed = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "cursor" => {
                    let list = value.as_array().ok_or("cursor must be an array")?;
                    parsed.cursor = Some(CursorShape::from_args(list)?);
                }
                "task_args" => {
                    let list = value.as_array().ok_or("task_args must be an array")?;
                    parsed.task_args = Some(list.clone());
                }
                "reason" => {
                    parsed.reason = Some(value.as_str().ok_or("reason must be a string")?.to_string());
                }
                "detail" => parsed.detail = Some(value.clone()),
                other => return Err(format!("unknown sub argument: {}", other)),
            }
        }
        Ok(parsed)
    }

    pub fn to_object(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(cursor) = &self.cursor {
            map.insert("cursor".into(), Value::Array(cursor.to_args()));
        }
        if let Some(task_args) = &self.task_args {
            map.insert("task_args".into(), Value::Array(task_args.clone()));
        }
        if let Some(reason) = &self.reason {
            map.insert("reason".into(), Value::from(reason.clone()));
        }
        if let Some(detail) = &self.detail {
            map.insert("detail".into(), detail.clone());
        }
        map
    }
}

/// Pointer sample as sent by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerState {
    pub x: i32,
    pub y: i32,
    pub button_mask: u8,
}

impl PointerState {
    pub fn xy(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn is_pressed(&self, button: u8) -> bool {
        self.button_mask & (1 << button) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub keysym: u32,
    pub down: bool,
}

impl KeyStroke {
    pub fn physical_key(&self) -> String {
        keys::physical_key(self.keysym)
    }

    pub fn logical_key(&self) -> String {
        keys::logical_key(self.keysym)
    }
}

/// Button actions produced by the click classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    Down,
    Up,
    Click,
    DoubleClick,
    TripleClick,
}

impl ButtonAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonAction::Down => "down",
            ButtonAction::Up => "up",
            ButtonAction::Click => "click",
            ButtonAction::DoubleClick => "double_click",
            ButtonAction::TripleClick => "triple_click",
        }
    }

    pub fn is_click(&self) -> bool {
        matches!(
            self,
            ButtonAction::Click | ButtonAction::DoubleClick | ButtonAction::TripleClick
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub x: i32,
    pub y: i32,
    pub button_id: u8,
    pub action: ButtonAction,
}

impl ButtonEvent {
    pub fn xy(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Start(ControlArgs),
    Stop(ControlArgs),
    Task(ControlArgs),
    Cursor(CursorShape),
    Image(PathBuf),
    Pointer(PointerState),
    Key(KeyStroke),
    Button(ButtonEvent),
}

/// A timed event, anchored to the session origin
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time_abs: f64,
    pub time_origin_abs: f64,
    pub time_rel: f64,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(time_abs: f64, time_origin_abs: f64, payload: EventPayload) -> Self {
        Self {
            time_abs,
            time_origin_abs,
            time_rel: time_abs - time_origin_abs,
            payload,
        }
    }

    /// Build a typed event from a log record
    pub fn from_record(record: &LogRecord, time_origin_abs: f64) -> Result<Self, EventError> {
        let bad = |reason: String| EventError::BadArgs {
            kind: record.event,
            time: record.time,
            reason,
        };
        let args = &record.args;
        let payload = match record.event {
            EventKind::Start => EventPayload::Start(ControlArgs::from_args(args).map_err(bad)?),
            EventKind::Stop => EventPayload::Stop(ControlArgs::from_args(args).map_err(bad)?),
            EventKind::Task => EventPayload::Task(ControlArgs::from_args(args).map_err(bad)?),
            EventKind::Cursor => EventPayload::Cursor(CursorShape::from_args(args).map_err(bad)?),
            EventKind::Pointer => {
                if args.len() != 3 {
                    return Err(bad(format!("expected 3 pointer arguments, got {}", args.len())));
                }
                EventPayload::Pointer(PointerState {
                    x: ranged_arg::<i32>(&args[0], "x").map_err(bad)?,
                    y: ranged_arg::<i32>(&args[1], "y").map_err(bad)?,
                    button_mask: ranged_arg::<u8>(&args[2], "button_mask").map_err(bad)?,
                })
            }
            EventKind::Key => {
                if args.len() != 2 {
                    return Err(bad(format!("expected 2 key arguments, got {}", args.len())));
                }
                let down = match &args[1] {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
                    other => return Err(bad(format!("key state must be a bool, got {}", other))),
                };
                EventPayload::Key(KeyStroke {
                    keysym: ranged_arg::<u32>(&args[0], "keysym").map_err(bad)?,
                    down,
                })
            }
            kind @ (EventKind::Image | EventKind::Button) => {
                return Err(EventError::UnexpectedKind(kind));
            }
        };
        Ok(Self::new(record.time, time_origin_abs, payload))
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Start(_) => EventKind::Start,
            EventPayload::Stop(_) => EventKind::Stop,
            EventPayload::Task(_) => EventKind::Task,
            EventPayload::Cursor(_) => EventKind::Cursor,
            EventPayload::Image(_) => EventKind::Image,
            EventPayload::Pointer(_) => EventKind::Pointer,
            EventPayload::Key(_) => EventKind::Key,
            EventPayload::Button(_) => EventKind::Button,
        }
    }

    /// Same payload, re-anchored at another absolute time
    pub fn retimed(&self, time_abs: f64) -> Self {
        Self::new(time_abs, self.time_origin_abs, self.payload.clone())
    }

    /// Timestamp label relative to the origin, millisecond precision
    pub fn timestamp(&self) -> String {
        format!("{:.3}", self.time_rel)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::Start(args) | EventPayload::Stop(args) | EventPayload::Task(args) => {
                write!(f, "{}(", self.kind())?;
                let mut parts = Vec::new();
                if let Some(task_args) = &args.task_args {
                    parts.extend(task_args.iter().map(display_value));
                }
                if let Some(reason) = &args.reason {
                    parts.push(format!("reason={}", reason));
                }
                if let Some(detail) = &args.detail {
                    parts.push(format!("detail={}", detail));
                }
                if args.cursor.is_some() {
                    parts.push("cursor".to_string());
                }
                write!(f, "{})", parts.join(", "))
            }
            EventPayload::Cursor(c) => write!(f, "cursor({}x{} @ {},{})", c.width, c.height, c.x, c.y),
            EventPayload::Image(path) => write!(
                f,
                "image({})",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            ),
            EventPayload::Pointer(p) => write!(f, "pointer(({}, {}), {})", p.x, p.y, p.button_mask),
            EventPayload::Key(k) => write!(
                f,
                "key({}, {}, {}, {})",
                k.keysym,
                k.physical_key(),
                k.logical_key(),
                k.down
            ),
            EventPayload::Button(b) => write!(f, "button({}, {})", b.button_id, b.action.as_str()),
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn int_arg(value: &Value, name: &str) -> Result<i64, String> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| format!("{} must be a number, got {}", name, value))
}

/// Integer argument that must fit `T` exactly
fn ranged_arg<T: TryFrom<i64>>(value: &Value, name: &str) -> Result<T, String> {
    let v = int_arg(value, name)?;
    T::try_from(v).map_err(|_| format!("{} out of range: {}", name, v))
}

fn str_arg<'a>(value: &'a Value, name: &str) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{} must be a string, got {}", name, value))
}
