//! Offline conversion of a recorded session into a fixed-grid dataset
//!
//! A session directory holds `<epoch>.jpg` screenshots and an `events.txt`
//! log. Screenshots are snapped to a `base_interval` grid and their times
//! become interval boundaries; every other event is bucketed onto those
//! intervals. The output is one `{idx}.jpeg` per interval (with the cursor
//! drawn in) and a `meta.json` array describing each interval.

pub mod cursor;

pub use cursor::{CursorError, CursorImage};

use crate::config::SerializerConfig;
use crate::event::{parse_log, ButtonAction, CursorShape, Event, EventError, EventKind, EventPayload};
use crate::timeline::{Assign, ClickClassifier, IntervalSet, Timed};
use crate::writer::EVENT_LOG_NAME;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const META_FILE_NAME: &str = "meta.json";
const OUTPUT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("base interval must be positive, got {0}")]
    InvalidInterval(f64),

    #[error("no screenshots found in {0}")]
    NoScreenshots(PathBuf),

    #[error("screenshots in {path} span {steps} grid steps, more than {max}")]
    GridTooLarge { path: PathBuf, steps: u64, max: u64 },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Event {
        path: PathBuf,
        #[source]
        source: EventError,
    },

    #[error("image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("bad cursor at t={time:.3}: {source}")]
    Cursor {
        time: f64,
        #[source]
        source: CursorError,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode metadata: {0}")]
    Meta(#[from] serde_json::Error),
}

/// Conversion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerializeOptions {
    pub base_interval: f64,
    pub clicks: ClickClassifier,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            base_interval: 0.1,
            clicks: ClickClassifier::default(),
        }
    }
}

impl SerializeOptions {
    pub fn with_base_interval(base_interval: f64) -> Self {
        Self {
            base_interval,
            ..Self::default()
        }
    }
}

impl From<&SerializerConfig> for SerializeOptions {
    fn from(config: &SerializerConfig) -> Self {
        Self {
            base_interval: config.base_interval,
            clicks: ClickClassifier::new(config.click_threshold, config.unification_interval),
        }
    }
}

/// A loaded session with every event placed on its interval
#[derive(Debug)]
pub struct RecordData {
    pub session_dir: PathBuf,
    pub base_interval: f64,
    pub time_abs_min: f64,
    pub time_abs_max: f64,
    /// Size of the first screenshot
    pub image_size: (u32, u32),
    pub intervals: IntervalSet,
    pub image_events: Vec<Event>,
    pub key_events: Vec<Event>,
    pub pointer_events: Vec<Event>,
    pub button_events: Vec<Event>,
    pub cursor_events: Vec<Event>,
    pub control_events: Vec<Event>,
}

impl RecordData {
    pub fn load(session_dir: &Path, options: &SerializeOptions) -> Result<Self, SerializeError> {
        if !(options.base_interval > 0.0 && options.base_interval.is_finite()) {
            return Err(SerializeError::InvalidInterval(options.base_interval));
        }

        let screenshots = list_screenshots(session_dir)?;
        if let (Some((first, _)), Some((last, _))) = (screenshots.first(), screenshots.last()) {
            let steps = grid_steps(*first, *last, options.base_interval);
            if steps > MAX_GRID_STEPS {
                return Err(SerializeError::GridTooLarge {
                    path: session_dir.to_path_buf(),
                    steps,
                    max: MAX_GRID_STEPS,
                });
            }
        }
        let image_events = snap_to_grid(&screenshots, options.base_interval);
        let (first, last) = match (image_events.first(), image_events.last()) {
            (Some(first), Some(last)) => (first.clone(), last.clone()),
            _ => return Err(SerializeError::NoScreenshots(session_dir.to_path_buf())),
        };
        let time_abs_min = first.time_abs;
        let image_size = match &first.payload {
            EventPayload::Image(path) => image::image_dimensions(path).map_err(|source| SerializeError::Image {
                path: path.clone(),
                source,
            })?,
            _ => (0, 0),
        };

        let log_path = session_dir.join(EVENT_LOG_NAME);
        let text = std::fs::read_to_string(&log_path).map_err(|source| SerializeError::Read {
            path: log_path.clone(),
            source,
        })?;
        let log_error = |source| SerializeError::Event {
            path: log_path.clone(),
            source,
        };
        let records = parse_log(&text).map_err(log_error)?;

        let mut key_events = Vec::new();
        let mut pointer_events = Vec::new();
        let mut cursor_events = Vec::new();
        let mut control_events = Vec::new();
        for record in &records {
            let event = Event::from_record(record, time_abs_min).map_err(log_error)?;
            match event.kind() {
                EventKind::Key => key_events.push(event),
                EventKind::Pointer => pointer_events.push(event),
                EventKind::Cursor => cursor_events.push(event),
                _ => control_events.push(event),
            }
        }
        let by_time = |a: &Event, b: &Event| a.time_abs.total_cmp(&b.time_abs);
        key_events.sort_by(by_time);
        pointer_events.sort_by(by_time);
        cursor_events.sort_by(by_time);
        control_events.sort_by(by_time);

        let button_events = options.clicks.classify(&pointer_events);

        let mut intervals = IntervalSet::new(image_events.iter().map(|ev| ev.time_rel).collect());
        intervals.set_objects(timed(&image_events), Assign::First, |iv, v| iv.image = v.into_iter().next());
        intervals.set_objects(timed(&key_events), Assign::Shift, |iv, v| iv.key_event = v.into_iter().next());
        intervals.set_objects(timed(&button_events), Assign::Shift, |iv, v| {
            iv.button_event = v.into_iter().next()
        });
        intervals.set_objects(positions(&pointer_events), Assign::Last, |iv, v| iv.xy = v.into_iter().next());
        // a button event's position wins over plain pointer motion
        intervals.set_objects(positions(&button_events), Assign::Last, |iv, v| iv.xy = v.into_iter().next());
        intervals.set_defaults_with_neighbors(true, |iv| &mut iv.xy);
        intervals.set_objects(timed(&cursor_events), Assign::Last, |iv, v| {
            iv.cursor_event = v.into_iter().next()
        });
        intervals.set_objects(timed(&control_events), Assign::All, |iv, v| iv.control_events = v);

        debug!(
            "Loaded {:?}: {} screenshots, {} keys, {} pointer samples, {} button events, {} intervals",
            session_dir,
            image_events.len(),
            key_events.len(),
            pointer_events.len(),
            button_events.len(),
            intervals.len()
        );

        Ok(Self {
            session_dir: session_dir.to_path_buf(),
            base_interval: options.base_interval,
            time_abs_min,
            time_abs_max: last.time_abs,
            image_size,
            intervals,
            image_events,
            key_events,
            pointer_events,
            button_events,
            cursor_events,
            control_events,
        })
    }

    pub fn time_elapsed(&self) -> f64 {
        self.time_abs_max - self.time_abs_min
    }

    /// Cursor to use after each interval is emitted, if it changes there.
    /// A `start` carrying a cursor applies first, then the interval's own
    /// cursor event.
    fn cursor_updates(&self) -> Result<Vec<Option<CursorImage>>, SerializeError> {
        let decode = |ev: &Event, shape: &CursorShape| {
            CursorImage::from_shape(shape).map_err(|source| SerializeError::Cursor {
                time: ev.time_rel,
                source,
            })
        };
        let mut updates = Vec::with_capacity(self.intervals.len());
        for interval in &self.intervals {
            let mut update = None;
            for ev in &interval.control_events {
                if let EventPayload::Start(args) = &ev.payload {
                    if let Some(shape) = &args.cursor {
                        update = Some(decode(ev, shape)?);
                    }
                }
            }
            if let Some(ev) = &interval.cursor_event {
                if let EventPayload::Cursor(shape) = &ev.payload {
                    update = Some(decode(ev, shape)?);
                }
            }
            updates.push(update);
        }
        Ok(updates)
    }
}

fn timed(events: &[Event]) -> impl Iterator<Item = Timed<Event>> + '_ {
    events.iter().cloned().map(Timed::from)
}

fn positions(events: &[Event]) -> impl Iterator<Item = Timed<(i32, i32)>> + '_ {
    events.iter().filter_map(|ev| {
        let xy = match &ev.payload {
            EventPayload::Pointer(p) => p.xy(),
            EventPayload::Button(b) => b.xy(),
            _ => return None,
        };
        Some(Timed::new(ev.time_rel, xy))
    })
}

/// The single numeric run in a screenshot file name, e.g. `1663.25.jpg`
fn screenshot_time(name: &str) -> Option<f64> {
    if name.starts_with('.') || !name.ends_with(".jpg") {
        return None;
    }
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in name.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || c == '.' {
            current.push(c);
            continue;
        }
        let run = current.trim_end_matches('.');
        if run.chars().any(|c| c.is_ascii_digit()) {
            runs.push(run.to_string());
        }
        current.clear();
    }
    match runs.as_slice() {
        [only] => only.parse().ok(),
        _ => None,
    }
}

/// Screenshots of a session sorted by capture time
pub fn list_screenshots(session_dir: &Path) -> Result<Vec<(f64, PathBuf)>, SerializeError> {
    let read_error = |source| SerializeError::Read {
        path: session_dir.to_path_buf(),
        source,
    };
    let mut shots = Vec::new();
    for entry in std::fs::read_dir(session_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        match screenshot_time(name) {
            Some(time) => shots.push((time, entry.path())),
            None if name.ends_with(".jpg") => debug!("Ignoring screenshot-like file {:?}", name),
            None => {}
        }
    }
    shots.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(shots)
}

/// `floor(x + 0.5)`, so halves round up
fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Longest grid a session may span (a day at the default 0.1 s step, with room to spare)
pub const MAX_GRID_STEPS: u64 = 1_000_000;

/// Number of grid steps between the first and last screenshot, inclusive
fn grid_steps(first: f64, last: f64, base_interval: f64) -> u64 {
    round_half_up((last - first) / base_interval).max(0) as u64 + 1
}

/// One image per `base_interval` step. A later screenshot replaces an earlier
/// one in the same step; empty steps repeat the previous image at the step time.
pub fn snap_to_grid(shots: &[(f64, PathBuf)], base_interval: f64) -> Vec<Event> {
    let Some(&(origin, _)) = shots.first() else {
        return Vec::new();
    };
    let step_of = |t: f64| round_half_up((t - origin) / base_interval).max(0) as u64;

    let mut slots: BTreeMap<u64, Event> = BTreeMap::new();
    for (time, path) in shots {
        let step = step_of(*time);
        let event = Event::new(*time, origin, EventPayload::Image(path.clone()));
        if let Some(previous) = slots.insert(step, event) {
            debug!("step={}: {} replaced by a later screenshot", step, previous);
        }
    }

    let mut events: Vec<Event> = Vec::with_capacity(slots.len());
    let mut filled = 0;
    let mut next_step = 0u64;
    for (step, event) in slots {
        // step 0 always holds the first screenshot, so `last()` exists for any gap
        while next_step < step {
            if let Some(previous) = events.last() {
                let copy = previous.retimed(origin + next_step as f64 * base_interval);
                events.push(copy);
                filled += 1;
            }
            next_step += 1;
        }
        events.push(event);
        next_step = step + 1;
    }
    if filled > 0 {
        debug!("Filled {} empty grid step(s) with the previous screenshot", filled);
    }
    events
}

/// One `meta.json` entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaRecord {
    pub idx: usize,
    /// `null` for the open start of the first interval
    pub ge: Option<f64>,
    /// `null` for the open end of the last interval
    pub lt: Option<f64>,
    pub xy: Option<(i32, i32)>,
    pub key: Option<KeyMeta>,
    pub button: Option<ButtonMeta>,
    pub control: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMeta {
    pub physical_key: String,
    pub event: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonMeta {
    pub button_id: u8,
    pub event: ButtonAction,
}

fn finite(t: f64) -> Option<f64> {
    t.is_finite().then_some(t)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerializeSummary {
    pub output_dir: PathBuf,
    pub frames: usize,
    pub image_size: (u32, u32),
}

/// Convert `session_dir` into `output_dir`, which is created if missing.
///
/// All inputs are read and checked before anything is written; `meta.json`
/// appears only once every frame has been written.
pub fn serialize(
    session_dir: &Path,
    output_dir: &Path,
    options: &SerializeOptions,
) -> Result<SerializeSummary, SerializeError> {
    let record = RecordData::load(session_dir, options)?;
    let mut cursor_updates = record.cursor_updates()?;

    std::fs::create_dir_all(output_dir).map_err(|source| SerializeError::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let (width, height) = record.image_size;
    let placeholder = RgbImage::new(width, height);
    let mut cursor: Option<CursorImage> = None;
    let mut xy: Option<(i32, i32)> = None;
    let mut metadata = Vec::with_capacity(record.intervals.len());

    for (idx, interval) in record.intervals.iter().enumerate() {
        let mut frame = match interval.image.as_ref().map(|ev| &ev.payload) {
            Some(EventPayload::Image(path)) => open_rgb(path)?,
            _ => placeholder.clone(),
        };
        if let (Some(cursor), Some(position)) = (&cursor, xy) {
            cursor.draw(&mut frame, position);
        }
        write_jpeg(&frame, &output_dir.join(format!("{}.jpeg", idx)))?;

        let key = interval.key_event.as_ref().and_then(|ev| match &ev.payload {
            EventPayload::Key(k) => Some(KeyMeta {
                physical_key: k.physical_key(),
                event: if k.down { "down" } else { "up" },
            }),
            _ => None,
        });
        let button = interval.button_event.as_ref().and_then(|ev| match &ev.payload {
            EventPayload::Button(b) => Some(ButtonMeta {
                button_id: b.button_id,
                event: b.action,
            }),
            _ => None,
        });
        let control = (!interval.control_events.is_empty())
            .then(|| interval.control_events.iter().map(|ev| ev.to_string()).collect());

        metadata.push(MetaRecord {
            idx,
            ge: finite(interval.ge),
            lt: finite(interval.lt),
            xy: interval.xy,
            key,
            button,
            control,
        });

        if let Some(update) = cursor_updates[idx].take() {
            cursor = Some(update);
        }
        xy = interval.xy;
    }

    write_meta(output_dir, &metadata)?;
    info!(
        "Converted {:?} into {:?}: {} frames over {:.1}s",
        session_dir,
        output_dir,
        metadata.len(),
        record.time_elapsed()
    );
    Ok(SerializeSummary {
        output_dir: output_dir.to_path_buf(),
        frames: metadata.len(),
        image_size: record.image_size,
    })
}

fn open_rgb(path: &Path) -> Result<RgbImage, SerializeError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| SerializeError::Image {
            path: path.to_path_buf(),
            source,
        })
}

fn write_jpeg(frame: &RgbImage, path: &Path) -> Result<(), SerializeError> {
    let write_error = |source| SerializeError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(write_error)?;
    let mut out = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut out, OUTPUT_JPEG_QUALITY)
        .encode(frame.as_raw(), frame.width(), frame.height(), image::ColorType::Rgb8)
        .map_err(|source| SerializeError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    out.flush().map_err(write_error)
}

/// Write `meta.json` through a temporary file so readers never see a partial array
fn write_meta(output_dir: &Path, metadata: &[MetaRecord]) -> Result<(), SerializeError> {
    let path = output_dir.join(META_FILE_NAME);
    let tmp = output_dir.join(format!(".{}.tmp", META_FILE_NAME));
    let json = serde_json::to_vec(metadata)?;
    let write_error = |source| SerializeError::Write {
        path: path.clone(),
        source,
    };
    std::fs::write(&tmp, json).map_err(write_error)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        warn!("Cannot move {:?} into place: {}", tmp, e);
        let _ = std::fs::remove_file(&tmp);
        return Err(write_error(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogRecord;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use image::Rgb;
    use serde_json::{json, Value};

    const T0: f64 = 1_663_000_000.0;

    fn write_shot(dir: &Path, t: f64, colour: [u8; 3]) {
        let img = RgbImage::from_pixel(16, 12, Rgb(colour));
        write_jpeg(&img, &dir.join(format!("{:.6}.jpg", t))).unwrap();
    }

    fn write_log(dir: &Path, records: &[LogRecord]) {
        let text: String = records.iter().map(|r| r.to_line() + "\n").collect();
        std::fs::write(dir.join(EVENT_LOG_NAME), text).unwrap();
    }

    fn read_meta(dir: &Path) -> Vec<Value> {
        let text = std::fs::read_to_string(dir.join(META_FILE_NAME)).unwrap();
        serde_json::from_str::<Vec<Value>>(&text).unwrap()
    }

    #[test]
    fn screenshot_names() {
        assert_eq!(screenshot_time("1663000000.123456.jpg"), Some(1663000000.123456));
        assert_eq!(screenshot_time("12.jpg"), Some(12.0));
        assert_eq!(screenshot_time(".1663.jpg"), None);
        assert_eq!(screenshot_time("1663.png"), None);
        assert_eq!(screenshot_time("shot-1-2.jpg"), None);
        assert_eq!(screenshot_time("thumb.jpg"), None);
    }

    #[test]
    fn grid_snapping_rounds_half_up_and_fills_gaps() {
        let shots: Vec<(f64, PathBuf)> = [0.0, 0.04, 0.26, 0.5]
            .iter()
            .map(|dt| (T0 + dt, PathBuf::from(format!("{}.jpg", dt))))
            .collect();
        let events = snap_to_grid(&shots, 0.1);
        let names: Vec<String> = events
            .iter()
            .map(|ev| match &ev.payload {
                EventPayload::Image(p) => p.to_string_lossy().into_owned(),
                _ => unreachable!(),
            })
            .collect();
        // 0.04 replaces 0.0 in step 0; 0.26 is step 3; 0.5 is step 5
        assert_eq!(names, vec!["0.04.jpg", "0.04.jpg", "0.04.jpg", "0.26.jpg", "0.26.jpg", "0.5.jpg"]);
        assert!((events[1].time_rel - 0.1).abs() < 1e-9);
        assert!((events[4].time_rel - 0.4).abs() < 1e-9);
        assert!(events.windows(2).all(|w| w[0].time_rel < w[1].time_rel));
    }

    #[test]
    fn key_pair_in_one_bucket_is_split_by_shift() {
        let session = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for dt in [0.0, 0.1, 0.2] {
            write_shot(session.path(), T0 + dt, [40, 40, 40]);
        }
        write_log(
            session.path(),
            &[
                LogRecord::new(T0 - 0.01, EventKind::Start, vec![json!({})]),
                LogRecord::new(T0 + 0.15, EventKind::Key, vec![json!(97), json!(true)]),
                LogRecord::new(T0 + 0.18, EventKind::Key, vec![json!(97), json!(false)]),
                LogRecord::new(T0 + 0.25, EventKind::Stop, vec![json!({"reason": "manual"})]),
            ],
        );

        let summary = serialize(session.path(), out.path(), &SerializeOptions::default()).unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.image_size, (16, 12));

        let meta = read_meta(out.path());
        assert_eq!(meta.len(), 4);
        for (i, entry) in meta.iter().enumerate() {
            assert_eq!(entry["idx"], json!(i));
            assert!(out.path().join(format!("{}.jpeg", i)).exists());
        }
        assert_eq!(meta[0]["ge"], Value::Null);
        assert_eq!(meta[3]["lt"], Value::Null);
        assert_eq!(meta[2]["ge"].as_f64().unwrap(), meta[1]["lt"].as_f64().unwrap());

        assert_eq!(meta[1]["key"], json!({"physical_key": "a", "event": "down"}));
        assert_eq!(meta[2]["key"], json!({"physical_key": "a", "event": "up"}));
        assert_eq!(meta[0]["control"], json!(["start()"]));
        assert_eq!(meta[3]["control"], json!(["stop(reason=manual)"]));
        assert_eq!(meta[1]["control"], Value::Null);
        assert_eq!(meta[1]["button"], Value::Null);
    }

    #[test]
    fn click_position_and_cursor_follow_intervals() {
        let session = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for dt in [0.0, 0.1, 0.2, 0.3] {
            write_shot(session.path(), T0 + dt, [0, 0, 0]);
        }
        let white = STANDARD.encode([255u8, 255, 255, 255].repeat(16));
        let mask = STANDARD.encode([0xF0u8; 4]);
        write_log(
            session.path(),
            &[
                LogRecord::new(T0, EventKind::Start, vec![json!({})]),
                LogRecord::new(T0 + 0.01, EventKind::Pointer, vec![json!(2), json!(2), json!(0)]),
                LogRecord::new(T0 + 0.05, EventKind::Cursor, vec![json!(0), json!(0), json!(4), json!(4), json!(white), json!(mask)]),
                LogRecord::new(T0 + 0.12, EventKind::Pointer, vec![json!(8), json!(6), json!(1)]),
                LogRecord::new(T0 + 0.14, EventKind::Pointer, vec![json!(9), json!(6), json!(0)]),
            ],
        );

        serialize(session.path(), out.path(), &SerializeOptions::default()).unwrap();
        let meta = read_meta(out.path());
        assert_eq!(meta.len(), 5);
        // first interval takes the next observed position
        assert_eq!(meta[0]["xy"], json!([2, 2]));
        assert_eq!(meta[1]["xy"], json!([2, 2]));
        // the click interval reports the click position, not the release
        assert_eq!(meta[2]["xy"], json!([8, 6]));
        assert_eq!(meta[2]["button"], json!({"button_id": 0, "event": "click"}));
        assert_eq!(meta[4]["xy"], json!([8, 6]));

        // cursor from interval 1 is drawn from frame 2 on, at the previous xy
        let frame1 = image::open(out.path().join("1.jpeg")).unwrap().to_rgb8();
        let frame2 = image::open(out.path().join("2.jpeg")).unwrap().to_rgb8();
        assert!(frame1.get_pixel(3, 3)[0] < 64);
        assert!(frame2.get_pixel(3, 3)[0] > 192);
        assert!(frame2.get_pixel(12, 10)[0] < 64);
    }

    #[test]
    fn bad_inputs_fail_before_output_exists() {
        let session = tempfile::tempdir().unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out = out_root.path().join("converted");

        assert!(matches!(
            serialize(session.path(), &out, &SerializeOptions::default()),
            Err(SerializeError::NoScreenshots(_))
        ));

        write_shot(session.path(), T0, [0, 0, 0]);
        assert!(matches!(
            serialize(session.path(), &out, &SerializeOptions::default()),
            Err(SerializeError::Read { .. })
        ));

        std::fs::write(
            session.path().join(EVENT_LOG_NAME),
            "{\"time\": 1.0, \"event\": \"wheel\", \"args\": []}\n",
        )
        .unwrap();
        assert!(matches!(
            serialize(session.path(), &out, &SerializeOptions::default()),
            Err(SerializeError::Event { .. })
        ));

        write_log(
            session.path(),
            &[LogRecord::new(T0, EventKind::Cursor, vec![json!(0), json!(0), json!(2), json!(2), json!("AAAA"), json!("")])],
        );
        assert!(matches!(
            serialize(session.path(), &out, &SerializeOptions::default()),
            Err(SerializeError::Cursor { .. })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn outlier_screenshot_is_rejected_before_allocation() {
        let session = tempfile::tempdir().unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out = out_root.path().join("converted");
        write_shot(session.path(), T0, [0, 0, 0]);
        write_shot(session.path(), T0 + 0.1, [0, 0, 0]);
        // a stray file name far in the future would need ten million grid steps
        write_shot(session.path(), T0 + 1_000_000.0, [0, 0, 0]);
        write_log(session.path(), &[LogRecord::new(T0, EventKind::Start, vec![json!({})])]);

        assert!(matches!(
            serialize(session.path(), &out, &SerializeOptions::default()),
            Err(SerializeError::GridTooLarge { max: MAX_GRID_STEPS, .. })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn sparse_grid_fills_each_gap() {
        let shots = vec![
            (T0, PathBuf::from("a.jpg")),
            (T0 + 0.5, PathBuf::from("b.jpg")),
            (T0 + 0.52, PathBuf::from("c.jpg")),
        ];
        let events = snap_to_grid(&shots, 0.1);
        assert_eq!(events.len(), 6);
        assert!((events[3].time_rel - 0.3).abs() < 1e-6);
        assert_eq!(events[4].payload, EventPayload::Image(PathBuf::from("a.jpg")));
        assert_eq!(events[5].payload, EventPayload::Image(PathBuf::from("c.jpg")));
    }
}
