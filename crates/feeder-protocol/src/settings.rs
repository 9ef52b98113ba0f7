use crate::documents::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) if items.len() >= 2 => {
                let width = as_integer(&items[0])?;
                let height = as_integer(&items[1])?;
                Some(Self::new(u32::try_from(width).ok()?, u32::try_from(height).ok()?))
            }
            Value::String(raw) => {
                let lowered = raw.trim().to_ascii_lowercase();
                let (width, height) = lowered.split_once('x')?;
                Some(Self::new(
                    width.trim().parse().ok()?,
                    height.trim().parse().ok()?,
                ))
            }
            _ => None,
        }
    }

    fn to_value(self) -> Value {
        Value::from(vec![self.width, self.height])
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[u32; 2]> for Resolution {
    fn from(value: [u32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Resolution> for [u32; 2] {
    fn from(value: Resolution) -> Self {
        [value.width, value.height]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Single,
    Burst,
}

impl CaptureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Burst => "burst",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" | "photo" => Some(Self::Single),
            "burst" => Some(Self::Burst),
            _ => None,
        }
    }
}

pub const DEFAULT_STREAM_RESOLUTION: Resolution = Resolution::new(640, 360);
pub const DEFAULT_SNAPSHOT_RESOLUTION: Resolution = Resolution::new(2560, 1440);
pub const DEFAULT_CAPTURE_RESOLUTION: Resolution = Resolution::new(4608, 2592);
pub const DEFAULT_FRAMERATE: u32 = 10;
pub const DEFAULT_MIN_ACTIVE_DURATION_SECS: f64 = 6.5;
pub const DEFAULT_BURST_INTERVAL_SECS: f64 = 2.0;
pub const DEFAULT_MAX_FILES_PER_INSTANCE: u32 = 10;
pub const MAX_DURATION_SECS: f64 = 86_400.0;

pub fn default_camera_controls() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("AfMode".to_string(), Value::from(2)),
        ("AeEnable".to_string(), Value::from(true)),
        ("AwbEnable".to_string(), Value::from(true)),
        ("AwbMode".to_string(), Value::from(0)),
        ("Sharpness".to_string(), Value::from(1.0)),
        ("Contrast".to_string(), Value::from(1.0)),
        ("Saturation".to_string(), Value::from(1.0)),
        ("Brightness".to_string(), Value::from(0.0)),
        ("NoiseReductionMode".to_string(), Value::from(2)),
    ])
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub stream_resolution: Resolution,
    pub snapshot_resolution: Resolution,
    pub capture_resolution: Resolution,
    pub stream_framerate: u32,
    /// Exposure time in microseconds; `None` or 0 leaves auto exposure on.
    pub exposure_time: Option<u64>,
    pub camera_controls: BTreeMap<String, Value>,
    pub capture_mode: CaptureMode,
    pub min_active_duration_secs: f64,
    pub burst_interval_secs: f64,
    pub max_files_per_instance: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            stream_resolution: DEFAULT_STREAM_RESOLUTION,
            snapshot_resolution: DEFAULT_SNAPSHOT_RESOLUTION,
            capture_resolution: DEFAULT_CAPTURE_RESOLUTION,
            stream_framerate: DEFAULT_FRAMERATE,
            exposure_time: None,
            camera_controls: BTreeMap::new(),
            capture_mode: CaptureMode::Single,
            min_active_duration_secs: DEFAULT_MIN_ACTIVE_DURATION_SECS,
            burst_interval_secs: DEFAULT_BURST_INTERVAL_SECS,
            max_files_per_instance: DEFAULT_MAX_FILES_PER_INSTANCE,
        }
    }
}

impl LocalSettings {
    pub fn effective_controls(&self) -> BTreeMap<String, Value> {
        let mut controls = default_camera_controls();
        for (name, value) in &self.camera_controls {
            controls.insert(name.clone(), value.clone());
        }
        if let Some(exposure) = self.exposure_time.filter(|value| *value > 0) {
            controls.insert("ExposureTime".to_string(), Value::from(exposure));
            controls.insert("AeEnable".to_string(), Value::from(false));
        }
        controls
    }

    pub fn min_active_duration(&self) -> Duration {
        seconds(self.min_active_duration_secs, DEFAULT_MIN_ACTIVE_DURATION_SECS)
    }

    pub fn burst_interval(&self) -> Duration {
        seconds(self.burst_interval_secs, DEFAULT_BURST_INTERVAL_SECS)
    }

    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Maps a remote settings document onto the local schema, keeping only
/// fields that parse. Empty means nothing usable.
pub fn normalize_settings(doc: &Document) -> Document {
    let mut out = Map::new();

    let stream = doc
        .get("resolution")
        .or_else(|| doc.get("stream_resolution"))
        .and_then(Resolution::from_value);
    if let Some(stream) = stream {
        out.insert("stream_resolution".to_string(), stream.to_value());
    }

    let snapshot = doc
        .get("snapshot_resolution")
        .and_then(Resolution::from_value)
        .or(stream);
    if let Some(snapshot) = snapshot {
        out.insert("snapshot_resolution".to_string(), snapshot.to_value());
    }

    let capture = doc
        .get("capture_resolution")
        .or_else(|| doc.get("motion_capture_resolution"))
        .and_then(Resolution::from_value);
    if let Some(capture) = capture {
        out.insert("capture_resolution".to_string(), capture.to_value());
    }

    if let Some(fps) = doc.get("stream_framerate").and_then(as_u32) {
        if fps > 0 {
            out.insert("stream_framerate".to_string(), Value::from(fps));
        }
    }

    if let Some(exposure) = doc.get("exposure_time").and_then(as_integer) {
        out.insert("exposure_time".to_string(), Value::from(exposure.max(0)));
    }

    let controls = doc
        .get("camera_controls")
        .or_else(|| doc.get("controls"))
        .and_then(Value::as_object);
    if let Some(controls) = controls {
        out.insert(
            "camera_controls".to_string(),
            Value::Object(controls.clone()),
        );
    }

    if let Some(mode) = doc
        .get("capture_mode")
        .and_then(Value::as_str)
        .and_then(CaptureMode::parse)
    {
        out.insert("capture_mode".to_string(), Value::from(mode.as_str()));
    }

    for key in ["min_active_duration_secs", "burst_interval_secs"] {
        if let Some(value) = doc.get(key).and_then(as_float) {
            if value.is_finite() && (0.0..=MAX_DURATION_SECS).contains(&value) {
                out.insert(key.to_string(), Value::from(value));
            }
        }
    }

    if let Some(max_files) = doc.get("max_files_per_instance").and_then(as_u32) {
        if max_files > 0 {
            out.insert("max_files_per_instance".to_string(), Value::from(max_files));
        }
    }

    out
}

pub fn merge_settings(base: &mut Document, normalized: Document) {
    for (key, value) in normalized {
        base.insert(key, value);
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Clamped to `0..=MAX_DURATION_SECS`; NaN falls back to `default`.
fn seconds(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DURATION_SECS))
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

fn as_u32(value: &Value) -> Option<u32> {
    as_integer(value).and_then(|raw| u32::try_from(raw).ok())
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn resolution_accepts_arrays_and_strings() {
        assert_eq!(
            Resolution::from_value(&json!([1280, 720])),
            Some(Resolution::new(1280, 720))
        );
        assert_eq!(
            Resolution::from_value(&json!("1920X1080")),
            Some(Resolution::new(1920, 1080))
        );
        assert_eq!(Resolution::from_value(&json!("wide")), None);
        assert_eq!(Resolution::from_value(&json!([640])), None);
    }

    #[test]
    fn snapshot_falls_back_to_stream_resolution() {
        let normalized = normalize_settings(&doc(json!({
            "resolution": "800x600",
            "stream_framerate": "15",
        })));
        assert_eq!(normalized["stream_resolution"], json!([800, 600]));
        assert_eq!(normalized["snapshot_resolution"], json!([800, 600]));
        assert_eq!(normalized["stream_framerate"], json!(15));
    }

    #[test]
    fn unusable_fields_are_dropped() {
        let normalized = normalize_settings(&doc(json!({
            "stream_resolution": "huge",
            "stream_framerate": "fast",
            "capture_mode": "timelapse",
            "motion_capture_enabled": true,
        })));
        assert!(normalized.is_empty());
    }

    #[test]
    fn out_of_range_numbers_are_dropped() {
        let normalized = normalize_settings(&doc(json!({
            "min_active_duration_secs": 1e20,
            "burst_interval_secs": "inf",
            "stream_framerate": 5_000_000_000u64,
            "max_files_per_instance": -3,
        })));
        assert!(normalized.is_empty());

        let normalized = normalize_settings(&doc(json!({
            "min_active_duration_secs": "NaN",
            "burst_interval_secs": 86_400,
        })));
        assert!(normalized.get("min_active_duration_secs").is_none());
        assert_eq!(normalized["burst_interval_secs"], json!(86_400.0));
    }

    #[test]
    fn durations_from_a_hand_edited_file_stay_in_range() {
        let settings = LocalSettings {
            min_active_duration_secs: 1e20,
            burst_interval_secs: f64::NAN,
            ..LocalSettings::default()
        };
        assert_eq!(
            settings.min_active_duration(),
            Duration::from_secs_f64(MAX_DURATION_SECS)
        );
        assert_eq!(settings.burst_interval(), Duration::from_secs(2));

        let negative = LocalSettings {
            min_active_duration_secs: -1.0,
            ..LocalSettings::default()
        };
        assert_eq!(negative.min_active_duration(), Duration::ZERO);
    }

    #[test]
    fn controls_alias_and_motion_fields_are_mapped() {
        let normalized = normalize_settings(&doc(json!({
            "controls": {"Sharpness": 2.0},
            "capture_mode": "Burst",
            "min_active_duration_secs": 3,
            "max_files_per_instance": 4,
        })));
        assert_eq!(normalized["camera_controls"], json!({"Sharpness": 2.0}));
        assert_eq!(normalized["capture_mode"], json!("burst"));
        assert_eq!(normalized["min_active_duration_secs"], json!(3.0));
        assert_eq!(normalized["max_files_per_instance"], json!(4));
    }

    #[test]
    fn merged_document_deserializes_with_defaults() {
        let mut base = LocalSettings::default().to_document();
        merge_settings(
            &mut base,
            normalize_settings(&doc(json!({"stream_resolution": [1024, 576]}))),
        );
        let settings: LocalSettings =
            serde_json::from_value(Value::Object(base)).expect("settings");
        assert_eq!(settings.stream_resolution, Resolution::new(1024, 576));
        assert_eq!(settings.snapshot_resolution, Resolution::new(1024, 576));
        assert_eq!(settings.capture_resolution, DEFAULT_CAPTURE_RESOLUTION);
    }

    #[test]
    fn effective_controls_layer_overrides_and_exposure() {
        let settings = LocalSettings {
            camera_controls: BTreeMap::from([("Contrast".to_string(), json!(4.0))]),
            exposure_time: Some(20_000),
            ..LocalSettings::default()
        };
        let controls = settings.effective_controls();
        assert_eq!(controls["Contrast"], json!(4.0));
        assert_eq!(controls["Sharpness"], json!(1.0));
        assert_eq!(controls["ExposureTime"], json!(20_000));
        assert_eq!(controls["AeEnable"], json!(false));
    }
}
