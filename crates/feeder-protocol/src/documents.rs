use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

pub const STREAMING_STATUS_PATH: &str = "status/streaming_enabled";
pub const APP_OPEN_STATUS_PATH: &str = "status/app_is_open";
pub const CONFIG_SETTINGS_PATH: &str = "config/settings";
pub const HEARTBEAT_STATUS_PATH: &str = "status/heartbeat";
pub const BATCH_UPLOAD_REQUEST_PATH: &str = "status/batch_upload_request";
pub const TEST_CAPTURE_STATUS_PATH: &str = "status/test_capture";

pub const MOTION_CAPTURES_COLLECTION: &str = "logs/motion_captures/data";
pub const SNAPSHOTS_COLLECTION: &str = "logs/snapshots/data";
pub const TEST_CAPTURES_COLLECTION: &str = "logs/test_captures/history";

pub const SIGHTINGS_STORAGE_PATH: &str = "media/sightings";
pub const SNAPSHOTS_STORAGE_PATH: &str = "media/snapshots";
pub const TEST_CAPTURES_STORAGE_PATH: &str = "media/test_captures";

pub const STREAMING_ENABLED_FIELD: &str = "enabled";
pub const APP_OPEN_FIELD: &str = "open";
pub const MOTION_CAPTURE_ENABLED_FIELD: &str = "motion_capture_enabled";
pub const REQUESTED_FIELD: &str = "requested";

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    pub path: String,
    pub document: Option<Document>,
}

/// Reads a boolean field; missing, null or non-boolean values count as false.
pub fn flag(document: Option<&Document>, field: &str) -> bool {
    document
        .and_then(|doc| doc.get(field))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn child_path(collection: &str, id: &str) -> String {
    format!("{}/{}", collection.trim_end_matches('/'), id)
}

pub fn document<I, K>(fields: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}
