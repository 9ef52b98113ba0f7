pub mod command;
pub mod documents;
pub mod framing;
pub mod settings;

pub use command::{ClientCommand, CommandBuffer, SnapshotStatus, COMMAND_LEN, SNAPSHOT_COMMAND};
pub use documents::{Document, DocumentChange};
pub use framing::{frame_codec, MAX_FRAME_LENGTH};
pub use settings::{CaptureMode, LocalSettings, Resolution};

pub const DEFAULT_CAMERA_SERVER_ADDR: &str = "0.0.0.0:8000";
