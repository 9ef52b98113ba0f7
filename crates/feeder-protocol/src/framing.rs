use tokio_util::codec::LengthDelimitedCodec;

pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Codec for the camera stream envelope: 4-byte little-endian length, then
/// exactly that many payload bytes.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_LEN)
        .little_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}
