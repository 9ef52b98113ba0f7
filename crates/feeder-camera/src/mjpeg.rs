use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::warn;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub const DEFAULT_MAX_JPEG_LEN: usize = 8 * 1024 * 1024;

/// Yields each `SOI .. EOI` span as one frame. Bytes before an SOI marker are
/// skipped, and scanning resumes where the previous call stopped.
#[derive(Debug)]
pub struct MjpegDecoder {
    max_len: usize,
    in_frame: bool,
    scanned: usize,
}

impl MjpegDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            in_frame: false,
            scanned: 0,
        }
    }

    fn reset(&mut self) {
        self.in_frame = false;
        self.scanned = 0;
    }
}

impl Default for MjpegDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JPEG_LEN)
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|window| window == marker)
}

impl Decoder for MjpegDecoder {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if !self.in_frame {
            match find_marker(src, SOI) {
                Some(start) => {
                    src.advance(start);
                    self.in_frame = true;
                    self.scanned = SOI.len();
                }
                None => {
                    // A lone trailing 0xFF may be the first half of the next SOI.
                    let keep = usize::from(src.last() == Some(&0xFF));
                    let skip = src.len() - keep;
                    src.advance(skip);
                    return Ok(None);
                }
            }
        }

        let from = self.scanned.saturating_sub(1).max(SOI.len());
        if from < src.len() {
            if let Some(offset) = find_marker(&src[from..], EOI) {
                let end = from + offset + EOI.len();
                self.reset();
                return Ok(Some(src.split_to(end).freeze()));
            }
        }
        self.scanned = src.len();

        if src.len() > self.max_len {
            warn!(buffered = src.len(), max = self.max_len, "dropping oversized jpeg");
            src.clear();
            self.reset();
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                src.clear();
                self.reset();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&EOI);
        out
    }

    fn drain(decoder: &mut MjpegDecoder, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(buf).expect("decode") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn splits_back_to_back_images_and_skips_garbage() {
        let mut decoder = MjpegDecoder::default();
        let mut wire = BytesMut::from(&b"noise"[..]);
        wire.extend_from_slice(&jpeg(b"first"));
        wire.extend_from_slice(&jpeg(b"second"));
        let frames = drain(&mut decoder, &mut wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &jpeg(b"first")[..]);
        assert_eq!(&frames[1][..], &jpeg(b"second")[..]);
        assert!(wire.is_empty());
    }

    #[test]
    fn resumes_across_single_byte_reads() {
        let mut decoder = MjpegDecoder::default();
        let image = jpeg(b"split\xffacross reads");
        let mut wire = BytesMut::new();
        let mut frames = Vec::new();
        for byte in &image {
            wire.extend_from_slice(&[*byte]);
            frames.extend(drain(&mut decoder, &mut wire));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &image[..]);
    }

    #[test]
    fn oversized_image_is_dropped_and_stream_recovers() {
        let mut decoder = MjpegDecoder::new(16);
        let mut wire = BytesMut::from(&jpeg(&[0x11; 64])[..64]);
        assert!(drain(&mut decoder, &mut wire).is_empty());
        assert!(wire.is_empty());

        wire.extend_from_slice(&jpeg(b"ok"));
        let frames = drain(&mut decoder, &mut wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &jpeg(b"ok")[..]);
    }

    #[test]
    fn truncated_tail_is_discarded_at_eof() {
        let mut decoder = MjpegDecoder::default();
        let mut wire = BytesMut::from(&jpeg(b"cut")[..4]);
        assert!(decoder.decode_eof(&mut wire).expect("eof").is_none());
        assert!(wire.is_empty());
    }
}
