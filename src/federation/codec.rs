//! Peer-link codec — frames a TCP byte stream into federation [`Frame`]s.
//!
//! One JSON object per `\n`-terminated line, UTF-8. Blank lines are
//! skipped so a peer may keep the connection warm with bare newlines.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::wire::Frame;

/// Maximum frame length in bytes. A nick sync of a very full server fits
/// comfortably; anything beyond this is a broken or hostile peer.
const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Codec error: oversized line, malformed JSON, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame exceeds maximum length ({MAX_FRAME_LENGTH} bytes)")]
    FrameTooLong,
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec framing federation messages on `\n` boundaries.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > MAX_FRAME_LENGTH {
                    return Err(CodecError::FrameTooLong);
                }
                return Ok(None);
            };

            let line_bytes = src.split_to(pos);
            src.advance(1); // skip \n

            let line = std::str::from_utf8(&line_bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            return Ok(Some(Frame::from_json(line)?));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = item.to_json()?;
        dst.reserve(json.len() + 1);
        dst.put_slice(json.as_bytes());
        dst.put_slice(b"\n");
        Ok(())
    }
}
