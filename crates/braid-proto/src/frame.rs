//! Length-prefixed frame codec.
//!
//! A frame is a little-endian `u32` length followed by that many bytes of
//! JSON. Works over any `Read`/`Write`, so the same helpers serve the
//! server, the client, and in-memory tests.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Upper bound on a single frame; anything larger is a protocol error, not a
/// payload.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Errors at the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(u32),

    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// Returns `true` if the peer closed the connection cleanly between
    /// frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Writes one frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), FrameError> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).map_err(|_| FrameError::Oversized(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len));
    }
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u64,
        message: String,
    }

    #[test]
    fn roundtrip() {
        let mut buf = Vec::new();
        let ping = Ping {
            n: 7,
            message: "hello".into(),
        };
        write_frame(&mut buf, &ping).unwrap();

        let mut reader = buf.as_slice();
        let back: Ping = read_frame(&mut reader).unwrap();
        assert_eq!(back, ping);
    }

    #[test]
    fn length_prefix_is_little_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &serde_json::json!({})).unwrap();
        // "{}" is two bytes.
        assert_eq!(&buf[..4], &2u32.to_le_bytes());
        assert_eq!(&buf[4..], b"{}");
    }

    #[test]
    fn oversized_length_rejected_without_allocation() {
        let mut data = Vec::new();
        data.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut reader = data.as_slice();
        let err = read_frame::<_, Ping>(&mut reader).unwrap_err();
        assert!(matches!(err, FrameError::Oversized(_)));
    }

    #[test]
    fn truncated_frame_is_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Ping { n: 1, message: "x".into() }).unwrap();
        buf.truncate(buf.len() - 3);
        let mut reader = buf.as_slice();
        let err = read_frame::<_, Ping>(&mut reader).unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let mut buf = Vec::new();
        for n in 0..3 {
            write_frame(&mut buf, &Ping { n, message: format!("m{n}") }).unwrap();
        }
        let mut reader = buf.as_slice();
        for n in 0..3 {
            let frame: Ping = read_frame(&mut reader).unwrap();
            assert_eq!(frame.n, n);
        }
    }
}
