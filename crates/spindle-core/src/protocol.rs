//! Wire protocol for parent/worker communication.
//!
//! Each message is one frame: a 4-byte big-endian length, a 1-byte variant
//! tag, then the variant payload (bincode). The length covers the tag and
//! the payload. Tags are a fixed enumeration; the receiver can decode any
//! frame without ambiguity, and framing tolerates partial reads because
//! [`decode_frame`] only consumes complete frames.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::TaskDescriptor;

/// Upper bound on a single frame. Anything larger is treated as a corrupt
/// length prefix rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Number of bytes in the length prefix.
const LEN_PREFIX: usize = 4;

mod tag {
    pub const TASK_PAYLOAD: u8 = 0;
    pub const YIELD_VALUE: u8 = 1;
    pub const STREAM_END: u8 = 2;
    pub const STREAM_ERROR: u8 = 3;
    pub const STATUS_QUERY: u8 = 4;
    pub const STATUS_REPLY: u8 = 5;
}

/// The unit crossing the transport channel.
///
/// `TaskPayload` travels parent to child exactly once. `YieldValue`,
/// `StreamEnd` and `StreamError` travel child to parent; after a terminal
/// message (`StreamEnd` or `StreamError`) no further `YieldValue` is sent
/// or accepted. `StatusQuery`/`StatusReply` may interleave at any time.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The captured task, delivered at spawn time.
    TaskPayload(TaskDescriptor),
    /// One encoded yielded value.
    YieldValue(Vec<u8>),
    /// Terminal success: the generator completed.
    StreamEnd,
    /// Terminal failure: an encoded [`RemoteError`](crate::RemoteError).
    StreamError(Vec<u8>),
    /// Parent asking the worker for a progress snapshot.
    StatusQuery,
    /// Worker's answer to a status query.
    StatusReply(StatusReport),
}

/// Progress snapshot reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Name of the task being driven.
    pub task: String,
    /// How many values the worker has sent so far.
    pub yields_sent: u64,
}

impl Message {
    fn tag(&self) -> u8 {
        match self {
            Message::TaskPayload(_) => tag::TASK_PAYLOAD,
            Message::YieldValue(_) => tag::YIELD_VALUE,
            Message::StreamEnd => tag::STREAM_END,
            Message::StreamError(_) => tag::STREAM_ERROR,
            Message::StatusQuery => tag::STATUS_QUERY,
            Message::StatusReply(_) => tag::STATUS_REPLY,
        }
    }

    /// Encode the tag byte plus variant payload (no length prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.tag()];
        match self {
            Message::TaskPayload(descriptor) => {
                let body = bincode::serialize(descriptor)
                    .map_err(|e| Error::Codec(format!("failed to encode task payload: {e}")))?;
                out.extend_from_slice(&body);
            }
            Message::YieldValue(bytes) | Message::StreamError(bytes) => {
                out.extend_from_slice(bytes);
            }
            Message::StreamEnd | Message::StatusQuery => {}
            Message::StatusReply(report) => {
                let body = bincode::serialize(report)
                    .map_err(|e| Error::Codec(format!("failed to encode status reply: {e}")))?;
                out.extend_from_slice(&body);
            }
        }
        Ok(out)
    }

    /// Decode a message from its tag byte and payload.
    pub fn decode(tag_byte: u8, payload: &[u8]) -> Result<Message> {
        match tag_byte {
            tag::TASK_PAYLOAD => {
                let descriptor: TaskDescriptor = bincode::deserialize(payload)
                    .map_err(|e| Error::Codec(format!("failed to decode task payload: {e}")))?;
                Ok(Message::TaskPayload(descriptor))
            }
            tag::YIELD_VALUE => Ok(Message::YieldValue(payload.to_vec())),
            tag::STREAM_END => Ok(Message::StreamEnd),
            tag::STREAM_ERROR => Ok(Message::StreamError(payload.to_vec())),
            tag::STATUS_QUERY => Ok(Message::StatusQuery),
            tag::STATUS_REPLY => {
                let report: StatusReport = bincode::deserialize(payload)
                    .map_err(|e| Error::Codec(format!("failed to decode status reply: {e}")))?;
                Ok(Message::StatusReply(report))
            }
            other => Err(Error::Codec(format!("unknown message tag {other:#04x}"))),
        }
    }
}

/// Write one complete frame, flushing so it is visible to the peer.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let body = message.encode()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "message of {} bytes exceeds the frame limit",
            body.len()
        )));
    }
    let len = body.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .and_then(|_| writer.write_all(&body))
        .and_then(|_| writer.flush())
        .map_err(|e| Error::Channel(format!("failed to write frame: {e}")))
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns the message and the number of bytes consumed, or `None` if the
/// buffer does not yet hold a complete frame. Never consumes a partial
/// frame.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 {
        return Err(Error::Codec("frame has no tag byte".to_string()));
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "frame length {len} exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let total = LEN_PREFIX + len;
    if buf.len() < total {
        return Ok(None);
    }
    let message = Message::decode(buf[LEN_PREFIX], &buf[LEN_PREFIX + 1..total])?;
    Ok(Some((message, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn roundtrip(message: Message) {
        let mut buf = Vec::new();
        write_message(&mut buf, &message).unwrap();
        let (decoded, consumed) = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, message);
    }

    #[test]
    fn all_variants_roundtrip() {
        roundtrip(Message::TaskPayload(TaskDescriptor::new(
            TaskKind::Generator,
            vec![1, 2, 3],
        )));
        roundtrip(Message::YieldValue(vec![9, 8, 7]));
        roundtrip(Message::StreamEnd);
        roundtrip(Message::StreamError(vec![4, 5]));
        roundtrip(Message::StatusQuery);
        roundtrip(Message::StatusReply(StatusReport {
            task: "count".to_string(),
            yields_sent: 12,
        }));
    }

    #[test]
    fn tags_are_stable() {
        // The tag enumeration is part of the wire format; renumbering it
        // breaks mixed-version parent/worker pairs.
        assert_eq!(Message::StreamEnd.encode().unwrap()[0], 2);
        assert_eq!(Message::StatusQuery.encode().unwrap()[0], 4);
        assert_eq!(Message::YieldValue(vec![]).encode().unwrap()[0], 1);
        assert_eq!(Message::StreamError(vec![]).encode().unwrap()[0], 3);
    }

    #[test]
    fn partial_frames_are_not_consumed() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::YieldValue(vec![1, 2, 3, 4])).unwrap();
        for cut in 0..buf.len() {
            assert!(decode_frame(&buf[..cut]).unwrap().is_none(), "cut at {cut}");
        }
        assert!(decode_frame(&buf).unwrap().is_some());
    }

    #[test]
    fn two_frames_decode_in_order() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::YieldValue(vec![1])).unwrap();
        write_message(&mut buf, &Message::StreamEnd).unwrap();
        let (first, used) = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(first, Message::YieldValue(vec![1]));
        let (second, _) = decode_frame(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, Message::StreamEnd);
    }

    #[test]
    fn unknown_tag_is_a_codec_error() {
        let buf = [0u8, 0, 0, 1, 0x7f];
        assert!(matches!(decode_frame(&buf), Err(Error::Codec(_))));
    }

    #[test]
    fn implausible_length_is_a_codec_error() {
        let buf = [0xffu8, 0xff, 0xff, 0xff, 0];
        assert!(matches!(decode_frame(&buf), Err(Error::Codec(_))));
    }
}
