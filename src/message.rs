//! Wire format for coordinator/slave protocol messages.
//!
//! ## Wire Format
//!
//! All multi-byte integers are little-endian. Every message shares an
//! 8-byte header followed by `len` payload bytes:
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬─────────┐
//! │ Type(1) │ Flags(1)│ Tag(4)       │ Len(2)  │  + payload
//! └─────────┴─────────┴──────────────┴─────────┘
//! ```
//!
//! | Message | Type | Tag        | Payload                    |
//! |---------|------|------------|----------------------------|
//! | RUN     | 0x01 | 0          | empty                      |
//! | RENDER  | 0x02 | 0          | `[frame:4]`                |
//! | SWAP    | 0x03 | 0          | `[frame:4]`                |
//! | WINDOW  | 0x04 | 0          | UTF-8 surface name         |
//! | EXIT    | 0x05 | 0          | empty                      |
//! | STATE   | 0x06 | state tag  | raw state bytes            |
//!
//! The Flags byte is reserved and must be 0. Whether a message is an ack
//! or a request is determined by direction, not by a flag: the same RUN,
//! RENDER, SWAP, and EXIT shapes are echoed back by slaves.

use thiserror::Error;

use crate::frame::FrameId;
use crate::state::StateTag;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum payload length a single message can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const TYPE_RUN: u8 = 0x01;
const TYPE_RENDER: u8 = 0x02;
const TYPE_SWAP: u8 = 0x03;
const TYPE_WINDOW: u8 = 0x04;
const TYPE_EXIT: u8 = 0x05;
const TYPE_STATE: u8 = 0x06;

/// A protocol message, either coordinator → slave or the slave's echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Start the cluster (reliable). Echoed by the slave once its render
    /// thread group is up.
    Run,
    /// Draw the given frame (fast). Echoed as the render acknowledgment.
    Render(FrameId),
    /// Present the given frame (fast). Echoed as the swap acknowledgment.
    Swap(FrameId),
    /// Assign a display surface to the receiving slave (reliable).
    Window(String),
    /// Shut the slave down (reliable). Echoed as the final message.
    Exit,
    /// Replicated application state (fast).
    State {
        /// Registered tag identifying the state variable.
        tag: StateTag,
        /// Raw state bytes; the receiver truncates to its local length.
        bytes: Vec<u8>,
    },
}

/// Error encoding a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The payload does not fit the 16-bit length field.
    #[error("payload of {len} bytes exceeds the {max}-byte message limit")]
    PayloadTooLarge {
        /// Actual payload length.
        len: usize,
        /// Maximum representable length.
        max: usize,
    },
}

/// Error decoding a message from raw bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer shorter than the data it claims to hold.
    #[error("message truncated: needed {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required by the header or declared payload.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },
    /// Unrecognized type byte.
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    /// Payload length does not match the message shape.
    #[error("bad payload length {len} for message type 0x{ty:02x}")]
    BadPayloadLength {
        /// The offending message type byte.
        ty: u8,
        /// Declared payload length.
        len: usize,
    },
    /// WINDOW payload is not valid UTF-8.
    #[error("window payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Writer for encoding messages into a byte buffer.
struct MessageWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> MessageWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Reader for decoding messages from a byte buffer.
struct MessageReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> MessageReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take_bytes(2)?;
        let mut arr = [0u8; 2];
        arr.copy_from_slice(bytes);
        Ok(u16::from_le_bytes(arr))
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take_bytes(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.cursor + n > self.buf.len() {
            return Err(DecodeError::Truncated {
                needed: self.cursor + n,
                have: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(bytes)
    }
}

impl Message {
    /// The wire type byte for this message.
    #[must_use]
    pub const fn type_byte(&self) -> u8 {
        match self {
            Self::Run => TYPE_RUN,
            Self::Render(_) => TYPE_RENDER,
            Self::Swap(_) => TYPE_SWAP,
            Self::Window(_) => TYPE_WINDOW,
            Self::Exit => TYPE_EXIT,
            Self::State { .. } => TYPE_STATE,
        }
    }

    /// Short human-readable name for diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Render(_) => "RENDER",
            Self::Swap(_) => "SWAP",
            Self::Window(_) => "WINDOW",
            Self::Exit => "EXIT",
            Self::State { .. } => "STATE",
        }
    }

    /// Encodes this message into `buf`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::PayloadTooLarge`] if a WINDOW name or STATE
    /// blob exceeds [`MAX_PAYLOAD`].
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        let frame_bytes;
        let (tag, payload): (u32, &[u8]) = match self {
            Self::Run | Self::Exit => (0, &[]),
            Self::Render(f) | Self::Swap(f) => {
                frame_bytes = u32::from(*f).to_le_bytes();
                (0, &frame_bytes)
            }
            Self::Window(name) => (0, name.as_bytes()),
            Self::State { tag, bytes } => (u32::from(*tag), bytes.as_slice()),
        };

        if payload.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut w = MessageWriter::new(buf);
        w.put_u8(self.type_byte());
        w.put_u8(0); // flags, reserved
        w.put_u32(tag);
        w.put_u16(payload.len() as u16);
        w.put_bytes(payload);
        Ok(())
    }

    /// Decodes a message from `buf`.
    ///
    /// `buf` must contain exactly one encoded message.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] on truncation, an unknown type byte, a
    /// payload length that does not match the message shape, or a WINDOW
    /// name that is not UTF-8.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = MessageReader::new(buf);
        let ty = r.take_u8()?;
        let _flags = r.take_u8()?;
        let tag = r.take_u32()?;
        let len = usize::from(r.take_u16()?);
        let payload = r.take_bytes(len)?;

        match ty {
            TYPE_RUN | TYPE_EXIT => {
                if len != 0 {
                    return Err(DecodeError::BadPayloadLength { ty, len });
                }
                Ok(if ty == TYPE_RUN {
                    Self::Run
                } else {
                    Self::Exit
                })
            }
            TYPE_RENDER | TYPE_SWAP => {
                if len != 4 {
                    return Err(DecodeError::BadPayloadLength { ty, len });
                }
                let mut arr = [0u8; 4];
                arr.copy_from_slice(payload);
                let frame = FrameId::from(u32::from_le_bytes(arr));
                Ok(if ty == TYPE_RENDER {
                    Self::Render(frame)
                } else {
                    Self::Swap(frame)
                })
            }
            TYPE_WINDOW => Ok(Self::Window(String::from_utf8(payload.to_vec())?)),
            TYPE_STATE => Ok(Self::State {
                tag: StateTag::from(tag),
                bytes: payload.to_vec(),
            }),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Message) -> Message {
        let mut buf = Vec::new();
        msg.encode(&mut buf).expect("encode");
        Message::decode(&buf).expect("decode")
    }

    #[test]
    fn header_layout() {
        let mut buf = Vec::new();
        Message::Render(FrameId(0x0102_0304)).encode(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4);
        assert_eq!(buf[0], 0x02); // type
        assert_eq!(buf[1], 0x00); // flags
        assert_eq!(&buf[2..6], &[0, 0, 0, 0]); // tag
        assert_eq!(&buf[6..8], &4u16.to_le_bytes()); // len
        assert_eq!(&buf[8..], &0x0102_0304u32.to_le_bytes());
    }

    #[test]
    fn control_messages_roundtrip() {
        assert_eq!(roundtrip(&Message::Run), Message::Run);
        assert_eq!(roundtrip(&Message::Exit), Message::Exit);
        assert_eq!(
            roundtrip(&Message::Window("pipe-0".into())),
            Message::Window("pipe-0".into())
        );
    }

    #[test]
    fn frame_messages_roundtrip() {
        assert_eq!(
            roundtrip(&Message::Swap(FrameId(u32::MAX))),
            Message::Swap(FrameId(u32::MAX))
        );
        assert_eq!(
            roundtrip(&Message::Render(FrameId(0))),
            Message::Render(FrameId(0))
        );
    }

    #[test]
    fn state_carries_tag_in_header() {
        let msg = Message::State {
            tag: StateTag::from(42),
            bytes: vec![1, 2, 3],
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        assert_eq!(&buf[2..6], &42u32.to_le_bytes());
        assert_eq!(Message::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn truncated_header_rejected() {
        let err = Message::decode(&[0x02, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut buf = Vec::new();
        Message::Render(FrameId(9)).encode(&mut buf).unwrap();
        let err = Message::decode(&buf[..buf.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn unknown_type_rejected() {
        let buf = [0x7f, 0, 0, 0, 0, 0, 0, 0];
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(0x7f)));
    }

    #[test]
    fn run_with_payload_rejected() {
        let buf = [0x01, 0, 0, 0, 0, 0, 2, 0, 0xaa, 0xbb];
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::BadPayloadLength { ty: 0x01, len: 2 }));
    }

    #[test]
    fn bad_utf8_window_rejected() {
        let buf = [0x04, 0, 0, 0, 0, 0, 2, 0, 0xff, 0xfe];
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }
}
