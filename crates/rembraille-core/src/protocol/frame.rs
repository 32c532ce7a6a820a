//! Frame codec: the fixed-width header that wraps every RemBraille message.
//!
//! Wire format:
//! ```text
//! [version:1][type:1][length:4][payload:length]
//! ```
//! The length is a big-endian `u32` and never exceeds [`MAX_PAYLOAD_LEN`].
//!
//! # Streaming (for beginners)
//!
//! TCP delivers a byte *stream*, not messages.  One `read()` may return half a
//! header, or three frames glued together.  [`decode_frame`] is therefore
//! safe to call on any prefix of the stream: it either returns a complete
//! frame plus the number of bytes it consumed, or tells the caller how many
//! more bytes it needs.  [`FrameAssembler`] wraps that loop around an
//! accumulating buffer.

use thiserror::Error;
use tracing::trace;

use crate::protocol::messages::{MessageType, FRAME_VERSION, HEADER_SIZE, MAX_PAYLOAD_LEN};

/// Reasons a byte sequence can never become a valid frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The header carries a version byte this codec does not speak.
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// The declared payload length is larger than [`MAX_PAYLOAD_LEN`].
    #[error("declared payload length {declared} exceeds maximum {max}")]
    PayloadTooLarge { declared: usize, max: usize },
}

/// One complete header + payload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header version byte.
    pub version: u8,
    /// Raw type code; may be a code this version does not know.
    pub type_code: u8,
    /// Payload bytes; the header length field always equals `payload.len()`.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame of a known type with the current header version.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if `payload` does not fit.
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Result<Self, FrameError> {
        check_payload_len(payload.len())?;
        Ok(Self {
            version: FRAME_VERSION,
            type_code: message_type.code(),
            payload,
        })
    }

    /// Returns the typed message kind, or `None` for codes from a newer peer.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.type_code).ok()
    }

    /// Value of the header length field.
    pub fn length(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serializes the frame into its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.push(self.version);
        buf.push(self.type_code);
        buf.extend_from_slice(&self.length().to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Result of a [`decode_frame`] call that did not hit a malformed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame sits at the front of the buffer.
    Frame { frame: Frame, consumed: usize },
    /// The buffer is a valid prefix; at least `additional` more bytes are needed.
    NeedMoreData { additional: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `payload` as a frame of `message_type`.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] when the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```rust
/// use rembraille_core::protocol::frame::{decode_frame, encode_frame, Decoded};
/// use rembraille_core::protocol::messages::MessageType;
///
/// let bytes = encode_frame(MessageType::Cells, &[0x01, 0x03]).unwrap();
/// assert_eq!(bytes, [0x01, 0x10, 0, 0, 0, 2, 0x01, 0x03]);
/// match decode_frame(&bytes).unwrap() {
///     Decoded::Frame { frame, consumed } => {
///         assert_eq!(frame.payload, [0x01, 0x03]);
///         assert_eq!(consumed, bytes.len());
///     }
///     Decoded::NeedMoreData { .. } => unreachable!(),
/// }
/// ```
pub fn encode_frame(message_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    check_payload_len(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(FRAME_VERSION);
    buf.push(message_type.code());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Never panics on short input: a buffer that is a valid prefix of a frame
/// yields [`Decoded::NeedMoreData`] with the exact number of missing bytes
/// (for a partial header, the bytes missing from the header alone).
///
/// # Errors
///
/// Returns [`FrameError`] once the header shows the frame can never be valid.
pub fn decode_frame(bytes: &[u8]) -> Result<Decoded, FrameError> {
    if bytes.is_empty() {
        return Ok(Decoded::NeedMoreData {
            additional: HEADER_SIZE,
        });
    }

    // Check the version as soon as the first byte arrives so an incompatible
    // peer is reported before we wait on a header that may never complete.
    let version = bytes[0];
    if version != FRAME_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    if bytes.len() < HEADER_SIZE {
        return Ok(Decoded::NeedMoreData {
            additional: HEADER_SIZE - bytes.len(),
        });
    }

    let type_code = bytes[1];
    let declared = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    check_payload_len(declared)?;

    let total = HEADER_SIZE + declared;
    if bytes.len() < total {
        return Ok(Decoded::NeedMoreData {
            additional: total - bytes.len(),
        });
    }

    Ok(Decoded::Frame {
        frame: Frame {
            version,
            type_code,
            payload: bytes[HEADER_SIZE..total].to_vec(),
        },
        consumed: total,
    })
}

fn check_payload_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            declared: len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

// ── Streaming reassembly ──────────────────────────────────────────────────────

/// Accumulates stream bytes and yields complete frames in arrival order.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(HEADER_SIZE + MAX_PAYLOAD_LEN),
        }
    }

    /// Appends freshly read bytes to the reassembly buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, or `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the buffered bytes can never form a frame.
    /// The assembler is unusable afterwards; the stream must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match decode_frame(&self.buf)? {
            Decoded::Frame { frame, consumed } => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            Decoded::NeedMoreData { additional } => {
                trace!(buffered = self.buf.len(), additional, "waiting for more frame bytes");
                Ok(None)
            }
        }
    }

    /// Number of bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> (Frame, usize) {
        match decode_frame(bytes).expect("valid frame") {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_frame_writes_big_endian_length() {
        let payload = vec![0xAA; 0x0102];
        let bytes = encode_frame(MessageType::Cells, &payload).unwrap();
        assert_eq!(&bytes[..6], &[FRAME_VERSION, 0x10, 0x00, 0x00, 0x01, 0x02]);
        assert_eq!(bytes.len(), HEADER_SIZE + 0x0102);
    }

    #[test]
    fn test_decode_frame_round_trips_empty_payload() {
        let bytes = encode_frame(MessageType::Ping, &[]).unwrap();
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.message_type(), Some(MessageType::Ping));
        assert!(frame.payload.is_empty());
        assert_eq!(frame.length(), 0);
        assert_eq!(consumed, HEADER_SIZE);
    }

    #[test]
    fn test_decode_frame_round_trips_maximum_payload() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD_LEN).map(|i| i as u8).collect();
        let bytes = encode_frame(MessageType::Cells, &payload).unwrap();
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.payload, payload);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_frame(MessageType::Cells, &payload),
            Err(FrameError::PayloadTooLarge {
                declared: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_decode_frame_empty_buffer_needs_full_header() {
        assert_eq!(
            decode_frame(&[]),
            Ok(Decoded::NeedMoreData {
                additional: HEADER_SIZE
            })
        );
    }

    #[test]
    fn test_decode_frame_partial_header_reports_missing_header_bytes() {
        let bytes = encode_frame(MessageType::Cells, &[1, 2, 3]).unwrap();
        assert_eq!(
            decode_frame(&bytes[..4]),
            Ok(Decoded::NeedMoreData { additional: 2 })
        );
    }

    #[test]
    fn test_decode_frame_partial_payload_reports_missing_payload_bytes() {
        let bytes = encode_frame(MessageType::Cells, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(
            decode_frame(&bytes[..HEADER_SIZE + 1]),
            Ok(Decoded::NeedMoreData { additional: 4 })
        );
    }

    #[test]
    fn test_decode_frame_rejects_declared_length_above_maximum() {
        // Arrange: a header that promises 1 MiB of payload
        let mut bytes = vec![FRAME_VERSION, 0x10];
        bytes.extend_from_slice(&(1u32 << 20).to_be_bytes());

        // Act / Assert: malformed, not NeedMoreData and not a panic
        assert_eq!(
            decode_frame(&bytes),
            Err(FrameError::PayloadTooLarge {
                declared: 1 << 20,
                max: MAX_PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_decode_frame_rejects_unknown_version_from_first_byte() {
        assert_eq!(decode_frame(&[0x09]), Err(FrameError::UnsupportedVersion(0x09)));
    }

    #[test]
    fn test_decode_frame_passes_unknown_type_codes_through() {
        let bytes = [FRAME_VERSION, 0x77, 0, 0, 0, 1, 0x42];
        let (frame, _) = decode_one(&bytes);
        assert_eq!(frame.type_code, 0x77);
        assert_eq!(frame.message_type(), None);
        assert_eq!(frame.payload, [0x42]);
    }

    #[test]
    fn test_decode_frame_consumes_only_the_first_of_two_frames() {
        let mut bytes = encode_frame(MessageType::Ping, &[1]).unwrap();
        let first_len = bytes.len();
        bytes.extend(encode_frame(MessageType::Pong, &[2]).unwrap());

        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(frame.message_type(), Some(MessageType::Ping));
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_frame_to_bytes_matches_encode_frame() {
        let frame = Frame::new(MessageType::KeyEvent, vec![0, 5, 1]).unwrap();
        assert_eq!(
            frame.to_bytes(),
            encode_frame(MessageType::KeyEvent, &[0, 5, 1]).unwrap()
        );
    }

    #[test]
    fn test_assembler_single_byte_chunks_yield_exactly_one_frame() {
        // Arrange
        let payload = b"braille".to_vec();
        let bytes = encode_frame(MessageType::Cells, &payload).unwrap();
        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();

        // Act: feed one byte at a time, draining after every push
        for b in &bytes {
            assembler.push(std::slice::from_ref(b));
            while let Some(frame) = assembler.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        // Assert
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_assembler_returns_coalesced_frames_in_order() {
        let mut assembler = FrameAssembler::new();
        let mut bytes = encode_frame(MessageType::Ping, &[]).unwrap();
        bytes.extend(encode_frame(MessageType::Cells, &[9]).unwrap());
        bytes.extend(encode_frame(MessageType::Pong, &[]).unwrap());
        assembler.push(&bytes);

        let kinds: Vec<_> = std::iter::from_fn(|| assembler.next_frame().unwrap())
            .map(|f| f.message_type())
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(MessageType::Ping),
                Some(MessageType::Cells),
                Some(MessageType::Pong)
            ]
        );
    }

    #[test]
    fn test_assembler_surfaces_malformed_header() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x02, 0x10, 0, 0, 0, 0]);
        assert!(matches!(
            assembler.next_frame(),
            Err(FrameError::UnsupportedVersion(0x02))
        ));
    }
}
