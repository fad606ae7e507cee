use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use thiserror::Error;

/// Length of the fixed SAUC header in bytes.
pub const HEADER_LEN: usize = 8;

/// Protocol version written into frames built by the gateway.
pub const PROTOCOL_VERSION: u8 = 0x1;

/// Header size nibble written into built frames (one 4-byte word).
const HEADER_SIZE_WORDS: u8 = 0x1;

/// "Last frame of this phase" bit, used by both clients and the upstream.
pub const FLAG_FINAL_PACKET: u8 = 0x2;

/// Errors raised while decoding a SAUC frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("frame payload truncated: want {expected} bytes, have {available}")]
    Truncated { expected: usize, available: usize },

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u8),

    #[error("unsupported audio serialization: {0}")]
    UnsupportedSerialization(u8),

    #[error("gzip decompress failed: {0}")]
    Decompress(#[from] std::io::Error),
}

/// SAUC message type (high nibble of byte 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullClientRequest,
    AudioOnlyClientRequest,
    FullServerResponse,
    /// Synthesized by the gateway; never sent by real clients or upstreams.
    TaskComplete,
    ClientAck,
    Other(u8),
}

impl MessageType {
    pub fn from_nibble(value: u8) -> Self {
        match value {
            0x1 => Self::FullClientRequest,
            0x2 => Self::AudioOnlyClientRequest,
            0x9 => Self::FullServerResponse,
            0xa => Self::TaskComplete,
            0xb => Self::ClientAck,
            other => Self::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::FullClientRequest => 0x1,
            Self::AudioOnlyClientRequest => 0x2,
            Self::FullServerResponse => 0x9,
            Self::TaskComplete => 0xa,
            Self::ClientAck => 0xb,
            Self::Other(value) => value & 0x0f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    None,
    Json,
    Other(u8),
}

impl Serialization {
    pub fn from_nibble(value: u8) -> Self {
        match value {
            0x0 => Self::None,
            0x1 => Self::Json,
            other => Self::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::None => 0x0,
            Self::Json => 0x1,
            Self::Other(value) => value & 0x0f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Other(u8),
}

impl Compression {
    pub fn from_nibble(value: u8) -> Self {
        match value {
            0x0 => Self::None,
            0x1 => Self::Gzip,
            other => Self::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::None => 0x0,
            Self::Gzip => 0x1,
            Self::Other(value) => value & 0x0f,
        }
    }
}

/// A decoded SAUC frame.
///
/// The payload is a zero-copy slice of the received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub header_size: u8,
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: Serialization,
    pub compression: Compression,
    pub reserved: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Parse a frame from a received binary message.
    ///
    /// Trailing bytes beyond the declared payload length are ignored.
    pub fn parse(data: &Bytes) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }

        let mut header = &data[..HEADER_LEN];
        let b0 = header.get_u8();
        let b1 = header.get_u8();
        let b2 = header.get_u8();
        let reserved = header.get_u8();
        let payload_len = header.get_u32() as usize;

        let available = data.len() - HEADER_LEN;
        if payload_len > available {
            return Err(FrameError::Truncated {
                expected: payload_len,
                available,
            });
        }

        Ok(Self {
            version: b0 >> 4,
            header_size: b0 & 0x0f,
            message_type: MessageType::from_nibble(b1 >> 4),
            flags: b1 & 0x0f,
            serialization: Serialization::from_nibble(b2 >> 4),
            compression: Compression::from_nibble(b2 & 0x0f),
            reserved,
            payload: data.slice(HEADER_LEN..HEADER_LEN + payload_len),
        })
    }

    /// Payload with compression removed.
    pub fn payload_bytes(&self) -> Result<Bytes, FrameError> {
        match self.compression {
            Compression::None => Ok(self.payload.clone()),
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(self.payload.as_ref());
                let mut out = Vec::with_capacity(self.payload.len() * 2);
                decoder.read_to_end(&mut out)?;
                Ok(Bytes::from(out))
            }
            Compression::Other(code) => Err(FrameError::UnsupportedCompression(code)),
        }
    }

    #[inline]
    pub fn is_final_packet(&self) -> bool {
        self.flags & FLAG_FINAL_PACKET == FLAG_FINAL_PACKET
    }

    #[inline]
    pub fn is_client_ack(&self) -> bool {
        self.message_type == MessageType::ClientAck
    }

    /// Last recognition result from the upstream service.
    #[inline]
    pub fn is_server_final(&self) -> bool {
        self.message_type == MessageType::FullServerResponse && self.is_final_packet()
    }

    /// Re-encode this frame (payload is written as stored, not decompressed).
    pub fn encode(&self) -> Bytes {
        build_frame(
            self.message_type,
            self.serialization,
            self.compression,
            self.flags,
            &self.payload,
        )
    }
}

/// What a client frame means for the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioExtraction {
    /// Audio-only request; decoded PCM bytes.
    Audio(Bytes),
    /// Full client request carrying session metadata; nothing to record.
    Metadata,
    /// Any other message type.
    Unhandled,
}

/// Pull recordable PCM out of a client frame.
pub fn extract_audio(frame: &Frame) -> Result<AudioExtraction, FrameError> {
    match frame.message_type {
        MessageType::AudioOnlyClientRequest => {
            if frame.serialization != Serialization::None {
                return Err(FrameError::UnsupportedSerialization(
                    frame.serialization.as_nibble(),
                ));
            }
            Ok(AudioExtraction::Audio(frame.payload_bytes()?))
        }
        MessageType::FullClientRequest => Ok(AudioExtraction::Metadata),
        _ => Ok(AudioExtraction::Unhandled),
    }
}

/// Build a complete frame with the gateway's protocol version and a
/// one-word header.
pub fn build_frame(
    message_type: MessageType,
    serialization: Serialization,
    compression: Compression,
    flags: u8,
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8((PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS);
    buf.put_u8((message_type.as_nibble() << 4) | (flags & 0x0f));
    buf.put_u8((serialization.as_nibble() << 4) | compression.as_nibble());
    buf.put_u8(0x00);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}
