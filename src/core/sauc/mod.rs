//! SAUC binary frame codec.
//!
//! Both relay sockets carry SAUC frames: an 8-byte header followed by a
//! payload. The gateway never rewrites frames on the live path; it only
//! inspects them to detect control signals (FINAL_PACKET, client-ack) and to
//! pull PCM out of audio-only client requests for recording.
//!
//! ```text
//! byte 0   version (hi nibble) | header size in 4-byte words (lo nibble)
//! byte 1   message type (hi)   | flags (lo)
//! byte 2   serialization (hi)  | compression (lo)
//! byte 3   reserved
//! 4..8     payload length, big-endian u32
//! 8..      payload
//! ```

mod frame;

pub use frame::{
    AudioExtraction, Compression, FLAG_FINAL_PACKET, Frame, FrameError, HEADER_LEN, MessageType,
    PROTOCOL_VERSION, Serialization, build_frame, extract_audio,
};
