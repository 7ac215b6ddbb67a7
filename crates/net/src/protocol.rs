//! Lobby wire protocol
//!
//! Every packet is a fixed 9-byte header followed by a typed body:
//!
//! ```text
//! [magic u32 "LOBB"][version u32][type u8][body...]
//! ```
//!
//! Integers are big-endian. Text is a u32 byte length followed by UTF-8
//! bytes, no terminator. Bytes after a fully decoded body are ignored.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lanlobby_core::{ChatMessage, Privacy, SessionId};

/// ASCII "LOBB"
pub const MAGIC: u32 = 0x4C4F_4242;

/// The only protocol version spoken; peers on any other version are foreign
pub const PROTOCOL_VERSION: u32 = 1;

/// magic + version + type
pub const HEADER_LEN: usize = 9;

/// Why a packet could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Packet truncated")]
    Truncated,

    #[error("Bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("Unknown message type {0}")]
    UnknownType(u8),

    #[error("Invalid privacy mode {0}")]
    InvalidPrivacy(u8),

    #[error("Text is not valid UTF-8")]
    InvalidUtf8,
}

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Datagram
    Advertise = 1,

    // Stream
    Hello = 10,
    HelloAck = 11,
    Chat = 20,
    Kick = 30,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(MessageType::Advertise),
            10 => Ok(MessageType::Hello),
            11 => Ok(MessageType::HelloAck),
            20 => Ok(MessageType::Chat),
            30 => Ok(MessageType::Kick),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// Host announces a session on the LAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertise {
    pub session_id: SessionId,
    pub session_port: u16,
    pub privacy: Privacy,
    pub lobby_name: String,
    pub host_player_name: String,
}

/// Client asks to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub session_id: SessionId,
    pub player_name: String,
    pub invite_code: String,
}

/// Host accepted the join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloAck {
    pub session_id: SessionId,
    pub lobby_name: String,
    pub host_player_name: String,
    pub privacy: Privacy,
}

/// Host is dropping the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kick {
    pub reason: String,
}

/// One decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Advertise(Advertise),
    Hello(Hello),
    HelloAck(HelloAck),
    Chat(ChatMessage),
    Kick(Kick),
}

impl Packet {
    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Advertise(_) => MessageType::Advertise,
            Packet::Hello(_) => MessageType::Hello,
            Packet::HelloAck(_) => MessageType::HelloAck,
            Packet::Chat(_) => MessageType::Chat,
            Packet::Kick(_) => MessageType::Kick,
        }
    }

    /// Header plus body
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(MAGIC);
        buf.put_u32(PROTOCOL_VERSION);
        buf.put_u8(self.message_type() as u8);

        match self {
            Packet::Advertise(a) => {
                buf.put_u64(a.session_id.get());
                buf.put_u16(a.session_port);
                buf.put_u8(a.privacy.as_u8());
                buf.put_text(&a.lobby_name);
                buf.put_text(&a.host_player_name);
            }
            Packet::Hello(h) => {
                buf.put_u64(h.session_id.get());
                buf.put_text(&h.player_name);
                buf.put_text(&h.invite_code);
            }
            Packet::HelloAck(ack) => {
                buf.put_u64(ack.session_id.get());
                buf.put_text(&ack.lobby_name);
                buf.put_text(&ack.host_player_name);
                buf.put_u8(ack.privacy.as_u8());
            }
            Packet::Chat(msg) => {
                buf.put_u64(msg.timestamp_ms);
                buf.put_text(&msg.from);
                buf.put_text(&msg.text);
            }
            Packet::Kick(k) => {
                buf.put_text(&k.reason);
            }
        }

        buf.freeze()
    }

    /// Decode a whole packet
    pub fn decode(mut bytes: &[u8]) -> Result<Packet, DecodeError> {
        let kind = decode_header(&mut bytes)?;
        decode_body(kind, &mut bytes)
    }
}

/// Validate the header and return the message type, leaving `buf` at the body
pub fn decode_header(buf: &mut &[u8]) -> Result<MessageType, DecodeError> {
    if buf.remaining() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }

    let magic = buf.get_u32();
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }

    let version = buf.get_u32();
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    MessageType::try_from(buf.get_u8())
}

/// Decode the body of a packet whose header has already been read
pub fn decode_body(kind: MessageType, buf: &mut &[u8]) -> Result<Packet, DecodeError> {
    let packet = match kind {
        MessageType::Advertise => Packet::Advertise(Advertise {
            session_id: SessionId(buf.read_u64()?),
            session_port: buf.read_u16()?,
            privacy: buf.read_privacy()?,
            lobby_name: buf.read_text()?,
            host_player_name: buf.read_text()?,
        }),
        MessageType::Hello => Packet::Hello(Hello {
            session_id: SessionId(buf.read_u64()?),
            player_name: buf.read_text()?,
            invite_code: buf.read_text()?,
        }),
        MessageType::HelloAck => Packet::HelloAck(HelloAck {
            session_id: SessionId(buf.read_u64()?),
            lobby_name: buf.read_text()?,
            host_player_name: buf.read_text()?,
            privacy: buf.read_privacy()?,
        }),
        MessageType::Chat => Packet::Chat(ChatMessage {
            timestamp_ms: buf.read_u64()?,
            from: buf.read_text()?,
            text: buf.read_text()?,
        }),
        MessageType::Kick => Packet::Kick(Kick {
            reason: buf.read_text()?,
        }),
    };
    Ok(packet)
}

macro_rules! checked_read_impl {
    ($reader: ident, $ty: ty, $getter: ident) => {
        fn $reader(&mut self) -> Result<$ty, DecodeError> {
            if self.remaining() < std::mem::size_of::<$ty>() {
                return Err(DecodeError::Truncated);
            }
            Ok(self.$getter())
        }
    };
}

/// Bounds-checked reads for body fields
trait BufExt: Buf {
    checked_read_impl!(read_u8, u8, get_u8);
    checked_read_impl!(read_u16, u16, get_u16);
    checked_read_impl!(read_u32, u32, get_u32);
    checked_read_impl!(read_u64, u64, get_u64);

    fn read_privacy(&mut self) -> Result<Privacy, DecodeError> {
        let raw = self.read_u8()?;
        Privacy::try_from(raw).map_err(DecodeError::InvalidPrivacy)
    }

    fn read_text(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        // Length is peer-controlled: check before allocating
        if self.remaining() < len {
            return Err(DecodeError::Truncated);
        }
        let mut raw = vec![0u8; len];
        self.copy_to_slice(&mut raw);
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl<B: Buf> BufExt for B {}

trait BufMutExt: BufMut {
    fn put_text(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.put_slice(s.as_bytes());
    }
}

impl<B: BufMut> BufMutExt for B {}
