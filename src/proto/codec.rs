//! Frame and envelope codec.
//!
//! Wire frame: `u32` big-endian payload length (capped at 1 MiB), then the
//! envelope bytes. Envelope header: `u16` cmd, `u64` seq, `u64` timestamp.
//! Strings are u16-length-prefixed UTF-8, binary payloads u32-length-prefixed,
//! lists u16-counted. All integers big-endian.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::proto::{Body, Cmd, Envelope, P2pMessage, UserInfo};

pub const FRAME_HEADER_LEN: usize = 4;
pub const ENVELOPE_HEADER_LEN: usize = 18;
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Result of scanning the readable region for one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Not enough bytes buffered; consume nothing and wait.
    NotReady,
    /// Declared length exceeds the cap; consume the 4-byte header, then skip
    /// this many payload bytes as they arrive.
    Oversized(usize),
    /// A full frame decoded; consume `.1` bytes.
    Decoded(Envelope, usize),
    /// A full frame that failed to parse; consume `.0` bytes and continue.
    Corrupt(usize),
}

pub fn try_decode_frame(buf: &[u8]) -> FrameOutcome {
    if buf.len() < FRAME_HEADER_LEN {
        return FrameOutcome::NotReady;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_BYTES {
        return FrameOutcome::Oversized(len);
    }
    if buf.len() < FRAME_HEADER_LEN + len {
        return FrameOutcome::NotReady;
    }
    let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
    match decode_envelope(payload) {
        Ok(envelope) => FrameOutcome::Decoded(envelope, FRAME_HEADER_LEN + len),
        Err(_) => FrameOutcome::Corrupt(FRAME_HEADER_LEN + len),
    }
}

pub fn encode_frame(envelope: &Envelope) -> Vec<u8> {
    let payload = encode_envelope(envelope);
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u16(envelope.cmd as u16);
    buf.put_u64(envelope.seq);
    buf.put_u64(envelope.timestamp);
    encode_body(&mut buf, &envelope.body);
    buf.to_vec()
}

fn put_str(buf: &mut BytesMut, value: &str) {
    debug_assert!(value.len() <= u16::MAX as usize);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn put_user(buf: &mut BytesMut, user: &UserInfo) {
    buf.put_u64(user.user_id);
    put_str(buf, &user.username);
    buf.put_u32(user.status);
}

fn put_message(buf: &mut BytesMut, msg: &P2pMessage) {
    buf.put_u64(msg.msg_id);
    buf.put_u64(msg.sender_id);
    buf.put_u64(msg.receiver_id);
    buf.put_u32(msg.content_type);
    put_blob(buf, &msg.content);
    buf.put_u64(msg.timestamp);
}

fn encode_body(buf: &mut BytesMut, body: &Body) {
    match body {
        Body::Empty => {}
        Body::Register { username, password } | Body::Login { username, password } => {
            put_str(buf, username);
            put_str(buf, password);
        }
        Body::RegisterAck {
            success,
            user_id,
            error_msg,
        } => {
            buf.put_u8(u8::from(*success));
            buf.put_u64(*user_id);
            put_str(buf, error_msg);
        }
        Body::LoginAck {
            success,
            token,
            user,
            error_msg,
        } => {
            buf.put_u8(u8::from(*success));
            put_str(buf, token);
            put_user(buf, user);
            put_str(buf, error_msg);
        }
        Body::AddFriend {
            receiver_id,
            verify_msg,
        } => {
            buf.put_u64(*receiver_id);
            put_str(buf, verify_msg);
        }
        Body::AddFriendAck { success, error_msg } => {
            buf.put_u8(u8::from(*success));
            put_str(buf, error_msg);
        }
        Body::HandleFriend {
            req_id,
            sender_id,
            action,
        } => {
            buf.put_u64(*req_id);
            buf.put_u64(*sender_id);
            buf.put_u32(*action);
        }
        Body::HandleFriendAck {
            success,
            sender_id,
            error_msg,
        } => {
            buf.put_u8(u8::from(*success));
            buf.put_u64(*sender_id);
            put_str(buf, error_msg);
        }
        Body::FriendListAck {
            success,
            friends,
            error_msg,
        } => {
            buf.put_u8(u8::from(*success));
            buf.put_u16(friends.len() as u16);
            for friend in friends {
                put_user(buf, friend);
            }
            put_str(buf, error_msg);
        }
        Body::Message(msg) | Body::MessagePush(msg) => put_message(buf, msg),
        Body::MessageAck {
            msg_id,
            success,
            ref_seq,
            error_msg,
        } => {
            buf.put_u64(*msg_id);
            buf.put_u8(u8::from(*success));
            buf.put_u64(*ref_seq);
            put_str(buf, error_msg);
        }
        Body::SyncAck {
            success,
            messages,
            error_msg,
        } => {
            buf.put_u8(u8::from(*success));
            buf.put_u16(messages.len() as u16);
            for msg in messages {
                put_message(buf, msg);
            }
            put_str(buf, error_msg);
        }
        Body::FriendReqPush {
            req_id,
            sender_id,
            sender_name,
            verify_msg,
        } => {
            buf.put_u64(*req_id);
            buf.put_u64(*sender_id);
            put_str(buf, sender_name);
            put_str(buf, verify_msg);
        }
        Body::FriendStatusPush {
            friend_id,
            friend_name,
            status,
        } => {
            buf.put_u64(*friend_id);
            put_str(buf, friend_name);
            buf.put_u32(*status);
        }
    }
}

/// Checked big-endian cursor over a payload slice.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Protocol("envelope truncated"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::Protocol("invalid utf-8 string"))
    }

    fn blob(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn user(&mut self) -> Result<UserInfo> {
        Ok(UserInfo {
            user_id: self.u64()?,
            username: self.string()?,
            status: self.u32()?,
        })
    }

    fn message(&mut self) -> Result<P2pMessage> {
        Ok(P2pMessage {
            msg_id: self.u64()?,
            sender_id: self.u64()?,
            receiver_id: self.u64()?,
            content_type: self.u32()?,
            content: self.blob()?,
            timestamp: self.u64()?,
        })
    }
}

pub fn decode_envelope(payload: &[u8]) -> Result<Envelope> {
    let mut reader = Reader::new(payload);
    let cmd = Cmd::from_u16(reader.u16()?);
    let seq = reader.u64()?;
    let timestamp = reader.u64()?;

    // Header-only envelopes are legal for every command (auth-gated responses
    // and bodyless requests); unknown commands are passed through for the
    // dispatcher to answer.
    if reader.remaining() == 0 || cmd == Cmd::Unknown {
        return Ok(Envelope::new(cmd, seq, timestamp, Body::Empty));
    }

    let body = match cmd {
        Cmd::Unknown => Body::Empty,
        Cmd::RegisterReq => Body::Register {
            username: reader.string()?,
            password: reader.string()?,
        },
        Cmd::RegisterRes => Body::RegisterAck {
            success: reader.u8()? != 0,
            user_id: reader.u64()?,
            error_msg: reader.string()?,
        },
        Cmd::LoginReq => Body::Login {
            username: reader.string()?,
            password: reader.string()?,
        },
        Cmd::LoginRes => Body::LoginAck {
            success: reader.u8()? != 0,
            token: reader.string()?,
            user: reader.user()?,
            error_msg: reader.string()?,
        },
        Cmd::AddFriendReq => Body::AddFriend {
            receiver_id: reader.u64()?,
            verify_msg: reader.string()?,
        },
        Cmd::AddFriendRes => Body::AddFriendAck {
            success: reader.u8()? != 0,
            error_msg: reader.string()?,
        },
        Cmd::HandleFriendReq => Body::HandleFriend {
            req_id: reader.u64()?,
            sender_id: reader.u64()?,
            action: reader.u32()?,
        },
        Cmd::HandleFriendRes => Body::HandleFriendAck {
            success: reader.u8()? != 0,
            sender_id: reader.u64()?,
            error_msg: reader.string()?,
        },
        Cmd::GetFriendListReq | Cmd::SyncMsgsReq | Cmd::Heartbeat => Body::Empty,
        Cmd::GetFriendListRes => {
            let success = reader.u8()? != 0;
            let count = reader.u16()? as usize;
            let mut friends = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                friends.push(reader.user()?);
            }
            Body::FriendListAck {
                success,
                friends,
                error_msg: reader.string()?,
            }
        }
        Cmd::P2pMsgReq => Body::Message(reader.message()?),
        Cmd::MsgAck => Body::MessageAck {
            msg_id: reader.u64()?,
            success: reader.u8()? != 0,
            ref_seq: reader.u64()?,
            error_msg: reader.string()?,
        },
        Cmd::SyncMsgsRes => {
            let success = reader.u8()? != 0;
            let count = reader.u16()? as usize;
            let mut messages = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                messages.push(reader.message()?);
            }
            Body::SyncAck {
                success,
                messages,
                error_msg: reader.string()?,
            }
        }
        Cmd::FriendReqPush => Body::FriendReqPush {
            req_id: reader.u64()?,
            sender_id: reader.u64()?,
            sender_name: reader.string()?,
            verify_msg: reader.string()?,
        },
        Cmd::FriendStatusPush => Body::FriendStatusPush {
            friend_id: reader.u64()?,
            friend_name: reader.string()?,
            status: reader.u32()?,
        },
        Cmd::P2pMsgPush => Body::MessagePush(reader.message()?),
    };
    Ok(Envelope::new(cmd, seq, timestamp, body))
}
