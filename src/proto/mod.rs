//! Binary envelope model.
//!
//! Every frame on the wire carries one `Envelope`: a fixed header (command,
//! sequence, timestamp) plus a command-specific body. Responses echo the
//! request sequence; server pushes carry sequence 0. Scalar fields are always
//! present with zero/empty defaults, so a header-only envelope decodes to
//! `Body::Empty`.

pub mod codec;

pub use codec::{
    decode_envelope, encode_envelope, encode_frame, try_decode_frame, FrameOutcome,
    ENVELOPE_HEADER_LEN, FRAME_HEADER_LEN, MAX_FRAME_BYTES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Cmd {
    Unknown = 0,
    RegisterReq = 1,
    RegisterRes = 2,
    LoginReq = 3,
    LoginRes = 4,
    AddFriendReq = 5,
    AddFriendRes = 6,
    HandleFriendReq = 7,
    HandleFriendRes = 8,
    GetFriendListReq = 9,
    GetFriendListRes = 10,
    P2pMsgReq = 11,
    MsgAck = 12,
    SyncMsgsReq = 13,
    SyncMsgsRes = 14,
    Heartbeat = 15,
    FriendReqPush = 16,
    FriendStatusPush = 17,
    P2pMsgPush = 18,
}

impl Cmd {
    pub fn from_u16(raw: u16) -> Cmd {
        match raw {
            1 => Cmd::RegisterReq,
            2 => Cmd::RegisterRes,
            3 => Cmd::LoginReq,
            4 => Cmd::LoginRes,
            5 => Cmd::AddFriendReq,
            6 => Cmd::AddFriendRes,
            7 => Cmd::HandleFriendReq,
            8 => Cmd::HandleFriendRes,
            9 => Cmd::GetFriendListReq,
            10 => Cmd::GetFriendListRes,
            11 => Cmd::P2pMsgReq,
            12 => Cmd::MsgAck,
            13 => Cmd::SyncMsgsReq,
            14 => Cmd::SyncMsgsRes,
            15 => Cmd::Heartbeat,
            16 => Cmd::FriendReqPush,
            17 => Cmd::FriendStatusPush,
            18 => Cmd::P2pMsgPush,
            _ => Cmd::Unknown,
        }
    }

    /// Response command paired with a request command.
    pub fn response(self) -> Option<Cmd> {
        match self {
            Cmd::RegisterReq => Some(Cmd::RegisterRes),
            Cmd::LoginReq => Some(Cmd::LoginRes),
            Cmd::AddFriendReq => Some(Cmd::AddFriendRes),
            Cmd::HandleFriendReq => Some(Cmd::HandleFriendRes),
            Cmd::GetFriendListReq => Some(Cmd::GetFriendListRes),
            Cmd::P2pMsgReq => Some(Cmd::MsgAck),
            Cmd::SyncMsgsReq => Some(Cmd::SyncMsgsRes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendAction {
    Accept,
    Reject,
}

impl FriendAction {
    pub fn from_u32(raw: u32) -> Option<FriendAction> {
        match raw {
            1 => Some(FriendAction::Accept),
            2 => Some(FriendAction::Reject),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            FriendAction::Accept => 1,
            FriendAction::Reject => 2,
        }
    }
}

pub const USER_OFFLINE: u32 = 0;
pub const USER_ONLINE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub user_id: u64,
    pub username: String,
    pub status: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct P2pMessage {
    pub msg_id: u64,
    pub sender_id: u64,
    pub receiver_id: u64,
    pub content_type: u32,
    pub content: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    Register {
        username: String,
        password: String,
    },
    RegisterAck {
        success: bool,
        user_id: u64,
        error_msg: String,
    },
    Login {
        username: String,
        password: String,
    },
    LoginAck {
        success: bool,
        token: String,
        user: UserInfo,
        error_msg: String,
    },
    AddFriend {
        receiver_id: u64,
        verify_msg: String,
    },
    AddFriendAck {
        success: bool,
        error_msg: String,
    },
    HandleFriend {
        req_id: u64,
        sender_id: u64,
        action: u32,
    },
    HandleFriendAck {
        success: bool,
        sender_id: u64,
        error_msg: String,
    },
    FriendListAck {
        success: bool,
        friends: Vec<UserInfo>,
        error_msg: String,
    },
    Message(P2pMessage),
    MessageAck {
        msg_id: u64,
        success: bool,
        ref_seq: u64,
        error_msg: String,
    },
    SyncAck {
        success: bool,
        messages: Vec<P2pMessage>,
        error_msg: String,
    },
    FriendReqPush {
        req_id: u64,
        sender_id: u64,
        sender_name: String,
        verify_msg: String,
    },
    FriendStatusPush {
        friend_id: u64,
        friend_name: String,
        status: u32,
    },
    MessagePush(P2pMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub cmd: Cmd,
    pub seq: u64,
    pub timestamp: u64,
    pub body: Body,
}

impl Envelope {
    pub fn new(cmd: Cmd, seq: u64, timestamp: u64, body: Body) -> Self {
        Self {
            cmd,
            seq,
            timestamp,
            body,
        }
    }

    /// Server push: unsolicited, sequence 0.
    pub fn push(cmd: Cmd, timestamp: u64, body: Body) -> Self {
        Self::new(cmd, 0, timestamp, body)
    }
}
