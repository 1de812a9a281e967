//! Typed payloads for inbound envelopes. Each handler deserializes its own
//! payload from the envelope's `data` object; a payload that does not match
//! its schema is rejected before any state is touched.

use serde::Deserialize;

/// AUTH_REGISTER / AUTH_LOGIN. Fields default to empty so that a missing
/// field surfaces as `missing_fields` rather than a decode error.
#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendRequestPayload {
    pub to_user_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendAcceptPayload {
    pub request_id: u64,
}

/// FRIEND_REMOVE / FRIEND_BLOCK / FRIEND_UNBLOCK.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserTargetPayload {
    pub user_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsgSendPayload {
    pub to_user_id: u64,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsgHistoryPayload {
    pub peer_id: u64,
    #[serde(default)]
    pub before_id: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupCreatePayload {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupAddPayload {
    pub group_id: u64,
    pub user_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupMsgSendPayload {
    pub group_id: u64,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupHistoryPayload {
    pub group_id: u64,
    #[serde(default)]
    pub before_id: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsgSeenPayload {
    pub message_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsgRecallPayload {
    pub message_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsgReactPayload {
    pub message_id: u64,
    pub reaction: String,
}
