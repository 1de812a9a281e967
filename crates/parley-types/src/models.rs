use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire-level view of a stored message, shared by 1:1 and group events.
/// Exactly one of `to_user_id` / `group_id` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub message_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    pub from_user_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<u64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<u64>,
    pub recalled: bool,
    pub reactions_summary: BTreeMap<String, usize>,
}

/// `status` is always `"accepted"`: friendships only exist once accepted,
/// but the field stays on the wire for client compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendEntry {
    pub user_id: u64,
    pub username: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingIncoming {
    pub request_id: u64,
    pub from_user_id: u64,
    pub from_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOutgoing {
    pub request_id: u64,
    pub to_user_id: u64,
    pub to_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub group_id: u64,
    pub name: String,
    pub member_count: usize,
}
