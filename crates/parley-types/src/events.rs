use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{FriendEntry, GroupEntry, MessageView, PendingIncoming, PendingOutgoing};

/// Events pushed from the server to clients. One variant per wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    /// Registration or login succeeded.
    AuthOk { username: String, user_id: u64 },

    AuthFail { reason: AuthFailReason },

    /// Direct reply to the requester; the target gets FriendRequestIncoming.
    FriendRequestSent { request_id: u64, to_user_id: u64 },

    FriendRequestIncoming {
        request_id: u64,
        from_user_id: u64,
        from_username: String,
    },

    /// Sent to both parties once the target accepts.
    FriendAccepted { user_id1: u64, user_id2: u64 },

    /// Sent to both parties; `user_id` is the other side of the dropped link.
    FriendRemoved { user_id: u64 },

    FriendListResult {
        friends: Vec<FriendEntry>,
        pending_in: Vec<PendingIncoming>,
        pending_out: Vec<PendingOutgoing>,
    },

    FriendBlocked { user_id: u64 },

    FriendUnblocked { user_id: u64 },

    /// A new 1:1 message, delivered to sender (echo) and recipient.
    MsgRecv(MessageView),

    MsgHistoryResult {
        peer_id: u64,
        messages: Vec<MessageView>,
        has_more: bool,
    },

    GroupCreated { group_id: u64, name: String },

    GroupListResult { groups: Vec<GroupEntry> },

    /// A new group message, fanned out to the membership at send time.
    GroupMsgRecv(MessageView),

    GroupHistoryResult {
        group_id: u64,
        messages: Vec<MessageView>,
        has_more: bool,
    },

    /// Seen-receipt update. The copy fanned out to a 1:1 peer carries
    /// `peer_id`; the copy fanned out to a group carries `group_id`; the
    /// direct reply to the marker carries neither.
    MsgSeenUpdate {
        message_ids: Vec<u64>,
        by_user_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<u64>,
    },

    /// Carries only the id; the cleared content is never re-sent.
    MsgRecallUpdate { message_id: u64 },

    /// Reaction toggle with a full per-label counts snapshot, not a delta.
    MsgReactUpdate {
        message_id: u64,
        reaction: String,
        action: ReactionAction,
        by_user_id: u64,
        counts: BTreeMap<String, usize>,
    },

    Pong {},

    Error {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        got: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode) -> Self {
        Self::Error { code, got: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailReason {
    MissingFields,
    UserExists,
    InvalidCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauth,
    BadJson,
    UnknownType,
    BadRequest,
    BadFriendRequest,
    BadFriendAccept,
    BadFriendRemove,
    BadBlock,
    UserNotFound,
    BadMsg,
    BadMsgSelf,
    BlockedByPeer,
    BadGroupName,
    GroupNotFound,
    NotOwner,
    BadGroupAdd,
    BadGroupMsg,
    NotGroupMember,
    BadRecall,
    MsgNotFound,
    BadReaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_match_wire_protocol() {
        let v = serde_json::to_value(ServerEvent::AuthOk {
            username: "alice".into(),
            user_id: 1,
        })
        .unwrap();
        assert_eq!(v["type"], "AUTH_OK");
        assert_eq!(v["data"]["username"], "alice");
        assert_eq!(v["data"]["user_id"], 1);

        let v = serde_json::to_value(ServerEvent::Pong {}).unwrap();
        assert_eq!(v["type"], "PONG");
        assert_eq!(v["data"], serde_json::json!({}));

        let v = serde_json::to_value(ServerEvent::Error {
            code: ErrorCode::UnknownType,
            got: Some("NOPE".into()),
        })
        .unwrap();
        assert_eq!(v["type"], "ERROR");
        assert_eq!(v["data"]["code"], "UNKNOWN_TYPE");
        assert_eq!(v["data"]["got"], "NOPE");
    }

    #[test]
    fn error_without_got_omits_the_field() {
        let v = serde_json::to_value(ServerEvent::error(ErrorCode::Unauth)).unwrap();
        assert_eq!(v["data"]["code"], "UNAUTH");
        assert!(v["data"].get("got").is_none());
    }

    #[test]
    fn react_update_serializes_counts_snapshot() {
        let mut counts = BTreeMap::new();
        counts.insert("👍".to_string(), 2);
        let v = serde_json::to_value(ServerEvent::MsgReactUpdate {
            message_id: 7,
            reaction: "👍".into(),
            action: ReactionAction::Remove,
            by_user_id: 2,
            counts,
        })
        .unwrap();
        assert_eq!(v["type"], "MSG_REACT_UPDATE");
        assert_eq!(v["data"]["action"], "remove");
        assert_eq!(v["data"]["counts"]["👍"], 2);
    }
}
