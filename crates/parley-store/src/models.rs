use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use parley_types::models::MessageView;

pub(crate) struct Account {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestStatus {
    Pending,
    Accepted,
}

pub(crate) struct FriendRequest {
    pub id: u64,
    pub from_id: u64,
    pub to_id: u64,
    pub status: RequestStatus,
}

pub(crate) struct Group {
    pub id: u64,
    pub name: String,
    pub owner_id: u64,
    /// Accepted on create and stored; not echoed in any event.
    #[allow(dead_code)]
    pub avatar: Option<String>,
}

/// A stored message. `group_id` and `to_id` are mutually exclusive: exactly
/// one is set, fixing the conversation the message belongs to.
pub(crate) struct Message {
    pub id: u64,
    pub group_id: Option<u64>,
    pub from_id: u64,
    pub to_id: Option<u64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<u64>,
    pub recalled: bool,
    pub seen_by: BTreeSet<u64>,
    pub reactions: BTreeMap<String, BTreeSet<u64>>,
}

impl Message {
    pub fn view(&self) -> MessageView {
        MessageView {
            message_id: self.id,
            group_id: self.group_id,
            from_user_id: self.from_id,
            to_user_id: self.to_id,
            content: self.content.clone(),
            created_at: self.created_at,
            reply_to_id: self.reply_to_id,
            recalled: self.recalled,
            reactions_summary: self.reactions_summary(),
        }
    }

    pub fn reactions_summary(&self) -> BTreeMap<String, usize> {
        self.reactions
            .iter()
            .map(|(label, who)| (label.clone(), who.len()))
            .collect()
    }

    /// The other 1:1 participant as seen from `viewer`. Falls back to the
    /// author when the viewer is not a participant (a reaction from a third
    /// account still notifies the author).
    pub fn peer_of(&self, viewer: u64) -> Option<u64> {
        let to = self.to_id?;
        if self.from_id == viewer {
            Some(to)
        } else {
            Some(self.from_id)
        }
    }

    pub fn is_direct_between(&self, a: u64, b: u64) -> bool {
        match self.to_id {
            Some(to) => {
                (self.from_id == a && to == b) || (self.from_id == b && to == a)
            }
            None => false,
        }
    }
}
