//! Accounts, friendships, blocks and groups.

use std::collections::BTreeSet;

use parley_types::models::{FriendEntry, GroupEntry, PendingIncoming, PendingOutgoing};

use crate::models::{Account, FriendRequest, Group, RequestStatus};
use crate::{next_id, Store, StoreError};

/// Stored credential record for a username, looked up at login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: u64,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FriendOverview {
    pub friends: Vec<FriendEntry>,
    pub pending_in: Vec<PendingIncoming>,
    pub pending_out: Vec<PendingOutgoing>,
}

impl Store {
    // -- Accounts --

    /// Register a new account. The caller hashes the password; the store only
    /// keeps the hash. Fails when the username is taken.
    pub async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(username) {
            return Err(StoreError::UsernameTaken);
        }
        let id = next_id(&mut inner.last_account_id);
        inner.usernames.insert(username.to_string(), id);
        inner.accounts.insert(
            id,
            Account {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(id)
    }

    pub async fn credentials(&self, username: &str) -> Option<Credentials> {
        let inner = self.inner.read().await;
        let id = *inner.usernames.get(username)?;
        let account = inner.accounts.get(&id)?;
        Some(Credentials {
            user_id: account.id,
            password_hash: account.password_hash.clone(),
        })
    }

    // -- Friendships --

    /// File a friend request from `from` to `to`. The request stays listed
    /// until accepted; duplicates are allowed, matching the wire protocol.
    pub async fn create_friend_request(&self, from: u64, to: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&to) {
            return Err(StoreError::AccountNotFound(to));
        }
        let id = next_id(&mut inner.last_request_id);
        inner.requests.insert(
            id,
            FriendRequest {
                id,
                from_id: from,
                to_id: to,
                status: RequestStatus::Pending,
            },
        );
        Ok(id)
    }

    /// Accept a pending request. Only the designated target may accept, and
    /// only once; acceptance materializes the friendship in both directions
    /// under the same write lock. Returns (from, to) of the request.
    pub async fn accept_friend_request(
        &self,
        request_id: u64,
        by: u64,
    ) -> Result<(u64, u64), StoreError> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&request_id)
            .ok_or(StoreError::RequestNotFound(request_id))?;
        if request.to_id != by || request.status != RequestStatus::Pending {
            return Err(StoreError::Forbidden);
        }
        request.status = RequestStatus::Accepted;
        let (a, b) = (request.from_id, request.to_id);
        inner.friendships.entry(a).or_default().insert(b);
        inner.friendships.entry(b).or_default().insert(a);
        Ok((a, b))
    }

    /// Drop the friendship in both directions. A no-op when the accounts
    /// were not friends.
    pub async fn remove_friend(&self, me: u64, other: u64) {
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.friendships.get_mut(&me) {
            set.remove(&other);
        }
        if let Some(set) = inner.friendships.get_mut(&other) {
            set.remove(&me);
        }
    }

    pub async fn friend_overview(&self, me: u64) -> FriendOverview {
        let inner = self.inner.read().await;
        let friends = inner
            .friendships
            .get(&me)
            .into_iter()
            .flatten()
            .map(|&id| FriendEntry {
                user_id: id,
                username: inner.username_of(id),
                status: "accepted".to_string(),
            })
            .collect();
        let pending_in = inner
            .requests
            .values()
            .filter(|r| r.to_id == me && r.status == RequestStatus::Pending)
            .map(|r| PendingIncoming {
                request_id: r.id,
                from_user_id: r.from_id,
                from_username: inner.username_of(r.from_id),
            })
            .collect();
        let pending_out = inner
            .requests
            .values()
            .filter(|r| r.from_id == me && r.status == RequestStatus::Pending)
            .map(|r| PendingOutgoing {
                request_id: r.id,
                to_user_id: r.to_id,
                to_username: inner.username_of(r.to_id),
            })
            .collect();
        FriendOverview {
            friends,
            pending_in,
            pending_out,
        }
    }

    // -- Blocks --

    pub async fn set_block(&self, blocker: u64, blocked: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&blocked) {
            return Err(StoreError::AccountNotFound(blocked));
        }
        inner.blocks.insert((blocker, blocked));
        Ok(())
    }

    /// Clearing a block that was never set is a no-op.
    pub async fn clear_block(&self, blocker: u64, blocked: u64) {
        let mut inner = self.inner.write().await;
        inner.blocks.remove(&(blocker, blocked));
    }

    pub async fn is_blocked(&self, blocker: u64, blocked: u64) -> bool {
        let inner = self.inner.read().await;
        inner.blocks.contains(&(blocker, blocked))
    }

    // -- Groups --

    /// Create a group; the creator becomes owner and the sole member.
    pub async fn create_group(&self, name: &str, owner: u64, avatar: Option<String>) -> u64 {
        let mut inner = self.inner.write().await;
        let id = next_id(&mut inner.last_group_id);
        inner.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
                owner_id: owner,
                avatar,
            },
        );
        inner.members.insert(id, BTreeSet::from([owner]));
        id
    }

    /// Owner-only membership mutation. Adding an existing member is a no-op.
    pub async fn add_member(&self, group_id: u64, user_id: u64, by: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let group = inner
            .groups
            .get(&group_id)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        if group.owner_id != by {
            return Err(StoreError::Forbidden);
        }
        if !inner.accounts.contains_key(&user_id) {
            return Err(StoreError::AccountNotFound(user_id));
        }
        inner.members.entry(group_id).or_default().insert(user_id);
        Ok(())
    }

    pub async fn is_member(&self, group_id: u64, user_id: u64) -> bool {
        let inner = self.inner.read().await;
        inner
            .members
            .get(&group_id)
            .is_some_and(|m| m.contains(&user_id))
    }

    /// Groups the account belongs to, with live member counts.
    pub async fn groups_for(&self, user_id: u64) -> Vec<GroupEntry> {
        let inner = self.inner.read().await;
        inner
            .groups
            .values()
            .filter_map(|g| {
                let members = inner.members.get(&g.id)?;
                members.contains(&user_id).then(|| GroupEntry {
                    group_id: g.id,
                    name: g.name.clone(),
                    member_count: members.len(),
                })
            })
            .collect()
    }
}
