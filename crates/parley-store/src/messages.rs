//! Message lifecycle: append, pagination, seen receipts, recall, reactions.
//!
//! Mutating operations return the derived audience alongside the mutation
//! result, computed under the same lock, so fan-out always sees the
//! membership that was current at the instant of the mutation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use parley_types::events::ReactionAction;
use parley_types::models::MessageView;

use crate::models::Message;
use crate::{next_id, Store, StoreError, StoreInner, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Who, besides the acting connection, receives an update about a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// The other 1:1 participant.
    Direct { peer: u64 },
    /// The group's full membership, snapshotted when the mutation applied.
    Group { group_id: u64, members: Vec<u64> },
}

/// Result of a seen-receipt batch. A single batch may span several
/// conversations; each affected peer and group gets its own fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenOutcome {
    pub message_ids: Vec<u64>,
    pub peers: Vec<u64>,
    pub groups: Vec<(u64, Vec<u64>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionOutcome {
    pub message_id: u64,
    pub reaction: String,
    pub action: ReactionAction,
    pub by_user_id: u64,
    pub counts: BTreeMap<String, usize>,
    pub audience: Audience,
}

impl Store {
    // -- Append --

    /// Append a 1:1 message. Fails without appending when the recipient is
    /// unknown or has blocked the sender.
    pub async fn append_direct(
        &self,
        from: u64,
        to: u64,
        content: &str,
        reply_to_id: Option<u64>,
    ) -> Result<MessageView, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&to) {
            return Err(StoreError::AccountNotFound(to));
        }
        if inner.blocks.contains(&(to, from)) {
            return Err(StoreError::BlockedByPeer);
        }
        let id = next_id(&mut inner.last_message_id);
        let message = new_message(id, None, from, Some(to), content, reply_to_id);
        let view = message.view();
        inner.messages.insert(id, message);
        Ok(view)
    }

    /// Append a group message and return the membership snapshot that the
    /// fan-out must target. Sending to a group one is not a member of fails
    /// without appending; an unknown group reads as "not a member".
    pub async fn append_group(
        &self,
        group_id: u64,
        from: u64,
        content: &str,
        reply_to_id: Option<u64>,
    ) -> Result<(MessageView, Vec<u64>), StoreError> {
        let mut inner = self.inner.write().await;
        let members: Vec<u64> = match inner.members.get(&group_id) {
            Some(m) if m.contains(&from) => m.iter().copied().collect(),
            _ => return Err(StoreError::NotGroupMember(group_id)),
        };
        let id = next_id(&mut inner.last_message_id);
        let message = new_message(id, Some(group_id), from, None, content, reply_to_id);
        let view = message.view();
        inner.messages.insert(id, message);
        Ok((view, members))
    }

    // -- Pagination --

    /// Page through the 1:1 conversation between `me` and `peer`, newest
    /// first across pages, oldest first within a page.
    pub async fn direct_page(
        &self,
        me: u64,
        peer: u64,
        before_id: Option<u64>,
        limit: Option<u32>,
    ) -> (Vec<MessageView>, bool) {
        let inner = self.inner.read().await;
        inner.page(before_id, limit, |m| m.is_direct_between(me, peer))
    }

    /// Page through a group conversation; membership-gated.
    pub async fn group_page(
        &self,
        group_id: u64,
        me: u64,
        before_id: Option<u64>,
        limit: Option<u32>,
    ) -> Result<(Vec<MessageView>, bool), StoreError> {
        let inner = self.inner.read().await;
        let is_member = inner
            .members
            .get(&group_id)
            .is_some_and(|m| m.contains(&me));
        if !is_member {
            return Err(StoreError::NotGroupMember(group_id));
        }
        Ok(inner.page(before_id, limit, |m| m.group_id == Some(group_id)))
    }

    // -- Post-send mutations --

    /// Mark a batch of messages as seen by `by`. Unknown ids are skipped;
    /// marking an already-seen message again is idempotent but still listed.
    pub async fn mark_seen(&self, message_ids: &[u64], by: u64) -> SeenOutcome {
        let mut inner = self.inner.write().await;
        let mut updated = Vec::new();
        let mut peers = BTreeSet::new();
        let mut group_ids = BTreeSet::new();
        for &id in message_ids {
            let Some(message) = inner.messages.get_mut(&id) else {
                continue;
            };
            message.seen_by.insert(by);
            updated.push(id);
            match message.group_id {
                Some(gid) => {
                    group_ids.insert(gid);
                }
                None => {
                    if let Some(peer) = message.peer_of(by) {
                        peers.insert(peer);
                    }
                }
            }
        }
        let groups = group_ids
            .into_iter()
            .map(|gid| {
                let members = inner
                    .members
                    .get(&gid)
                    .map(|m| m.iter().copied().collect())
                    .unwrap_or_default();
                (gid, members)
            })
            .collect();
        SeenOutcome {
            message_ids: updated,
            peers: peers.into_iter().collect(),
            groups,
        }
    }

    /// Recall a message: author-only, once. Clears the content but keeps the
    /// row so history and pagination stay stable.
    pub async fn recall(&self, message_id: u64, by: u64) -> Result<Audience, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound(message_id))?;
        if message.recalled {
            return Err(StoreError::AlreadyRecalled);
        }
        if message.from_id != by {
            return Err(StoreError::Forbidden);
        }
        message.recalled = true;
        message.content.clear();
        let audience = audience_of(&inner, message_id, by);
        Ok(audience)
    }

    /// Toggle a reaction label for `by`: present -> removed, absent ->
    /// added. Returns the action taken and the full counts snapshot.
    pub async fn toggle_reaction(
        &self,
        message_id: u64,
        reaction: &str,
        by: u64,
    ) -> Result<ReactionOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound(message_id))?;
        let reactors = message.reactions.entry(reaction.to_string()).or_default();
        let action = if reactors.remove(&by) {
            ReactionAction::Remove
        } else {
            reactors.insert(by);
            ReactionAction::Add
        };
        if message
            .reactions
            .get(reaction)
            .is_some_and(|r| r.is_empty())
        {
            message.reactions.remove(reaction);
        }
        let counts = message.reactions_summary();
        let audience = audience_of(&inner, message_id, by);
        Ok(ReactionOutcome {
            message_id,
            reaction: reaction.to_string(),
            action,
            by_user_id: by,
            counts,
            audience,
        })
    }

    pub async fn message_view(&self, message_id: u64) -> Option<MessageView> {
        let inner = self.inner.read().await;
        inner.messages.get(&message_id).map(|m| m.view())
    }
}

impl StoreInner {
    /// Shared pagination core: walk ids descending below the exclusive
    /// `before_id` bound, stop after `limit` matches, then flip the batch to
    /// ascending order. `has_more` reports whether older matches remained.
    fn page<F>(&self, before_id: Option<u64>, limit: Option<u32>, matches: F) -> (Vec<MessageView>, bool)
    where
        F: Fn(&Message) -> bool,
    {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT) as usize;
        let upper = before_id.unwrap_or(u64::MAX);
        let mut batch = Vec::new();
        let mut has_more = false;
        for message in self.messages.range(..upper).rev().map(|(_, m)| m) {
            if !matches(message) {
                continue;
            }
            if batch.len() == limit {
                has_more = true;
                break;
            }
            batch.push(message.view());
        }
        batch.reverse();
        (batch, has_more)
    }
}

fn audience_of(inner: &StoreInner, message_id: u64, acting: u64) -> Audience {
    let message = &inner.messages[&message_id];
    match message.group_id {
        Some(group_id) => Audience::Group {
            group_id,
            members: inner
                .members
                .get(&group_id)
                .map(|m| m.iter().copied().collect())
                .unwrap_or_default(),
        },
        None => Audience::Direct {
            // peer_of is Some for every direct message
            peer: message.peer_of(acting).unwrap_or(message.from_id),
        },
    }
}

fn new_message(
    id: u64,
    group_id: Option<u64>,
    from: u64,
    to: Option<u64>,
    content: &str,
    reply_to_id: Option<u64>,
) -> Message {
    Message {
        id,
        group_id,
        from_id: from,
        to_id: to,
        content: content.to_string(),
        created_at: Utc::now(),
        reply_to_id,
        recalled: false,
        seen_by: BTreeSet::new(),
        reactions: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn store_with_users(n: u64) -> Store {
        let store = Store::new();
        for i in 1..=n {
            store
                .create_account(&format!("user{i}"), "hash")
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn message_ids_are_global_across_direct_and_group() {
        let store = store_with_users(2).await;
        let gid = store.create_group("den", 1, None).await;

        let m1 = store.append_direct(1, 2, "a", None).await.unwrap();
        let (m2, _) = store.append_group(gid, 1, "b", None).await.unwrap();
        let m3 = store.append_direct(2, 1, "c", None).await.unwrap();

        assert_eq!(
            (m1.message_id, m2.message_id, m3.message_id),
            (1, 2, 3)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sends_never_duplicate_ids() {
        let store = Arc::new(store_with_users(2).await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    let view = store.append_direct(1, 2, "x", None).await.unwrap();
                    ids.push(view.message_id);
                }
                ids
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        let expected: Vec<u64> = (1..=200).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn blocked_sender_appends_nothing() {
        let store = store_with_users(2).await;
        store.set_block(2, 1).await.unwrap();

        assert_eq!(
            store.append_direct(1, 2, "hi", None).await,
            Err(StoreError::BlockedByPeer)
        );
        assert!(store.message_view(1).await.is_none());

        // The reverse direction is unaffected.
        store.append_direct(2, 1, "yo", None).await.unwrap();
    }

    #[tokio::test]
    async fn send_to_unknown_account_fails() {
        let store = store_with_users(1).await;
        assert_eq!(
            store.append_direct(1, 9, "hi", None).await,
            Err(StoreError::AccountNotFound(9))
        );
    }

    #[tokio::test]
    async fn group_send_requires_membership_at_send_time() {
        let store = store_with_users(2).await;
        let gid = store.create_group("den", 1, None).await;

        assert_eq!(
            store.append_group(gid, 2, "hi", None).await,
            Err(StoreError::NotGroupMember(gid))
        );

        store.add_member(gid, 2, 1).await.unwrap();
        let (view, members) = store.append_group(gid, 2, "hi", None).await.unwrap();
        assert_eq!(view.group_id, Some(gid));
        assert_eq!(members, vec![1, 2]);
    }

    #[tokio::test]
    async fn pagination_walks_newest_to_oldest_without_overlap() {
        let store = store_with_users(2).await;
        for i in 0..5 {
            store
                .append_direct(1, 2, &format!("m{i}"), None)
                .await
                .unwrap();
        }

        let (page1, more) = store.direct_page(1, 2, None, Some(2)).await;
        assert!(more);
        let ids1: Vec<u64> = page1.iter().map(|m| m.message_id).collect();
        assert_eq!(ids1, vec![4, 5]);

        let (page2, more) = store.direct_page(1, 2, Some(4), Some(2)).await;
        assert!(more);
        let ids2: Vec<u64> = page2.iter().map(|m| m.message_id).collect();
        assert_eq!(ids2, vec![2, 3]);

        let (page3, more) = store.direct_page(1, 2, Some(2), Some(2)).await;
        assert!(!more);
        let ids3: Vec<u64> = page3.iter().map(|m| m.message_id).collect();
        assert_eq!(ids3, vec![1]);
    }

    #[tokio::test]
    async fn page_selects_only_the_requested_conversation() {
        let store = store_with_users(3).await;
        let gid = store.create_group("den", 1, None).await;
        store.append_direct(1, 2, "a", None).await.unwrap();
        store.append_direct(3, 1, "b", None).await.unwrap();
        store.append_group(gid, 1, "c", None).await.unwrap();
        store.append_direct(2, 1, "d", None).await.unwrap();

        let (page, more) = store.direct_page(1, 2, None, None).await;
        assert!(!more);
        let ids: Vec<u64> = page.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1, 4]);

        let (gpage, _) = store.group_page(gid, 1, None, None).await.unwrap();
        assert_eq!(gpage[0].message_id, 3);
    }

    #[tokio::test]
    async fn empty_conversation_pages_cleanly() {
        let store = store_with_users(2).await;
        let (page, more) = store.direct_page(1, 2, None, Some(10)).await;
        assert!(page.is_empty());
        assert!(!more);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_not_unbounded() {
        let store = store_with_users(2).await;
        for _ in 0..3 {
            store.append_direct(1, 2, "x", None).await.unwrap();
        }
        let (page, more) = store.direct_page(1, 2, None, Some(0)).await;
        assert_eq!(page.len(), 1);
        assert!(more);
    }

    #[tokio::test]
    async fn group_history_is_membership_gated() {
        let store = store_with_users(2).await;
        let gid = store.create_group("den", 1, None).await;
        assert_eq!(
            store.group_page(gid, 2, None, None).await,
            Err(StoreError::NotGroupMember(gid))
        );
    }

    #[tokio::test]
    async fn recall_is_author_only_and_idempotent() {
        let store = store_with_users(2).await;
        let view = store.append_direct(1, 2, "oops", None).await.unwrap();
        let id = view.message_id;

        assert_eq!(store.recall(id, 2).await, Err(StoreError::Forbidden));
        let intact = store.message_view(id).await.unwrap();
        assert!(!intact.recalled);
        assert_eq!(intact.content, "oops");

        assert_eq!(
            store.recall(id, 1).await.unwrap(),
            Audience::Direct { peer: 2 }
        );
        let cleared = store.message_view(id).await.unwrap();
        assert!(cleared.recalled);
        assert!(cleared.content.is_empty());

        assert_eq!(store.recall(id, 1).await, Err(StoreError::AlreadyRecalled));
    }

    #[tokio::test]
    async fn reaction_toggle_roundtrips_counts() {
        let store = store_with_users(2).await;
        let id = store
            .append_direct(1, 2, "hi", None)
            .await
            .unwrap()
            .message_id;

        let before = store.message_view(id).await.unwrap().reactions_summary;

        let added = store.toggle_reaction(id, "👍", 2).await.unwrap();
        assert_eq!(added.action, ReactionAction::Add);
        assert_eq!(added.counts.get("👍"), Some(&1));
        assert_eq!(added.audience, Audience::Direct { peer: 1 });

        let removed = store.toggle_reaction(id, "👍", 2).await.unwrap();
        assert_eq!(removed.action, ReactionAction::Remove);
        assert_eq!(removed.counts, before);
    }

    #[tokio::test]
    async fn reactions_from_different_users_accumulate() {
        let store = store_with_users(3).await;
        let id = store
            .append_direct(1, 2, "hi", None)
            .await
            .unwrap()
            .message_id;

        store.toggle_reaction(id, "🔥", 1).await.unwrap();
        let out = store.toggle_reaction(id, "🔥", 2).await.unwrap();
        assert_eq!(out.counts.get("🔥"), Some(&2));
    }

    #[tokio::test]
    async fn reacting_to_unknown_message_fails() {
        let store = store_with_users(1).await;
        assert_eq!(
            store.toggle_reaction(5, "👍", 1).await,
            Err(StoreError::MessageNotFound(5))
        );
    }

    #[tokio::test]
    async fn seen_batch_spanning_conversations_splits_audiences() {
        let store = store_with_users(3).await;
        let gid = store.create_group("den", 1, None).await;
        store.add_member(gid, 2, 1).await.unwrap();

        let direct = store.append_direct(2, 1, "a", None).await.unwrap();
        let (group, _) = store.append_group(gid, 2, "b", None).await.unwrap();

        let outcome = store
            .mark_seen(&[direct.message_id, group.message_id, 999], 1)
            .await;
        assert_eq!(outcome.message_ids, vec![direct.message_id, group.message_id]);
        assert_eq!(outcome.peers, vec![2]);
        assert_eq!(outcome.groups, vec![(gid, vec![1, 2])]);
    }

    #[tokio::test]
    async fn seen_with_only_unknown_ids_is_empty() {
        let store = store_with_users(1).await;
        let outcome = store.mark_seen(&[1, 2, 3], 1).await;
        assert_eq!(outcome, SeenOutcome::default());
    }

    #[tokio::test]
    async fn group_recall_targets_membership_snapshot() {
        let store = store_with_users(3).await;
        let gid = store.create_group("den", 1, None).await;
        store.add_member(gid, 2, 1).await.unwrap();
        let (view, _) = store.append_group(gid, 1, "x", None).await.unwrap();

        // A member added after the send still sees the recall: the audience
        // is derived at recall time, not send time.
        store.add_member(gid, 3, 1).await.unwrap();
        let audience = store.recall(view.message_id, 1).await.unwrap();
        assert_eq!(
            audience,
            Audience::Group {
                group_id: gid,
                members: vec![1, 2, 3]
            }
        );
    }
}
