//! Per-connection protocol router.
//!
//! Each inbound line is decoded into an envelope, matched by type tag to
//! exactly one handler, gated on authentication, and executed against the
//! shared store. Handler failures become ERROR envelopes on the offending
//! connection; nothing a client sends can take down another connection.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_store::{Audience, Store, StoreError};
use parley_types::envelope::decode_line;
use parley_types::events::{AuthFailReason, ErrorCode, ServerEvent};
use parley_types::requests::{
    AuthPayload, FriendAcceptPayload, FriendRequestPayload, GroupAddPayload, GroupCreatePayload,
    GroupHistoryPayload, GroupMsgSendPayload, MsgHistoryPayload, MsgReactPayload,
    MsgRecallPayload, MsgSeenPayload, MsgSendPayload, UserTargetPayload,
};
use parley_types::{Envelope, RawEnvelope};

use crate::registry::SessionRegistry;

/// Per-connection state: the outbound channel plus the auth state machine
/// (`user == None` is Unauthenticated). Owned by the connection task alone.
pub struct ConnState {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<Envelope>,
    user: Option<AuthedUser>,
}

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: u64,
    pub username: String,
}

impl ConnState {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
            user: None,
        }
    }

    pub fn user(&self) -> Option<&AuthedUser> {
        self.user.as_ref()
    }

    /// Queue an envelope on this connection's own channel. Errors are
    /// ignored: a closed channel means the writer task already exited.
    fn push(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    fn sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.tx.clone()
    }
}

/// A handler rejection, converted into one ERROR envelope by the router.
struct Reject {
    code: ErrorCode,
    got: Option<String>,
}

impl Reject {
    fn code(code: ErrorCode) -> Self {
        Self { code, got: None }
    }

    fn unknown_type(got: &str) -> Self {
        Self {
            code: ErrorCode::UnknownType,
            got: Some(got.to_string()),
        }
    }

    fn into_event(self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code,
            got: self.got,
        }
    }
}

/// Routes envelopes for one process. Cheap to clone into connection tasks;
/// all clones share the same store and registry.
#[derive(Clone)]
pub struct Router {
    store: Store,
    registry: SessionRegistry,
}

impl Router {
    pub fn new(store: Store, registry: SessionRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle one inbound line end to end. Never fails: every error path
    /// ends as an envelope on the connection's own channel.
    pub async fn handle_line(&self, conn: &mut ConnState, line: &str) {
        let raw = match decode_line(line) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("undecodable line: {e}");
                conn.push(Envelope::event(ServerEvent::error(ErrorCode::BadJson)));
                return;
            }
        };
        let request_id = raw.request_id.clone();
        if let Err(reject) = self.dispatch(conn, raw).await {
            conn.push(Envelope::reply(reject.into_event(), request_id));
        }
    }

    async fn dispatch(&self, conn: &mut ConnState, raw: RawEnvelope) -> Result<(), Reject> {
        let RawEnvelope {
            ty,
            data,
            request_id: rid,
        } = raw;

        match ty.as_str() {
            "PING" => {
                conn.push(Envelope::reply(ServerEvent::Pong {}, rid));
                Ok(())
            }
            "AUTH_REGISTER" => self.auth_register(conn, data, rid).await,
            "AUTH_LOGIN" => self.auth_login(conn, data, rid).await,
            _ => {
                // Authentication gate: everything below requires a login.
                let user = conn
                    .user()
                    .cloned()
                    .ok_or_else(|| Reject::code(ErrorCode::Unauth))?;
                match ty.as_str() {
                    "FRIEND_REQUEST" => self.friend_request(conn, &user, data, rid).await,
                    "FRIEND_ACCEPT" => self.friend_accept(conn, &user, data, rid).await,
                    "FRIEND_REMOVE" => self.friend_remove(conn, &user, data, rid).await,
                    "FRIEND_LIST" => self.friend_list(conn, &user, rid).await,
                    "FRIEND_BLOCK" => self.friend_block(conn, &user, data, rid).await,
                    "FRIEND_UNBLOCK" => self.friend_unblock(conn, &user, data, rid).await,
                    "MSG_SEND" => self.msg_send(conn, &user, data, rid).await,
                    "MSG_HISTORY" => self.msg_history(conn, &user, data, rid).await,
                    "GROUP_CREATE" => self.group_create(conn, &user, data, rid).await,
                    "GROUP_ADD" => self.group_add(conn, &user, data, rid).await,
                    "GROUP_LIST" => self.group_list(conn, &user, rid).await,
                    "GROUP_MSG_SEND" => self.group_msg_send(&user, data).await,
                    "GROUP_HISTORY" => self.group_history(conn, &user, data, rid).await,
                    "MSG_SEEN" => self.msg_seen(conn, &user, data, rid).await,
                    "MSG_RECALL" => self.msg_recall(conn, &user, data, rid).await,
                    "MSG_REACT" => self.msg_react(conn, &user, data, rid).await,
                    other => Err(Reject::unknown_type(other)),
                }
            }
        }
    }

    // -- Auth --

    async fn auth_register(
        &self,
        conn: &mut ConnState,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let Ok(p) = serde_json::from_value::<AuthPayload>(data) else {
            conn.push(Envelope::reply(auth_fail(AuthFailReason::MissingFields), rid));
            return Ok(());
        };
        if p.username.is_empty() || p.password.is_empty() {
            conn.push(Envelope::reply(auth_fail(AuthFailReason::MissingFields), rid));
            return Ok(());
        }
        let hash = hash_password(&p.password).map_err(|e| {
            warn!("password hashing failed: {e}");
            Reject::code(ErrorCode::BadRequest)
        })?;
        match self.store.create_account(&p.username, &hash).await {
            Ok(user_id) => {
                info!("registered {} ({})", p.username, user_id);
                conn.push(Envelope::reply(
                    ServerEvent::AuthOk {
                        username: p.username,
                        user_id,
                    },
                    rid,
                ));
            }
            Err(_) => {
                conn.push(Envelope::reply(auth_fail(AuthFailReason::UserExists), rid));
            }
        }
        Ok(())
    }

    /// Login binds this connection in the registry; a later login for the
    /// same account elsewhere replaces the binding (last login wins).
    async fn auth_login(
        &self,
        conn: &mut ConnState,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let Ok(p) = serde_json::from_value::<AuthPayload>(data) else {
            conn.push(Envelope::reply(
                auth_fail(AuthFailReason::InvalidCredentials),
                rid,
            ));
            return Ok(());
        };
        let verified = match self.store.credentials(&p.username).await {
            Some(creds) if verify_password(&creds.password_hash, &p.password) => Some(creds),
            _ => None,
        };
        let Some(creds) = verified else {
            conn.push(Envelope::reply(
                auth_fail(AuthFailReason::InvalidCredentials),
                rid,
            ));
            return Ok(());
        };

        // Switching accounts on a live connection releases the old binding;
        // it would otherwise linger until that account logged in again.
        if let Some(prev) = conn.user.take() {
            self.registry.unbind(prev.id, conn.conn_id).await;
        }
        conn.user = Some(AuthedUser {
            id: creds.user_id,
            username: p.username.clone(),
        });
        self.registry
            .bind(creds.user_id, conn.conn_id, conn.sender())
            .await;
        info!("{} ({}) logged in", p.username, creds.user_id);
        conn.push(Envelope::reply(
            ServerEvent::AuthOk {
                username: p.username,
                user_id: creds.user_id,
            },
            rid,
        ));
        Ok(())
    }

    // -- Friends --

    async fn friend_request(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: FriendRequestPayload = parse(data, ErrorCode::BadFriendRequest)?;
        if p.to_user_id == user.id {
            return Err(Reject::code(ErrorCode::BadFriendRequest));
        }
        let request_id = match self.store.create_friend_request(user.id, p.to_user_id).await {
            Ok(id) => id,
            Err(StoreError::AccountNotFound(_)) => {
                return Err(Reject::code(ErrorCode::UserNotFound))
            }
            Err(_) => return Err(Reject::code(ErrorCode::BadFriendRequest)),
        };
        conn.push(Envelope::reply(
            ServerEvent::FriendRequestSent {
                request_id,
                to_user_id: p.to_user_id,
            },
            rid,
        ));
        self.registry
            .send(
                p.to_user_id,
                ServerEvent::FriendRequestIncoming {
                    request_id,
                    from_user_id: user.id,
                    from_username: user.username.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn friend_accept(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: FriendAcceptPayload = parse(data, ErrorCode::BadFriendAccept)?;
        let (requester, target) = self
            .store
            .accept_friend_request(p.request_id, user.id)
            .await
            .map_err(|_| Reject::code(ErrorCode::BadFriendAccept))?;
        info!("{} accepted friend request {} from {}", target, p.request_id, requester);
        let event = ServerEvent::FriendAccepted {
            user_id1: requester,
            user_id2: target,
        };
        conn.push(Envelope::reply(event.clone(), rid));
        self.registry.send(requester, event).await;
        Ok(())
    }

    async fn friend_remove(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: UserTargetPayload = parse(data, ErrorCode::BadFriendRemove)?;
        if p.user_id == user.id {
            return Err(Reject::code(ErrorCode::BadFriendRemove));
        }
        self.store.remove_friend(user.id, p.user_id).await;
        conn.push(Envelope::reply(
            ServerEvent::FriendRemoved { user_id: p.user_id },
            rid,
        ));
        self.registry
            .send(p.user_id, ServerEvent::FriendRemoved { user_id: user.id })
            .await;
        Ok(())
    }

    async fn friend_list(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let overview = self.store.friend_overview(user.id).await;
        conn.push(Envelope::reply(
            ServerEvent::FriendListResult {
                friends: overview.friends,
                pending_in: overview.pending_in,
                pending_out: overview.pending_out,
            },
            rid,
        ));
        Ok(())
    }

    async fn friend_block(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: UserTargetPayload = parse(data, ErrorCode::BadBlock)?;
        if p.user_id == user.id {
            return Err(Reject::code(ErrorCode::BadBlock));
        }
        match self.store.set_block(user.id, p.user_id).await {
            Ok(()) => {}
            Err(StoreError::AccountNotFound(_)) => {
                return Err(Reject::code(ErrorCode::UserNotFound))
            }
            Err(_) => return Err(Reject::code(ErrorCode::BadBlock)),
        }
        conn.push(Envelope::reply(
            ServerEvent::FriendBlocked { user_id: p.user_id },
            rid,
        ));
        Ok(())
    }

    async fn friend_unblock(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: UserTargetPayload = parse(data, ErrorCode::BadBlock)?;
        self.store.clear_block(user.id, p.user_id).await;
        conn.push(Envelope::reply(
            ServerEvent::FriendUnblocked { user_id: p.user_id },
            rid,
        ));
        Ok(())
    }

    // -- Direct messages --

    async fn msg_send(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: MsgSendPayload = parse(data, ErrorCode::BadMsg)?;
        let content = p.content.trim();
        if content.is_empty() {
            return Err(Reject::code(ErrorCode::BadMsg));
        }
        if p.to_user_id == user.id {
            return Err(Reject::code(ErrorCode::BadMsgSelf));
        }
        let view = match self
            .store
            .append_direct(user.id, p.to_user_id, content, p.reply_to_id)
            .await
        {
            Ok(view) => view,
            Err(StoreError::BlockedByPeer) => {
                return Err(Reject::code(ErrorCode::BlockedByPeer))
            }
            Err(StoreError::AccountNotFound(_)) => {
                return Err(Reject::code(ErrorCode::UserNotFound))
            }
            Err(_) => return Err(Reject::code(ErrorCode::BadMsg)),
        };
        // Echo to the sender first (confirms the assigned id), then push to
        // the recipient if online.
        conn.push(Envelope::reply(ServerEvent::MsgRecv(view.clone()), rid));
        self.registry
            .send(p.to_user_id, ServerEvent::MsgRecv(view))
            .await;
        Ok(())
    }

    async fn msg_history(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: MsgHistoryPayload = parse(data, ErrorCode::BadRequest)?;
        let (messages, has_more) = self
            .store
            .direct_page(user.id, p.peer_id, p.before_id, p.limit)
            .await;
        conn.push(Envelope::reply(
            ServerEvent::MsgHistoryResult {
                peer_id: p.peer_id,
                messages,
                has_more,
            },
            rid,
        ));
        Ok(())
    }

    // -- Groups --

    async fn group_create(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: GroupCreatePayload = parse(data, ErrorCode::BadGroupName)?;
        let name = p.name.trim();
        if name.is_empty() {
            return Err(Reject::code(ErrorCode::BadGroupName));
        }
        let group_id = self.store.create_group(name, user.id, p.avatar).await;
        info!("{} ({}) created group {} ({})", user.username, user.id, name, group_id);
        conn.push(Envelope::reply(
            ServerEvent::GroupCreated {
                group_id,
                name: name.to_string(),
            },
            rid,
        ));
        Ok(())
    }

    async fn group_add(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: GroupAddPayload = parse(data, ErrorCode::BadGroupAdd)?;
        match self.store.add_member(p.group_id, p.user_id, user.id).await {
            Ok(()) => {}
            Err(StoreError::GroupNotFound(_)) => {
                return Err(Reject::code(ErrorCode::GroupNotFound))
            }
            Err(StoreError::Forbidden) => return Err(Reject::code(ErrorCode::NotOwner)),
            Err(StoreError::AccountNotFound(_)) => {
                return Err(Reject::code(ErrorCode::UserNotFound))
            }
            Err(_) => return Err(Reject::code(ErrorCode::BadGroupAdd)),
        }
        let groups = self.store.groups_for(user.id).await;
        conn.push(Envelope::reply(ServerEvent::GroupListResult { groups }, rid));
        Ok(())
    }

    async fn group_list(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let groups = self.store.groups_for(user.id).await;
        conn.push(Envelope::reply(ServerEvent::GroupListResult { groups }, rid));
        Ok(())
    }

    /// Group sends have no separate sender echo: the sender is part of the
    /// membership snapshot and receives the fanned-out copy.
    async fn group_msg_send(&self, user: &AuthedUser, data: Value) -> Result<(), Reject> {
        let p: GroupMsgSendPayload = parse(data, ErrorCode::BadGroupMsg)?;
        let content = p.content.trim();
        if content.is_empty() {
            return Err(Reject::code(ErrorCode::BadGroupMsg));
        }
        let (view, members) = self
            .store
            .append_group(p.group_id, user.id, content, p.reply_to_id)
            .await
            .map_err(|_| Reject::code(ErrorCode::NotGroupMember))?;
        self.registry
            .send_to_many(&members, ServerEvent::GroupMsgRecv(view))
            .await;
        Ok(())
    }

    async fn group_history(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: GroupHistoryPayload = parse(data, ErrorCode::BadRequest)?;
        let (messages, has_more) = self
            .store
            .group_page(p.group_id, user.id, p.before_id, p.limit)
            .await
            .map_err(|_| Reject::code(ErrorCode::NotGroupMember))?;
        conn.push(Envelope::reply(
            ServerEvent::GroupHistoryResult {
                group_id: p.group_id,
                messages,
                has_more,
            },
            rid,
        ));
        Ok(())
    }

    // -- Post-send mutations --

    /// One seen batch may touch several conversations; each affected peer
    /// and group membership gets its own tagged copy.
    async fn msg_seen(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: MsgSeenPayload = parse(data, ErrorCode::BadRequest)?;
        let outcome = self.store.mark_seen(&p.message_ids, user.id).await;
        if outcome.message_ids.is_empty() {
            return Ok(());
        }
        conn.push(Envelope::reply(
            ServerEvent::MsgSeenUpdate {
                message_ids: outcome.message_ids.clone(),
                by_user_id: user.id,
                peer_id: None,
                group_id: None,
            },
            rid,
        ));
        for &peer in &outcome.peers {
            self.registry
                .send(
                    peer,
                    ServerEvent::MsgSeenUpdate {
                        message_ids: outcome.message_ids.clone(),
                        by_user_id: user.id,
                        peer_id: Some(peer),
                        group_id: None,
                    },
                )
                .await;
        }
        for (group_id, members) in &outcome.groups {
            self.registry
                .send_to_many(
                    members,
                    ServerEvent::MsgSeenUpdate {
                        message_ids: outcome.message_ids.clone(),
                        by_user_id: user.id,
                        peer_id: None,
                        group_id: Some(*group_id),
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn msg_recall(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: MsgRecallPayload = parse(data, ErrorCode::BadRecall)?;
        let audience = match self.store.recall(p.message_id, user.id).await {
            Ok(audience) => audience,
            Err(StoreError::Forbidden) => return Err(Reject::code(ErrorCode::NotOwner)),
            Err(_) => return Err(Reject::code(ErrorCode::BadRecall)),
        };
        info!("{} ({}) recalled message {}", user.username, user.id, p.message_id);
        let event = ServerEvent::MsgRecallUpdate {
            message_id: p.message_id,
        };
        match audience {
            Audience::Group { members, .. } => {
                self.registry.send_to_many(&members, event).await;
            }
            Audience::Direct { peer } => {
                conn.push(Envelope::reply(event.clone(), rid));
                self.registry.send(peer, event).await;
            }
        }
        Ok(())
    }

    async fn msg_react(
        &self,
        conn: &ConnState,
        user: &AuthedUser,
        data: Value,
        rid: Option<String>,
    ) -> Result<(), Reject> {
        let p: MsgReactPayload = parse(data, ErrorCode::BadReaction)?;
        let reaction = p.reaction.trim();
        if reaction.is_empty() {
            return Err(Reject::code(ErrorCode::BadReaction));
        }
        let outcome = match self.store.toggle_reaction(p.message_id, reaction, user.id).await {
            Ok(outcome) => outcome,
            Err(StoreError::MessageNotFound(_)) => {
                return Err(Reject::code(ErrorCode::MsgNotFound))
            }
            Err(_) => return Err(Reject::code(ErrorCode::BadReaction)),
        };
        let event = ServerEvent::MsgReactUpdate {
            message_id: outcome.message_id,
            reaction: outcome.reaction,
            action: outcome.action,
            by_user_id: outcome.by_user_id,
            counts: outcome.counts,
        };
        match outcome.audience {
            Audience::Group { members, .. } => {
                self.registry.send_to_many(&members, event).await;
            }
            Audience::Direct { peer } => {
                conn.push(Envelope::reply(event.clone(), rid));
                self.registry.send(peer, event).await;
            }
        }
        Ok(())
    }
}

fn auth_fail(reason: AuthFailReason) -> ServerEvent {
    ServerEvent::AuthFail { reason }
}

/// Decode a handler payload, mapping any schema mismatch to the handler's
/// own error code so no malformed input mutates state.
fn parse<T: DeserializeOwned>(data: Value, code: ErrorCode) -> Result<T, Reject> {
    serde_json::from_value(data).map_err(|e| {
        debug!("payload decode failed: {e}");
        Reject::code(code)
    })
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
