//! In-memory domain store: accounts, friendships, friend requests, blocks,
//! groups, memberships and messages behind a single consistency boundary.
//!
//! Every mutating operation takes the write lock for its full duration, so
//! id allocation and set updates never interleave across connections. Reads
//! take the read lock and observe a consistent snapshot.

pub mod error;
mod messages;
mod models;
mod social;

pub use error::StoreError;
pub use messages::{Audience, ReactionOutcome, SeenOutcome};
pub use social::{Credentials, FriendOverview};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use models::{FriendRequest, Group, Message, Account};

/// Page size applied when a history request omits `limit`.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Hard cap on page size; larger (or zero) requests are clamped into range,
/// so no request can pull an entire conversation in one page.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Handle to the shared domain state. Cheap to clone; all clones observe the
/// same entities. Constructed once at process start and injected everywhere.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    accounts: HashMap<u64, Account>,
    /// username -> account id, kept in lockstep with `accounts`.
    usernames: HashMap<String, u64>,
    last_account_id: u64,

    friendships: HashMap<u64, BTreeSet<u64>>,
    requests: BTreeMap<u64, FriendRequest>,
    last_request_id: u64,

    /// Directed (blocker, blocked) pairs.
    blocks: HashSet<(u64, u64)>,

    groups: BTreeMap<u64, Group>,
    members: HashMap<u64, BTreeSet<u64>>,
    last_group_id: u64,

    /// Message id -> message, one global sequence across 1:1 and groups.
    /// The ordered map doubles as the pagination index.
    messages: BTreeMap<u64, Message>,
    last_message_id: u64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreInner {
    fn username_of(&self, id: u64) -> String {
        self.accounts
            .get(&id)
            .map(|a| a.username.clone())
            .unwrap_or_else(|| format!("user_{id}"))
    }
}

/// Monotonic id allocation: counters start at 1 and are never reused, even
/// when the operation that allocated the id later fails.
fn next_id(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}
