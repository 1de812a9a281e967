use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(u64),

    #[error("group {0} not found")]
    GroupNotFound(u64),

    #[error("message {0} not found")]
    MessageNotFound(u64),

    #[error("friend request {0} not found")]
    RequestNotFound(u64),

    #[error("username is already registered")]
    UsernameTaken,

    #[error("caller is not permitted to perform this operation")]
    Forbidden,

    #[error("recipient has blocked the sender")]
    BlockedByPeer,

    #[error("message was already recalled")]
    AlreadyRecalled,

    #[error("caller is not a member of group {0}")]
    NotGroupMember(u64),
}
