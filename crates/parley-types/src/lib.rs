pub mod envelope;
pub mod events;
pub mod models;
pub mod requests;

pub use envelope::{Envelope, RawEnvelope};
pub use events::{AuthFailReason, ErrorCode, ReactionAction, ServerEvent};
