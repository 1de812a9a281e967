//! Connection gateway: the session registry, the per-connection protocol
//! router and the fan-out of domain events to live channels.

pub mod connection;
pub mod registry;
pub mod router;

pub use connection::serve;
pub use registry::SessionRegistry;
pub use router::{ConnState, Router};
