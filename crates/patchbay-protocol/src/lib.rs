//! The patch connection protocol.
//!
//! Message-based control surface between patch UIs and a hosted patch:
//! listener registry, per-patch connections, the multiplexing server
//! session with virtual files and liveness, and the host-side router that
//! bridges client messages into a [`patchbay_core::PatchPlayer`].

pub mod connection;
pub mod files;
pub mod host;
pub mod listeners;
pub mod messages;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{EndpointListenerToken, PatchConnection};
pub use files::{ContentProvider, InMemoryContent, VirtualFileRegistry};
pub use host::PatchHost;
pub use listeners::{EventListenerList, ListenerHandle};
pub use messages::{
    make_endpoint_reply_type, make_full_state_reply_type, make_reply_type, message_type,
    ClientMessage,
};
pub use session::ServerSession;
pub use transport::SessionTransport;
