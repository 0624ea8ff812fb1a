//! The message transport a session runs over.

use patchbay_core::Result;
use serde_json::Value;

/// One direction of a full-duplex message stream.
///
/// `send_message` must be non-blocking from the caller's point of view
/// (enqueue-and-return); delivery order is preserved per connection.
pub trait SessionTransport: Send + Sync {
    fn send_message(&self, message: Value) -> Result<()>;
}
