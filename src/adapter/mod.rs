//! The chat-provider adapter contract (§6). Real wire protocols are
//! out of scope for the core; this module defines the trait plus a
//! loopback implementation used by tests and the CLI's demo mode.

pub mod loopback;

use crate::error::GortError;
use crate::util::BoxFuture;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    MessageDirect,
    MessageChannel,
    UserJoined,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterEvent {
    pub channel: String,
    pub provider_user_id: String,
    pub text: String,
    pub kind: EventKind,
}

/// A rendered reply, in one of three shapes an adapter can choose to
/// render natively.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedMessage {
    Text(String),
    PreformattedBlock(String),
    Fields(Vec<(String, String)>),
}

pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Sends a rendered reply to `channel`. A single attempt: the
    /// router retries once with jitter on failure before dropping the
    /// reply, per §7's propagation policy. Implementations just report
    /// the outcome of one send.
    fn send(&self, channel: &str, message: RenderedMessage) -> BoxFuture<'_, Result<(), GortError>>;

    fn resolve_user(&self, provider_id: &str) -> BoxFuture<'_, Result<Option<String>, GortError>>;
    fn resolve_channel(&self, id: &str) -> BoxFuture<'_, Result<Option<String>, GortError>>;
}
