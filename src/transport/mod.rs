mod error;
#[cfg(target_os = "nto")]
mod qnx;
pub mod sim;

use std::fmt;

pub use error::TransportError;
#[cfg(target_os = "nto")]
pub use qnx::{QnxChannel, QnxTransport};
pub use sim::{SimChannel, SimService, SimTransport};

/// Default location of the local endpoint namespace on QNX Neutrino.
pub const DEFAULT_NAMESPACE: &str = "/dev/name/local";

/// Opaque connection id returned by opening a named endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coid(pub i32);

impl fmt::Display for Coid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a channel receive produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A pulse; nothing to reply to.
    Pulse,
    /// A message with a receive id the sender is reply-blocked on.
    Message { rcvid: i32, len: usize },
}

impl Received {
    /// A message of which `transferred` bytes landed in a buffer of
    /// `capacity`. Kernel lengths outside that range are clamped.
    pub fn message(rcvid: i32, transferred: i32, capacity: usize) -> Self {
        let len = usize::try_from(transferred).unwrap_or(0).min(capacity);
        Self::Message { rcvid, len }
    }
}

/// Raw message-passing primitives. Every call may block for as long as the
/// peer takes; callers that need a bound wrap the call themselves.
pub trait Transport: Send + Sync + 'static {
    type Channel: Channel;

    fn open(&self, name: &str) -> Result<Coid, TransportError>;

    fn close(&self, coid: Coid) -> Result<(), TransportError>;

    /// Synchronous send. Returns the reply status once the server replies.
    fn send_sync(&self, coid: Coid, payload: &[u8]) -> Result<i64, TransportError>;

    /// Fire-and-forget send.
    fn send_async(&self, coid: Coid, payload: &[u8]) -> Result<(), TransportError>;

    fn send_pulse(&self, coid: Coid, code: i8, value: i32) -> Result<(), TransportError>;

    /// Registers `name` as a channel owned by this process.
    fn attach(&self, name: &str) -> Result<Self::Channel, TransportError>;
}

/// A receive channel bound to an attached name.
pub trait Channel: Send {
    fn chid(&self) -> i32;

    fn receive(&mut self, buf: &mut [u8]) -> Result<Received, TransportError>;

    /// Releases a reply-blocked sender with an empty, successful reply.
    fn discard(&mut self, received: Received) -> Result<(), TransportError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
