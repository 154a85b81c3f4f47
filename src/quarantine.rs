//! Squatting a crashed endpoint's name.
//!
//! Once a target dies the engine attaches the same name itself, so nothing
//! else can bind it while the crash is inspected, and drains whatever other
//! clients keep sending there. The lease is never released.

use std::convert::Infallible;
use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::transport::{Channel, Received, Transport, TransportError};

pub const RECEIVE_BUFFER_LEN: usize = 256;
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);
const PREVIEW_LEN: usize = 32;

#[derive(Debug)]
pub struct QuarantineLease<C: Channel> {
    name: String,
    channel: C,
}

impl<C: Channel> QuarantineLease<C> {
    /// Attaches `name` as a channel owned by this process.
    pub fn acquire<T>(transport: &T, name: &str) -> Result<Self, TransportError>
    where
        T: Transport<Channel = C> + ?Sized,
    {
        let channel = transport.attach(name)?;
        info!(endpoint = name, chid = channel.chid(), "squatting endpoint");
        Ok(Self {
            name: name.to_string(),
            channel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chid(&self) -> i32 {
        self.channel.chid()
    }

    /// Receives and discards forever. Receive failures are logged and retried.
    pub fn absorb_forever(mut self) -> ! {
        let mut buf = [0u8; RECEIVE_BUFFER_LEN];
        let mut absorbed: u64 = 0;
        loop {
            match self.channel.receive(&mut buf) {
                Ok(received) => {
                    absorbed += 1;
                    match received {
                        Received::Pulse => {
                            debug!(endpoint = %self.name, absorbed, "absorbed pulse");
                        }
                        Received::Message { rcvid, len } => {
                            debug!(
                                endpoint = %self.name,
                                rcvid,
                                len,
                                absorbed,
                                head = %hex::encode(&buf[..len.min(PREVIEW_LEN)]),
                                "absorbed message"
                            );
                        }
                    }
                    if let Err(err) = self.channel.discard(received) {
                        warn!(endpoint = %self.name, error = %err, "failed to release sender");
                    }
                }
                Err(err) => {
                    warn!(endpoint = %self.name, error = %err, "receive on squatted channel failed");
                    thread::sleep(RECEIVE_RETRY_DELAY);
                }
            }
        }
    }
}

/// Takes over `name` and absorbs traffic to it. Only returns if the name
/// cannot be attached.
pub fn squat<T: Transport + ?Sized>(transport: &T, name: &str) -> Result<Infallible, TransportError> {
    QuarantineLease::acquire(transport, name)?.absorb_forever()
}

/// Runs the absorbing loop on its own thread.
pub fn spawn_squatter<C>(lease: QuarantineLease<C>) -> io::Result<thread::JoinHandle<()>>
where
    C: Channel + 'static,
{
    thread::Builder::new()
        .name(format!("squat-{}", lease.name))
        .spawn(move || {
            lease.absorb_forever();
        })
}

#[cfg(test)]
#[path = "quarantine_tests.rs"]
mod tests;
