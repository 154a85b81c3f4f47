//! The per-iteration state machine: SELECT → SEND → OBSERVE →
//! CONTINUE | RECORD_AND_QUARANTINE.
//!
//! Exactly one message is in flight at a time so any crash is attributed to
//! the iteration that caused it. Sends run on the blocking pool; with no send
//! timeout configured a target that never replies blocks the engine forever.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{CrashStore, IterationId};
use crate::config::SendMode;
use crate::generator::MessageGenerator;
use crate::liveness::{LivenessMonitor, Outcome};
use crate::registry::{Endpoint, EndpointRegistry};
use crate::transport::{Coid, Transport, TransportError};

const PREVIEW_LEN: usize = 32;
const PULSE_MAX: u8 = 127;

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Fixed single target; `None` picks a random endpoint every iteration.
    pub target: Option<String>,
    pub send_mode: SendMode,
    /// Bounded wait for a send. `None` keeps the blocking semantics.
    pub send_timeout: Option<Duration>,
    pub max_iterations: Option<u64>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub id: IterationId,
    pub target: String,
    pub size: usize,
    pub outcome: Outcome,
}

/// A persisted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub id: IterationId,
    pub endpoint: String,
    pub artifact: PathBuf,
    pub size: usize,
    pub core: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue(Iteration),
    Crashed(CrashReport),
    /// The send outlived the bounded wait; the endpoint left the rotation.
    Hung(CrashReport),
    /// An async send or pulse was accepted.
    Delivered { id: IterationId, endpoint: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Crashed(CrashReport),
    Hung(CrashReport),
    Delivered { id: IterationId, endpoint: String },
    IterationLimit(u64),
    Cancelled(u64),
}

/// What goes out on the wire for one iteration.
enum Outgoing {
    Message(Arc<[u8]>),
    Pulse { code: i8, value: i32 },
}

impl Outgoing {
    /// Bytes saved if this iteration fails: the message itself, or the pulse
    /// code byte followed by the little-endian value.
    fn recorded_bytes(&self) -> Vec<u8> {
        match self {
            Self::Message(payload) => payload.to_vec(),
            Self::Pulse { code, value } => pulse_bytes(*code, *value),
        }
    }
}

pub fn pulse_bytes(code: i8, value: i32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    bytes.extend_from_slice(&code.to_le_bytes());
    bytes.extend_from_slice(&value.to_le_bytes());
    bytes
}

enum SendResult {
    Replied(i64),
    Accepted,
    Failed(TransportError),
    TimedOut,
}

pub struct Engine<T: Transport, R: Rng> {
    transport: Arc<T>,
    registry: EndpointRegistry,
    generator: MessageGenerator,
    monitor: LivenessMonitor,
    store: CrashStore,
    rng: R,
    options: EngineOptions,
    iterations: u64,
}

impl<T: Transport, R: Rng> Engine<T, R> {
    pub fn new(
        transport: Arc<T>,
        registry: EndpointRegistry,
        generator: MessageGenerator,
        monitor: LivenessMonitor,
        store: CrashStore,
        rng: R,
        options: EngineOptions,
    ) -> Self {
        Self {
            transport,
            registry,
            generator,
            monitor,
            store,
            rng,
            options,
            iterations: 0,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CrashStore {
        &self.store
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Iterates until a crash, an accepted async delivery, the iteration limit
    /// or cancellation. A hang ends the run unless the monitor can still tell
    /// the remaining endpoints apart and some are left.
    pub async fn run(&mut self) -> Result<RunEnd> {
        loop {
            if let Some(cancel) = &self.options.cancel
                && cancel.is_cancelled()
            {
                info!(iterations = self.iterations, "fuzz loop cancelled");
                return Ok(RunEnd::Cancelled(self.iterations));
            }
            if let Some(limit) = self.options.max_iterations
                && self.iterations >= limit
            {
                info!(iterations = self.iterations, "iteration limit reached");
                return Ok(RunEnd::IterationLimit(self.iterations));
            }

            match self.step().await? {
                Step::Continue(_) => {}
                Step::Crashed(report) => return Ok(RunEnd::Crashed(report)),
                Step::Hung(report) => {
                    // A core dumped later by the hung process could not be told
                    // apart from one caused by the next iteration.
                    if self.options.target.is_some()
                        || self.registry.is_empty()
                        || !self.monitor.attributes_by_endpoint()
                    {
                        return Ok(RunEnd::Hung(report));
                    }
                }
                Step::Delivered { id, endpoint } => {
                    return Ok(RunEnd::Delivered { id, endpoint });
                }
            }
        }
    }

    /// One full SELECT → SEND → OBSERVE cycle.
    pub async fn step(&mut self) -> Result<Step> {
        self.iterations += 1;
        let id = IterationId::random(&mut self.rng);
        let target = self.select()?;
        let outgoing = self.prepare(&target.name);
        let recorded = outgoing.recorded_bytes();
        let size = recorded.len();

        info!(%id, endpoint = %target.name, coid = %target.coid, size, "fuzzing endpoint");
        debug!(
            %id,
            head = %hex::encode(&recorded[..size.min(PREVIEW_LEN)]),
            "payload"
        );

        let sent = self.send(target.coid, outgoing).await?;
        let outcome = match sent {
            SendResult::Replied(status) => {
                debug!(%id, status, "send returned");
                self.monitor.observe(&target.name).await
            }
            SendResult::Accepted => {
                info!(%id, endpoint = %target.name, mode = ?self.options.send_mode, "delivery accepted; stopping");
                return Ok(Step::Delivered {
                    id,
                    endpoint: target.name,
                });
            }
            SendResult::Failed(err) => {
                warn!(%id, endpoint = %target.name, error = %err, "send failed");
                self.monitor.observe(&target.name).await
            }
            SendResult::TimedOut => {
                warn!(%id, endpoint = %target.name, "send did not complete within the timeout");
                Outcome::Hung
            }
        };

        match outcome {
            Outcome::Ok => Ok(Step::Continue(Iteration {
                id,
                target: target.name,
                size,
                outcome: Outcome::Ok,
            })),
            Outcome::Crashed { core } => {
                let report = self.record(id, &target, &recorded, core)?;
                Ok(Step::Crashed(report))
            }
            Outcome::Hung => {
                let report = self.record(id, &target, &recorded, None)?;
                Ok(Step::Hung(report))
            }
        }
    }

    /// Pulses carry only a code and a value, so no payload is generated for them.
    fn prepare(&mut self, endpoint: &str) -> Outgoing {
        match self.options.send_mode {
            SendMode::Pulse => {
                let code = self.rng.gen_range(0..=PULSE_MAX) as i8;
                let value = i32::from(self.rng.gen_range(0..=PULSE_MAX));
                debug!(code, value, "pulse");
                Outgoing::Pulse { code, value }
            }
            SendMode::Sync | SendMode::Async => {
                let message = self.generator.generate(endpoint, &mut self.rng);
                Outgoing::Message(Arc::from(message.into_payload()))
            }
        }
    }

    fn select(&mut self) -> Result<Endpoint> {
        let endpoint = match &self.options.target {
            Some(name) => self
                .registry
                .get(name)
                .ok_or_else(|| anyhow!("target endpoint '{name}' is no longer in rotation"))?,
            None => self
                .registry
                .select_random(&mut self.rng)
                .ok_or_else(|| anyhow!("no endpoints left to fuzz"))?,
        };
        Ok(endpoint.clone())
    }

    async fn send(&self, coid: Coid, outgoing: Outgoing) -> Result<SendResult> {
        let transport = Arc::clone(&self.transport);
        let result = match (self.options.send_mode, outgoing) {
            (_, Outgoing::Pulse { code, value }) => {
                self.blocking(move || {
                    transport
                        .send_pulse(coid, code, value)
                        .map(|()| SendResult::Accepted)
                })
                .await?
            }
            (SendMode::Async, Outgoing::Message(payload)) => {
                self.blocking(move || {
                    transport
                        .send_async(coid, &payload)
                        .map(|()| SendResult::Accepted)
                })
                .await?
            }
            (_, Outgoing::Message(payload)) => {
                self.blocking(move || transport.send_sync(coid, &payload).map(SendResult::Replied))
                    .await?
            }
        };
        Ok(match result {
            None => SendResult::TimedOut,
            Some(Ok(sent)) => sent,
            Some(Err(err)) => SendResult::Failed(err),
        })
    }

    /// Runs a transport call off the async threads. `None` means the bounded
    /// wait expired; the call itself keeps running until the kernel returns.
    async fn blocking<F, O>(&self, call: F) -> Result<Option<O>>
    where
        F: FnOnce() -> O + Send + 'static,
        O: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(call);
        let joined = match self.options.send_timeout {
            None => task.await,
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Ok(None),
            },
        };
        joined.map(Some).context("transport call panicked")
    }

    /// Persists the exact bytes sent and takes the endpoint out of rotation.
    fn record(
        &mut self,
        id: IterationId,
        target: &Endpoint,
        payload: &[u8],
        core: Option<PathBuf>,
    ) -> Result<CrashReport> {
        let artifact = self.store.persist(id, payload).with_context(|| {
            format!("failed to save crashing input for endpoint '{}'", target.name)
        })?;
        let core = core.and_then(|core| match self.store.adopt_core(&core, id) {
            Ok(adopted) => Some(adopted),
            Err(err) => {
                warn!(%id, core = %core.display(), error = %format!("{err:#}"), "failed to adopt core file");
                None
            }
        });
        self.registry.remove(&*self.transport, &target.name);
        Ok(CrashReport {
            id,
            endpoint: target.name.clone(),
            artifact,
            size: payload.len(),
            core,
        })
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
