//! In-process stand-in for the kernel message-passing layer.
//!
//! Services are registered as plain files under a namespace directory so the
//! same liveness checks that watch `/dev/name/local` on a device work against
//! the simulation. A service "crashes" by losing its namespace entry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{Channel, Coid, Received, Transport, TransportError};

type CrashPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// How a simulated service reacts to a message.
#[derive(Clone)]
pub struct SimService {
    behavior: Behavior,
}

#[derive(Clone)]
enum Behavior {
    Healthy,
    CrashWhen(CrashPredicate),
    Stall(Duration),
}

impl SimService {
    pub fn healthy() -> Self {
        Self {
            behavior: Behavior::Healthy,
        }
    }

    /// Dies (dropping its namespace entry) on the first payload matching `predicate`.
    pub fn crash_when(predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            behavior: Behavior::CrashWhen(Arc::new(predicate)),
        }
    }

    /// Holds every synchronous sender for `delay` before replying.
    pub fn stall(delay: Duration) -> Self {
        Self {
            behavior: Behavior::Stall(delay),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Sync,
    Async,
    Pulse { code: i8, value: i32 },
}

/// One message as the simulated kernel saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub endpoint: String,
    pub kind: SendKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Service(String),
    Squatter(String),
}

impl Route {
    fn name(&self) -> &str {
        match self {
            Route::Service(name) | Route::Squatter(name) => name,
        }
    }
}

enum Delivery {
    Message {
        payload: Vec<u8>,
        reply: mpsc::Sender<()>,
    },
    Pulse,
}

#[derive(Default)]
struct SimState {
    services: HashMap<String, SimService>,
    squatters: HashMap<String, mpsc::Sender<Delivery>>,
    connections: HashMap<Coid, Route>,
    absorbed: HashMap<String, usize>,
    sent: Vec<SentMessage>,
    next_coid: i32,
    next_chid: i32,
}

pub struct SimTransport {
    namespace: PathBuf,
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl SimTransport {
    pub fn new(namespace: impl Into<PathBuf>) -> io::Result<Self> {
        let namespace = namespace.into();
        fs::create_dir_all(&namespace)?;
        Ok(Self {
            namespace,
            state: Arc::new(Mutex::new(SimState {
                next_coid: 3,
                next_chid: 1,
                ..SimState::default()
            })),
        })
    }

    pub fn namespace(&self) -> &Path {
        &self.namespace
    }

    /// Publishes a service entry in the namespace.
    pub fn register(&self, name: &str, service: SimService) -> io::Result<()> {
        fs::write(self.namespace.join(name), b"")?;
        lock(&self.state).services.insert(name.to_string(), service);
        Ok(())
    }

    /// Takes a service down as if its process died.
    pub fn kill(&self, name: &str) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.services.remove(name);
        remove_entry(&self.namespace, name)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Messages and pulses drained by whoever attached `name`.
    pub fn absorbed(&self, name: &str) -> usize {
        lock(&self.state).absorbed.get(name).copied().unwrap_or(0)
    }

    fn record(&self, state: &mut SimState, coid: Coid, kind: SendKind, payload: &[u8]) -> Route {
        let route = state.connections.get(&coid).cloned();
        if let Some(route) = &route {
            state.sent.push(SentMessage {
                endpoint: route.name().to_string(),
                kind,
                payload: payload.to_vec(),
            });
        }
        route.unwrap_or(Route::Service(String::new()))
    }

    /// Applies a service's behavior. Returns the stall to serve outside the lock.
    fn deliver_to_service(
        &self,
        state: &mut SimState,
        name: &str,
        payload: &[u8],
    ) -> io::Result<Option<Duration>> {
        let Some(behavior) = state.services.get(name).map(|service| service.behavior.clone()) else {
            return Err(errno(libc::ESRCH));
        };
        match behavior {
            Behavior::Healthy => Ok(None),
            Behavior::Stall(delay) => Ok(Some(delay)),
            Behavior::CrashWhen(predicate) => {
                if predicate(payload) {
                    debug!(endpoint = name, size = payload.len(), "simulated service crashed");
                    state.services.remove(name);
                    remove_entry(&self.namespace, name)?;
                    return Err(errno(libc::ESRCH));
                }
                Ok(None)
            }
        }
    }
}

fn remove_entry(namespace: &Path, name: &str) -> io::Result<()> {
    match fs::remove_file(namespace.join(name)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

impl Transport for SimTransport {
    type Channel = SimChannel;

    fn open(&self, name: &str) -> Result<Coid, TransportError> {
        let mut state = lock(&self.state);
        let route = if state.squatters.contains_key(name) {
            Route::Squatter(name.to_string())
        } else if state.services.contains_key(name) {
            Route::Service(name.to_string())
        } else {
            return Err(TransportError::Open {
                name: name.to_string(),
                source: errno(libc::ENOENT),
            });
        };
        let coid = Coid(state.next_coid);
        state.next_coid += 1;
        state.connections.insert(coid, route);
        Ok(coid)
    }

    fn close(&self, coid: Coid) -> Result<(), TransportError> {
        match lock(&self.state).connections.remove(&coid) {
            Some(_) => Ok(()),
            None => Err(TransportError::Close {
                coid,
                source: errno(libc::EBADF),
            }),
        }
    }

    fn send_sync(&self, coid: Coid, payload: &[u8]) -> Result<i64, TransportError> {
        let send_err = |source| TransportError::Send { coid, source };
        let mut state = lock(&self.state);
        if !state.connections.contains_key(&coid) {
            return Err(send_err(errno(libc::EBADF)));
        }
        match self.record(&mut state, coid, SendKind::Sync, payload) {
            Route::Squatter(name) => {
                let squatter = state
                    .squatters
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| errno(libc::ESRCH))
                    .map_err(send_err)?;
                drop(state);
                let (reply_tx, reply_rx) = mpsc::channel();
                squatter
                    .send(Delivery::Message {
                        payload: payload.to_vec(),
                        reply: reply_tx,
                    })
                    .map_err(|_| send_err(errno(libc::ESRCH)))?;
                reply_rx.recv().map_err(|_| send_err(errno(libc::ESRCH)))?;
                Ok(0)
            }
            Route::Service(name) => {
                let stall = self
                    .deliver_to_service(&mut state, &name, payload)
                    .map_err(send_err)?;
                drop(state);
                if let Some(delay) = stall {
                    thread::sleep(delay);
                }
                Ok(0)
            }
        }
    }

    fn send_async(&self, coid: Coid, payload: &[u8]) -> Result<(), TransportError> {
        let send_err = |source| TransportError::Send { coid, source };
        let mut state = lock(&self.state);
        if !state.connections.contains_key(&coid) {
            return Err(send_err(errno(libc::EBADF)));
        }
        match self.record(&mut state, coid, SendKind::Async, payload) {
            Route::Squatter(name) => {
                let (reply, _) = mpsc::channel();
                let delivered = state.squatters.get(&name).is_some_and(|squatter| {
                    squatter
                        .send(Delivery::Message {
                            payload: payload.to_vec(),
                            reply,
                        })
                        .is_ok()
                });
                if !delivered {
                    return Err(send_err(errno(libc::ESRCH)));
                }
                Ok(())
            }
            Route::Service(name) => {
                self.deliver_to_service(&mut state, &name, payload)
                    .map_err(send_err)?;
                Ok(())
            }
        }
    }

    fn send_pulse(&self, coid: Coid, code: i8, value: i32) -> Result<(), TransportError> {
        let pulse_err = |source| TransportError::Pulse { coid, source };
        let mut state = lock(&self.state);
        if !state.connections.contains_key(&coid) {
            return Err(pulse_err(errno(libc::EBADF)));
        }
        match self.record(&mut state, coid, SendKind::Pulse { code, value }, &[]) {
            Route::Squatter(name) => {
                let delivered = state
                    .squatters
                    .get(&name)
                    .is_some_and(|squatter| squatter.send(Delivery::Pulse).is_ok());
                if !delivered {
                    return Err(pulse_err(errno(libc::ESRCH)));
                }
                Ok(())
            }
            Route::Service(name) => {
                if state.services.contains_key(&name) {
                    Ok(())
                } else {
                    Err(pulse_err(errno(libc::ESRCH)))
                }
            }
        }
    }

    fn attach(&self, name: &str) -> Result<SimChannel, TransportError> {
        let attach_err = |source| TransportError::Attach {
            name: name.to_string(),
            source,
        };
        let mut state = lock(&self.state);
        if state.services.contains_key(name) || state.squatters.contains_key(name) {
            return Err(attach_err(errno(libc::EEXIST)));
        }
        fs::write(self.namespace.join(name), b"").map_err(attach_err)?;
        let (tx, rx) = mpsc::channel();
        state.squatters.insert(name.to_string(), tx);
        let chid = state.next_chid;
        state.next_chid += 1;
        Ok(SimChannel {
            chid,
            name: name.to_string(),
            rx,
            pending: HashMap::new(),
            next_rcvid: 1,
            state: Arc::clone(&self.state),
        })
    }
}

pub struct SimChannel {
    chid: i32,
    name: String,
    rx: mpsc::Receiver<Delivery>,
    pending: HashMap<i32, mpsc::Sender<()>>,
    next_rcvid: i32,
    state: Arc<Mutex<SimState>>,
}

impl Channel for SimChannel {
    fn chid(&self) -> i32 {
        self.chid
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Received, TransportError> {
        let delivery = self.rx.recv().map_err(|_| TransportError::Receive {
            chid: self.chid,
            source: errno(libc::EINTR),
        })?;
        match delivery {
            Delivery::Pulse => Ok(Received::Pulse),
            Delivery::Message { payload, reply } => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                let rcvid = self.next_rcvid;
                self.next_rcvid += 1;
                self.pending.insert(rcvid, reply);
                Ok(Received::Message { rcvid, len })
            }
        }
    }

    fn discard(&mut self, received: Received) -> Result<(), TransportError> {
        *lock(&self.state).absorbed.entry(self.name.clone()).or_default() += 1;
        let Received::Message { rcvid, .. } = received else {
            return Ok(());
        };
        let reply = self.pending.remove(&rcvid).ok_or_else(|| TransportError::Reply {
            rcvid,
            source: errno(libc::ESRCH),
        })?;
        // An async sender never waits for the reply.
        let _ = reply.send(());
        Ok(())
    }
}

#[cfg(test)]
#[path = "sim_tests.rs"]
mod tests;
