//! Physical-transport and multiplexer contracts (spec.md §6.2).
//!
//! `PhysicalAddress` is opaque and per-transport; the routing layer is
//! generic over it. An in-memory reference transport is provided for
//! tests and single-process deployments, modeled after the
//! connect/send/receive shape of the teacher's uplink session
//! (`services/forwarder/src/uplink.rs`) generalized behind a trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("remote address is unreachable")]
    Unreachable,
    #[error("transport closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// A best-effort, byte-oriented send/receive channel (spec.md §6.2).
/// `Send` is fire-and-forget; `Receive` yields the next inbound message
/// along with the sender's address.
#[async_trait]
pub trait PhysicalTransport<A>: Send + Sync {
    async fn send(&self, message: Bytes, remote: &A) -> Result<(), TransportError>;
    async fn receive(&self) -> Result<(Bytes, A), TransportError>;
}

/// Splits one physical transport into sub-endpoints keyed by a
/// demultiplexer key, so several Route Endpoints in the same process can
/// share one wire (spec.md §4.6 "multiplexed physical endpoint").
pub trait Multiplexer<A> {
    type Endpoint: PhysicalTransport<A>;

    /// Obtain the sub-endpoint for `key`, creating it if this is the
    /// first request. Messages the multiplexer cannot attribute to any
    /// registered key are dropped.
    fn sub_endpoint(&self, key: &str) -> Self::Endpoint;
}

type Inbox<A> = mpsc::UnboundedSender<(Bytes, A)>;

/// An in-process "network" of nodes addressed by `A`, each with one
/// inbound mailbox. Used to back [`InMemoryTransport`] instances that
/// exchange messages without a real socket.
#[derive(Clone)]
pub struct InMemoryNetwork<A> {
    nodes: Arc<RwLock<HashMap<A, Inbox<A>>>>,
}

impl<A> Default for InMemoryNetwork<A> {
    fn default() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<A> InMemoryNetwork<A>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network under `local`, returning a transport handle for
    /// that address. Joining the same address twice replaces the
    /// previous handle's mailbox registration.
    pub fn join(&self, local: A) -> InMemoryTransport<A> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.write().unwrap().insert(local.clone(), tx);
        InMemoryTransport {
            local,
            nodes: self.nodes.clone(),
            inbox: AsyncMutex::new(rx),
        }
    }
}

/// One node's handle onto an [`InMemoryNetwork`].
pub struct InMemoryTransport<A> {
    local: A,
    nodes: Arc<RwLock<HashMap<A, Inbox<A>>>>,
    inbox: AsyncMutex<mpsc::UnboundedReceiver<(Bytes, A)>>,
}

#[async_trait]
impl<A> PhysicalTransport<A> for InMemoryTransport<A>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
{
    async fn send(&self, message: Bytes, remote: &A) -> Result<(), TransportError> {
        let tx = {
            let nodes = self.nodes.read().unwrap();
            nodes.get(remote).cloned()
        };
        match tx {
            Some(tx) => tx
                .send((message, self.local.clone()))
                .map_err(|_| TransportError::Unreachable),
            None => Err(TransportError::Unreachable),
        }
    }

    async fn receive(&self) -> Result<(Bytes, A), TransportError> {
        let mut rx = self.inbox.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }
}

/// Multiplexes an [`InMemoryTransport`] across several demux keys by
/// running a background pump task that inspects each inbound message
/// with a caller-supplied key extractor (the routing layer's header
/// parser) and forwards it to the matching sub-endpoint's queue.
pub struct InMemoryMultiplexer<A> {
    transport: Arc<InMemoryTransport<A>>,
    subs: Arc<RwLock<HashMap<String, Inbox<A>>>>,
    pump: JoinHandle<()>,
}

impl<A> InMemoryMultiplexer<A>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new<F>(transport: InMemoryTransport<A>, key_of: F) -> Self
    where
        F: Fn(&[u8]) -> Option<String> + Send + Sync + 'static,
    {
        let transport = Arc::new(transport);
        let subs: Arc<RwLock<HashMap<String, Inbox<A>>>> = Arc::new(RwLock::new(HashMap::new()));

        let pump_transport = transport.clone();
        let pump_subs = subs.clone();
        let pump = tokio::spawn(async move {
            loop {
                match pump_transport.receive().await {
                    Ok((msg, from)) => {
                        let Some(key) = key_of(&msg) else {
                            tracing::debug!("dropping inbound message with no demux key");
                            continue;
                        };
                        let tx = pump_subs.read().unwrap().get(&key).cloned();
                        match tx {
                            Some(tx) => {
                                let _ = tx.send((msg, from));
                            }
                            None => tracing::debug!(key, "dropping message for unregistered sub-endpoint"),
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Self { transport, subs, pump }
    }
}

impl<A> Drop for InMemoryMultiplexer<A> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl<A> Multiplexer<A> for InMemoryMultiplexer<A>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
{
    type Endpoint = SubEndpoint<A>;

    fn sub_endpoint(&self, key: &str) -> Self::Endpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.write().unwrap().insert(key.to_owned(), tx);
        SubEndpoint {
            transport: self.transport.clone(),
            inbox: AsyncMutex::new(rx),
        }
    }
}

/// A single demux key's view onto a shared [`InMemoryTransport`].
pub struct SubEndpoint<A> {
    transport: Arc<InMemoryTransport<A>>,
    inbox: AsyncMutex<mpsc::UnboundedReceiver<(Bytes, A)>>,
}

#[async_trait]
impl<A> PhysicalTransport<A> for SubEndpoint<A>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
{
    async fn send(&self, message: Bytes, remote: &A) -> Result<(), TransportError> {
        self.transport.send(message, remote).await
    }

    async fn receive(&self) -> Result<(Bytes, A), TransportError> {
        let mut rx = self.inbox.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }
}
