//! Route Endpoint: the per-logical-endpoint request/reply state machine
//! (spec.md §4.6). Generic over the physical address type `A` and the
//! coordination store `S`; the physical transport is erased behind a
//! trait object since only one concrete transport is ever bound to a
//! single endpoint at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use fab_proto::{Header, MessageType};
use fab_registry::{AddressCodec, EndpointMap};
use fab_store::{CoordinationStore, SessionHandle};
use fab_transport::PhysicalTransport;
use fab_types::EndpointAddress;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::RouteResult;

const INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const MAX_BACKOFF: Duration = Duration::from_secs(12);
const REPLICA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error(transparent)]
    Transport(#[from] fab_transport::TransportError),
    #[error(transparent)]
    Registry(#[from] fab_registry::RegistryError),
}

#[derive(Debug, Clone)]
enum WaiterSignal {
    Response { handled: bool, payload: Bytes },
    CancelAck,
    Misrouted,
    Disposed,
}

/// One dequeued inbound request, per spec.md §4.6.2 `Receive`.
pub struct InboundRequest<A> {
    pub payload: Bytes,
    pub remote_endpoint: EndpointAddress,
    pub remote_address: A,
    pub cancel_token: CancellationToken,
    reply: ReplyHandle<A>,
}

impl<A> InboundRequest<A> {
    #[must_use]
    pub fn reply(&self) -> &ReplyHandle<A> {
        &self.reply
    }
}

/// Outcome of a [`RouteEndpoint::receive`] call.
pub enum ReceiveOutcome<A> {
    Request(InboundRequest<A>),
    Cancelled,
    Disposed,
}

/// The reply capability handed back with each dequeued [`InboundRequest`].
pub struct ReplyHandle<A> {
    transport: Arc<dyn PhysicalTransport<A> + Send + Sync>,
    local_endpoint: EndpointAddress,
    remote_endpoint: EndpointAddress,
    remote_address: A,
    inbound_seq: i32,
    seq_counter: Arc<AtomicI32>,
    cancellation_table: CancellationTable<A>,
    cancellation_key: (EndpointAddress, A, i32),
}

impl<A> ReplyHandle<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub async fn send_result(&self, handled: bool, payload: Bytes) -> Result<(), RoutingError> {
        self.send_frame(MessageType::Response, handled, payload).await
    }

    pub async fn send_ack(&self) -> Result<(), RoutingError> {
        self.send_frame(MessageType::Response, false, Bytes::new()).await
    }

    pub async fn send_cancellation(&self) -> Result<(), RoutingError> {
        self.send_frame(MessageType::CancellationResponse, false, Bytes::new()).await
    }

    async fn send_frame(&self, message_type: MessageType, handled: bool, payload: Bytes) -> Result<(), RoutingError> {
        let header = Header {
            message_type,
            handled,
            seq_num: self.seq_counter.fetch_add(1, Ordering::Relaxed),
            corr: self.inbound_seq,
            tx_endpoint: self.local_endpoint.clone(),
            rx_endpoint: self.remote_endpoint.clone(),
        };
        let frame = encode_frame(&header, &payload);
        let result = self.transport.send(frame, &self.remote_address).await;
        // This reply is terminal either way: the request is Replied or
        // Cancelled, so its cancellation-table entry is done (spec.md §8
        // scenario 1's postcondition).
        self.cancellation_table.lock().unwrap().remove(&self.cancellation_key);
        result?;
        Ok(())
    }
}

type ResponseTable = Arc<StdMutex<HashMap<i32, mpsc::UnboundedSender<WaiterSignal>>>>;
type CancellationTable<A> = Arc<StdMutex<HashMap<(EndpointAddress, A, i32), CancellationToken>>>;

/// The per-logical-endpoint request/reply state machine (spec.md §4.6).
pub struct RouteEndpoint<A, S> {
    endpoint: EndpointAddress,
    local_address: A,
    transport: Arc<dyn PhysicalTransport<A> + Send + Sync>,
    endpoint_map: EndpointMap<S, A>,
    scheduler: Arc<dyn fab_scheduler::EndpointScheduler<A> + Send + Sync>,
    seq: Arc<AtomicI32>,
    response_table: ResponseTable,
    cancellation_table: CancellationTable<A>,
    receive_tx: mpsc::UnboundedSender<InboundRequest<A>>,
    receive_rx: AsyncMutex<mpsc::UnboundedReceiver<InboundRequest<A>>>,
    disposal: CancellationToken,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl<A, S> RouteEndpoint<A, S>
where
    A: AddressCodec + 'static,
    S: CoordinationStore + Send + Sync + 'static,
{
    /// Creates the endpoint, maps it (`endpoint -> local_address`) in the
    /// registry, and starts its background receive loop.
    pub async fn create(
        endpoint: EndpointAddress,
        local_address: A,
        transport: Arc<dyn PhysicalTransport<A> + Send + Sync>,
        store: Arc<S>,
        session: SessionHandle,
        scheduler: Arc<dyn fab_scheduler::EndpointScheduler<A> + Send + Sync>,
    ) -> Result<Arc<Self>, RoutingError> {
        let endpoint_map = EndpointMap::new(store, session);
        endpoint_map.map(&endpoint, &local_address).await?;

        let (receive_tx, receive_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            endpoint,
            local_address,
            transport,
            endpoint_map,
            scheduler,
            seq: Arc::new(AtomicI32::new(1)),
            response_table: Arc::new(StdMutex::new(HashMap::new())),
            cancellation_table: Arc::new(StdMutex::new(HashMap::new())),
            receive_tx,
            receive_rx: AsyncMutex::new(receive_rx),
            disposal: CancellationToken::new(),
            loop_handle: StdMutex::new(None),
        });

        let loop_this = this.clone();
        let handle = tokio::spawn(async move { loop_this.receive_loop().await });
        *this.loop_handle.lock().unwrap() = Some(handle);

        Ok(this)
    }

    #[must_use]
    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    fn next_seq(&self) -> i32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    // -----------------------------------------------------------------
    // Receive loop (spec.md §4.6.3)
    // -----------------------------------------------------------------

    async fn receive_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.disposal.cancelled() => break,
                result = self.transport.receive() => {
                    match result {
                        Ok((raw, remote_address)) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.handle_inbound(raw, remote_address).await });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, endpoint = %self.endpoint, "physical transport receive failed, stopping loop");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_inbound(self: Arc<Self>, raw: Bytes, remote_address: A) {
        let (header, rest) = match Header::decode(&raw) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(error = %e, "dropping frame with unparseable header");
                return;
            }
        };
        let consumed = raw.len() - rest.len();
        let payload = raw.slice(consumed..);

        if header.rx_endpoint != self.endpoint {
            self.send_misrouted(&header, &remote_address).await;
            return;
        }

        match header.message_type {
            MessageType::Request => self.handle_request(header, payload, remote_address),
            MessageType::Response => self.handle_response(&header, payload),
            MessageType::CancellationRequest => self.handle_cancellation_request(header, remote_address),
            MessageType::CancellationResponse => self.handle_cancellation_response(&header),
            MessageType::Misrouted => self.handle_misrouted(&header),
            other => {
                tracing::debug!(?other, "dropping frame with unexpected or negative message type");
            }
        }
    }

    async fn send_misrouted(&self, header: &Header, remote_address: &A) {
        let reply = Header {
            message_type: MessageType::Misrouted,
            handled: false,
            seq_num: self.next_seq(),
            corr: header.seq_num,
            tx_endpoint: self.endpoint.clone(),
            rx_endpoint: header.tx_endpoint.clone(),
        };
        let frame = encode_frame(&reply, &Bytes::new());
        let _ = self.transport.send(frame, remote_address).await;
    }

    fn handle_request(&self, header: Header, payload: Bytes, remote_address: A) {
        let token = CancellationToken::new();
        let key = (header.tx_endpoint.clone(), remote_address.clone(), header.seq_num);
        self.cancellation_table.lock().unwrap().insert(key.clone(), token.clone());

        let reply = ReplyHandle {
            transport: self.transport.clone(),
            local_endpoint: self.endpoint.clone(),
            remote_endpoint: header.tx_endpoint.clone(),
            remote_address: remote_address.clone(),
            inbound_seq: header.seq_num,
            seq_counter: self.seq.clone(),
            cancellation_table: self.cancellation_table.clone(),
            cancellation_key: key,
        };

        let inbound = InboundRequest {
            payload,
            remote_endpoint: header.tx_endpoint,
            remote_address,
            cancel_token: token,
            reply,
        };

        if self.receive_tx.send(inbound).is_err() {
            tracing::debug!("receive queue closed, dropping inbound request");
        }
    }

    fn handle_response(&self, header: &Header, payload: Bytes) {
        let waiter = self.response_table.lock().unwrap().get(&header.corr).cloned();
        if let Some(tx) = waiter {
            let _ = tx.send(WaiterSignal::Response {
                handled: header.handled,
                payload,
            });
        }
    }

    fn handle_cancellation_request(&self, header: Header, remote_address: A) {
        let key = (header.tx_endpoint, remote_address, header.corr);
        if let Some(token) = self.cancellation_table.lock().unwrap().get(&key) {
            token.cancel();
        }
    }

    fn handle_cancellation_response(&self, header: &Header) {
        let waiter = self.response_table.lock().unwrap().get(&header.corr).cloned();
        if let Some(tx) = waiter {
            let _ = tx.send(WaiterSignal::CancelAck);
        }
    }

    /// A peer rejected our frame because it doesn't own `rx_endpoint`
    /// (spec.md §4.6.6). Distinct from the §4.6.3 step 6 log-and-drop
    /// set: this resolves the originator's waiter instead of just logging.
    fn handle_misrouted(&self, header: &Header) {
        let waiter = self.response_table.lock().unwrap().get(&header.corr).cloned();
        if let Some(tx) = waiter {
            let _ = tx.send(WaiterSignal::Misrouted);
        }
    }

    // -----------------------------------------------------------------
    // Send / SendTo (spec.md §4.6.2)
    // -----------------------------------------------------------------

    /// Multi-replica send with resolution backoff and per-replica
    /// failover (spec.md §4.6.2 `Send`).
    pub async fn send(&self, payload: Bytes, remote_endpoint: &EndpointAddress, cancel: CancellationToken) -> RouteResult {
        let addresses = match self.resolve_with_backoff(remote_endpoint, &cancel).await {
            Some(v) => v,
            None => return RouteResult::Cancelled,
        };
        let ordered = self.scheduler.order(&addresses);
        self.fan_out(payload, remote_endpoint.clone(), ordered, cancel).await
    }

    /// Single-replica send: no resolution, no failover, identical
    /// request/response/cancel semantics (spec.md §4.6.2 `SendTo`).
    pub async fn send_to(
        &self,
        payload: Bytes,
        remote_endpoint: &EndpointAddress,
        remote_address: &A,
        cancel: CancellationToken,
    ) -> RouteResult {
        let seq = self.next_seq();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.response_table.lock().unwrap().insert(seq, tx);

        let header = Header {
            message_type: MessageType::Request,
            handled: false,
            seq_num: seq,
            corr: 0,
            tx_endpoint: self.endpoint.clone(),
            rx_endpoint: remote_endpoint.clone(),
        };
        let frame = encode_frame(&header, &payload);
        if self.transport.send(frame, remote_address).await.is_err() {
            self.response_table.lock().unwrap().remove(&seq);
            return RouteResult::TransportFailed;
        }

        let result = tokio::select! {
            () = cancel.cancelled() => RouteResult::Cancelled,
            () = self.disposal.cancelled() => RouteResult::Disposed,
            signal = rx.recv() => match signal {
                Some(WaiterSignal::Response { handled: true, payload }) => RouteResult::Handled(payload),
                Some(WaiterSignal::Response { handled: false, payload }) => RouteResult::Unhandled(payload),
                Some(WaiterSignal::CancelAck) | None => RouteResult::Cancelled,
                Some(WaiterSignal::Misrouted) => RouteResult::Misrouted,
                Some(WaiterSignal::Disposed) => RouteResult::Disposed,
            },
        };

        self.response_table.lock().unwrap().remove(&seq);
        if matches!(result, RouteResult::Cancelled) {
            self.broadcast_cancellation(seq, remote_endpoint, std::slice::from_ref(remote_address))
                .await;
        }
        result
    }

    async fn resolve_with_backoff(&self, remote_endpoint: &EndpointAddress, cancel: &CancellationToken) -> Option<Vec<A>> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if let Ok(set) = self.endpoint_map.get_maps(remote_endpoint).await {
                if !set.is_empty() {
                    return Some(set.into_iter().collect());
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = self.disposal.cancelled() => return None,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn fan_out(
        &self,
        payload: Bytes,
        remote_endpoint: EndpointAddress,
        addresses: Vec<A>,
        cancel: CancellationToken,
    ) -> RouteResult {
        if addresses.is_empty() {
            return RouteResult::Unhandled(Bytes::new());
        }

        let seq = self.next_seq();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.response_table.lock().unwrap().insert(seq, tx);

        let mut sent_to: Vec<A> = Vec::new();

        if self
            .send_request_frame(seq, &remote_endpoint, &addresses[0], &payload)
            .await
        {
            sent_to.push(addresses[0].clone());
        }
        let mut idx = 1usize;
        // Last non-terminal outcome observed from any replica, returned if
        // every replica is exhausted without a `Handled` response (spec.md
        // §4.6.2 step 5: "the last received response, possibly with
        // handled=false"), rather than discarding it for an empty result.
        let mut last_unhandled: Option<RouteResult> = None;

        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break RouteResult::Cancelled,
                () = self.disposal.cancelled() => break RouteResult::Disposed,
                signal = rx.recv() => match signal {
                    Some(WaiterSignal::Response { handled: true, payload }) => break RouteResult::Handled(payload),
                    Some(WaiterSignal::Response { handled: false, payload }) => {
                        last_unhandled = Some(RouteResult::Unhandled(payload.clone()));
                        if idx < addresses.len() {
                            if self.send_request_frame(seq, &remote_endpoint, &addresses[idx], &payload).await {
                                sent_to.push(addresses[idx].clone());
                            }
                            idx += 1;
                        } else {
                            break RouteResult::Unhandled(payload);
                        }
                    }
                    Some(WaiterSignal::Misrouted) => {
                        last_unhandled = Some(RouteResult::Misrouted);
                        if idx < addresses.len() {
                            if self.send_request_frame(seq, &remote_endpoint, &addresses[idx], &payload).await {
                                sent_to.push(addresses[idx].clone());
                            }
                            idx += 1;
                        } else {
                            break RouteResult::Misrouted;
                        }
                    }
                    Some(WaiterSignal::CancelAck) | None => break RouteResult::Cancelled,
                    Some(WaiterSignal::Disposed) => break RouteResult::Disposed,
                },
                () = tokio::time::sleep(REPLICA_TIMEOUT) => {
                    if idx < addresses.len() {
                        if self.send_request_frame(seq, &remote_endpoint, &addresses[idx], &payload).await {
                            sent_to.push(addresses[idx].clone());
                        }
                        idx += 1;
                    } else {
                        break last_unhandled.take().unwrap_or(RouteResult::Unhandled(Bytes::new()));
                    }
                }
            }
        };

        self.response_table.lock().unwrap().remove(&seq);
        if matches!(result, RouteResult::Cancelled) {
            self.broadcast_cancellation(seq, &remote_endpoint, &sent_to).await;
        }
        result
    }

    async fn send_request_frame(&self, seq: i32, remote_endpoint: &EndpointAddress, address: &A, payload: &Bytes) -> bool {
        let header = Header {
            message_type: MessageType::Request,
            handled: false,
            seq_num: seq,
            corr: 0,
            tx_endpoint: self.endpoint.clone(),
            rx_endpoint: remote_endpoint.clone(),
        };
        let frame = encode_frame(&header, payload);
        self.transport.send(frame, address).await.is_ok()
    }

    async fn broadcast_cancellation(&self, seq: i32, remote_endpoint: &EndpointAddress, addresses: &[A]) {
        let header = Header {
            message_type: MessageType::CancellationRequest,
            handled: false,
            seq_num: self.next_seq(),
            corr: seq,
            tx_endpoint: self.endpoint.clone(),
            rx_endpoint: remote_endpoint.clone(),
        };
        let frame = encode_frame(&header, &Bytes::new());
        for addr in addresses {
            let _ = self.transport.send(frame.clone(), addr).await;
        }
    }

    // -----------------------------------------------------------------
    // Receive / Close
    // -----------------------------------------------------------------

    pub async fn receive(&self, cancel: CancellationToken) -> ReceiveOutcome<A> {
        let mut rx = self.receive_rx.lock().await;
        tokio::select! {
            () = cancel.cancelled() => ReceiveOutcome::Cancelled,
            () = self.disposal.cancelled() => ReceiveOutcome::Disposed,
            item = rx.recv() => match item {
                Some(req) => ReceiveOutcome::Request(req),
                None => ReceiveOutcome::Disposed,
            },
        }
    }

    /// Unmaps the endpoint, stops the receive loop, and resolves every
    /// outstanding response-waiter with `Disposed` (spec.md §4.6.2
    /// `Close`).
    pub async fn close(&self) {
        self.disposal.cancel();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(e) = self.endpoint_map.unmap(&self.endpoint, &self.local_address).await {
            tracing::warn!(error = %e, endpoint = %self.endpoint, "failed to unmap endpoint on close");
        }
        let waiters: Vec<_> = self.response_table.lock().unwrap().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(WaiterSignal::Disposed);
        }
        self.cancellation_table.lock().unwrap().clear();
    }
}

fn encode_frame(header: &Header, payload: &Bytes) -> Bytes {
    let encoded_header = header.encode();
    let mut buf = BytesMut::with_capacity(encoded_header.len() + payload.len());
    buf.extend_from_slice(&encoded_header);
    buf.extend_from_slice(payload);
    buf.freeze()
}
