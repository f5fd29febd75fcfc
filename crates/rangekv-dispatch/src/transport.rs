//! Replica-ordered dispatch of one batch request.
//!
//! A [`Transport`] holds the attempt queue for a single outgoing batch:
//! one binding per candidate replica, health-partitioned and then
//! permuted by the configured ordering. `send_next` dequeues the head
//! binding and dispatches it, delivering exactly one [`BatchOutcome`] on
//! the caller-supplied channel. Remote attempts run on their own task so
//! the caller is never blocked on connection readiness; a colocated
//! replica is served in-process before `send_next` returns.
//!
//! Transports are driven by a single logical caller and carry no internal
//! synchronization of their own state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::batch::{BatchRequest, BatchResponse};
use crate::conn::{ConnState, ConnectionProvider, RangeConnection};
use crate::error::{DispatchError, Result};
use crate::metrics::DispatchMetrics;
use crate::ordering::{apply_ordering, partition_by_health, ReplicaOrdering};
use crate::replica::ReplicaDescriptor;

/// Per-call dispatch policy.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Ordering applied within each health partition.
    pub ordering: ReplicaOrdering,
    /// Bound on each individual attempt, including connection readiness
    /// waiting (default: 5 seconds).
    pub timeout: Duration,
    /// Serve colocated replicas in-process, skipping the connection and
    /// serialization machinery (default: enabled).
    pub local_fast_path: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            ordering: ReplicaOrdering::Stable,
            timeout: Duration::from_secs(5),
            local_fast_path: true,
        }
    }
}

/// Single reply-or-error result of one dispatch attempt.
///
/// Exactly one of `reply` and `error` is populated, so the caller can
/// distinguish "got an answer" from "this replica failed, try the next".
#[derive(Debug)]
pub struct BatchOutcome {
    /// Reply from the replica, if the call produced one.
    pub reply: Option<BatchResponse>,
    /// Attempt-level error; the replica is currently unusable.
    pub error: Option<DispatchError>,
}

impl BatchOutcome {
    /// Wraps a reply in an outcome.
    pub fn from_reply(reply: BatchResponse) -> Self {
        BatchOutcome {
            reply: Some(reply),
            error: None,
        }
    }

    /// Wraps an attempt error in an outcome.
    pub fn from_error(error: DispatchError) -> Self {
        BatchOutcome {
            reply: None,
            error: Some(error),
        }
    }
}

/// One replica paired with its connection handle and stamped request copy.
/// Consumed exactly once by dispatch.
struct AttemptBinding {
    addr: String,
    conn: Arc<dyn RangeConnection>,
    request: BatchRequest,
}

/// Dispatches one batch request to the replicas of a range, one attempt
/// at a time.
///
/// All methods are invoked from a single logical caller; transports are
/// not safe for concurrent use. Calling `send_next` once
/// [`Transport::is_exhausted`] returns true, or after
/// [`Transport::close`], is a usage contract violation and panics.
#[async_trait]
pub trait Transport: Send {
    /// True if there are no more replicas to try.
    fn is_exhausted(&self) -> bool;

    /// Dequeues the next candidate and dispatches the batch to it,
    /// delivering exactly one outcome on `done`. Never blocks on the
    /// network: remote waiting happens on a background task, while a
    /// colocated replica is served before this returns.
    async fn send_next(&mut self, done: oneshot::Sender<BatchOutcome>);

    /// Releases the transport. In-flight attempts are cancelled; no
    /// further outcomes are delivered. Idempotent.
    fn close(&mut self);
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("is_exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Constructs transports from send options, a connection provider, the
/// candidate replica list, and the batch request template.
///
/// The seam where an alternate transport (such as the direct in-process
/// sender) replaces replica dispatch for testing.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Builds a transport for one outgoing batch, or fails with a
    /// construction error.
    async fn create_transport(
        &self,
        opts: SendOptions,
        provider: Arc<dyn ConnectionProvider>,
        replicas: &[ReplicaDescriptor],
        template: &BatchRequest,
    ) -> Result<Box<dyn Transport>>;
}

/// Default factory: dispatches over provider-owned connections.
pub struct DispatchTransportFactory {
    metrics: Arc<DispatchMetrics>,
}

impl DispatchTransportFactory {
    /// Creates a factory with a fresh metrics collector.
    pub fn new() -> Self {
        DispatchTransportFactory {
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Metrics shared by every transport this factory builds.
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }
}

impl Default for DispatchTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for DispatchTransportFactory {
    async fn create_transport(
        &self,
        opts: SendOptions,
        provider: Arc<dyn ConnectionProvider>,
        replicas: &[ReplicaDescriptor],
        template: &BatchRequest,
    ) -> Result<Box<dyn Transport>> {
        if replicas.is_empty() {
            return Err(DispatchError::NoReplicas);
        }

        let mut bindings = Vec::with_capacity(replicas.len());
        for replica in replicas {
            let conn = provider.acquire(&replica.addr).await?;
            bindings.push(AttemptBinding {
                addr: replica.addr.clone(),
                conn,
                request: template.for_replica(replica),
            });
        }

        // Known-unhealthy candidates go last; the strategy only permutes
        // within each partition.
        let healthy = partition_by_health(&mut bindings, |b| provider.is_healthy(&b.addr));
        apply_ordering(&mut bindings, healthy, opts.ordering);

        self.metrics.inc_transports_created();
        Ok(Box::new(DispatchTransport {
            opts,
            provider,
            pending: bindings.into(),
            inflight: Vec::new(),
            closed: false,
            metrics: Arc::clone(&self.metrics),
        }))
    }
}

/// Production transport over an ordered queue of attempt bindings.
pub struct DispatchTransport {
    opts: SendOptions,
    provider: Arc<dyn ConnectionProvider>,
    pending: VecDeque<AttemptBinding>,
    inflight: Vec<JoinHandle<()>>,
    closed: bool,
    metrics: Arc<DispatchMetrics>,
}

#[async_trait]
impl Transport for DispatchTransport {
    fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    async fn send_next(&mut self, done: oneshot::Sender<BatchOutcome>) {
        let binding = self
            .pending
            .pop_front()
            .expect("send_next called on exhausted transport");
        self.metrics.inc_attempts_started();
        tracing::debug!(
            addr = %binding.addr,
            range = %binding.request.range_id,
            replica = %binding.request.replica.replica_id,
            ops = binding.request.ops.len(),
            "dispatching batch attempt"
        );

        if self.opts.local_fast_path {
            if let Some(handler) = self.provider.local_handler(&binding.addr) {
                self.metrics.inc_local_attempts();
                let outcome = match tokio::time::timeout(
                    self.opts.timeout,
                    handler.handle(binding.request),
                )
                .await
                {
                    Ok(Ok(reply)) => BatchOutcome::from_reply(reply),
                    Ok(Err(err)) => BatchOutcome::from_error(err),
                    Err(_) => BatchOutcome::from_error(DispatchError::DeadlineExceeded {
                        addr: binding.addr,
                        timeout_ms: self.opts.timeout.as_millis() as u64,
                    }),
                };
                record_outcome(&self.metrics, &outcome);
                let _ = done.send(outcome);
                return;
            }
        }

        self.metrics.inc_remote_attempts();
        let timeout = self.opts.timeout;
        let metrics = Arc::clone(&self.metrics);
        self.inflight.retain(|handle| !handle.is_finished());
        self.inflight.push(tokio::spawn(async move {
            let outcome = remote_attempt(binding, timeout).await;
            record_outcome(&metrics, &outcome);
            let _ = done.send(outcome);
        }));
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        for handle in self.inflight.drain(..) {
            handle.abort();
        }
        self.metrics.inc_transports_closed();
    }
}

impl Drop for DispatchTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs one remote attempt under its deadline.
async fn remote_attempt(binding: AttemptBinding, timeout: Duration) -> BatchOutcome {
    let addr = binding.addr.clone();
    let timeout_ms = timeout.as_millis() as u64;
    match tokio::time::timeout(timeout, remote_call(binding)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            BatchOutcome::from_error(DispatchError::DeadlineExceeded { addr, timeout_ms })
        }
    }
}

/// Waits for the connection to become ready, then issues the call.
async fn remote_call(binding: AttemptBinding) -> BatchOutcome {
    let mut state = binding.conn.state();
    while state != ConnState::Ready {
        if state == ConnState::Shutdown {
            return BatchOutcome::from_error(DispatchError::ConnectionClosed {
                addr: binding.addr,
            });
        }
        state = match binding.conn.wait_state_change(state).await {
            Ok(next) => next,
            Err(err) => return BatchOutcome::from_error(err),
        };
    }

    match binding.conn.send_batch(&binding.request).await {
        Ok(reply) => BatchOutcome::from_reply(reply),
        Err(err) => {
            tracing::debug!(addr = %binding.addr, error = %err, "batch attempt failed");
            BatchOutcome::from_error(err)
        }
    }
}

fn record_outcome(metrics: &DispatchMetrics, outcome: &BatchOutcome) {
    match &outcome.error {
        Some(err) => {
            metrics.inc_errors_delivered();
            if matches!(err, DispatchError::DeadlineExceeded { .. }) {
                metrics.inc_deadline_exceeded();
            }
        }
        None => metrics.inc_replies_delivered(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::batch::{BatchOp, OpResult};
    use crate::conn::{BatchHandler, ConnStateCell};
    use crate::health::HealthConfig;
    use crate::pool::PeerDirectory;
    use crate::replica::{NodeId, RangeId, ReplicaId};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Connection returning a canned reply, recording the last request.
    struct ScriptedConnection {
        addr: String,
        state: ConnStateCell,
        reply: BatchResponse,
        fail_call: bool,
        seen: Mutex<Option<BatchRequest>>,
    }

    impl ScriptedConnection {
        fn new(addr: &str, state: ConnState, reply: BatchResponse) -> Arc<Self> {
            Arc::new(ScriptedConnection {
                addr: addr.to_string(),
                state: ConnStateCell::new(state),
                reply,
                fail_call: false,
                seen: Mutex::new(None),
            })
        }

        fn failing(addr: &str) -> Arc<Self> {
            Arc::new(ScriptedConnection {
                addr: addr.to_string(),
                state: ConnStateCell::new(ConnState::Ready),
                reply: BatchResponse::default(),
                fail_call: true,
                seen: Mutex::new(None),
            })
        }

        fn seen_request(&self) -> Option<BatchRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RangeConnection for ScriptedConnection {
        fn state(&self) -> ConnState {
            self.state.get()
        }

        async fn wait_state_change(&self, observed: ConnState) -> Result<ConnState> {
            self.state.wait_change(observed).await
        }

        async fn send_batch(&self, request: &BatchRequest) -> Result<BatchResponse> {
            *self.seen.lock().unwrap() = Some(request.clone());
            if self.fail_call {
                return Err(DispatchError::CallFailed {
                    message: "scripted failure".to_string(),
                });
            }
            Ok(self.reply.clone())
        }

        fn peer_addr(&self) -> &str {
            &self.addr
        }
    }

    /// In-process handler returning a canned reply after an optional delay.
    struct ScriptedHandler {
        reply: BatchResponse,
        delay: Duration,
    }

    impl ScriptedHandler {
        fn new(reply: BatchResponse) -> Arc<Self> {
            Arc::new(ScriptedHandler {
                reply,
                delay: Duration::ZERO,
            })
        }

        fn slow(reply: BatchResponse, delay: Duration) -> Arc<Self> {
            Arc::new(ScriptedHandler { reply, delay })
        }
    }

    #[async_trait]
    impl BatchHandler for ScriptedHandler {
        async fn handle(&self, _request: BatchRequest) -> Result<BatchResponse> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.reply.clone())
        }
    }

    fn reply_tagged(tag: &str) -> BatchResponse {
        BatchResponse::with_results(vec![OpResult::Value {
            value: Some(tag.as_bytes().to_vec()),
        }])
    }

    fn template() -> BatchRequest {
        BatchRequest::new(
            RangeId::new(1),
            vec![BatchOp::Get {
                key: b"k".to_vec(),
            }],
        )
    }

    fn replica(n: u64, addr: &str) -> ReplicaDescriptor {
        ReplicaDescriptor::new(NodeId::new(n), ReplicaId::new(n as u32), addr)
    }

    async fn build_transport(
        factory: &DispatchTransportFactory,
        opts: SendOptions,
        directory: &Arc<PeerDirectory>,
        replicas: &[ReplicaDescriptor],
    ) -> Box<dyn Transport> {
        let provider: Arc<dyn ConnectionProvider> = Arc::clone(directory) as _;
        factory
            .create_transport(opts, provider, replicas, &template())
            .await
            .unwrap()
    }

    async fn drain_one(transport: &mut Box<dyn Transport>) -> BatchOutcome {
        let (tx, rx) = oneshot::channel();
        transport.send_next(tx).await;
        rx.await.unwrap()
    }

    fn reply_tag(outcome: &BatchOutcome) -> String {
        match &outcome.reply.as_ref().unwrap().results[0] {
            OpResult::Value { value: Some(v) } => String::from_utf8(v.clone()).unwrap(),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stable_order_puts_unhealthy_last_and_drains() {
        init_tracing();
        let directory = Arc::new(PeerDirectory::with_health_config(HealthConfig {
            failure_threshold: 1,
            recovery_threshold: 1,
        }));
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Ready, reply_tagged("a")));
        directory.register_connection("b", ScriptedConnection::new("b", ConnState::Ready, reply_tagged("b")));
        directory.register_connection("c", ScriptedConnection::new("c", ConnState::Ready, reply_tagged("c")));
        // "a" was recently observed failing.
        directory.health().record_failure("a");

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a"), replica(2, "b"), replica(3, "c")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        assert!(!transport.is_exhausted());
        assert_eq!(reply_tag(&drain_one(&mut transport).await), "b");
        assert!(!transport.is_exhausted());
        assert_eq!(reply_tag(&drain_one(&mut transport).await), "c");
        assert!(!transport.is_exhausted());
        assert_eq!(reply_tag(&drain_one(&mut transport).await), "a");
        assert!(transport.is_exhausted());
    }

    #[tokio::test]
    async fn test_randomized_order_keeps_unhealthy_last() {
        let directory = Arc::new(PeerDirectory::with_health_config(HealthConfig {
            failure_threshold: 1,
            recovery_threshold: 1,
        }));
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Ready, reply_tagged("a")));
        directory.register_connection("b", ScriptedConnection::new("b", ConnState::Ready, reply_tagged("b")));
        directory.register_connection("c", ScriptedConnection::new("c", ConnState::Ready, reply_tagged("c")));
        directory.health().record_failure("c");

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a"), replica(2, "b"), replica(3, "c")];
        let opts = SendOptions {
            ordering: ReplicaOrdering::Randomized,
            ..Default::default()
        };
        let mut transport = build_transport(&factory, opts, &directory, &replicas).await;

        let first = reply_tag(&drain_one(&mut transport).await);
        let second = reply_tag(&drain_one(&mut transport).await);
        let last = reply_tag(&drain_one(&mut transport).await);

        assert!(first == "a" || first == "b");
        assert!(second == "a" || second == "b");
        assert_ne!(first, second);
        assert_eq!(last, "c");
    }

    #[tokio::test]
    async fn test_factory_fails_on_unacquirable_candidate() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Ready, reply_tagged("a")));

        let factory = DispatchTransportFactory::new();
        let provider: Arc<dyn ConnectionProvider> = Arc::clone(&directory) as _;
        let replicas = [replica(1, "a"), replica(2, "gone")];
        let err = factory
            .create_transport(SendOptions::default(), provider, &replicas, &template())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::AcquireFailed { addr } if addr == "gone"
        ));
    }

    #[tokio::test]
    async fn test_factory_rejects_empty_candidates() {
        let directory = Arc::new(PeerDirectory::new());
        let factory = DispatchTransportFactory::new();
        let provider: Arc<dyn ConnectionProvider> = Arc::clone(&directory) as _;
        let err = factory
            .create_transport(SendOptions::default(), provider, &[], &template())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoReplicas));
    }

    #[tokio::test]
    async fn test_request_stamped_per_replica() {
        let directory = Arc::new(PeerDirectory::new());
        let conn_a = ScriptedConnection::new("a", ConnState::Ready, reply_tagged("a"));
        let conn_b = ScriptedConnection::new("b", ConnState::Ready, reply_tagged("b"));
        directory.register_connection("a", Arc::clone(&conn_a) as _);
        directory.register_connection("b", Arc::clone(&conn_b) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a"), replica(2, "b")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        drain_one(&mut transport).await;
        drain_one(&mut transport).await;

        let seen_a = conn_a.seen_request().unwrap();
        let seen_b = conn_b.seen_request().unwrap();
        assert_eq!(seen_a.replica, replicas[0]);
        assert_eq!(seen_b.replica, replicas[1]);
        assert_eq!(seen_a.range_id, RangeId::new(1));
        assert_eq!(seen_a.ops, seen_b.ops);
    }

    #[tokio::test]
    async fn test_local_fast_path_completes_before_send_next_returns() {
        let directory = Arc::new(PeerDirectory::new());
        // Connection deliberately not ready: if dispatch went remote it
        // could not answer without a state transition.
        directory.register_connection("local", ScriptedConnection::new("local", ConnState::Idle, reply_tagged("conn")));
        let handler = ScriptedHandler::new(reply_tagged("handler"));
        directory.register_local_handler("local", Arc::clone(&handler) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "local")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let (tx, mut rx) = oneshot::channel();
        transport.send_next(tx).await;

        // Outcome is already buffered; no await on the receiver needed.
        let outcome = rx.try_recv().unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(reply_tag(&outcome), "handler");

        let snapshot = factory.metrics().snapshot();
        assert_eq!(snapshot.local_attempts, 1);
        assert_eq!(snapshot.remote_attempts, 0);
    }

    #[tokio::test]
    async fn test_local_fast_path_disabled_goes_remote() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("local", ScriptedConnection::new("local", ConnState::Ready, reply_tagged("conn")));
        directory.register_local_handler("local", ScriptedHandler::new(reply_tagged("handler")) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "local")];
        let opts = SendOptions {
            local_fast_path: false,
            ..Default::default()
        };
        let mut transport = build_transport(&factory, opts, &directory, &replicas).await;

        let outcome = drain_one(&mut transport).await;
        assert_eq!(reply_tag(&outcome), "conn");

        let snapshot = factory.metrics().snapshot();
        assert_eq!(snapshot.local_attempts, 0);
        assert_eq!(snapshot.remote_attempts, 1);
    }

    #[tokio::test]
    async fn test_fast_path_only_for_matching_address() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("remote", ScriptedConnection::new("remote", ConnState::Ready, reply_tagged("conn")));
        // Handler serves a different address than the candidate.
        directory.register_local_handler("elsewhere", ScriptedHandler::new(reply_tagged("handler")) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "remote")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let outcome = drain_one(&mut transport).await;
        assert_eq!(reply_tag(&outcome), "conn");
        assert_eq!(factory.metrics().snapshot().remote_attempts, 1);
    }

    #[tokio::test]
    async fn test_local_fast_path_respects_deadline() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("local", ScriptedConnection::new("local", ConnState::Idle, reply_tagged("conn")));
        directory.register_local_handler(
            "local",
            ScriptedHandler::slow(reply_tagged("handler"), Duration::from_secs(30)) as _,
        );

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "local")];
        let opts = SendOptions {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut transport = build_transport(&factory, opts, &directory, &replicas).await;

        let start = Instant::now();
        let outcome = drain_one(&mut transport).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            outcome.error,
            Some(DispatchError::DeadlineExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_readiness_wait_then_call() {
        let directory = Arc::new(PeerDirectory::new());
        let conn = ScriptedConnection::new("a", ConnState::Connecting, reply_tagged("a"));
        directory.register_connection("a", Arc::clone(&conn) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let (tx, rx) = oneshot::channel();
        // Returns immediately; the readiness wait runs on a background task.
        transport.send_next(tx).await;
        conn.state.set(ConnState::Ready);

        let outcome = rx.await.unwrap();
        assert_eq!(reply_tag(&outcome), "a");
    }

    #[tokio::test]
    async fn test_shutdown_connection_fails_attempt() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Shutdown, reply_tagged("a")));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let outcome = drain_one(&mut transport).await;
        assert!(outcome.reply.is_none());
        assert!(matches!(
            outcome.error,
            Some(DispatchError::ConnectionClosed { addr }) if addr == "a"
        ));
    }

    #[tokio::test]
    async fn test_shutdown_during_readiness_wait() {
        let directory = Arc::new(PeerDirectory::new());
        let conn = ScriptedConnection::new("a", ConnState::Connecting, reply_tagged("a"));
        directory.register_connection("a", Arc::clone(&conn) as _);

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let (tx, rx) = oneshot::channel();
        transport.send_next(tx).await;
        conn.state.set(ConnState::Shutdown);

        let outcome = rx.await.unwrap();
        assert!(matches!(
            outcome.error,
            Some(DispatchError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_exceeded_when_never_ready() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Connecting, reply_tagged("a")));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let opts = SendOptions {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut transport = build_transport(&factory, opts, &directory, &replicas).await;

        let start = Instant::now();
        let outcome = drain_one(&mut transport).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            outcome.error,
            Some(DispatchError::DeadlineExceeded { addr, timeout_ms: 50 }) if addr == "a"
        ));
        assert_eq!(factory.metrics().snapshot().deadline_exceeded, 1);
    }

    #[tokio::test]
    async fn test_call_failure_is_error_outcome() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::failing("a"));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let outcome = drain_one(&mut transport).await;
        assert!(outcome.reply.is_none());
        assert!(matches!(outcome.error, Some(DispatchError::CallFailed { .. })));
    }

    #[tokio::test]
    async fn test_failover_to_next_replica() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("dead", ScriptedConnection::new("dead", ConnState::Shutdown, reply_tagged("dead")));
        directory.register_connection("live", ScriptedConnection::new("live", ConnState::Ready, reply_tagged("live")));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "dead"), replica(2, "live")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        // First attempt fails; the caller moves on to the next candidate.
        let first = drain_one(&mut transport).await;
        assert!(first.error.is_some());
        assert!(!transport.is_exhausted());

        let second = drain_one(&mut transport).await;
        assert_eq!(reply_tag(&second), "live");
        assert!(transport.is_exhausted());
    }

    #[tokio::test]
    async fn test_every_outcome_is_reply_xor_error() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("ok", ScriptedConnection::new("ok", ConnState::Ready, reply_tagged("ok")));
        directory.register_connection("bad", ScriptedConnection::failing("bad"));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "ok"), replica(2, "bad")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        for _ in 0..2 {
            let outcome = drain_one(&mut transport).await;
            assert!(outcome.reply.is_some() ^ outcome.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_close_abandons_inflight_attempt() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Connecting, reply_tagged("a")));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        let (tx, rx) = oneshot::channel();
        transport.send_next(tx).await;
        transport.close();
        // Closing twice is a no-op.
        transport.close();

        // The aborted attempt delivers nothing; the sender side is dropped.
        assert!(rx.await.is_err());
        assert!(transport.is_exhausted());
        assert_eq!(factory.metrics().snapshot().transports_closed, 1);
    }

    #[tokio::test]
    #[should_panic(expected = "exhausted")]
    async fn test_send_next_on_exhausted_transport_panics() {
        let directory = Arc::new(PeerDirectory::new());
        directory.register_connection("a", ScriptedConnection::new("a", ConnState::Ready, reply_tagged("a")));

        let factory = DispatchTransportFactory::new();
        let replicas = [replica(1, "a")];
        let mut transport =
            build_transport(&factory, SendOptions::default(), &directory, &replicas).await;

        drain_one(&mut transport).await;
        assert!(transport.is_exhausted());

        let (tx, _rx) = oneshot::channel();
        transport.send_next(tx).await;
    }
}
