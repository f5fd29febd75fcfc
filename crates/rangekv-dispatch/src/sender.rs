//! Direct-to-handler transport for exercising routing logic without a
//! replica set or connection stack.
//!
//! `HandlerTransport` hands the batch straight to one in-process
//! [`BatchHandler`], permitting exactly one send. Useful for tests that
//! drive the dispatch caller without standing up peers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::batch::{BatchRequest, BatchResponse, ReplyError};
use crate::conn::{BatchHandler, ConnectionProvider};
use crate::error::{DispatchError, Result};
use crate::replica::ReplicaDescriptor;
use crate::transport::{BatchOutcome, SendOptions, Transport, TransportFactory};

/// Factory producing [`HandlerTransport`]s bound to one handler.
pub struct HandlerTransportFactory {
    handler: Arc<dyn BatchHandler>,
}

impl HandlerTransportFactory {
    /// Creates a factory that routes every batch to `handler`.
    pub fn new(handler: Arc<dyn BatchHandler>) -> Self {
        HandlerTransportFactory { handler }
    }
}

#[async_trait]
impl TransportFactory for HandlerTransportFactory {
    async fn create_transport(
        &self,
        _opts: SendOptions,
        _provider: Arc<dyn ConnectionProvider>,
        _replicas: &[ReplicaDescriptor],
        template: &BatchRequest,
    ) -> Result<Box<dyn Transport>> {
        Ok(Box::new(HandlerTransport {
            handler: Arc::clone(&self.handler),
            request: template.clone(),
            called: false,
        }))
    }
}

/// Transport that bypasses replica iteration and calls one handler.
pub struct HandlerTransport {
    handler: Arc<dyn BatchHandler>,
    request: BatchRequest,
    called: bool,
}

#[async_trait]
impl Transport for HandlerTransport {
    fn is_exhausted(&self) -> bool {
        self.called
    }

    async fn send_next(&mut self, done: oneshot::Sender<BatchOutcome>) {
        assert!(!self.called, "send_next called on exhausted transport");
        self.called = true;

        let span = tracing::info_span!(
            "handler_batch",
            range = %self.request.range_id,
            ops = self.request.ops.len()
        );
        let result = self
            .handler
            .handle(self.request.clone())
            .instrument(span)
            .await;

        let outcome = match result {
            Ok(reply) => {
                if reply.error.is_some() {
                    // Handlers report failure through the call result; a
                    // pre-populated reply error slot means both channels
                    // would end up set.
                    BatchOutcome::from_error(DispatchError::ContractViolation {
                        reason: "handler reply arrived with its error slot already populated"
                            .to_string(),
                    })
                } else {
                    BatchOutcome::from_reply(reply)
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "handler batch failed");
                let mut reply = BatchResponse::default();
                reply.error = Some(ReplyError::from(&err));
                BatchOutcome::from_reply(reply)
            }
        };
        let _ = done.send(outcome);
    }

    fn close(&mut self) {}
}
