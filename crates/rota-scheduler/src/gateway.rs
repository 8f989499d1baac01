//! Outbound side-effect boundary for job bodies.
//!
//! Bodies that talk to the outside world go through [`SendGateway`], which
//! splits failures into connection-level (the remote end was unreachable,
//! worth retrying) and server-level (the remote end answered with an
//! error, not worth retrying).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::body::{BodyError, JobBody, JobContext};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Could not reach the remote end at all.
    #[error("connection error: {0}")]
    Connection(String),
    /// The remote end answered with an error.
    #[error("gateway rejected the request: {0}")]
    Server(String),
}

/// Waits between retries of a connection failure. After the last wait one
/// final attempt is made and its result propagates.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(300),
    Duration::from_secs(1800),
];

#[async_trait]
pub trait SendGateway: Send + Sync {
    async fn send(&self, operation: &str, payload: &Value)
        -> std::result::Result<Value, GatewayError>;
}

/// Retry connection failures on the [`RETRY_BACKOFF`] schedule. Server
/// errors and successes return immediately.
pub async fn send_with_retries(
    gateway: &dyn SendGateway,
    operation: &str,
    payload: &Value,
) -> std::result::Result<Value, GatewayError> {
    for (attempt, wait) in RETRY_BACKOFF.iter().enumerate() {
        match gateway.send(operation, payload).await {
            Err(GatewayError::Connection(reason)) => {
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    wait_secs = wait.as_secs(),
                    %reason,
                    "gateway unreachable; backing off"
                );
                tokio::time::sleep(*wait).await;
            }
            outcome => return outcome,
        }
    }
    gateway.send(operation, payload).await
}

/// Job body that forwards its arguments to the gateway.
///
/// Expects args of the form `{"operation": "...", "payload": {...}}`.
/// A gateway failure is noted on the job's issue list before it
/// propagates into the exception record.
pub struct SendJobBody {
    gateway: Arc<dyn SendGateway>,
}

impl SendJobBody {
    pub fn new(gateway: Arc<dyn SendGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl JobBody for SendJobBody {
    async fn run(
        &self,
        ctx: &JobContext,
        args: &Value,
    ) -> std::result::Result<(), BodyError> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .ok_or("send job args missing 'operation'")?;
        let payload = args.get("payload").cloned().unwrap_or(Value::Null);

        match send_with_retries(self.gateway.as_ref(), operation, &payload).await {
            Ok(_) => Ok(()),
            Err(e) => {
                ctx.add_issue(&json!({
                    "operation": operation,
                    "error": e.to_string(),
                }))?;
                Err(Box::new(e))
            }
        }
    }
}
