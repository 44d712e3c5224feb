//! Event intake boundary
//!
//! Synchronous request/response wrapper around the aggregator. Every call
//! produces an [`IntakeResponse`]; malformed bodies, rejected events,
//! event-log failures and timeouts all become `ok: false` with a message.
//! Nothing is thrown across the boundary, and a failure is logged.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregator::{EventAggregator, EventLog, EventRequest, MemoryEventLog};

/// Default upper bound on one intake call.
pub const DEFAULT_INTAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Success/failure reply of the intake boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeResponse {
    /// Whether the event was accepted
    pub ok: bool,
    /// Reason for rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntakeResponse {
    /// Accepted.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Rejected with a reason.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// Intake endpoint over a shared aggregator.
pub struct EventIntake<L: EventLog = MemoryEventLog> {
    aggregator: Arc<EventAggregator<L>>,
    timeout: Duration,
}

impl<L: EventLog> EventIntake<L> {
    /// Create an intake with the default timeout.
    #[must_use]
    pub const fn new(aggregator: Arc<EventAggregator<L>>) -> Self {
        Self {
            aggregator,
            timeout: DEFAULT_INTAKE_TIMEOUT,
        }
    }

    /// Bound each call by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record one event.
    pub async fn handle(&self, request: EventRequest) -> IntakeResponse {
        let experiment_id = request.experiment_id.clone();
        let variant_id = request.variant_id.clone();

        match tokio::time::timeout(self.timeout, self.aggregator.record(request)).await {
            Ok(Ok(recorded)) => {
                debug!(
                    experiment_id = %experiment_id,
                    variant_id = %variant_id,
                    ?recorded,
                    "event accepted"
                );
                IntakeResponse::accepted()
            }
            Ok(Err(e)) => {
                warn!(
                    experiment_id = %experiment_id,
                    variant_id = %variant_id,
                    error = %e,
                    "event rejected"
                );
                IntakeResponse::rejected(e.to_string())
            }
            Err(_) => {
                warn!(
                    experiment_id = %experiment_id,
                    timeout_ms = self.timeout.as_millis(),
                    "event intake timed out"
                );
                IntakeResponse::rejected(format!(
                    "event intake timed out after {} ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }

    /// Record one event from a JSON body
    /// (`{"experimentId", "variantId", "sessionKey", "kind", "subtype"?, "metadata"?}`).
    pub async fn handle_json(&self, body: &str) -> IntakeResponse {
        match serde_json::from_str::<EventRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "malformed intake body");
                IntakeResponse::rejected(format!("malformed request: {e}"))
            }
        }
    }
}
