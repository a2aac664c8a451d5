//! Urgent-transfer transport stub.
//!
//! The production transport notifies the on-call number through the CRM's
//! messaging API. This stand-in records every request and reports success,
//! which is enough for routing, auditing, and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard_protocol::{EscalationError, EscalationTransport, TransferOutcome, TransferRequest};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingEscalation {
    transfers: Mutex<Vec<TransferRequest>>,
    fail_reason: Mutex<Option<String>>,
}

impl RecordingEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request seen so far, oldest first.
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().clone()
    }

    /// Make the next transfer fail with `reason` (one-shot).
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_reason.lock() = Some(reason.into());
    }
}

#[async_trait]
impl EscalationTransport for RecordingEscalation {
    async fn transfer_urgent(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, EscalationError> {
        if let Some(reason) = self.fail_reason.lock().take() {
            warn!(to = %request.to_number, %reason, "urgent transfer failed");
            return Err(EscalationError(reason));
        }

        self.transfers.lock().push(request.clone());
        let message_id = Uuid::new_v4().to_string();
        info!(
            from = %request.from_contact,
            to = %request.to_number,
            reason = %request.reason,
            message_id = %message_id,
            "urgent transfer delivered"
        );
        Ok(TransferOutcome::success(
            format!("urgent notification sent to {}", request.to_number),
            message_id,
        ))
    }
}
