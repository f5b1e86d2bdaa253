//! Outbound mail transport contract.
//!
//! The engines never talk to an email provider directly; they hand an
//! [`OutboundEmail`] to an `Arc<dyn MailTransport>` and treat any
//! [`DeliveryError`] as fatal to the run that triggered it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A fully rendered email ready for hand-off to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub tags: Vec<String>,
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
}

/// Typed delivery failure carrying the provider's HTTP-like status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery failed with status {status}: {message}")]
pub struct DeliveryError {
    pub status: u16,
    pub message: String,
}

impl DeliveryError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

pub trait MailTransport: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, DeliveryError>;
}

/// Transport that records every message instead of delivering it. Used by
/// tests and the demo runner; can be switched into a failing mode.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    failure: Mutex<Option<DeliveryError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `send` fails with `error` until cleared.
    pub fn fail_with(&self, error: DeliveryError) {
        *self.failure.lock().expect("transport mutex poisoned") = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().expect("transport mutex poisoned") = None;
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("transport mutex poisoned").len()
    }
}

impl MailTransport for RecordingTransport {
    fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, DeliveryError> {
        if let Some(err) = self.failure.lock().expect("transport mutex poisoned").clone() {
            return Err(err);
        }
        self.sent
            .lock()
            .expect("transport mutex poisoned")
            .push(email.clone());
        Ok(SendReceipt {
            id: format!("rec-{}", Uuid::new_v4()),
        })
    }
}
