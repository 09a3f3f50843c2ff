//! Capabilities the lifecycle manager depends on but does not own.

pub mod navigation;
pub mod proof;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::collaborators::proof::ProofOfDelivery;
use crate::models::status_update::StatusUpdate;

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Resolves a scanned or typed code to a raw delivery record.
///
/// The record is returned untyped; the manager validates it before adopting it.
#[async_trait]
pub trait DeliveryLookup: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Value, CollaboratorError>;
}

/// Propagates status changes to the remote system of record.
#[async_trait]
pub trait StatusSync: Send + Sync {
    async fn push_status(&self, update: &StatusUpdate) -> Result<(), CollaboratorError>;
}

/// Opens and dismisses an external navigation view. Fire-and-forget.
pub trait Navigator: Send + Sync {
    fn open_route(&self, destination: &str, origin: Option<&str>) -> Result<(), CollaboratorError>;

    fn dismiss(&self);
}

/// Produces photo evidence for a completed delivery.
#[async_trait]
pub trait ProofCapture: Send + Sync {
    async fn capture(&self) -> Result<ProofOfDelivery, CollaboratorError>;
}
