use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::collaborators::{CollaboratorError, DeliveryLookup, StatusSync};
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryId, DeliveryStatus};
use crate::models::status_update::StatusUpdate;

/// In-process system of record. Serves lookups by code and accepts status
/// updates, applying only valid lifecycle edges.
pub struct InMemoryDispatchBackend {
    deliveries: DashMap<DeliveryId, Delivery>,
    next_id: AtomicU64,
}

impl Default for InMemoryDispatchBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDispatchBackend {
    pub fn new() -> Self {
        Self {
            deliveries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(
        &self,
        code: &str,
        destination: &str,
        expected_fee: f64,
    ) -> Result<Delivery, AppError> {
        let id = DeliveryId::Numeric(self.next_id.fetch_add(1, Ordering::Relaxed));
        let delivery = Delivery::new(id, code.trim(), destination.trim(), expected_fee);

        delivery.validate().map_err(AppError::BadRequest)?;
        if delivery.destination.is_empty() {
            return Err(AppError::BadRequest("destination cannot be empty".to_string()));
        }

        self.deliveries.insert(delivery.id.clone(), delivery.clone());
        info!(delivery_id = %delivery.id, code = %delivery.code, "delivery registered");

        Ok(delivery)
    }

    pub fn get(&self, id: &DeliveryId) -> Option<Delivery> {
        self.deliveries.get(id).map(|entry| entry.value().clone())
    }

    /// Deliveries nobody has claimed yet, oldest first.
    pub fn available(&self) -> Vec<Delivery> {
        let mut available: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().status == DeliveryStatus::NotStarted)
            .map(|entry| entry.value().clone())
            .collect();

        available.sort_by_key(|delivery| delivery.created_at);
        available
    }

    /// Codes are not unique over time; the most recently created record wins.
    pub fn find_latest_by_code(&self, code: &str) -> Option<Delivery> {
        self.deliveries
            .iter()
            .filter(|entry| entry.value().code == code)
            .max_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

#[async_trait]
impl DeliveryLookup for InMemoryDispatchBackend {
    async fn find_by_code(&self, code: &str) -> Result<Value, CollaboratorError> {
        let delivery = self
            .find_latest_by_code(code.trim())
            .ok_or_else(|| CollaboratorError::NotFound(format!("no delivery with code {code}")))?;

        serde_json::to_value(&delivery)
            .map_err(|err| CollaboratorError::Unavailable(format!("failed to encode delivery: {err}")))
    }
}

#[async_trait]
impl StatusSync for InMemoryDispatchBackend {
    async fn push_status(&self, update: &StatusUpdate) -> Result<(), CollaboratorError> {
        let mut delivery = self
            .deliveries
            .get_mut(&update.id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("delivery {} not found", update.id)))?;

        let at = update.timestamp().ok_or_else(|| {
            CollaboratorError::Rejected(format!("update to {} carries no timestamp", update.status))
        })?;

        delivery
            .advance(update.status, at)
            .map_err(|err| CollaboratorError::Rejected(err.to_string()))?;

        if update.proof_of_delivery.is_some() {
            delivery.proof_of_delivery = update.proof_of_delivery.clone();
        }

        debug!(delivery_id = %update.id, status = %update.status, "status recorded");
        Ok(())
    }
}
