use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::delivery::Delivery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Adopted,
    Started,
    Arrived,
    ArrivalSyncFailed,
    Ended,
    Cancelled,
}

/// Snapshot broadcast after every change to the session state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub claim_id: Uuid,
    pub delivery: Delivery,
    pub ongoing: Option<Delivery>,
    pub total_earnings: f64,
    pub at: DateTime<Utc>,
}
