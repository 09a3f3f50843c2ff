use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::delivery::{DeliveryId, DeliveryStatus};

/// Payload pushed to the system of record on every status change. Exactly one
/// timestamp field is populated: the one matching `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub id: DeliveryId,
    pub status: DeliveryStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub arrived_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_of_delivery: Option<String>,
}

impl StatusUpdate {
    fn bare(id: DeliveryId, status: DeliveryStatus) -> Self {
        Self {
            id,
            status,
            started_at: None,
            arrived_at: None,
            ended_at: None,
            proof_of_delivery: None,
        }
    }

    pub fn en_route(id: DeliveryId, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
            ..Self::bare(id, DeliveryStatus::EnRoute)
        }
    }

    pub fn arrived(id: DeliveryId, arrived_at: DateTime<Utc>) -> Self {
        Self {
            arrived_at: Some(arrived_at),
            ..Self::bare(id, DeliveryStatus::Arrived)
        }
    }

    pub fn ended(id: DeliveryId, ended_at: DateTime<Utc>, proof_of_delivery: Option<String>) -> Self {
        Self {
            ended_at: Some(ended_at),
            proof_of_delivery,
            ..Self::bare(id, DeliveryStatus::Ended)
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.status {
            DeliveryStatus::EnRoute => self.started_at,
            DeliveryStatus::Arrived => self.arrived_at,
            DeliveryStatus::Ended => self.ended_at,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::StatusUpdate;
    use crate::models::delivery::DeliveryId;

    #[test]
    fn only_the_matching_timestamp_is_serialized() {
        let at = Utc.timestamp_millis_opt(1695285000000).unwrap();
        let update = StatusUpdate::en_route(DeliveryId::Numeric(2), at);

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            json!({ "id": 2, "status": "en_route", "startedAt": 1695285000000_i64 })
        );
    }

    #[test]
    fn ended_update_carries_the_proof() {
        let at = Utc.timestamp_millis_opt(1695285600000).unwrap();
        let update = StatusUpdate::ended(
            DeliveryId::Text("x9".to_string()),
            at,
            Some("aGVsbG8=".to_string()),
        );

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["status"], "ended");
        assert_eq!(value["endedAt"], 1695285600000_i64);
        assert_eq!(value["proofOfDelivery"], "aGVsbG8=");
        assert_eq!(update.timestamp(), Some(at));
    }
}
