use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Identifier assigned by the system of record. Either numeric or textual,
/// depending on the backend that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Text(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Placeholder carried by the wire format; no transition produces it.
    Idle,
    NotStarted,
    EnRoute,
    Arrived,
    Ended,
    Cancelled,
}

impl DeliveryStatus {
    /// Statuses the manager may hold in its ongoing slot.
    pub fn is_ongoing(&self) -> bool {
        matches!(self, Self::NotStarted | Self::EnRoute | Self::Arrived)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }

    /// The only valid lifecycle edges.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::EnRoute)
                | (Self::EnRoute, Self::Arrived)
                | (Self::Arrived, Self::Ended)
                | (Self::NotStarted, Self::Cancelled)
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::NotStarted => write!(f, "not_started"),
            Self::EnRoute => write!(f, "en_route"),
            Self::Arrived => write!(f, "arrived"),
            Self::Ended => write!(f, "ended"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "not_started" => Ok(Self::NotStarted),
            "en_route" => Ok(Self::EnRoute),
            "arrived" => Ok(Self::Arrived),
            "ended" => Ok(Self::Ended),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid delivery status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: DeliveryId,
    pub code: String,
    pub destination: String,
    pub expected_fee: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
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
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_of_delivery: Option<String>,
}

impl Delivery {
    pub fn new(
        id: DeliveryId,
        code: impl Into<String>,
        destination: impl Into<String>,
        expected_fee: f64,
    ) -> Self {
        Self {
            id,
            code: code.into(),
            destination: destination.into(),
            expected_fee,
            created_at: Utc::now(),
            started_at: None,
            arrived_at: None,
            ended_at: None,
            status: DeliveryStatus::NotStarted,
            proof_of_delivery: None,
        }
    }

    /// Admits a record returned by a lookup as a claimable delivery.
    ///
    /// Malformed records are reported as `NotFound`, well-formed records that
    /// are no longer `not_started` as `Conflict`.
    pub fn from_record(record: Value) -> Result<Self, AppError> {
        let delivery: Delivery = serde_json::from_value(record)
            .map_err(|err| AppError::NotFound(format!("malformed delivery record: {err}")))?;

        delivery
            .validate()
            .map_err(|reason| AppError::NotFound(format!("invalid delivery record: {reason}")))?;

        if delivery.status != DeliveryStatus::NotStarted {
            return Err(AppError::Conflict(format!(
                "delivery {} is already {}",
                delivery.code, delivery.status
            )));
        }

        Ok(delivery)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("code cannot be empty".to_string());
        }

        if !self.expected_fee.is_finite() || self.expected_fee < 0.0 {
            return Err(format!("expected fee {} is not a non-negative amount", self.expected_fee));
        }

        let reached = self.stages_reached();
        let mut floor = Some(self.created_at);
        for (stage, (field, value)) in [
            ("startedAt", self.started_at),
            ("arrivedAt", self.arrived_at),
            ("endedAt", self.ended_at),
        ]
        .into_iter()
        .enumerate()
        {
            if value.is_some() && stage >= reached {
                return Err(format!("{field} is set but the delivery is {}", self.status));
            }

            match (floor, value) {
                (_, None) => floor = None,
                (None, Some(_)) => {
                    return Err(format!("{field} is set without the preceding timestamps"));
                }
                (Some(previous), Some(at)) if at < previous => {
                    return Err(format!("{field} precedes the previous lifecycle timestamp"));
                }
                (Some(_), Some(at)) => floor = Some(at),
            }
        }

        Ok(())
    }

    // startedAt, arrivedAt and endedAt belong to en_route, arrived and ended.
    fn stages_reached(&self) -> usize {
        match self.status {
            DeliveryStatus::Idle | DeliveryStatus::NotStarted | DeliveryStatus::Cancelled => 0,
            DeliveryStatus::EnRoute => 1,
            DeliveryStatus::Arrived => 2,
            DeliveryStatus::Ended => 3,
        }
    }

    /// Latest populated lifecycle timestamp.
    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.ended_at
            .or(self.arrived_at)
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }

    /// `now`, clamped so lifecycle timestamps never go backwards.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.last_transition_at())
    }

    pub fn timestamp_for(&self, status: DeliveryStatus) -> Option<DateTime<Utc>> {
        match status {
            DeliveryStatus::NotStarted => Some(self.created_at),
            DeliveryStatus::EnRoute => self.started_at,
            DeliveryStatus::Arrived => self.arrived_at,
            DeliveryStatus::Ended => self.ended_at,
            DeliveryStatus::Idle | DeliveryStatus::Cancelled => None,
        }
    }

    pub fn advance(&mut self, next: DeliveryStatus, at: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "delivery {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        let at = self.next_timestamp(at);
        let slot = match next {
            DeliveryStatus::EnRoute => Some(&mut self.started_at),
            DeliveryStatus::Arrived => Some(&mut self.arrived_at),
            DeliveryStatus::Ended => Some(&mut self.ended_at),
            _ => None,
        };

        if let Some(field) = slot {
            if field.is_some() {
                return Err(AppError::Internal(format!(
                    "delivery {} already carries a {next} timestamp",
                    self.id
                )));
            }
            *field = Some(at);
        }

        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::{Delivery, DeliveryId, DeliveryStatus};
    use crate::error::AppError;

    fn record(status: &str) -> serde_json::Value {
        json!({
            "id": 7,
            "code": "DEL-007",
            "destination": "Kandy",
            "expectedFee": 2000,
            "createdAt": 1695283200000_i64,
            "status": status,
        })
    }

    #[test]
    fn only_lifecycle_edges_are_valid() {
        use DeliveryStatus::*;

        assert!(NotStarted.can_transition_to(EnRoute));
        assert!(EnRoute.can_transition_to(Arrived));
        assert!(Arrived.can_transition_to(Ended));
        assert!(NotStarted.can_transition_to(Cancelled));

        assert!(!EnRoute.can_transition_to(Cancelled));
        assert!(!Arrived.can_transition_to(Cancelled));
        assert!(!NotStarted.can_transition_to(Arrived));
        assert!(!Ended.can_transition_to(NotStarted));
        assert!(!Idle.can_transition_to(NotStarted));
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in ["idle", "not_started", "en_route", "arrived", "ended", "cancelled"] {
            let parsed: DeliveryStatus = status.parse().unwrap();
            assert_eq!(parsed.to_string(), status);
        }
        assert!("delivered".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn from_record_accepts_not_started_records() {
        let delivery = Delivery::from_record(record("not_started")).unwrap();

        assert_eq!(delivery.id, DeliveryId::Numeric(7));
        assert_eq!(delivery.expected_fee, 2000.0);
        assert_eq!(delivery.created_at.timestamp_millis(), 1695283200000);
        assert!(delivery.started_at.is_none());
    }

    #[test]
    fn from_record_accepts_textual_ids() {
        let mut value = record("not_started");
        value["id"] = json!("a1b2");

        let delivery = Delivery::from_record(value).unwrap();
        assert_eq!(delivery.id, DeliveryId::Text("a1b2".to_string()));
    }

    #[test]
    fn from_record_flags_claimed_records_as_conflict() {
        let err = Delivery::from_record(record("en_route")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = Delivery::from_record(record("idle")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn from_record_rejects_malformed_records() {
        let err = Delivery::from_record(record("teleported")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let mut negative_fee = record("not_started");
        negative_fee["expectedFee"] = json!(-5);
        let err = Delivery::from_record(negative_fee).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let mut missing_code = record("not_started");
        missing_code.as_object_mut().unwrap().remove("code");
        let err = Delivery::from_record(missing_code).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn from_record_rejects_timestamps_ahead_of_the_status() {
        for field in ["startedAt", "arrivedAt", "endedAt"] {
            let mut value = record("not_started");
            value[field] = json!(1695283300000_i64);

            let err = Delivery::from_record(value).unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)), "{field} was admitted");
        }

        let mut en_route = record("en_route");
        en_route["startedAt"] = json!(1695283300000_i64);
        en_route["arrivedAt"] = json!(1695283400000_i64);
        let err = Delivery::from_record(en_route).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn validate_accepts_timestamps_for_reached_stages() {
        let mut delivery = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Galle", 100.0);
        delivery.status = DeliveryStatus::Arrived;
        delivery.started_at = Some(delivery.created_at);
        delivery.arrived_at = Some(delivery.created_at + Duration::seconds(5));

        assert!(delivery.validate().is_ok());
    }

    #[test]
    fn validate_rejects_timestamps_out_of_order() {
        let mut delivery = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Galle", 100.0);
        delivery.status = DeliveryStatus::EnRoute;
        delivery.started_at = Some(delivery.created_at - Duration::seconds(5));

        assert!(delivery.validate().is_err());
    }

    #[test]
    fn validate_rejects_gaps_in_the_timeline() {
        let mut delivery = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Galle", 100.0);
        delivery.status = DeliveryStatus::Arrived;
        delivery.arrived_at = Some(delivery.created_at + Duration::seconds(5));

        assert!(delivery.validate().is_err());
    }

    #[test]
    fn advance_sets_each_timestamp_once_and_monotonically() {
        let mut delivery = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Galle", 100.0);
        let created = delivery.created_at;

        delivery
            .advance(DeliveryStatus::EnRoute, created - Duration::seconds(30))
            .unwrap();
        assert_eq!(delivery.started_at, Some(created));

        let later = created + Duration::seconds(10);
        delivery.advance(DeliveryStatus::Arrived, later).unwrap();
        delivery.advance(DeliveryStatus::Ended, Utc::now()).unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Ended);
        assert!(delivery.ended_at.unwrap() >= delivery.arrived_at.unwrap());
        assert!(delivery.validate().is_ok());
    }

    #[test]
    fn advance_refuses_skipping_states() {
        let mut delivery = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Galle", 100.0);

        let err = delivery
            .advance(DeliveryStatus::Ended, Utc::now())
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(delivery.status, DeliveryStatus::NotStarted);
        assert!(delivery.ended_at.is_none());
    }
}
