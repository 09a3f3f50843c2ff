use std::collections::VecDeque;

use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};

/// Append-only record of ended deliveries, newest first, with a running
/// earnings total.
#[derive(Debug, Default)]
pub struct HistoryLedger {
    entries: VecDeque<Delivery>,
    total_earnings: f64,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, delivery: Delivery) -> Result<(), AppError> {
        if delivery.status != DeliveryStatus::Ended {
            return Err(AppError::Internal(format!(
                "only ended deliveries enter history, {} is {}",
                delivery.id, delivery.status
            )));
        }

        self.total_earnings += delivery.expected_fee;
        self.entries.push_front(delivery);
        Ok(())
    }

    pub fn total_earnings(&self) -> f64 {
        self.total_earnings
    }

    /// Earnings derived from the entries alone. Folds oldest first, the same
    /// order in which `record` accumulated them.
    pub fn recompute_earnings(&self) -> f64 {
        self.entries
            .iter()
            .rev()
            .fold(0.0, |total, delivery| total + delivery.expected_fee)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Delivery> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<Delivery> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Delivery> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::HistoryLedger;
    use crate::models::delivery::{Delivery, DeliveryId, DeliveryStatus};

    fn ended(id: u64, fee: f64) -> Delivery {
        let mut delivery = Delivery::new(DeliveryId::Numeric(id), format!("DEL-{id}"), "Kandy", fee);
        let now = Utc::now();
        delivery.advance(DeliveryStatus::EnRoute, now).unwrap();
        delivery.advance(DeliveryStatus::Arrived, now).unwrap();
        delivery.advance(DeliveryStatus::Ended, now).unwrap();
        delivery
    }

    #[test]
    fn newest_entry_comes_first() {
        let mut ledger = HistoryLedger::new();
        ledger.record(ended(1, 100.0)).unwrap();
        ledger.record(ended(2, 200.0)).unwrap();

        let ids: Vec<DeliveryId> = ledger.entries().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![DeliveryId::Numeric(2), DeliveryId::Numeric(1)]);
        assert_eq!(ledger.latest().unwrap().id, DeliveryId::Numeric(2));
    }

    #[test]
    fn running_total_matches_recomputation() {
        let mut ledger = HistoryLedger::new();
        let fees = [0.1, 0.2, 0.3, 1999.99, 2000.0, 0.07, 13.5];

        for (i, fee) in fees.iter().enumerate() {
            ledger.record(ended(i as u64, *fee)).unwrap();
            assert_eq!(ledger.total_earnings(), ledger.recompute_earnings());
        }

        assert_eq!(ledger.len(), fees.len());
    }

    #[test]
    fn refuses_deliveries_that_have_not_ended() {
        let mut ledger = HistoryLedger::new();
        let open = Delivery::new(DeliveryId::Numeric(1), "DEL-1", "Kandy", 100.0);

        assert!(ledger.record(open).is_err());
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_earnings(), 0.0);
    }
}
