//! The delivery lifecycle manager.
//!
//! Owns the single ongoing-delivery slot, the history ledger and the arrival
//! timer for one application session. Every operation checks its guard and
//! commits its write under the session lock; the lock is never held across a
//! collaborator call. Operations that suspend re-check the slot's claim on
//! resume, so a delivery cleared in the meantime is never resurrected.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::proof::ProofOfDelivery;
use crate::collaborators::{CollaboratorError, DeliveryLookup, Navigator, ProofCapture, StatusSync};
use crate::engine::ledger::HistoryLedger;
use crate::engine::timer::ArrivalTimer;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryId, DeliveryStatus};
use crate::models::event::{LifecycleEvent, LifecycleEventKind};
use crate::models::status_update::StatusUpdate;
use crate::observability::metrics::Metrics;

const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub arrival_delay: Duration,
    pub collaborator_timeout: Duration,
    pub navigation_origin: Option<String>,
    pub require_proof: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            arrival_delay: Duration::from_secs(10),
            collaborator_timeout: Duration::from_secs(5),
            navigation_origin: None,
            require_proof: false,
        }
    }
}

pub struct Collaborators {
    pub lookup: Arc<dyn DeliveryLookup>,
    pub sync: Arc<dyn StatusSync>,
    pub navigator: Arc<dyn Navigator>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub ongoing: Option<Delivery>,
    pub history: Vec<Delivery>,
    pub total_earnings: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingTransition {
    Start,
    End,
}

struct OngoingSlot {
    claim_id: Uuid,
    delivery: Delivery,
    pending: Option<PendingTransition>,
    // Flips to true once the arrival update has been answered, either way.
    arrival_synced: Option<watch::Receiver<bool>>,
}

#[derive(Default)]
struct Session {
    ongoing: Option<OngoingSlot>,
    ledger: HistoryLedger,
    timer: ArrivalTimer,
    lookup_pending: bool,
}

struct Inner {
    session: Mutex<Session>,
    lookup: Arc<dyn DeliveryLookup>,
    sync: Arc<dyn StatusSync>,
    navigator: Arc<dyn Navigator>,
    settings: LifecycleSettings,
    events_tx: broadcast::Sender<LifecycleEvent>,
    metrics: Metrics,
}

/// Handle to one session's lifecycle state. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DeliveryManager {
    inner: Arc<Inner>,
}

impl DeliveryManager {
    pub fn new(collaborators: Collaborators, settings: LifecycleSettings) -> Self {
        Self::with_metrics(collaborators, settings, Metrics::new(), DEFAULT_EVENT_BUFFER_SIZE)
    }

    pub fn with_metrics(
        collaborators: Collaborators,
        settings: LifecycleSettings,
        metrics: Metrics,
        event_buffer_size: usize,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::default()),
                lookup: collaborators.lookup,
                sync: collaborators.sync,
                navigator: collaborators.navigator,
                settings,
                events_tx,
                metrics,
            }),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn ongoing(&self) -> Option<Delivery> {
        self.inner
            .session
            .lock()
            .ongoing
            .as_ref()
            .map(|slot| slot.delivery.clone())
    }

    pub fn history(&self) -> Vec<Delivery> {
        self.inner.session.lock().ledger.snapshot()
    }

    pub fn total_earnings(&self) -> f64 {
        self.inner.session.lock().ledger.total_earnings()
    }

    pub fn recompute_earnings(&self) -> f64 {
        self.inner.session.lock().ledger.recompute_earnings()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.inner.session.lock();
        SessionSnapshot {
            ongoing: session.ongoing.as_ref().map(|slot| slot.delivery.clone()),
            history: session.ledger.snapshot(),
            total_earnings: session.ledger.total_earnings(),
        }
    }

    pub fn arrival_timer_armed(&self) -> bool {
        self.inner.session.lock().timer.is_armed()
    }

    /// Cancels the arrival timer. Call on teardown; dropping the last handle
    /// does the same.
    pub fn shutdown(&self) {
        if self.inner.session.lock().timer.cancel() {
            info!("arrival timer cancelled on shutdown");
        }
    }

    pub async fn add_delivery_by_code(&self, code: &str) -> Result<Delivery, AppError> {
        let result = self.try_add(code).await;
        self.observe_outcome("add", &result);
        result
    }

    pub async fn start_ongoing(&self) -> Result<Delivery, AppError> {
        let result = self.try_start().await;
        self.observe_outcome("start", &result);
        result
    }

    pub async fn end_ongoing(
        &self,
        id: &DeliveryId,
        proof: Option<ProofOfDelivery>,
    ) -> Result<Delivery, AppError> {
        let result = self.try_end(id, proof).await;
        self.observe_outcome("end", &result);
        result
    }

    /// Ends the delivery with evidence obtained from `capture`. Nothing is
    /// captured unless the delivery could be ended right now.
    pub async fn end_ongoing_with_capture(
        &self,
        id: &DeliveryId,
        capture: &dyn ProofCapture,
    ) -> Result<Delivery, AppError> {
        let result = self.try_end_with_capture(id, capture).await;
        self.observe_outcome("end", &result);
        result
    }

    pub fn cancel_ongoing(&self) -> Result<Delivery, AppError> {
        let result = self.try_cancel();
        self.observe_outcome("cancel", &result);
        result
    }

    async fn try_add(&self, code: &str) -> Result<Delivery, AppError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::BadRequest("delivery code cannot be empty".to_string()));
        }

        {
            let mut session = self.inner.session.lock();
            if let Some(slot) = &session.ongoing {
                return Err(AppError::InvalidTransition(format!(
                    "delivery {} is already ongoing",
                    slot.delivery.code
                )));
            }
            if session.lookup_pending {
                return Err(AppError::InvalidTransition(
                    "a delivery lookup is already in progress".to_string(),
                ));
            }
            session.lookup_pending = true;
        }

        let guard = PendingGuard::new(self.inner.clone(), PendingTarget::Lookup);

        let record = self
            .call_collaborator(self.inner.lookup.find_by_code(code))
            .await
            .map_err(|err| AppError::NotFound(format!("delivery {code}: {err}")))?;
        let delivery = Delivery::from_record(record)?;

        guard.commit(|session| {
            if session.ongoing.is_some() {
                return Err(AppError::InvalidTransition(
                    "another delivery was adopted during the lookup".to_string(),
                ));
            }

            let claim_id = Uuid::new_v4();
            session.ongoing = Some(OngoingSlot {
                claim_id,
                delivery: delivery.clone(),
                pending: None,
                arrival_synced: None,
            });

            info!(
                claim_id = %claim_id,
                delivery_id = %delivery.id,
                code = %delivery.code,
                "delivery adopted"
            );
            self.emit(session, LifecycleEventKind::Adopted, claim_id, &delivery);
            Ok(delivery)
        })
    }

    async fn try_start(&self) -> Result<Delivery, AppError> {
        let (claim_id, started, update, destination) = {
            let mut session = self.inner.session.lock();
            let slot = claimable_slot(&mut session)?;

            if slot.delivery.status != DeliveryStatus::NotStarted {
                return Err(AppError::InvalidTransition(format!(
                    "cannot start delivery {} while it is {}",
                    slot.delivery.id, slot.delivery.status
                )));
            }

            let started_at = slot.delivery.next_timestamp(Utc::now());
            let mut started = slot.delivery.clone();
            started.advance(DeliveryStatus::EnRoute, started_at)?;
            slot.pending = Some(PendingTransition::Start);

            (
                slot.claim_id,
                started,
                StatusUpdate::en_route(slot.delivery.id.clone(), started_at),
                slot.delivery.destination.clone(),
            )
        };

        let guard = PendingGuard::new(self.inner.clone(), PendingTarget::Slot(claim_id));
        self.push_status("start", &update).await?;

        let started = guard.commit(|session| {
            let Some(slot) = session
                .ongoing
                .as_mut()
                .filter(|slot| slot.claim_id == claim_id)
            else {
                warn!(claim_id = %claim_id, "delivery cleared while its start was being synced");
                return Err(AppError::InvalidTransition(
                    "delivery was cleared before the start was confirmed".to_string(),
                ));
            };

            slot.delivery = started;
            let delivery = slot.delivery.clone();

            let weak = Arc::downgrade(&self.inner);
            session.timer.arm(
                claim_id,
                self.inner.settings.arrival_delay,
                fire_arrival(weak, claim_id),
            );

            info!(claim_id = %claim_id, delivery_id = %delivery.id, "delivery en route");
            self.emit(session, LifecycleEventKind::Started, claim_id, &delivery);
            Ok(delivery)
        })?;

        self.open_navigation(&destination);
        Ok(started)
    }

    async fn complete_arrival(&self, claim_id: Uuid) {
        let (update, synced_tx) = {
            let mut session = self.inner.session.lock();
            if !session.timer.release_fired(claim_id) {
                debug!(claim_id = %claim_id, "stale arrival timer ignored");
                return;
            }

            let Some(slot) = session
                .ongoing
                .as_mut()
                .filter(|slot| slot.claim_id == claim_id)
            else {
                debug!(claim_id = %claim_id, "arrival timer fired for a cleared delivery");
                return;
            };

            let arrived_at = slot.delivery.next_timestamp(Utc::now());
            if let Err(err) = slot.delivery.advance(DeliveryStatus::Arrived, arrived_at) {
                error!(claim_id = %claim_id, error = %err, "arrival transition refused");
                return;
            }
            let (synced_tx, synced_rx) = watch::channel(false);
            slot.arrival_synced = Some(synced_rx);
            let delivery = slot.delivery.clone();

            info!(claim_id = %claim_id, delivery_id = %delivery.id, "delivery arrived");
            self.emit(&session, LifecycleEventKind::Arrived, claim_id, &delivery);
            self.inner
                .metrics
                .transitions_total
                .with_label_values(&["arrive", "success"])
                .inc();

            (StatusUpdate::arrived(delivery.id, arrived_at), synced_tx)
        };

        self.inner.navigator.dismiss();

        // Local arrival stands even when the remote update fails.
        let outcome = self.push_status("arrive", &update).await;
        let _ = synced_tx.send(true);

        if let Err(err) = outcome {
            warn!(claim_id = %claim_id, error = %err, "arrival kept locally despite sync failure");

            let session = self.inner.session.lock();
            if let Some(slot) = session
                .ongoing
                .as_ref()
                .filter(|slot| slot.claim_id == claim_id)
            {
                let delivery = slot.delivery.clone();
                self.emit(&session, LifecycleEventKind::ArrivalSyncFailed, claim_id, &delivery);
            }
        }
    }

    async fn try_end(
        &self,
        id: &DeliveryId,
        proof: Option<ProofOfDelivery>,
    ) -> Result<Delivery, AppError> {
        let (claim_id, ended, update, arrival_synced) = {
            let mut session = self.inner.session.lock();
            let slot = claimable_slot(&mut session)?;
            check_endable(slot, id)?;

            if self.inner.settings.require_proof && proof.is_none() {
                return Err(AppError::InvalidTransition(
                    "proof of delivery is required to end a delivery".to_string(),
                ));
            }

            let ended_at = slot.delivery.next_timestamp(Utc::now());
            let mut ended = slot.delivery.clone();
            ended.advance(DeliveryStatus::Ended, ended_at)?;
            ended.proof_of_delivery = proof.map(ProofOfDelivery::into_inner);
            slot.pending = Some(PendingTransition::End);

            (
                slot.claim_id,
                ended.clone(),
                StatusUpdate::ended(ended.id, ended_at, ended.proof_of_delivery),
                slot.arrival_synced.clone(),
            )
        };

        let guard = PendingGuard::new(self.inner.clone(), PendingTarget::Slot(claim_id));

        // The end update must not overtake the arrival update it follows.
        if let Some(mut arrival_synced) = arrival_synced {
            if !*arrival_synced.borrow() {
                debug!(claim_id = %claim_id, "waiting for the arrival update before ending");
            }
            let _ = arrival_synced.wait_for(|synced| *synced).await;
        }

        self.push_status("end", &update).await?;

        guard.commit(|session| {
            if !session
                .ongoing
                .as_ref()
                .is_some_and(|slot| slot.claim_id == claim_id)
            {
                warn!(claim_id = %claim_id, "delivery cleared while its end was being synced");
                return Err(AppError::InvalidTransition(
                    "delivery was cleared before the end was confirmed".to_string(),
                ));
            }

            session.ledger.record(ended.clone())?;
            session.ongoing = None;
            session.timer.cancel();

            info!(
                claim_id = %claim_id,
                delivery_id = %ended.id,
                fee = ended.expected_fee,
                total_earnings = session.ledger.total_earnings(),
                "delivery ended"
            );
            self.emit(session, LifecycleEventKind::Ended, claim_id, &ended);
            Ok(ended)
        })
    }

    async fn try_end_with_capture(
        &self,
        id: &DeliveryId,
        capture: &dyn ProofCapture,
    ) -> Result<Delivery, AppError> {
        {
            let mut session = self.inner.session.lock();
            let slot = claimable_slot(&mut session)?;
            check_endable(slot, id)?;
        }

        let proof = self
            .call_collaborator(capture.capture())
            .await
            .map_err(|err| AppError::BadRequest(format!("proof capture failed: {err}")))?;

        self.try_end(id, Some(proof)).await
    }

    fn try_cancel(&self) -> Result<Delivery, AppError> {
        let mut session = self.inner.session.lock();

        let slot = match session.ongoing.take() {
            Some(slot) if slot.delivery.status == DeliveryStatus::NotStarted => slot,
            Some(slot) => {
                let err = AppError::InvalidTransition(format!(
                    "cannot cancel delivery {} while it is {}",
                    slot.delivery.id, slot.delivery.status
                ));
                session.ongoing = Some(slot);
                return Err(err);
            }
            None => {
                return Err(AppError::InvalidTransition(
                    "no ongoing delivery".to_string(),
                ));
            }
        };

        session.timer.cancel();

        let mut cancelled = slot.delivery;
        cancelled.advance(DeliveryStatus::Cancelled, Utc::now())?;

        if slot.pending.is_some() {
            info!(claim_id = %slot.claim_id, "delivery cancelled while its start was in flight");
        }
        info!(claim_id = %slot.claim_id, delivery_id = %cancelled.id, "delivery cancelled");
        self.emit(&session, LifecycleEventKind::Cancelled, slot.claim_id, &cancelled);
        Ok(cancelled)
    }

    async fn push_status(&self, transition: &str, update: &StatusUpdate) -> Result<(), AppError> {
        let started = Instant::now();
        let outcome = self.call_collaborator(self.inner.sync.push_status(update)).await;

        self.inner
            .metrics
            .sync_latency_seconds
            .with_label_values(&[transition])
            .observe(started.elapsed().as_secs_f64());

        outcome.map_err(|err| {
            self.inner
                .metrics
                .sync_failures_total
                .with_label_values(&[transition])
                .inc();
            error!(
                delivery_id = %update.id,
                status = %update.status,
                error = %err,
                "status sync failed"
            );
            AppError::SyncFailure(format!(
                "{} update for delivery {}: {err}",
                update.status, update.id
            ))
        })
    }

    async fn call_collaborator<T, F>(&self, call: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let limit = self.inner.settings.collaborator_timeout;
        match timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CollaboratorError::TimedOut(limit)),
        }
    }

    fn open_navigation(&self, destination: &str) {
        let origin = self.inner.settings.navigation_origin.as_deref();
        if let Err(err) = self.inner.navigator.open_route(destination, origin) {
            warn!(error = %err, "failed to open navigation");
        }
    }

    fn emit(&self, session: &Session, kind: LifecycleEventKind, claim_id: Uuid, delivery: &Delivery) {
        let metrics = &self.inner.metrics;
        metrics
            .ongoing_deliveries
            .set(i64::from(session.ongoing.is_some()));
        metrics.history_entries.set(session.ledger.len() as i64);
        metrics.total_earnings.set(session.ledger.total_earnings());

        let event = LifecycleEvent {
            kind,
            claim_id,
            delivery: delivery.clone(),
            ongoing: session.ongoing.as_ref().map(|slot| slot.delivery.clone()),
            total_earnings: session.ledger.total_earnings(),
            at: Utc::now(),
        };
        let _ = self.inner.events_tx.send(event);
    }

    fn observe_outcome<T>(&self, transition: &str, result: &Result<T, AppError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };

        self.inner
            .metrics
            .transitions_total
            .with_label_values(&[transition, outcome])
            .inc();

        if let Err(err) = result {
            warn!(transition, error = %err, "operation rejected");
        }
    }
}

async fn fire_arrival(inner: Weak<Inner>, claim_id: Uuid) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    DeliveryManager { inner }.complete_arrival(claim_id).await;
}

fn claimable_slot(session: &mut Session) -> Result<&mut OngoingSlot, AppError> {
    let slot = session
        .ongoing
        .as_mut()
        .ok_or_else(|| AppError::InvalidTransition("no ongoing delivery".to_string()))?;

    if let Some(pending) = slot.pending {
        return Err(AppError::InvalidTransition(format!(
            "delivery {} has a {pending:?} transition in flight",
            slot.delivery.id
        )));
    }

    Ok(slot)
}

fn check_endable(slot: &OngoingSlot, id: &DeliveryId) -> Result<(), AppError> {
    if slot.delivery.status != DeliveryStatus::Arrived {
        return Err(AppError::InvalidTransition(format!(
            "cannot end delivery {} while it is {}",
            slot.delivery.id, slot.delivery.status
        )));
    }

    if &slot.delivery.id != id {
        return Err(AppError::InvalidTransition(format!(
            "delivery {id} is not the ongoing delivery"
        )));
    }

    Ok(())
}

enum PendingTarget {
    Lookup,
    Slot(Uuid),
}

impl PendingTarget {
    fn release(&self, session: &mut Session) {
        match self {
            PendingTarget::Lookup => session.lookup_pending = false,
            PendingTarget::Slot(claim_id) => {
                if let Some(slot) = session
                    .ongoing
                    .as_mut()
                    .filter(|slot| slot.claim_id == *claim_id)
                {
                    slot.pending = None;
                }
            }
        }
    }
}

/// Clears an in-flight marker when the operation that set it finishes, or
/// when its future is dropped mid-await.
struct PendingGuard {
    inner: Arc<Inner>,
    target: PendingTarget,
    armed: bool,
}

impl PendingGuard {
    fn new(inner: Arc<Inner>, target: PendingTarget) -> Self {
        Self {
            inner,
            target,
            armed: true,
        }
    }

    fn commit<T>(mut self, write: impl FnOnce(&mut Session) -> T) -> T {
        let mut session = self.inner.session.lock();
        self.target.release(&mut *session);
        self.armed = false;
        write(&mut *session)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut session = self.inner.session.lock();
            self.target.release(&mut *session);
        }
    }
}
