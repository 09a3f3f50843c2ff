use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

/// Single-shot scheduled task keyed to the claim that armed it. At most one is
/// outstanding; arming again aborts the previous one. Dropping the timer
/// aborts whatever is still pending.
#[derive(Default)]
pub struct ArrivalTimer {
    armed: Option<ArmedTimer>,
}

struct ArmedTimer {
    claim_id: Uuid,
    handle: JoinHandle<()>,
}

impl ArrivalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F>(&mut self, claim_id: Uuid, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let handle = tokio::spawn(async move {
            sleep(delay).await;
            on_fire.await;
        });

        debug!(claim_id = %claim_id, delay_ms = delay.as_millis() as u64, "arrival timer armed");
        self.armed = Some(ArmedTimer { claim_id, handle });
    }

    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                debug!(claim_id = %armed.claim_id, "arrival timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Forgets the timer from inside its own task once it has fired. The
    /// handle is detached rather than aborted, so the firing task keeps running.
    pub fn release_fired(&mut self, claim_id: Uuid) -> bool {
        if self.armed_for() == Some(claim_id) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn armed_for(&self) -> Option<Uuid> {
        self.armed.as_ref().map(|armed| armed.claim_id)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for ArrivalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
