use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{Collection, CollectionId};
use tokio::{
    sync::watch,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheEvent, CacheSubscription, QueryKey},
    error::ClientError,
    task::TaskHandle,
    AppContext, ClientEvent,
};

pub const EVALUATION_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const EVALUATION_STARTED_MESSAGE: &str =
    "Evaluation started! The process is running in the background.";

pub const LABEL_EVALUATED: &str = "Evaluation Complete";
pub const LABEL_EVALUATING: &str = "Evaluating...";
pub const LABEL_START: &str = "Start Evaluation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredReason {
    AlreadyEvaluated,
    AlreadyPolling,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The backend accepted the job; `message` is its acknowledgement.
    Started { message: String },
    Ignored(IgnoredReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerControl {
    pub enabled: bool,
    pub label: &'static str,
}

/// Issues the start-evaluation command for one collection. Never polls.
#[derive(Clone)]
pub struct EvaluationTrigger {
    ctx: AppContext,
    in_flight: Arc<AtomicBool>,
}

impl EvaluationTrigger {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn control(&self, collection: &Collection, polling: bool) -> TriggerControl {
        if collection.is_evaluated {
            return TriggerControl {
                enabled: false,
                label: LABEL_EVALUATED,
            };
        }
        if polling || self.is_in_flight() {
            return TriggerControl {
                enabled: false,
                label: LABEL_EVALUATING,
            };
        }
        TriggerControl {
            enabled: true,
            label: LABEL_START,
        }
    }

    pub async fn start(
        &self,
        collection: &Collection,
        polling: bool,
    ) -> Result<TriggerOutcome, ClientError> {
        if collection.is_evaluated {
            return Ok(TriggerOutcome::Ignored(IgnoredReason::AlreadyEvaluated));
        }
        if polling {
            return Ok(TriggerOutcome::Ignored(IgnoredReason::AlreadyPolling));
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Ok(TriggerOutcome::Ignored(IgnoredReason::InFlight));
        };

        match self.ctx.api().start_evaluation(collection.id).await {
            Ok(ack) => {
                info!(collection_id = %collection.id, message = %ack.message, "evaluation: started");
                self.ctx.notify_success(EVALUATION_STARTED_MESSAGE);
                self.ctx
                    .cache()
                    .invalidate(&QueryKey::collection(collection.id))
                    .await;
                Ok(TriggerOutcome::Started {
                    message: ack.message,
                })
            }
            Err(err) => {
                warn!(collection_id = %collection.id, error = %err, "evaluation: start rejected");
                self.ctx.notify_error(&err);
                Err(err)
            }
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

/// Refetches one collection on a fixed period until the backend reports it
/// evaluated.
pub struct EvaluationPoller {
    ctx: AppContext,
    collection_id: CollectionId,
    period: Duration,
    state: Arc<watch::Sender<PollState>>,
    task: Option<TaskHandle>,
}

impl EvaluationPoller {
    pub fn new(ctx: AppContext, collection_id: CollectionId) -> Self {
        Self::with_period(ctx, collection_id, EVALUATION_POLL_INTERVAL)
    }

    pub fn with_period(ctx: AppContext, collection_id: CollectionId, period: Duration) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            ctx,
            collection_id,
            period,
            state: Arc::new(state),
            task: None,
        }
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.state() == PollState::Polling
    }

    pub fn watch(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Idle -> Polling. Returns false when already polling.
    pub fn begin(&mut self) -> bool {
        if self.is_polling() {
            return false;
        }
        self.state.send_replace(PollState::Polling);
        self.ctx.emit(ClientEvent::EvaluationStateChanged {
            collection_id: self.collection_id,
            state: PollState::Polling,
        });
        info!(collection_id = %self.collection_id, period_ms = self.period.as_millis() as u64, "evaluation: polling");

        // Subscribe before spawning so no update between here and the
        // task's first poll is missed.
        let updates = self
            .ctx
            .cache()
            .subscribe(QueryKey::collection(self.collection_id));
        self.task = Some(TaskHandle::spawn(
            "evaluation_poller",
            poll_until_evaluated(
                self.ctx.clone(),
                self.collection_id,
                self.period,
                Arc::clone(&self.state),
                updates,
            ),
        ));
        true
    }

    /// Feeds collection data seen elsewhere into the latch. Returns true
    /// when it moved the poller to Idle.
    pub fn observe(&mut self, collection: &Collection) -> bool {
        if collection.id != self.collection_id || !collection.is_evaluated {
            return false;
        }
        let latched = latch_idle(&self.ctx, self.collection_id, &self.state);
        if latched {
            if let Some(task) = self.task.take() {
                task.cancel();
            }
        }
        latched
    }

    /// Stops the timer; no refetch happens afterwards.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        latch_idle(&self.ctx, self.collection_id, &self.state);
    }
}

fn latch_idle(
    ctx: &AppContext,
    collection_id: CollectionId,
    state: &watch::Sender<PollState>,
) -> bool {
    let previous = state.send_replace(PollState::Idle);
    if previous == PollState::Polling {
        ctx.emit(ClientEvent::EvaluationStateChanged {
            collection_id,
            state: PollState::Idle,
        });
        true
    } else {
        false
    }
}

async fn poll_until_evaluated(
    ctx: AppContext,
    collection_id: CollectionId,
    period: Duration,
    state: Arc<watch::Sender<PollState>>,
    mut updates: CacheSubscription,
) {
    let key = QueryKey::collection(collection_id);

    // Data stored before the subscription existed never shows up as an event.
    if ctx
        .cached_collection(collection_id)
        .await
        .is_some_and(|collection| collection.is_evaluated)
    {
        info!(collection_id = %collection_id, "evaluation: already complete");
        latch_idle(&ctx, collection_id, &state);
        return;
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctx.refetch_collection(collection_id).await {
                    Ok(collection) if collection.is_evaluated => {
                        info!(collection_id = %collection_id, "evaluation: complete");
                        latch_idle(&ctx, collection_id, &state);
                        return;
                    }
                    Ok(_) => debug!(collection_id = %collection_id, "evaluation: still running"),
                    Err(err) => {
                        warn!(collection_id = %collection_id, error = %err, "evaluation: poll failed");
                    }
                }
            }
            event = updates.recv() => match event {
                Some(CacheEvent::Updated(updated)) if updated == key => {
                    let evaluated = ctx
                        .cached_collection(collection_id)
                        .await
                        .is_some_and(|collection| collection.is_evaluated);
                    if evaluated {
                        info!(collection_id = %collection_id, "evaluation: complete");
                        latch_idle(&ctx, collection_id, &state);
                        return;
                    }
                }
                Some(_) => {}
                None => return,
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/evaluation_tests.rs"]
mod tests;
