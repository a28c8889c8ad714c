//! The public handler: validation gate, bounded queue and worker pool.

use std::sync::{Arc, Mutex};

use bridge_core::{parse_resource, Activity, DiscardReason, MetricKind};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HandlerConfig;
use crate::context::{Capabilities, Context};
use crate::error::{HandlerError, Result};
use crate::lifecycle::secret_matches;
use crate::process::QueuedActivity;
use crate::supervisor::{supervise, QuitSignal};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedActivity>>>;

/// Outcome of offering an activity to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Validated and queued for a worker.
    Queued,
    /// No local record of the subscription; Graph was asked to delete it.
    UnknownSubscription,
}

#[derive(Default)]
struct RunState {
    started: bool,
    tasks: Vec<JoinHandle<()>>,
}

/// Validates change notifications and mirrors them onto the host platform.
///
/// [`handle`](Self::handle) is the synchronous half: it authenticates the
/// notification and queues it. [`start`](Self::start) launches the workers
/// that drain the queue; each activity they process ends in exactly one
/// `change_event` observation.
pub struct ActivityHandler {
    ctx: Arc<Context>,
    tx: mpsc::Sender<QueuedActivity>,
    rx: SharedReceiver,
    quit: QuitSignal,
    state: Mutex<RunState>,
}

impl ActivityHandler {
    pub fn new(caps: Capabilities, config: HandlerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            ctx: Arc::new(Context::new(caps, config)),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            quit: QuitSignal::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.ctx.config
    }

    /// Launch the worker pool and the last-activity flusher.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started {
            return Err(HandlerError::AlreadyRunning);
        }
        if self.quit.is_quitting() {
            return Err(HandlerError::Stopped);
        }
        state.started = true;

        let config = &self.ctx.config;
        let capacity = config.queue_size.max(1).to_string();
        self.ctx
            .metrics
            .observe(MetricKind::QueueCapacity, &[("capacity", capacity.as_str())]);

        for i in 0..config.workers.max(1) {
            let ctx = self.ctx.clone();
            let rx = self.rx.clone();
            let quit = self.quit.clone();
            state.tasks.push(supervise(
                format!("activity-worker-{i}"),
                self.quit.clone(),
                self.ctx.metrics.clone(),
                move || run_worker(ctx.clone(), rx.clone(), quit.clone()),
            ));
        }

        let ctx = self.ctx.clone();
        let quit = self.quit.clone();
        state.tasks.push(supervise(
            "last-activity-flusher",
            self.quit.clone(),
            self.ctx.metrics.clone(),
            move || run_flusher(ctx.clone(), quit.clone()),
        ));

        info!(
            workers = config.workers,
            queue_size = config.queue_size,
            "Activity handler started"
        );
        Ok(())
    }

    /// Raise the quit flag, let workers finish their current activity, then
    /// write tracked activity back to the store.
    pub async fn stop(&self) {
        self.quit.trigger();
        let tasks = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut state.tasks)
        };
        join_all(tasks).await;
        self.ctx.flush_last_activity(None).await;
        info!("Activity handler stopped");
    }

    /// Validate a change notification and queue it.
    ///
    /// A full queue sheds the activity and fails with
    /// [`HandlerError::QueueFull`] after observing `dropped`.
    pub async fn handle(&self, activity: Activity) -> Result<Admission> {
        if self.quit.is_quitting() {
            return Err(HandlerError::Stopped);
        }

        let subscription = match self.ctx.store.get_subscription(&activity.subscription_id).await {
            Ok(subscription) => subscription,
            Err(err) if err.is_not_found() => {
                debug!(
                    subscription_id = %activity.subscription_id,
                    "Notification for an unknown subscription"
                );
                self.ctx.delete_remote_subscription(&activity.subscription_id);
                return Ok(Admission::UnknownSubscription);
            }
            Err(err) => return Err(err.into()),
        };

        if !secret_matches(&subscription.secret, &activity.client_state) {
            return Err(HandlerError::InvalidClientState(
                activity.subscription_id.clone(),
            ));
        }

        let ids = parse_resource(&activity.resource);
        let queued = QueuedActivity {
            activity,
            ids,
            subscription,
        };

        match self.tx.try_send(queued) {
            Ok(()) => Ok(Admission::Queued),
            Err(mpsc::error::TrySendError::Full(queued)) => {
                self.ctx.metrics.observe(MetricKind::Dropped, &[]);
                warn!(
                    subscription_id = %queued.activity.subscription_id,
                    resource = %queued.activity.resource,
                    "Activity queue is full, dropping activity"
                );
                Err(HandlerError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HandlerError::Stopped),
        }
    }

    /// Handle a lifecycle notification inline.
    pub async fn handle_lifecycle_event(&self, activity: &Activity) -> Result<DiscardReason> {
        self.ctx.handle_lifecycle_event(activity).await
    }

    /// Latest change time seen for a subscription and not yet flushed.
    pub fn last_activity_at(&self, subscription_id: &str) -> Option<DateTime<Utc>> {
        self.ctx.last_activity.get(subscription_id)
    }

    /// Write the whole tracked `lastActivityAt` map to the store now.
    pub async fn flush_last_activity(&self) -> usize {
        self.ctx.flush_last_activity(None).await
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.is_quitting()
    }
}

async fn run_worker(ctx: Arc<Context>, rx: SharedReceiver, quit: QuitSignal) {
    loop {
        let next = tokio::select! {
            biased;
            _ = quit.wait() => return,
            next = async { rx.lock().await.recv().await } => next,
        };

        match next {
            Some(queued) => {
                ctx.process_activity(&queued).await;
            }
            None => {
                quit.wait().await;
                return;
            }
        }
    }
}

async fn run_flusher(ctx: Arc<Context>, quit: QuitSignal) {
    let period = ctx.config.flush_interval;
    let window = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::minutes(5));
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = quit.wait() => return,
            _ = ticker.tick() => {
                ctx.flush_last_activity(Some(window)).await;
            }
        }
    }
}
