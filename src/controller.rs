use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::actions::{ActionExecutor, ActionKind, DEFAULT_ACTION_COOLDOWN, Rejection};
use crate::backend::{Backends, ErrorSink, NoticeSource};
use crate::channel::LiveChannel;
use crate::fetcher::ResourceFetcher;
use crate::guard::{DEFAULT_FETCH_DEADLINE, TimeoutGuard};
use crate::model::{ItemId, ListFilters, ScopeKey};
use crate::state::{CollectionState, Effect, SyncEvent, SyncMachine};

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub filters: ListFilters,
    pub fetch_deadline: Duration,
    pub action_cooldown: Duration,
    /// `None` disables the periodic re-fetch.
    pub poll_interval: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            filters: ListFilters::default(),
            fetch_deadline: DEFAULT_FETCH_DEADLINE,
            action_cooldown: DEFAULT_ACTION_COOLDOWN,
            poll_interval: Some(Duration::from_secs(15)),
        }
    }
}

/// Owns the collection of one view and drives `SyncMachine` from a single
/// event queue. Spawned work (fetches, actions, cool-downs, the channel
/// reader) only posts events back into that queue.
pub struct ResourceListController {
    machine: SyncMachine,
    fetcher: ResourceFetcher,
    guard: TimeoutGuard,
    notices: Arc<dyn NoticeSource>,
    executor: ActionExecutor,
    errors: Arc<dyn ErrorSink>,
    poll_every: Option<Duration>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
    channel: Option<LiveChannel>,
    tasks: JoinSet<()>,
    poll: Option<Interval>,
}

impl ResourceListController {
    pub fn new(backends: Backends, settings: ControllerSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            machine: SyncMachine::default(),
            fetcher: ResourceFetcher::new(backends.source, settings.filters),
            guard: TimeoutGuard::new(settings.fetch_deadline),
            notices: backends.notices,
            executor: ActionExecutor::new(backends.mutations, settings.action_cooldown),
            errors: backends.errors,
            poll_every: settings.poll_interval.filter(|every| !every.is_zero()),
            events_tx,
            events_rx,
            channel: None,
            tasks: JoinSet::new(),
            poll: None,
        }
    }

    pub fn state(&self) -> &CollectionState {
        self.machine.state()
    }

    pub fn is_mounted(&self) -> bool {
        self.state().scope.is_some() && !self.machine.is_torn_down()
    }

    pub fn mount(&mut self, scope: ScopeKey) {
        info!(%scope, "controller: mount");
        self.handle(SyncEvent::Activate(scope));
    }

    /// Re-synchronizes when `scope` differs from the active one.
    pub fn set_scope(&mut self, scope: ScopeKey) {
        self.handle(SyncEvent::Activate(scope));
    }

    pub fn refresh(&mut self) {
        self.handle(SyncEvent::Refresh);
    }

    /// Issues the mutation, or says why it was refused.
    pub fn invoke(&mut self, item: ItemId, kind: ActionKind) -> Result<(), Rejection> {
        if self.machine.is_torn_down() {
            return Err(Rejection::Unmounted);
        }
        self.state().check_action(&item, kind)?;
        self.handle(SyncEvent::Invoke { item, kind });
        Ok(())
    }

    pub fn unmount(&mut self) {
        info!("controller: unmount");
        self.handle(SyncEvent::Teardown);
    }

    /// Waits for the next posted event or poll tick.
    pub async fn next_event(&mut self) -> SyncEvent {
        let poll = &mut self.poll;
        tokio::select! {
            Some(event) = self.events_rx.recv() => event,
            _ = async {
                match poll {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => pending::<()>().await,
                }
            } => SyncEvent::PollTick,
        }
    }

    /// Applies one event and runs the resulting effects. Returns the number of
    /// effects executed.
    pub fn handle(&mut self, event: SyncEvent) -> usize {
        self.reap_finished();

        let machine = std::mem::take(&mut self.machine);
        let (machine, effects) = machine.transition(event);
        self.machine = machine;

        let count = effects.len();
        for effect in effects {
            self.apply(effect);
        }
        count
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(error) = joined
                && error.is_panic()
            {
                warn!(%error, "controller: task panicked");
            }
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartFetch { ticket, scope } => {
                let fetcher = self.fetcher.clone();
                let guard = self.guard;
                let tx = self.events_tx.clone();
                self.tasks.spawn(async move {
                    let outcome = guard.run(fetcher.fetch(&scope)).await;
                    let _ = tx.send(SyncEvent::FetchSettled { ticket, outcome });
                });
            }
            Effect::OpenChannel { epoch, scope } => {
                self.channel = Some(LiveChannel::open(
                    self.notices.clone(),
                    scope,
                    epoch,
                    self.events_tx.clone(),
                ));
                self.poll = self.poll_every.map(|every| {
                    let mut ticker = interval_at(Instant::now() + every, every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    ticker
                });
            }
            Effect::CloseChannel => {
                if let Some(channel) = self.channel.take() {
                    channel.close();
                }
                self.poll = None;
            }
            Effect::RunAction {
                epoch,
                ticket,
                scope,
                item,
                kind,
            } => {
                let executor = self.executor.clone();
                let tx = self.events_tx.clone();
                self.tasks.spawn(async move {
                    let outcome = executor.execute(&scope, &item, kind).await;
                    let _ = tx.send(SyncEvent::ActionSettled {
                        epoch,
                        ticket,
                        item,
                        outcome,
                    });
                });
            }
            Effect::StartCooldown {
                epoch,
                ticket,
                item,
            } => {
                let executor = self.executor.clone();
                let tx = self.events_tx.clone();
                self.tasks.spawn(async move {
                    executor.wait_cooldown().await;
                    let _ = tx.send(SyncEvent::CooldownElapsed {
                        epoch,
                        ticket,
                        item,
                    });
                });
            }
            Effect::ReportError(message) => {
                warn!(%message, "controller: reporting error");
                self.errors.report_error(&message);
            }
            Effect::AbortOutstanding => {
                debug!(outstanding = self.tasks.len(), "controller: aborting tasks");
                self.tasks.abort_all();
                self.poll = None;
            }
        }
    }
}
