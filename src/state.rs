//! Collection state and its transition function.
//!
//! `SyncMachine::transition` is pure: it consumes the machine and one event and
//! returns the next machine plus the effects the controller has to run. Every
//! asynchronous completion carries the token it was started with, so anything
//! that belongs to a superseded scope, fetch or action is dropped here.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use tracing::debug;

use crate::actions::{ActionBook, ActionKind, ActionState, ActionTicket, Rejection};
use crate::error::SyncError;
use crate::model::{ChannelScope, ItemId, ResourceItem, ScopeKey};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Loading,
    Loaded,
    Error,
}

impl Phase {
    pub fn title(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Loaded => "synced",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChannelStatus {
    Closed,
    Connecting,
    Live,
    Lost(String),
}

/// Scope generation. Bumped on every activation and on teardown.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Epoch(u64);

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct FetchTicket {
    pub epoch: Epoch,
    seq: u64,
}

impl Display for FetchTicket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/f{}", self.epoch, self.seq)
    }
}

/// Read-only snapshot handed to rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    pub scope: Option<ScopeKey>,
    pub phase: Phase,
    pub items: Vec<ResourceItem>,
    pub last_error: Option<SyncError>,
    pub channel: ChannelStatus,
    actions: ActionBook,
    /// Items waiting for a snapshot fetched after their last successful action,
    /// keyed by the newest fetch sequence issued when the mark was set.
    refresh_marks: BTreeMap<ItemId, u64>,
}

impl CollectionState {
    fn empty(scope: Option<ScopeKey>) -> Self {
        Self {
            scope,
            phase: Phase::Idle,
            items: Vec::new(),
            last_error: None,
            channel: ChannelStatus::Closed,
            actions: ActionBook::default(),
            refresh_marks: BTreeMap::new(),
        }
    }

    pub fn item(&self, id: &ItemId) -> Option<&ResourceItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn action_state(&self, id: &ItemId) -> ActionState {
        self.actions.state(id)
    }

    pub fn awaiting_refresh(&self, id: &ItemId) -> bool {
        self.refresh_marks.contains_key(id)
    }

    /// Why an action on `id` would be refused, if it would.
    pub fn check_action(&self, id: &ItemId, kind: ActionKind) -> Result<(), Rejection> {
        let item = self.item(id).ok_or(Rejection::UnknownItem)?;
        self.actions.admits(item, kind)
    }

    /// Successful fetch with nothing in it. Distinct from an error.
    pub fn is_empty_result(&self) -> bool {
        self.phase == Phase::Loaded && self.items.is_empty()
    }

    /// Error phase still showing an earlier snapshot.
    pub fn is_stale(&self) -> bool {
        self.phase == Phase::Error && !self.items.is_empty()
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::empty(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Mount, or a change of project, cluster or namespace.
    Activate(ScopeKey),
    /// Explicit user retry.
    Refresh,
    Notice(Epoch),
    PollTick,
    FetchSettled {
        ticket: FetchTicket,
        outcome: Result<Vec<ResourceItem>, SyncError>,
    },
    Channel {
        epoch: Epoch,
        status: ChannelStatus,
    },
    Invoke {
        item: ItemId,
        kind: ActionKind,
    },
    ActionSettled {
        epoch: Epoch,
        ticket: ActionTicket,
        item: ItemId,
        outcome: Result<(), SyncError>,
    },
    CooldownElapsed {
        epoch: Epoch,
        ticket: ActionTicket,
        item: ItemId,
    },
    Teardown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartFetch {
        ticket: FetchTicket,
        scope: ScopeKey,
    },
    OpenChannel {
        epoch: Epoch,
        scope: ChannelScope,
    },
    CloseChannel,
    RunAction {
        epoch: Epoch,
        ticket: ActionTicket,
        scope: ScopeKey,
        item: ItemId,
        kind: ActionKind,
    },
    StartCooldown {
        epoch: Epoch,
        ticket: ActionTicket,
        item: ItemId,
    },
    ReportError(String),
    AbortOutstanding,
}

#[derive(Debug, Clone, Default)]
pub struct SyncMachine {
    state: CollectionState,
    epoch: Epoch,
    fetches_issued: u64,
    in_flight: Option<FetchTicket>,
    follow_up: bool,
    torn_down: bool,
    /// Deleted item ids with the last fetch seq issued before the delete
    /// landed. Snapshots from those fetches may still carry the item.
    deleted: BTreeMap<ItemId, u64>,
}

impl SyncMachine {
    pub fn state(&self) -> &CollectionState {
        &self.state
    }

    #[cfg(test)]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> Option<FetchTicket> {
        self.in_flight
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn transition(mut self, event: SyncEvent) -> (Self, Vec<Effect>) {
        let mut effects = Vec::new();
        if self.torn_down {
            debug!(?event, "event after teardown ignored");
            return (self, effects);
        }

        match event {
            SyncEvent::Activate(scope) => self.activate(scope, &mut effects),
            SyncEvent::Refresh => {
                if self.in_flight.is_some() {
                    debug!("refresh ignored: fetch outstanding");
                } else {
                    self.start_fetch(&mut effects);
                }
            }
            SyncEvent::Notice(epoch) => {
                if epoch == self.epoch {
                    self.on_notice(&mut effects);
                } else {
                    debug!(%epoch, current = %self.epoch, "notice from closed channel dropped");
                }
            }
            SyncEvent::PollTick => self.on_notice(&mut effects),
            SyncEvent::FetchSettled { ticket, outcome } => {
                self.on_fetch_settled(ticket, outcome, &mut effects)
            }
            SyncEvent::Channel { epoch, status } => {
                if epoch == self.epoch {
                    self.state.channel = status;
                }
            }
            SyncEvent::Invoke { item, kind } => self.on_invoke(item, kind, &mut effects),
            SyncEvent::ActionSettled {
                epoch,
                ticket,
                item,
                outcome,
            } => {
                if epoch == self.epoch {
                    self.on_action_settled(ticket, item, outcome, &mut effects);
                } else {
                    debug!(%item, %ticket, "action outcome from previous scope dropped");
                }
            }
            SyncEvent::CooldownElapsed {
                epoch,
                ticket,
                item,
            } => {
                if epoch == self.epoch {
                    self.state.actions.cooldown_elapsed(&item, ticket);
                }
            }
            SyncEvent::Teardown => {
                self.torn_down = true;
                self.epoch = Epoch(self.epoch.0 + 1);
                self.in_flight = None;
                self.follow_up = false;
                effects.push(Effect::CloseChannel);
                effects.push(Effect::AbortOutstanding);
            }
        }

        (self, effects)
    }

    fn activate(&mut self, scope: ScopeKey, effects: &mut Vec<Effect>) {
        if self.state.scope.as_ref() == Some(&scope) {
            debug!(%scope, "scope unchanged");
            return;
        }

        if self.state.scope.is_some() {
            effects.push(Effect::CloseChannel);
        }
        self.epoch = Epoch(self.epoch.0 + 1);
        self.in_flight = None;
        self.follow_up = false;
        self.deleted.clear();

        let mut actions = std::mem::take(&mut self.state.actions);
        actions.reset();
        self.state = CollectionState {
            actions,
            channel: ChannelStatus::Connecting,
            ..CollectionState::empty(Some(scope.clone()))
        };
        debug!(%scope, epoch = %self.epoch, "scope activated");

        effects.push(Effect::OpenChannel {
            epoch: self.epoch,
            scope: scope.channel_scope(),
        });
        self.start_fetch(effects);
    }

    fn start_fetch(&mut self, effects: &mut Vec<Effect>) {
        let Some(scope) = self.state.scope.clone() else {
            return;
        };

        self.fetches_issued += 1;
        let ticket = FetchTicket {
            epoch: self.epoch,
            seq: self.fetches_issued,
        };
        self.in_flight = Some(ticket);
        self.state.phase = Phase::Loading;
        debug!(%ticket, %scope, "fetch started");
        effects.push(Effect::StartFetch { ticket, scope });
    }

    fn on_notice(&mut self, effects: &mut Vec<Effect>) {
        if self.state.phase == Phase::Loaded && self.in_flight.is_none() {
            self.start_fetch(effects);
        } else {
            debug!(phase = ?self.state.phase, "notice ignored");
        }
    }

    fn on_fetch_settled(
        &mut self,
        ticket: FetchTicket,
        outcome: Result<Vec<ResourceItem>, SyncError>,
        effects: &mut Vec<Effect>,
    ) {
        if self.in_flight != Some(ticket) {
            debug!(%ticket, "superseded fetch result dropped");
            return;
        }
        self.in_flight = None;

        match outcome {
            Ok(mut items) => {
                debug!(%ticket, items = items.len(), "fetch settled");
                items.retain(|item| {
                    !matches!(self.deleted.get(&item.id), Some(marked_at) if *marked_at >= ticket.seq)
                });
                self.deleted.retain(|_, marked_at| *marked_at > ticket.seq);
                self.state.items = items;
                self.state.phase = Phase::Loaded;
                self.state.last_error = None;
                self.state
                    .refresh_marks
                    .retain(|_, marked_at| *marked_at >= ticket.seq);

                if std::mem::take(&mut self.follow_up) {
                    self.start_fetch(effects);
                }
            }
            Err(error) => {
                debug!(%ticket, %error, "fetch failed");
                self.state.phase = Phase::Error;
                self.follow_up = false;
                effects.push(Effect::ReportError(error.user_message()));
                self.state.last_error = Some(error);
            }
        }
    }

    fn on_invoke(&mut self, id: ItemId, kind: ActionKind, effects: &mut Vec<Effect>) {
        let Some(scope) = self.state.scope.clone() else {
            return;
        };
        let Some(item) = self.state.item(&id).cloned() else {
            debug!(item = %id, "action on unknown item ignored");
            return;
        };

        match self.state.actions.begin(&item, kind) {
            Ok(ticket) => effects.push(Effect::RunAction {
                epoch: self.epoch,
                ticket,
                scope,
                item: id,
                kind,
            }),
            Err(Rejection::Busy(state)) => {
                let conflict = SyncError::ActionConflict { item: id };
                debug!(?state, %conflict, "action rejected");
            }
            Err(rejection) => {
                debug!(item = %id, action = %kind, status = %item.status, %rejection, "action refused");
            }
        }
    }

    fn on_action_settled(
        &mut self,
        ticket: ActionTicket,
        id: ItemId,
        outcome: Result<(), SyncError>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(kind) = self.state.actions.settle(&id, ticket, outcome.is_ok()) else {
            debug!(item = %id, %ticket, "stale action outcome dropped");
            return;
        };

        match outcome {
            Ok(()) if kind == ActionKind::Delete => {
                self.state.items.retain(|item| item.id != id);
                self.state.refresh_marks.remove(&id);
                if self.in_flight.is_some() {
                    self.deleted.insert(id, self.fetches_issued);
                }
            }
            Ok(()) => {
                self.state.refresh_marks.insert(id, self.fetches_issued);
                if self.in_flight.is_some() {
                    self.follow_up = true;
                } else {
                    self.start_fetch(effects);
                }
            }
            Err(error) => {
                let name = self
                    .state
                    .item(&id)
                    .map(|item| item.name.clone())
                    .unwrap_or_else(|| id.to_string());
                effects.push(Effect::ReportError(format!("{kind} failed for {name}: {error}")));
                effects.push(Effect::StartCooldown {
                    epoch: self.epoch,
                    ticket,
                    item: id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelStatus, Effect, FetchTicket, Phase, SyncEvent, SyncMachine};
    use crate::actions::{ActionKind, ActionState, ActionTicket};
    use crate::error::SyncError;
    use crate::fetcher::tests::item;
    use crate::model::{ItemId, ItemStatus, ResourceItem, ScopeKey};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn scope(namespace: &str) -> ScopeKey {
        ScopeKey::new(1, 7, Some(namespace.to_string()))
    }

    fn step(machine: SyncMachine, event: SyncEvent) -> (SyncMachine, Vec<Effect>) {
        machine.transition(event)
    }

    fn fetch_tickets(effects: &[Effect]) -> Vec<FetchTicket> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::StartFetch { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .collect()
    }

    fn action_ticket(effects: &[Effect]) -> Option<ActionTicket> {
        effects.iter().find_map(|effect| match effect {
            Effect::RunAction { ticket, .. } => Some(*ticket),
            _ => None,
        })
    }

    fn reports(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|effect| matches!(effect, Effect::ReportError(_)))
            .count()
    }

    /// Mounts on `scope` and settles the first fetch with `items`.
    fn loaded(items: Vec<ResourceItem>) -> SyncMachine {
        let (machine, effects) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let ticket = fetch_tickets(&effects)[0];
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket,
                outcome: Ok(items),
            },
        );
        assert_eq!(machine.state().phase, Phase::Loaded);
        machine
    }

    fn ids(machine: &SyncMachine) -> Vec<&str> {
        machine.state().items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn mount_opens_channel_and_starts_one_fetch() {
        let (machine, effects) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));

        assert_eq!(machine.state().phase, Phase::Loading);
        assert_eq!(machine.state().channel, ChannelStatus::Connecting);
        assert_eq!(fetch_tickets(&effects).len(), 1);
        assert!(matches!(effects[0], Effect::OpenChannel { .. }));
        assert!(!effects.contains(&Effect::CloseChannel));
    }

    #[test]
    fn empty_snapshot_is_loaded_not_error() {
        let machine = loaded(Vec::new());
        assert!(machine.state().is_empty_result());
        assert_eq!(machine.state().last_error, None);
    }

    #[test]
    fn superseded_fetch_never_mutates_state() {
        let (machine, first) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let (machine, second) = step(machine, SyncEvent::Activate(scope("prod")));
        let (machine, third) = step(machine, SyncEvent::Activate(scope("qa")));

        let stale = [fetch_tickets(&first)[0], fetch_tickets(&second)[0]];
        let active = fetch_tickets(&third)[0];
        assert!(second.contains(&Effect::CloseChannel));
        assert_eq!(machine.in_flight(), Some(active));

        let mut machine = machine;
        for ticket in stale {
            let (next, effects) = step(
                machine,
                SyncEvent::FetchSettled {
                    ticket,
                    outcome: Ok(vec![item("ghost", ItemStatus::Created)]),
                },
            );
            assert!(effects.is_empty());
            assert_eq!(next.state().phase, Phase::Loading);
            assert!(next.state().items.is_empty());
            machine = next;
        }

        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: active,
                outcome: Ok(vec![item("qa-1", ItemStatus::Created)]),
            },
        );
        assert_eq!(ids(&machine), vec!["qa-1"]);
        assert_eq!(machine.state().scope, Some(scope("qa")));
    }

    #[test]
    fn same_scope_activation_is_a_no_op() {
        let machine = loaded(vec![item("a", ItemStatus::Created)]);
        let (machine, effects) = step(machine, SyncEvent::Activate(scope("dev")));
        assert!(effects.is_empty());
        assert_eq!(ids(&machine), vec!["a"]);
    }

    #[test]
    fn scope_change_replaces_collection_wholesale() {
        let machine = loaded(vec![item("a", ItemStatus::Created)]);
        let (machine, _) = step(machine, SyncEvent::Activate(scope("prod")));
        assert_eq!(machine.state().phase, Phase::Loading);
        assert!(machine.state().items.is_empty());
    }

    #[test]
    fn failure_and_timeout_keep_previous_items_and_report_once() {
        let machine = loaded(vec![item("a", ItemStatus::Created), item("b", ItemStatus::Failed)]);
        let (machine, effects) = step(machine, SyncEvent::Refresh);
        assert_eq!(machine.state().phase, Phase::Loading);
        assert_eq!(ids(&machine), vec!["a", "b"]);

        let ticket = fetch_tickets(&effects)[0];
        let timeout = SyncError::Timeout {
            after: Duration::from_millis(3000),
        };
        let (machine, effects) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket,
                outcome: Err(timeout.clone()),
            },
        );
        assert_eq!(machine.state().phase, Phase::Error);
        assert!(machine.state().is_stale());
        assert_eq!(machine.state().last_error, Some(timeout));
        assert_eq!(reports(&effects), 1);

        let (machine, effects) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket,
                outcome: Ok(Vec::new()),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state().phase, Phase::Error);
        assert_eq!(ids(&machine), vec!["a", "b"]);
    }

    #[test]
    fn first_fetch_failure_leaves_empty_error() {
        let (machine, effects) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let (machine, effects) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: fetch_tickets(&effects)[0],
                outcome: Err(SyncError::Network("connection refused".to_string())),
            },
        );
        assert_eq!(machine.state().phase, Phase::Error);
        assert!(machine.state().items.is_empty());
        assert!(!machine.state().is_empty_result());
        assert_eq!(
            effects,
            vec![Effect::ReportError(
                "Error connecting to cluster: network failure: connection refused".to_string()
            )]
        );
    }

    #[test]
    fn notice_burst_triggers_a_single_refetch() {
        let mut machine = loaded(vec![item("a", ItemStatus::Creating)]);
        let epoch = machine.epoch();
        let mut started = Vec::new();
        for _ in 0..5 {
            let (next, effects) = step(machine, SyncEvent::Notice(epoch));
            started.extend(fetch_tickets(&effects));
            machine = next;
        }
        assert_eq!(started.len(), 1);
        assert_eq!(ids(&machine), vec!["a"]);
    }

    #[test]
    fn notices_are_ignored_in_error_and_from_old_epochs() {
        let machine = loaded(vec![item("a", ItemStatus::Created)]);
        let old_epoch = machine.epoch();
        let (machine, effects) = step(machine, SyncEvent::Activate(scope("prod")));
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: fetch_tickets(&effects)[0],
                outcome: Err(SyncError::server(500, "down")),
            },
        );

        let epoch = machine.epoch();
        let (machine, effects) = step(machine, SyncEvent::Notice(epoch));
        assert!(effects.is_empty());
        let (machine, effects) = step(machine, SyncEvent::PollTick);
        assert!(effects.is_empty());
        let (_, effects) = step(machine, SyncEvent::Notice(old_epoch));
        assert!(effects.is_empty());
    }

    #[test]
    fn refresh_recovers_from_error() {
        let (machine, effects) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: fetch_tickets(&effects)[0],
                outcome: Err(SyncError::Network("reset".to_string())),
            },
        );
        let (machine, effects) = step(machine, SyncEvent::Refresh);
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: fetch_tickets(&effects)[0],
                outcome: Ok(vec![item("a", ItemStatus::Created)]),
            },
        );
        assert_eq!(machine.state().phase, Phase::Loaded);
        assert_eq!(machine.state().last_error, None);
    }

    #[test]
    fn refresh_while_loading_does_not_start_second_fetch() {
        let (machine, _) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let (_, effects) = step(machine, SyncEvent::Refresh);
        assert!(fetch_tickets(&effects).is_empty());
    }

    #[test]
    fn delete_removes_exactly_that_item() {
        let machine = loaded(vec![
            item("a", ItemStatus::Created),
            item("b", ItemStatus::Created),
            item("c", ItemStatus::Created),
        ]);
        let target = ItemId::new("b");
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::Delete,
            },
        );
        let ticket = action_ticket(&effects).unwrap();
        assert_eq!(
            machine.state().action_state(&target),
            ActionState::Running(ActionKind::Delete)
        );

        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::Delete,
            },
        );
        assert!(effects.is_empty());
        assert_eq!(ids(&machine), vec!["a", "b", "c"]);

        let epoch = machine.epoch();
        let (machine, effects) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch,
                ticket,
                item: target.clone(),
                outcome: Ok(()),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(ids(&machine), vec!["a", "c"]);
        assert_eq!(machine.state().action_state(&target), ActionState::Idle);
    }

    #[test]
    fn fetch_started_before_delete_landed_cannot_restore_the_item() {
        let machine = loaded(vec![item("a", ItemStatus::Created), item("b", ItemStatus::Created)]);
        let target = ItemId::new("b");
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::Delete,
            },
        );
        let action = action_ticket(&effects).unwrap();
        let epoch = machine.epoch();

        let (machine, effects) = step(machine, SyncEvent::Notice(epoch));
        let racing = fetch_tickets(&effects)[0];

        let (machine, _) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch,
                ticket: action,
                item: target.clone(),
                outcome: Ok(()),
            },
        );
        assert_eq!(ids(&machine), vec!["a"]);

        let (machine, effects) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: racing,
                outcome: Ok(vec![item("a", ItemStatus::Created), item("b", ItemStatus::Created)]),
            },
        );
        assert_eq!(machine.state().phase, Phase::Loaded);
        assert_eq!(ids(&machine), vec!["a"]);
        assert!(fetch_tickets(&effects).is_empty());

        let (machine, effects) = step(machine, SyncEvent::Notice(epoch));
        let later = fetch_tickets(&effects)[0];
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: later,
                outcome: Ok(vec![item("a", ItemStatus::Created), item("b", ItemStatus::Created)]),
            },
        );
        assert_eq!(ids(&machine), vec!["a", "b"]);
    }

    #[test]
    fn failed_action_keeps_item_and_recovers_after_cooldown() {
        let machine = loaded(vec![item("pr", ItemStatus::Failed)]);
        let target = ItemId::new("pr");
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::ReRun,
            },
        );
        let ticket = action_ticket(&effects).unwrap();
        let epoch = machine.epoch();

        let (machine, effects) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch,
                ticket,
                item: target.clone(),
                outcome: Err(SyncError::server(502, "workflow dispatch rejected")),
            },
        );
        assert_eq!(
            machine.state().action_state(&target),
            ActionState::Failed(ActionKind::ReRun)
        );
        assert_eq!(machine.state().phase, Phase::Loaded);
        assert_eq!(machine.state().items[0].status, ItemStatus::Failed);
        assert_eq!(reports(&effects), 1);
        assert!(effects.contains(&Effect::StartCooldown {
            epoch,
            ticket,
            item: target.clone()
        }));

        let (machine, _) = step(
            machine,
            SyncEvent::CooldownElapsed {
                epoch,
                ticket,
                item: target.clone(),
            },
        );
        assert_eq!(machine.state().action_state(&target), ActionState::Idle);
        assert_eq!(machine.state().items[0].status, ItemStatus::Failed);
    }

    #[test]
    fn re_enable_success_marks_item_and_refreshes() {
        let machine = loaded(vec![item("pr", ItemStatus::Inactive)]);
        let target = ItemId::new("pr");
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::ReEnable,
            },
        );
        let ticket = action_ticket(&effects).unwrap();
        let epoch = machine.epoch();

        let (machine, effects) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch,
                ticket,
                item: target.clone(),
                outcome: Ok(()),
            },
        );
        assert!(machine.state().awaiting_refresh(&target));
        assert_eq!(machine.state().items[0].status, ItemStatus::Inactive);
        let refetch = fetch_tickets(&effects);
        assert_eq!(refetch.len(), 1);

        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: refetch[0],
                outcome: Ok(vec![item("pr", ItemStatus::Creating)]),
            },
        );
        assert!(!machine.state().awaiting_refresh(&target));
        assert_eq!(machine.state().items[0].status, ItemStatus::Creating);
    }

    #[test]
    fn action_success_during_fetch_queues_one_follow_up() {
        let machine = loaded(vec![item("pr", ItemStatus::Failed)]);
        let target = ItemId::new("pr");
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: target.clone(),
                kind: ActionKind::ReRun,
            },
        );
        let action = action_ticket(&effects).unwrap();
        let epoch = machine.epoch();
        let (machine, effects) = step(machine, SyncEvent::Notice(epoch));
        let racing = fetch_tickets(&effects)[0];

        let (machine, effects) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch,
                ticket: action,
                item: target.clone(),
                outcome: Ok(()),
            },
        );
        assert!(fetch_tickets(&effects).is_empty());

        let (machine, effects) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: racing,
                outcome: Ok(vec![item("pr", ItemStatus::Failed)]),
            },
        );
        assert!(machine.state().awaiting_refresh(&target));
        assert_eq!(fetch_tickets(&effects).len(), 1);
        assert_eq!(machine.state().phase, Phase::Loading);
    }

    #[test]
    fn action_outcomes_from_previous_scope_are_dropped() {
        let machine = loaded(vec![item("a", ItemStatus::Created)]);
        let old_epoch = machine.epoch();
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: ItemId::new("a"),
                kind: ActionKind::Delete,
            },
        );
        let ticket = action_ticket(&effects).unwrap();
        let (machine, effects) = step(machine, SyncEvent::Activate(scope("prod")));
        let (machine, _) = step(
            machine,
            SyncEvent::FetchSettled {
                ticket: fetch_tickets(&effects)[0],
                outcome: Ok(vec![item("a", ItemStatus::Created)]),
            },
        );

        let (machine, effects) = step(
            machine,
            SyncEvent::ActionSettled {
                epoch: old_epoch,
                ticket,
                item: ItemId::new("a"),
                outcome: Ok(()),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(ids(&machine), vec!["a"]);
        assert_eq!(machine.state().action_state(&ItemId::new("a")), ActionState::Idle);
    }

    #[test]
    fn actions_not_offered_or_on_unknown_items_do_nothing() {
        let machine = loaded(vec![item("live", ItemStatus::Created)]);
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: ItemId::new("live"),
                kind: ActionKind::ReRun,
            },
        );
        assert!(effects.is_empty());
        let (machine, effects) = step(
            machine,
            SyncEvent::Invoke {
                item: ItemId::new("missing"),
                kind: ActionKind::Delete,
            },
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state().action_state(&ItemId::new("live")), ActionState::Idle);
    }

    #[test]
    fn channel_status_never_changes_phase() {
        let machine = loaded(vec![item("a", ItemStatus::Created)]);
        let epoch = machine.epoch();
        let (machine, effects) = step(
            machine,
            SyncEvent::Channel {
                epoch,
                status: ChannelStatus::Lost("handshake failed".to_string()),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(machine.state().phase, Phase::Loaded);
        assert_eq!(
            machine.state().channel,
            ChannelStatus::Lost("handshake failed".to_string())
        );
    }

    #[test]
    fn teardown_freezes_the_snapshot() {
        let (machine, effects) = step(SyncMachine::default(), SyncEvent::Activate(scope("dev")));
        let ticket = fetch_tickets(&effects)[0];
        let epoch = machine.epoch();
        let frozen = machine.state().clone();

        let (machine, effects) = step(machine, SyncEvent::Teardown);
        assert_eq!(effects, vec![Effect::CloseChannel, Effect::AbortOutstanding]);
        assert_eq!(machine.state(), &frozen);

        let late = vec![
            SyncEvent::FetchSettled {
                ticket,
                outcome: Ok(vec![item("late", ItemStatus::Created)]),
            },
            SyncEvent::Notice(epoch),
            SyncEvent::Refresh,
            SyncEvent::Activate(scope("prod")),
            SyncEvent::Channel {
                epoch,
                status: ChannelStatus::Live,
            },
        ];
        let mut machine = machine;
        for event in late {
            let (next, effects) = step(machine, event);
            assert!(effects.is_empty());
            assert_eq!(next.state(), &frozen);
            machine = next;
        }
    }
}
