use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backend::MutationApi;
use crate::error::SyncError;
use crate::model::{ItemId, ItemKind, ItemStatus, ResourceItem, ScopeKey};

pub const DEFAULT_ACTION_COOLDOWN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ActionKind {
    Delete,
    ReEnable,
    ReRun,
}

impl ActionKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Delete => "Delete",
            Self::ReEnable => "Activate",
            Self::ReRun => "Re-run",
        }
    }

    pub fn progress_label(self) -> &'static str {
        match self {
            Self::Delete => "deleting…",
            Self::ReEnable => "activating…",
            Self::ReRun => "re-running…",
        }
    }

    /// Whether the control for this action is shown at all for `item`.
    pub fn offered_for(self, item: &ResourceItem) -> bool {
        match (self, item.kind) {
            (Self::Delete, ItemKind::Release) => true,
            (Self::Delete, ItemKind::PreviewDeployment) => item.status != ItemStatus::Inactive,
            (Self::ReEnable, ItemKind::PreviewDeployment) => item.status == ItemStatus::Inactive,
            (Self::ReRun, ItemKind::PreviewDeployment) => item.status.is_failure(),
            (Self::ReEnable | Self::ReRun, ItemKind::Release) => false,
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ActionState {
    Idle,
    Running(ActionKind),
    Failed(ActionKind),
}

impl ActionState {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ActionTicket(u64);

impl Display for ActionTicket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rejection {
    Busy(ActionState),
    NotOffered,
    UnknownItem,
    Unmounted,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy(ActionState::Running(kind)) => write!(f, "{kind} still running"),
            Self::Busy(_) => write!(f, "cooling down after a failed action"),
            Self::NotOffered => write!(f, "not offered for its current status"),
            Self::UnknownItem => write!(f, "no longer listed"),
            Self::Unmounted => write!(f, "view is closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct ActionEntry {
    ticket: ActionTicket,
    kind: ActionKind,
    failed: bool,
}

/// Per-item transient action states. Items without an entry are idle.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ActionBook {
    entries: BTreeMap<ItemId, ActionEntry>,
    issued: u64,
}

impl ActionBook {
    pub fn state(&self, item: &ItemId) -> ActionState {
        match self.entries.get(item) {
            None => ActionState::Idle,
            Some(entry) if entry.failed => ActionState::Failed(entry.kind),
            Some(entry) => ActionState::Running(entry.kind),
        }
    }

    /// Whether `begin` would accept `kind` on `item` right now.
    pub fn admits(&self, item: &ResourceItem, kind: ActionKind) -> Result<(), Rejection> {
        let current = self.state(&item.id);
        if !current.is_idle() {
            return Err(Rejection::Busy(current));
        }
        if !kind.offered_for(item) {
            return Err(Rejection::NotOffered);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn begin(
        &mut self,
        item: &ResourceItem,
        kind: ActionKind,
    ) -> Result<ActionTicket, Rejection> {
        self.admits(item, kind)?;

        self.issued += 1;
        let ticket = ActionTicket(self.issued);
        self.entries.insert(
            item.id.clone(),
            ActionEntry {
                ticket,
                kind,
                failed: false,
            },
        );
        Ok(ticket)
    }

    /// Records the outcome of a running action. Returns the action kind, or
    /// `None` when the ticket no longer owns the item.
    pub fn settle(
        &mut self,
        item: &ItemId,
        ticket: ActionTicket,
        succeeded: bool,
    ) -> Option<ActionKind> {
        let entry = self.entries.get_mut(item)?;
        if entry.ticket != ticket || entry.failed {
            return None;
        }

        let kind = entry.kind;
        if succeeded {
            self.entries.remove(item);
        } else {
            entry.failed = true;
        }
        Some(kind)
    }

    pub fn cooldown_elapsed(&mut self, item: &ItemId, ticket: ActionTicket) -> bool {
        match self.entries.get(item) {
            Some(entry) if entry.ticket == ticket && entry.failed => {
                self.entries.remove(item);
                true
            }
            _ => false,
        }
    }

    /// Drops every entry while keeping tickets unique across resets.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// Issues mutation requests. The controller owns scheduling; this only talks
/// to the backend and measures the cool-down.
#[derive(Clone)]
pub struct ActionExecutor {
    mutations: Arc<dyn MutationApi>,
    cooldown: Duration,
}

impl ActionExecutor {
    pub fn new(mutations: Arc<dyn MutationApi>, cooldown: Duration) -> Self {
        Self {
            mutations,
            cooldown,
        }
    }

    pub async fn execute(
        &self,
        scope: &ScopeKey,
        item: &ItemId,
        kind: ActionKind,
    ) -> Result<(), SyncError> {
        let started = Instant::now();
        debug!(%item, action = %kind, "action: request start");
        let outcome = match kind {
            ActionKind::Delete => self.mutations.delete_item(scope, item).await,
            ActionKind::ReEnable => self.mutations.re_enable_item(scope, item).await,
            ActionKind::ReRun => self.mutations.re_run_item(scope, item).await,
        };
        match &outcome {
            Ok(()) => {
                info!(%item, action = %kind, took_ms = %started.elapsed().as_millis(), "action: ok")
            }
            Err(error) => {
                warn!(%item, action = %kind, %error, "action: failed")
            }
        }
        outcome
    }

    pub async fn wait_cooldown(&self) {
        tokio::time::sleep(self.cooldown).await;
    }
}
