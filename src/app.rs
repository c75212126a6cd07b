use crate::actions::{ActionKind, ActionState, Rejection};
use crate::input::Action;
use crate::model::{ItemId, ResourceItem, ScopeKey};
use crate::state::CollectionState;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Refresh,
    Invoke { item: ItemId, kind: ActionKind },
    SwitchScope(ScopeKey),
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    prompt: String,
    command: AppCommand,
}

/// View state of the terminal: selection, prompts and the latest snapshot of
/// the controller's collection.
#[derive(Debug, Clone)]
pub struct App {
    running: bool,
    backend: String,
    scope: ScopeKey,
    namespaces: Vec<String>,
    last_namespace: Option<String>,
    snapshot: CollectionState,
    selected: usize,
    selected_id: Option<ItemId>,
    pending_confirmation: Option<PendingConfirmation>,
    status: String,
}

impl App {
    pub fn new(backend: String, scope: ScopeKey, namespaces: Vec<String>) -> Self {
        let last_namespace = scope.namespace.clone();
        Self {
            running: true,
            backend,
            scope,
            namespaces,
            last_namespace,
            snapshot: CollectionState::default(),
            selected: 0,
            selected_id: None,
            pending_confirmation: None,
            status: "Connecting…".to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn snapshot(&self) -> &CollectionState {
        &self.snapshot
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn input_mode(&self) -> InputMode {
        if self.pending_confirmation.is_some() {
            InputMode::Confirm
        } else {
            InputMode::Normal
        }
    }

    pub fn confirmation_prompt(&self) -> Option<&str> {
        self.pending_confirmation
            .as_ref()
            .map(|pending| pending.prompt.as_str())
    }

    pub fn selected_index(&self) -> Option<usize> {
        (!self.snapshot.items.is_empty()).then_some(self.selected)
    }

    pub fn selected_item(&self) -> Option<&ResourceItem> {
        self.snapshot.items.get(self.selected)
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn report_error(&mut self, message: &str) {
        self.set_status(summarize_error_line(message));
    }

    /// Replaces the snapshot. The selection follows the selected item by id.
    pub fn sync(&mut self, state: &CollectionState) {
        if self.snapshot == *state {
            return;
        }
        self.snapshot = state.clone();

        let items = &self.snapshot.items;
        if let Some(index) = self
            .selected_id
            .as_ref()
            .and_then(|id| items.iter().position(|item| &item.id == id))
        {
            self.selected = index;
        } else {
            self.selected = self.selected.min(items.len().saturating_sub(1));
        }
        self.selected_id = items.get(self.selected).map(|item| item.id.clone());

        let pending_target_gone = match &self.pending_confirmation {
            Some(PendingConfirmation {
                command: AppCommand::Invoke { item, .. },
                ..
            }) => self.snapshot.item(item).is_none(),
            _ => false,
        };
        if pending_target_gone {
            self.pending_confirmation = None;
            self.status = "Item disappeared; action cancelled".to_string();
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if let Some(pending) = self.pending_confirmation.take() {
            match action {
                Action::ConfirmYes => {
                    self.status = format!("Confirmed: {}", pending.prompt);
                    return pending.command;
                }
                Action::ConfirmNo => {
                    self.status = "Action cancelled".to_string();
                    return AppCommand::None;
                }
                Action::Quit => {
                    self.running = false;
                    return AppCommand::None;
                }
                _ => {
                    self.pending_confirmation = Some(pending);
                    self.status =
                        "Pending confirmation: press y to confirm or n to cancel".to_string();
                    return AppCommand::None;
                }
            }
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::Top => {
                self.select_index(0);
                AppCommand::None
            }
            Action::Bottom => {
                self.select_index(self.snapshot.items.len().saturating_sub(1));
                AppCommand::None
            }
            Action::Refresh => {
                self.status = "Refreshing…".to_string();
                AppCommand::Refresh
            }
            Action::Delete => self.prepare_action(ActionKind::Delete),
            Action::ReEnable => self.prepare_action(ActionKind::ReEnable),
            Action::ReRun => self.prepare_action(ActionKind::ReRun),
            Action::NextNamespace => self.cycle_namespace(),
            Action::ToggleAllNamespaces => self.toggle_all_namespaces(),
            Action::ConfirmYes | Action::ConfirmNo => AppCommand::None,
        }
    }

    /// Called when the controller declined an invocation.
    pub fn action_rejected(&mut self, item: &ItemId, kind: ActionKind, rejection: &Rejection) {
        self.set_status(format!("{kind} not started for {item}: {rejection}"));
    }

    fn move_selection(&mut self, offset: isize) {
        let len = self.snapshot.items.len();
        if len == 0 {
            return;
        }
        let next = self.selected.saturating_add_signed(offset).min(len - 1);
        self.select_index(next);
    }

    fn select_index(&mut self, index: usize) {
        if let Some(item) = self.snapshot.items.get(index) {
            self.selected = index;
            self.selected_id = Some(item.id.clone());
        }
    }

    fn prepare_action(&mut self, kind: ActionKind) -> AppCommand {
        let Some(item) = self.selected_item() else {
            self.status = "No selected item".to_string();
            return AppCommand::None;
        };

        if !kind.offered_for(item) {
            let hint = availability_hint(kind, item);
            self.set_status(hint);
            return AppCommand::None;
        }

        match self.snapshot.action_state(&item.id) {
            ActionState::Idle => {}
            ActionState::Running(running) => {
                let message = format!("{} is {}", item.name, running.progress_label());
                self.set_status(message);
                return AppCommand::None;
            }
            ActionState::Failed(failed) => {
                let message = format!("{failed} failed for {}; retry in a moment", item.name);
                self.set_status(message);
                return AppCommand::None;
            }
        }

        let command = AppCommand::Invoke {
            item: item.id.clone(),
            kind,
        };
        if kind != ActionKind::Delete {
            let message = format!("{} {}", kind.progress_label(), item.name);
            self.set_status(message);
            return command;
        }

        let prompt = match &item.namespace {
            Some(namespace) => format!("Delete {} {namespace}/{}", item.kind.title(), item.name),
            None => format!("Delete {} {}", item.kind.title(), item.name),
        };
        self.pending_confirmation = Some(PendingConfirmation {
            prompt: prompt.clone(),
            command,
        });
        self.status = format!("{prompt}? [y/n]");
        AppCommand::None
    }

    fn cycle_namespace(&mut self) -> AppCommand {
        if self.namespaces.is_empty() {
            self.status = "No namespaces to cycle through".to_string();
            return AppCommand::None;
        }

        let next = match &self.scope.namespace {
            Some(current) => self
                .namespaces
                .iter()
                .position(|namespace| namespace == current)
                .map(|index| (index + 1) % self.namespaces.len())
                .unwrap_or(0),
            None => 0,
        };
        let namespace = self.namespaces[next].clone();
        self.switch_namespace(Some(namespace))
    }

    fn toggle_all_namespaces(&mut self) -> AppCommand {
        if self.scope.namespace.is_some() {
            return self.switch_namespace(None);
        }

        let restored = self
            .last_namespace
            .clone()
            .or_else(|| self.namespaces.first().cloned());
        match restored {
            Some(namespace) => self.switch_namespace(Some(namespace)),
            None => {
                self.status = "No namespace to switch back to".to_string();
                AppCommand::None
            }
        }
    }

    fn switch_namespace(&mut self, namespace: Option<String>) -> AppCommand {
        let scope = self.scope.with_namespace(namespace);
        if scope == self.scope {
            return AppCommand::None;
        }
        if scope.namespace.is_some() {
            self.last_namespace = scope.namespace.clone();
        }

        self.status = format!("Namespace: {}", scope.namespace_label());
        self.scope = scope.clone();
        self.selected = 0;
        self.selected_id = None;
        AppCommand::SwitchScope(scope)
    }
}

fn availability_hint(kind: ActionKind, item: &ResourceItem) -> String {
    match kind {
        ActionKind::ReRun => format!(
            "Re-run is available only for failed or timed-out deployments ({} is {})",
            item.name,
            item.status.label()
        ),
        ActionKind::ReEnable => format!(
            "Activate is available only for inactive deployments ({} is {})",
            item.name,
            item.status.label()
        ),
        ActionKind::Delete => format!("{} is inactive; activate it instead", item.name),
    }
}

fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, InputMode};
    use crate::actions::{ActionKind, ActionState, Rejection};
    use crate::fetcher::tests::item;
    use crate::input::Action;
    use crate::model::{ItemId, ItemKind, ItemStatus, ResourceItem, ScopeKey};
    use crate::state::{CollectionState, Effect, SyncEvent, SyncMachine};

    fn scope(namespace: Option<&str>) -> ScopeKey {
        ScopeKey::new(1, 1, namespace.map(str::to_string))
    }

    fn loaded(items: Vec<ResourceItem>) -> CollectionState {
        let (machine, effects) = SyncMachine::default().transition(SyncEvent::Activate(scope(Some("apps"))));
        let ticket = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::StartFetch { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .unwrap();
        let (machine, _) = machine.transition(SyncEvent::FetchSettled {
            ticket,
            outcome: Ok(items),
        });
        machine.state().clone()
    }

    fn app_with(items: Vec<ResourceItem>) -> App {
        let mut app = App::new(
            "demo".to_string(),
            scope(Some("apps")),
            vec!["apps".to_string(), "staging".to_string()],
        );
        app.sync(&loaded(items));
        app
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut app = app_with(vec![item("web", ItemStatus::Created)]);

        assert_eq!(app.apply_action(Action::Delete), AppCommand::None);
        assert_eq!(app.input_mode(), InputMode::Confirm);
        assert_eq!(app.status(), "Delete Preview default/web? [y/n]");

        assert_eq!(app.apply_action(Action::Down), AppCommand::None);
        assert_eq!(app.input_mode(), InputMode::Confirm);

        let command = app.apply_action(Action::ConfirmYes);
        assert_eq!(
            command,
            AppCommand::Invoke {
                item: ItemId::new("web"),
                kind: ActionKind::Delete
            }
        );
        assert_eq!(app.input_mode(), InputMode::Normal);
    }

    #[test]
    fn cancelled_delete_issues_nothing() {
        let mut app = app_with(vec![item("web", ItemStatus::Created)]);
        app.apply_action(Action::Delete);
        assert_eq!(app.apply_action(Action::ConfirmNo), AppCommand::None);
        assert_eq!(app.status(), "Action cancelled");
    }

    #[test]
    fn re_run_on_healthy_item_only_hints() {
        let mut app = app_with(vec![item("web", ItemStatus::Created)]);
        assert_eq!(app.apply_action(Action::ReRun), AppCommand::None);
        assert!(app.status().starts_with("Re-run is available only"));
    }

    #[test]
    fn re_run_on_failed_item_invokes_immediately() {
        let mut app = app_with(vec![item("web", ItemStatus::TimedOut)]);
        assert_eq!(
            app.apply_action(Action::ReRun),
            AppCommand::Invoke {
                item: ItemId::new("web"),
                kind: ActionKind::ReRun
            }
        );
    }

    #[test]
    fn refused_action_names_the_reason() {
        let mut app = app_with(vec![item("web", ItemStatus::Failed)]);
        let web = ItemId::new("web");

        app.action_rejected(
            &web,
            ActionKind::Delete,
            &Rejection::Busy(ActionState::Running(ActionKind::ReRun)),
        );
        assert_eq!(app.status(), "Delete not started for web: Re-run still running");

        app.action_rejected(&web, ActionKind::Delete, &Rejection::UnknownItem);
        assert_eq!(app.status(), "Delete not started for web: no longer listed");

        app.action_rejected(&web, ActionKind::ReEnable, &Rejection::NotOffered);
        assert_eq!(
            app.status(),
            "Activate not started for web: not offered for its current status"
        );
    }

    #[test]
    fn releases_never_offer_re_enable() {
        let mut release = item("apps/db", ItemStatus::Failed);
        release.kind = ItemKind::Release;
        let mut app = app_with(vec![release]);
        assert_eq!(app.apply_action(Action::ReEnable), AppCommand::None);
        assert_eq!(app.apply_action(Action::ReRun), AppCommand::None);
    }

    #[test]
    fn selection_follows_item_across_snapshots() {
        let mut app = app_with(vec![
            item("a", ItemStatus::Created),
            item("b", ItemStatus::Created),
            item("c", ItemStatus::Created),
        ]);
        app.apply_action(Action::Down);
        assert_eq!(app.selected_item().map(|item| item.id.as_str()), Some("b"));

        app.sync(&loaded(vec![
            item("c", ItemStatus::Created),
            item("b", ItemStatus::Created),
        ]));
        assert_eq!(app.selected_index(), Some(1));

        app.sync(&loaded(vec![item("c", ItemStatus::Created)]));
        assert_eq!(app.selected_item().map(|item| item.id.as_str()), Some("c"));

        app.sync(&loaded(Vec::new()));
        assert_eq!(app.selected_index(), None);
    }

    #[test]
    fn pending_delete_is_dropped_when_item_vanishes() {
        let mut app = app_with(vec![item("web", ItemStatus::Created)]);
        app.apply_action(Action::Delete);
        app.sync(&loaded(vec![item("api", ItemStatus::Created)]));
        assert_eq!(app.input_mode(), InputMode::Normal);
    }

    #[test]
    fn namespace_keys_switch_scope() {
        let mut app = app_with(Vec::new());

        assert_eq!(
            app.apply_action(Action::NextNamespace),
            AppCommand::SwitchScope(scope(Some("staging")))
        );
        assert_eq!(
            app.apply_action(Action::NextNamespace),
            AppCommand::SwitchScope(scope(Some("apps")))
        );
        assert_eq!(
            app.apply_action(Action::ToggleAllNamespaces),
            AppCommand::SwitchScope(scope(None))
        );
        assert_eq!(app.scope().namespace_label(), "all");
        assert_eq!(
            app.apply_action(Action::ToggleAllNamespaces),
            AppCommand::SwitchScope(scope(Some("apps")))
        );
    }

    #[test]
    fn errors_show_first_line_and_long_status_is_shortened() {
        let mut app = app_with(Vec::new());
        app.report_error("\nError connecting to cluster: refused\ncaused by: tcp");
        assert_eq!(app.status(), "Error connecting to cluster: refused");

        app.set_status("x".repeat(400));
        assert_eq!(app.status().chars().count(), 180);
        assert!(app.status().ends_with('…'));
    }

    #[test]
    fn quit_stops_the_app() {
        let mut app = app_with(Vec::new());
        app.apply_action(Action::Quit);
        assert!(!app.is_running());
    }
}
