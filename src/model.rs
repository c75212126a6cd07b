use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProjectId(pub u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClusterId(pub u64);

/// Identity of the collection a controller (and its channel) is bound to.
///
/// `namespace: None` means every namespace of the cluster.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ScopeKey {
    pub project: ProjectId,
    pub cluster: ClusterId,
    pub namespace: Option<String>,
}

impl ScopeKey {
    pub fn new(project: u64, cluster: u64, namespace: Option<String>) -> Self {
        Self {
            project: ProjectId(project),
            cluster: ClusterId(cluster),
            namespace: namespace
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn with_namespace(&self, namespace: Option<String>) -> Self {
        Self::new(self.project.0, self.cluster.0, namespace)
    }

    pub fn channel_scope(&self) -> ChannelScope {
        ChannelScope {
            project: self.project,
            cluster: self.cluster,
        }
    }

    pub fn namespace_label(&self) -> &str {
        self.namespace.as_deref().unwrap_or("all")
    }
}

impl Display for ScopeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "project={} cluster={} ns={}",
            self.project.0,
            self.cluster.0,
            self.namespace_label()
        )
    }
}

/// The push channel is bound to a project/cluster pair, never to a namespace.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ChannelScope {
    pub project: ProjectId,
    pub cluster: ClusterId,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ItemKind {
    Release,
    PreviewDeployment,
}

impl ItemKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Release => "Release",
            Self::PreviewDeployment => "Preview",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ItemStatus {
    Deployed,
    Uninstalled,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Superseded,
    Failed,
    Creating,
    Created,
    Updating,
    TimedOut,
    Inactive,
    Unknown(String),
}

impl ItemStatus {
    /// Release statuses the chart list asks for when no filter is configured.
    pub const RELEASE_DEFAULTS: [Self; 7] = [
        Self::Deployed,
        Self::Uninstalled,
        Self::PendingInstall,
        Self::PendingUpgrade,
        Self::PendingRollback,
        Self::Superseded,
        Self::Failed,
    ];

    pub const PREVIEW_ALL: [Self; 6] = [
        Self::Creating,
        Self::Created,
        Self::Updating,
        Self::Failed,
        Self::TimedOut,
        Self::Inactive,
    ];

    pub fn from_token(token: &str) -> Self {
        let normalized = token.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "deployed" => Self::Deployed,
            "uninstalled" => Self::Uninstalled,
            "uninstalling" => Self::Uninstalling,
            "pending" | "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "pending-rollback" => Self::PendingRollback,
            "superseded" => Self::Superseded,
            "failed" => Self::Failed,
            "creating" => Self::Creating,
            "created" => Self::Created,
            "updating" => Self::Updating,
            "timed-out" | "timedout" => Self::TimedOut,
            "inactive" => Self::Inactive,
            _ => Self::Unknown(token.trim().to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::TimedOut => "timed_out",
            Self::Inactive => "inactive",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn label(&self) -> String {
        let token = self.token().replace(['_', '-'], " ");
        let mut chars = token.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => "Unknown".to_string(),
        }
    }

    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Uninstalling
                | Self::PendingInstall
                | Self::PendingUpgrade
                | Self::PendingRollback
                | Self::Creating
                | Self::Updating
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Display metadata. None of it takes part in synchronization.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ItemDetails {
    pub revision: Option<u32>,
    pub chart: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_title: Option<String>,
    pub branch_from: Option<String>,
    pub branch_into: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    pub subdomain: Option<String>,
    pub last_workflow_url: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    pub namespace: Option<String>,
    pub status: ItemStatus,
    pub updated_at: DateTime<Utc>,
    pub details: ItemDetails,
}

impl ResourceItem {
    pub fn pull_request_url(&self) -> Option<String> {
        let details = &self.details;
        match (&details.repo_owner, &details.repo_name, details.pr_number) {
            (Some(owner), Some(name), Some(number)) => Some(format!(
                "https://github.com/{owner}/{name}/pull/{number}"
            )),
            _ => None,
        }
    }

    pub fn merge_info(&self) -> Option<String> {
        match (&self.details.branch_from, &self.details.branch_into) {
            (Some(from), Some(into)) => Some(format!("{from} -> {into}")),
            _ => None,
        }
    }

    /// Short revision or pull request column.
    pub fn reference(&self) -> String {
        match self.kind {
            ItemKind::Release => self
                .details
                .revision
                .map(|revision| format!("v{revision}"))
                .unwrap_or_else(|| "-".to_string()),
            ItemKind::PreviewDeployment => self
                .details
                .pr_number
                .map(|number| format!("#{number}"))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListFilters {
    /// Allow-list; empty admits every status.
    pub statuses: Vec<ItemStatus>,
    pub limit: usize,
    pub skip: usize,
}

impl ListFilters {
    pub fn allows(&self, status: &ItemStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(status)
    }
}

impl Default for ListFilters {
    fn default() -> Self {
        let mut statuses = ItemStatus::RELEASE_DEFAULTS.to_vec();
        for status in ItemStatus::PREVIEW_ALL {
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }
        Self {
            statuses,
            limit: 20,
            skip: 0,
        }
    }
}

/// Opaque push notification. Consumers only learn that something changed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChangeNotice {
    payload: Arc<str>,
}

impl ChangeNotice {
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

pub fn relative_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - timestamp).num_seconds().max(0);
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
