//! In-memory preview-deployment platform used by `--demo`.
//!
//! Requests take a fixed latency, a reconciler task settles `creating` and
//! `updating` deployments, and every change is announced on a broadcast feed.
//! One deployment refuses re-runs so the failure path is visible.

use async_trait::async_trait;
use chrono::{Duration as AgeDelta, Utc};
use futures::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::backend::{Backends, ErrorSink, MutationApi, NoticeSource, NoticeStream, ResourceSource};
use crate::error::SyncError;
use crate::model::{
    ChangeNotice, ChannelScope, ClusterId, ItemDetails, ItemId, ItemKind, ItemStatus, ListFilters,
    ProjectId, ResourceItem, ScopeKey,
};

pub const DEMO_PROJECT: u64 = 1;
pub const DEMO_CLUSTER: u64 = 1;
pub const DEMO_NAMESPACES: [&str; 2] = ["previews", "staging"];

const NOTICE_CAPACITY: usize = 64;
const FLAKY_PR: u64 = 412;

struct Deployment {
    item: ResourceItem,
    flaky: bool,
    changed_at: Instant,
}

struct PlatformInner {
    project: ProjectId,
    cluster: ClusterId,
    deployments: Mutex<Vec<Deployment>>,
    notices: broadcast::Sender<ChangeNotice>,
    latency: Duration,
    settle_after: Duration,
}

#[derive(Clone)]
pub struct SimulatedPlatform {
    inner: Arc<PlatformInner>,
}

impl SimulatedPlatform {
    pub fn new(latency: Duration, settle_after: Duration) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let now = Instant::now();
        let deployments = seed_items()
            .into_iter()
            .map(|item| Deployment {
                flaky: item.details.pr_number == Some(FLAKY_PR),
                item,
                changed_at: now,
            })
            .collect();

        Self {
            inner: Arc::new(PlatformInner {
                project: ProjectId(DEMO_PROJECT),
                cluster: ClusterId(DEMO_CLUSTER),
                deployments: Mutex::new(deployments),
                notices,
                latency,
                settle_after,
            }),
        }
    }

    pub fn backends(&self, errors: Arc<dyn ErrorSink>) -> Backends {
        let platform = Arc::new(self.clone());
        Backends {
            source: platform.clone(),
            notices: platform.clone(),
            mutations: platform,
            errors,
        }
    }

    /// Settles transitional deployments once they have been pending for
    /// `settle_after`.
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        let platform = self.clone();
        let tick = (self.inner.settle_after / 4).max(Duration::from_millis(50));
        tokio::spawn(async move {
            loop {
                sleep(tick).await;
                for (id, status) in platform.reconcile_once() {
                    info!(item = %id, %status, "demo: reconciled");
                    platform.announce("deployment.updated", &id, &status);
                }
            }
        })
    }

    fn reconcile_once(&self) -> Vec<(ItemId, ItemStatus)> {
        let Ok(mut deployments) = self.inner.deployments.lock() else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for deployment in deployments.iter_mut() {
            let pending = matches!(
                deployment.item.status,
                ItemStatus::Creating | ItemStatus::Updating
            );
            if pending && deployment.changed_at.elapsed() >= self.inner.settle_after {
                deployment.item.status = ItemStatus::Created;
                deployment.item.updated_at = Utc::now();
                deployment.changed_at = Instant::now();
                changed.push((deployment.item.id.clone(), ItemStatus::Created));
            }
        }
        changed
    }

    fn announce(&self, kind: &str, id: &ItemId, status: &ItemStatus) {
        let payload = json!({
            "type": kind,
            "deployment": id.as_str(),
            "status": status.token(),
        });
        // No receivers is fine: nobody is watching.
        let _ = self.inner.notices.send(ChangeNotice::new(payload.to_string()));
    }

    fn owns(&self, project: ProjectId, cluster: ClusterId) -> bool {
        self.inner.project == project && self.inner.cluster == cluster
    }

    fn check_scope(&self, scope: &ScopeKey) -> Result<(), SyncError> {
        if self.owns(scope.project, scope.cluster) {
            Ok(())
        } else {
            Err(SyncError::server(404, format!("unknown cluster ({scope})")))
        }
    }

    /// Applies `change` to the deployment `id` and returns its new status.
    fn mutate<F>(&self, id: &ItemId, change: F) -> Result<ItemStatus, SyncError>
    where
        F: FnOnce(&mut Deployment) -> Result<ItemStatus, SyncError>,
    {
        let mut deployments = self
            .inner
            .deployments
            .lock()
            .map_err(|_| SyncError::server(500, "platform state poisoned"))?;
        let deployment = deployments
            .iter_mut()
            .find(|deployment| &deployment.item.id == id)
            .ok_or_else(|| SyncError::server(404, format!("deployment {id} not found")))?;

        let status = change(deployment)?;
        deployment.item.status = status.clone();
        deployment.item.updated_at = Utc::now();
        deployment.changed_at = Instant::now();
        Ok(status)
    }
}

#[async_trait]
impl ResourceSource for SimulatedPlatform {
    async fn list(
        &self,
        scope: &ScopeKey,
        filters: &ListFilters,
    ) -> Result<Vec<ResourceItem>, SyncError> {
        sleep(self.inner.latency).await;
        if !self.owns(scope.project, scope.cluster) {
            return Ok(Vec::new());
        }

        let deployments = self
            .inner
            .deployments
            .lock()
            .map_err(|_| SyncError::server(500, "platform state poisoned"))?;
        let mut items: Vec<ResourceItem> = deployments
            .iter()
            .map(|deployment| &deployment.item)
            .filter(|item| match &scope.namespace {
                Some(namespace) => item.namespace.as_deref() == Some(namespace.as_str()),
                None => true,
            })
            .filter(|item| filters.allows(&item.status))
            .cloned()
            .collect();
        items.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));

        let limit = if filters.limit == 0 {
            usize::MAX
        } else {
            filters.limit
        };
        Ok(items.into_iter().skip(filters.skip).take(limit).collect())
    }
}

#[async_trait]
impl NoticeSource for SimulatedPlatform {
    async fn subscribe(&self, scope: ChannelScope) -> Result<NoticeStream, SyncError> {
        sleep(self.inner.latency).await;
        if !self.owns(scope.project, scope.cluster) {
            return Ok(futures::stream::pending().boxed());
        }

        let rx = self.inner.notices.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(notice) => Some((Ok(notice), rx)),
                // Skipped notices still mean something changed.
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "demo: notice receiver lagged");
                    Some((Ok(ChangeNotice::new("lagged")), rx))
                }
                Err(RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl MutationApi for SimulatedPlatform {
    async fn delete_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        sleep(self.inner.latency).await;
        self.check_scope(scope)?;
        {
            let mut deployments = self
                .inner
                .deployments
                .lock()
                .map_err(|_| SyncError::server(500, "platform state poisoned"))?;
            let before = deployments.len();
            deployments.retain(|deployment| &deployment.item.id != item);
            if deployments.len() == before {
                return Err(SyncError::server(404, format!("deployment {item} not found")));
            }
        }
        self.announce("deployment.deleted", item, &ItemStatus::Uninstalled);
        Ok(())
    }

    async fn re_enable_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        sleep(self.inner.latency).await;
        self.check_scope(scope)?;
        let status = self.mutate(item, |deployment| match deployment.item.status {
            ItemStatus::Inactive => Ok(ItemStatus::Creating),
            ref other => Err(SyncError::server(
                409,
                format!("deployment is {other}, not inactive"),
            )),
        })?;
        self.announce("deployment.reenabled", item, &status);
        Ok(())
    }

    async fn re_run_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        sleep(self.inner.latency).await;
        self.check_scope(scope)?;
        let status = self.mutate(item, |deployment| {
            if deployment.flaky {
                return Err(SyncError::server(502, "workflow dispatch rejected"));
            }
            if deployment.item.status.is_failure() {
                Ok(ItemStatus::Updating)
            } else {
                Err(SyncError::server(
                    409,
                    format!("deployment is {}, nothing to re-run", deployment.item.status),
                ))
            }
        })?;
        self.announce("deployment.rerun", item, &status);
        Ok(())
    }
}

fn seed_items() -> Vec<ResourceItem> {
    let now = Utc::now();
    let rows: [(u64, &str, &str, ItemStatus, &str, i64); 7] = [
        (431, "checkout-redesign", "previews", ItemStatus::Created, "Redesign checkout flow", 4),
        (428, "search-filters", "previews", ItemStatus::Creating, "Add faceted search filters", 9),
        (FLAKY_PR, "legacy-auth", "previews", ItemStatus::Failed, "Drop legacy auth adapter", 35),
        (419, "image-cdn", "previews", ItemStatus::TimedOut, "Serve images from CDN", 80),
        (407, "dark-mode", "previews", ItemStatus::Inactive, "Dark mode toggle", 1_500),
        (433, "billing-v2", "staging", ItemStatus::Updating, "Billing v2 rollout", 2),
        (401, "metrics-export", "staging", ItemStatus::Failed, "Export usage metrics", 240),
    ];

    rows.into_iter()
        .map(|(pr, branch, namespace, status, title, minutes_ago)| ResourceItem {
            id: ItemId::new(format!("pr-{pr}")),
            kind: ItemKind::PreviewDeployment,
            name: format!("{branch}-pr-{pr}"),
            namespace: Some(namespace.to_string()),
            status,
            updated_at: now - AgeDelta::minutes(minutes_ago),
            details: ItemDetails {
                pr_number: Some(pr),
                pr_title: Some(title.to_string()),
                branch_from: Some(branch.to_string()),
                branch_into: Some("main".to_string()),
                repo_owner: Some("acme".to_string()),
                repo_name: Some("storefront".to_string()),
                subdomain: Some(format!("pr-{pr}.preview.acme.dev")),
                last_workflow_url: Some(format!(
                    "https://github.com/acme/storefront/actions/runs/{}",
                    9_000 + pr
                )),
                ..ItemDetails::default()
            },
        })
        .collect()
}
