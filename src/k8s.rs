use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DeleteParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, Config, ResourceExt};
use std::collections::HashMap;
use tracing::debug;

use crate::backend::{MutationApi, NoticeSource, NoticeStream, ResourceSource};
use crate::error::SyncError;
use crate::model::{
    ChangeNotice, ChannelScope, ItemDetails, ItemId, ItemKind, ItemStatus, ListFilters,
    ResourceItem, ScopeKey,
};

const HELM_OWNER_SELECTOR: &str = "owner=helm";

/// Reads Helm releases from their storage Secrets.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn connect(context: Option<String>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; --context is unavailable in this environment");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let context = context
            .or_else(|| kubeconfig.and_then(|cfg| cfg.current_context))
            .unwrap_or_else(|| "in-cluster".to_string());

        Ok(Self {
            client,
            context,
            cluster,
            default_namespace,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&list_params())
            .await
            .context("failed to list namespaces")?;
        let mut names = list
            .into_iter()
            .map(|namespace| namespace.name_any())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn secrets(&self, namespace: Option<&str>) -> Api<Secret> {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl ResourceSource for KubeGateway {
    async fn list(
        &self,
        scope: &ScopeKey,
        filters: &ListFilters,
    ) -> Result<Vec<ResourceItem>, SyncError> {
        let secrets = self.secrets(scope.namespace.as_deref());
        let list = secrets
            .list(&list_params().labels(HELM_OWNER_SELECTOR))
            .await?;
        let stored = list.items.len();

        let mut items = latest_revisions(list.iter().filter_map(release_item));
        items.retain(|item| filters.allows(&item.status));
        items.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        debug!(%scope, stored, releases = items.len(), "helm: listed storage records");

        let limit = if filters.limit == 0 {
            usize::MAX
        } else {
            filters.limit
        };
        Ok(items.into_iter().skip(filters.skip).take(limit).collect())
    }
}

#[async_trait]
impl NoticeSource for KubeGateway {
    async fn subscribe(&self, scope: ChannelScope) -> Result<NoticeStream, SyncError> {
        debug!(project = scope.project.0, cluster = scope.cluster.0, "helm: watching storage");
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let config = watcher::Config::default().labels(HELM_OWNER_SELECTOR);
        let stream = watcher::watcher(secrets, config).filter_map(|event| async move {
            match event {
                Ok(Event::Apply(secret)) => Some(Ok(storage_notice("apply", &secret))),
                Ok(Event::Delete(secret)) => Some(Ok(storage_notice("delete", &secret))),
                Ok(Event::Init | Event::InitApply(_) | Event::InitDone) => None,
                Err(error) => Some(Err(SyncError::Network(error.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl MutationApi for KubeGateway {
    async fn delete_item(&self, _scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        let (namespace, name) = split_release_id(item)?;
        let secrets = self.secrets(Some(namespace));
        let selector = format!("{HELM_OWNER_SELECTOR},name={name}");
        let _ = secrets
            .delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
            .await?;
        Ok(())
    }

    async fn re_enable_item(&self, _scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        Err(unsupported("re-enable", item))
    }

    async fn re_run_item(&self, _scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError> {
        Err(unsupported("re-run", item))
    }
}

fn unsupported(action: &str, item: &ItemId) -> SyncError {
    SyncError::server(405, format!("{action} is not supported for Helm release {item}"))
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn storage_notice(kind: &str, secret: &Secret) -> ChangeNotice {
    let release = secret.labels().get("name").cloned().unwrap_or_default();
    ChangeNotice::new(format!(
        "{kind} {}/{release}",
        secret.namespace().unwrap_or_default()
    ))
}

/// Release ids are `namespace/name`.
fn release_id(namespace: &str, name: &str) -> ItemId {
    ItemId::new(format!("{namespace}/{name}"))
}

fn split_release_id(item: &ItemId) -> Result<(&str, &str), SyncError> {
    item.as_str()
        .split_once('/')
        .filter(|(namespace, name)| !namespace.is_empty() && !name.is_empty())
        .ok_or_else(|| SyncError::server(400, format!("malformed release id {item}")))
}

/// Maps one storage Secret to the release revision it records.
fn release_item(secret: &Secret) -> Option<ResourceItem> {
    let labels = secret.labels();
    let name = labels.get("name")?.clone();
    let namespace = secret.namespace()?;
    let status = labels
        .get("status")
        .map(|token| ItemStatus::from_token(token))
        .unwrap_or_else(|| ItemStatus::Unknown("unknown".to_string()));
    let revision = labels.get("version").and_then(|value| value.parse().ok());
    let updated_at = labels
        .get("modifiedAt")
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .or_else(|| created_at(secret.metadata.creation_timestamp.as_ref()))
        .unwrap_or(DateTime::UNIX_EPOCH);

    Some(ResourceItem {
        id: release_id(&namespace, &name),
        kind: ItemKind::Release,
        name,
        namespace: Some(namespace),
        status,
        updated_at,
        details: ItemDetails {
            revision,
            ..ItemDetails::default()
        },
    })
}

fn created_at(timestamp: Option<&Time>) -> Option<DateTime<Utc>> {
    let timestamp = timestamp?;
    DateTime::from_timestamp(timestamp.0.as_second(), 0)
}

/// Keeps the highest revision of each release.
fn latest_revisions(records: impl Iterator<Item = ResourceItem>) -> Vec<ResourceItem> {
    let mut latest: HashMap<ItemId, ResourceItem> = HashMap::new();
    for record in records {
        let newer = latest
            .get(&record.id)
            .is_none_or(|current| record.details.revision > current.details.revision);
        if newer {
            latest.insert(record.id.clone(), record);
        }
    }
    latest.into_values().collect()
}
