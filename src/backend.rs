//! Collaborator boundaries of the synchronization core.
//!
//! Backends (the Kubernetes gateway, the simulated platform, test fakes)
//! implement these traits; the core never sees transport details.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::model::{ChangeNotice, ChannelScope, ItemId, ListFilters, ResourceItem, ScopeKey};

pub type NoticeStream = BoxStream<'static, Result<ChangeNotice, SyncError>>;

#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// One request for the collection of `scope`, in server order.
    async fn list(
        &self,
        scope: &ScopeKey,
        filters: &ListFilters,
    ) -> Result<Vec<ResourceItem>, SyncError>;
}

#[async_trait]
pub trait NoticeSource: Send + Sync {
    async fn subscribe(&self, scope: ChannelScope) -> Result<NoticeStream, SyncError>;
}

#[async_trait]
pub trait MutationApi: Send + Sync {
    async fn delete_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError>;

    async fn re_enable_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError>;

    async fn re_run_item(&self, scope: &ScopeKey, item: &ItemId) -> Result<(), SyncError>;
}

pub trait ErrorSink: Send + Sync {
    fn report_error(&self, message: &str);
}

/// Everything a controller needs from the outside world.
#[derive(Clone)]
pub struct Backends {
    pub source: Arc<dyn ResourceSource>,
    pub notices: Arc<dyn NoticeSource>,
    pub mutations: Arc<dyn MutationApi>,
    pub errors: Arc<dyn ErrorSink>,
}

/// Forwards reported errors to the UI loop, which shows them on the status line.
#[derive(Debug, Clone)]
pub struct StatusLineSink {
    tx: mpsc::UnboundedSender<String>,
}

impl StatusLineSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl ErrorSink for StatusLineSink {
    fn report_error(&self, message: &str) {
        let _ = self.tx.send(message.to_string());
    }
}
