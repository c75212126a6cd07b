use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::backend::ResourceSource;
use crate::error::SyncError;
use crate::model::{ListFilters, ResourceItem, ScopeKey};

/// Issues exactly one list request per call. Retrying is left to the controller.
#[derive(Clone)]
pub struct ResourceFetcher {
    source: Arc<dyn ResourceSource>,
    filters: ListFilters,
}

impl ResourceFetcher {
    pub fn new(source: Arc<dyn ResourceSource>, filters: ListFilters) -> Self {
        Self { source, filters }
    }

    pub async fn fetch(&self, scope: &ScopeKey) -> Result<Vec<ResourceItem>, SyncError> {
        let started = Instant::now();
        let items = match self.source.list(scope, &self.filters).await {
            Ok(items) => items,
            Err(error) => {
                debug!(%scope, %error, took_ms = %started.elapsed().as_millis(), "fetch: failed");
                return Err(error);
            }
        };

        let received = items.len();
        let items = normalize_items(items, &self.filters);
        debug!(
            %scope,
            received,
            kept = items.len(),
            took_ms = %started.elapsed().as_millis(),
            "fetch: ok"
        );
        Ok(items)
    }
}

/// Drops statuses outside the allow-list and duplicate ids, then applies `limit`
/// (0 means unbounded). Server order is preserved.
fn normalize_items(items: Vec<ResourceItem>, filters: &ListFilters) -> Vec<ResourceItem> {
    let limit = if filters.limit == 0 {
        usize::MAX
    } else {
        filters.limit
    };
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| filters.allows(&item.status))
        .filter(|item| seen.insert(item.id.clone()))
        .take(limit)
        .collect()
}
