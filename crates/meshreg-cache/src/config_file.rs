//! The config-file release cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::{release_key, ConfigFileRelease};
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};

/// Resource name of the config-file cache.
pub const CONFIG_FILE_CACHE_NAME: &str = "configFile";

type GroupBucket = Arc<DashMap<String, Arc<ConfigFileRelease>>>;

/// The config-file release cache: releases keyed by
/// `(namespace, group, file)` with a per-group secondary index.
pub struct ConfigFileCache {
    base: BaseCache,
    releases: DashMap<String, Arc<ConfigFileRelease>>,
    /// "namespace+group" -> file name -> release.
    groups: DashMap<String, GroupBucket>,
}

impl ConfigFileCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            releases: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// The released content of one file.
    pub fn get_release(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
    ) -> Option<Arc<ConfigFileRelease>> {
        self.releases
            .get(&release_key(namespace, group, file_name))
            .map(|r| Arc::clone(r.value()))
    }

    /// Every released file of a group.
    pub fn group_releases(&self, namespace: &str, group: &str) -> Vec<Arc<ConfigFileRelease>> {
        let Some(bucket) = self
            .groups
            .get(&group_key(namespace, group))
            .map(|r| Arc::clone(r.value()))
        else {
            return Vec::new();
        };
        bucket.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of cached releases.
    pub fn release_count(&self) -> usize {
        self.releases.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let releases = self
            .base
            .store()
            .get_more_config_file_releases(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "config file cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_releases(releases))
    }

    fn set_releases(&self, batch: Vec<ConfigFileRelease>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(CONFIG_FILE_CACHE_NAME);

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);
            let key = item.key();
            let group = group_key(&item.namespace, &item.group);

            if !item.valid {
                self.releases.remove(&key);
                if let Some(bucket) = self.groups.get(&group).map(|r| Arc::clone(r.value())) {
                    bucket.remove(&item.file_name);
                }
                continue;
            }

            let item = Arc::new(item);
            self.releases.insert(key, Arc::clone(&item));
            let bucket = {
                let entry = self
                    .groups
                    .entry(group)
                    .or_insert_with(|| Arc::new(DashMap::new()));
                Arc::clone(entry.value())
            };
            bucket.insert(item.file_name.clone(), item);
        }

        (
            Some(HashMap::from([(
                CONFIG_FILE_CACHE_NAME.to_string(),
                last_mtime,
            )])),
            total,
        )
    }
}

fn group_key(namespace: &str, group: &str) -> String {
    format!("{namespace}+{group}")
}

#[async_trait]
impl ResourceCache for ConfigFileCache {
    fn name(&self) -> &'static str {
        CONFIG_FILE_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(CONFIG_FILE_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.releases.clear();
        self.groups.clear();
    }
}
