//! The auth caches: users and authorization strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::{AuthStrategy, User};
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};

/// Resource name of the user cache.
pub const USER_CACHE_NAME: &str = "user";

/// Resource name of the strategy cache.
pub const STRATEGY_CACHE_NAME: &str = "authStrategy";

/// The user cache: by-id plus a name index.
pub struct UserCache {
    base: BaseCache,
    users: DashMap<String, Arc<User>>,
    /// login name -> user id.
    names: DashMap<String, String>,
}

impl UserCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            users: DashMap::new(),
            names: DashMap::new(),
        }
    }

    /// Look up a user by id.
    pub fn get_user(&self, user_id: &str) -> Option<Arc<User>> {
        if user_id.is_empty() {
            return None;
        }
        self.users.get(user_id).map(|r| Arc::clone(r.value()))
    }

    /// Look up a user by login name.
    pub fn get_user_by_name(&self, name: &str) -> Option<Arc<User>> {
        let id = self.names.get(name).map(|r| r.value().clone())?;
        self.get_user(&id)
    }

    /// Number of cached users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let users = self
            .base
            .store()
            .get_more_users(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "user cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_users(users))
    }

    fn set_users(&self, batch: Vec<User>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(USER_CACHE_NAME);

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);

            // A rename leaves a stale name entry behind; drop it first.
            if let Some(previous) = self.users.get(&item.id).map(|r| Arc::clone(r.value())) {
                if previous.name != item.name {
                    self.names.remove(&previous.name);
                }
            }

            if !item.valid {
                self.users.remove(&item.id);
                self.names.remove(&item.name);
                continue;
            }
            self.names.insert(item.name.clone(), item.id.clone());
            self.users.insert(item.id.clone(), Arc::new(item));
        }

        (
            Some(HashMap::from([(USER_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for UserCache {
    fn name(&self) -> &'static str {
        USER_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(USER_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.users.clear();
        self.names.clear();
    }
}

/// The authorization-strategy cache: by-id plus a principal index for
/// "which strategies apply to this user" lookups.
pub struct StrategyCache {
    base: BaseCache,
    strategies: DashMap<String, Arc<AuthStrategy>>,
    /// user id -> strategy ids.
    principals: DashMap<String, HashSet<String>>,
}

impl StrategyCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            strategies: DashMap::new(),
            principals: DashMap::new(),
        }
    }

    /// Look up a strategy by id.
    pub fn get_strategy(&self, strategy_id: &str) -> Option<Arc<AuthStrategy>> {
        if strategy_id.is_empty() {
            return None;
        }
        self.strategies
            .get(strategy_id)
            .map(|r| Arc::clone(r.value()))
    }

    /// All strategies naming `user_id` as a principal.
    pub fn strategies_by_principal(&self, user_id: &str) -> Vec<Arc<AuthStrategy>> {
        let Some(ids) = self.principals.get(user_id).map(|r| r.value().clone()) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get_strategy(id)).collect()
    }

    /// Number of cached strategies.
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let strategies = self
            .base
            .store()
            .get_more_strategies(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "strategy cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_strategies(strategies))
    }

    fn set_strategies(&self, batch: Vec<AuthStrategy>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(STRATEGY_CACHE_NAME);

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);

            if let Some(previous) = self.strategies.get(&item.id).map(|r| Arc::clone(r.value()))
            {
                self.unlink_principals(&previous);
            }

            if !item.valid {
                self.strategies.remove(&item.id);
                continue;
            }
            for principal in &item.principals {
                self.principals
                    .entry(principal.clone())
                    .or_default()
                    .insert(item.id.clone());
            }
            self.strategies.insert(item.id.clone(), Arc::new(item));
        }

        (
            Some(HashMap::from([(STRATEGY_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }

    fn unlink_principals(&self, strategy: &AuthStrategy) {
        for principal in &strategy.principals {
            if let Some(mut ids) = self.principals.get_mut(principal) {
                ids.remove(&strategy.id);
            }
        }
        for principal in &strategy.principals {
            self.principals
                .remove_if(principal, |_, ids| ids.is_empty());
        }
    }
}

#[async_trait]
impl ResourceCache for StrategyCache {
    fn name(&self) -> &'static str {
        STRATEGY_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(STRATEGY_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.strategies.clear();
        self.principals.clear();
    }
}
