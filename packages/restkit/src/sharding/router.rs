//! Connection router: shard key to live connection pool.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::directory::ShardDirectory;
use crate::error::Result;

/// Caches one connection pool per shard, created lazily on first bind.
///
/// The router is owned by the application root and injected into the
/// worker and renewer; the shard key is always passed explicitly. Reads
/// vastly outnumber writes, so the cache sits behind an `RwLock` and the
/// write path re-checks before connecting.
pub struct ConnectionRouter {
    directory: Arc<ShardDirectory>,
    process_name: String,
    max_connections: u32,
    pools: RwLock<HashMap<String, PgPool>>,
}

impl ConnectionRouter {
    pub fn new(
        directory: Arc<ShardDirectory>,
        process_name: impl Into<String>,
        max_connections: u32,
    ) -> Self {
        Self {
            directory,
            process_name: process_name.into(),
            max_connections,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// The pool for `shard_key`, creating it on first use.
    ///
    /// A pool, once created for a key, is reused until [`dispose_all`] is
    /// called. Concurrent first binds for the same key race to the write
    /// lock; the loser reuses the winner's pool.
    ///
    /// [`dispose_all`]: ConnectionRouter::dispose_all
    pub async fn bind(&self, shard_key: &str) -> Result<PgPool> {
        if let Some(pool) = self.pools.read().await.get(shard_key) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(shard_key) {
            return Ok(pool.clone());
        }

        let url = self.directory.resolve(shard_key, &self.process_name).await?;
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&url)
            .await?;

        tracing::debug!(shard_key, "created connection pool for shard");
        pools.insert(shard_key.to_string(), pool.clone());
        Ok(pool)
    }

    /// Close every cached pool. Called on shutdown.
    pub async fn dispose_all(&self) {
        let mut pools = self.pools.write().await;
        for (shard_key, pool) in pools.drain() {
            tracing::debug!(shard_key = %shard_key, "closing connection pool");
            pool.close().await;
        }
    }
}
