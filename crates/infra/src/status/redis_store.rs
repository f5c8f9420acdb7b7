use std::time::Duration;

use async_trait::async_trait;
use redis::RedisError;

use super::{StatusStore, StatusStoreError};
use crate::redis_conn::{RedisConnector, is_connection_error};

const SCAN_BATCH: usize = 200;

/// Redis-backed status store: `SET key value EX ttl`, `GET`, `SCAN MATCH prefix*`.
pub struct RedisStatusStore {
    connector: RedisConnector,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str) -> Result<Self, StatusStoreError> {
        let connector =
            RedisConnector::open(redis_url).map_err(|e| StatusStoreError::Unavailable(e.to_string()))?;
        Ok(Self { connector })
    }

    async fn fail(&self, err: RedisError, key: &str) -> StatusStoreError {
        self.connector.observe(&err).await;
        if is_connection_error(&err) {
            StatusStoreError::Unavailable(format!("{key}: {err}"))
        } else {
            StatusStoreError::Command(format!("{key}: {err}"))
        }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StatusStoreError> {
        let mut conn = match self.connector.connection().await {
            Ok(conn) => conn,
            Err(err) => return Err(self.fail(err, key).await),
        };
        let result: Result<(), RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err, key).await),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StatusStoreError> {
        let mut conn = match self.connector.connection().await {
            Ok(conn) => conn,
            Err(err) => return Err(self.fail(err, key).await),
        };
        let result: Result<Option<String>, RedisError> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(err, key).await),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StatusStoreError> {
        let mut conn = match self.connector.connection().await {
            Ok(conn) => conn,
            Err(err) => return Err(self.fail(err, prefix).await),
        };
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let result: Result<(u64, Vec<String>), RedisError> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, batch) = match result {
                Ok(page) => page,
                Err(err) => return Err(self.fail(err, prefix).await),
            };
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
