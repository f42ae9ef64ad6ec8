//! Redis Manager - Centralized Redis connection and operations
//!
//! This module handles all Redis-related operations including:
//! - Job queue operations (BLPOP)
//! - Result storage and publishing
//!
//! The queue and the result publisher use separate connections. A BLPOP
//! blocks its connection for up to the poll timeout, and results must not
//! queue up behind it.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{info, warn};

use crate::jobs::execute::ExecuteResult;
use crate::jobs::{parse_job, MalformedJob, WorkerJob};

/// Redis key constants
pub mod keys {
    /// Execution job queue key
    pub const EXECUTE_QUEUE: &str = "execute:queue";

    /// Execution result key prefix (for polling)
    pub const EXECUTE_RESULT_PREFIX: &str = "execute:result:";

    /// Execution result channel (for pub/sub)
    pub const EXECUTE_RESULT_CHANNEL: &str = "execute:results";
}

/// Results linger for 5 minutes if nobody picks them up
const RESULT_EXPIRY_SECS: i64 = 300;

/// Owns the queue connection
pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client, conn })
    }

    /// Wait up to `timeout` for the next job from the queue.
    ///
    /// Returns `None` when the wait expires. A malformed job is returned as
    /// `Err` so the requester can still be told. Automatically reconnects on
    /// connection failure.
    pub async fn pop_job(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<std::result::Result<WorkerJob, MalformedJob>>> {
        let result: Option<(String, String)> = match self
            .conn
            .blpop(keys::EXECUTE_QUEUE, timeout.as_secs_f64())
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                self.reconnect().await?;
                return Ok(None);
            }
        };

        let Some((_, job_data)) = result else {
            return Ok(None);
        };

        let job = parse_job(&job_data);
        if let Err(e) = &job {
            warn!("Failed to parse job data: {}. Data: {}", e, job_data);
        }
        Ok(Some(job))
    }

    /// Open the result connection, shared by clones across job tasks
    pub async fn publisher(&self) -> Result<ResultPublisher> {
        let conn = loop {
            match self.client.get_connection_manager().await {
                Ok(conn) => break conn,
                Err(e) => {
                    warn!(
                        "Failed to open result connection: {}. Retrying in 3 seconds...",
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        };
        Ok(ResultPublisher { conn })
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

/// Cloneable result writer shared by concurrently running jobs.
/// The connection manager reconnects on its own.
#[derive(Clone)]
pub struct ResultPublisher {
    conn: ConnectionManager,
}

impl ResultPublisher {
    /// Store an execution result in Redis.
    ///
    /// The result is pushed onto `key` so the requester's BLPOP picks it
    /// up, expires after 5 minutes, and is published for real-time
    /// subscribers.
    pub async fn store_execute_result(&mut self, key: &str, result: &ExecuteResult) -> Result<()> {
        self.push_result(key, Some(keys::EXECUTE_RESULT_CHANNEL), result)
            .await
    }

    async fn push_result<T: Serialize>(
        &mut self,
        key: &str,
        channel: Option<&str>,
        result: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(result)?;

        // One retry, after the manager has reconnected
        if let Err(e) = self.conn.rpush::<_, _, ()>(key, &json).await {
            warn!("Failed to push result: {}. Retrying...", e);
            self.conn
                .rpush::<_, _, ()>(key, &json)
                .await
                .with_context(|| format!("Failed to push result to {}", key))?;
        }

        if let Err(e) = self.conn.expire::<_, ()>(key, RESULT_EXPIRY_SECS).await {
            warn!("Failed to set expiry on {}: {}", key, e);
        }

        // Publish to channel (ignore errors as there may be no subscribers)
        if let Some(chan) = channel {
            let _ = self.conn.publish::<_, _, ()>(chan, &json).await;
        }

        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
