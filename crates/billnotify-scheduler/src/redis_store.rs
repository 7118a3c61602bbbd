//! Redis-backed queue store (LPUSH / BRPOP / LLEN).
//!
//! Blocking pops hold their connection for the whole wait, so each pop checks
//! a multiplexed connection out of a small pool instead of sharing the one
//! used for pushes.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use billnotify_core::error::{BillNotifyError, Result};
use redis::aio::MultiplexedConnection;

use crate::store::QueueStore;

pub struct RedisQueueStore {
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisQueueStore {
    /// Parse the URL. No connection is made until the first command.
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BillNotifyError::QueueUnavailable(format!("Invalid Redis URL: {e}")))?;
        Ok(Self { client, idle: Mutex::new(Vec::new()) })
    }

    async fn checkout(&self) -> Result<MultiplexedConnection> {
        let cached = self.idle.lock().unwrap_or_else(|p| p.into_inner()).pop();
        match cached {
            Some(conn) => Ok(conn),
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| BillNotifyError::Queue(format!("Redis connection: {e}"))),
        }
    }

    fn checkin(&self, conn: MultiplexedConnection) {
        self.idle.lock().unwrap_or_else(|p| p.into_inner()).push(conn);
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T> {
        let mut conn = self.checkout().await?;
        let result = cmd.query_async::<_, T>(&mut conn).await;
        match result {
            Ok(value) => {
                self.checkin(conn);
                Ok(value)
            }
            // A failed command may leave the connection broken; drop it.
            Err(e) => Err(BillNotifyError::Queue(format!("Redis command: {e}"))),
        }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn ping(&self) -> Result<()> {
        let pong: String = self
            .run(redis::cmd("PING"))
            .await
            .map_err(|e| BillNotifyError::QueueUnavailable(e.to_string()))?;
        tracing::debug!("Redis ping: {pong}");
        Ok(())
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(queue).arg(payload);
        let _: i64 = self.run(cmd).await?;
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(queue).arg(timeout.as_secs_f64());
        let popped: Option<(String, String)> = self.run(cmd).await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(queue);
        self.run(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(matches!(
            RedisQueueStore::open("not-a-url"),
            Err(BillNotifyError::QueueUnavailable(_))
        ));
        assert!(RedisQueueStore::open("redis://127.0.0.1:6379").is_ok());
    }
}
