use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::envelope::ReplayMarker;
use crate::domain::result::{BridgeError, BridgeResult};
use crate::replay::{marker_key, ReplayStorage};

const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Replay markers in Redis, one `GET`/`SET` key per (org, channel), value
/// `{"replayId":…,"createdDate":"…"}`.
///
/// With `ignore_network_errors` set, a failing operation is logged and
/// reported as "no marker" / "stored"; persistence resumes as soon as the
/// server is reachable again.
pub struct RedisReplayStorage {
    client: redis::Client,
    key_prefix: Option<String>,
    ignore_network_errors: bool,
    // cached connection, dropped on the first failed operation
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisReplayStorage {
    /// `address` is a `redis://host:port[/db]` URL.
    pub fn new(
        address: &str,
        key_prefix: Option<String>,
        ignore_network_errors: bool,
    ) -> BridgeResult<Self> {
        let client = redis::Client::open(address)
            .map_err(|e| BridgeError::ReplayStorage(format!("invalid address {address:?}: {e}")))?;
        Ok(Self {
            client,
            key_prefix,
            ignore_network_errors,
            connection: Mutex::new(None),
        })
    }

    fn key(&self, org_name: &str, channel: &str) -> String {
        marker_key(self.key_prefix.as_deref(), org_name, channel)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    async fn forget_connection(&self) {
        *self.connection.lock().await = None;
    }

    async fn get_raw(&self, key: &str) -> BridgeResult<Option<String>> {
        let result = tokio::time::timeout(OP_TIMEOUT, async {
            let mut connection = self.connection().await?;
            connection.get::<_, Option<String>>(key).await
        })
        .await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.forget_connection().await;
                Err(BridgeError::ReplayStorage(format!(
                    "failed to read marker {key:?}: {e}"
                )))
            }
            Err(_) => {
                self.forget_connection().await;
                Err(BridgeError::ReplayStorage(format!(
                    "timed out reading marker {key:?}"
                )))
            }
        }
    }

    async fn set_raw(&self, key: &str, value: String) -> BridgeResult<()> {
        let result = tokio::time::timeout(OP_TIMEOUT, async {
            let mut connection = self.connection().await?;
            connection.set::<_, _, ()>(key, value).await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.forget_connection().await;
                Err(BridgeError::ReplayStorage(format!(
                    "failed to write marker {key:?}: {e}"
                )))
            }
            Err(_) => {
                self.forget_connection().await;
                Err(BridgeError::ReplayStorage(format!(
                    "timed out writing marker {key:?}"
                )))
            }
        }
    }
}

#[async_trait]
impl ReplayStorage for RedisReplayStorage {
    async fn get_marker(
        &self,
        org_name: &str,
        channel: &str,
    ) -> BridgeResult<Option<ReplayMarker>> {
        let key = self.key(org_name, channel);
        let raw = match self.get_raw(&key).await {
            Ok(raw) => raw,
            Err(e) if self.ignore_network_errors => {
                warn!(key = %key, error = %e, "ignoring replay storage read failure");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match raw {
            None => Ok(None),
            Some(raw) => {
                let marker: ReplayMarker = serde_json::from_str(&raw).map_err(|e| {
                    BridgeError::ReplayStorage(format!("corrupt marker under {key:?}: {e}"))
                })?;
                debug!(key = %key, replay_id = marker.replay_id, "loaded replay marker");
                Ok(Some(marker))
            }
        }
    }

    async fn set_marker(
        &self,
        org_name: &str,
        channel: &str,
        marker: &ReplayMarker,
    ) -> BridgeResult<()> {
        let key = self.key(org_name, channel);
        let value = serde_json::to_string(marker)
            .map_err(|e| BridgeError::ReplayStorage(format!("unencodable marker: {e}")))?;
        match self.set_raw(&key, value).await {
            Ok(()) => Ok(()),
            Err(e) if self.ignore_network_errors => {
                warn!(key = %key, error = %e, "ignoring replay storage write failure");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_address() {
        let result = RedisReplayStorage::new("not-a-url", None, false);
        assert!(matches!(result, Err(BridgeError::ReplayStorage(_))));
    }

    #[test]
    fn test_key_uses_prefix() {
        let storage =
            RedisReplayStorage::new("redis://localhost:6379/0", Some("replay".into()), false)
                .unwrap();
        assert_eq!(
            storage.key("my_org", "/topic/lead_changes"),
            "replay:my_org:/topic/lead_changes"
        );
    }
}
