//! Durable storage of per-channel replay markers.
//!
//! The Streaming API redelivers events from a stored replay id after a
//! disconnect, so markers are written on every receive (before the message
//! is forwarded) and read back when a channel is (re)subscribed.

mod redis;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::envelope::ReplayMarker;
use crate::domain::result::BridgeResult;

pub use self::redis::RedisReplayStorage;

/// Key under which a channel's marker is stored: `{prefix}:{org}:{channel}`.
pub fn marker_key(key_prefix: Option<&str>, org_name: &str, channel: &str) -> String {
    match key_prefix {
        Some(prefix) => format!("{prefix}:{org_name}:{channel}"),
        None => format!("{org_name}:{channel}"),
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReplayStorage: Send + Sync {
    /// The stored marker for the channel, or `None` when nothing was stored
    /// yet.
    async fn get_marker(&self, org_name: &str, channel: &str)
        -> BridgeResult<Option<ReplayMarker>>;

    /// Store the channel's marker, overwriting any previous value.
    async fn set_marker(
        &self,
        org_name: &str,
        channel: &str,
        marker: &ReplayMarker,
    ) -> BridgeResult<()>;
}

/// Storage that remembers nothing. Subscriptions fall back to
/// "new events only".
#[derive(Debug, Default)]
pub struct NullReplayStorage;

#[async_trait]
impl ReplayStorage for NullReplayStorage {
    async fn get_marker(
        &self,
        _org_name: &str,
        _channel: &str,
    ) -> BridgeResult<Option<ReplayMarker>> {
        Ok(None)
    }

    async fn set_marker(
        &self,
        _org_name: &str,
        _channel: &str,
        _marker: &ReplayMarker,
    ) -> BridgeResult<()> {
        Ok(())
    }
}

/// Process-local storage. Survives reconnects within a run but not a
/// restart; also the storage the test suite asserts against.
#[derive(Debug, Default)]
pub struct InMemoryReplayStorage {
    markers: Mutex<HashMap<String, ReplayMarker>>,
}

impl InMemoryReplayStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStorage for InMemoryReplayStorage {
    async fn get_marker(
        &self,
        org_name: &str,
        channel: &str,
    ) -> BridgeResult<Option<ReplayMarker>> {
        let markers = self.markers.lock().expect("marker map lock poisoned");
        Ok(markers.get(&marker_key(None, org_name, channel)).cloned())
    }

    async fn set_marker(
        &self,
        org_name: &str,
        channel: &str,
        marker: &ReplayMarker,
    ) -> BridgeResult<()> {
        let mut markers = self.markers.lock().expect("marker map lock poisoned");
        markers.insert(marker_key(None, org_name, channel), marker.clone());
        Ok(())
    }
}
