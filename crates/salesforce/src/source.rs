//! Fan-in of all org clients into a single envelope stream.
//!
//! Each org runs two tasks: the CometD client and a stream task that wraps
//! every inbound message into an [`Envelope`], persists its replay marker
//! and emits it into the shared bounded queue. Per-(org, channel) order is
//! preserved because the whole chain is sequential; the bounded queue
//! delays the next long-poll when the pipeline falls behind.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use forcebridge_common::{BridgeError, BridgeResult, Envelope, ReplayStorage};

use crate::cometd::CometdClient;

/// Capacity of the shared envelope queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRole {
    Client,
    Stream,
}

/// Owns every org's client and stream task. The envelope receiver returned
/// by [`SourceManager::start`] ends once all tasks have terminated.
pub struct SourceManager {
    tasks: JoinSet<(TaskRole, String, BridgeResult<()>)>,
    cancel: CancellationToken,
    client_count: usize,
}

impl SourceManager {
    /// Spawns the source tasks for every client and returns the manager
    /// plus the shared envelope stream.
    pub fn start(
        clients: Vec<CometdClient>,
        replay_storage: Arc<dyn ReplayStorage>,
        cancel: CancellationToken,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (envelope_tx, envelope_rx) = mpsc::channel(queue_capacity);
        let mut tasks = JoinSet::new();
        let client_count = clients.len();

        for client in clients {
            let org_name = client.org_name().to_string();
            let (event_tx, event_rx) = mpsc::channel::<Value>(16);

            let client_cancel = cancel.child_token();
            let client_org = org_name.clone();
            tasks.spawn(async move {
                let result = client.run(event_tx, client_cancel).await;
                (TaskRole::Client, client_org, result)
            });

            let storage = Arc::clone(&replay_storage);
            let stream_tx = envelope_tx.clone();
            let stream_org = org_name;
            tasks.spawn(async move {
                let result = run_org_stream(&stream_org, storage, event_rx, stream_tx).await;
                (TaskRole::Stream, stream_org, result)
            });
        }

        // dropping the last sender ends the stream once every task is done
        drop(envelope_tx);
        (
            Self {
                tasks,
                cancel,
                client_count,
            },
            envelope_rx,
        )
    }

    /// Supervises the source tasks until they all terminate.
    ///
    /// A single failed client only logs: the remaining orgs keep the bridge
    /// alive. When every client has failed without a shutdown request the
    /// manager reports a fatal error. Stream-task errors (replay storage
    /// failures that are not configured to be ignored) are fatal right away.
    pub async fn run(&mut self) -> BridgeResult<()> {
        let mut failed_clients = 0usize;
        while let Some(joined) = self.tasks.join_next().await {
            let (role, org_name, result) = joined.map_err(|e| {
                BridgeError::SourceFatal(format!("message source task panicked: {e}"))
            })?;
            match (role, result) {
                (_, Ok(())) => {}
                (TaskRole::Client, Err(e)) => {
                    failed_clients += 1;
                    error!(org = %org_name, error = %e, "message source failed");
                }
                (TaskRole::Stream, Err(e)) => {
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }
        if failed_clients == self.client_count
            && self.client_count > 0
            && !self.cancel.is_cancelled()
        {
            return Err(BridgeError::SourceFatal(
                "all message sources have failed".into(),
            ));
        }
        info!("all message sources stopped");
        Ok(())
    }
}

/// Wraps inbound messages of one org into envelopes and emits them,
/// persisting the replay marker of each message before emission.
async fn run_org_stream(
    org_name: &str,
    replay_storage: Arc<dyn ReplayStorage>,
    mut events: mpsc::Receiver<Value>,
    envelopes: mpsc::Sender<Envelope>,
) -> BridgeResult<()> {
    while let Some(message) = events.recv().await {
        let envelope = Envelope::new(org_name, message);
        let Some(channel) = envelope.channel().map(str::to_string) else {
            warn!(org = %org_name, "dropping inbound message without channel");
            continue;
        };
        if let Some(marker) = envelope.replay_marker() {
            // the marker is durable before anyone downstream can see the
            // envelope, matching the at-least-once replay contract
            replay_storage
                .set_marker(org_name, &channel, &marker)
                .await?;
        }
        if envelopes.send(envelope).await.is_err() {
            // pipeline is gone, nothing left to emit to
            break;
        }
    }
    Ok(())
}
