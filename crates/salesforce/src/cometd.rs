//! CometD (Bayeux) long-polling client for the Streaming API.
//!
//! One client per org. The client owns its Bayeux session: handshake,
//! subscriptions carrying the replay extension, the `/meta/connect` long
//! poll, and reconnection with exponential backoff inside the configured
//! connection-timeout budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use forcebridge_common::{BridgeError, BridgeResult, ReplayStorage};

use crate::auth::Authenticator;

const META_HANDSHAKE: &str = "/meta/handshake";
const META_CONNECT: &str = "/meta/connect";
const META_SUBSCRIBE: &str = "/meta/subscribe";
const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
const META_DISCONNECT: &str = "/meta/disconnect";

/// Replay id to subscribe with when no marker is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayFallback {
    /// `-1`: only events emitted after the subscription.
    #[default]
    NewEvents,
    /// `-2`: every event still retained by the server.
    AllEvents,
}

impl ReplayFallback {
    pub fn replay_value(&self) -> i64 {
        match self {
            ReplayFallback::NewEvents => -1,
            ReplayFallback::AllEvents => -2,
        }
    }
}

/// Exponential backoff schedule for transient source failures.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Relative jitter applied symmetrically, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffSchedule {
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = raw.min(self.cap.as_secs_f64());
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            rand::thread_rng().gen_range(capped - spread..=capped + spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// The transport a client speaks Bayeux over. A round trip posts a batch of
/// frames and returns the reply frames.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BayeuxTransport: Send + Sync {
    async fn send(&self, frames: Vec<Value>) -> BridgeResult<Vec<Value>>;

    /// Re-authenticate after the server rejected the access token.
    async fn refresh_auth(&self) -> BridgeResult<()>;
}

/// HTTPS long-polling transport against `{instance_url}/cometd/{version}`.
pub struct HttpBayeuxTransport {
    auth: Arc<dyn Authenticator>,
    http: reqwest::Client,
    version: String,
}

impl HttpBayeuxTransport {
    pub fn new(auth: Arc<dyn Authenticator>, version: impl Into<String>) -> BridgeResult<Self> {
        // the long poll is held open by the server for up to its advertised
        // timeout (110s by default), so the client timeout sits above that
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BridgeError::SourceFatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            auth,
            http,
            version: version.into(),
        })
    }
}

#[async_trait]
impl BayeuxTransport for HttpBayeuxTransport {
    async fn send(&self, frames: Vec<Value>) -> BridgeResult<Vec<Value>> {
        let snapshot = self.auth.snapshot().await?;
        let url = format!("{}/cometd/{}", snapshot.instance_url, self.version);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &snapshot.authorization)
            .json(&frames)
            .send()
            .await
            .map_err(|e| BridgeError::SourceTransient(format!("Bayeux request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BridgeError::Auth("Bayeux request returned 401".into()));
        }
        if status.is_server_error() {
            return Err(BridgeError::SourceTransient(format!(
                "Bayeux request returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(BridgeError::SourceFatal(format!(
                "Bayeux request returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BridgeError::SourceTransient(format!("malformed Bayeux response: {e}")))
    }

    async fn refresh_auth(&self) -> BridgeResult<()> {
        self.auth.refresh().await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

/// Reconnect instruction from server advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReconnectAdvice {
    #[default]
    Retry,
    Handshake,
    None,
}

pub struct CometdClient {
    org_name: String,
    transport: Arc<dyn BayeuxTransport>,
    replay_storage: Arc<dyn ReplayStorage>,
    channels: Vec<String>,
    replay_fallback: ReplayFallback,
    /// Budget for continuous transient failure; zero means retry forever.
    connection_timeout: Duration,
    backoff: BackoffSchedule,
    state: ClientState,
    client_id: Option<String>,
    message_id: u64,
    interval: Duration,
    auth_failures: u32,
}

impl CometdClient {
    pub fn new(
        org_name: impl Into<String>,
        transport: Arc<dyn BayeuxTransport>,
        replay_storage: Arc<dyn ReplayStorage>,
        channels: Vec<String>,
        replay_fallback: ReplayFallback,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            org_name: org_name.into(),
            transport,
            replay_storage,
            channels,
            replay_fallback,
            connection_timeout,
            backoff: BackoffSchedule::default(),
            state: ClientState::Unconnected,
            client_id: None,
            message_id: 0,
            interval: Duration::ZERO,
            auth_failures: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    /// Runs the client until cancellation or a fatal error, delivering every
    /// inbound non-meta message to `events` in arrival order.
    pub async fn run(
        mut self,
        events: mpsc::Sender<Value>,
        cancel: CancellationToken,
    ) -> BridgeResult<()> {
        let result = self.run_inner(&events, &cancel).await;
        self.close().await;
        result
    }

    async fn run_inner(
        &mut self,
        events: &mpsc::Sender<Value>,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let mut failure_started: Option<Instant> = None;
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let step = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                step = self.step(events) => step,
            };
            match step {
                Ok(()) => {
                    failure_started = None;
                    attempt = 0;
                    self.auth_failures = 0;
                }
                Err(BridgeError::Auth(reason)) => {
                    self.auth_failures += 1;
                    if self.auth_failures > 1 {
                        self.state = ClientState::Failed;
                        return Err(BridgeError::SourceFatal(format!(
                            "org {:?}: repeated authentication failure: {reason}",
                            self.org_name
                        )));
                    }
                    warn!(org = %self.org_name, reason = %reason, "access token rejected, refreshing");
                    let transport = Arc::clone(&self.transport);
                    if let Err(e) = transport.refresh_auth().await {
                        self.state = ClientState::Failed;
                        return Err(BridgeError::SourceFatal(format!(
                            "org {:?}: token refresh failed: {e}",
                            self.org_name
                        )));
                    }
                    self.client_id = None;
                    self.state = ClientState::Unconnected;
                }
                Err(BridgeError::SourceTransient(reason)) => {
                    let started = *failure_started.get_or_insert_with(Instant::now);
                    if !self.connection_timeout.is_zero()
                        && started.elapsed() >= self.connection_timeout
                    {
                        self.state = ClientState::Failed;
                        return Err(BridgeError::SourceFatal(format!(
                            "org {:?}: reconnection budget of {:?} exhausted: {reason}",
                            self.org_name, self.connection_timeout
                        )));
                    }
                    let delay = self.backoff.delay(attempt);
                    attempt += 1;
                    warn!(
                        org = %self.org_name,
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "transient source failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    self.state = ClientState::Failed;
                    return Err(e);
                }
            }
        }
    }

    async fn step(&mut self, events: &mpsc::Sender<Value>) -> BridgeResult<()> {
        match self.state {
            ClientState::Unconnected => {
                self.handshake().await?;
                self.subscribe_all().await?;
                self.state = ClientState::Connecting;
                Ok(())
            }
            ClientState::Connecting | ClientState::Connected => self.poll(events).await,
            ClientState::Disconnecting | ClientState::Disconnected | ClientState::Failed => {
                Err(BridgeError::InvalidOperation(format!(
                    "client for org {:?} is not running",
                    self.org_name
                )))
            }
        }
    }

    fn next_id(&mut self) -> String {
        self.message_id += 1;
        self.message_id.to_string()
    }

    fn client_id(&self) -> BridgeResult<String> {
        self.client_id.clone().ok_or_else(|| {
            BridgeError::InvalidOperation("no Bayeux session established".into())
        })
    }

    async fn handshake(&mut self) -> BridgeResult<()> {
        let frame = json!({
            "channel": META_HANDSHAKE,
            "version": "1.0",
            "minimumVersion": "1.0",
            "supportedConnectionTypes": ["long-polling"],
            "ext": {"replay": true},
            "id": self.next_id(),
        });
        let frames = self.transport.send(vec![frame]).await?;
        let reply = find_reply(&frames, META_HANDSHAKE).ok_or_else(|| {
            BridgeError::SourceTransient("no handshake reply received".into())
        })?;
        self.check_reply(reply, "handshake")?;
        let client_id = reply
            .get("clientId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::SourceTransient("handshake reply carries no clientId".into())
            })?;
        self.client_id = Some(client_id.to_string());
        self.read_advice(reply);
        info!(org = %self.org_name, client_id = %client_id, "Bayeux handshake complete");
        Ok(())
    }

    async fn subscribe_all(&mut self) -> BridgeResult<()> {
        for channel in self.channels.clone() {
            let replay_id = match self
                .replay_storage
                .get_marker(&self.org_name, &channel)
                .await?
            {
                Some(marker) => marker.replay_id,
                None => self.replay_fallback.replay_value(),
            };
            let frame = json!({
                "channel": META_SUBSCRIBE,
                "clientId": self.client_id()?,
                "subscription": channel,
                "ext": {"replay": {(channel.as_str()): replay_id}},
                "id": self.next_id(),
            });
            let frames = self.transport.send(vec![frame]).await?;
            let reply = find_reply(&frames, META_SUBSCRIBE).ok_or_else(|| {
                BridgeError::SourceTransient("no subscribe reply received".into())
            })?;
            self.check_reply(reply, "subscribe")?;
            debug!(org = %self.org_name, channel = %channel, replay_id, "subscribed");
        }
        Ok(())
    }

    async fn poll(&mut self, events: &mpsc::Sender<Value>) -> BridgeResult<()> {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        let frame = json!({
            "channel": META_CONNECT,
            "clientId": self.client_id()?,
            "connectionType": "long-polling",
            "id": self.next_id(),
        });
        let frames = self.transport.send(vec![frame]).await?;
        self.dispatch_frames(frames, events).await
    }

    async fn dispatch_frames(
        &mut self,
        frames: Vec<Value>,
        events: &mpsc::Sender<Value>,
    ) -> BridgeResult<()> {
        for frame in frames {
            match frame.get("channel").and_then(Value::as_str) {
                Some(META_CONNECT) => self.handle_connect_reply(&frame)?,
                Some(meta) if meta.starts_with("/meta/") => {
                    debug!(org = %self.org_name, channel = %meta, "ignoring meta frame");
                }
                Some(_) => {
                    // a full queue delays the next long poll, which is the
                    // only back-pressure the protocol allows
                    events.send(frame).await.map_err(|_| {
                        BridgeError::InvalidOperation("event stream receiver dropped".into())
                    })?;
                }
                None => debug!(org = %self.org_name, "dropping frame without channel"),
            }
        }
        Ok(())
    }

    fn handle_connect_reply(&mut self, reply: &Value) -> BridgeResult<()> {
        let advice = self.read_advice(reply);
        let successful = reply
            .get("successful")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if successful {
            self.state = ClientState::Connected;
            match advice {
                ReconnectAdvice::Retry => Ok(()),
                ReconnectAdvice::Handshake => {
                    debug!(org = %self.org_name, "server requested rehandshake");
                    self.client_id = None;
                    self.state = ClientState::Unconnected;
                    Ok(())
                }
                ReconnectAdvice::None => Err(BridgeError::SourceFatal(format!(
                    "org {:?}: server advised not to reconnect",
                    self.org_name
                ))),
            }
        } else {
            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("connect failed");
            if error.starts_with("401") {
                return Err(BridgeError::Auth(error.to_string()));
            }
            match advice {
                ReconnectAdvice::Handshake => {
                    debug!(org = %self.org_name, error = %error, "session lost, rehandshaking");
                    self.client_id = None;
                    self.state = ClientState::Unconnected;
                    Ok(())
                }
                ReconnectAdvice::Retry => Err(BridgeError::SourceTransient(error.to_string())),
                ReconnectAdvice::None => Err(BridgeError::SourceFatal(format!(
                    "org {:?}: {error}",
                    self.org_name
                ))),
            }
        }
    }

    /// Checks a handshake/subscribe reply, mapping failures onto the error
    /// policy.
    fn check_reply(&self, reply: &Value, operation: &str) -> BridgeResult<()> {
        let successful = reply
            .get("successful")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if successful {
            return Ok(());
        }
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if error.starts_with("401") {
            return Err(BridgeError::Auth(format!("{operation} rejected: {error}")));
        }
        match read_reconnect_advice(reply) {
            Some(ReconnectAdvice::None) => Err(BridgeError::SourceFatal(format!(
                "org {:?}: {operation} rejected: {error}",
                self.org_name
            ))),
            _ => Err(BridgeError::SourceTransient(format!(
                "{operation} rejected: {error}"
            ))),
        }
    }

    /// Stores interval advice and returns the reconnect instruction.
    fn read_advice(&mut self, reply: &Value) -> ReconnectAdvice {
        if let Some(interval) = reply
            .get("advice")
            .and_then(|a| a.get("interval"))
            .and_then(Value::as_u64)
        {
            self.interval = Duration::from_millis(interval);
        }
        read_reconnect_advice(reply).unwrap_or_default()
    }

    /// Best-effort unsubscribe and disconnect; errors during shutdown are
    /// logged and swallowed.
    async fn close(&mut self) {
        let Some(client_id) = self.client_id.clone() else {
            self.state = ClientState::Disconnected;
            return;
        };
        self.state = ClientState::Disconnecting;
        let mut frames: Vec<Value> = self
            .channels
            .clone()
            .into_iter()
            .map(|channel| {
                json!({
                    "channel": META_UNSUBSCRIBE,
                    "clientId": client_id,
                    "subscription": channel,
                    "id": self.next_id(),
                })
            })
            .collect();
        frames.push(json!({
            "channel": META_DISCONNECT,
            "clientId": client_id,
            "id": self.next_id(),
        }));
        if let Err(e) = self.transport.send(frames).await {
            debug!(org = %self.org_name, error = %e, "disconnect failed");
        }
        self.client_id = None;
        self.state = ClientState::Disconnected;
        info!(org = %self.org_name, "Bayeux session closed");
    }
}

fn find_reply<'a>(frames: &'a [Value], channel: &str) -> Option<&'a Value> {
    frames
        .iter()
        .find(|frame| frame.get("channel").and_then(Value::as_str) == Some(channel))
}

fn read_reconnect_advice(reply: &Value) -> Option<ReconnectAdvice> {
    match reply
        .get("advice")?
        .get("reconnect")?
        .as_str()?
    {
        "retry" => Some(ReconnectAdvice::Retry),
        "handshake" => Some(ReconnectAdvice::Handshake),
        "none" => Some(ReconnectAdvice::None),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forcebridge_common::{InMemoryReplayStorage, ReplayMarker};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a scripted sequence of responses and records
    /// every batch of frames it was asked to send.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<BridgeResult<Vec<Value>>>>,
        sent: Mutex<Vec<Vec<Value>>>,
        refreshes: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<BridgeResult<Vec<Value>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                sent: Mutex::new(Vec::new()),
                refreshes: Mutex::new(0),
            }
        }

        fn sent(&self) -> Vec<Vec<Value>> {
            self.sent.lock().unwrap().clone()
        }

        fn refresh_count(&self) -> u32 {
            *self.refreshes.lock().unwrap()
        }
    }

    #[async_trait]
    impl BayeuxTransport for ScriptedTransport {
        async fn send(&self, frames: Vec<Value>) -> BridgeResult<Vec<Value>> {
            self.sent.lock().unwrap().push(frames);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                // an exhausted script parks the long poll until cancellation
                .unwrap_or_else(|| {
                    Ok(vec![json!({
                        "channel": META_CONNECT,
                        "successful": true,
                        "advice": {"reconnect": "retry", "interval": 60_000},
                    })])
                })
        }

        async fn refresh_auth(&self) -> BridgeResult<()> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn handshake_ok() -> BridgeResult<Vec<Value>> {
        Ok(vec![json!({
            "channel": META_HANDSHAKE,
            "successful": true,
            "clientId": "client-1",
            "advice": {"reconnect": "retry"},
        })])
    }

    fn subscribe_ok() -> BridgeResult<Vec<Value>> {
        Ok(vec![json!({
            "channel": META_SUBSCRIBE,
            "successful": true,
        })])
    }

    fn connect_with_events(events: Vec<Value>) -> BridgeResult<Vec<Value>> {
        let mut frames = events;
        frames.push(json!({
            "channel": META_CONNECT,
            "successful": true,
            "advice": {"reconnect": "retry"},
        }));
        Ok(frames)
    }

    fn event(channel: &str, replay_id: i64) -> Value {
        json!({
            "channel": channel,
            "data": {"event": {"replayId": replay_id, "createdDate": "2018-03-17T10:00:00.000Z"}}
        })
    }

    fn client(
        transport: Arc<ScriptedTransport>,
        storage: Arc<InMemoryReplayStorage>,
        timeout: Duration,
    ) -> CometdClient {
        CometdClient::new(
            "my_org",
            transport,
            storage,
            vec!["/topic/lead_changes".into()],
            ReplayFallback::NewEvents,
            timeout,
        )
    }

    async fn run_until_events(
        client: CometdClient,
        expected: usize,
    ) -> (Vec<Value>, BridgeResult<()>) {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(client.run(tx, cancel.clone()));
        let mut events = Vec::new();
        while events.len() < expected {
            match rx.recv().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        cancel.cancel();
        (events, handle.await.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_subscribe_and_event_delivery() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            connect_with_events(vec![
                event("/topic/lead_changes", 1),
                event("/topic/lead_changes", 2),
            ]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::ZERO);

        let (events, result) = run_until_events(client, 2).await;
        result.unwrap();

        // events arrive in order
        let ids: Vec<i64> = events
            .iter()
            .map(|e| e["data"]["event"]["replayId"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let sent = transport.sent();
        // handshake advertises the replay extension
        assert_eq!(sent[0][0]["ext"], json!({"replay": true}));
        // no stored marker: subscribe with -1
        assert_eq!(
            sent[1][0]["ext"]["replay"]["/topic/lead_changes"],
            json!(-1)
        );
        // last batch unsubscribes and disconnects
        let last = sent.last().unwrap();
        assert_eq!(last[0]["channel"], json!(META_UNSUBSCRIBE));
        assert_eq!(last[1]["channel"], json!(META_DISCONNECT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_uses_stored_replay_marker() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            connect_with_events(vec![event("/topic/lead_changes", 43)]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        storage
            .set_marker(
                "my_org",
                "/topic/lead_changes",
                &ReplayMarker {
                    replay_id: 42,
                    created_date: "2018-03-17T10:00:00.000Z".into(),
                },
            )
            .await
            .unwrap();
        let client = client(Arc::clone(&transport), storage, Duration::ZERO);

        let (_, result) = run_until_events(client, 1).await;
        result.unwrap();
        assert_eq!(
            transport.sent()[1][0]["ext"]["replay"]["/topic/lead_changes"],
            json!(42)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_all_fallback() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            connect_with_events(vec![event("/topic/lead_changes", 1)]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = CometdClient::new(
            "my_org",
            Arc::clone(&transport) as Arc<dyn BayeuxTransport>,
            storage,
            vec!["/topic/lead_changes".into()],
            ReplayFallback::AllEvents,
            Duration::ZERO,
        );

        let (_, result) = run_until_events(client, 1).await;
        result.unwrap();
        assert_eq!(
            transport.sent()[1][0]["ext"]["replay"]["/topic/lead_changes"],
            json!(-2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rehandshake_advice_resubscribes() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            // server drops the session
            Ok(vec![json!({
                "channel": META_CONNECT,
                "successful": false,
                "error": "402::Unknown client",
                "advice": {"reconnect": "handshake"},
            })]),
            handshake_ok(),
            subscribe_ok(),
            connect_with_events(vec![event("/topic/lead_changes", 5)]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::ZERO);

        let (events, result) = run_until_events(client, 1).await;
        result.unwrap();
        assert_eq!(events.len(), 1);

        let handshakes = transport
            .sent()
            .iter()
            .filter(|batch| batch[0]["channel"] == json!(META_HANDSHAKE))
            .count();
        assert_eq!(handshakes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_none_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            Ok(vec![json!({
                "channel": META_CONNECT,
                "successful": false,
                "error": "403::Banned",
                "advice": {"reconnect": "none"},
            })]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::ZERO);

        let (tx, _rx) = mpsc::channel(16);
        let result = client.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::SourceFatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_budget() {
        let failures: Vec<BridgeResult<Vec<Value>>> = (0..32)
            .map(|_| Err(BridgeError::SourceTransient("connection refused".into())))
            .collect();
        let transport = Arc::new(ScriptedTransport::new(failures));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::from_secs(5));

        let (tx, _rx) = mpsc::channel(16);
        let started = Instant::now();
        let result = client.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::SourceFatal(_))));
        // budget is honored: roughly five seconds of backoff, not minutes
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_retries_indefinitely() {
        let failures: Vec<BridgeResult<Vec<Value>>> = (0..8)
            .map(|_| Err(BridgeError::SourceTransient("connection refused".into())))
            .collect();
        let mut script = failures;
        script.push(handshake_ok());
        script.push(subscribe_ok());
        script.push(connect_with_events(vec![event("/topic/lead_changes", 9)]));
        let transport = Arc::new(ScriptedTransport::new(script));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::ZERO);

        // recovers after eight straight failures because the budget is infinite
        let (events, result) = run_until_events(client, 1).await;
        result.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_refreshes_token_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            Err(BridgeError::Auth("Bayeux request returned 401".into())),
            handshake_ok(),
            subscribe_ok(),
            connect_with_events(vec![event("/topic/lead_changes", 6)]),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::from_secs(10));

        let (events, result) = run_until_events(client, 1).await;
        result.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(transport.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_consecutive_401_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            handshake_ok(),
            subscribe_ok(),
            Err(BridgeError::Auth("Bayeux request returned 401".into())),
            Err(BridgeError::Auth("Bayeux request returned 401".into())),
        ]));
        let storage = Arc::new(InMemoryReplayStorage::new());
        let client = client(Arc::clone(&transport), storage, Duration::from_secs(10));

        let (tx, _rx) = mpsc::channel(16);
        let result = client.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::SourceFatal(_))));
        assert_eq!(transport.refresh_count(), 1);
    }

    #[test]
    fn test_backoff_schedule_caps_and_jitters() {
        let schedule = BackoffSchedule::default();
        for attempt in 0..10 {
            let delay = schedule.delay(attempt);
            // cap of 30s plus 20% jitter headroom
            assert!(delay <= Duration::from_secs(36));
        }
        let unjittered = BackoffSchedule {
            jitter: 0.0,
            ..BackoffSchedule::default()
        };
        assert_eq!(unjittered.delay(0), Duration::from_secs(1));
        assert_eq!(unjittered.delay(1), Duration::from_secs(2));
        assert_eq!(unjittered.delay(10), Duration::from_secs(30));
    }
}
