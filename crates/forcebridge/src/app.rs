//! Application wiring: startup, the forwarding pipeline and shutdown.
//!
//! Startup order: configuration validation → replay storage → org
//! authentication and resource provisioning → broker connections and
//! exchange declaration → CometD clients → pipeline. Any failure before
//! the pipeline is running unwinds what was already initialized and is a
//! startup error; failures after that point are runtime errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use forcebridge_amqp::{AmqpBroker, AmqpMessageSink, BrokerPublisher, MessageSink, MultiMessageSink};
use forcebridge_common::{
    BridgeError, BridgeResult, Envelope, MessageRouter, NullReplayStorage, RedisReplayStorage,
    ReplayStorage,
};
use forcebridge_runner::Runner;
use forcebridge_salesforce::{
    CometdClient, HttpBayeuxTransport, HttpRestClient, PasswordAuthenticator, ReplayFallback,
    SalesforceOrg, SourceManager, DEFAULT_QUEUE_CAPACITY,
};

use crate::config::{AppConfig, SinkConfig};

/// Runtime policy switches taken from the command line.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub ignore_replay_storage_errors: bool,
    pub ignore_sink_errors: bool,
    /// Zero means retry source connections forever.
    pub source_connection_timeout: Duration,
}

/// How a completed run ended; the binary maps this onto exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppOutcome {
    Clean,
    Interrupted,
    Fatal,
}

pub struct Application {
    config: AppConfig,
    settings: ForwarderSettings,
}

impl Application {
    pub fn new(config: AppConfig, settings: ForwarderSettings) -> Self {
        Self { config, settings }
    }

    /// Runs the bridge until its sources end, a fatal error occurs or a
    /// shutdown signal arrives. `Err` means startup failed.
    pub async fn run(self) -> BridgeResult<AppOutcome> {
        let router = crate::config::validate(&self.config)?;

        let (replay_storage, replay_fallback) = self.build_replay_storage()?;

        let mut orgs = Vec::new();
        for (org_name, org_config) in &self.config.source.orgs {
            let auth = Arc::new(PasswordAuthenticator::new(
                &org_config.consumer_key,
                &org_config.consumer_secret,
                &org_config.username,
                &org_config.password,
                org_config.sandbox,
            ));
            let rest = Arc::new(HttpRestClient::new(auth.clone()));
            let mut org = SalesforceOrg::new(org_name, auth, rest);
            let provisioned = org.provision_resources(&org_config.streaming_resources).await;
            orgs.push(org);
            if let Err(e) = provisioned {
                error!(org = %org_name, error = %e, "streaming resource provisioning failed");
                teardown_orgs(orgs).await;
                return Err(e);
            }
        }

        let sink = match connect_sinks(&self.config.sink).await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!(error = %e, "message sink setup failed");
                teardown_orgs(orgs).await;
                return Err(e);
            }
        };

        let clients = match build_clients(
            &orgs,
            Arc::clone(&replay_storage),
            replay_fallback,
            self.settings.source_connection_timeout,
        ) {
            Ok(clients) => clients,
            Err(e) => {
                sink.close().await;
                teardown_orgs(orgs).await;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let (mut source_manager, envelopes) = SourceManager::start(
            clients,
            Arc::clone(&replay_storage),
            cancel.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );

        let forwarder = MessageForwarder::new(
            router,
            Arc::clone(&sink) as Arc<dyn MessageSink>,
            self.settings.ignore_sink_errors,
        );

        info!("pipeline starting");
        let closer_sink = Arc::clone(&sink);
        let outcome = Runner::new()
            .with_cancellation_token(cancel)
            .with_process("message sources", move |_token| async move {
                source_manager.run().await.map_err(anyhow::Error::from)
            })
            .with_process("pipeline", move |_token| async move {
                // the pipeline drains the stream to its end: cancellation
                // stops the sources, which in turn ends the stream
                forwarder.run(envelopes).await.map_err(anyhow::Error::from)
            })
            .with_closer("message sinks", move || async move {
                closer_sink.close().await;
                Ok(())
            })
            .with_closer("streaming resources", move || async move {
                teardown_orgs(orgs).await;
                Ok(())
            })
            .run()
            .await;

        Ok(if outcome.interrupted {
            AppOutcome::Interrupted
        } else if outcome.failure.is_some() {
            AppOutcome::Fatal
        } else {
            AppOutcome::Clean
        })
    }

    fn build_replay_storage(&self) -> BridgeResult<(Arc<dyn ReplayStorage>, ReplayFallback)> {
        match &self.config.source.replay {
            Some(replay) => {
                let ignore_errors =
                    replay.ignore_network_errors || self.settings.ignore_replay_storage_errors;
                let storage = RedisReplayStorage::new(
                    &replay.address,
                    replay.key_prefix.clone(),
                    ignore_errors,
                )?;
                // with durable markers available, missing ones mean the
                // channel was never seen: replay everything still retained
                Ok((Arc::new(storage), ReplayFallback::AllEvents))
            }
            None => Ok((Arc::new(NullReplayStorage), ReplayFallback::NewEvents)),
        }
    }
}

/// Connects every configured broker and declares its exchanges. On failure
/// the brokers connected so far are closed again.
async fn connect_sinks(config: &SinkConfig) -> BridgeResult<MultiMessageSink> {
    let mut connected: Vec<Arc<AmqpBroker>> = Vec::new();
    let mut sinks: HashMap<String, (Arc<dyn MessageSink>, HashSet<String>)> = HashMap::new();

    for (broker_name, spec) in &config.brokers {
        let broker = Arc::new(AmqpBroker::new(broker_name, spec));
        for exchange in &spec.exchanges {
            if let Err(e) = broker.declare_exchange(exchange).await {
                for broker in connected {
                    broker.close().await;
                }
                return Err(e);
            }
        }
        connected.push(Arc::clone(&broker));
        let declared = spec
            .exchanges
            .iter()
            .map(|exchange| exchange.exchange_name.clone())
            .collect();
        let broker_sink: Arc<dyn MessageSink> = Arc::new(AmqpMessageSink::new(broker));
        sinks.insert(broker_name.clone(), (broker_sink, declared));
    }
    Ok(MultiMessageSink::new(sinks))
}

fn build_clients(
    orgs: &[SalesforceOrg],
    replay_storage: Arc<dyn ReplayStorage>,
    replay_fallback: ReplayFallback,
    connection_timeout: Duration,
) -> BridgeResult<Vec<CometdClient>> {
    orgs.iter()
        .map(|org| {
            let transport = HttpBayeuxTransport::new(org.auth(), org.bayeux_version())?;
            Ok(CometdClient::new(
                org.name(),
                Arc::new(transport),
                Arc::clone(&replay_storage),
                org.channels(),
                replay_fallback,
                connection_timeout,
            ))
        })
        .collect()
}

async fn teardown_orgs(orgs: Vec<SalesforceOrg>) {
    for org in orgs {
        org.cleanup_resources().await;
    }
}

/// The routing stage: takes envelopes off the stream, finds their route and
/// hands them to the sink, applying the per-message error policy.
pub struct MessageForwarder {
    router: MessageRouter,
    sink: Arc<dyn MessageSink>,
    ignore_sink_errors: bool,
}

impl MessageForwarder {
    pub fn new(router: MessageRouter, sink: Arc<dyn MessageSink>, ignore_sink_errors: bool) -> Self {
        Self {
            router,
            sink,
            ignore_sink_errors,
        }
    }

    /// Forwards envelopes until the stream ends.
    pub async fn run(&self, mut envelopes: mpsc::Receiver<Envelope>) -> BridgeResult<()> {
        while let Some(envelope) = envelopes.recv().await {
            self.forward(envelope).await?;
        }
        info!("envelope stream ended");
        Ok(())
    }

    async fn forward(&self, envelope: Envelope) -> BridgeResult<()> {
        let channel = envelope.channel().unwrap_or("<unknown>").to_string();
        let replay_id = envelope.replay_marker().map(|m| m.replay_id);
        let Some(route) = self.router.find_route(&envelope) else {
            debug!(
                org = %envelope.org_name,
                channel = %channel,
                replay_id,
                "no route matched, message dropped"
            );
            return Ok(());
        };
        match self.sink.consume_message(&envelope.message, route).await {
            Ok(()) => {
                info!(
                    "Forwarded message {} on channel {} from {} to {}",
                    replay_id.map_or_else(|| "<no replay id>".to_string(), |id| id.to_string()),
                    channel,
                    envelope.org_name,
                    route
                );
                Ok(())
            }
            Err(e @ BridgeError::SinkNetwork(_)) if self.ignore_sink_errors => {
                error!(
                    org = %envelope.org_name,
                    channel = %channel,
                    replay_id,
                    error = %e,
                    "failed to forward message, dropping it"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
