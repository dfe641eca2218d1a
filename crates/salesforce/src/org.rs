//! A Salesforce org: shared credentials plus the streaming resources the
//! bridge subscribes to.

use std::sync::Arc;

use tracing::{info, warn};

use forcebridge_common::BridgeResult;

use crate::auth::Authenticator;
use crate::resources::{ResourceSpec, StreamingResource, StreamingResourceFactory};
use crate::rest::{RestApi, DEFAULT_API_VERSION};

pub struct SalesforceOrg {
    name: String,
    auth: Arc<dyn Authenticator>,
    rest: Arc<dyn RestApi>,
    resources: Vec<StreamingResource>,
}

impl SalesforceOrg {
    pub fn new(name: impl Into<String>, auth: Arc<dyn Authenticator>, rest: Arc<dyn RestApi>) -> Self {
        Self {
            name: name.into(),
            auth,
            rest,
            resources: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auth(&self) -> Arc<dyn Authenticator> {
        Arc::clone(&self.auth)
    }

    pub fn resources(&self) -> &[StreamingResource] {
        &self.resources
    }

    /// The Bayeux channels of all provisioned resources.
    pub fn channels(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.channel()).collect()
    }

    /// The Bayeux protocol version: the newest `ApiVersion` declared across
    /// the org's resources, falling back to the REST default.
    pub fn bayeux_version(&self) -> String {
        let newest = self
            .resources
            .iter()
            .filter_map(|r| r.api_version)
            .fold(None::<f64>, |acc, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            });
        match newest {
            Some(version) => format!("{version:.1}"),
            None => DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Resolve every spec against the org. Any failure here is fatal for
    /// startup; resources provisioned so far stay recorded so a partial
    /// failure can still be cleaned up.
    pub async fn provision_resources(&mut self, specs: &[ResourceSpec]) -> BridgeResult<()> {
        let factory = StreamingResourceFactory::new(Arc::clone(&self.rest));
        for spec in specs {
            let resource = factory.provision(spec).await?;
            info!(
                org = %self.name,
                channel = %resource.channel(),
                durable = resource.durable,
                "streaming resource ready"
            );
            self.resources.push(resource);
        }
        Ok(())
    }

    /// Delete resources not marked durable. Failures are logged and
    /// swallowed: teardown runs during shutdown where nothing can react.
    pub async fn cleanup_resources(&self) {
        for resource in self.resources.iter().filter(|r| !r.durable) {
            match self
                .rest
                .delete_record(resource.kind.sobject_name(), &resource.id)
                .await
            {
                Ok(()) => info!(
                    org = %self.name,
                    channel = %resource.channel(),
                    "removed non-durable streaming resource"
                ),
                Err(e) => warn!(
                    org = %self.name,
                    channel = %resource.channel(),
                    error = %e,
                    "failed to remove non-durable streaming resource"
                ),
            }
        }
    }
}
