pub mod auth;
pub mod cometd;
pub mod org;
pub mod resources;
pub mod rest;
pub mod source;

pub use auth::{AuthSnapshot, Authenticator, PasswordAuthenticator};
pub use cometd::{
    BackoffSchedule, BayeuxTransport, ClientState, CometdClient, HttpBayeuxTransport,
    ReplayFallback,
};
#[cfg(any(test, feature = "testing"))]
pub use cometd::MockBayeuxTransport;
pub use org::SalesforceOrg;
pub use resources::{ResourceSpec, StreamingResource, StreamingResourceKind};
pub use rest::{HttpRestClient, RestApi, SobjectRecord, DEFAULT_API_VERSION};
pub use source::{SourceManager, DEFAULT_QUEUE_CAPACITY};
