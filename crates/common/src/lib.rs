pub mod domain;
pub mod jsonpath;
pub mod replay;
pub mod routing;

pub use domain::envelope::{Envelope, ReplayMarker};
pub use domain::result::{BridgeError, BridgeResult};
pub use domain::route::{MessageProperties, Route};
pub use replay::{InMemoryReplayStorage, NullReplayStorage, RedisReplayStorage, ReplayStorage};
#[cfg(any(test, feature = "testing"))]
pub use replay::MockReplayStorage;
pub use routing::{MessageRouter, RoutingCondition, RoutingRule};
