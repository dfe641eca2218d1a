pub mod broker;
pub mod sink;

pub use broker::{AmqpBroker, BrokerPublisher, BrokerSpec, ExchangeSpec, ExchangeType};
pub use sink::{AmqpMessageSink, MessageSink, MultiMessageSink};
#[cfg(any(test, feature = "testing"))]
pub use broker::MockBrokerPublisher;
#[cfg(any(test, feature = "testing"))]
pub use sink::MockMessageSink;
