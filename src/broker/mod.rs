pub mod stream;
pub mod traits;

pub use stream::PeekableStream;
pub use traits::{
    BrokerClient, BrokerClientFactory, BrokerConsumerConfig, MessageStream, PollOutcome,
    RawMessage,
};
