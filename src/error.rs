use thiserror::Error;

pub type Result<T> = std::result::Result<T, RestMqError>;

#[derive(Error, Debug)]
pub enum RestMqError {
    #[error("Consumer instance not found: {0}")]
    ConsumerNotFound(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Consumer already subscribed to topic: {0}")]
    AlreadySubscribed(String),

    #[error("Consumer instance already exists: {0}")]
    AlreadyExists(String),

    #[error("Broker consumer creation failed: {0}")]
    BrokerInit(String),

    #[error("Broker read error: {0}")]
    BrokerRead(String),

    #[error("Offset commit failed: {0}")]
    CommitFailed(String),

    #[error("Payload decoding error: {0}")]
    PayloadDecoding(String),

    #[error("Consumer instance is shutting down")]
    ShuttingDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
