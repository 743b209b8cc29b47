use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Broker Error - {0}")]
    Broker(String),

    #[error("Codec Error - {0}")]
    Codec(String),

    #[error("Offset Error - {0}")]
    Offset(String),

    /// The offset store claims progress past what the broker holds. The two
    /// stores have diverged and guessing a restart position would either
    /// silently skip or silently reprocess data, so startup must abort.
    #[error(
        "stored offset {stored} for {topic}:{partition} is ahead of the broker maximum {max}; \
         offset store and state store have diverged"
    )]
    OffsetDivergence {
        topic: String,
        partition: u32,
        stored: u64,
        max: u64,
    },

    #[error("State Error - {0}")]
    State(String),

    #[error("Publish Error - {0}")]
    Publish(String),

    #[error("Task Error - {0}")]
    Task(String),

    #[error("Container Error - {0}")]
    Container(String),
}
