use thiserror::Error;

pub type AggResult<T> = Result<T, AggError>;

#[derive(Debug, Error)]
pub enum AggError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("ring `{name}` has bad magic {found:#010x}")]
    RingMagic { name: String, found: u32 },

    #[error("ring `{name}` has unsupported version {found}")]
    RingVersion { name: String, found: i32 },

    #[error("ring `{name}` geometry mismatch: expected {expected_slot_size}x{expected_slot_count}, found {found_slot_size}x{found_slot_count}")]
    RingGeometry {
        name: String,
        expected_slot_size: i32,
        expected_slot_count: i32,
        found_slot_size: i32,
        found_slot_count: i32,
    },

    #[error("frame truncated: need {needed} bytes, have {available}")]
    FrameTruncated { needed: usize, available: usize },

    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    #[error("feed `{feed}` failed: {reason}")]
    Feed { feed: String, reason: String },

    #[error("queue closed")]
    Closed,
}

impl AggError {
    pub fn feed(feed: impl Into<String>, reason: impl Into<String>) -> Self {
        AggError::Feed { feed: feed.into(), reason: reason.into() }
    }
}
