//! Error types for the DMX engine

use thiserror::Error;

/// Result type alias using [`DmxError`]
pub type Result<T> = std::result::Result<T, DmxError>;

/// Errors produced by node, universe, and channel operations.
///
/// Construction and registration errors propagate to the caller before any
/// state is mutated (spec §7). Transient errors in the refresh task are
/// caught, logged, and retried with backoff instead of surfacing here.
#[derive(Debug, Error)]
pub enum DmxError {
    /// Universe id is outside the range the destination protocol allows.
    #[error("universe address {0} is out of range for this protocol")]
    InvalidUniverseAddress(u16),

    /// A universe with this id is already registered on the node.
    #[error("universe {0} already exists on this node")]
    DuplicateUniverse(u16),

    /// No universe with this id is registered on the node.
    #[error("universe {0} not found")]
    UniverseNotFound(u16),

    /// A channel with this name is already registered in the universe.
    #[error("channel \"{0}\" already exists in the universe")]
    ChannelExists(String),

    /// No channel with this name is registered in the universe.
    #[error("channel \"{0}\" not found in the universe")]
    ChannelNotFound(String),

    /// The channel's start/stop falls outside the legal DMX range `1..=512`.
    #[error("channel start {start} width {width} x {byte_size} bytes falls outside 1..=512")]
    ChannelOutOfUniverse {
        start: u16,
        width: usize,
        byte_size: u8,
    },

    /// The channel's width is zero or its byte size is not one of 1/2/3/4.
    #[error("channel width/byte size invalid: width={width}, byte_size={byte_size}")]
    ChannelWidthInvalid { width: usize, byte_size: u8 },

    /// The channel's byte range overlaps an existing channel in the universe.
    #[error("new channel overlaps existing channel \"{0}\"")]
    OverlappingChannel(String),

    /// A value supplied to the channel falls outside `[0, value_max]`.
    #[error("channel value {value} out of bounds: 0 <= value <= {value_max}")]
    ChannelValueOutOfBounds { value: f64, value_max: u32 },

    /// The number of values supplied does not match the channel's width.
    #[error("expected {expected} values for channel width, got {got}")]
    ValueCountDoesNotMatchChannelWidth { expected: usize, got: usize },

    /// An sACN CID was supplied that is not exactly 16 bytes.
    #[error("sACN CID must be exactly 16 bytes, got {0}")]
    InvalidCid(usize),

    /// Socket construction, bind, or send failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for background-task internals that need to flatten
    /// heterogeneous causes before logging; never returned from a public
    /// constructor or registration call.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
