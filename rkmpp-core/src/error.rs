// ERROR - Shared error type for the decoder, mapper and RGA filter
//
// Retry (EAGAIN) and end-of-stream are not errors here. They travel as
// DecodeStatus / SourceStatus values so callers can loop on them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RkError>;

#[derive(Debug, Error)]
pub enum RkError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Invalid buffer geometry: {0}")]
    BufferGeometry(String),

    #[error("{call} failed with code {code}")]
    Device { call: &'static str, code: i32 },

    #[error("Decoder flagged frame as corrupt")]
    CorruptFrame,

    #[error("RGA blit failed with code {0}")]
    Blit(i32),

    #[error("Failed to load {name}: {reason}")]
    Library { name: &'static str, reason: String },

    #[error("Packet source error: {0}")]
    Source(String),

    #[error("Initialization failed at {stage}: {source}")]
    Init {
        stage: &'static str,
        #[source]
        source: Box<RkError>,
    },
}

/// Coarse classification used by callers deciding whether to restart a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported format or codec. Never retried.
    Configuration,
    /// Pool or memory exhaustion. The whole operation may be retried later.
    Allocation,
    /// Genuine decode/blit failure reported by hardware.
    Device,
}

impl RkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_)
            | Self::UnsupportedCodec(_)
            | Self::Config(_)
            | Self::BufferGeometry(_)
            | Self::Library { .. } => ErrorKind::Configuration,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Device { .. } | Self::CorruptFrame | Self::Blit(_) | Self::Source(_) => {
                ErrorKind::Device
            }
            Self::Init { source, .. } => source.kind(),
        }
    }

    /// Wrap a setup failure with the name of the stage that produced it.
    pub fn at_stage(self, stage: &'static str) -> Self {
        match self {
            already @ Self::Init { .. } => already,
            other => Self::Init { stage, source: Box::new(other) },
        }
    }

    pub(crate) fn device(call: &'static str, code: i32) -> Self {
        Self::Device { call, code }
    }
}
