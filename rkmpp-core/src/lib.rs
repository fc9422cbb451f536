//! # rkmpp core
//!
//! Rockchip MPP hardware video decoding and RGA scaling with zero-copy
//! DRM-PRIME frames.
//!
//! Both hardware libraries are loaded at runtime (`mpp::ffi`, `rga::ffi`).
//! In-process virtual devices stand in for them on hosts without the
//! hardware, and in tests.

// ============================================================================
// Core types
// ============================================================================
pub mod error;
pub mod format;
pub mod drm;
pub mod frame;
pub mod frame_map;

// ============================================================================
// Hardware boundaries
// ============================================================================
pub mod mpp;
pub mod rga;

// ============================================================================
// Decoder
// ============================================================================
pub mod codecs;
pub mod config;
pub mod decoder;

// ============================================================================
// Scale filter
// ============================================================================
pub mod scale_eval;
pub mod scale;

pub use codecs::{CodecId, CODEC_TABLE};
pub use config::{DecoderConfig, DiagnosticToggles, ScaleConfig};
pub use decoder::{DecodeStatus, DecoderSession, Packet, PacketSource, SourceStatus};
pub use error::{ErrorKind, Result, RkError};
pub use format::PixelFormat;
pub use frame::Frame;
pub use scale::{LinkInfo, ScaleSession};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
