// CONFIG - Decoder and scale filter configuration
//
// Plain serde structs with defaults. Environment toggles are read once when a
// decoder session opens, never per frame.

use serde::{Deserialize, Serialize};

use crate::codecs::CodecId;
use crate::error::{Result, RkError};
use crate::format::{by_pixel, PixelFormat};
use crate::mpp::Timeout;
use crate::scale_eval::parse_video_size;

pub const ENV_LOG_FPS: &str = "RKMPP_LOG_FPS";
pub const ENV_SYNC: &str = "RKMPP_SYNC";

// ============================================================================
// Decoder
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub codec: CodecId,
    /// Coded size hint. MJPEG cannot open without it.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Stream-level configuration (SPS/PPS, VOL, ...) fed before the first packet
    pub extra_data: Option<Vec<u8>>,
    /// Fetch timeout when no input is pending
    pub output_timeout: Timeout,
    /// Fetch timeout used while the input queue is full
    pub backpressure_timeout_ms: u32,
    /// MJPEG waits this long when asked to block
    pub mjpeg_timeout_ms: u32,
    /// Submit/fetch rounds per receive_frame before giving up with Again
    pub max_attempts: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: CodecId::H264,
            width: None,
            height: None,
            extra_data: None,
            output_timeout: Timeout::NonBlock,
            backpressure_timeout_ms: 5,
            mjpeg_timeout_ms: 200,
            max_attempts: 64,
        }
    }
}

impl DecoderConfig {
    pub fn new(codec: CodecId) -> Self {
        Self { codec, ..Self::default() }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_extra_data(mut self, data: Vec<u8>) -> Self {
        self.extra_data = Some(data);
        self
    }

    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "codec": self.codec.decoder_name(),
            "width": self.width,
            "height": self.height,
            "extra_data_len": self.extra_data.as_ref().map(|d| d.len()).unwrap_or(0),
            "backpressure_timeout_ms": self.backpressure_timeout_ms,
            "mjpeg_timeout_ms": self.mjpeg_timeout_ms,
            "max_attempts": self.max_attempts,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticToggles {
    /// Log frame rate every 120 frames
    pub log_fps: bool,
    /// Block for the decoded frame right after each packet
    pub sync: bool,
}

impl DiagnosticToggles {
    pub fn from_env() -> Self {
        Self::from_values(std::env::var(ENV_LOG_FPS).ok().as_deref(), std::env::var_os(ENV_SYNC).is_some())
    }

    fn from_values(log_fps: Option<&str>, sync_present: bool) -> Self {
        let log_fps = log_fps
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);
        Self { log_fps, sync: sync_present }
    }
}

// ============================================================================
// Scale filter
// ============================================================================

/// What to do when the requested box does not match the input aspect ratio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatioPolicy {
    Disable,
    /// Shrink one side so the result fits inside the box
    #[default]
    Decrease,
    /// Grow one side so the result covers the box
    Increase,
}

impl AspectRatioPolicy {
    pub fn from_index(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Disable),
            1 => Some(Self::Decrease),
            2 => Some(Self::Increase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub w: Option<String>,
    pub h: Option<String>,
    /// Explicit size string ("1280x720", "hd720")
    pub s: Option<String>,
    pub force_original_aspect_ratio: AspectRatioPolicy,
    pub force_divisible_by: u32,
    pub down_scale_only: bool,
    pub format: Option<String>,
    pub hdr2sdr: bool,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            w: None,
            h: None,
            s: None,
            force_original_aspect_ratio: AspectRatioPolicy::Decrease,
            force_divisible_by: 1,
            down_scale_only: true,
            format: None,
            hdr2sdr: false,
        }
    }
}

/// ScaleConfig after defaults and cross-field rules are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScale {
    pub w_expr: String,
    pub h_expr: String,
    pub policy: AspectRatioPolicy,
    pub divisible_by: u32,
    pub down_scale_only: bool,
    pub format: PixelFormat,
    pub hdr2sdr: bool,
}

impl ScaleConfig {
    pub fn with_size(w: &str, h: &str) -> Self {
        Self { w: Some(w.to_string()), h: Some(h.to_string()), ..Self::default() }
    }

    pub fn resolve(&self) -> Result<ResolvedScale> {
        if self.s.is_some() && (self.w.is_some() || self.h.is_some()) {
            return Err(RkError::Config("size and width/height expressions are mutually exclusive".into()));
        }
        if !(1..=256).contains(&self.force_divisible_by) {
            return Err(RkError::Config(format!(
                "force_divisible_by {} outside 1..=256",
                self.force_divisible_by
            )));
        }

        // A lone width is taken as a size string
        let size = match (&self.s, &self.w, &self.h) {
            (Some(s), _, _) => Some(s.as_str()),
            (None, Some(w), None) => Some(w.as_str()),
            _ => None,
        };

        let (w_expr, h_expr) = match size {
            Some(size) => {
                let (w, h) = parse_video_size(size)?;
                (w.to_string(), h.to_string())
            }
            None => (
                self.w.clone().unwrap_or_else(|| "iw".to_string()),
                self.h.clone().unwrap_or_else(|| "ih".to_string()),
            ),
        };

        Ok(ResolvedScale {
            w_expr,
            h_expr,
            policy: self.force_original_aspect_ratio,
            divisible_by: self.force_divisible_by,
            down_scale_only: self.down_scale_only,
            format: self.output_format(),
            hdr2sdr: self.hdr2sdr,
        })
    }

    fn output_format(&self) -> PixelFormat {
        let Some(name) = self.format.as_deref() else {
            return PixelFormat::Nv12;
        };
        match PixelFormat::from_name(name) {
            Some(pf) if !pf.is_hardware() && by_pixel(pf).is_some() => pf,
            _ => {
                tracing::warn!("Output format '{}' not supported by RGA, using nv12", name);
                PixelFormat::Nv12
            }
        }
    }

    pub fn info(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_defaults() {
        let cfg = DecoderConfig::default();
        assert_eq!(cfg.backpressure_timeout_ms, 5);
        assert_eq!(cfg.mjpeg_timeout_ms, 200);
        assert!(cfg.max_attempts > 0);
        let cfg = DecoderConfig::new(CodecId::Mjpeg).with_size(640, 480);
        assert_eq!(cfg.info()["codec"], "mjpeg_rkmpp");
    }

    #[test]
    fn test_toggle_parsing() {
        assert_eq!(DiagnosticToggles::from_values(None, false), DiagnosticToggles::default());
        assert!(DiagnosticToggles::from_values(Some("1"), false).log_fps);
        assert!(!DiagnosticToggles::from_values(Some("0"), false).log_fps);
        assert!(!DiagnosticToggles::from_values(Some("yes"), false).log_fps);
        assert!(DiagnosticToggles::from_values(None, true).sync);
    }

    #[test]
    fn test_resolve_defaults() {
        let r = ScaleConfig::default().resolve().unwrap();
        assert_eq!(r.w_expr, "iw");
        assert_eq!(r.h_expr, "ih");
        assert_eq!(r.format, PixelFormat::Nv12);
        assert_eq!(r.policy, AspectRatioPolicy::Decrease);
        assert!(r.down_scale_only);
    }

    #[test]
    fn test_resolve_size_rules() {
        let cfg = ScaleConfig { s: Some("hd720".into()), ..ScaleConfig::default() };
        let r = cfg.resolve().unwrap();
        assert_eq!((r.w_expr.as_str(), r.h_expr.as_str()), ("1280", "720"));

        let cfg = ScaleConfig { w: Some("640x360".into()), ..ScaleConfig::default() };
        let r = cfg.resolve().unwrap();
        assert_eq!((r.w_expr.as_str(), r.h_expr.as_str()), ("640", "360"));

        let cfg = ScaleConfig { s: Some("hd720".into()), h: Some("100".into()), ..ScaleConfig::default() };
        assert!(cfg.resolve().is_err());

        let cfg = ScaleConfig { force_divisible_by: 0, ..ScaleConfig::default() };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn test_output_format_fallback() {
        let cfg = ScaleConfig { format: Some("rgba".into()), ..ScaleConfig::default() };
        assert_eq!(cfg.resolve().unwrap().format, PixelFormat::Rgba);
        let cfg = ScaleConfig { format: Some("drm_prime".into()), ..ScaleConfig::default() };
        assert_eq!(cfg.resolve().unwrap().format, PixelFormat::Nv12);
        let cfg = ScaleConfig { format: Some("p010".into()), ..ScaleConfig::default() };
        assert_eq!(cfg.resolve().unwrap().format, PixelFormat::Nv12);
    }

    #[test]
    fn test_scale_config_serde() {
        let cfg: ScaleConfig =
            serde_json::from_str(r#"{"w":"iw/2","h":"-2","force_original_aspect_ratio":"disable"}"#).unwrap();
        assert_eq!(cfg.force_original_aspect_ratio, AspectRatioPolicy::Disable);
        assert_eq!(cfg.force_divisible_by, 1);
        assert_eq!(cfg.info()["w"], "iw/2");
    }
}
