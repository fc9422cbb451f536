//! # rkmpp
//!
//! Command line companion for rkmpp-core.
//!
//! ## Usage
//! ```bash
//! rkmpp formats              # pixel format registry as JSON
//! rkmpp codecs               # decoder registration table
//! rkmpp probe                # look for librockchip_mpp and librga
//! rkmpp selftest [codec] [WxH]
//!
//! # With debug logging
//! RUST_LOG=rkmpp=debug rkmpp selftest hevc 1280x720
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use rkmpp_core::mpp::virtual_device::{VirtualMpp, VirtualMppConfig};
use rkmpp_core::mpp::{MppBackend, MPP_BUFFER_FLAGS_DMA32, MPP_BUFFER_TYPE_DRM};
use rkmpp_core::rga::virtual_device::VirtualRga;
use rkmpp_core::scale::{LinkInfo, ScaleSession};
use rkmpp_core::{codecs, format, mpp, rga};
use rkmpp_core::{CodecId, DecodeStatus, DecoderConfig, DecoderSession, Packet, ScaleConfig};
use serde_json::json;
use tracing::{info, warn};

const SELFTEST_PACKETS: usize = 8;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("rkmpp=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");

    let output = match command {
        "formats" => format::table_info(),
        "codecs" => codecs::table_info(),
        "probe" => probe(),
        "selftest" => {
            let codec = match args.get(1) {
                Some(name) => CodecId::from_name(name).with_context(|| format!("unknown codec '{}'", name))?,
                None => CodecId::H264,
            };
            let size = args.get(2).map(String::as_str).unwrap_or("1280x720");
            selftest(codec, size)?
        }
        "version" | "--version" => json!({ "version": rkmpp_core::VERSION }),
        "help" | "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        other => {
            print_usage();
            bail!("unknown command '{}'", other);
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_usage() {
    eprintln!("rkmpp {}", rkmpp_core::VERSION);
    eprintln!("usage: rkmpp <formats|codecs|probe|selftest [codec] [WxH]|version>");
}

fn probe() -> serde_json::Value {
    let mpp_ok = mpp::ffi::is_available();
    let rga_ok = rga::ffi::is_available();
    if !mpp_ok {
        warn!("librockchip_mpp not found, hardware decode unavailable");
    }
    if !rga_ok {
        warn!("librga not found, hardware scaling unavailable");
    }

    let decoders: Vec<String> = match mpp::ffi::FfiMpp::load() {
        Ok(backend) => codecs::CODEC_TABLE
            .iter()
            .filter(|e| backend.check_support(mpp::CtxType::Dec, e.coding))
            .map(|e| e.id.decoder_name())
            .collect(),
        Err(_) => Vec::new(),
    };

    json!({
        "mpp": mpp_ok,
        "rga": rga_ok,
        "decoders": decoders,
    })
}

/// Decode synthetic packets on the virtual MPP device and scale every frame
/// to half size with the virtual RGA engine.
fn selftest(codec: CodecId, size: &str) -> Result<serde_json::Value> {
    let (width, height) = rkmpp_core::scale_eval::parse_video_size(size)?;
    let backend = VirtualMpp::new(VirtualMppConfig { width, height, ..VirtualMppConfig::default() });
    let stats = backend.stats();

    let config = DecoderConfig::new(codec).with_size(width, height);
    let mut decoder = DecoderSession::open(&backend, config).context("opening decoder")?;

    let group = backend.buffer_group(MPP_BUFFER_TYPE_DRM | MPP_BUFFER_FLAGS_DMA32)?;
    let rga = Arc::new(VirtualRga::new());
    let mut scale = ScaleSession::new(rga.clone(), group, &ScaleConfig::with_size("iw/2", "ih/2"))?;

    let mut source: VecDeque<Packet> = (0..SELFTEST_PACKETS)
        .map(|i| Packet::new(Bytes::from(format!("selftest-{}", i)), Some(i as i64 * 40)))
        .collect();

    let mut negotiated = false;
    let mut scaled = Vec::new();
    let mut idle = 0;
    loop {
        match decoder.receive_frame(&mut source)? {
            DecodeStatus::Frame(frame) => {
                idle = 0;
                if !negotiated {
                    scale.configure_input(LinkInfo::from_frame(&frame))?;
                    scale.configure_output()?;
                    negotiated = true;
                }
                let out = scale.filter_frame(frame)?;
                scaled.push((out.pts, out.width, out.height));
            }
            DecodeStatus::Again => {
                idle += 1;
                if idle > 16 {
                    bail!("decoder stalled without producing frames");
                }
            }
            DecodeStatus::Eof => break,
        }
    }
    info!("Self-test decoded and scaled {} frames", scaled.len());

    let decoder_info = decoder.info();
    let scale_info = scale.info();
    decoder.close();

    Ok(json!({
        "decoder": decoder_info,
        "scale": scale_info,
        "blits": rga.blit_count(),
        "frames": scaled.iter().map(|(pts, w, h)| json!({ "pts": pts, "width": w, "height": h })).collect::<Vec<_>>(),
        "device": stats.snapshot(),
    }))
}
