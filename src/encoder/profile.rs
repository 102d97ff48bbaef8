// src/encoder/profile.rs
//! Quality-tier encoding profiles and encoder command assembly
//!
//! The tier table is fixed: callers pick `low | medium | high | 4k` and get
//! a resolution/bitrate/frame-rate triple. The default command line targets
//! ffmpeg reading raw chunks on stdin; operators can swap in another encoder
//! via `encoder.arg_template` in the configuration.

use crate::session::types::{RecordingOptions, VideoQuality};
use crate::utils::config::EncoderConfig;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Encoding parameters for one quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub fps: u32,
}

static PROFILES: Lazy<HashMap<VideoQuality, EncoderProfile>> = Lazy::new(|| {
    HashMap::from([
        (
            VideoQuality::Low,
            EncoderProfile {
                width: 854,
                height: 480,
                video_bitrate_kbps: 800,
                fps: 24,
            },
        ),
        (
            VideoQuality::Medium,
            EncoderProfile {
                width: 1280,
                height: 720,
                video_bitrate_kbps: 2500,
                fps: 30,
            },
        ),
        (
            VideoQuality::High,
            EncoderProfile {
                width: 1920,
                height: 1080,
                video_bitrate_kbps: 5000,
                fps: 30,
            },
        ),
        (
            VideoQuality::Uhd4k,
            EncoderProfile {
                width: 3840,
                height: 2160,
                video_bitrate_kbps: 16000,
                fps: 30,
            },
        ),
    ])
});

impl EncoderProfile {
    /// Profile for a quality tier
    pub fn for_quality(quality: VideoQuality) -> EncoderProfile {
        PROFILES[&quality]
    }
}

/// Build the encoder command line for a session.
///
/// Returns `(program, args)`. With no `arg_template` configured this is the
/// built-in ffmpeg profile; otherwise the template is used with placeholder
/// substitution.
pub fn build_command(
    config: &EncoderConfig,
    options: &RecordingOptions,
    output: &Path,
) -> (String, Vec<String>) {
    let profile = EncoderProfile::for_quality(options.video_quality);
    let output_str = output.display().to_string();

    if let Some(template) = &config.arg_template {
        let args = template
            .iter()
            .map(|arg| {
                arg.replace("{output}", &output_str)
                    .replace("{width}", &profile.width.to_string())
                    .replace("{height}", &profile.height.to_string())
                    .replace("{bitrate_kbps}", &profile.video_bitrate_kbps.to_string())
                    .replace("{fps}", &profile.fps.to_string())
            })
            .collect();
        return (config.program.clone(), args);
    }

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-y".into(),
        "-i".into(),
        "pipe:0".into(),
    ];

    if options.audio_only {
        args.extend([
            "-vn".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "96k".into(),
        ]);
    } else {
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-vf".into(),
            format!("scale={}:{}", profile.width, profile.height),
            "-b:v".into(),
            format!("{}k", profile.video_bitrate_kbps),
            "-r".into(),
            profile.fps.to_string(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-movflags".into(),
            "+faststart".into(),
        ]);
    }

    args.push(output_str);
    (config.program.clone(), args)
}
