//! SFU configuration

use classcast_core::config::MediaConfig;
use serde_json::json;

/// SFU configuration, resolved against host capacity at startup.
#[derive(Debug, Clone)]
pub struct SfuConfig {
    /// Number of workers in the pool.
    pub num_workers: usize,
    /// RTC port range handed to each worker.
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// Codec list every room router is created with.
    pub media_codecs: serde_json::Value,
}

impl SfuConfig {
    /// Resolve the pool size against host capacity: at most one worker per
    /// CPU core, capped by `max_workers` when set.
    #[must_use]
    pub fn from_media_config(config: &MediaConfig) -> Self {
        let cores = num_cpus::get().max(1);
        let num_workers = if config.max_workers == 0 {
            cores
        } else {
            config.max_workers.min(cores)
        };

        Self {
            num_workers,
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
            media_codecs: default_media_codecs(),
        }
    }
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self::from_media_config(&MediaConfig::default())
    }
}

/// Codec list for room routers: Opus audio plus VP8 and H264 video.
#[must_use]
pub fn default_media_codecs() -> serde_json::Value {
    json!([
        {
            "kind": "audio",
            "mimeType": "audio/opus",
            "clockRate": 48000,
            "channels": 2,
            "parameters": {},
            "rtcpFeedback": []
        },
        {
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90000,
            "parameters": { "x-google-start-bitrate": 1000 },
            "rtcpFeedback": []
        },
        {
            "kind": "video",
            "mimeType": "video/H264",
            "clockRate": 90000,
            "parameters": {
                "packetization-mode": 1,
                "profile-level-id": "42e01f",
                "level-asymmetry-allowed": 1
            },
            "rtcpFeedback": []
        }
    ])
}
