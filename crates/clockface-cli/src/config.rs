use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clockface_client::ClientConfig;
use clockface_core::LoopConfig;
use clockface_hw::CameraConfig;
use serde::Deserialize;

/// Kiosk configuration: an optional TOML file overridden by `CLOCKFACE_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Attendance server root URL.
    pub server_url: String,
    /// Session cookie for the kiosk user, if the routes need one.
    pub session_id: Option<String>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Seconds between capture attempts.
    pub capture_interval_secs: u64,
    /// Per-attempt verification deadline; 0 disables it.
    pub verify_timeout_secs: u64,
    /// Give up after this many unmatched attempts; 0 retries forever.
    pub max_attempts: u32,
    pub jpeg_quality: u8,
    /// Deadline for grabbing and encoding one still.
    pub capture_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8069".to_string(),
            session_id: None,
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            warmup_frames: 4,
            capture_interval_secs: 5,
            verify_timeout_secs: 10,
            max_attempts: 0,
            jpeg_quality: 85,
            capture_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// On-disk form; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    server_url: Option<String>,
    session_id: Option<String>,
    camera_device: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    warmup_frames: Option<usize>,
    capture_interval_secs: Option<u64>,
    verify_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    jpeg_quality: Option<u8>,
    capture_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl Config {
    /// Load from `CLOCKFACE_CONFIG` (if set) and `CLOCKFACE_*` variables.
    pub fn from_env() -> Result<Self> {
        let file = match std::env::var("CLOCKFACE_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Ok(Self::resolve(file.unwrap_or_default(), |key| {
            std::env::var(key).ok()
        }))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        Self {
            server_url: env("CLOCKFACE_SERVER_URL")
                .or(file.server_url)
                .unwrap_or(d.server_url),
            session_id: env("CLOCKFACE_SESSION_ID")
                .or(file.session_id)
                .filter(|s| !s.is_empty()),
            camera_device: env("CLOCKFACE_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or(d.camera_device),
            frame_width: env_parse(&env, "CLOCKFACE_FRAME_WIDTH")
                .or(file.frame_width)
                .unwrap_or(d.frame_width),
            frame_height: env_parse(&env, "CLOCKFACE_FRAME_HEIGHT")
                .or(file.frame_height)
                .unwrap_or(d.frame_height),
            warmup_frames: env_parse(&env, "CLOCKFACE_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(d.warmup_frames),
            capture_interval_secs: env_parse(&env, "CLOCKFACE_CAPTURE_INTERVAL_SECS")
                .or(file.capture_interval_secs)
                .filter(|&s| s > 0)
                .unwrap_or(d.capture_interval_secs),
            verify_timeout_secs: env_parse(&env, "CLOCKFACE_VERIFY_TIMEOUT_SECS")
                .or(file.verify_timeout_secs)
                .unwrap_or(d.verify_timeout_secs),
            max_attempts: env_parse(&env, "CLOCKFACE_MAX_ATTEMPTS")
                .or(file.max_attempts)
                .unwrap_or(d.max_attempts),
            jpeg_quality: env_parse(&env, "CLOCKFACE_JPEG_QUALITY")
                .or(file.jpeg_quality)
                .unwrap_or(d.jpeg_quality)
                .clamp(1, 100),
            capture_timeout_secs: env_parse(&env, "CLOCKFACE_CAPTURE_TIMEOUT_SECS")
                .or(file.capture_timeout_secs)
                .filter(|&s| s > 0)
                .unwrap_or(d.capture_timeout_secs),
            request_timeout_secs: env_parse(&env, "CLOCKFACE_REQUEST_TIMEOUT_SECS")
                .or(file.request_timeout_secs)
                .unwrap_or(d.request_timeout_secs),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_secs(self.capture_interval_secs),
            verify_timeout: (self.verify_timeout_secs > 0)
                .then(|| Duration::from_secs(self.verify_timeout_secs)),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            jpeg_quality: self.jpeg_quality,
            capture_timeout: Duration::from_secs(self.capture_timeout_secs),
        }
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device_path: self.camera_device.clone(),
            width: self.frame_width,
            height: self.frame_height,
            warmup_frames: self.warmup_frames,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            session_id: self.session_id.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ClientConfig::new(self.server_url.clone())
        }
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}
