//! TOML configuration for the session host
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:3000"
//! initial_bitrate_kbps = 2000
//!
//! [stream]
//! width = 1920
//! height = 1080
//! depth = 24
//! anti_aliasing = 4
//! cameras_per_eye = 1
//! audio_tracks = 1
//! object_level_streaming = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::view::StreamingSize;
use crate::multiview::RenderConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub server: ServerConfig,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: String,
    /// Starting point for the bandwidth estimator of each peer.
    pub initial_bitrate_kbps: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:3000".to_string(),
            initial_bitrate_kbps: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub anti_aliasing: u32,
    pub cameras_per_eye: usize,
    pub audio_tracks: usize,
    pub object_level_streaming: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let render = RenderConfig::default();
        Self {
            width: 1920,
            height: 1080,
            depth: render.depth,
            anti_aliasing: render.anti_aliasing,
            cameras_per_eye: 1,
            audio_tracks: 1,
            object_level_streaming: false,
        }
    }
}

impl StreamSettings {
    pub fn streaming_size(&self) -> StreamingSize {
        StreamingSize::new(self.width, self.height)
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            depth: self.depth,
            anti_aliasing: self.anti_aliasing,
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<StreamConfig, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        StreamConfig::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<StreamConfig, ConfigError> {
        let config: StreamConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.streaming_size().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "stream size {} has a zero dimension",
                self.stream.streaming_size()
            )));
        }
        if self.stream.cameras_per_eye == 0 {
            return Err(ConfigError::Invalid(
                "cameras_per_eye must be at least 1".to_string(),
            ));
        }
        self.stream
            .render_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
