use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::camera::Rect;
use crate::photo_layer::{DEFAULT_HIDE_DELAY, RenderMode};
use crate::texture_cache::CacheOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Root directory to scan recursively for images.
    pub photo_library_path: PathBuf,
    /// Upper bound on textures kept resident (current photo and neighbours).
    pub max_cache_size: NonZeroUsize,
    /// Maximum number of concurrent image decodes.
    pub loader_max_concurrent_decodes: usize,
    /// How long a photo that is not ready yet may leave the previous frame
    /// on screen before the canvas is hidden.
    #[serde(with = "humantime_serde")]
    pub hide_delay: Duration,
    /// Time each photo stays on screen.
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    /// Optional cap on texture sides, applied below the GPU limit.
    pub max_texture_dimension: Option<u32>,
    /// Optional deterministic seed for the initial photo shuffle.
    pub startup_shuffle_seed: Option<u64>,
    pub mode: RenderMode,
    /// Crop applied to every photo in `view` mode, in image pixels.
    pub crop: Option<Rect>,
    pub fullscreen: bool,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&s).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_path.as_os_str().is_empty(),
            "photo-library-path is required"
        );
        ensure!(
            self.loader_max_concurrent_decodes > 0,
            "loader-max-concurrent-decodes must be greater than zero"
        );
        ensure!(!self.dwell.is_zero(), "dwell must be greater than zero");
        if let Some(max) = self.max_texture_dimension {
            ensure!(max > 0, "max-texture-dimension must be greater than zero");
        }
        if let Some(crop) = &self.crop {
            ensure!(
                crop.width > 0.0 && crop.height > 0.0,
                "crop width and height must be positive"
            );
        }
        Ok(self)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            max_cache_size: self.max_cache_size,
            max_concurrent_decodes: self.loader_max_concurrent_decodes,
            max_dimension: self.max_texture_dimension,
            waker: None,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        let cache = CacheOptions::default();
        Self {
            photo_library_path: PathBuf::new(),
            max_cache_size: cache.max_cache_size,
            loader_max_concurrent_decodes: cache.max_concurrent_decodes,
            hide_delay: DEFAULT_HIDE_DELAY,
            dwell: Duration::from_secs(8),
            max_texture_dimension: None,
            startup_shuffle_seed: None,
            mode: RenderMode::View,
            crop: None,
            fullscreen: false,
        }
    }
}
