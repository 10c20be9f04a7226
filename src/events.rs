use std::fmt;

use crate::error::TextureError;
use crate::source::ImageKey;

/// Pixel dimensions of a resident texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
}

/// Emitted by the texture cache once per accepted fetch.
///
/// `size` is `None` when the fetch failed; the failure itself is recorded in
/// the cache and available through `TextureCache::texture_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureFetched {
    pub key: ImageKey,
    pub size: Option<TextureSize>,
}

/// What the photo layer currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingState {
    Loading,
    Done,
    Failed(TextureError),
}

impl LoadingState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Done => f.write_str("done"),
            Self::Failed(err) => f.write_str(err.kind()),
        }
    }
}

/// Observer notifications forwarded by `ChannelObserver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerNotification {
    LoadingState(LoadingState),
    Texture(TextureSize),
}

/// Emitted by the slideshow task each time the dwell elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance;
