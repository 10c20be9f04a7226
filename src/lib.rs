//! Bounded GPU texture cache and render orchestration for a single-photo
//! viewing surface, plus a wgpu/winit backend and a timer-driven slideshow.
pub mod camera;
pub mod canvas;
pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod library;
pub mod photo_layer;
pub mod source;
pub mod texture_cache;
pub mod viewer;
pub mod tasks {
    pub mod layer;
    pub mod slideshow;
}

pub use camera::{CameraMetrics, Rect, Size};
pub use canvas::{Canvas, CanvasElement};
pub use error::{Error, TextureError};
pub use events::{LayerNotification, LoadingState, TextureFetched, TextureSize};
pub use photo_layer::{ChannelObserver, LayerEvent, LayerObserver, LayerProps, PhotoLayer, RenderMode};
pub use source::{DecodedImage, FileSource, ImageKey, ImageSource, MemorySource};
pub use texture_cache::{CacheOptions, EntryState, InterestSet, Texture, TextureCache, TextureUploader};
