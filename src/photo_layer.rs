//! Render orchestration between the texture cache and a canvas.
//!
//! `PhotoLayer` owns one canvas and one texture cache. Every props change
//! re-declares cache interest, binds whatever texture is resident for the
//! current photo, pushes transforms, and decides whether the canvas is shown,
//! hidden, or hidden after a short delay so that quick navigation does not
//! flicker.
mod hide_timer;

use std::time::Duration;

use serde::Deserialize;
use tokio::select;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use hide_timer::HideTimer;

use crate::camera::{CameraMetrics, Size};
use crate::canvas::{Canvas, CanvasElement};
use crate::events::{LayerNotification, LoadingState, TextureFetched, TextureSize};
use crate::source::ImageKey;
use crate::texture_cache::{InterestSet, TextureCache, TextureUploader};

pub const DEFAULT_HIDE_DELAY: Duration = Duration::from_millis(100);

/// How the crop rectangle of the camera metrics is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// The crop is applied as a clip rectangle.
    #[default]
    View,
    /// Crop editing: the whole image is drawn.
    Crop,
}

/// Inputs of the layer, supplied by the host as a whole on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerProps {
    pub image_path: Option<ImageKey>,
    pub image_path_prev: Option<ImageKey>,
    pub image_path_next: Option<ImageKey>,
    pub camera_metrics: Option<CameraMetrics>,
    pub body_size: Size,
    pub mode: RenderMode,
}

impl LayerProps {
    fn interest(&self) -> InterestSet {
        InterestSet::around(
            self.image_path_prev.as_ref(),
            self.image_path.as_ref(),
            self.image_path_next.as_ref(),
        )
    }
}

/// Receives layer state changes.
pub trait LayerObserver {
    fn loading_state_changed(&mut self, state: &LoadingState);

    /// A texture for the current photo was bound.
    fn texture_changed(&mut self, size: TextureSize);
}

impl LayerObserver for () {
    fn loading_state_changed(&mut self, _state: &LoadingState) {}

    fn texture_changed(&mut self, _size: TextureSize) {}
}

/// Forwards observer calls as [`LayerNotification`]s.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<LayerNotification>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<LayerNotification>) -> Self {
        Self { tx }
    }
}

impl LayerObserver for ChannelObserver {
    fn loading_state_changed(&mut self, state: &LoadingState) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(LayerNotification::LoadingState(state.clone()));
    }

    fn texture_changed(&mut self, size: TextureSize) {
        let _ = self.tx.send(LayerNotification::Texture(size));
    }
}

/// Something the layer has to react to, see [`PhotoLayer::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerEvent {
    Fetched(TextureFetched),
    HideDue,
}

pub struct PhotoLayer<C, U, O>
where
    C: Canvas<Handle = U::Handle>,
    U: TextureUploader,
    O: LayerObserver,
{
    canvas: C,
    cache: TextureCache<U>,
    observer: O,
    hide_timer: HideTimer,
    props: LayerProps,
    /// Props as of the last update; `None` before the first one.
    applied: Option<LayerProps>,
    /// Key of the texture bound to the canvas.
    bound: Option<ImageKey>,
    last_texture: Option<(ImageKey, TextureSize)>,
    loading_state: LoadingState,
}

impl<C, U, O> PhotoLayer<C, U, O>
where
    C: Canvas<Handle = U::Handle>,
    U: TextureUploader,
    O: LayerObserver,
{
    pub fn new(canvas: C, cache: TextureCache<U>, observer: O, hide_delay: Duration) -> Self {
        Self {
            canvas,
            cache,
            observer,
            hide_timer: HideTimer::new(hide_delay),
            props: LayerProps::default(),
            applied: None,
            bound: None,
            last_texture: None,
            loading_state: LoadingState::Loading,
        }
    }

    pub fn props(&self) -> &LayerProps {
        &self.props
    }

    pub fn loading_state(&self) -> &LoadingState {
        &self.loading_state
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }

    pub fn cache(&self) -> &TextureCache<U> {
        &self.cache
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Deadline of the pending deferred hide.
    pub fn hide_deadline(&self) -> Option<Instant> {
        self.hide_timer.deadline()
    }

    /// Replaces the props and updates.
    pub fn set_props(&mut self, props: LayerProps) {
        self.props = props;
        self.update_at(Instant::now());
    }

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    fn update_at(&mut self, now: Instant) {
        let props = self.props.clone();
        let applied = self.applied.replace(props.clone());
        let last = applied.as_ref();
        let current = props.image_path.as_ref();

        let mut changed = last.is_none_or(|l| l.image_path != props.image_path);

        // Rebinding first releases the pin on the previous photo before the
        // new interest is declared, so it can be evicted to make room.
        let resolved = current.filter(|key| self.cache.texture(key).is_some()).cloned();
        if resolved != self.bound {
            self.bind(resolved);
            changed = true;
        }

        self.cache.set_images_to_fetch(&props.interest());

        if let Some(err) = current.and_then(|key| self.cache.texture_error(key)) {
            let err = err.clone();
            warn!(path = ?current.map(ImageKey::as_str), error = %err, "cannot show photo");
            self.hide_timer.cancel();
            self.canvas.element_mut().hide();
            self.set_loading_state(LoadingState::Failed(err));
            // Only the photo was taken in; size, mode and metrics never
            // reached the canvas and must count as changed next time.
            self.applied = applied.map(|last| LayerProps {
                image_path: props.image_path.clone(),
                ..last
            });
            return;
        }

        if last.is_none_or(|l| l.body_size != props.body_size) {
            self.canvas.element_mut().set_display_size(props.body_size);
        }

        let metrics_changed = last.is_none_or(|l| l.camera_metrics != props.camera_metrics);
        if metrics_changed || last.is_none_or(|l| l.mode != props.mode) {
            let clip = match (&props.camera_metrics, props.mode) {
                (Some(metrics), RenderMode::View) => metrics.crop,
                _ => None,
            };
            self.canvas.set_clip_rect(clip);
            changed = true;
        }

        if metrics_changed {
            if let Some(metrics) = &props.camera_metrics {
                self.canvas.set_size(metrics.canvas_size);
                self.canvas.set_projection_matrix(metrics.projection);
                self.canvas.set_camera_matrix(metrics.camera);
            }
        }

        if !changed {
            return;
        }
        if self.canvas.is_valid() && props.camera_metrics.is_some() {
            self.hide_timer.cancel();
            self.canvas.update();
            self.canvas.element_mut().show();
            self.set_loading_state(LoadingState::Done);
        } else if self.hide_timer.arm(now) {
            debug!(delay = ?self.hide_timer.delay(), "canvas not renderable; deferring hide");
        }
    }

    fn bind(&mut self, key: Option<ImageKey>) {
        let texture = key.as_ref().and_then(|key| self.cache.texture(key));
        self.canvas.set_base_texture(texture, true);
        let size = texture.map(|t| t.size());
        self.cache.set_active(key.clone());
        if let (Some(key), Some(size)) = (&key, size) {
            debug!(path = %key, width = size.width, height = size.height, "bound texture");
            self.notify_texture(key, size);
        }
        self.bound = key;
    }

    fn notify_texture(&mut self, key: &ImageKey, size: TextureSize) {
        if self
            .last_texture
            .as_ref()
            .is_some_and(|(k, s)| k == key && *s == size)
        {
            return;
        }
        self.last_texture = Some((key.clone(), size));
        self.observer.texture_changed(size);
    }

    fn set_loading_state(&mut self, state: LoadingState) {
        if self.loading_state == state {
            return;
        }
        info!(state = %state, "loading state");
        self.loading_state = state;
        self.observer.loading_state_changed(&self.loading_state);
    }

    /// Applies a cache completion. Only completions for the current photo
    /// trigger an update; neighbours just sit in the cache.
    pub fn handle_fetched(&mut self, fetched: TextureFetched) {
        if self.props.image_path.as_ref() != Some(&fetched.key) {
            debug!(path = %fetched.key, "prefetched");
            return;
        }
        if let Some(size) = fetched.size {
            self.notify_texture(&fetched.key, size);
        }
        self.update();
    }

    /// Hides the canvas if the deferred hide is due at `now`.
    pub fn on_hide_deadline(&mut self, now: Instant) {
        if self.hide_timer.fire_if_due(now) {
            self.canvas.element_mut().hide();
            self.set_loading_state(LoadingState::Loading);
        }
    }

    /// Clears a recorded failure of the current photo and fetches it again.
    pub fn retry(&mut self) {
        let Some(key) = self.props.image_path.clone() else {
            return;
        };
        if self.cache.texture_error(&key).is_none() {
            return;
        }
        info!(path = %key, "retrying");
        self.cache.invalidate(&key);
        self.set_loading_state(LoadingState::Loading);
        self.update();
    }

    /// Waits for a fetch completion or the deferred hide. Cancel safe.
    pub async fn next_event(&mut self) -> LayerEvent {
        let cache = &mut self.cache;
        let timer = &self.hide_timer;
        select! {
            fetched = cache.next_fetched() => LayerEvent::Fetched(fetched),
            _ = timer.expired() => LayerEvent::HideDue,
        }
    }

    pub fn handle_event(&mut self, event: LayerEvent) {
        match event {
            LayerEvent::Fetched(fetched) => self.handle_fetched(fetched),
            LayerEvent::HideDue => self.on_hide_deadline(Instant::now()),
        }
    }

    /// Applies queued completions and a due hide without waiting, for hosts
    /// driving the layer from their own loop. Returns the next hide deadline.
    pub fn pump(&mut self, now: Instant) -> Option<Instant> {
        while let Some(fetched) = self.cache.try_next_fetched() {
            self.handle_fetched(fetched);
        }
        self.on_hide_deadline(now);
        self.hide_timer.deadline()
    }
}

impl<C, U, O> Drop for PhotoLayer<C, U, O>
where
    C: Canvas<Handle = U::Handle>,
    U: TextureUploader,
    O: LayerObserver,
{
    fn drop(&mut self) {
        self.hide_timer.cancel();
        self.canvas.set_base_texture(None, true);
        self.cache.set_active(None);
        self.canvas.element_mut().detach();
    }
}
