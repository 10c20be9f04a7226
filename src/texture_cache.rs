//! Bounded, asynchronous cache of GPU textures keyed by image path.
//!
//! The cache is owned by a single thread. Decoding and upload run on the tokio
//! blocking pool; results come back over a channel and are accepted only while
//! the key is still wanted, so a late result for a key that left the interest
//! set never reaches the owner.
mod fetch;
mod interest;

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use interest::InterestSet;

use crate::error::TextureError;
use crate::events::{TextureFetched, TextureSize};
use crate::source::{DecodedImage, ImageKey, ImageSource};
use fetch::{FetchDone, FetchJob};

const DEFAULT_MAX_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(4);

/// Called from a worker thread whenever a fetch result has been queued.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Decoded image resident on the GPU.
pub struct Texture<H> {
    pub width: u32,
    pub height: u32,
    handle: H,
}

impl<H> Texture<H> {
    pub fn new(width: u32, height: u32, handle: H) -> Self {
        Self {
            width,
            height,
            handle,
        }
    }

    pub fn size(&self) -> TextureSize {
        TextureSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H> fmt::Debug for Texture<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Moves decoded pixels onto the GPU.
///
/// Runs on the blocking pool, so implementations may block.
pub trait TextureUploader: Send + Sync + 'static {
    type Handle: Send + 'static;

    fn upload(&self, image: &DecodedImage) -> Result<Self::Handle, TextureError>;

    /// Largest texture side the backend accepts; larger images are downscaled
    /// while decoding.
    fn max_dimension(&self) -> Option<u32> {
        None
    }
}

#[derive(Clone)]
pub struct CacheOptions {
    /// Upper bound on resident entries (pending, ready and failed).
    pub max_cache_size: NonZeroUsize,
    /// Decodes allowed to run at once.
    pub max_concurrent_decodes: usize,
    /// Optional cap applied on top of the uploader's limit.
    pub max_dimension: Option<u32>,
    pub waker: Option<Waker>,
}

impl CacheOptions {
    pub fn new(max_cache_size: NonZeroUsize) -> Self {
        Self {
            max_cache_size,
            ..Self::default()
        }
    }

    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Arc::new(waker));
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_concurrent_decodes: 2,
            max_dimension: None,
            waker: None,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("max_cache_size", &self.max_cache_size)
            .field("max_concurrent_decodes", &self.max_concurrent_decodes)
            .field("max_dimension", &self.max_dimension)
            .field("waker", &self.waker.is_some())
            .finish()
    }
}

/// Coarse state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

enum CacheEntry<H> {
    Pending {
        fetch_id: u64,
        cancel: CancellationToken,
    },
    Ready(Texture<H>),
    Failed(TextureError),
}

impl<H> CacheEntry<H> {
    fn state(&self) -> EntryState {
        match self {
            Self::Pending { .. } => EntryState::Pending,
            Self::Ready(_) => EntryState::Ready,
            Self::Failed(_) => EntryState::Failed,
        }
    }
}

struct Slot<H> {
    entry: CacheEntry<H>,
    /// Declaration round in which the key was last wanted.
    declared_at: u64,
    /// Distance from the primary key in that round.
    distance: usize,
}

pub struct TextureCache<U: TextureUploader> {
    runtime: Handle,
    options: CacheOptions,
    source: Arc<dyn ImageSource>,
    uploader: Arc<U>,
    permits: Arc<Semaphore>,
    root: CancellationToken,
    slots: HashMap<ImageKey, Slot<U::Handle>>,
    interest: InterestSet,
    active: Option<ImageKey>,
    round: u64,
    next_fetch_id: u64,
    done_tx: UnboundedSender<FetchDone<U::Handle>>,
    done_rx: UnboundedReceiver<FetchDone<U::Handle>>,
}

impl<U: TextureUploader> TextureCache<U> {
    /// Fetches are spawned onto `runtime`.
    pub fn new(
        runtime: Handle,
        options: CacheOptions,
        source: Arc<dyn ImageSource>,
        uploader: Arc<U>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(options.max_concurrent_decodes.max(1)));
        Self {
            runtime,
            options,
            source,
            uploader,
            permits,
            root: CancellationToken::new(),
            slots: HashMap::new(),
            interest: InterestSet::default(),
            active: None,
            round: 0,
            next_fetch_id: 0,
            done_tx,
            done_rx,
        }
    }

    /// Declares which keys should be resident.
    ///
    /// Starts fetches for keys without an entry (primary first), cancels
    /// in-flight fetches for keys no longer wanted, and evicts unwanted
    /// entries when the new ones would not fit. Failed keys are not retried.
    pub fn set_images_to_fetch(&mut self, interest: &InterestSet) {
        let pinned_outside = self
            .active
            .as_ref()
            .is_some_and(|key| !interest.contains(key) && self.slots.contains_key(key));
        let capacity = self.options.max_cache_size.get() - usize::from(pinned_outside);
        let interest = if interest.len() > capacity {
            debug!(
                wanted = interest.len(),
                capacity, "interest exceeds cache capacity; dropping farthest keys"
            );
            interest.truncated(capacity)
        } else {
            interest.clone()
        };

        let stale: Vec<ImageKey> = self
            .slots
            .iter()
            .filter(|(key, slot)| {
                matches!(slot.entry, CacheEntry::Pending { .. }) && !interest.contains(key)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(Slot {
                entry: CacheEntry::Pending { fetch_id, cancel },
                ..
            }) = self.slots.remove(&key)
            {
                cancel.cancel();
                debug!(path = %key, fetch_id, "cancelled stale fetch");
            }
        }

        self.round += 1;
        let mut missing = Vec::new();
        for (distance, key) in interest.by_priority() {
            match self.slots.get_mut(key) {
                Some(slot) => {
                    slot.declared_at = self.round;
                    slot.distance = distance;
                }
                None => missing.push((distance, key.clone())),
            }
        }

        self.evict_to_fit(missing.len(), &interest);
        for (distance, key) in missing {
            self.spawn_fetch(key, distance);
        }
        self.interest = interest;
    }

    /// Texture for `key` if it is resident.
    pub fn texture(&self, key: &ImageKey) -> Option<&Texture<U::Handle>> {
        match self.slots.get(key).map(|slot| &slot.entry) {
            Some(CacheEntry::Ready(texture)) => Some(texture),
            _ => None,
        }
    }

    /// Recorded failure for `key`.
    pub fn texture_error(&self, key: &ImageKey) -> Option<&TextureError> {
        match self.slots.get(key).map(|slot| &slot.entry) {
            Some(CacheEntry::Failed(err)) => Some(err),
            _ => None,
        }
    }

    pub fn state(&self, key: &ImageKey) -> Option<EntryState> {
        self.slots.get(key).map(|slot| slot.entry.state())
    }

    /// Marks `key` as the canvas's base texture; it will not be evicted until
    /// another key (or none) is marked.
    pub fn set_active(&mut self, key: Option<ImageKey>) {
        self.active = key;
    }

    pub fn active(&self) -> Option<&ImageKey> {
        self.active.as_ref()
    }

    /// Forgets `key` so the next declaration fetches it again.
    ///
    /// Refused for the active key. Returns whether an entry was dropped.
    pub fn invalidate(&mut self, key: &ImageKey) -> bool {
        if self.active.as_ref() == Some(key) {
            warn!(path = %key, "refusing to invalidate the active texture");
            return false;
        }
        match self.slots.remove(key) {
            Some(slot) => {
                if let CacheEntry::Pending { cancel, .. } = slot.entry {
                    cancel.cancel();
                }
                debug!(path = %key, "invalidated");
                true
            }
            None => false,
        }
    }

    pub fn interest(&self) -> &InterestSet {
        &self.interest
    }

    /// Resident entries, pending ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Next accepted completion, without waiting.
    pub fn try_next_fetched(&mut self) -> Option<TextureFetched> {
        while let Ok(done) = self.done_rx.try_recv() {
            if let Some(fetched) = self.accept(done) {
                return Some(fetched);
            }
        }
        None
    }

    /// Waits for the next accepted completion. Cancel safe.
    pub async fn next_fetched(&mut self) -> TextureFetched {
        loop {
            match self.done_rx.recv().await {
                Some(done) => {
                    if let Some(fetched) = self.accept(done) {
                        return fetched;
                    }
                }
                // the cache holds a sender, so this only happens while dropping
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn accept(&mut self, done: FetchDone<U::Handle>) -> Option<TextureFetched> {
        let FetchDone {
            key,
            fetch_id,
            result,
        } = done;
        let slot = match self.slots.get_mut(&key) {
            Some(slot)
                if matches!(slot.entry, CacheEntry::Pending { fetch_id: id, .. } if id == fetch_id) =>
            {
                slot
            }
            _ => {
                debug!(path = %key, fetch_id, "discarding stale fetch result");
                return None;
            }
        };
        let size = match result {
            Ok(texture) => {
                let size = texture.size();
                info!(path = %key, width = size.width, height = size.height, "texture ready");
                slot.entry = CacheEntry::Ready(texture);
                Some(size)
            }
            Err(err) => {
                warn!(path = %key, error = %err, "texture fetch failed");
                slot.entry = CacheEntry::Failed(err);
                None
            }
        };
        Some(TextureFetched { key, size })
    }

    fn evict_to_fit(&mut self, incoming: usize, interest: &InterestSet) {
        let max = self.options.max_cache_size.get();
        while self.slots.len() + incoming > max {
            let victim = self
                .slots
                .iter()
                .filter(|(key, _)| !interest.contains(key) && self.active.as_ref() != Some(*key))
                .min_by(|(ka, a), (kb, b)| {
                    a.declared_at
                        .cmp(&b.declared_at)
                        .then(b.distance.cmp(&a.distance))
                        .then(ka.cmp(kb))
                })
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                warn!(
                    resident = self.slots.len(),
                    incoming, max, "nothing evictable; cache stays over budget"
                );
                break;
            };
            if let Some(slot) = self.slots.remove(&key) {
                debug!(path = %key, state = ?slot.entry.state(), "evicted");
            }
        }
    }

    fn spawn_fetch(&mut self, key: ImageKey, distance: usize) {
        let fetch_id = self.next_fetch_id;
        self.next_fetch_id += 1;
        let cancel = self.root.child_token();
        debug!(path = %key, fetch_id, distance, "fetch started");
        self.runtime.spawn(fetch::run(FetchJob {
            key: key.clone(),
            fetch_id,
            cancel: cancel.clone(),
            source: Arc::clone(&self.source),
            uploader: Arc::clone(&self.uploader),
            permits: Arc::clone(&self.permits),
            max_dimension: self.options.max_dimension,
            done_tx: self.done_tx.clone(),
            waker: self.options.waker.clone(),
        }));
        self.slots.insert(
            key,
            Slot {
                entry: CacheEntry::Pending { fetch_id, cancel },
                declared_at: self.round,
                distance,
            },
        );
    }
}

impl<U: TextureUploader> Drop for TextureCache<U> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullUploader;

    impl TextureUploader for NullUploader {
        type Handle = ();

        fn upload(&self, _image: &DecodedImage) -> Result<(), TextureError> {
            Ok(())
        }
    }

    /// Counts reads and blocks them until opened.
    struct GatedSource {
        inner: MemorySource,
        open: AtomicBool,
        reads: AtomicUsize,
    }

    impl GatedSource {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: MemorySource::new(),
                open: AtomicBool::new(open),
                reads: AtomicUsize::new(0),
            })
        }

        fn with_images(self: Arc<Self>, keys: &[&str]) -> Arc<Self> {
            for key in keys {
                self.inner.insert(*key, png_bytes(3, 2));
            }
            self
        }
    }

    impl ImageSource for GatedSource {
        fn read(&self, key: &ImageKey) -> Result<Vec<u8>, TextureError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            while !self.open.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(2));
            }
            self.inner.read(key)
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn k(s: &str) -> ImageKey {
        ImageKey::from(s)
    }

    fn cache(source: Arc<GatedSource>, max: usize) -> TextureCache<NullUploader> {
        TextureCache::new(
            Handle::current(),
            CacheOptions::new(NonZeroUsize::new(max).unwrap()),
            source,
            Arc::new(NullUploader),
        )
    }

    async fn next(cache: &mut TextureCache<NullUploader>) -> TextureFetched {
        tokio::time::timeout(Duration::from_secs(5), cache.next_fetched())
            .await
            .expect("timeout waiting for fetch")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_each_fetch_once() {
        let source = GatedSource::new(true).with_images(&["a", "b", "c"]);
        let mut cache = cache(source, 5);
        cache.set_images_to_fetch(&InterestSet::around(Some(&k("a")), Some(&k("b")), Some(&k("c"))));
        assert_eq!(cache.state(&k("b")), Some(EntryState::Pending));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let fetched = next(&mut cache).await;
            assert_eq!(fetched.size, Some(TextureSize { width: 3, height: 2 }));
            seen.push(fetched.key);
        }
        seen.sort();
        assert_eq!(seen, vec![k("a"), k("b"), k("c")]);
        assert_eq!(cache.texture(&k("b")).map(|t| t.size()), Some(TextureSize { width: 3, height: 2 }));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), cache.next_fetched())
                .await
                .is_err(),
            "no further completions expected"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn redeclaring_does_not_duplicate_work() {
        let source = GatedSource::new(false).with_images(&["a", "b"]);
        let mut cache = cache(Arc::clone(&source), 5);
        let interest = InterestSet::new([k("a"), k("b")]);
        cache.set_images_to_fetch(&interest);
        cache.set_images_to_fetch(&interest);
        source.open.store(true, Ordering::SeqCst);
        next(&mut cache).await;
        next(&mut cache).await;
        cache.set_images_to_fetch(&interest);
        assert_eq!(cache.len(), 2);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_fetch_is_forgotten() {
        let source = GatedSource::new(false).with_images(&["a", "b"]);
        let mut cache = cache(Arc::clone(&source), 5);
        cache.set_images_to_fetch(&InterestSet::new([k("a")]));
        cache.set_images_to_fetch(&InterestSet::new([k("b")]));
        assert_eq!(cache.state(&k("a")), None);
        source.open.store(true, Ordering::SeqCst);

        let fetched = next(&mut cache).await;
        assert_eq!(fetched.key, k("b"));
        assert!(
            tokio::time::timeout(Duration::from_millis(200), cache.next_fetched())
                .await
                .is_err(),
            "stale key must not report"
        );
        assert_eq!(cache.state(&k("a")), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn evicts_oldest_then_farthest() {
        let source = GatedSource::new(true).with_images(&["x", "y", "z", "w", "v"]);
        let mut cache = cache(source, 3);
        cache.set_images_to_fetch(&InterestSet::new([k("x"), k("y"), k("z")]));
        for _ in 0..3 {
            next(&mut cache).await;
        }

        // all three were declared together; z is farthest from the primary x
        cache.set_images_to_fetch(&InterestSet::new([k("w")]));
        assert_eq!(cache.state(&k("z")), None);
        assert_eq!(cache.len(), 3);
        next(&mut cache).await;

        // y is now the farthest of the oldest round
        cache.set_images_to_fetch(&InterestSet::new([k("v")]));
        assert_eq!(cache.state(&k("y")), None);
        assert_eq!(cache.state(&k("x")), Some(EntryState::Ready));
        assert_eq!(cache.state(&k("w")), Some(EntryState::Ready));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn active_texture_survives_pressure() {
        let source = GatedSource::new(true).with_images(&["a", "b", "c"]);
        let mut cache = cache(source, 2);
        cache.set_images_to_fetch(&InterestSet::new([k("a")]));
        next(&mut cache).await;
        cache.set_active(Some(k("a")));

        cache.set_images_to_fetch(&InterestSet::around(None, Some(&k("b")), Some(&k("c"))));
        assert_eq!(cache.state(&k("a")), Some(EntryState::Ready));
        assert_eq!(cache.interest().keys(), &[k("b")]);
        assert!(cache.len() <= 2);
        assert!(!cache.invalidate(&k("a")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_are_sticky_until_invalidated() {
        let source = GatedSource::new(true);
        let mut cache = cache(Arc::clone(&source), 5);
        let interest = InterestSet::new([k("missing")]);
        cache.set_images_to_fetch(&interest);
        let fetched = next(&mut cache).await;
        assert_eq!(fetched.size, None);
        let expected = TextureError::NotFound("missing".into());
        assert_eq!(cache.texture_error(&k("missing")), Some(&expected));

        cache.set_images_to_fetch(&interest);
        assert_eq!(cache.texture_error(&k("missing")), Some(&expected));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        assert!(cache.invalidate(&k("missing")));
        assert_eq!(cache.texture_error(&k("missing")), None);
        source.inner.insert("missing", png_bytes(1, 1));
        cache.set_images_to_fetch(&interest);
        let fetched = next(&mut cache).await;
        assert_eq!(fetched.size, Some(TextureSize { width: 1, height: 1 }));
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waker_runs_for_queued_results() {
        let source = GatedSource::new(true).with_images(&["a"]);
        let woken = Arc::new(AtomicUsize::new(0));
        let options = {
            let woken = Arc::clone(&woken);
            CacheOptions::default().with_waker(move || {
                woken.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut cache = TextureCache::new(Handle::current(), options, source, Arc::new(NullUploader));
        cache.set_images_to_fetch(&InterestSet::new([k("a")]));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while woken.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let fetched = cache.try_next_fetched().expect("result queued before waking");
        assert_eq!(fetched.key, k("a"));
        assert!(cache.try_next_fetched().is_none());
    }
}
