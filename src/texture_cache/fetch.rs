use std::sync::Arc;

use tokio::select;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Texture, TextureUploader, Waker};
use crate::error::TextureError;
use crate::source::{self, ImageKey, ImageSource};

/// Result of one decode+upload, sent back to the cache owner.
pub(crate) struct FetchDone<H> {
    pub key: ImageKey,
    pub fetch_id: u64,
    pub result: Result<Texture<H>, TextureError>,
}

pub(crate) struct FetchJob<U: TextureUploader> {
    pub key: ImageKey,
    pub fetch_id: u64,
    pub cancel: CancellationToken,
    pub source: Arc<dyn ImageSource>,
    pub uploader: Arc<U>,
    pub permits: Arc<Semaphore>,
    pub max_dimension: Option<u32>,
    pub done_tx: UnboundedSender<FetchDone<U::Handle>>,
    pub waker: Option<Waker>,
}

/// Waits for a decode permit, then decodes and uploads on the blocking pool.
///
/// Cancelled jobs exit without reporting; a job cancelled after its result is
/// sent is filtered out by the cache when it is accepted.
pub(crate) async fn run<U: TextureUploader>(job: FetchJob<U>) {
    let FetchJob {
        key,
        fetch_id,
        cancel,
        source: images,
        uploader,
        permits,
        max_dimension,
        done_tx,
        waker,
    } = job;

    let _permit = select! {
        _ = cancel.cancelled() => {
            debug!(path = %key, fetch_id, "fetch cancelled before decode");
            return;
        }
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    if cancel.is_cancelled() {
        return;
    }

    let result = {
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            let max = match (max_dimension, uploader.max_dimension()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let decoded = source::load(images.as_ref(), &key, max)?;
            let handle = uploader.upload(&decoded)?;
            Ok(Texture {
                width: decoded.width,
                height: decoded.height,
                handle,
            })
        })
        .await
        .unwrap_or_else(|err| Err(TextureError::DecodeFailure(format!("decode task failed: {err}"))))
    };

    if cancel.is_cancelled() {
        debug!(path = %key, fetch_id, "dropping result of cancelled fetch");
        return;
    }
    if done_tx
        .send(FetchDone {
            key,
            fetch_id,
            result,
        })
        .is_ok()
    {
        if let Some(waker) = waker {
            waker();
        }
    }
}
