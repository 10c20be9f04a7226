use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::canvas::Canvas;
use crate::photo_layer::{LayerObserver, LayerProps, PhotoLayer};
use crate::texture_cache::TextureUploader;

/// Drives `layer` from a props channel until cancelled or the channel closes.
///
/// The layer is dropped on return, which detaches its element and cancels
/// every in-flight fetch.
pub async fn run<C, U, O>(
    mut layer: PhotoLayer<C, U, O>,
    mut props_rx: Receiver<LayerProps>,
    cancel: CancellationToken,
) -> Result<()>
where
    C: Canvas<Handle = U::Handle>,
    U: TextureUploader,
    O: LayerObserver,
{
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting layer task");
                break;
            }
            props = props_rx.recv() => match props {
                Some(props) => {
                    debug!(path = ?props.image_path.as_ref().map(|k| k.as_str()), "props");
                    layer.set_props(props);
                }
                None => {
                    debug!("props channel closed; exiting layer task");
                    break;
                }
            },
            event = layer.next_event() => layer.handle_event(event),
        }
    }
    Ok(())
}
