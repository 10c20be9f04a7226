use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wgpu::SurfaceError;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy},
    window::{Fullscreen, Window, WindowAttributes},
};

use crate::camera::{CameraMetrics, Size};
use crate::config::Configuration;
use crate::events::{Advance, LayerNotification, LoadingState, TextureSize};
use crate::gpu::{GpuContext, WgpuCanvas, WgpuUploader, WindowElement};
use crate::library::Playlist;
use crate::photo_layer::{LayerObserver, LayerProps, PhotoLayer};
use crate::source::FileSource;
use crate::texture_cache::TextureCache;

#[derive(Debug)]
enum ViewerEvent {
    /// A fetch result is queued in the texture cache.
    TextureReady,
    Advance,
    Layer(LayerNotification),
    Cancelled,
}

/// Forwards layer notifications into the event loop.
struct ViewerObserver {
    proxy: EventLoopProxy<ViewerEvent>,
}

impl LayerObserver for ViewerObserver {
    fn loading_state_changed(&mut self, state: &LoadingState) {
        let _ = self
            .proxy
            .send_event(ViewerEvent::Layer(LayerNotification::LoadingState(state.clone())));
    }

    fn texture_changed(&mut self, size: TextureSize) {
        let _ = self
            .proxy
            .send_event(ViewerEvent::Layer(LayerNotification::Texture(size)));
    }
}

type Layer = PhotoLayer<WgpuCanvas, WgpuUploader, ViewerObserver>;

struct ViewerApp {
    cfg: Configuration,
    playlist: Playlist,
    cancel: CancellationToken,
    proxy: EventLoopProxy<ViewerEvent>,
    runtime: Handle,
    // dropped before the surface and device it draws with
    layer: Option<Layer>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    gpu: Option<Arc<GpuContext>>,
    window: Option<Arc<Window>>,
}

impl ViewerApp {
    fn new(
        cfg: Configuration,
        playlist: Playlist,
        cancel: CancellationToken,
        proxy: EventLoopProxy<ViewerEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            cfg,
            playlist,
            cancel,
            proxy,
            runtime,
            layer: None,
            surface: None,
            surface_config: None,
            gpu: None,
            window: None,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let attrs = WindowAttributes::default().with_title("photo-layer");
        match event_loop.create_window(attrs) {
            Ok(window) => {
                if self.cfg.fullscreen {
                    window.set_fullscreen(Some(Fullscreen::Borderless(window.current_monitor())));
                    window.set_cursor_visible(false);
                }
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create viewer window");
                None
            }
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let (gpu, adapter) =
            GpuContext::request(&instance, &surface).context("failed to initialise GPU")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no formats")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            max_texture = gpu.device.limits().max_texture_dimension_2d,
            "viewer surface configured",
        );

        let gpu = Arc::new(gpu);
        let waker = {
            let proxy = Mutex::new(self.proxy.clone());
            move || {
                if let Ok(proxy) = proxy.lock() {
                    let _ = proxy.send_event(ViewerEvent::TextureReady);
                }
            }
        };
        let cache = TextureCache::new(
            self.runtime.clone(),
            self.cfg.cache_options().with_waker(waker),
            Arc::new(FileSource),
            Arc::new(WgpuUploader::new(gpu.clone())),
        );
        let canvas = WgpuCanvas::new(gpu.clone(), format, WindowElement::new(window));
        let observer = ViewerObserver {
            proxy: self.proxy.clone(),
        };

        self.layer = Some(PhotoLayer::new(canvas, cache, observer, self.cfg.hide_delay));
        self.surface = Some(surface);
        self.surface_config = Some(config);
        self.gpu = Some(gpu);
        self.sync_props();
        Ok(())
    }

    /// Pushes props for the current playlist position and window size.
    ///
    /// Metrics are only derived once the current photo is resident, so the
    /// layer keeps the previous frame (or defers the hide) until then.
    fn sync_props(&mut self) {
        let (Some(layer), Some(window)) = (self.layer.as_mut(), self.window.as_ref()) else {
            return;
        };
        let inner = window.inner_size();
        let body = Size::new(inner.width, inner.height);
        let current = self.playlist.current().cloned();
        let camera_metrics = current
            .as_ref()
            .and_then(|key| layer.cache().texture(key))
            .map(|t| CameraMetrics::fit(body, t.width, t.height, self.cfg.crop));
        let props = LayerProps {
            image_path: current,
            image_path_prev: self.playlist.prev().cloned(),
            image_path_next: self.playlist.next().cloned(),
            camera_metrics,
            body_size: body,
            mode: self.cfg.mode,
        };
        if layer.props() != &props {
            layer.set_props(props);
        }
    }

    fn handle_resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        let (Some(surface), Some(gpu), Some(config)) = (
            self.surface.as_ref(),
            self.gpu.as_ref(),
            self.surface_config.as_mut(),
        ) else {
            return;
        };

        config.width = new_size.width.max(1);
        config.height = new_size.height.max(1);
        surface.configure(&gpu.device, config);
        debug!(
            width = config.width,
            height = config.height,
            "viewer surface resized",
        );
        self.sync_props();
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(surface), Some(gpu), Some(layer)) =
            (self.surface.as_ref(), self.gpu.as_ref(), self.layer.as_ref())
        else {
            return;
        };
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if layer.canvas().holds_previous_frame() {
            debug!("next photo not renderable yet; keeping previous frame");
            return;
        }

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("viewer surface lost; reconfiguring");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("viewer surface out of memory; exiting event loop");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("viewer surface acquisition timed out");
                return;
            }
            Err(SurfaceError::Other) => {
                warn!("viewer surface reported an unknown error; retrying");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer-encoder"),
            });
        layer.canvas().render(&mut encoder, &view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
        window.pre_present_notify();
        frame.present();
    }

    fn show_state(&self, state: &LoadingState) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let name = self
            .playlist
            .current()
            .and_then(|key| key.as_path().file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        window.set_title(&format!("photo-layer: {name} ({state})"));
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }

        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.gpu.is_none() {
            if let Err(err) = self.init_gpu(window.clone()) {
                error!(error = ?err, "failed to initialize GPU state");
                event_loop.exit();
                return;
            }
        }

        window.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("viewer window close requested");
                self.cancel.cancel();
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let size = window.inner_size();
                let _ = inner_size_writer.request_inner_size(size);
                self.handle_resize(size);
            }
            WindowEvent::RedrawRequested => {
                self.draw(event_loop);
            }
            _ => {}
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            // picked up by the pump in about_to_wait
            ViewerEvent::TextureReady => {}
            ViewerEvent::Advance => {
                if let Some(key) = self.playlist.advance() {
                    info!(path = %key, "advance");
                }
                self.sync_props();
            }
            ViewerEvent::Layer(LayerNotification::Texture(size)) => {
                debug!(width = size.width, height = size.height, "texture changed");
                self.sync_props();
            }
            ViewerEvent::Layer(LayerNotification::LoadingState(state)) => {
                self.show_state(&state);
            }
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(layer) = self.layer.as_mut() else {
            return;
        };
        layer.pump(tokio::time::Instant::now());
        self.sync_props();
        let deadline = self.layer.as_ref().and_then(|layer| layer.hide_deadline());
        event_loop.set_control_flow(match deadline {
            Some(deadline) => ControlFlow::WaitUntil(deadline.into_std()),
            None => ControlFlow::Wait,
        });
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // detach and cancel fetches while the device is still alive
        self.layer = None;
    }
}

/// Runs the slideshow window on the calling thread until it is closed or
/// `cancel` fires. Must be called from within a tokio runtime.
pub fn run_windowed(
    cfg: Configuration,
    playlist: Playlist,
    mut advance_rx: Receiver<Advance>,
    cancel: CancellationToken,
) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        let proxy = proxy.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };
    let advance_task = {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            while let Some(Advance) = advance_rx.recv().await {
                if proxy.send_event(ViewerEvent::Advance).is_err() {
                    break;
                }
            }
        })
    };

    let mut app = ViewerApp::new(cfg, playlist, cancel, proxy, Handle::current());
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();
    advance_task.abort();

    run_result.context("viewer event loop failed")
}
