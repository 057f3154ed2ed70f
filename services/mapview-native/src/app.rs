use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use glam::DVec2;
use mapview_config::ViewerConfig;
use mapview_core::{Engine, FetchCompletion, TileFetcher};
use mapview_observability::ObservabilityConfig;
use winit::application::ApplicationHandler;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::http_source::HttpTileSource;
use crate::input::ViewportController;
use crate::renderer::{GpuTexture, GpuTextures, Renderer};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const MAX_COMPLETIONS_PER_TICK: usize = 64;

pub fn run() -> anyhow::Result<()> {
    let config = ViewerConfig::from_env("mapview-native");
    let observability = mapview_observability::init(&ObservabilityConfig::from(&config));
    mapview_observability::log_startup(&observability);

    let engine = Engine::new(config.engine.clone())?;
    let source = HttpTileSource::new(
        &config.tile_base_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    let (fetcher, results) = TileFetcher::new(Arc::new(source), config.fetch_workers)?;
    tracing::info!(
        tile_base = %config.tile_base_url,
        workers = config.fetch_workers,
        base_width = config.engine.base_width,
        base_height = config.engine.base_height,
        "tile source configured"
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(engine, fetcher, results);
    event_loop.run_app(&mut app)?;
    Ok(())
}

struct Viewer {
    window: Arc<Window>,
    renderer: Renderer,
    textures: GpuTextures,
}

struct App {
    engine: Engine<GpuTexture>,
    fetcher: TileFetcher,
    results: Receiver<FetchCompletion>,
    controller: ViewportController,
    viewer: Option<Viewer>,
    title: String,
}

impl App {
    fn new(
        engine: Engine<GpuTexture>,
        fetcher: TileFetcher,
        results: Receiver<FetchCompletion>,
    ) -> Self {
        Self {
            engine,
            fetcher,
            results,
            controller: ViewportController::new(),
            viewer: None,
            title: String::new(),
        }
    }

    fn init_failed(&mut self, event_loop: &ActiveEventLoop, message: String) {
        tracing::error!(%message, "viewer initialization failed");
        self.engine.fail(message);
        event_loop.exit();
    }

    /// Applies finished fetches on this thread. Bounded per tick so a burst
    /// of uploads cannot starve input handling.
    fn drain_completions(&mut self, event_loop: &ActiveEventLoop) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        for _ in 0..MAX_COMPLETIONS_PER_TICK {
            match self.results.try_recv() {
                Ok(completion) => {
                    self.engine.apply_completion(completion, &mut viewer.textures);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::error!("fetch workers exited");
                    self.engine.fail("fetch workers exited");
                    event_loop.exit();
                    break;
                }
            }
        }
    }

    fn update_title(&mut self) {
        let Some(viewer) = self.viewer.as_ref() else {
            return;
        };
        let title = format!(
            "mapview - layer {} - {} tiles - {}",
            self.engine.layer(),
            self.engine.cache().len(),
            self.engine.status()
        );
        if title != self.title {
            viewer.window.set_title(&title);
            self.title = title;
        }
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        let quads = self.engine.compose();
        match viewer.renderer.render(&quads) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                viewer.renderer.reconfigure();
                viewer.window.request_redraw();
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                tracing::error!("surface out of memory");
                event_loop.exit();
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame skipped");
            }
        }
    }

    fn shutdown(&mut self) {
        let Some(mut viewer) = self.viewer.take() else {
            return;
        };
        let released = self.engine.shutdown(&mut viewer.textures);
        let live = viewer.textures.live();
        tracing::info!(released, live, "textures released");
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }

        let attributes = WindowAttributes::default().with_title("mapview");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.init_failed(event_loop, format!("failed to create window: {err}"));
                return;
            }
        };

        let renderer = match pollster::block_on(Renderer::new(Arc::clone(&window))) {
            Ok(renderer) => renderer,
            Err(err) => {
                self.init_failed(event_loop, format!("failed to create renderer: {err:#}"));
                return;
            }
        };

        let textures = renderer.textures();
        self.viewer = Some(Viewer {
            window,
            renderer,
            textures,
        });
        let summary = self.engine.start(&mut self.fetcher);
        tracing::info!(
            layer = self.engine.layer(),
            issued = summary.issued,
            "viewer started"
        );
        self.update_title();
    }

    fn new_events(&mut self, event_loop: &ActiveEventLoop, _cause: StartCause) {
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + FRAME_INTERVAL));
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match &event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
                return;
            }
            WindowEvent::RedrawRequested => {
                self.render(event_loop);
                return;
            }
            WindowEvent::Resized(size) => {
                if let Some(viewer) = self.viewer.as_mut() {
                    viewer.renderer.resize(size.width, size.height);
                }
                self.engine.resize();
                return;
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(viewer) = self.viewer.as_mut() {
                    let size = viewer.window.inner_size();
                    viewer.renderer.resize(size.width, size.height);
                }
                self.engine.resize();
                return;
            }
            _ => {}
        }

        let Some(viewer) = self.viewer.as_ref() else {
            return;
        };
        let (width, height) = viewer.renderer.size();
        let size = DVec2::new(f64::from(width), f64::from(height));
        let view = self.engine.viewport().rect();
        let limits = *self.engine.limits();
        if let Some(candidate) = self.controller.process_event(&event, view, size, &limits) {
            let diff = self.engine.set_viewport(candidate, &mut self.fetcher);
            if !diff.is_empty() {
                tracing::trace!(
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    layer = self.engine.layer(),
                    "active tiles changed"
                );
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.drain_completions(event_loop);
        self.update_title();
        if self.engine.take_redraw() {
            if let Some(viewer) = self.viewer.as_ref() {
                viewer.window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
