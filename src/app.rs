use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use crossbeam::channel::Receiver;
use pollster::FutureExt as _;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::{
    asset_loader::{asset_channels, WorkerPool},
    camera::DragMode,
    config::ViewerConfig,
    renderer::{SkeletonRenderer, WgpuContext},
    settings::{save_settings, Settings, SettingsPatch, SettingsStore},
    viewer::{RenderSurface, SurfaceSize, Viewer},
    vrm::{VrmModelLoader, VrmaAnimationLoader},
};

const LOADER_THREADS: usize = 2;
const LIGHTING_STEP: f32 = 0.1;
/// pixels of trackpad scroll per dolly step
const PIXELS_PER_STEP: f64 = 50.0;

/// The window plays the part of both canvas and container.
struct WindowSurface {
    window: Arc<Window>,
}

impl RenderSurface for WindowSurface {
    fn container_size(&self) -> Option<SurfaceSize> {
        Some(self.canvas_size())
    }

    fn canvas_size(&self) -> SurfaceSize {
        let size = self.window.inner_size().to_logical::<u32>(self.window.scale_factor());
        SurfaceSize::new(size.width, size.height)
    }

    fn pixel_ratio(&self) -> f64 {
        self.window.scale_factor()
    }
}

pub struct ViewerApp {
    viewer: Viewer,
    window: Option<Arc<Window>>,
    settings_rx: Receiver<Arc<Settings>>,
    settings_path: Option<PathBuf>,
    model_url: Option<String>,
    cursor: Option<PhysicalPosition<f64>>,
}

impl ViewerApp {
    pub fn new(viewer: Viewer, settings_path: Option<PathBuf>, model_url: Option<String>) -> Self {
        let settings_rx = viewer.settings().subscribe();
        Self {
            viewer,
            window: None,
            settings_rx,
            settings_path,
            model_url,
            cursor: None,
        }
    }

    fn load_model(&mut self) {
        let Some(url) = self.model_url.as_deref() else {
            return;
        };
        if let Err(e) = self.viewer.load_vrm(url) {
            log::error!("{e}");
        }
    }

    /// Applies and persists the latest settings snapshot, if any arrived.
    fn apply_settings(&mut self) {
        let Some(settings) = self.settings_rx.try_iter().last() else {
            return;
        };
        self.viewer.update_lighting_intensity(settings.lighting_intensity);
        if let Some(path) = self.settings_path.as_deref() {
            if let Err(e) = save_settings(&settings, path) {
                log::warn!("could not persist settings: {e}");
            }
        }
    }

    fn step_lighting(&self, delta: f32) {
        let settings = self.viewer.settings();
        let intensity = (settings.get().lighting_intensity + delta).max(0.0);
        settings.set(SettingsPatch {
            lighting_intensity: Some(intensity),
            ..Default::default()
        });
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        match code {
            KeyCode::KeyF => self.viewer.fix_camera_position(),
            KeyCode::KeyU => self.viewer.unfix_camera_position(),
            KeyCode::KeyR => self.viewer.reset_camera_position(),
            KeyCode::KeyP => {
                if !self.viewer.play_default_animation() {
                    log::info!("no default animation loaded yet");
                }
            }
            KeyCode::KeyL => self.load_model(),
            KeyCode::Equal | KeyCode::NumpadAdd => self.step_lighting(LIGHTING_STEP),
            KeyCode::Minus | KeyCode::NumpadSubtract => self.step_lighting(-LIGHTING_STEP),
            KeyCode::Escape => event_loop.exit(),
            _ => (),
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("VRM Viewer")
            .with_transparent(true);
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("could not open window: {e}");
                event_loop.exit();
                return;
            }
        };
        let context = match WgpuContext::new(window.clone()).block_on() {
            Ok(context) => context,
            Err(e) => {
                log::error!("{e}");
                event_loop.exit();
                return;
            }
        };
        self.viewer.setup(
            Box::new(WindowSurface { window: window.clone() }),
            Box::new(SkeletonRenderer::new(context)),
        );
        self.window = Some(window);
        self.load_model();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => self.viewer.resize(),
            WindowEvent::RedrawRequested => {
                self.apply_settings();
                if let Err(e) = self.viewer.update() {
                    log::error!("{e}");
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match (state, button) {
                (ElementState::Pressed, MouseButton::Left) => {
                    self.viewer.begin_camera_drag(DragMode::Rotate);
                }
                (ElementState::Pressed, MouseButton::Right) => {
                    self.viewer.begin_camera_drag(DragMode::Pan);
                }
                (ElementState::Released, MouseButton::Left | MouseButton::Right) => self.viewer.end_camera_drag(),
                _ => (),
            },
            WindowEvent::CursorMoved { position, .. } => {
                if let (Some(last), Some(window)) = (self.cursor, self.window.as_ref()) {
                    let scale = window.scale_factor();
                    let dx = ((position.x - last.x) / scale) as f32;
                    let dy = ((position.y - last.y) / scale) as f32;
                    self.viewer.drag_camera(dx, dy);
                }
                self.cursor = Some(position);
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => (p.y / PIXELS_PER_STEP) as f32,
                };
                self.viewer.dolly_camera(steps);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, code),
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

pub struct RunOptions {
    pub config: ViewerConfig,
    pub settings: Arc<dyn SettingsStore>,
    pub settings_path: Option<PathBuf>,
    pub asset_root: PathBuf,
    pub model_url: Option<String>,
}

/// Opens the viewer window and blocks until it is closed.
pub fn run(options: RunOptions) -> anyhow::Result<()> {
    let (channels, endpoint) = asset_channels();
    let root: &Path = &options.asset_root;
    let pool = WorkerPool::spawn(
        endpoint,
        LOADER_THREADS,
        Arc::new(VrmModelLoader::new(root)),
        Arc::new(VrmaAnimationLoader::new(root)),
    );

    let viewer = Viewer::new(options.config, options.settings, channels);
    let mut app = ViewerApp::new(viewer, options.settings_path, options.model_url);

    let event_loop = EventLoop::new().context("creating event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run_app(&mut app).context("running event loop")?;

    // closes the request channel so the workers wind down
    drop(app);
    pool.join();
    Ok(())
}
