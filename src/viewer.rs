use std::{sync::Arc, time::Instant};

use glam::Vec3;

use crate::{
    animation::{AnimationSequencer, AnimationSource, PhaseKind},
    asset_loader::{AssetChannels, ClipRole, LoadGeneration, LoadRequest, LoadResponse},
    camera::{DragMode, OrbitControls, PerspectiveCamera},
    config::ViewerConfig,
    error::{LoadError, RenderError, ViewerError},
    model::{HumanBone, Model, ModelAsset},
    scene_tree::{AmbientLight, DirectionalLight, Scene},
    settings::{CharacterPosition, CharacterRotation, SettingsPatch, SettingsStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}
impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Where frames end up: a canvas inside some container whose box decides the
/// canvas size.
pub trait RenderSurface {
    /// `None` while the canvas is not inside a container.
    fn container_size(&self) -> Option<SurfaceSize>;
    fn canvas_size(&self) -> SurfaceSize;
    fn pixel_ratio(&self) -> f64;
}

pub trait Renderer {
    fn set_pixel_ratio(&mut self, ratio: f64);
    fn set_size(&mut self, size: SurfaceSize);
    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<(), RenderError>;
}

enum ModelSlot {
    Empty,
    Loading { generation: LoadGeneration, url: String },
    Ready(Model),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Loading,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeferredKind {
    ResetCamera,
}

#[derive(Debug)]
struct DeferredTask {
    due_frame: u64,
    generation: LoadGeneration,
    kind: DeferredKind,
}

pub struct Viewer {
    is_ready: bool,
    config: ViewerConfig,
    settings: Arc<dyn SettingsStore>,
    scene: Scene,
    camera: Option<PerspectiveCamera>,
    controls: Option<OrbitControls>,
    surface: Option<Box<dyn RenderSurface>>,
    renderer: Option<Box<dyn Renderer>>,
    slot: ModelSlot,
    sequencer: AnimationSequencer,
    loader: AssetChannels,
    /// responses tagged with any other generation are dropped
    generation: LoadGeneration,
    frame: u64,
    deferred: Vec<DeferredTask>,
    last_frame: Instant,
}

impl Viewer {
    pub fn new(config: ViewerConfig, settings: Arc<dyn SettingsStore>, loader: AssetChannels) -> Self {
        let intensity = settings.get().lighting_intensity;
        let lighting = &config.lighting;
        let scene = Scene::new(
            DirectionalLight {
                color: [1.0; 3],
                intensity: lighting.directional_factor * intensity,
                direction: Vec3::from(lighting.directional_direction).normalize_or_zero(),
            },
            AmbientLight {
                color: [1.0; 3],
                intensity: lighting.ambient_factor * intensity,
            },
        );
        let sequencer = AnimationSequencer::new(config.animation.crossfade);
        Self {
            is_ready: false,
            config,
            settings,
            scene,
            camera: None,
            controls: None,
            surface: None,
            renderer: None,
            slot: ModelSlot::Empty,
            sequencer,
            loader,
            generation: LoadGeneration::default(),
            frame: 0,
            deferred: Vec::new(),
            last_frame: Instant::now(),
        }
    }

    /// Binds the drawable surface and creates the camera and its controls.
    /// A second call is ignored.
    pub fn setup(&mut self, surface: Box<dyn RenderSurface>, mut renderer: Box<dyn Renderer>) {
        if self.is_ready {
            log::warn!("viewer already has a surface, ignoring setup");
            return;
        }
        let canvas = surface.canvas_size();
        let container = surface.container_size().unwrap_or(canvas);
        let size = SurfaceSize::new(
            if container.width > 0 { container.width } else { canvas.width },
            if container.height > 0 { container.height } else { canvas.height },
        );
        renderer.set_size(size);
        renderer.set_pixel_ratio(surface.pixel_ratio());

        let cfg = &self.config.camera;
        let mut camera = PerspectiveCamera::new(cfg.fovy, size.aspect(), cfg.znear, cfg.zfar);
        camera.position = Vec3::from(cfg.position);
        let mut controls = OrbitControls::new(Vec3::from(cfg.target));
        controls.screen_space_panning = cfg.screen_space_panning;
        controls.enabled = !self.settings.get().fixed_character_position;
        controls.update(&mut camera);

        self.camera = Some(camera);
        self.controls = Some(controls);
        self.surface = Some(surface);
        self.renderer = Some(renderer);
        self.is_ready = true;
        self.last_frame = Instant::now();
        log::info!("viewer ready at {}x{}", size.width, size.height);

        self.restore_camera_position();
    }

    /// Follows the container's current box.
    pub fn resize(&mut self) {
        let (Some(renderer), Some(surface)) = (self.renderer.as_mut(), self.surface.as_ref()) else {
            return;
        };
        let Some(size) = surface.container_size() else {
            return;
        };
        renderer.set_pixel_ratio(surface.pixel_ratio());
        renderer.set_size(size);
        if let Some(camera) = self.camera.as_mut() {
            camera.aspect = size.aspect();
        }
    }

    /// One display frame, timed by the wall clock.
    pub fn update(&mut self) -> Result<(), ViewerError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.tick(dt)
    }

    /// One display frame advancing animation by `dt` seconds. A model load
    /// failure for the current generation is reported here; the frame is
    /// still completed.
    pub fn tick(&mut self, dt: f32) -> Result<(), ViewerError> {
        self.frame += 1;
        let result = self.process_responses();

        if let ModelSlot::Ready(model) = &mut self.slot {
            model.update(&mut self.scene, dt);
            self.sequencer.tick(&mut model.mixer, dt);
        }

        self.run_deferred();

        if let (Some(renderer), Some(camera)) = (self.renderer.as_mut(), self.camera.as_ref()) {
            if let Err(e) = renderer.render(&self.scene, camera) {
                log::warn!("frame {} not rendered: {e}", self.frame);
            }
        }
        result
    }

    /// Replaces whatever model is loaded or loading. Returns the generation
    /// that the new load's responses will carry.
    pub fn load_vrm(&mut self, url: &str) -> Result<LoadGeneration, ViewerError> {
        self.unload_vrm();
        self.generation = self.generation.next();
        let generation = self.generation;
        let request = LoadRequest::Model { generation, url: url.to_string() };
        if self.loader.req_tx.send(request).is_err() {
            return Err(ViewerError::ModelLoad { url: url.to_string(), source: LoadError::WorkerGone });
        }
        log::info!("loading {url} ({generation:?})");
        self.slot = ModelSlot::Loading { generation, url: url.to_string() };
        Ok(generation)
    }

    /// Stops the animations and detaches the model. An in-flight load is
    /// cancelled. Does nothing when no model is present.
    pub fn unload_vrm(&mut self) {
        match std::mem::replace(&mut self.slot, ModelSlot::Empty) {
            ModelSlot::Empty => {}
            ModelSlot::Loading { url, .. } => {
                self.generation = self.generation.next();
                log::info!("cancelled load of {url}");
            }
            ModelSlot::Ready(mut model) => {
                self.sequencer.clear(&mut model.mixer);
                let url = model.url.clone();
                let removed = model.unload(&mut self.scene);
                log::info!("unloaded {url} ({removed} nodes)");
            }
        }
        self.deferred.clear();
    }

    fn process_responses(&mut self) -> Result<(), ViewerError> {
        let mut result = Ok(());
        while let Ok(response) = self.loader.res_rx.try_recv() {
            if response.generation() != self.generation {
                log::debug!("dropping stale response for {:?}", response.generation());
                continue;
            }
            match response {
                LoadResponse::Model { url, result: Ok(asset), .. } => self.on_model_loaded(&url, &asset),
                LoadResponse::Model { url, result: Err(source), .. } => {
                    log::error!("model {url} failed to load: {source}");
                    self.slot = ModelSlot::Empty;
                    result = Err(ViewerError::ModelLoad { url, source });
                }
                LoadResponse::Animation { role, url, result, .. } => self.on_animation_loaded(role, &url, result),
            }
        }
        result
    }

    fn on_model_loaded(&mut self, url: &str, asset: &ModelAsset) {
        if !matches!(&self.slot, ModelSlot::Loading { generation, .. } if *generation == self.generation) {
            return;
        }
        let model = Model::attach(url, asset, &mut self.scene);
        self.scene.traverse_mut(model.scene_root(), |_, node| node.frustum_culled = false);
        model.set_offset_x(&mut self.scene, self.config.model_offset_x);

        self.sequencer = AnimationSequencer::new(self.config.animation.crossfade);
        self.slot = ModelSlot::Ready(model);
        log::info!("attached {url}");

        let generation = self.generation;
        let animation = &self.config.animation;
        for (role, path) in [(ClipRole::Intro, &animation.intro_url), (ClipRole::Default, &animation.default_url)] {
            let url = self.config.build_url(path);
            if self.loader.req_tx.send(LoadRequest::Animation { generation, role, url }).is_err() {
                log::warn!("loader gone, {role:?} animation not requested");
            }
        }

        self.deferred.push(DeferredTask {
            due_frame: self.frame + u64::from(self.config.camera_reset_delay_frames),
            generation,
            kind: DeferredKind::ResetCamera,
        });
    }

    fn on_animation_loaded(
        &mut self,
        role: ClipRole,
        url: &str,
        result: Result<Option<AnimationSource>, LoadError>,
    ) {
        let ModelSlot::Ready(model) = &mut self.slot else {
            return;
        };
        let source = match result {
            Ok(Some(source)) => source,
            Ok(None) => {
                log::info!("{url} holds no animation");
                return;
            }
            Err(e) => {
                log::warn!("animation {url} failed to load: {e}");
                return;
            }
        };
        let clip = source.create_clip_for(model);
        let started = match role {
            ClipRole::Intro => self.sequencer.intro_loaded(&mut model.mixer, clip),
            ClipRole::Default => self.sequencer.default_loaded(&mut model.mixer, clip),
        };
        log::debug!("{role:?} clip from {url}: started={started}, phase={:?}", self.sequencer.kind());
    }

    fn run_deferred(&mut self) {
        let frame = self.frame;
        let generation = self.generation;
        let (due, pending): (Vec<_>, Vec<_>) = self.deferred.drain(..).partition(|t| t.due_frame <= frame);
        self.deferred = pending;
        for task in due {
            if task.generation != generation {
                continue;
            }
            match task.kind {
                DeferredKind::ResetCamera => self.reset_camera(),
            }
        }
    }

    /// Frames the camera on the model's head, or restores the saved pose while
    /// the pose is locked.
    pub fn reset_camera(&mut self) {
        if self.settings.get().fixed_character_position {
            self.restore_camera_position();
            return;
        }
        let ModelSlot::Ready(model) = &self.slot else {
            return;
        };
        let Some(head) = model
            .humanoid()
            .normalized_bone_node(HumanBone::Head)
            .and_then(|node| self.scene.world_position(node))
        else {
            return;
        };
        let model_offset = model.offset_x(&self.scene);

        if let Some(camera) = self.camera.as_mut() {
            camera.position.y = head.y;
        }
        if let Some(controls) = self.controls.as_mut() {
            controls.target = Vec3::new(head.x + model_offset, head.y, head.z);
            if let Some(camera) = self.camera.as_mut() {
                controls.update(camera);
            }
        }
    }

    /// Stores the camera position and orbit target, keeping the stored scale.
    pub fn save_camera_position(&self) {
        let (Some(camera), Some(controls)) = (self.camera.as_ref(), self.controls.as_ref()) else {
            return;
        };
        let scale = self.settings.get().character_position.scale;
        let p = camera.position;
        let t = controls.target;
        self.settings.set(SettingsPatch {
            character_position: Some(CharacterPosition { x: p.x, y: p.y, z: p.z, scale }),
            character_rotation: Some(CharacterRotation { x: t.x, y: t.y, z: t.z }),
            ..Default::default()
        });
    }

    /// Applies the saved pose, but only while locked and only if one was
    /// ever saved.
    pub fn restore_camera_position(&mut self) {
        let (Some(camera), Some(controls)) = (self.camera.as_mut(), self.controls.as_mut()) else {
            return;
        };
        let settings = self.settings.get();
        if !settings.fixed_character_position || settings.character_position.is_origin() {
            return;
        }
        let p = settings.character_position;
        let r = settings.character_rotation;
        camera.position = Vec3::new(p.x, p.y, p.z);
        controls.target = Vec3::new(r.x, r.y, r.z);
        controls.update(camera);
    }

    pub fn fix_camera_position(&mut self) {
        self.save_camera_position();
        self.settings.set(SettingsPatch {
            fixed_character_position: Some(true),
            ..Default::default()
        });
        if let Some(controls) = self.controls.as_mut() {
            controls.end();
            controls.enabled = false;
        }
    }

    pub fn unfix_camera_position(&mut self) {
        self.settings.set(SettingsPatch {
            fixed_character_position: Some(false),
            ..Default::default()
        });
        if let Some(controls) = self.controls.as_mut() {
            controls.enabled = true;
        }
    }

    /// Unlocks, forgets the saved pose and frames the model again.
    pub fn reset_camera_position(&mut self) {
        self.settings.set(SettingsPatch {
            fixed_character_position: Some(false),
            character_position: Some(CharacterPosition::default()),
            character_rotation: Some(CharacterRotation::default()),
            ..Default::default()
        });
        if let Some(controls) = self.controls.as_mut() {
            controls.enabled = true;
        }
        self.reset_camera();
    }

    pub fn update_lighting_intensity(&mut self, intensity: f32) {
        self.scene.directional_light.intensity = self.config.lighting.directional_factor * intensity;
        self.scene.ambient_light.intensity = self.config.lighting.ambient_factor * intensity;
    }

    /// Forces the switch to the looping default animation.
    pub fn play_default_animation(&mut self) -> bool {
        match &mut self.slot {
            ModelSlot::Ready(model) => self.sequencer.play_default(&mut model.mixer),
            _ => false,
        }
    }

    pub fn begin_camera_drag(&mut self, mode: DragMode) -> bool {
        self.controls.as_mut().is_some_and(|c| c.begin(mode))
    }

    /// Pointer movement in logical pixels.
    pub fn drag_camera(&mut self, dx: f32, dy: f32) {
        let height = self.viewport_height();
        if let (Some(controls), Some(camera)) = (self.controls.as_mut(), self.camera.as_mut()) {
            controls.drag_by(camera, dx, dy, height);
        }
    }

    pub fn end_camera_drag(&mut self) {
        if self.controls.as_mut().is_some_and(|c| c.end()) {
            self.on_camera_adjusted();
        }
    }

    pub fn dolly_camera(&mut self, steps: f32) {
        let (Some(controls), Some(camera)) = (self.controls.as_mut(), self.camera.as_mut()) else {
            return;
        };
        if !controls.enabled {
            return;
        }
        controls.dolly(camera, steps);
        self.on_camera_adjusted();
    }

    /// The user finished moving the camera by hand.
    fn on_camera_adjusted(&self) {
        if !self.settings.get().fixed_character_position {
            self.save_camera_position();
        }
    }

    fn viewport_height(&self) -> f32 {
        self.surface
            .as_ref()
            .map(|s| s.container_size().unwrap_or_else(|| s.canvas_size()).height as f32)
            .unwrap_or(0.0)
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.camera.as_ref()
    }

    pub fn controls(&self) -> Option<&OrbitControls> {
        self.controls.as_ref()
    }

    pub fn model(&self) -> Option<&Model> {
        match &self.slot {
            ModelSlot::Ready(model) => Some(model),
            _ => None,
        }
    }

    pub fn load_state(&self) -> LoadState {
        match self.slot {
            ModelSlot::Empty => LoadState::Empty,
            ModelSlot::Loading { .. } => LoadState::Loading,
            ModelSlot::Ready(_) => LoadState::Ready,
        }
    }

    pub fn loading_url(&self) -> Option<&str> {
        match &self.slot {
            ModelSlot::Loading { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn animation_phase(&self) -> PhaseKind {
        self.sequencer.kind()
    }

    pub fn sequencer(&self) -> &AnimationSequencer {
        &self.sequencer
    }

    pub fn generation(&self) -> LoadGeneration {
        self.generation
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{asset_loader::asset_channels, settings::SharedSettings};

    #[test]
    fn lights_follow_stored_intensity() {
        let settings = Arc::new(SharedSettings::default());
        settings.set(SettingsPatch { lighting_intensity: Some(0.5), ..Default::default() });
        let (channels, _loader) = asset_channels();
        let mut viewer = Viewer::new(ViewerConfig::default(), settings, channels);
        assert_eq!(viewer.config().lighting.directional_factor, 1.8);
        assert!((viewer.scene().directional_light.intensity - 0.9).abs() < 1e-6);
        assert!((viewer.scene().ambient_light.intensity - 0.6).abs() < 1e-6);

        viewer.update_lighting_intensity(2.0);
        viewer.update_lighting_intensity(2.0);
        assert!((viewer.scene().directional_light.intensity - 3.6).abs() < 1e-6);
        assert!((viewer.scene().ambient_light.intensity - 2.4).abs() < 1e-6);
    }

    #[test]
    fn camera_operations_before_setup_do_nothing() {
        let settings = Arc::new(SharedSettings::default());
        let (channels, _loader) = asset_channels();
        let mut viewer = Viewer::new(ViewerConfig::default(), settings.clone(), channels);
        viewer.save_camera_position();
        viewer.restore_camera_position();
        viewer.reset_camera();
        viewer.resize();
        assert!(viewer.tick(0.016).is_ok());
        assert!(!viewer.is_ready());
        assert_eq!(*settings.get(), crate::settings::Settings::default());
    }

    #[test]
    fn load_cancelled_by_unload_ignores_late_response() {
        let settings = Arc::new(SharedSettings::default());
        let (channels, loader) = asset_channels();
        let mut viewer = Viewer::new(ViewerConfig::default(), settings, channels);
        let generation = viewer.load_vrm("/a.vrm").unwrap();
        assert_eq!(viewer.load_state(), LoadState::Loading);
        assert_eq!(viewer.loading_url(), Some("/a.vrm"));
        viewer.unload_vrm();
        assert_eq!(viewer.load_state(), LoadState::Empty);
        assert_eq!(viewer.loading_url(), None);

        loader
            .res_tx
            .send(LoadResponse::Model {
                generation,
                url: "/a.vrm".into(),
                result: Ok(Default::default()),
            })
            .unwrap();
        assert!(viewer.tick(0.016).is_ok());
        assert_eq!(viewer.load_state(), LoadState::Empty);
        assert!(viewer.scene().root_children().is_empty());
    }
}
