use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use glam::{Quat, Vec3};
use vrm_viewer::{
    animation::{
        clip::{Channel, Interpolation, Track},
        AnimationSource, PhaseKind,
    },
    asset_loader::{asset_channels, execute, AnimationLoader, ClipRole, LoadRequest, LoaderEndpoint, ModelLoader},
    camera::{DragMode, PerspectiveCamera},
    config::ViewerConfig,
    error::{LoadError, RenderError, ViewerError},
    model::{HumanBone, ModelAsset},
    scene_tree::{GraphNode, Scene, SceneGraph, Trs},
    settings::{CharacterPosition, CharacterRotation, Settings, SettingsPatch, SettingsStore, SharedSettings},
    viewer::{LoadState, RenderSurface, Renderer, SurfaceSize, Viewer},
};

const DT: f32 = 0.1;

struct Fakes;

impl ModelLoader for Fakes {
    fn load(&self, url: &str) -> Result<ModelAsset, LoadError> {
        if url.contains("missing") {
            return Err(LoadError::Glb("no such model".into()));
        }
        let at = |y: f32| Trs { translation: Vec3::new(0.0, y, 0.0), ..Trs::IDENTITY };
        Ok(ModelAsset {
            graph: SceneGraph {
                nodes: vec![
                    GraphNode { name: Some("J_Hips".into()), transform: at(1.0), children: vec![1] },
                    GraphNode { name: Some("J_Head".into()), transform: at(0.5), children: vec![] },
                ],
                roots: vec![0],
            },
            humanoid: if url.contains("headless") {
                HashMap::from([(HumanBone::Hips, 0)])
            } else {
                HashMap::from([(HumanBone::Hips, 0), (HumanBone::Head, 1)])
            },
        })
    }
}

impl AnimationLoader for Fakes {
    fn load(&self, url: &str) -> Result<Option<AnimationSource>, LoadError> {
        let duration = if url.contains("appearing") { 1.0 } else { 2.0 };
        Ok(Some(AnimationSource {
            name: Some(url.to_string()),
            duration,
            tracks: vec![Track {
                target: HumanBone::Hips,
                translation: None,
                rotation: Some(Channel {
                    times: vec![0.0, duration].into(),
                    values: vec![Quat::IDENTITY, Quat::from_rotation_y(0.5)].into(),
                    interpolation: Interpolation::Linear,
                }),
                scale: None,
            }],
        }))
    }
}

#[derive(Default)]
struct Recorder {
    frames: usize,
    sizes: Vec<SurfaceSize>,
    ratios: Vec<f64>,
}

struct RecordingRenderer(Arc<Mutex<Recorder>>);

impl Renderer for RecordingRenderer {
    fn set_pixel_ratio(&mut self, ratio: f64) {
        self.0.lock().unwrap().ratios.push(ratio);
    }

    fn set_size(&mut self, size: SurfaceSize) {
        self.0.lock().unwrap().sizes.push(size);
    }

    fn render(&mut self, _scene: &Scene, _camera: &PerspectiveCamera) -> Result<(), RenderError> {
        self.0.lock().unwrap().frames += 1;
        Ok(())
    }
}

struct FixedSurface {
    container: Option<SurfaceSize>,
    canvas: SurfaceSize,
}

impl RenderSurface for FixedSurface {
    fn container_size(&self) -> Option<SurfaceSize> {
        self.container
    }

    fn canvas_size(&self) -> SurfaceSize {
        self.canvas
    }

    fn pixel_ratio(&self) -> f64 {
        2.0
    }
}

struct Harness {
    viewer: Viewer,
    loader: LoaderEndpoint,
    settings: Arc<SharedSettings>,
    recorder: Arc<Mutex<Recorder>>,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let settings = Arc::new(SharedSettings::new(settings));
        let (channels, loader) = asset_channels();
        let viewer = Viewer::new(ViewerConfig::default(), settings.clone(), channels);
        Self {
            viewer,
            loader,
            settings,
            recorder: Arc::new(Mutex::new(Recorder::default())),
        }
    }

    fn ready(settings: Settings) -> Self {
        let mut harness = Self::new(settings);
        harness.setup(Some(SurfaceSize::new(800, 600)));
        harness
    }

    fn setup(&mut self, container: Option<SurfaceSize>) {
        let surface = FixedSurface { container, canvas: SurfaceSize::new(300, 150) };
        self.viewer
            .setup(Box::new(surface), Box::new(RecordingRenderer(self.recorder.clone())));
    }

    fn serve(&self) -> usize {
        self.loader.serve_pending(&Fakes, &Fakes)
    }

    fn take_requests(&self) -> Vec<LoadRequest> {
        self.loader.req_rx.try_iter().collect()
    }

    fn answer(&self, request: LoadRequest) {
        self.loader.res_tx.send(execute(request, &Fakes, &Fakes)).unwrap();
    }

    fn tick(&mut self, frames: usize) {
        for _ in 0..frames {
            self.viewer.tick(DT).unwrap();
        }
    }

    /// Loads `url` and answers everything queued so far, which leaves the new
    /// model's two clip requests waiting.
    fn attach(&mut self, url: &str) {
        self.viewer.load_vrm(url).unwrap();
        assert!(self.serve() >= 1);
        self.tick(1);
        assert_eq!(self.viewer.load_state(), LoadState::Ready);
    }

    fn camera_position(&self) -> Vec3 {
        self.viewer.camera().unwrap().position
    }

    fn target(&self) -> Vec3 {
        self.viewer.controls().unwrap().target
    }
}

fn clip_request(requests: &[LoadRequest], wanted: ClipRole) -> LoadRequest {
    requests
        .iter()
        .find(|r| matches!(r, LoadRequest::Animation { role, .. } if *role == wanted))
        .cloned()
        .unwrap()
}

fn assert_close(a: Vec3, b: Vec3) {
    assert!((a - b).length() < 1e-5, "{a} != {b}");
}

#[test]
fn setup_sizes_from_container_and_falls_back_to_canvas() {
    let mut h = Harness::new(Settings::default());
    h.setup(None);
    assert!(h.viewer.is_ready());
    {
        let recorder = h.recorder.lock().unwrap();
        assert_eq!(recorder.sizes, vec![SurfaceSize::new(300, 150)]);
        assert_eq!(recorder.ratios, vec![2.0]);
    }
    let camera = h.viewer.camera().unwrap();
    assert_eq!(camera.aspect, 2.0);
    assert_eq!(camera.position, Vec3::new(0.0, 1.3, 2.0));
    assert_eq!(h.target(), Vec3::new(0.0, 1.3, 0.0));

    // second setup is ignored
    h.setup(Some(SurfaceSize::new(10, 10)));
    assert_eq!(h.recorder.lock().unwrap().sizes.len(), 1);

    // no container to follow
    h.viewer.resize();
    assert_eq!(h.recorder.lock().unwrap().sizes.len(), 1);
}

#[test]
fn resize_follows_container() {
    let mut h = Harness::ready(Settings::default());
    h.viewer.resize();
    let recorder = h.recorder.lock().unwrap();
    assert_eq!(recorder.sizes.last(), Some(&SurfaceSize::new(800, 600)));
    assert!((h.viewer.camera().unwrap().aspect - 800.0 / 600.0).abs() < 1e-6);
}

#[test]
fn frames_render_only_after_setup() {
    let mut h = Harness::new(Settings::default());
    h.tick(3);
    h.setup(Some(SurfaceSize::new(640, 480)));
    h.tick(2);
    assert_eq!(h.recorder.lock().unwrap().frames, 2);
}

#[test]
fn reloading_keeps_a_single_model_attached() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    h.attach("/b.vrm");
    assert_eq!(h.viewer.scene().root_children().len(), 1);
    assert_eq!(h.viewer.model().unwrap().url, "/b.vrm");

    // back-to-back loads: only the latest one lands
    h.viewer.load_vrm("/c.vrm").unwrap();
    h.viewer.load_vrm("/d.vrm").unwrap();
    h.serve();
    h.tick(1);
    assert_eq!(h.viewer.scene().root_children().len(), 1);
    assert_eq!(h.viewer.model().unwrap().url, "/d.vrm");
}

#[test]
fn attached_model_is_offset_and_never_frustum_culled() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    let model = h.viewer.model().unwrap();
    let scene = h.viewer.scene();
    assert!((model.offset_x(scene) + 0.2).abs() < 1e-6);
    let culled = scene.nodes.iter().filter(|(_, n)| n.frustum_culled).count();
    // only the scene root keeps culling on
    assert_eq!(culled, 1);
}

#[test]
fn camera_levels_with_head_one_frame_after_attach() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    assert_close(h.camera_position(), Vec3::new(0.0, 1.3, 2.0));

    h.tick(1);
    assert_close(h.camera_position(), Vec3::new(0.0, 1.5, 2.0));
    // head x already includes the model offset, which is added once more
    assert_close(h.target(), Vec3::new(-0.4, 1.5, 0.0));
}

#[test]
fn camera_stays_put_without_head_bone() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/headless.vrm");
    h.tick(2);
    assert_close(h.camera_position(), Vec3::new(0.0, 1.3, 2.0));
    assert_close(h.target(), Vec3::new(0.0, 1.3, 0.0));
}

#[test]
fn locked_pose_wins_over_head_framing() {
    let saved = Settings {
        fixed_character_position: true,
        character_position: CharacterPosition { x: 0.5, y: 1.6, z: 3.0, scale: 1.0 },
        character_rotation: CharacterRotation { x: 0.1, y: 1.4, z: 0.0 },
        ..Settings::default()
    };
    let mut h = Harness::ready(saved);
    assert_close(h.camera_position(), Vec3::new(0.5, 1.6, 3.0));
    assert!(!h.viewer.controls().unwrap().enabled);

    h.attach("/a.vrm");
    h.tick(2);
    assert_close(h.camera_position(), Vec3::new(0.5, 1.6, 3.0));
    assert_close(h.target(), Vec3::new(0.1, 1.4, 0.0));
}

#[test]
fn locked_origin_pose_is_not_restored() {
    let mut h = Harness::ready(Settings { fixed_character_position: true, ..Settings::default() });
    assert_close(h.camera_position(), Vec3::new(0.0, 1.3, 2.0));
    h.viewer.restore_camera_position();
    assert_close(h.camera_position(), Vec3::new(0.0, 1.3, 2.0));
}

#[test]
fn save_then_restore_round_trips_and_keeps_scale() {
    let initial = Settings {
        character_position: CharacterPosition { scale: 2.5, ..CharacterPosition::default() },
        ..Settings::default()
    };
    let mut h = Harness::ready(initial);
    h.viewer.save_camera_position();
    let position = h.camera_position();
    let target = h.target();

    let stored = h.settings.get();
    assert_eq!(stored.character_position, CharacterPosition { x: position.x, y: position.y, z: position.z, scale: 2.5 });
    assert_eq!(stored.character_rotation, CharacterRotation { x: target.x, y: target.y, z: target.z });

    h.settings.set(SettingsPatch { fixed_character_position: Some(true), ..Default::default() });
    // move without finishing the drag so nothing is saved
    assert!(h.viewer.begin_camera_drag(DragMode::Pan));
    h.viewer.drag_camera(40.0, -25.0);
    assert!((h.camera_position() - position).length() > 1e-3);

    h.viewer.restore_camera_position();
    assert_close(h.camera_position(), position);
    assert_close(h.target(), target);
    assert_eq!(h.settings.get().character_position.scale, 2.5);
}

#[test]
fn finishing_a_drag_saves_only_while_unlocked() {
    let mut h = Harness::ready(Settings::default());
    assert!(h.viewer.begin_camera_drag(DragMode::Rotate));
    h.viewer.drag_camera(60.0, 0.0);
    h.viewer.end_camera_drag();
    let p = h.camera_position();
    assert_eq!(h.settings.get().character_position, CharacterPosition { x: p.x, y: p.y, z: p.z, scale: 1.0 });

    h.viewer.fix_camera_position();
    assert!(h.settings.get().fixed_character_position);
    assert!(!h.viewer.begin_camera_drag(DragMode::Rotate));
    h.viewer.dolly_camera(3.0);
    assert_close(h.camera_position(), p);

    h.viewer.unfix_camera_position();
    assert!(!h.settings.get().fixed_character_position);
    assert!(h.viewer.controls().unwrap().enabled);
    h.viewer.dolly_camera(3.0);
    let q = h.camera_position();
    assert!((q - p).length() > 1e-3);
    assert_eq!(h.settings.get().character_position, CharacterPosition { x: q.x, y: q.y, z: q.z, scale: 1.0 });
}

#[test]
fn reset_camera_position_clears_lock_and_reframes() {
    let saved = Settings {
        fixed_character_position: true,
        character_position: CharacterPosition { x: 0.5, y: 1.6, z: 3.0, scale: 4.0 },
        character_rotation: CharacterRotation { x: 0.1, y: 1.4, z: 0.0 },
        ..Settings::default()
    };
    let mut h = Harness::ready(saved);
    h.attach("/a.vrm");
    h.tick(1);

    h.viewer.reset_camera_position();
    let stored = h.settings.get();
    assert!(!stored.fixed_character_position);
    assert_eq!(stored.character_position, CharacterPosition::default());
    assert_eq!(stored.character_rotation, CharacterRotation::default());
    assert!(h.viewer.controls().unwrap().enabled);
    assert!((h.camera_position().y - 1.5).abs() < 1e-5);

    // same result from any starting state
    h.viewer.reset_camera_position();
    assert_eq!(*h.settings.get(), Settings { lighting_intensity: stored.lighting_intensity, ..Settings::default() });
}

#[test]
fn lighting_scales_both_lights() {
    let mut h = Harness::new(Settings::default());
    for s in [0.0, 0.5, 1.0, 3.0] {
        h.viewer.update_lighting_intensity(s);
        h.viewer.update_lighting_intensity(s);
        assert!((h.viewer.scene().directional_light.intensity - 1.8 * s).abs() < 1e-5);
        assert!((h.viewer.scene().ambient_light.intensity - 1.2 * s).abs() < 1e-5);
    }
}

#[test]
fn intro_then_default_when_intro_arrives_first() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    let requests = h.take_requests();
    assert_eq!(requests.len(), 2);

    h.answer(clip_request(&requests, ClipRole::Intro));
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingIntro);
    h.answer(clip_request(&requests, ClipRole::Default));
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingIntro);

    let intro = h.viewer.sequencer().intro_action().unwrap();
    let default = h.viewer.sequencer().default_action().unwrap();
    // intro lasts one second, the crossfade half of one
    h.tick(25);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingDefault);
    let mixer = &h.viewer.model().unwrap().mixer;
    assert!(!mixer.is_running(intro));
    assert!(mixer.is_running(default));

    h.tick(100);
    let mixer = &h.viewer.model().unwrap().mixer;
    assert!(mixer.is_running(default));
    assert!((mixer.effective_weight(default) - 1.0).abs() < 1e-6);
}

#[test]
fn default_alone_when_it_arrives_first() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    let requests = h.take_requests();

    h.answer(clip_request(&requests, ClipRole::Default));
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingDefault);
    h.answer(clip_request(&requests, ClipRole::Intro));
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingDefault);
    assert!(h.viewer.sequencer().intro_action().is_none());

    h.tick(50);
    let default = h.viewer.sequencer().default_action().unwrap();
    assert!(h.viewer.model().unwrap().mixer.is_running(default));
}

#[test]
fn default_arriving_after_intro_finished_still_starts() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    let requests = h.take_requests();

    h.answer(clip_request(&requests, ClipRole::Intro));
    h.tick(15);
    h.answer(clip_request(&requests, ClipRole::Default));
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::TransitioningToDefault);
    h.tick(6);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingDefault);
}

#[test]
fn play_default_cuts_the_intro_short() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    h.serve();
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingIntro);
    let intro = h.viewer.sequencer().intro_action().unwrap();

    assert!(h.viewer.play_default_animation());
    assert_eq!(h.viewer.animation_phase(), PhaseKind::TransitioningToDefault);
    assert!(!h.viewer.model().unwrap().mixer.is_running(intro));
    h.tick(6);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::PlayingDefault);

    // replays from the default phase go through the crossfade again
    assert!(h.viewer.play_default_animation());
    assert_eq!(h.viewer.animation_phase(), PhaseKind::TransitioningToDefault);
}

#[test]
fn clips_for_a_replaced_model_are_ignored() {
    let mut h = Harness::ready(Settings::default());
    h.attach("/a.vrm");
    let stale = h.take_requests();

    h.attach("/b.vrm");
    let _fresh = h.take_requests();
    for request in stale {
        h.answer(request);
    }
    h.tick(1);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::Idle);
    assert!(h.viewer.model().unwrap().mixer.is_empty());
}

#[test]
fn failed_model_load_is_reported_once() {
    let mut h = Harness::ready(Settings::default());
    h.viewer.load_vrm("/missing.vrm").unwrap();
    h.serve();
    match h.viewer.tick(DT) {
        Err(ViewerError::ModelLoad { url, .. }) => assert_eq!(url, "/missing.vrm"),
        other => panic!("expected load failure, got {other:?}"),
    }
    assert_eq!(h.viewer.load_state(), LoadState::Empty);
    assert!(h.viewer.tick(DT).is_ok());
    assert!(h.viewer.scene().root_children().is_empty());
}

#[test]
fn unload_is_idempotent() {
    let mut h = Harness::ready(Settings::default());
    let nodes_before = h.viewer.scene().nodes.len();
    h.viewer.unload_vrm();
    assert_eq!(h.viewer.scene().nodes.len(), nodes_before);

    h.attach("/a.vrm");
    assert_eq!(h.viewer.scene().root_children().len(), 1);
    h.viewer.unload_vrm();
    assert!(h.viewer.scene().root_children().is_empty());
    assert_eq!(h.viewer.scene().nodes.len(), nodes_before);
    h.viewer.unload_vrm();
    assert_eq!(h.viewer.scene().nodes.len(), nodes_before);
    assert_eq!(h.viewer.load_state(), LoadState::Empty);
    assert_eq!(h.viewer.animation_phase(), PhaseKind::Idle);
}
