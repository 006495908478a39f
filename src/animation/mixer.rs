use std::{
    collections::HashMap,
    sync::Arc,
};

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use generational_arena::{Arena, Index};
use glam::{Quat, Vec3};

use super::clip::AnimationClip;
use crate::scene_tree::{Scene, SceneNodeId, Trs};

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
pub struct ActionId(Index);

/// What happens when action time reaches the clip duration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    Once,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Finished,
    /// the action was stopped or discarded before it finished
    Cancelled,
}

/// Resolves once a play-once action reaches its end.
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<()>,
    state: CompletionState,
}
impl Completion {
    pub fn poll(&mut self) -> CompletionState {
        if self.state == CompletionState::Pending {
            self.state = match self.rx.try_recv() {
                Ok(()) => CompletionState::Finished,
                Err(TryRecvError::Empty) => CompletionState::Pending,
                Err(TryRecvError::Disconnected) => CompletionState::Cancelled,
            };
        }
        self.state
    }
}

#[derive(Clone, Copy, Debug)]
struct WeightFade {
    from: f32,
    to: f32,
    duration: f32,
    elapsed: f32,
}

struct Action {
    clip: Arc<AnimationClip>,
    loop_mode: LoopMode,
    clamp_when_finished: bool,
    time: f32,
    weight: f32,
    /// scheduled via play(), cleared by stop()
    playing: bool,
    /// holding the last frame after a clamped finish
    paused: bool,
    /// a finished fade-out disables the action
    enabled: bool,
    fade: Option<WeightFade>,
    completion: Option<Sender<()>>,
}

impl Action {
    fn new(clip: Arc<AnimationClip>) -> Self {
        Self {
            clip,
            loop_mode: LoopMode::Repeat,
            clamp_when_finished: false,
            time: 0.0,
            weight: 1.0,
            playing: false,
            paused: false,
            enabled: true,
            fade: None,
            completion: None,
        }
    }

    fn contributes(&self) -> bool {
        self.playing && self.enabled && self.weight > 0.0
    }

    fn advance(&mut self, dt: f32) {
        if let Some(fade) = &mut self.fade {
            fade.elapsed += dt;
            let t = if fade.duration <= f32::EPSILON { 1.0 } else { (fade.elapsed / fade.duration).min(1.0) };
            self.weight = fade.from + (fade.to - fade.from) * t;
            if t >= 1.0 {
                let faded_out = fade.to <= 0.0;
                self.fade = None;
                if faded_out {
                    self.enabled = false;
                }
            }
        }

        if !self.enabled || self.paused {
            return;
        }

        self.time += dt;
        let duration = self.clip.duration;
        match self.loop_mode {
            LoopMode::Repeat => {
                if duration > f32::EPSILON {
                    self.time = self.time.rem_euclid(duration);
                } else {
                    self.time = 0.0;
                }
            }
            LoopMode::Once => {
                if self.time >= duration {
                    self.time = duration;
                    if self.clamp_when_finished {
                        self.paused = true;
                    } else {
                        self.enabled = false;
                    }
                    if let Some(tx) = self.completion.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    }
}

/// Advances and blends the animation actions of one model.
#[derive(Default)]
pub struct AnimationMixer {
    actions: Arena<Action>,
}

impl AnimationMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clip_action(&mut self, clip: AnimationClip) -> ActionId {
        ActionId(self.actions.insert(Action::new(Arc::new(clip))))
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn set_loop(&mut self, id: ActionId, loop_mode: LoopMode) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.loop_mode = loop_mode;
        }
    }

    pub fn play(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.playing = true;
        }
    }

    /// Plays the action a single time, holding its final pose, and hands back
    /// a handle that resolves when it ends.
    pub fn play_once(&mut self, id: ActionId) -> Completion {
        let (tx, rx) = crossbeam::channel::bounded(1);
        if let Some(action) = self.actions.get_mut(id.0) {
            action.loop_mode = LoopMode::Once;
            action.clamp_when_finished = true;
            action.completion = Some(tx);
            action.playing = true;
        }
        // a missing action drops `tx` here, so the handle reads as cancelled
        Completion {
            rx,
            state: CompletionState::Pending,
        }
    }

    pub fn stop(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.playing = false;
            action.paused = false;
            action.enabled = true;
            action.time = 0.0;
            action.weight = 1.0;
            action.fade = None;
            action.completion = None;
        }
    }

    /// Rewinds to the start and cancels any fade, keeping the play state.
    pub fn reset(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.time = 0.0;
            action.paused = false;
            action.enabled = true;
            action.fade = None;
        }
    }

    pub fn fade_in(&mut self, id: ActionId, duration: f32) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.weight = 0.0;
            action.fade = Some(WeightFade { from: 0.0, to: 1.0, duration, elapsed: 0.0 });
        }
    }

    pub fn fade_out(&mut self, id: ActionId, duration: f32) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.fade = Some(WeightFade { from: action.weight, to: 0.0, duration, elapsed: 0.0 });
        }
    }

    pub fn remove(&mut self, id: ActionId) {
        self.actions.remove(id.0);
    }

    pub fn stop_all(&mut self) {
        self.actions.clear();
    }

    /// Playing and still advancing: not stopped, not faded out, not holding a
    /// finished pose.
    pub fn is_running(&self, id: ActionId) -> bool {
        self.actions
            .get(id.0)
            .map(|a| a.playing && a.enabled && !a.paused)
            .unwrap_or(false)
    }

    pub fn is_playing(&self, id: ActionId) -> bool {
        self.actions.get(id.0).map(|a| a.playing).unwrap_or(false)
    }

    pub fn effective_weight(&self, id: ActionId) -> f32 {
        self.actions
            .get(id.0)
            .filter(|a| a.contributes())
            .map(|a| a.weight)
            .unwrap_or(0.0)
    }

    pub fn time(&self, id: ActionId) -> Option<f32> {
        self.actions.get(id.0).map(|a| a.time)
    }

    pub fn update(&mut self, dt: f32) {
        for (_, action) in self.actions.iter_mut().filter(|(_, a)| a.playing) {
            action.advance(dt);
        }
    }

    /// Blends every contributing action into the scene. Nodes any action
    /// targets but nothing currently drives go back to `rest_pose`; when the
    /// total weight is below one the remainder comes from the rest pose too.
    pub fn apply_pose(&self, scene: &mut Scene, rest_pose: &HashMap<SceneNodeId, Trs>) {
        struct Accum {
            weight: f32,
            translation: Vec3,
            rotation: Quat,
            scale: Vec3,
        }

        let mut accum: HashMap<SceneNodeId, Accum> = HashMap::new();
        for (_, action) in self.actions.iter() {
            for track in &action.clip.tracks {
                accum.entry(track.target).or_insert(Accum {
                    weight: 0.0,
                    translation: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                    scale: Vec3::ZERO,
                });
            }
            if !action.contributes() {
                continue;
            }
            let w = action.weight;
            for (node, trs) in action.clip.sample(action.time, rest_pose) {
                let Some(acc) = accum.get_mut(&node) else { continue };
                let total = acc.weight + w;
                acc.rotation = if acc.weight == 0.0 { trs.rotation } else { acc.rotation.slerp(trs.rotation, w / total) };
                acc.translation += trs.translation * w;
                acc.scale += trs.scale * w;
                acc.weight = total;
            }
        }

        for (node_id, acc) in accum {
            let rest = rest_pose.get(&node_id).copied().unwrap_or_default();
            let blended = if acc.weight <= 0.0 {
                rest
            } else if acc.weight >= 1.0 {
                Trs {
                    translation: acc.translation / acc.weight,
                    rotation: acc.rotation,
                    scale: acc.scale / acc.weight,
                }
            } else {
                let remaining = 1.0 - acc.weight;
                Trs {
                    translation: acc.translation + rest.translation * remaining,
                    rotation: rest.rotation.slerp(acc.rotation, acc.weight),
                    scale: acc.scale + rest.scale * remaining,
                }
            };
            if let Some(node) = scene.get_mut(node_id) {
                node.transform = blended;
            }
        }
    }
}
