use super::{
    clip::AnimationClip,
    mixer::{ActionId, AnimationMixer, Completion, CompletionState, LoopMode},
};

// intro plays once and holds, then crossfades into the looping default
#[derive(Debug)]
pub enum AnimationPhase {
    /// nothing scheduled
    Idle,
    PlayingIntro {
        intro: ActionId,
        completion: Completion,
        /// default clip waiting for the intro to end
        pending_default: Option<ActionId>,
    },
    TransitioningToDefault {
        intro: ActionId,
        default: ActionId,
        /// seconds since the crossfade began
        elapsed: f32,
    },
    PlayingDefault {
        /// stopped, kept for replays
        intro: Option<ActionId>,
        default: ActionId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    Idle,
    PlayingIntro,
    TransitioningToDefault,
    PlayingDefault,
}

pub struct AnimationSequencer {
    phase: AnimationPhase,
    crossfade: f32,
}

impl AnimationSequencer {
    pub fn new(crossfade: f32) -> Self {
        Self {
            phase: AnimationPhase::Idle,
            crossfade: crossfade.max(0.0),
        }
    }

    pub fn kind(&self) -> PhaseKind {
        match self.phase {
            AnimationPhase::Idle => PhaseKind::Idle,
            AnimationPhase::PlayingIntro { .. } => PhaseKind::PlayingIntro,
            AnimationPhase::TransitioningToDefault { .. } => PhaseKind::TransitioningToDefault,
            AnimationPhase::PlayingDefault { .. } => PhaseKind::PlayingDefault,
        }
    }

    pub fn intro_action(&self) -> Option<ActionId> {
        match &self.phase {
            AnimationPhase::Idle => None,
            AnimationPhase::PlayingIntro { intro, .. } => Some(*intro),
            AnimationPhase::TransitioningToDefault { intro, .. } => Some(*intro),
            AnimationPhase::PlayingDefault { intro, .. } => *intro,
        }
    }

    pub fn default_action(&self) -> Option<ActionId> {
        match &self.phase {
            AnimationPhase::Idle => None,
            AnimationPhase::PlayingIntro { pending_default, .. } => *pending_default,
            AnimationPhase::TransitioningToDefault { default, .. } => Some(*default),
            AnimationPhase::PlayingDefault { default, .. } => Some(*default),
        }
    }

    /// Returns false when the clip was dropped because the default animation
    /// is already under way.
    pub fn intro_loaded(&mut self, mixer: &mut AnimationMixer, clip: AnimationClip) -> bool {
        if !matches!(self.phase, AnimationPhase::Idle) {
            log::debug!("intro clip arrived in {:?}, dropping it", self.kind());
            return false;
        }
        let intro = mixer.clip_action(clip);
        let completion = mixer.play_once(intro);
        self.phase = AnimationPhase::PlayingIntro {
            intro,
            completion,
            pending_default: None,
        };
        true
    }

    pub fn default_loaded(&mut self, mixer: &mut AnimationMixer, clip: AnimationClip) -> bool {
        let default = mixer.clip_action(clip);
        mixer.set_loop(default, LoopMode::Repeat);

        match std::mem::replace(&mut self.phase, AnimationPhase::Idle) {
            AnimationPhase::Idle => {
                mixer.play(default);
                self.phase = AnimationPhase::PlayingDefault { intro: None, default };
                true
            }
            AnimationPhase::PlayingIntro { intro, mut completion, pending_default } => {
                if let Some(previous) = pending_default {
                    mixer.remove(previous);
                }
                match completion.poll() {
                    CompletionState::Pending => {
                        self.phase = AnimationPhase::PlayingIntro {
                            intro,
                            completion,
                            pending_default: Some(default),
                        };
                    }
                    CompletionState::Finished => self.begin_transition(mixer, intro, default),
                    CompletionState::Cancelled => {
                        mixer.play(default);
                        self.phase = AnimationPhase::PlayingDefault { intro: Some(intro), default };
                    }
                }
                true
            }
            other => {
                log::debug!("default clip arrived while one is already active, dropping it");
                mixer.remove(default);
                self.phase = other;
                false
            }
        }
    }

    /// Call after the mixer has advanced by `dt`.
    pub fn tick(&mut self, mixer: &mut AnimationMixer, dt: f32) {
        match std::mem::replace(&mut self.phase, AnimationPhase::Idle) {
            AnimationPhase::PlayingIntro { intro, mut completion, pending_default: Some(default) } => {
                match completion.poll() {
                    CompletionState::Pending => {
                        self.phase = AnimationPhase::PlayingIntro {
                            intro,
                            completion,
                            pending_default: Some(default),
                        };
                    }
                    CompletionState::Finished => self.begin_transition(mixer, intro, default),
                    CompletionState::Cancelled => {
                        mixer.play(default);
                        self.phase = AnimationPhase::PlayingDefault { intro: Some(intro), default };
                    }
                }
            }
            AnimationPhase::TransitioningToDefault { intro, default, elapsed } => {
                let elapsed = elapsed + dt;
                if elapsed >= self.crossfade {
                    mixer.stop(intro);
                    self.phase = AnimationPhase::PlayingDefault { intro: Some(intro), default };
                } else {
                    self.phase = AnimationPhase::TransitioningToDefault { intro, default, elapsed };
                }
            }
            other => self.phase = other,
        }
    }

    /// Forces the switch to the default animation, restarting it if it is
    /// already playing. Returns false when there is no default clip yet.
    pub fn play_default(&mut self, mixer: &mut AnimationMixer) -> bool {
        match std::mem::replace(&mut self.phase, AnimationPhase::Idle) {
            AnimationPhase::PlayingIntro { intro, mut completion, pending_default: Some(default) } => {
                if completion.poll() == CompletionState::Pending {
                    mixer.stop(intro);
                }
                self.begin_transition(mixer, intro, default);
                true
            }
            AnimationPhase::TransitioningToDefault { intro, default, .. }
            | AnimationPhase::PlayingDefault { intro: Some(intro), default } => {
                self.begin_transition(mixer, intro, default);
                true
            }
            AnimationPhase::PlayingDefault { intro: None, default } => {
                mixer.reset(default);
                mixer.fade_in(default, self.crossfade);
                mixer.play(default);
                self.phase = AnimationPhase::PlayingDefault { intro: None, default };
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    fn begin_transition(&mut self, mixer: &mut AnimationMixer, intro: ActionId, default: ActionId) {
        mixer.fade_out(intro, self.crossfade);
        mixer.reset(default);
        mixer.fade_in(default, self.crossfade);
        mixer.play(default);
        if self.crossfade <= 0.0 {
            mixer.stop(intro);
            self.phase = AnimationPhase::PlayingDefault { intro: Some(intro), default };
        } else {
            self.phase = AnimationPhase::TransitioningToDefault { intro, default, elapsed: 0.0 };
        }
    }

    /// Stops and discards both actions.
    pub fn clear(&mut self, mixer: &mut AnimationMixer) {
        for id in [self.intro_action(), self.default_action()].into_iter().flatten() {
            mixer.stop(id);
            mixer.remove(id);
        }
        self.phase = AnimationPhase::Idle;
    }
}
