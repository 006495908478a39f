pub mod clip;
pub mod mixer;
pub mod sequencer;

pub use clip::{AnimationClip, AnimationSource};
pub use mixer::{ActionId, AnimationMixer, Completion, CompletionState, LoopMode};
pub use sequencer::{AnimationPhase, AnimationSequencer, PhaseKind};
