// Runtime animation format

use std::{cmp::Ordering, collections::HashMap};

use glam::{Quat, Vec3};

use crate::{
    model::{HumanBone, Model},
    scene_tree::{SceneNodeId, Trs},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
}

#[derive(Clone, Debug)]
pub struct Channel<T> {
    pub times: Box<[f32]>,
    pub values: Box<[T]>,
    pub interpolation: Interpolation,
}

#[derive(Clone, Debug)]
pub struct Track<T> {
    pub target: T,
    pub translation: Option<Channel<Vec3>>,
    pub rotation: Option<Channel<Quat>>,
    pub scale: Option<Channel<Vec3>>,
}

/// Clip keyed by humanoid bone, reusable across models.
#[derive(Clone, Debug)]
pub struct AnimationSource {
    pub name: Option<String>,
    pub duration: f32,
    pub tracks: Vec<Track<HumanBone>>,
}

/// Clip bound to the nodes of one attached model.
#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: Option<String>,
    pub duration: f32,
    pub tracks: Vec<Track<SceneNodeId>>,
}

impl AnimationSource {
    /// Binds every track whose bone the model maps. Tracks for bones the model
    /// lacks are dropped.
    pub fn create_clip_for(&self, model: &Model) -> AnimationClip {
        let humanoid = model.humanoid();
        let tracks = self
            .tracks
            .iter()
            .filter_map(|track| {
                let node = humanoid.normalized_bone_node(track.target)?;
                Some(Track {
                    target: node,
                    translation: track.translation.clone(),
                    rotation: track.rotation.clone(),
                    scale: track.scale.clone(),
                })
            })
            .collect();
        AnimationClip {
            name: self.name.clone(),
            duration: self.duration,
            tracks,
        }
    }
}

fn bin_search_anim_indices(times: &[f32], val: f32) -> (usize, usize) {
    let n = times.len();
    if n <= 1 {
        return (0, 0);
    }

    match times.binary_search_by(|x| x.partial_cmp(&val).unwrap_or(Ordering::Greater)) {
        Ok(i) => (i, i),                    // exact hit, no blend
        Err(0) => (0, 0),                   // before first, clamp
        Err(i) if i >= n => (n - 1, n - 1), // after last, clamp
        Err(i) => (i - 1, i),               // between i-1 and i
    }
}

fn compute_keyframe_values<'a, T>(times: &[f32], values: &'a [T], t: f32) -> Option<(&'a T, &'a T, f32)> {
    if times.is_empty() || values.len() < times.len() {
        return None;
    }
    let (i0, i1) = bin_search_anim_indices(times, t);
    let (t0, t1) = (times[i0], times[i1]);
    let (v0, v1) = (&values[i0], &values[i1]);
    let alpha = if i0 == i1 || (t1 - t0).abs() < f32::EPSILON {
        0.0
    } else {
        (t - t0) / (t1 - t0) // normalized interpolation factor
    };
    Some((v0, v1, alpha))
}

fn sample_vec3(channel: &Channel<Vec3>, t: f32) -> Option<Vec3> {
    let (v0, v1, alpha) = compute_keyframe_values(&channel.times, &channel.values, t)?;
    Some(match channel.interpolation {
        Interpolation::Linear => v0.lerp(*v1, alpha),
        Interpolation::Step => *v0,
    })
}

fn sample_quat(channel: &Channel<Quat>, t: f32) -> Option<Quat> {
    let (v0, v1, alpha) = compute_keyframe_values(&channel.times, &channel.values, t)?;
    Some(match channel.interpolation {
        Interpolation::Linear => v0.slerp(*v1, alpha),
        Interpolation::Step => *v0,
    })
}

impl AnimationClip {
    /// Local transforms of every targeted node at `time`; channels a track
    /// lacks fall back to the node's rest transform.
    pub fn sample(&self, time: f32, rest_pose: &HashMap<SceneNodeId, Trs>) -> Vec<(SceneNodeId, Trs)> {
        self.tracks
            .iter()
            .map(|track| {
                let base = rest_pose.get(&track.target).copied().unwrap_or_default();
                let trs = Trs {
                    translation: track
                        .translation
                        .as_ref()
                        .and_then(|c| sample_vec3(c, time))
                        .unwrap_or(base.translation),
                    rotation: track
                        .rotation
                        .as_ref()
                        .and_then(|c| sample_quat(c, time))
                        .unwrap_or(base.rotation),
                    scale: track.scale.as_ref().and_then(|c| sample_vec3(c, time)).unwrap_or(base.scale),
                };
                (track.target, trs)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use generational_arena::Arena;

    use super::*;

    fn node() -> SceneNodeId {
        let mut arena = Arena::new();
        SceneNodeId(arena.insert(()))
    }

    #[test]
    fn indices_clamp_outside_and_bracket_inside() {
        let times = [0.0, 1.0, 2.0];
        assert_eq!(bin_search_anim_indices(&times, -1.0), (0, 0));
        assert_eq!(bin_search_anim_indices(&times, 1.0), (1, 1));
        assert_eq!(bin_search_anim_indices(&times, 1.5), (1, 2));
        assert_eq!(bin_search_anim_indices(&times, 5.0), (2, 2));
    }

    #[test]
    fn sample_interpolates_and_falls_back_to_rest() {
        let target = node();
        let rest = Trs { scale: Vec3::splat(2.0), ..Trs::IDENTITY };
        let clip = AnimationClip {
            name: None,
            duration: 1.0,
            tracks: vec![Track {
                target,
                translation: Some(Channel {
                    times: vec![0.0, 1.0].into(),
                    values: vec![Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)].into(),
                    interpolation: Interpolation::Linear,
                }),
                rotation: Some(Channel {
                    times: vec![0.0, 1.0].into(),
                    values: vec![Quat::IDENTITY, Quat::from_rotation_y(1.0)].into(),
                    interpolation: Interpolation::Step,
                }),
                scale: None,
            }],
        };
        let pose = clip.sample(0.25, &HashMap::from([(target, rest)]));
        assert_eq!(pose.len(), 1);
        let trs = pose[0].1;
        assert!((trs.translation - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
        assert_eq!(trs.rotation, Quat::IDENTITY);
        assert_eq!(trs.scale, Vec3::splat(2.0));
    }

    #[test]
    fn empty_channel_uses_rest() {
        let target = node();
        let clip = AnimationClip {
            name: None,
            duration: 0.0,
            tracks: vec![Track {
                target,
                translation: Some(Channel { times: vec![].into(), values: vec![].into(), interpolation: Interpolation::Linear }),
                rotation: None,
                scale: None,
            }],
        };
        let pose = clip.sample(0.0, &HashMap::new());
        assert_eq!(pose[0].1, Trs::IDENTITY);
    }
}
