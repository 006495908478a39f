use std::{collections::HashMap, fmt, str::FromStr};

use crate::{
    animation::mixer::AnimationMixer,
    scene_tree::{Scene, SceneGraph, SceneNodeId, Trs},
};

macro_rules! human_bones {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Normalized humanoid bone names as used by VRM 1.0.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HumanBone {
            $($variant),*
        }

        impl HumanBone {
            pub const ALL: &'static [HumanBone] = &[$(HumanBone::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(HumanBone::$variant => $name),*
                }
            }
        }

        impl FromStr for HumanBone {
            type Err = UnknownBone;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(HumanBone::$variant),)*
                    _ => Err(UnknownBone(s.to_string())),
                }
            }
        }
    };
}

human_bones! {
    Hips => "hips",
    Spine => "spine",
    Chest => "chest",
    UpperChest => "upperChest",
    Neck => "neck",
    Head => "head",
    LeftEye => "leftEye",
    RightEye => "rightEye",
    Jaw => "jaw",
    LeftUpperLeg => "leftUpperLeg",
    LeftLowerLeg => "leftLowerLeg",
    LeftFoot => "leftFoot",
    LeftToes => "leftToes",
    RightUpperLeg => "rightUpperLeg",
    RightLowerLeg => "rightLowerLeg",
    RightFoot => "rightFoot",
    RightToes => "rightToes",
    LeftShoulder => "leftShoulder",
    LeftUpperArm => "leftUpperArm",
    LeftLowerArm => "leftLowerArm",
    LeftHand => "leftHand",
    RightShoulder => "rightShoulder",
    RightUpperArm => "rightUpperArm",
    RightLowerArm => "rightLowerArm",
    RightHand => "rightHand",
    LeftThumbMetacarpal => "leftThumbMetacarpal",
    LeftThumbProximal => "leftThumbProximal",
    LeftThumbDistal => "leftThumbDistal",
    LeftIndexProximal => "leftIndexProximal",
    LeftIndexIntermediate => "leftIndexIntermediate",
    LeftIndexDistal => "leftIndexDistal",
    LeftMiddleProximal => "leftMiddleProximal",
    LeftMiddleIntermediate => "leftMiddleIntermediate",
    LeftMiddleDistal => "leftMiddleDistal",
    LeftRingProximal => "leftRingProximal",
    LeftRingIntermediate => "leftRingIntermediate",
    LeftRingDistal => "leftRingDistal",
    LeftLittleProximal => "leftLittleProximal",
    LeftLittleIntermediate => "leftLittleIntermediate",
    LeftLittleDistal => "leftLittleDistal",
    RightThumbMetacarpal => "rightThumbMetacarpal",
    RightThumbProximal => "rightThumbProximal",
    RightThumbDistal => "rightThumbDistal",
    RightIndexProximal => "rightIndexProximal",
    RightIndexIntermediate => "rightIndexIntermediate",
    RightIndexDistal => "rightIndexDistal",
    RightMiddleProximal => "rightMiddleProximal",
    RightMiddleIntermediate => "rightMiddleIntermediate",
    RightMiddleDistal => "rightMiddleDistal",
    RightRingProximal => "rightRingProximal",
    RightRingIntermediate => "rightRingIntermediate",
    RightRingDistal => "rightRingDistal",
    RightLittleProximal => "rightLittleProximal",
    RightLittleIntermediate => "rightLittleIntermediate",
    RightLittleDistal => "rightLittleDistal",
}

impl fmt::Display for HumanBone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBone(pub String);

/// A loaded model that is not part of any scene yet.
#[derive(Debug, Clone, Default)]
pub struct ModelAsset {
    pub graph: SceneGraph,
    /// bone -> index into `graph.nodes`
    pub humanoid: HashMap<HumanBone, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Humanoid {
    bones: HashMap<HumanBone, SceneNodeId>,
}
impl Humanoid {
    pub fn normalized_bone_node(&self, bone: HumanBone) -> Option<SceneNodeId> {
        self.bones.get(&bone).copied()
    }

    pub fn bones(&self) -> impl Iterator<Item = (HumanBone, SceneNodeId)> + '_ {
        self.bones.iter().map(|(b, n)| (*b, *n))
    }
}

/// A model attached to a scene. It is removed from the scene only through
/// [`Model::unload`].
pub struct Model {
    pub url: String,
    root: SceneNodeId,
    humanoid: Humanoid,
    rest_pose: HashMap<SceneNodeId, Trs>,
    pub mixer: AnimationMixer,
}

impl Model {
    pub fn attach(url: &str, asset: &ModelAsset, scene: &mut Scene) -> Self {
        let (root, ids) = scene.attach_graph(&asset.graph, url);
        let bones = asset
            .humanoid
            .iter()
            .filter_map(|(bone, idx)| ids.get(*idx).map(|id| (*bone, *id)))
            .collect();
        let rest_pose = ids
            .iter()
            .zip(asset.graph.nodes.iter())
            .map(|(id, node)| (*id, node.transform))
            .collect();
        Self {
            url: url.to_string(),
            root,
            humanoid: Humanoid { bones },
            rest_pose,
            mixer: AnimationMixer::new(),
        }
    }

    pub fn scene_root(&self) -> SceneNodeId {
        self.root
    }

    pub fn humanoid(&self) -> &Humanoid {
        &self.humanoid
    }

    pub fn offset_x(&self, scene: &Scene) -> f32 {
        scene.get(self.root).map(|n| n.transform.translation.x).unwrap_or(0.0)
    }

    pub fn set_offset_x(&self, scene: &mut Scene, x: f32) {
        if let Some(node) = scene.get_mut(self.root) {
            node.transform.translation.x = x;
        }
    }

    /// Advances the mixer and writes the blended pose into the scene.
    pub fn update(&mut self, scene: &mut Scene, dt: f32) {
        self.mixer.update(dt);
        self.mixer.apply_pose(scene, &self.rest_pose);
    }

    /// Releases the animation state and removes the model's nodes from the
    /// scene. Returns the number of nodes removed.
    pub fn unload(mut self, scene: &mut Scene) -> usize {
        self.mixer.stop_all();
        scene.detach(self.root)
    }
}
