use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use glam::{Quat, Vec3};
use gltf::animation::{util::ReadOutputs, Interpolation as GltfInterpolation, Property};
use serde::Deserialize;

use crate::{
    animation::clip::{AnimationSource, Channel, Interpolation, Track},
    asset_loader::{AnimationLoader, ModelLoader},
    error::LoadError,
    model::{HumanBone, ModelAsset},
    scene_tree::{GraphNode, SceneGraph, Trs},
};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: &[u8; 4] = b"JSON";

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, LoadError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| LoadError::Glb(format!("truncated at byte {offset}")))
}

/// Returns the JSON document of a GLB container, or the whole input when it
/// is a plain `.gltf` file.
pub fn read_json_chunk(bytes: &[u8]) -> Result<&[u8], LoadError> {
    if bytes.first() == Some(&b'{') {
        return Ok(bytes);
    }
    if bytes.get(0..4) != Some(GLB_MAGIC.as_slice()) {
        return Err(LoadError::Glb("bad magic".to_string()));
    }
    let version = read_u32(bytes, 4)?;
    if version != 2 {
        return Err(LoadError::Glb(format!("unsupported container version {version}")));
    }
    let chunk_length = read_u32(bytes, 12)? as usize;
    if bytes.get(16..20) != Some(CHUNK_JSON.as_slice()) {
        return Err(LoadError::Glb("first chunk is not JSON".to_string()));
    }
    bytes
        .get(20..20 + chunk_length)
        .ok_or_else(|| LoadError::Glb("JSON chunk runs past end of file".to_string()))
}

#[derive(Deserialize, Debug, Default)]
struct Root {
    #[serde(default)]
    extensions: Extensions,
}

#[derive(Deserialize, Debug, Default)]
struct Extensions {
    #[serde(rename = "VRMC_vrm")]
    vrm1: Option<HumanoidExtension<HashMap<String, BoneNode>>>,
    #[serde(rename = "VRM")]
    vrm0: Option<HumanoidExtension<Vec<LegacyBone>>>,
    #[serde(rename = "VRMC_vrm_animation")]
    vrma: Option<HumanoidExtension<HashMap<String, BoneNode>>>,
}

#[derive(Deserialize, Debug)]
struct HumanoidExtension<B> {
    humanoid: Humanoid<B>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Humanoid<B> {
    human_bones: B,
}

#[derive(Deserialize, Debug)]
struct BoneNode {
    node: usize,
}

#[derive(Deserialize, Debug)]
struct LegacyBone {
    bone: String,
    node: Option<usize>,
}

/// Maps a 0.x bone name onto the 1.0 set. The 0.x thumb chain starts one
/// joint later, so its names shift down by one.
fn legacy_bone(name: &str) -> Option<HumanBone> {
    let renamed = match name {
        "leftThumbProximal" => "leftThumbMetacarpal",
        "leftThumbIntermediate" => "leftThumbProximal",
        "rightThumbProximal" => "rightThumbMetacarpal",
        "rightThumbIntermediate" => "rightThumbProximal",
        other => other,
    };
    renamed.parse().ok()
}

fn bone_map(entries: &HashMap<String, BoneNode>) -> HashMap<HumanBone, usize> {
    entries
        .iter()
        .filter_map(|(name, bone)| match name.parse::<HumanBone>() {
            Ok(b) => Some((b, bone.node)),
            Err(_) => {
                log::warn!("ignoring unknown humanoid bone {name}");
                None
            }
        })
        .collect()
}

fn humanoid_bones(json: &[u8]) -> Result<Option<HashMap<HumanBone, usize>>, LoadError> {
    let root: Root = serde_json::from_slice(json)?;
    if let Some(vrm) = root.extensions.vrm1 {
        return Ok(Some(bone_map(&vrm.humanoid.human_bones)));
    }
    if let Some(vrm) = root.extensions.vrm0 {
        let bones = vrm
            .humanoid
            .human_bones
            .iter()
            .filter_map(|b| Some((legacy_bone(&b.bone)?, b.node?)))
            .collect();
        return Ok(Some(bones));
    }
    Ok(root.extensions.vrma.map(|vrma| bone_map(&vrma.humanoid.human_bones)))
}

// indices come from the raw json, the document accessors assume a validated file
fn node_graph(document: &gltf::Document) -> SceneGraph {
    let json = document.as_json();
    let nodes = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            let children = json
                .nodes
                .get(node.index())
                .and_then(|n| n.children.as_ref())
                .map(|c| c.iter().map(|i| i.value()).collect())
                .unwrap_or_default();
            GraphNode {
                name: node.name().map(str::to_string),
                transform: Trs {
                    translation: Vec3::from(translation),
                    rotation: Quat::from_array(rotation),
                    scale: Vec3::from(scale),
                },
                children,
            }
        })
        .collect();
    let scene = json.scene.map(|i| i.value()).unwrap_or(0);
    let roots = json
        .scenes
        .get(scene)
        .map(|scene| scene.nodes.iter().map(|n| n.value()).collect())
        .unwrap_or_default();
    SceneGraph { nodes, roots }
}

pub fn parse_model(bytes: &[u8]) -> Result<ModelAsset, LoadError> {
    let humanoid = humanoid_bones(read_json_chunk(bytes)?)?.ok_or(LoadError::MissingHumanoid)?;
    let gltf = gltf::Gltf::from_slice_without_validation(bytes)?;
    let graph = node_graph(&gltf.document);
    graph.validate().map_err(LoadError::Glb)?;
    let node_count = graph.nodes.len();
    let humanoid = humanoid.into_iter().filter(|(_, idx)| *idx < node_count).collect();
    Ok(ModelAsset { graph, humanoid })
}

fn keyframes<T: Copy>(values: Vec<T>, interpolation: GltfInterpolation) -> (Box<[T]>, Interpolation) {
    match interpolation {
        GltfInterpolation::Linear => (values.into(), Interpolation::Linear),
        GltfInterpolation::Step => (values.into(), Interpolation::Step),
        // in-tangent, value, out-tangent per key
        GltfInterpolation::CubicSpline => (values.chunks(3).filter_map(|k| k.get(1).copied()).collect(), Interpolation::Linear),
    }
}

/// Reads the first animation of a `.vrma` file and keys its tracks by
/// humanoid bone. Returns `Ok(None)` when the file holds no animation.
pub fn parse_animation(bytes: &[u8]) -> Result<Option<AnimationSource>, LoadError> {
    let bones = humanoid_bones(read_json_chunk(bytes)?)?.ok_or(LoadError::MissingHumanoid)?;
    let node_to_bone: HashMap<usize, HumanBone> = bones.into_iter().map(|(b, n)| (n, b)).collect();

    let gltf = gltf::Gltf::from_slice_without_validation(bytes)?;
    let buffers = gltf::import_buffers(&gltf.document, None, gltf.blob.clone())?;
    let Some(anim) = gltf.document.animations().next() else {
        return Ok(None);
    };

    let mut tracks: HashMap<HumanBone, Track<HumanBone>> = HashMap::new();
    let mut duration = 0.0f32;
    for ch in anim.channels() {
        let target = ch.target();
        let Some(bone) = node_to_bone.get(&target.node().index()).copied() else {
            continue;
        };
        let rdr = ch.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let (Some(inputs), Some(outputs)) = (rdr.read_inputs(), rdr.read_outputs()) else {
            continue;
        };
        let times: Box<[f32]> = inputs.collect();
        if let Some(&last) = times.last() {
            duration = duration.max(last);
        }
        let interpolation = ch.sampler().interpolation();
        let track = tracks.entry(bone).or_insert_with(|| Track {
            target: bone,
            translation: None,
            rotation: None,
            scale: None,
        });
        match (target.property(), outputs) {
            (Property::Translation, ReadOutputs::Translations(it)) => {
                let (values, interpolation) = keyframes(it.map(Vec3::from).collect(), interpolation);
                track.translation = Some(Channel { times, values, interpolation });
            }
            (Property::Rotation, ReadOutputs::Rotations(it)) => {
                let values = it.into_f32().map(|v| Quat::from_array(v).normalize()).collect();
                let (values, interpolation) = keyframes(values, interpolation);
                track.rotation = Some(Channel { times, values, interpolation });
            }
            (Property::Scale, ReadOutputs::Scales(it)) => {
                let (values, interpolation) = keyframes(it.map(Vec3::from).collect(), interpolation);
                track.scale = Some(Channel { times, values, interpolation });
            }
            _ => {}
        }
    }

    let mut tracks: Vec<_> = tracks.into_values().collect();
    tracks.sort_by_key(|t| t.target);
    Ok(Some(AnimationSource {
        name: anim.name().map(str::to_string),
        duration,
        tracks,
    }))
}

/// Resolves asset URLs against a directory on disk.
#[derive(Clone, Debug)]
pub struct AssetRoot(pub PathBuf);
impl AssetRoot {
    pub fn resolve(&self, url: &str) -> PathBuf {
        self.0.join(url.trim_start_matches('/'))
    }

    fn read(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.resolve(url);
        fs::read(&path).map_err(|source| LoadError::Io { path, source })
    }
}

pub struct VrmModelLoader {
    root: AssetRoot,
}
impl VrmModelLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: AssetRoot(root.as_ref().to_path_buf()) }
    }
}
impl ModelLoader for VrmModelLoader {
    fn load(&self, url: &str) -> Result<ModelAsset, LoadError> {
        let asset = parse_model(&self.root.read(url)?)?;
        log::info!("loaded {url}: {} nodes, {} humanoid bones", asset.graph.nodes.len(), asset.humanoid.len());
        Ok(asset)
    }
}

pub struct VrmaAnimationLoader {
    root: AssetRoot,
}
impl VrmaAnimationLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: AssetRoot(root.as_ref().to_path_buf()) }
    }
}
impl AnimationLoader for VrmaAnimationLoader {
    fn load(&self, url: &str) -> Result<Option<AnimationSource>, LoadError> {
        parse_animation(&self.root.read(url)?)
    }
}
