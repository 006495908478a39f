use generational_arena::{Arena, Index};
use glam::{Mat4, Quat, Vec3};

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
pub struct SceneNodeId(pub Index);
impl From<SceneNodeId> for Index {
    fn from(id: SceneNodeId) -> Index {
        id.0
    }
}

/// Local transform in SRT form
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trs {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}
impl Default for Trs {
    fn default() -> Self {
        Self::IDENTITY
    }
}
impl Trs {
    pub const IDENTITY: Trs = Trs {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Clone, Debug)]
pub struct DirectionalLight {
    pub color: [f32; 3],
    pub intensity: f32,
    /// points from the scene towards the light
    pub direction: Vec3,
}

#[derive(Clone, Debug)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<SceneNodeId>,
    pub children: Vec<SceneNodeId>,
    pub transform: Trs,
    /// renderers may skip a node whose bounds fall outside the view volume
    pub frustum_culled: bool,
}
impl Node {
    pub fn new(name: Option<String>, transform: Trs) -> Self {
        Self {
            name,
            parent: None,
            children: vec![],
            transform,
            frustum_culled: true,
        }
    }
}

/// Node hierarchy not yet attached to any scene. Children refer to other
/// entries by index.
#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    pub nodes: Vec<GraphNode>,
    pub roots: Vec<usize>,
}

impl SceneGraph {
    /// Checks that the entries form a forest: every child index exists, no
    /// entry has two parents and no entry is its own ancestor.
    pub fn validate(&self) -> Result<(), String> {
        let len = self.nodes.len();
        let mut parent: Vec<Option<usize>> = vec![None; len];
        for (idx, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                if child >= len {
                    return Err(format!("node {idx} lists missing child {child}"));
                }
                if let Some(other) = parent[child].replace(idx) {
                    return Err(format!("node {child} has two parents ({other} and {idx})"));
                }
            }
        }
        if let Some(root) = self.roots.iter().find(|&&r| r >= len || parent[r].is_some()) {
            return Err(format!("scene root {root} is missing or has a parent"));
        }

        // with single parents, only nodes on a cycle never reach a parentless ancestor
        let mut reached = vec![false; len];
        let mut stack: Vec<usize> = (0..len).filter(|&i| parent[i].is_none()).collect();
        while let Some(idx) = stack.pop() {
            reached[idx] = true;
            stack.extend(&self.nodes[idx].children);
        }
        match reached.iter().position(|r| !r) {
            Some(idx) => Err(format!("node {idx} is its own ancestor")),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GraphNode {
    pub name: Option<String>,
    pub transform: Trs,
    pub children: Vec<usize>,
}

/// A parent-to-child link in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneSegment {
    pub start: Vec3,
    pub end: Vec3,
    /// the child node's `frustum_culled` flag
    pub frustum_culled: bool,
}

pub struct Scene {
    pub root: SceneNodeId,
    pub nodes: Arena<Node>,
    pub directional_light: DirectionalLight,
    pub ambient_light: AmbientLight,
}

impl Scene {
    pub fn new(directional_light: DirectionalLight, ambient_light: AmbientLight) -> Self {
        let mut nodes = Arena::new();
        let root = SceneNodeId(nodes.insert(Node::new(Some("Scene".to_string()), Trs::IDENTITY)));
        Self {
            root,
            nodes,
            directional_light,
            ambient_light,
        }
    }

    pub fn get(&self, id: SceneNodeId) -> Option<&Node> {
        self.nodes.get(id.into())
    }

    pub fn get_mut(&mut self, id: SceneNodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.into())
    }

    pub fn contains(&self, id: SceneNodeId) -> bool {
        self.nodes.contains(id.into())
    }

    pub fn root_children(&self) -> &[SceneNodeId] {
        self.get(self.root).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Copies `graph` into the scene under a fresh container node that becomes
    /// a child of the scene root. Returns the container id and the scene id of
    /// every graph entry, in graph order.
    ///
    /// Every entry is linked exactly once, so the result is a tree even for a
    /// graph that fails [`SceneGraph::validate`]. Entries no root reaches hang
    /// off the container.
    pub fn attach_graph(&mut self, graph: &SceneGraph, name: &str) -> (SceneNodeId, Vec<SceneNodeId>) {
        let container = SceneNodeId(self.nodes.insert(Node::new(Some(name.to_string()), Trs::IDENTITY)));

        let ids: Vec<SceneNodeId> = graph
            .nodes
            .iter()
            .map(|node| SceneNodeId(self.nodes.insert(Node::new(node.name.clone(), node.transform))))
            .collect();

        let mut linked = vec![false; ids.len()];
        for start in graph.roots.iter().copied().chain(0..ids.len()) {
            if start >= ids.len() || linked[start] {
                continue;
            }
            linked[start] = true;
            self.link(container, ids[start]);
            let mut stack = vec![start];
            while let Some(idx) = stack.pop() {
                for &child in &graph.nodes[idx].children {
                    if child >= ids.len() || linked[child] {
                        continue;
                    }
                    linked[child] = true;
                    self.link(ids[idx], ids[child]);
                    stack.push(child);
                }
            }
        }
        self.link(self.root, container);

        (container, ids)
    }

    fn link(&mut self, parent: SceneNodeId, child: SceneNodeId) {
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Removes `id` and everything below it. Returns how many nodes went away;
    /// zero when `id` is stale or is the scene root.
    pub fn detach(&mut self, id: SceneNodeId) -> usize {
        if id == self.root || !self.contains(id) {
            return 0;
        }
        let parent = self.get(id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|&c| c != id);
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(next.into()) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        removed
    }

    /// Visits `from` and all its descendants, parents before children.
    pub fn traverse_mut(&mut self, from: SceneNodeId, mut f: impl FnMut(SceneNodeId, &mut Node)) {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get_mut(id) else { continue };
            f(id, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    pub fn world_transform(&self, id: SceneNodeId) -> Option<Mat4> {
        let mut node = self.get(id)?;
        let mut world = node.transform.to_matrix();
        while let Some(parent) = node.parent {
            node = self.get(parent)?;
            world = node.transform.to_matrix() * world;
        }
        Some(world)
    }

    pub fn world_position(&self, id: SceneNodeId) -> Option<Vec3> {
        self.world_transform(id).map(|m| m.transform_point3(Vec3::ZERO))
    }

    /// World-space line segments from every node below `from` to its parent.
    pub fn bone_segments(&self, from: SceneNodeId) -> Vec<BoneSegment> {
        let mut segments = vec![];
        let mut stack = vec![(from, self.world_transform(from).unwrap_or(Mat4::IDENTITY))];
        while let Some((id, world)) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            let start = world.transform_point3(Vec3::ZERO);
            for &child in &node.children {
                let Some(child_node) = self.get(child) else { continue };
                let child_world = world * child_node.transform.to_matrix();
                if id != from {
                    segments.push(BoneSegment {
                        start,
                        end: child_world.transform_point3(Vec3::ZERO),
                        frustum_culled: child_node.frustum_culled,
                    });
                }
                stack.push((child, child_world));
            }
        }
        segments
    }
}
