use std::f32::consts::PI;

use glam::{Mat3, Mat4, Quat, Vec3};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
]);

pub fn look_at_rotation(eye: Vec3, target: Vec3, world_up: Vec3) -> Quat {
    let forward = (target - eye).normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let up = (world_up - forward * world_up.dot(forward)).normalize_or_zero();
    if up == Vec3::ZERO {
        // looking straight along the up axis
        return Quat::from_rotation_arc(Vec3::NEG_Z, forward);
    }
    let right = forward.cross(up);

    // Camera looks down -Z
    Quat::from_mat3(&Mat3::from_cols(right, up, -forward))
}

#[derive(Clone, Debug)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub rotation: Quat,
    pub up: Vec3,
    /// deg
    pub fovy: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl PerspectiveCamera {
    pub fn new(fovy: f32, aspect: f32, znear: f32, zfar: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            up: Vec3::Y,
            fovy,
            aspect,
            znear,
            zfar,
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.rotation = look_at_rotation(self.position, target, self.up);
    }

    pub fn view_matrix(&self) -> Mat4 {
        let rot_inv = self.rotation.conjugate();
        Mat4::from_rotation_translation(rot_inv, -(rot_inv * self.position))
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fovy.to_radians(), self.aspect, self.znear, self.zfar)
    }

    pub fn view_proj(&self) -> Mat4 {
        OPENGL_TO_WGPU_MATRIX * self.projection_matrix() * self.view_matrix()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    Rotate,
    Pan,
}

/// Orbits the camera around `target`. Input is ignored while `enabled` is off.
#[derive(Clone, Debug)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enabled: bool,
    pub screen_space_panning: bool,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    drag: Option<DragMode>,
}

impl Default for OrbitControls {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            enabled: true,
            screen_space_panning: true,
            rotate_speed: 1.0,
            zoom_speed: 0.95,
            min_distance: 0.05,
            max_distance: f32::INFINITY,
            drag: None,
        }
    }
}

impl OrbitControls {
    pub fn new(target: Vec3) -> Self {
        Self { target, ..Default::default() }
    }

    pub fn dragging(&self) -> Option<DragMode> {
        self.drag
    }

    pub fn begin(&mut self, mode: DragMode) -> bool {
        if !self.enabled {
            return false;
        }
        self.drag = Some(mode);
        true
    }

    /// Finishes an interaction. Returns true if one was in progress, which is
    /// when the camera pose counts as manually adjusted.
    pub fn end(&mut self) -> bool {
        self.drag.take().is_some()
    }

    /// Applies a pointer move in pixels to whichever drag is active.
    pub fn drag_by(&mut self, camera: &mut PerspectiveCamera, dx: f32, dy: f32, viewport_height: f32) {
        match self.drag {
            Some(DragMode::Rotate) => self.rotate(camera, dx, dy, viewport_height),
            Some(DragMode::Pan) => self.pan(camera, dx, dy, viewport_height),
            None => (),
        }
    }

    pub fn rotate(&mut self, camera: &mut PerspectiveCamera, dx: f32, dy: f32, viewport_height: f32) {
        if !self.enabled || viewport_height <= 0.0 {
            return;
        }
        let offset = camera.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        theta -= 2.0 * PI * dx / viewport_height * self.rotate_speed;
        phi -= 2.0 * PI * dy / viewport_height * self.rotate_speed;
        phi = phi.clamp(1e-4, PI - 1e-4);

        let sin_phi = phi.sin();
        let offset = Vec3::new(
            radius * sin_phi * theta.sin(),
            radius * phi.cos(),
            radius * sin_phi * theta.cos(),
        );
        camera.position = self.target + offset;
        self.update(camera);
    }

    pub fn pan(&mut self, camera: &mut PerspectiveCamera, dx: f32, dy: f32, viewport_height: f32) {
        if !self.enabled || viewport_height <= 0.0 {
            return;
        }
        let distance = (camera.position - self.target).length() * (camera.fovy.to_radians() / 2.0).tan();
        let right = camera.rotation * Vec3::X;
        let up = if self.screen_space_panning {
            camera.rotation * Vec3::Y
        } else {
            camera.up.cross(right).normalize_or_zero()
        };
        let pan = right * (-2.0 * dx * distance / viewport_height) + up * (2.0 * dy * distance / viewport_height);
        camera.position += pan;
        self.target += pan;
        self.update(camera);
    }

    /// Positive `steps` move towards the target.
    pub fn dolly(&mut self, camera: &mut PerspectiveCamera, steps: f32) {
        if !self.enabled {
            return;
        }
        let offset = camera.position - self.target;
        let radius = (offset.length() * self.zoom_speed.powf(steps)).clamp(self.min_distance, self.max_distance);
        camera.position = self.target + offset.normalize_or_zero() * radius;
        self.update(camera);
    }

    pub fn update(&self, camera: &mut PerspectiveCamera) {
        camera.look_at(self.target);
    }
}
