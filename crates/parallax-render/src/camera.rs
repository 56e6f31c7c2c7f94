//! Camera model: orbit/fly poses reduced to eye/target, view and
//! projection matrix construction.
//!
//! Sign convention: the view matrix is right-handed (camera looks down
//! -Z in view space). The projection follows the OpenCV convention with
//! the Y axis flipped relative to OpenGL, so NDC (and therefore screen
//! space) has Y increasing *downward*. The footprint math in the
//! compositor assumes exactly this; dropping the flip renders a
//! correct-looking but mirrored footprint orientation.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

/// Per-frame camera pose: eye plus an optional explicit look-at target.
/// When the target is absent, the pose looks along `forward_hint`.
#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    pub eye: Vec3,
    pub target: Option<Vec3>,
    pub forward_hint: Vec3,
    pub up: Vec3,
}

impl CameraPose {
    pub fn looking_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye,
            target: Some(target),
            forward_hint: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }

    /// Effective look-at target (eye + forward axis when no explicit one).
    pub fn target(&self) -> Vec3 {
        self.target.unwrap_or(self.eye + self.forward_hint)
    }

    pub fn forward(&self) -> Vec3 {
        (self.target() - self.eye).normalize_or(Vec3::NEG_Z)
    }
}

/// Longer-lived interaction state, reducible to a [`CameraPose`].
#[derive(Clone, Copy, Debug)]
pub enum PoseStyle {
    /// Spherical coordinates around a target point.
    Orbit {
        target: Vec3,
        radius: f32,
        yaw: f32,
        pitch: f32,
    },
    /// Explicit eye position plus yaw/pitch heading.
    Fly { eye: Vec3, yaw: f32, pitch: f32 },
}

impl PoseStyle {
    pub fn pose(&self) -> CameraPose {
        match *self {
            Self::Orbit {
                target,
                radius,
                yaw,
                pitch,
            } => {
                let dir = Quat::from_rotation_y(yaw) * Quat::from_rotation_x(pitch) * Vec3::Z;
                CameraPose {
                    eye: target + dir * radius,
                    target: Some(target),
                    forward_hint: -dir,
                    up: Vec3::Y,
                }
            }
            Self::Fly { eye, yaw, pitch } => {
                let forward =
                    Quat::from_rotation_y(yaw) * Quat::from_rotation_x(pitch) * Vec3::NEG_Z;
                CameraPose {
                    eye,
                    target: None,
                    forward_hint: forward,
                    up: Vec3::Y,
                }
            }
        }
    }
}

/// Exponential damping toward a target value, frame-rate independent.
/// Interaction layers use this to smooth orbit/fly parameters.
pub fn damp(current: f32, target: f32, lambda: f32, dt: f32) -> f32 {
    target + (current - target) * (-lambda * dt).exp()
}

pub fn damp_vec3(current: Vec3, target: Vec3, lambda: f32, dt: f32) -> Vec3 {
    target + (current - target) * (-lambda * dt).exp()
}

/// Camera with projection parameters.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub pose: CameraPose,
    /// Vertical field of view, radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(pose: CameraPose) -> Self {
        Self {
            pose,
            fov_y: 60.0_f32.to_radians(),
            near: 0.01,
            far: 100.0,
        }
    }

    /// Right-handed world-to-view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.pose.eye, self.pose.target(), self.pose.up)
    }

    /// Perspective projection, OpenCV-style: Y flipped so NDC Y points
    /// down (see module docs).
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let f = 1.0 / (self.fov_y * 0.5).tan();
        let (near, far) = (self.near, self.far);
        Mat4::from_cols_array(&[
            f / aspect, 0.0, 0.0, 0.0,
            0.0, -f, 0.0, 0.0,
            0.0, 0.0, far / (near - far), -1.0,
            0.0, 0.0, near * far / (near - far), 0.0,
        ])
    }

    /// Focal lengths in pixels for the perspective Jacobian
    /// (square pixels: fx = fy).
    pub fn focal_lengths(&self, _width: u32, height: u32) -> (f32, f32) {
        let fy = height as f32 / (2.0 * (self.fov_y * 0.5).tan());
        (fy, fy)
    }
}

/// Camera uniform data for the GPU mirror pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 3],
    pub _pad0: f32,
    pub viewport: [f32; 2],
    pub focal: [f32; 2],
}

impl CameraUniform {
    pub fn from_camera(camera: &Camera, width: u32, height: u32) -> Self {
        let aspect = width as f32 / height as f32;
        let view = camera.view_matrix();
        let proj = camera.projection_matrix(aspect);
        let (fx, fy) = camera.focal_lengths(width, height);
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
            eye: camera.pose.eye.into(),
            _pad0: 0.0,
            viewport: [width as f32, height as f32],
            focal: [fx, fy],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn look_at_transforms_target_onto_view_axis() {
        let cam = Camera::new(CameraPose::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
        let v = cam.view_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.z, -5.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_flips_y_downward() {
        let cam = Camera::new(CameraPose::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
        // A point above the view axis, in front of the camera.
        let clip = cam.projection_matrix(1.0) * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.w > 0.0);
        // World-up maps to negative (downward) NDC Y under the OpenCV
        // convention.
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn orbit_pose_sits_at_radius() {
        let style = PoseStyle::Orbit {
            target: Vec3::new(1.0, 2.0, 3.0),
            radius: 4.0,
            yaw: 0.7,
            pitch: -0.3,
        };
        let pose = style.pose();
        assert_relative_eq!((pose.eye - Vec3::new(1.0, 2.0, 3.0)).length(), 4.0, epsilon = 1e-5);
        assert_eq!(pose.target(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn fly_pose_falls_back_to_forward_axis() {
        let style = PoseStyle::Fly {
            eye: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        };
        let pose = style.pose();
        assert!(pose.target.is_none());
        assert_relative_eq!(pose.forward().z, -1.0, epsilon = 1e-6);
        assert_relative_eq!(pose.target().z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn damping_converges_and_is_stable() {
        let mut v = 0.0;
        for _ in 0..200 {
            v = damp(v, 1.0, 8.0, 1.0 / 60.0);
        }
        assert_relative_eq!(v, 1.0, epsilon = 1e-4);
        assert_relative_eq!(damp(1.0, 1.0, 8.0, 0.016), 1.0, epsilon = 1e-6);
    }
}
