//! Per-frame projection and back-to-front compositing.
//!
//! Each splat's 3D covariance is projected to a screen-space ellipse
//! once per frame; fragments inside the footprint evaluate the Gaussian
//! in conic form, are graded (exposure, vignette, filmic tone map,
//! gamma, in that order) and alpha-blended over the frame in the depth
//! sorter's farthest-first order.

use glam::{Mat3, Quat, Vec2, Vec3, Vec4Swizzles};
use parallax_data::SplatSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::covariance;
use crate::sh;

/// Fragments below this alpha contribute nothing and are discarded.
pub const MIN_ALPHA: f32 = 1.0 / 255.0;
/// Alpha ceiling; a fully saturated Gaussian never quite occludes.
pub const MAX_ALPHA: f32 = 0.99;

/// Color grading parameters, applied per fragment in a fixed order:
/// exposure, vignette, ACES tone map, gamma.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Stops; color is scaled by `2^exposure`.
    pub exposure: f32,
    /// Vignette depth in [0, 1], smoothstep falloff from the footprint
    /// center to its bounding radius.
    pub vignette_strength: f32,
    pub gamma: f32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            vignette_strength: 0.2,
            gamma: 2.2,
        }
    }
}

/// A splat projected to screen space, ready for fragment evaluation.
#[derive(Clone, Copy, Debug)]
pub struct ProjectedSplat {
    pub center: Vec2,
    /// Inverted 2x2 screen covariance (a, b, c).
    pub conic: Vec3,
    /// Bounding radius in pixels (3-sigma, ceiled).
    pub radius: f32,
    pub color: Vec3,
    pub opacity: f32,
}

/// Simple linear-RGB frame buffer.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pixels: Vec<Vec3>,
}

impl Frame {
    pub fn new(width: u32, height: u32, background: Vec3) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; (width * height) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Pack to 8-bit RGBA rows (alpha 255).
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for p in &self.pixels {
            out.push((p.x.clamp(0.0, 1.0) * 255.0).round() as u8);
            out.push((p.y.clamp(0.0, 1.0) * 255.0).round() as u8);
            out.push((p.z.clamp(0.0, 1.0) * 255.0).round() as u8);
            out.push(255);
        }
        out
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// ACES filmic tone mapping approximation.
fn aces(c: Vec3) -> Vec3 {
    let num = c * (2.51 * c + Vec3::splat(0.03));
    let den = c * (2.43 * c + Vec3::splat(0.59)) + Vec3::splat(0.14);
    (num / den).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Grade a fragment color. `r_norm` is the fragment's distance from the
/// footprint center divided by the bounding radius.
pub fn grade(color: Vec3, r_norm: f32, cfg: &GradingConfig) -> Vec3 {
    let c = color * cfg.exposure.exp2();
    let c = c * (1.0 - cfg.vignette_strength * smoothstep(0.0, 1.0, r_norm));
    let c = aces(c);
    c.powf(1.0 / cfg.gamma)
}

/// Gaussian fragment evaluation in conic form. Returns the fragment
/// alpha, or `None` when the fragment is discarded (`power > 0` outside
/// the quadratic, or alpha below [`MIN_ALPHA`]).
pub fn fragment_alpha(conic: Vec3, opacity: f32, d: Vec2) -> Option<f32> {
    let power = -0.5 * (conic.x * d.x * d.x + conic.z * d.y * d.y) - conic.y * d.x * d.y;
    if power > 0.0 {
        return None;
    }
    let alpha = (opacity * power.exp()).min(MAX_ALPHA);
    if alpha < MIN_ALPHA {
        return None;
    }
    Some(alpha)
}

/// Project every splat of a set for the current camera. The result is
/// indexed by splat index so a visibility permutation can address it
/// directly; `None` entries were culled.
pub fn project_splats(
    set: &SplatSet,
    camera: &Camera,
    width: u32,
    height: u32,
) -> Vec<Option<ProjectedSplat>> {
    let aspect = width as f32 / height as f32;
    let view = camera.view_matrix();
    let proj = camera.projection_matrix(aspect);
    let view_rot = Mat3::from_mat4(view);
    let (focal_x, focal_y) = camera.focal_lengths(width, height);
    let eye = camera.pose.eye;

    let splats = set.splats();
    let sh_blocks = set.sh();

    splats
        .par_iter()
        .enumerate()
        .map(|(i, splat)| {
            let pos = Vec3::from(splat.pos);
            let view_pos = view.transform_point3(pos);
            // Behind (or on) the camera plane.
            if view_pos.z >= -1e-4 {
                return None;
            }

            let q = Quat::from_xyzw(
                splat.rotation[0],
                splat.rotation[1],
                splat.rotation[2],
                splat.rotation[3],
            );
            let cov3 = covariance::covariance_3d(Vec3::from(splat.scale), q);
            let cov2 = covariance::project_covariance(cov3, view_rot, view_pos, focal_x, focal_y);
            let conic = covariance::conic(cov2)?;
            let radius = covariance::footprint_radius(cov2);

            let clip = proj * view_pos.extend(1.0);
            if clip.w <= 0.0 {
                return None;
            }
            let ndc = clip.xyz() / clip.w;
            // The projection already flips Y, so both axes map directly.
            let center = Vec2::new(
                (ndc.x * 0.5 + 0.5) * width as f32,
                (ndc.y * 0.5 + 0.5) * height as f32,
            );
            // A non-finite center (NaN input data) would defeat the cull
            // comparisons below.
            if !center.is_finite() {
                return None;
            }
            if center.x + radius < 0.0
                || center.x - radius > width as f32
                || center.y + radius < 0.0
                || center.y - radius > height as f32
            {
                return None;
            }

            let mut color = Vec3::from(splat.color);
            if let Some(blocks) = sh_blocks {
                let dir = (eye - pos).normalize_or(Vec3::Z);
                color = (color + sh::eval(&blocks[i], dir)).clamp(Vec3::ZERO, Vec3::ONE);
            }

            Some(ProjectedSplat {
                center,
                conic,
                radius,
                color,
                opacity: splat.opacity,
            })
        })
        .collect()
}

/// Render a full frame: project, then composite back-to-front in the
/// given visibility order. Rendering with the identity order is
/// acceptable only as a transient fallback before the first sort pass
/// publishes.
pub fn render(
    set: &SplatSet,
    order: &[u32],
    camera: &Camera,
    width: u32,
    height: u32,
    grading: &GradingConfig,
    background: Vec3,
) -> Frame {
    let mut frame = Frame::new(width, height, background);
    if set.is_empty() || width == 0 || height == 0 {
        return frame;
    }

    let projected = project_splats(set, camera, width, height);

    for &index in order {
        let Some(splat) = projected.get(index as usize).copied().flatten() else {
            continue;
        };

        let x0 = (splat.center.x - splat.radius).floor().max(0.0) as u32;
        let y0 = (splat.center.y - splat.radius).floor().max(0.0) as u32;
        let x1 = ((splat.center.x + splat.radius).ceil() as u32).min(width.saturating_sub(1));
        let y1 = ((splat.center.y + splat.radius).ceil() as u32).min(height.saturating_sub(1));

        for y in y0..=y1 {
            for x in x0..=x1 {
                let d = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - splat.center;
                let Some(alpha) = fragment_alpha(splat.conic, splat.opacity, d) else {
                    continue;
                };
                let r_norm = d.length() / splat.radius.max(1.0);
                let color = grade(splat.color, r_norm, grading);
                let dst = &mut frame.pixels[(y * width + x) as usize];
                *dst = color * alpha + *dst * (1.0 - alpha);
            }
        }
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraPose;
    use parallax_data::Splat;

    fn test_camera() -> Camera {
        Camera::new(CameraPose::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO))
    }

    fn single_splat_set(opacity: f32) -> SplatSet {
        SplatSet::new(
            vec![Splat::sphere([0.0, 0.0, 0.0], 0.5, [1.0, 0.0, 0.0], opacity)],
            None,
        )
    }

    #[test]
    fn empty_set_renders_background_only() {
        let set = SplatSet::new(vec![], None);
        let frame = render(
            &set,
            &[],
            &test_camera(),
            8,
            8,
            &GradingConfig::default(),
            Vec3::splat(0.25),
        );
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(frame.pixel(x, y), Vec3::splat(0.25));
            }
        }
    }

    #[test]
    fn centered_splat_touches_center_pixel() {
        let set = single_splat_set(1.0);
        let grading = GradingConfig {
            vignette_strength: 0.0,
            ..Default::default()
        };
        let frame = render(&set, &[0], &test_camera(), 64, 64, &grading, Vec3::ZERO);
        let center = frame.pixel(32, 32);
        assert!(center.x > 0.1, "red splat should cover the center");
        assert!(center.x > center.z);
    }

    #[test]
    fn zero_sized_viewport_renders_nothing() {
        // Degenerate viewports must not reach the fragment loop.
        let set = single_splat_set(1.0);
        let cam = test_camera();
        let grading = GradingConfig::default();
        for (w, h) in [(0, 0), (0, 32), (32, 0)] {
            let frame = render(&set, &[0], &cam, w, h, &grading, Vec3::ZERO);
            assert_eq!((frame.width, frame.height), (w, h));
        }
    }

    #[test]
    fn non_finite_position_is_culled() {
        let set = SplatSet::new(
            vec![Splat::sphere([f32::NAN, 0.0, 0.0], 0.5, [1.0, 1.0, 1.0], 1.0)],
            None,
        );
        let projected = project_splats(&set, &test_camera(), 32, 32);
        assert!(projected[0].is_none());
    }

    #[test]
    fn splat_behind_camera_is_culled() {
        let set = SplatSet::new(
            vec![Splat::sphere([0.0, 0.0, 10.0], 0.5, [1.0, 1.0, 1.0], 1.0)],
            None,
        );
        let frame = render(
            &set,
            &[0],
            &test_camera(),
            16,
            16,
            &GradingConfig::default(),
            Vec3::ZERO,
        );
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(frame.pixel(x, y), Vec3::ZERO);
            }
        }
    }

    #[test]
    fn sub_threshold_alpha_never_contributes() {
        // Opacity below 1/255 cannot produce a visible fragment.
        let set = single_splat_set(1.0e-4);
        let frame = render(
            &set,
            &[0],
            &test_camera(),
            32,
            32,
            &GradingConfig::default(),
            Vec3::ZERO,
        );
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(frame.pixel(x, y), Vec3::ZERO);
            }
        }
    }

    #[test]
    fn fragment_discards_outside_quadratic_and_below_min_alpha() {
        let conic = Vec3::new(1.0, 0.0, 1.0);
        // Center fragment: full opacity survives.
        assert!(fragment_alpha(conic, 0.9, Vec2::ZERO).is_some());
        // Far from center the Gaussian has decayed below 1/255.
        assert!(fragment_alpha(conic, 0.9, Vec2::new(10.0, 0.0)).is_none());
        // Alpha is capped.
        assert!(fragment_alpha(conic, 5.0, Vec2::ZERO).unwrap() <= MAX_ALPHA);
    }

    #[test]
    fn compositing_respects_visibility_order() {
        // Two coincident splats: whichever is drawn last dominates.
        let red = Splat::sphere([0.0, 0.0, 0.0], 0.5, [1.0, 0.0, 0.0], 0.9);
        let blue = Splat::sphere([0.0, 0.0, 0.01], 0.5, [0.0, 0.0, 1.0], 0.9);
        let set = SplatSet::new(vec![red, blue], None);
        let grading = GradingConfig {
            vignette_strength: 0.0,
            ..Default::default()
        };
        let cam = test_camera();

        let blue_last = render(&set, &[0, 1], &cam, 64, 64, &grading, Vec3::ZERO);
        let red_last = render(&set, &[1, 0], &cam, 64, 64, &grading, Vec3::ZERO);

        let a = blue_last.pixel(32, 32);
        let b = red_last.pixel(32, 32);
        assert!(a.z > a.x, "blue drawn last should win: {a:?}");
        assert!(b.x > b.z, "red drawn last should win: {b:?}");
    }

    #[test]
    fn exposure_raises_brightness() {
        let base = grade(Vec3::splat(0.2), 0.0, &GradingConfig::default());
        let brighter = grade(
            Vec3::splat(0.2),
            0.0,
            &GradingConfig {
                exposure: 1.0,
                ..Default::default()
            },
        );
        assert!(brighter.x > base.x);
    }

    #[test]
    fn vignette_darkens_footprint_edge() {
        let cfg = GradingConfig {
            vignette_strength: 0.5,
            ..Default::default()
        };
        let center = grade(Vec3::splat(0.5), 0.0, &cfg);
        let edge = grade(Vec3::splat(0.5), 1.0, &cfg);
        assert!(edge.x < center.x);
    }

    #[test]
    fn grading_output_stays_in_unit_range() {
        let c = grade(Vec3::splat(100.0), 0.0, &GradingConfig::default());
        assert!(c.max_element() <= 1.0);
        assert!(c.min_element() >= 0.0);
    }
}
