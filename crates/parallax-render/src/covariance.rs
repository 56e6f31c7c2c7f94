//! 3D Gaussian covariance construction and perspective projection to a
//! 2D screen-space footprint.

use glam::{Mat3, Quat, Vec3};

/// Low-pass term added to both diagonal entries of the screen covariance
/// so every splat covers at least a fraction of a pixel.
pub const LOW_PASS_FILTER: f32 = 0.3;

/// Determinant threshold below which a footprint is degenerate.
const MIN_DETERMINANT: f32 = 1e-6;

/// Symmetric 2x2 screen-space covariance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cov2 {
    pub xx: f32,
    pub xy: f32,
    pub yy: f32,
}

impl Cov2 {
    pub fn determinant(&self) -> f32 {
        self.xx * self.yy - self.xy * self.xy
    }
}

/// World-space covariance `Σ = R·S·Sᵗ·Rᵗ` from axis scales and a unit
/// rotation quaternion. S is diagonal, so R·S just scales the columns
/// of R.
pub fn covariance_3d(scale: Vec3, rotation: Quat) -> Mat3 {
    let r = Mat3::from_quat(rotation);
    let rs = Mat3::from_cols(r.col(0) * scale.x, r.col(1) * scale.y, r.col(2) * scale.z);
    rs * rs.transpose()
}

/// Project a world-space covariance to screen space.
///
/// The perspective projection is linearized at the splat's view-space
/// depth with the usual Jacobian; `cov2D = (J·W)·Σ·(J·W)ᵗ` where `W` is
/// the view rotation. The low-pass term is added to the diagonal before
/// returning. `view_pos.z` must be negative (in front of the camera).
pub fn project_covariance(
    cov3: Mat3,
    view_rot: Mat3,
    view_pos: Vec3,
    focal_x: f32,
    focal_y: f32,
) -> Cov2 {
    let z = -view_pos.z;
    let z2 = z * z;

    // J = | fx/z   0   -fx·x/z² |
    //     |  0   fy/z  -fy·y/z² |
    // T = J·W, kept as two row vectors.
    let t0 = view_rot.row(0) * (focal_x / z) + view_rot.row(2) * (-focal_x * view_pos.x / z2);
    let t1 = view_rot.row(1) * (focal_y / z) + view_rot.row(2) * (-focal_y * view_pos.y / z2);

    let s_t0 = cov3 * t0;
    let s_t1 = cov3 * t1;
    Cov2 {
        xx: t0.dot(s_t0) + LOW_PASS_FILTER,
        xy: t0.dot(s_t1),
        yy: t1.dot(s_t1) + LOW_PASS_FILTER,
    }
}

/// Invert the screen covariance to conic form `(a, b, c)`, evaluated per
/// fragment as `exp(-½(a·dx² + 2b·dx·dy + c·dy²))`.
///
/// Returns `None` for a non-positive determinant: the footprint is
/// degenerate and the splat contributes nothing.
pub fn conic(cov: Cov2) -> Option<Vec3> {
    let det = cov.determinant();
    if det <= MIN_DETERMINANT {
        return None;
    }
    let inv = 1.0 / det;
    Some(Vec3::new(cov.yy * inv, -cov.xy * inv, cov.xx * inv))
}

/// Eigenvalues of the symmetric screen covariance, larger first.
pub fn eigenvalues(cov: Cov2) -> (f32, f32) {
    let mid = 0.5 * (cov.xx + cov.yy);
    let disc = (mid * mid - cov.determinant()).max(0.0).sqrt();
    (mid + disc, mid - disc)
}

/// Screen-space bounding radius in pixels: `ceil(3·sqrt(λ1))`, the 99.7%
/// containment radius along the major axis.
pub fn footprint_radius(cov: Cov2) -> f32 {
    let (lambda1, _) = eigenvalues(cov);
    (3.0 * lambda1.max(0.0).sqrt()).ceil()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_sphere_covariance_is_identity() {
        let cov = covariance_3d(Vec3::ONE, Quat::IDENTITY);
        assert_relative_eq!(cov.col(0).x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(1).y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(2).z, 1.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(0).y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn anisotropic_covariance_squares_the_scales() {
        let cov = covariance_3d(Vec3::new(2.0, 1.0, 0.5), Quat::IDENTITY);
        assert_relative_eq!(cov.col(0).x, 4.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(1).y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(2).z, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn rotation_preserves_symmetry_and_trace() {
        let q = Quat::from_rotation_z(0.8);
        let cov = covariance_3d(Vec3::new(3.0, 1.0, 1.0), q);
        let t = cov.transpose();
        for c in 0..3 {
            for r in 0..3 {
                assert_relative_eq!(cov.col(c)[r], t.col(c)[r], epsilon = 1e-5);
            }
        }
        // Trace is rotation invariant: 9 + 1 + 1.
        assert_relative_eq!(cov.col(0).x + cov.col(1).y + cov.col(2).z, 11.0, epsilon = 1e-4);
    }

    #[test]
    fn projection_adds_low_pass_to_diagonal() {
        // Zero covariance still yields the minimum footprint.
        let cov = project_covariance(
            Mat3::ZERO,
            Mat3::IDENTITY,
            Vec3::new(0.0, 0.0, -5.0),
            500.0,
            500.0,
        );
        assert_relative_eq!(cov.xx, LOW_PASS_FILTER, epsilon = 1e-6);
        assert_relative_eq!(cov.yy, LOW_PASS_FILTER, epsilon = 1e-6);
        assert_relative_eq!(cov.xy, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn on_axis_projection_scales_by_focal_over_depth() {
        // Unit-variance Gaussian on the view axis at depth z: screen
        // variance is (f/z)² plus the low-pass term.
        let cov = project_covariance(
            Mat3::IDENTITY,
            Mat3::IDENTITY,
            Vec3::new(0.0, 0.0, -10.0),
            500.0,
            500.0,
        );
        let expected = (500.0f32 / 10.0).powi(2) + LOW_PASS_FILTER;
        assert_relative_eq!(cov.xx, expected, epsilon = 1e-2);
        assert_relative_eq!(cov.yy, expected, epsilon = 1e-2);
    }

    #[test]
    fn conic_inverts_diagonal_covariance() {
        let c = conic(Cov2 {
            xx: 4.0,
            xy: 0.0,
            yy: 1.0,
        })
        .unwrap();
        assert_relative_eq!(c.x, 0.25, epsilon = 1e-6);
        assert_relative_eq!(c.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_determinant_is_culled() {
        assert!(conic(Cov2 {
            xx: 1.0,
            xy: 1.0,
            yy: 1.0,
        })
        .is_none());
        assert!(conic(Cov2 {
            xx: 0.0,
            xy: 0.0,
            yy: 0.0,
        })
        .is_none());
    }

    #[test]
    fn footprint_radius_is_ceiled_three_sigma() {
        let cov = Cov2 {
            xx: 4.0,
            xy: 0.0,
            yy: 1.0,
        };
        // 3 * sqrt(4) = 6, already integral.
        assert_relative_eq!(footprint_radius(cov), 6.0);
        let cov = Cov2 {
            xx: 2.0,
            xy: 0.0,
            yy: 1.0,
        };
        // 3 * sqrt(2) = 4.24… -> 5.
        assert_relative_eq!(footprint_radius(cov), 5.0);
    }
}
