//! Real spherical harmonics evaluation, bands 1-3.
//!
//! Band 0 is folded into the base color at decode time; this module only
//! evaluates the 15 higher-band basis functions for view-dependent color.
//! Coefficients are stored channel-major in the container's `f_rest`
//! order: `block[channel * 15 + k]` with k 0-2 band 1, 3-7 band 2,
//! 8-14 band 3.

use glam::Vec3;
use parallax_data::ShBlock;

const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_57, -1.092_548_4, 0.546_274_2];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// The 15 band 1-3 basis values at a unit direction.
fn basis(dir: Vec3) -> [f32; 15] {
    let (x, y, z) = (dir.x, dir.y, dir.z);
    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, yz, xz) = (x * y, y * z, x * z);
    [
        // band 1
        -SH_C1 * y,
        SH_C1 * z,
        -SH_C1 * x,
        // band 2
        SH_C2[0] * xy,
        SH_C2[1] * yz,
        SH_C2[2] * (2.0 * zz - xx - yy),
        SH_C2[3] * xz,
        SH_C2[4] * (xx - yy),
        // band 3
        SH_C3[0] * y * (3.0 * xx - yy),
        SH_C3[1] * xy * z,
        SH_C3[2] * y * (4.0 * zz - xx - yy),
        SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy),
        SH_C3[4] * x * (4.0 * zz - xx - yy),
        SH_C3[5] * z * (xx - yy),
        SH_C3[6] * x * (xx - yy),
    ]
}

/// View-dependent color contribution of bands 1-3 for the direction from
/// splat to camera. `dir` must be normalized. The caller adds this to
/// the base color and clamps.
pub fn eval(block: &ShBlock, dir: Vec3) -> Vec3 {
    let b = basis(dir);
    let mut rgb = [0.0f32; 3];
    for (channel, out) in rgb.iter_mut().enumerate() {
        let coeffs = &block[channel * 15..channel * 15 + 15];
        *out = b.iter().zip(coeffs).map(|(b, c)| b * c).sum();
    }
    Vec3::from(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_coefficients_contribute_nothing() {
        let block: ShBlock = [0.0; 45];
        assert_eq!(eval(&block, Vec3::Z), Vec3::ZERO);
    }

    #[test]
    fn band1_z_coefficient_scales_linearly() {
        // Coefficient k=1 is the z-linear band-1 basis; put it on the red
        // channel only.
        let mut block: ShBlock = [0.0; 45];
        block[1] = 2.0;
        let c = eval(&block, Vec3::Z);
        assert_relative_eq!(c.x, SH_C1 * 2.0, epsilon = 1e-6);
        assert_relative_eq!(c.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn odd_bands_flip_with_direction() {
        // Bands 1 and 3 are odd under dir -> -dir, band 2 is even.
        let mut band1: ShBlock = [0.0; 45];
        band1[0] = 1.0;
        let mut band2: ShBlock = [0.0; 45];
        band2[5] = 1.0;
        let dir = Vec3::new(0.3, -0.5, 0.8).normalize();

        let f = eval(&band1, dir);
        let r = eval(&band1, -dir);
        assert_relative_eq!(f.x, -r.x, epsilon = 1e-6);

        let f = eval(&band2, dir);
        let r = eval(&band2, -dir);
        assert_relative_eq!(f.x, r.x, epsilon = 1e-6);
    }

    #[test]
    fn channels_are_independent() {
        let mut block: ShBlock = [0.0; 45];
        block[15 + 1] = 1.0; // green channel, z basis
        let c = eval(&block, Vec3::Z);
        assert_relative_eq!(c.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(c.y, SH_C1, epsilon = 1e-6);
    }
}
