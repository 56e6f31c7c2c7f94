use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

/// Order-0 spherical harmonics basis constant (Y_0^0).
pub const SH_C0: f32 = 0.282_094_8;

/// Per-splat higher-band SH coefficients: 15 basis functions x 3 channels,
/// covering bands 1-3. Stored channel-major per coefficient, i.e. in the
/// `f_rest` order the container declares them.
pub type ShBlock = [f32; 45];

/// A single anisotropic Gaussian splat primitive.
///
/// Memory layout: 56 bytes, matches the packed essential-field record of
/// the container format and the GPU mirror record.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Splat {
    /// World-space position
    pub pos: [f32; 3],
    /// Linear RGB in [0, 1]
    pub color: [f32; 3],
    /// Opacity in [0, 1] (post-activation)
    pub opacity: f32,
    /// Axis scales, strictly positive (post-exp)
    pub scale: [f32; 3],
    /// Unit rotation quaternion (x, y, z, w)
    pub rotation: [f32; 4],
}

impl Splat {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Simple spherical splat (uniform scale, identity rotation).
    pub fn sphere(pos: [f32; 3], radius: f32, color: [f32; 3], opacity: f32) -> Self {
        Self {
            pos,
            color,
            opacity,
            scale: [radius, radius, radius],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Normalize a quaternion, falling back to identity when degenerate.
pub fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if len > 1e-8 {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    } else {
        [0.0, 0.0, 0.0, 1.0]
    }
}

/// Surrogate identity token for a loaded splat set.
///
/// Tokens are process-unique and never reused, so "same token" means
/// "same decoded set" and a reload with an equal token can be skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SetId(u64);

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

impl SetId {
    fn next() -> Self {
        Self(NEXT_SET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An immutable, ordered collection of splats with an optional parallel
/// sequence of higher-band SH coefficient blocks (all-or-nothing).
#[derive(Debug)]
pub struct SplatSet {
    id: SetId,
    splats: Vec<Splat>,
    sh: Option<Vec<ShBlock>>,
}

impl SplatSet {
    pub fn new(splats: Vec<Splat>, sh: Option<Vec<ShBlock>>) -> Self {
        debug_assert!(sh.as_ref().map_or(true, |s| s.len() == splats.len()));
        Self {
            id: SetId::next(),
            splats,
            sh,
        }
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn splats(&self) -> &[Splat] {
        &self.splats
    }

    /// Higher-band SH blocks, present only when the source carried a
    /// complete set for every splat.
    pub fn sh(&self) -> Option<&[ShBlock]> {
        self.sh.as_deref()
    }

    pub fn has_sh(&self) -> bool {
        self.sh.is_some()
    }

    /// Approximate resident size in bytes (splat records plus SH blocks).
    pub fn memory_bytes(&self) -> usize {
        self.splats.len() * Splat::SIZE
            + self
                .sh
                .as_ref()
                .map_or(0, |s| s.len() * std::mem::size_of::<ShBlock>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splat_record_is_56_bytes() {
        assert_eq!(Splat::SIZE, 56);
    }

    #[test]
    fn normalize_quat_unit_length() {
        let q = normalize_quat([1.0, 2.0, 3.0, 4.0]);
        let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_quat_zero_falls_back_to_identity() {
        assert_eq!(normalize_quat([0.0; 4]), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn set_ids_are_unique() {
        let a = SplatSet::new(vec![], None);
        let b = SplatSet::new(vec![], None);
        assert_ne!(a.id(), b.id());
    }
}
