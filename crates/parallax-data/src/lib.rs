//! Splat data model and point-record container codec.

pub mod error;
pub mod ply;
pub mod splat;

pub use error::{DecodeError, DecodeResult};
pub use ply::{decode, encode, parse_header, Header, ScalarType, StorageMode};
pub use splat::{normalize_quat, SetId, ShBlock, Splat, SplatSet, SH_C0};
