//! Header-delimited point-record container codec.
//!
//! The format is a PLY-style container: a textual header describing a
//! record layout, a delimiter token, then a binary little-endian (or
//! ASCII) body of fixed-stride records. Files produced by the upstream
//! generator frequently declare fields that are missing from the actual
//! byte layout, so the decoder compares the header-implied stride with
//! the stride observed in the body and repairs the offset table when
//! they disagree.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{DecodeError, DecodeResult};
use crate::splat::{normalize_quat, ShBlock, Splat, SplatSet, SH_C0};

const DELIMITER: &[u8] = b"end_header";

/// Isotropic scale used when the container carries no scale fields.
const DEFAULT_SCALE: f32 = 0.01;

/// Number of higher-band SH coefficients required for view-dependent
/// color (15 basis functions x 3 channels, bands 1-3). Partial sets
/// disable harmonics for the whole file.
const SH_REST_COUNT: usize = 45;

/// Primitive scalar types a property may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Float,
    Double,
}

impl ScalarType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "char" | "int8" => Self::Char,
            "uchar" | "uint8" => Self::Uchar,
            "short" | "int16" => Self::Short,
            "ushort" | "uint16" => Self::Ushort,
            "int" | "int32" => Self::Int,
            "uint" | "uint32" => Self::Uint,
            "float" | "float32" => Self::Float,
            "double" | "float64" => Self::Double,
            _ => return None,
        })
    }

    pub fn size(self) -> usize {
        match self {
            Self::Char | Self::Uchar => 1,
            Self::Short | Self::Ushort => 2,
            Self::Int | Self::Uint | Self::Float => 4,
            Self::Double => 8,
        }
    }

    /// True for the 8-bit integer channel types that decode to color
    /// via `v / 255` instead of the scalar path.
    fn is_byte(self) -> bool {
        matches!(self, Self::Char | Self::Uchar)
    }

    /// Read the raw scalar at `offset` as f32 (no normalization).
    fn read(self, data: &[u8], offset: usize) -> f32 {
        match self {
            Self::Float => {
                let b: [u8; 4] = data[offset..offset + 4].try_into().unwrap_or([0; 4]);
                f32::from_le_bytes(b)
            }
            Self::Double => {
                let b: [u8; 8] = data[offset..offset + 8].try_into().unwrap_or([0; 8]);
                f64::from_le_bytes(b) as f32
            }
            Self::Char => data[offset] as i8 as f32,
            Self::Uchar => data[offset] as f32,
            Self::Short => {
                let b: [u8; 2] = data[offset..offset + 2].try_into().unwrap_or([0; 2]);
                i16::from_le_bytes(b) as f32
            }
            Self::Ushort => {
                let b: [u8; 2] = data[offset..offset + 2].try_into().unwrap_or([0; 2]);
                u16::from_le_bytes(b) as f32
            }
            Self::Int => {
                let b: [u8; 4] = data[offset..offset + 4].try_into().unwrap_or([0; 4]);
                i32::from_le_bytes(b) as f32
            }
            Self::Uint => {
                let b: [u8; 4] = data[offset..offset + 4].try_into().unwrap_or([0; 4]);
                u32::from_le_bytes(b) as f32
            }
        }
    }
}

/// Body storage mode declared by the header `format` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMode {
    BinaryLittleEndian,
    Ascii,
}

/// A resolved field: scalar type plus byte offset within a record.
#[derive(Clone, Copy, Debug)]
struct Field {
    ty: ScalarType,
    offset: usize,
}

impl Field {
    fn read(&self, record: &[u8]) -> f32 {
        self.ty.read(record, self.offset)
    }
}

/// Parsed container header.
#[derive(Debug)]
pub struct Header {
    pub count: usize,
    pub mode: StorageMode,
    /// Declared (name, type) pairs of the vertex element, in order.
    pub properties: Vec<(String, ScalarType)>,
}

impl Header {
    /// Per-record stride implied by the declared field types.
    pub fn declared_stride(&self) -> usize {
        self.properties.iter().map(|(_, ty)| ty.size()).sum()
    }

    /// Strict check for callers that refuse partial bodies.
    pub fn require_complete_body(&self, body_len: usize) -> DecodeResult<()> {
        let expected = self.declared_stride() * self.count;
        if self.mode == StorageMode::BinaryLittleEndian && body_len < expected {
            return Err(DecodeError::TruncatedBody {
                expected,
                actual: body_len,
            });
        }
        Ok(())
    }
}

/// Locate the header/body delimiter and parse the header text.
///
/// Returns the header and the body byte slice. Accepts `\n`, `\r\n` and
/// `\r` after the delimiter token.
pub fn parse_header(bytes: &[u8]) -> DecodeResult<(Header, &[u8])> {
    let pos = bytes
        .windows(DELIMITER.len())
        .position(|w| w == DELIMITER)
        .ok_or_else(|| {
            DecodeError::MalformedContainer("no end_header delimiter found".into())
        })?;

    let body_start = match &bytes[pos + DELIMITER.len()..] {
        [b'\r', b'\n', ..] => pos + DELIMITER.len() + 2,
        [b'\n', ..] | [b'\r', ..] => pos + DELIMITER.len() + 1,
        _ => pos + DELIMITER.len(),
    };

    let text = std::str::from_utf8(&bytes[..pos])
        .map_err(|e| DecodeError::UnreadableHeader(format!("header is not UTF-8: {e}")))?;

    let mut count: Option<usize> = None;
    let mut mode: Option<StorageMode> = None;
    let mut properties = Vec::new();
    let mut in_vertex_element = false;

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] | ["ply"] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", fmt, _version] => {
                mode = Some(match *fmt {
                    "binary_little_endian" => StorageMode::BinaryLittleEndian,
                    "ascii" => StorageMode::Ascii,
                    other => {
                        return Err(DecodeError::MalformedContainer(format!(
                            "unsupported format: {other}"
                        )))
                    }
                });
            }
            ["element", name, n] => {
                in_vertex_element = *name == "vertex";
                if in_vertex_element {
                    count = Some(n.parse().map_err(|_| {
                        DecodeError::MalformedContainer(format!("bad vertex count: {n}"))
                    })?);
                }
            }
            ["property", "list", ..] => {
                return Err(DecodeError::MalformedContainer(
                    "list properties are not supported".into(),
                ))
            }
            ["property", ty, name] if in_vertex_element => {
                let ty = ScalarType::parse(ty).ok_or_else(|| {
                    DecodeError::MalformedContainer(format!("unknown property type: {ty}"))
                })?;
                properties.push((name.to_string(), ty));
            }
            ["property", ..] => {} // property of a non-vertex element
            ["format", ..] | ["element", ..] => {
                return Err(DecodeError::UnreadableHeader(format!(
                    "unparseable header line: {line}"
                )))
            }
            // Unknown keywords are skipped like comments; writers keep
            // inventing metadata lines.
            _ => {}
        }
    }

    let header = Header {
        count: count.ok_or_else(|| {
            DecodeError::MalformedContainer("missing vertex element".into())
        })?,
        mode: mode.ok_or_else(|| {
            DecodeError::MalformedContainer("missing format line".into())
        })?,
        properties,
    };
    Ok((header, &bytes[body_start.min(bytes.len())..]))
}

/// Names that resolve to one of the essential record roles. Used by the
/// stride-repair heuristic to recognize the essential-only packed layout.
fn is_essential(name: &str) -> bool {
    matches!(
        name,
        "x" | "y"
            | "z"
            | "red"
            | "green"
            | "blue"
            | "r"
            | "g"
            | "b"
            | "f_dc_0"
            | "f_dc_1"
            | "f_dc_2"
            | "opacity"
            | "scale_0"
            | "scale_1"
            | "scale_2"
            | "rot_0"
            | "rot_1"
            | "rot_2"
            | "rot_3"
    )
}

/// Per-property byte offsets after stride reconciliation. `None` marks a
/// declared-but-absent field that decodes to its role default.
fn compute_offsets(
    properties: &[(String, ScalarType)],
    declared_stride: usize,
    body_len: usize,
    count: usize,
) -> (Vec<Option<usize>>, usize) {
    let sequential = || {
        let mut off = 0usize;
        properties
            .iter()
            .map(|(_, ty)| {
                let o = off;
                off += ty.size();
                Some(o)
            })
            .collect::<Vec<_>>()
    };

    if count == 0 {
        return (sequential(), declared_stride);
    }

    let observed = body_len / count;
    if observed >= declared_stride {
        // Extra trailing bytes per record (or exact match): trust the header.
        return (sequential(), declared_stride);
    }

    let essential_size: usize = properties
        .iter()
        .filter(|(name, _)| is_essential(name))
        .map(|(_, ty)| ty.size())
        .sum();

    let offsets = if observed == essential_size {
        // Essential-only packed layout, fields contiguous in header order.
        let mut off = 0usize;
        properties
            .iter()
            .map(|(name, ty)| {
                if is_essential(name) {
                    let o = off;
                    off += ty.size();
                    Some(o)
                } else {
                    None
                }
            })
            .collect()
    } else if body_len % count != 0 {
        // Uneven remainder: a truncated body rather than an omitted-field
        // layout. Keep the declared offsets; the decode loop drops the
        // records that do not fully fit.
        return (sequential(), declared_stride);
    } else {
        // Best-effort shim: accept fields in header order until the packed
        // offset would exceed the observed stride, then drop the rest.
        let mut off = 0usize;
        let mut done = false;
        properties
            .iter()
            .map(|(_, ty)| {
                if done || off + ty.size() > observed {
                    done = true;
                    None
                } else {
                    let o = off;
                    off += ty.size();
                    Some(o)
                }
            })
            .collect()
    };

    (offsets, observed)
}

/// How the color triplet decodes to linear RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColorMode {
    /// Raw channels; 8-bit integer types divide by 255, wider types are
    /// taken as-is.
    Direct,
    /// Order-0 SH coefficients: `0.5 + SH_C0 * c`.
    Sh0,
}

/// Semantic record layout resolved from the header, each role independent
/// and optional.
struct RecordLayout {
    stride: usize,
    position: Option<[Field; 3]>,
    color: Option<(ColorMode, [Field; 3])>,
    opacity: Option<Field>,
    scale: Option<[Field; 3]>,
    /// Read order yields (x, y, z, w); the container stores w first.
    rotation: Option<[Field; 4]>,
    sh: Option<Vec<Field>>,
}

/// Role -> accepted property names. Each triplet alternative is tried in
/// order; the first fully present one wins.
const POSITION_NAMES: [&str; 3] = ["x", "y", "z"];
const COLOR_DIRECT_NAMES: [[&str; 3]; 2] = [["red", "green", "blue"], ["r", "g", "b"]];
const COLOR_SH0_NAMES: [&str; 3] = ["f_dc_0", "f_dc_1", "f_dc_2"];
const SCALE_NAMES: [&str; 3] = ["scale_0", "scale_1", "scale_2"];
const ROTATION_NAMES: [&str; 4] = ["rot_1", "rot_2", "rot_3", "rot_0"];

impl RecordLayout {
    fn resolve(header: &Header, body_len: usize) -> Self {
        let (offsets, stride) = compute_offsets(
            &header.properties,
            header.declared_stride(),
            body_len,
            header.count,
        );

        let fields: HashMap<&str, Field> = header
            .properties
            .iter()
            .zip(&offsets)
            .filter_map(|((name, ty), off)| {
                off.map(|offset| (name.as_str(), Field { ty: *ty, offset }))
            })
            .collect();

        let triplet = |names: &[&str; 3]| -> Option<[Field; 3]> {
            Some([
                *fields.get(names[0])?,
                *fields.get(names[1])?,
                *fields.get(names[2])?,
            ])
        };

        let color = triplet(&COLOR_SH0_NAMES)
            .map(|f| (ColorMode::Sh0, f))
            .or_else(|| {
                COLOR_DIRECT_NAMES
                    .iter()
                    .find_map(|names| triplet(names).map(|f| (ColorMode::Direct, f)))
            });

        let rotation = (|| {
            Some([
                *fields.get(ROTATION_NAMES[0])?,
                *fields.get(ROTATION_NAMES[1])?,
                *fields.get(ROTATION_NAMES[2])?,
                *fields.get(ROTATION_NAMES[3])?,
            ])
        })();

        // Harmonics are all-or-nothing: a single missing coefficient
        // disables the block for the whole set.
        let sh = (0..SH_REST_COUNT)
            .map(|i| fields.get(format!("f_rest_{i}").as_str()).copied())
            .collect::<Option<Vec<Field>>>();

        Self {
            stride,
            position: triplet(&POSITION_NAMES),
            color,
            opacity: fields.get("opacity").copied(),
            scale: triplet(&SCALE_NAMES),
            rotation,
            sh,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode a container byte buffer into a splat set.
///
/// Truncated bodies are non-fatal: decoding keeps every record that fully
/// fits and logs the discrepancy.
pub fn decode(bytes: &[u8]) -> DecodeResult<SplatSet> {
    let (header, body) = parse_header(bytes)?;
    match header.mode {
        StorageMode::Ascii => decode_text(&header, body),
        StorageMode::BinaryLittleEndian => decode_binary(&header, body),
    }
}

fn decode_binary(header: &Header, body: &[u8]) -> DecodeResult<SplatSet> {
    let layout = RecordLayout::resolve(header, body.len());
    if layout.stride == 0 {
        return Ok(SplatSet::new(Vec::new(), None));
    }

    let available = body.len() / layout.stride;
    let count = header.count.min(available);
    if count < header.count {
        warn!(
            declared = header.count,
            decoded = count,
            "{}",
            DecodeError::TruncatedBody {
                expected: layout.stride * header.count,
                actual: body.len(),
            }
        );
    }

    let mut splats = Vec::with_capacity(count);
    let mut sh_blocks = layout.sh.as_ref().map(|_| Vec::with_capacity(count));

    for i in 0..count {
        let record = &body[i * layout.stride..(i + 1) * layout.stride];

        let pos = layout
            .position
            .map_or([0.0; 3], |f| [f[0].read(record), f[1].read(record), f[2].read(record)]);

        let color = match layout.color {
            Some((ColorMode::Sh0, f)) => {
                let c = |f: Field| (0.5 + SH_C0 * f.read(record)).clamp(0.0, 1.0);
                [c(f[0]), c(f[1]), c(f[2])]
            }
            Some((ColorMode::Direct, f)) => {
                let c = |f: Field| {
                    let raw = f.read(record);
                    let v = if f.ty.is_byte() { raw / 255.0 } else { raw };
                    v.clamp(0.0, 1.0)
                };
                [c(f[0]), c(f[1]), c(f[2])]
            }
            None => [1.0; 3],
        };

        let opacity = layout.opacity.map_or(1.0, |f| sigmoid(f.read(record)));

        let scale = layout.scale.map_or([DEFAULT_SCALE; 3], |f| {
            [
                f[0].read(record).exp(),
                f[1].read(record).exp(),
                f[2].read(record).exp(),
            ]
        });

        let rotation = layout.rotation.map_or([0.0, 0.0, 0.0, 1.0], |f| {
            normalize_quat([
                f[0].read(record),
                f[1].read(record),
                f[2].read(record),
                f[3].read(record),
            ])
        });

        splats.push(Splat {
            pos,
            color,
            opacity,
            scale,
            rotation,
        });

        if let (Some(blocks), Some(fields)) = (&mut sh_blocks, &layout.sh) {
            let mut block: ShBlock = [0.0; SH_REST_COUNT];
            for (dst, field) in block.iter_mut().zip(fields) {
                *dst = field.read(record);
            }
            blocks.push(block);
        }
    }

    Ok(SplatSet::new(splats, sh_blocks))
}

/// ASCII fallback: whitespace-delimited floats, one record per line,
/// minimum 7 fields (xyz + rgb + opacity). Values are taken as already
/// activated; scale and orientation default. No harmonics support.
fn decode_text(header: &Header, body: &[u8]) -> DecodeResult<SplatSet> {
    let text = std::str::from_utf8(body).map_err(|e| {
        DecodeError::MalformedContainer(format!("ascii body is not UTF-8: {e}"))
    })?;

    let mut splats = Vec::new();
    for line in text.lines() {
        if splats.len() >= header.count {
            break;
        }
        let values: Vec<f32> = line
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if values.len() < 7 {
            continue;
        }
        splats.push(Splat {
            pos: [values[0], values[1], values[2]],
            color: [
                values[3].clamp(0.0, 1.0),
                values[4].clamp(0.0, 1.0),
                values[5].clamp(0.0, 1.0),
            ],
            opacity: values[6].clamp(0.0, 1.0),
            scale: [DEFAULT_SCALE; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        });
    }

    if splats.len() < header.count {
        warn!(
            declared = header.count,
            decoded = splats.len(),
            "ascii body ended before declared record count"
        );
    }
    Ok(SplatSet::new(splats, None))
}

/// Re-serialize a set in the container's binary conventions: log scales,
/// logit opacity, SH0 color, quaternion with w first, SH block verbatim.
pub fn encode(set: &SplatSet) -> Vec<u8> {
    let mut header = String::new();
    header.push_str("ply\n");
    header.push_str("format binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {}\n", set.len()));
    for name in ["x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity"] {
        header.push_str(&format!("property float {name}\n"));
    }
    for i in 0..3 {
        header.push_str(&format!("property float scale_{i}\n"));
    }
    for i in 0..4 {
        header.push_str(&format!("property float rot_{i}\n"));
    }
    if set.has_sh() {
        for i in 0..SH_REST_COUNT {
            header.push_str(&format!("property float f_rest_{i}\n"));
        }
    }
    header.push_str("end_header\n");

    let record_size = Splat::SIZE + if set.has_sh() { SH_REST_COUNT * 4 } else { 0 };
    let mut out = Vec::with_capacity(header.len() + set.len() * record_size);
    out.extend_from_slice(header.as_bytes());

    let mut push = |v: f32| out.extend_from_slice(&v.to_le_bytes());
    for (i, s) in set.splats().iter().enumerate() {
        for v in s.pos {
            push(v);
        }
        for c in s.color {
            push((c - 0.5) / SH_C0);
        }
        let op = s.opacity.clamp(1e-6, 1.0 - 1e-6);
        push((op / (1.0 - op)).ln());
        for v in s.scale {
            push(v.max(f32::MIN_POSITIVE).ln());
        }
        let q = normalize_quat(s.rotation);
        push(q[3]); // rot_0 = w
        push(q[0]);
        push(q[1]);
        push(q[2]);
        if let Some(sh) = set.sh() {
            for v in sh[i] {
                push(v);
            }
        }
    }
    out
}
