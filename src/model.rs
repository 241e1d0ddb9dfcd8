//! Session entities: buffers, shaders, function libraries, parameters and pipeline items.
//!
//! Field names on the wire follow the project file format (`type`, `bufferIds`,
//! `shaderId`, ...). Buffer `values` are never persisted; they are regenerated from `fill`.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

/// Most elements one buffer may hold: 256 MiB of 4-byte scalars.
pub const MAX_BUFFER_ELEMENTS: usize = 1 << 26;

/// Fresh entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScalarType {
    #[default]
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "uint")]
    Uint,
    #[serde(rename = "float")]
    Float,
}

impl ScalarType {
    pub fn wgsl_type(self) -> &'static str {
        match self {
            ScalarType::Int => "i32",
            ScalarType::Uint => "u32",
            ScalarType::Float => "f32",
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ScalarType::Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillMode {
    #[default]
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "random")]
    Random,
}

fn one() -> u32 {
    1
}

/// A 3D size or dispatch count. Missing components read as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent3 {
    #[serde(default = "one")]
    pub x: u32,
    #[serde(default = "one")]
    pub y: u32,
    #[serde(default = "one")]
    pub z: u32,
}

impl Default for Extent3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl Extent3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Every component raised to at least 1.
    pub fn clamped(self) -> Self {
        Self::new(self.x.max(1), self.y.max(1), self.z.max(1))
    }

    /// Element count, `None` on overflow.
    pub fn checked_count(self) -> Option<usize> {
        (self.x as usize)
            .checked_mul(self.y as usize)?
            .checked_mul(self.z as usize)
    }

    /// Element count, saturating at `usize::MAX`.
    pub fn count(self) -> usize {
        self.checked_count().unwrap_or(usize::MAX)
    }

    pub fn fits_buffer(self) -> bool {
        self.checked_count().is_some_and(|n| n <= MAX_BUFFER_ELEMENTS)
    }

    /// Flat index of `(x, y, z)`, row-major with z outermost.
    pub fn index(self, x: u32, y: u32, z: u32) -> Option<usize> {
        if x >= self.x || y >= self.y || z >= self.z {
            return None;
        }
        let (sx, sy) = (self.x as usize, self.y as usize);
        Some(z as usize * sx * sy + y as usize * sx + x as usize)
    }
}

impl fmt::Display for Extent3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Reject buffer sizes whose element count overflows or passes [`MAX_BUFFER_ELEMENTS`].
pub fn check_buffer_size(name: &str, size: Extent3) -> Result<(), StructuralError> {
    if size.clamped().fits_buffer() {
        Ok(())
    } else {
        Err(StructuralError::BufferTooLarge {
            name: name.to_string(),
            size,
        })
    }
}

/// Optional per-axis expressions over parameter names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentExpr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<String>,
}

impl ExtentExpr {
    pub fn axes(&self) -> [(char, Option<&str>); 3] {
        [
            ('x', self.x.as_deref()),
            ('y', self.y.as_deref()),
            ('z', self.z.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i32),
    Uint(u32),
    Float(f32),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Uint(v) => v as f64,
            Scalar::Float(v) => v as f64,
        }
    }
}

/// Flat typed buffer contents.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarData {
    Int(Vec<i32>),
    Uint(Vec<u32>),
    Float(Vec<f32>),
}

impl Default for ScalarData {
    fn default() -> Self {
        ScalarData::Int(Vec::new())
    }
}

impl ScalarData {
    pub fn zeros(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::Int => ScalarData::Int(vec![0; len]),
            ScalarType::Uint => ScalarData::Uint(vec![0; len]),
            ScalarType::Float => ScalarData::Float(vec![0.0; len]),
        }
    }

    pub fn random(ty: ScalarType, len: usize, rng: &mut impl Rng) -> Self {
        match ty {
            ScalarType::Int => ScalarData::Int((0..len).map(|_| rng.random::<u32>() as i32).collect()),
            ScalarType::Uint => ScalarData::Uint((0..len).map(|_| rng.random::<u32>()).collect()),
            ScalarType::Float => ScalarData::Float(
                (0..len)
                    .map(|_| (rng.random::<f32>() * 1000.0).round() / 1000.0)
                    .collect(),
            ),
        }
    }

    /// Decode little-endian GPU bytes. Short input pads with zeros, extra bytes are ignored.
    pub fn from_le_bytes(ty: ScalarType, bytes: &[u8], len: usize) -> Self {
        let word = |i: usize| -> [u8; 4] {
            let start = i * 4;
            match bytes.get(start..start + 4) {
                Some(chunk) => [chunk[0], chunk[1], chunk[2], chunk[3]],
                None => [0; 4],
            }
        };
        match ty {
            ScalarType::Int => ScalarData::Int((0..len).map(|i| i32::from_le_bytes(word(i))).collect()),
            ScalarType::Uint => ScalarData::Uint((0..len).map(|i| u32::from_le_bytes(word(i))).collect()),
            ScalarType::Float => {
                ScalarData::Float((0..len).map(|i| f32::from_le_bytes(word(i))).collect())
            }
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarData::Int(_) => ScalarType::Int,
            ScalarData::Uint(_) => ScalarType::Uint,
            ScalarData::Float(_) => ScalarType::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ScalarData::Int(v) => v.len(),
            ScalarData::Uint(v) => v.len(),
            ScalarData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            ScalarData::Int(v) => v.get(index).copied().map(Scalar::Int),
            ScalarData::Uint(v) => v.get(index).copied().map(Scalar::Uint),
            ScalarData::Float(v) => v.get(index).copied().map(Scalar::Float),
        }
    }

    /// Raw bytes in GPU layout.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ScalarData::Int(v) => bytemuck::cast_slice(v),
            ScalarData::Uint(v) => bytemuck::cast_slice(v),
            ScalarData::Float(v) => bytemuck::cast_slice(v),
        }
    }

    /// Numeric conversion to another scalar type, keeping the length.
    pub fn converted(&self, ty: ScalarType) -> Self {
        let values: Vec<f64> = (0..self.len())
            .filter_map(|i| self.get(i))
            .map(Scalar::as_f64)
            .collect();
        match ty {
            ScalarType::Int => ScalarData::Int(values.iter().map(|v| *v as i32).collect()),
            ScalarType::Uint => ScalarData::Uint(values.iter().map(|v| *v as u32).collect()),
            ScalarType::Float => ScalarData::Float(values.iter().map(|v| *v as f32).collect()),
        }
    }
}

/// A named, typed storage buffer (a "texture" in the editor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub scalar_type: ScalarType,
    #[serde(default)]
    pub fill: FillMode,
    #[serde(default)]
    pub size: Extent3,
    #[serde(rename = "sizeExpr", default, skip_serializing_if = "Option::is_none")]
    pub size_expr: Option<ExtentExpr>,
    #[serde(skip)]
    pub values: ScalarData,
}

impl Buffer {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType, fill: FillMode, size: Extent3) -> Self {
        let mut buffer = Self {
            id: new_id(),
            name: name.into(),
            scalar_type,
            fill,
            size: size.clamped(),
            size_expr: None,
            values: ScalarData::default(),
        };
        buffer.regenerate();
        buffer
    }

    pub fn regenerate(&mut self) {
        self.regenerate_with(&mut rand::rng());
    }

    /// Refill from the fill mode. Sizes past [`MAX_BUFFER_ELEMENTS`] are never allocated;
    /// callers check them with [`check_buffer_size`] first.
    pub fn regenerate_with(&mut self, rng: &mut impl Rng) {
        self.size = self.size.clamped();
        let len = if self.size.fits_buffer() { self.size.count() } else { 0 };
        self.values = match self.fill {
            FillMode::Empty => ScalarData::zeros(self.scalar_type, len),
            FillMode::Random => ScalarData::random(self.scalar_type, len, rng),
        };
    }

    /// Change the scalar type. Empty buffers of unchanged shape keep their values converted.
    pub fn set_scalar_type(&mut self, ty: ScalarType) {
        if ty == self.scalar_type {
            return;
        }
        self.scalar_type = ty;
        if self.fill == FillMode::Empty && self.values.len() == self.size.count() {
            self.values = self.values.converted(ty);
        } else {
            self.regenerate();
        }
    }

    pub fn set_values(&mut self, values: ScalarData) {
        self.values = values;
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<Scalar> {
        self.size.index(x, y, z).and_then(|i| self.values.get(i))
    }

    /// Byte size of the GPU storage buffer; never zero.
    pub fn byte_len(&self) -> u64 {
        (self.size.count() as u64).saturating_mul(4).max(4)
    }

    /// `true` when `values` matches `size` and `scalar_type`.
    pub fn is_consistent(&self) -> bool {
        self.values.len() == self.size.count() && self.values.scalar_type() == self.scalar_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shader {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "bufferIds", default)]
    pub buffer_ids: Vec<String>,
}

/// Library of free WGSL functions shared by every shader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub shader_id: Option<String>,
    pub dispatch: Extent3,
    pub dispatch_expr: Option<ExtentExpr>,
    pub activated: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, shader_id: Option<String>, dispatch: Extent3) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            shader_id,
            dispatch: dispatch.clamped(),
            dispatch_expr: None,
            activated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStart {
    pub id: String,
    pub name: String,
    pub repeat: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEnd {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPipelineItem", into = "RawPipelineItem")]
pub enum PipelineItem {
    Step(Step),
    LoopStart(LoopStart),
    LoopEnd(LoopEnd),
}

impl PipelineItem {
    pub fn id(&self) -> &str {
        match self {
            PipelineItem::Step(s) => &s.id,
            PipelineItem::LoopStart(l) => &l.id,
            PipelineItem::LoopEnd(l) => &l.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PipelineItem::Step(s) => &s.name,
            PipelineItem::LoopStart(l) => &l.name,
            PipelineItem::LoopEnd(l) => &l.name,
        }
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            PipelineItem::Step(s) => Some(s),
            _ => None,
        }
    }

    pub fn loop_start(repeat: u32) -> Self {
        PipelineItem::LoopStart(LoopStart {
            id: new_id(),
            name: "Loop start".to_string(),
            repeat: repeat.max(1),
        })
    }

    pub fn loop_end() -> Self {
        PipelineItem::LoopEnd(LoopEnd {
            id: new_id(),
            name: "Loop end".to_string(),
        })
    }
}

/// On-disk shape of a pipeline item. Items without `type` are steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawPipelineItem {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "shaderId", default, skip_serializing_if = "Option::is_none")]
    shader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dispatch: Option<Extent3>,
    #[serde(rename = "dispatchExpr", default, skip_serializing_if = "Option::is_none")]
    dispatch_expr: Option<ExtentExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    activated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repeat: Option<serde_json::Value>,
}

fn parse_repeat(value: Option<&serde_json::Value>) -> u32 {
    let n = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(1.0),
        _ => 1.0,
    };
    if n.is_finite() && n >= 1.0 {
        n.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

impl TryFrom<RawPipelineItem> for PipelineItem {
    type Error = String;

    fn try_from(raw: RawPipelineItem) -> Result<Self, Self::Error> {
        let id = if raw.id.is_empty() { new_id() } else { raw.id };
        match raw.kind.as_deref() {
            None | Some("step") => Ok(PipelineItem::Step(Step {
                id,
                name: raw.name,
                shader_id: raw.shader_id.filter(|s| !s.is_empty()),
                dispatch: raw.dispatch.unwrap_or_default().clamped(),
                dispatch_expr: raw.dispatch_expr,
                activated: raw.activated.unwrap_or(true),
            })),
            Some("loopStart") => Ok(PipelineItem::LoopStart(LoopStart {
                id,
                name: raw.name,
                repeat: parse_repeat(raw.repeat.as_ref()),
            })),
            Some("loopEnd") => Ok(PipelineItem::LoopEnd(LoopEnd { id, name: raw.name })),
            Some(other) => Err(format!("unknown pipeline item type `{other}`")),
        }
    }
}

impl From<PipelineItem> for RawPipelineItem {
    fn from(item: PipelineItem) -> Self {
        match item {
            PipelineItem::Step(s) => RawPipelineItem {
                kind: Some("step".to_string()),
                id: s.id,
                name: s.name,
                shader_id: s.shader_id,
                dispatch: Some(s.dispatch),
                dispatch_expr: s.dispatch_expr,
                activated: Some(s.activated),
                repeat: None,
            },
            PipelineItem::LoopStart(l) => RawPipelineItem {
                kind: Some("loopStart".to_string()),
                id: l.id,
                name: l.name,
                repeat: Some(serde_json::Value::from(l.repeat)),
                ..Default::default()
            },
            PipelineItem::LoopEnd(l) => RawPipelineItem {
                kind: Some("loopEnd".to_string()),
                id: l.id,
                name: l.name,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn index_is_row_major_with_z_outermost() {
        let size = Extent3::new(4, 3, 2);
        assert_eq!(size.index(1, 2, 1), Some(12 + 8 + 1));
        assert_eq!(size.index(4, 0, 0), None);
    }

    #[test]
    fn random_fill_matches_shape_and_type() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut buffer = Buffer::new("grid", ScalarType::Float, FillMode::Random, Extent3::new(8, 2, 1));
        buffer.regenerate_with(&mut rng);
        assert!(buffer.is_consistent());
        let ScalarData::Float(values) = &buffer.values else {
            panic!("expected float data");
        };
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(values.iter().all(|v| ((v * 1000.0).round() - v * 1000.0).abs() < 1e-3));
    }

    #[test]
    fn type_change_on_empty_buffer_converts() {
        let mut buffer = Buffer::new("a", ScalarType::Int, FillMode::Empty, Extent3::new(2, 1, 1));
        buffer.values = ScalarData::Int(vec![3, -1]);
        buffer.set_scalar_type(ScalarType::Float);
        assert_eq!(buffer.values, ScalarData::Float(vec![3.0, -1.0]));
    }

    #[test]
    fn short_readback_pads_with_zero() {
        let data = ScalarData::from_le_bytes(ScalarType::Uint, &7u32.to_le_bytes(), 3);
        assert_eq!(data, ScalarData::Uint(vec![7, 0, 0]));
    }

    #[test]
    fn zero_sized_buffer_still_allocates() {
        let mut buffer = Buffer::new("a", ScalarType::Int, FillMode::Empty, Extent3::new(1, 1, 1));
        buffer.size = Extent3::new(0, 5, 1);
        buffer.regenerate();
        assert_eq!(buffer.size, Extent3::new(1, 5, 1));
        assert_eq!(buffer.byte_len(), 20);
    }

    #[test]
    fn oversized_extent_never_overflows() {
        let huge = Extent3::new(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(huge.checked_count(), None);
        assert!(!huge.fits_buffer());
        assert!(matches!(
            check_buffer_size("big", huge),
            Err(StructuralError::BufferTooLarge { .. })
        ));
        assert!(check_buffer_size("ok", Extent3::new(4096, 4096, 4)).is_ok());
        assert!(check_buffer_size("big", Extent3::new(4096, 4096, 5)).is_err());

        let mut buffer = Buffer::new("a", ScalarType::Int, FillMode::Empty, Extent3::new(1, 1, 1));
        buffer.size = huge;
        buffer.regenerate();
        assert!(buffer.values.is_empty());
    }

    #[test]
    fn pipeline_item_without_type_is_a_step() {
        let item: PipelineItem =
            serde_json::from_str(r#"{ "id": "p1", "name": "Pipeline 1", "shaderId": "s1", "dispatch": { "x": 4 } }"#)
                .unwrap();
        let PipelineItem::Step(step) = item else {
            panic!("expected a step");
        };
        assert_eq!(step.dispatch, Extent3::new(4, 1, 1));
        assert!(step.activated);
    }

    #[test]
    fn loop_start_accepts_string_repeat() {
        let item: PipelineItem =
            serde_json::from_str(r#"{ "type": "loopStart", "id": "l", "name": "L", "repeat": "3" }"#).unwrap();
        assert!(matches!(item, PipelineItem::LoopStart(LoopStart { repeat: 3, .. })));
    }

    #[test]
    fn unknown_item_type_is_rejected() {
        let parsed = serde_json::from_str::<PipelineItem>(r#"{ "type": "branch", "id": "x" }"#);
        assert!(parsed.is_err());
    }
}
