//! Merge fragments into one WGSL module and record where each fragment landed.

use std::collections::{HashMap, HashSet};

use crate::ident::{sanitize_identifier, unique_name};
use crate::model::{Buffer, Function, Shader};
use crate::wgsl::rewrite::{PrimaryBuffer, rewrite_shader};
use crate::wgsl::source_map::{Segment, SegmentKind, SourceMap};
use crate::wgsl::templates::{
    BUFFERS_HEADER, FUNCTIONS_HEADER, SHADERS_HEADER, SYSTEM_HEADER, build_buffer_declaration_wgsl,
    build_uniform_declarations_wgsl,
};

pub const BUFFERS_SEGMENT_ID: &str = "buffers";
pub const UNIFORMS_SEGMENT_ID: &str = "uniforms";

/// Binding numbers used by a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingBases {
    pub uniform_base: u32,
    pub buffer_offset: u32,
}

/// WGSL identifier of every buffer, unique across the session.
///
/// Computed once over all buffers so a buffer keeps the same name in every module it
/// appears in.
pub fn buffer_identifiers(buffers: &[Buffer]) -> HashMap<String, String> {
    let mut used: Vec<String> = Vec::with_capacity(buffers.len());
    let mut idents = HashMap::with_capacity(buffers.len());
    for (i, buffer) in buffers.iter().enumerate() {
        let base = sanitize_identifier(&buffer.name, &format!("texture{}", i + 1));
        let ident = unique_name(&base, used.iter().map(String::as_str));
        used.push(ident.clone());
        idents.insert(buffer.id.clone(), ident);
    }
    idents
}

/// One shader and the buffer its first binding line aliases.
#[derive(Debug, Clone, Copy)]
pub struct ShaderPart<'a> {
    pub shader: &'a Shader,
    pub primary: Option<&'a Buffer>,
}

/// Everything that goes into one module. `buffers` are in binding order.
#[derive(Debug, Clone)]
pub struct ComposeParts<'a> {
    pub functions: Vec<&'a Function>,
    pub buffers: Vec<&'a Buffer>,
    pub shaders: Vec<ShaderPart<'a>>,
    pub idents: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedModule {
    pub code: String,
    pub source_map: SourceMap,
    /// `(buffer id, identifier, binding)` in declaration order.
    pub buffer_bindings: Vec<(String, String, u32)>,
    /// Shader id to the variable its first binding line declared, when one was aliased.
    pub aliases: HashMap<String, String>,
}

impl ComposedModule {
    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }
}

#[derive(Default)]
struct TextBuilder {
    lines: Vec<String>,
    map: SourceMap,
}

impl TextBuilder {
    fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    fn next_line(&self) -> usize {
        self.lines.len() + 1
    }

    /// Append a fragment verbatim (trailing whitespace trimmed). Returns `false` when empty.
    fn fragment(&mut self, kind: SegmentKind, id: &str, name: &str, text: &str) -> bool {
        let text = text.trim_end();
        if text.trim().is_empty() {
            return false;
        }
        let start_line = self.next_line();
        self.lines.extend(text.lines().map(str::to_string));
        self.map.push(Segment {
            kind,
            id: id.to_string(),
            name: name.to_string(),
            start_line,
            end_line: self.next_line() - 1,
        });
        true
    }

    fn finish(self) -> (String, SourceMap) {
        (self.lines.join("\n"), self.map)
    }
}

/// Fixed section order: functions, buffer declarations, system uniforms, shaders.
pub fn compose(parts: &ComposeParts<'_>, bases: BindingBases) -> ComposedModule {
    let mut out = TextBuilder::default();

    out.line(FUNCTIONS_HEADER);
    let mut any_function = false;
    for function in &parts.functions {
        if any_function {
            out.line("");
        }
        any_function |= out.fragment(SegmentKind::Function, &function.id, &function.name, &function.code);
    }
    if !any_function {
        out.line("// (no functions)");
    }
    out.line("");

    out.line(BUFFERS_HEADER);
    let mut buffer_bindings = Vec::with_capacity(parts.buffers.len());
    let mut declarations = Vec::with_capacity(parts.buffers.len());
    for (slot, buffer) in parts.buffers.iter().enumerate() {
        let ident = ident_of(parts.idents, buffer);
        let binding = bases.buffer_offset + slot as u32;
        declarations.push(build_buffer_declaration_wgsl(binding, &ident, buffer.scalar_type));
        buffer_bindings.push((buffer.id.clone(), ident, binding));
    }
    if !out.fragment(SegmentKind::System, BUFFERS_SEGMENT_ID, "Buffers", &declarations.join("\n")) {
        out.line("// (no buffers)");
    }
    out.line("");

    out.line(SYSTEM_HEADER);
    out.fragment(
        SegmentKind::System,
        UNIFORMS_SEGMENT_ID,
        "System uniforms",
        &build_uniform_declarations_wgsl(bases.uniform_base).join("\n"),
    );
    out.line("");

    out.line(SHADERS_HEADER);
    let declared: HashSet<String> = buffer_bindings.iter().map(|(_, ident, _)| ident.clone()).collect();
    let mut seen = HashSet::new();
    let mut aliases = HashMap::new();
    let mut any_shader = false;
    for part in &parts.shaders {
        let primary_ident = part.primary.map(|b| ident_of(parts.idents, b));
        let primary = part.primary.zip(primary_ident.as_deref()).map(|(b, ident)| PrimaryBuffer {
            ident,
            scalar_type: b.scalar_type,
        });
        let rewritten = rewrite_shader(&part.shader.code, primary, &declared, &mut seen);
        if any_shader {
            out.line("");
        }
        if out.fragment(SegmentKind::Shader, &part.shader.id, &part.shader.name, &rewritten.text) {
            any_shader = true;
            if let Some(alias) = rewritten.alias {
                aliases.insert(part.shader.id.clone(), alias);
            }
        }
    }
    if !any_shader {
        out.line("// (no compute shaders)");
    }

    let (code, source_map) = out.finish();
    ComposedModule {
        code,
        source_map,
        buffer_bindings,
        aliases,
    }
}

fn ident_of(idents: &HashMap<String, String>, buffer: &Buffer) -> String {
    idents
        .get(&buffer.id)
        .cloned()
        .unwrap_or_else(|| sanitize_identifier(&buffer.name, "texture"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Extent3, FillMode, ScalarType};

    fn buffer(name: &str, ty: ScalarType) -> Buffer {
        Buffer::new(name, ty, FillMode::Empty, Extent3::new(2, 2, 1))
    }

    fn shader(id: &str, name: &str, code: &str) -> Shader {
        Shader {
            id: id.into(),
            name: name.into(),
            code: code.into(),
            buffer_ids: Vec::new(),
        }
    }

    const BASES: BindingBases = BindingBases {
        uniform_base: 8,
        buffer_offset: 14,
    };

    #[test]
    fn sections_appear_in_fixed_order() {
        let buffers = vec![buffer("grid", ScalarType::Int), buffer("next", ScalarType::Float)];
        let idents = buffer_identifiers(&buffers);
        let lib = Function {
            id: "f1".into(),
            name: "Library 1".into(),
            code: "fn one() -> i32 { return 1; }".into(),
        };
        let s = shader("s1", "Compute1", "@compute @workgroup_size(1)\nfn Compute1() {}");
        let parts = ComposeParts {
            functions: vec![&lib],
            buffers: buffers.iter().collect(),
            shaders: vec![ShaderPart {
                shader: &s,
                primary: buffers.first(),
            }],
            idents: &idents,
        };
        let composed = compose(&parts, BASES);

        let fn_at = composed.code.find("fn one()").unwrap();
        let buf_at = composed.code.find("@binding(14) var<storage, read_write> grid : array<i32>;").unwrap();
        let next_at = composed.code.find("@binding(15) var<storage, read_write> next : array<f32>;").unwrap();
        let uni_at = composed.code.find("@binding(8) var<uniform> step : u32;").unwrap();
        let shader_at = composed.code.find("fn Compute1()").unwrap();
        assert!(fn_at < buf_at && buf_at < next_at && next_at < uni_at && uni_at < shader_at);
        assert_eq!(composed.buffer_bindings[1].2, 15);
    }

    #[test]
    fn shader_segment_covers_its_lines() {
        let idents = HashMap::new();
        let s = shader("s1", "A", "\n\nfn A() {\n}\n\n");
        let parts = ComposeParts {
            functions: vec![],
            buffers: vec![],
            shaders: vec![ShaderPart {
                shader: &s,
                primary: None,
            }],
            idents: &idents,
        };
        let composed = compose(&parts, BASES);
        let seg = composed.source_map.segment_for("s1").unwrap();
        assert_eq!(seg.line_count(), 4);
        let lines: Vec<&str> = composed.code.lines().collect();
        assert_eq!(lines[seg.start_line + 1], "fn A() {");
    }

    #[test]
    fn empty_fragments_get_no_segment() {
        let idents = HashMap::new();
        let s = shader("s1", "A", "   \n");
        let parts = ComposeParts {
            functions: vec![],
            buffers: vec![],
            shaders: vec![ShaderPart {
                shader: &s,
                primary: None,
            }],
            idents: &idents,
        };
        let composed = compose(&parts, BASES);
        assert!(composed.source_map.segment_for("s1").is_none());
        assert!(composed.code.contains("// (no compute shaders)"));
    }

    #[test]
    fn colliding_sanitized_names_stay_unique() {
        let buffers = vec![buffer("a-b", ScalarType::Int), buffer("ab", ScalarType::Int)];
        let idents = buffer_identifiers(&buffers);
        assert_eq!(idents[&buffers[0].id], "ab");
        assert_eq!(idents[&buffers[1].id], "ab2");
    }
}
