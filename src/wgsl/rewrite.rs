//! Line-oriented rewrites applied to shader fragments before composition.
//!
//! Every rewrite keeps the line count of the fragment unchanged so the source map stays
//! exact: lines are blanked into comments, never removed.

use std::collections::HashSet;

use once_cell_regex::regex;

use crate::model::ScalarType;

/// The buffer bound to slot 0, which a shader's own first binding declaration aliases.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryBuffer<'a> {
    pub ident: &'a str,
    pub scalar_type: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRewrite {
    pub text: String,
    /// Variable of the shader's first binding line, now renamed to the primary buffer.
    pub alias: Option<String>,
}

/// Variable declared by a `@group(..) @binding(..) var<..> name` line, if it is one.
pub fn binding_variable(line: &str) -> Option<&str> {
    let re = regex!(
        r"^\s*(?:@group\s*\(\s*\d+\s*\)\s*@binding\s*\(\s*\d+\s*\)|@binding\s*\(\s*\d+\s*\)\s*@group\s*\(\s*\d+\s*\))\s*var\s*(?:<[^>]*>)?\s*([A-Za-z_][A-Za-z0-9_]*)"
    );
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrite one shader fragment.
///
/// * The first binding line becomes an alias of the primary buffer: it is blanked and its
///   variable renamed to `primary.ident` everywhere in the fragment. Integer primaries also get
///   their float literals truncated.
/// * Later binding lines whose variable the buffer section already declares, or which repeat a
///   line kept earlier in this composition (`seen`), are blanked.
pub fn rewrite_shader(
    code: &str,
    primary: Option<PrimaryBuffer<'_>>,
    declared: &HashSet<String>,
    seen: &mut HashSet<String>,
) -> ShaderRewrite {
    let mut alias: Option<String> = None;
    let mut lines: Vec<(String, bool)> = Vec::new();

    for line in code.lines() {
        let Some(var) = binding_variable(line) else {
            lines.push((line.to_string(), false));
            continue;
        };
        if let Some(primary) = primary
            && alias.is_none()
        {
            alias = Some(var.to_string());
            lines.push((format!("// {var}: alias of {}", primary.ident), true));
            continue;
        }
        if declared.contains(var) {
            lines.push((format!("// {var}: declared by the buffer section"), true));
            continue;
        }
        if !seen.insert(normalize_line(line)) {
            lines.push((format!("// {var}: duplicate binding"), true));
            continue;
        }
        lines.push((line.to_string(), false));
    }

    if let (Some(var), Some(primary)) = (alias.as_deref(), primary) {
        for (line, blanked) in lines.iter_mut() {
            if *blanked {
                continue;
            }
            let mut rewritten = rename_identifier(line, var, primary.ident);
            if primary.scalar_type.is_integer() {
                rewritten = truncate_float_literals(&rewritten);
            }
            *line = rewritten;
        }
    }

    ShaderRewrite {
        text: lines
            .into_iter()
            .map(|(line, _)| line)
            .collect::<Vec<_>>()
            .join("\n"),
        alias,
    }
}

/// Replace whole-identifier occurrences of `from` with `to`.
pub fn rename_identifier(text: &str, from: &str, to: &str) -> String {
    if from == to || from.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        out.push_str(&rest[..start]);
        let token_len = rest[start..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len() - start);
        let token = &rest[start..start + token_len];
        out.push_str(if token == from { to } else { token });
        rest = &rest[start + token_len..];
    }
    out.push_str(rest);
    out
}

/// `3.0` becomes `3` and `2.75` becomes `2`, keeping arithmetic on integer buffers well typed.
pub fn truncate_float_literals(text: &str) -> String {
    let whole = regex!(r"\b(\d+)\.0\b");
    let fractional = regex!(r"\b(\d+)\.\d+");
    let step = whole.replace_all(text, "${1}");
    fractional.replace_all(&step, "${1}").into_owned()
}

/// Rename a shader's entry point to `entry`.
///
/// Prefers the first `fn` after an `@compute` attribute, then the first `fn` in the code.
/// Code without any function gets an empty stub appended.
pub fn sync_entry_name(code: &str, entry: &str) -> String {
    let compute_fn = regex!(r"(@compute[^{;]*?\bfn\s+)([A-Za-z_][A-Za-z0-9_]*)");
    let any_fn = regex!(r"(\bfn\s+)([A-Za-z_][A-Za-z0-9_]*)");
    let replacement = format!("${{1}}{entry}");
    if compute_fn.is_match(code) {
        return compute_fn.replace(code, replacement.as_str()).into_owned();
    }
    if any_fn.is_match(code) {
        return any_fn.replace(code, replacement.as_str()).into_owned();
    }
    format!("{code}\nfn {entry}() {{\n}}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = "@group(0) @binding(0) var<storage, read_write> texture1 : array<i32>;\n\
@group(0) @binding(1) var<storage, read_write> scratch : array<i32>;\n\
@compute @workgroup_size(8, 8, 1)\n\
fn main(@builtin(global_invocation_id) gid : vec3<u32>) {\n\
    texture1[gid.x] = texture1[gid.x] + 2.0;\n\
    scratch[gid.x] = 1;\n\
}";

    #[test]
    fn detects_binding_lines_in_both_attribute_orders() {
        assert_eq!(
            binding_variable("@group(0) @binding(3) var<storage, read_write> a : array<u32>;"),
            Some("a")
        );
        assert_eq!(binding_variable("  @binding(1) @group(0) var<uniform> u : u32;"), Some("u"));
        assert_eq!(binding_variable("var<private> p : u32;"), None);
    }

    #[test]
    fn first_binding_becomes_primary_alias() {
        let declared = HashSet::from(["grid".to_string()]);
        let mut seen = HashSet::new();
        let out = rewrite_shader(
            SHADER,
            Some(PrimaryBuffer {
                ident: "grid",
                scalar_type: ScalarType::Int,
            }),
            &declared,
            &mut seen,
        );
        assert_eq!(out.alias.as_deref(), Some("texture1"));
        assert_eq!(out.text.lines().count(), SHADER.lines().count());
        assert!(out.text.lines().next().unwrap().starts_with("//"));
        assert!(out.text.contains("grid[gid.x] = grid[gid.x] + 2;"));
        assert!(!out.text.contains("texture1["));
    }

    #[test]
    fn repeated_binding_lines_are_blanked_once_seen() {
        let declared = HashSet::new();
        let mut seen = HashSet::new();
        let line = "@group(0) @binding(20) var<storage, read_write> extra : array<u32>;";
        let first = rewrite_shader(line, None, &declared, &mut seen);
        let second = rewrite_shader(&format!("  {line}"), None, &declared, &mut seen);
        assert_eq!(first.text, line);
        assert!(second.text.starts_with("// extra"));
    }

    #[test]
    fn declared_buffers_are_not_redeclared() {
        let declared = HashSet::from(["extra".to_string()]);
        let mut seen = HashSet::new();
        let out = rewrite_shader(
            "@group(0) @binding(2) var<storage, read_write> extra : array<u32>;",
            None,
            &declared,
            &mut seen,
        );
        assert!(out.text.starts_with("//"));
    }

    #[test]
    fn rename_respects_identifier_boundaries() {
        assert_eq!(
            rename_identifier("tex + texture + tex_2 + tex", "tex", "grid"),
            "grid + texture + tex_2 + grid"
        );
    }

    #[test]
    fn float_literals_truncate() {
        assert_eq!(truncate_float_literals("a + 3.0 * 2.75 - x1.0"), "a + 3 * 2 - x1.0");
    }

    #[test]
    fn entry_name_prefers_compute_function() {
        let code = "fn helper() {}\n@compute @workgroup_size(1)\nfn old(@builtin(global_invocation_id) g : vec3<u32>) {}";
        let synced = sync_entry_name(code, "Compute2");
        assert!(synced.contains("fn helper()"));
        assert!(synced.contains("fn Compute2(@builtin"));
    }

    #[test]
    fn entry_name_stub_when_no_function() {
        assert_eq!(sync_entry_name("// empty", "main"), "// empty\nfn main() {\n}\n");
    }
}
