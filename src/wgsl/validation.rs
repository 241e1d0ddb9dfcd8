//! Static pre-checks and WGSL compilation using the naga library.
//!
//! Compiler positions refer to the composed text; they are mapped back onto fragments
//! through the module's [`SourceMap`].

use std::error::Error as _;

use once_cell_regex::regex;

use crate::diagnostics::{Diagnostic, Severity};
use crate::error::StaticWgslError;
use crate::wgsl::compose::ComposedModule;
use crate::wgsl::source_map::SourceMap;

/// Replace comment text with spaces, keeping newlines so line numbers survive.
fn mask_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut block_depth = 0usize;
    let mut in_line = false;
    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        if in_line {
            if c == b'\n' {
                in_line = false;
                out.push(b'\n');
            } else {
                out.push(b' ');
            }
            i += 1;
        } else if block_depth > 0 {
            if c == b'*' && next == Some(b'/') {
                block_depth -= 1;
                out.extend_from_slice(b"  ");
                i += 2;
            } else if c == b'/' && next == Some(b'*') {
                block_depth += 1;
                out.extend_from_slice(b"  ");
                i += 2;
            } else {
                out.push(if c == b'\n' { b'\n' } else { b' ' });
                i += 1;
            }
        } else if c == b'/' && next == Some(b'/') {
            in_line = true;
            out.extend_from_slice(b"  ");
            i += 2;
        } else if c == b'/' && next == Some(b'*') {
            block_depth = 1;
            out.extend_from_slice(b"  ");
            i += 2;
        } else {
            out.push(c);
            i += 1;
        }
    }
    // Comment bytes become ASCII spaces, so the output is still UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Cheap text checks: a `fn name{` without parameter list, and the global brace balance.
pub fn static_checks(source: &str) -> Vec<StaticWgslError> {
    let masked = mask_comments(source);
    let mut errors = Vec::new();

    let missing_parens = regex!(r"\bfn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{");
    for (idx, line) in masked.lines().enumerate() {
        if let Some(caps) = missing_parens.captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            errors.push(StaticWgslError::MissingFnParentheses {
                line: idx + 1,
                name: name.to_string(),
            });
        }
    }

    let balance: i64 = masked
        .bytes()
        .map(|b| match b {
            b'{' => 1,
            b'}' => -1,
            _ => 0,
        })
        .sum();
    if balance != 0 {
        errors.push(StaticWgslError::UnbalancedBraces { balance });
    }
    errors
}

/// Static check results as attributed diagnostics.
pub fn static_diagnostics(module: &ComposedModule) -> Vec<Diagnostic> {
    static_checks(&module.code)
        .into_iter()
        .map(|err| {
            let location = match &err {
                StaticWgslError::MissingFnParentheses { line, .. } => module.source_map.resolve(*line, 1),
                StaticWgslError::UnbalancedBraces { .. } => None,
            };
            Diagnostic::error(err.to_string(), location)
        })
        .collect()
}

/// Parse and validate a composed module.
pub fn compile_module(module: &ComposedModule) -> Result<naga::Module, Vec<Diagnostic>> {
    compile_wgsl(&module.code, &module.source_map)
}

pub fn compile_wgsl(source: &str, map: &SourceMap) -> Result<naga::Module, Vec<Diagnostic>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        let location = e
            .location(source)
            .and_then(|loc| map.resolve(loc.line_number as usize, loc.line_position as usize));
        let mut message = e.message().to_string();
        for (_, label) in e.labels() {
            if !label.is_empty() && label != message {
                message.push_str(&format!(" ({label})"));
            }
        }
        vec![Diagnostic::new(Severity::Error, message, location)]
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| {
        let location = e
            .location(source)
            .and_then(|loc| map.resolve(loc.line_number as usize, loc.line_position as usize));
        let inner = e.as_inner();
        let mut message = inner.to_string();
        let mut cause = inner.source();
        while let Some(err) = cause {
            message.push_str(&format!(": {err}"));
            cause = err.source();
        }
        vec![Diagnostic::new(Severity::Error, message, location)]
    })?;

    Ok(module)
}

/// Names of the module's compute entry points.
pub fn compute_entry_points(module: &naga::Module) -> Vec<&str> {
    module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .map(|ep| ep.name.as_str())
        .collect()
}

/// `(name, binding)` of every resource variable in group 0.
pub fn resource_bindings(module: &naga::Module) -> Vec<(String, u32)> {
    module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            (binding.group == 0).then(|| (var.name.clone().unwrap_or_default(), binding.binding))
        })
        .collect()
}
