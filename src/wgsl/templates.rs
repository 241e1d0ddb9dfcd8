use crate::model::ScalarType;

/// Names of the system uniforms, in binding order starting at the uniform base.
pub const SYSTEM_UNIFORMS: [&str; 6] = ["step", "mouseX", "mouseY", "mouseZ", "mouseBtn", "keyCode"];

pub const FUNCTIONS_HEADER: &str = "// --- Functions ---";
pub const BUFFERS_HEADER: &str = "// --- Buffers ---";
pub const SYSTEM_HEADER: &str = "// --- System ---";
pub const SHADERS_HEADER: &str = "// --- Compute shaders ---";

pub fn build_buffer_declaration_wgsl(binding: u32, ident: &str, scalar_type: ScalarType) -> String {
    format!(
        "@group(0) @binding({binding}) var<storage, read_write> {ident} : array<{}>;",
        scalar_type.wgsl_type()
    )
}

pub fn build_uniform_declarations_wgsl(base: u32) -> Vec<String> {
    SYSTEM_UNIFORMS
        .iter()
        .zip(base..)
        .map(|(name, binding)| format!("@group(0) @binding({binding}) var<uniform> {name} : u32;"))
        .collect()
}

/// Increment shader a new project starts with.
pub fn build_default_shader_wgsl(entry: &str) -> String {
    [
        "@compute @workgroup_size(8, 8, 1)".to_string(),
        format!("fn {entry}(@builtin(global_invocation_id) gid : vec3<u32>) {{"),
        "    let index = gid.y * 64u + gid.x;".to_string(),
        "    if (index < arrayLength(&texture1)) {".to_string(),
        "        texture1[index] = texture1[index] + 1;".to_string(),
        "    }".to_string(),
        "}".to_string(),
    ]
    .join("\n")
}

pub fn build_default_library_wgsl() -> String {
    [
        "/* Example functions",
        "fn clamp01(value : f32) -> f32 {",
        "    return max(0.0, min(1.0, value));",
        "}",
        "",
        "fn lerp(a : f32, b : f32, t : f32) -> f32 {",
        "    return a + (b - a) * clamp01(t);",
        "} */",
    ]
    .join("\n")
}
