//! Identifier helpers shared by the session, the composer and the compiler.
//!
//! User names (buffers, shaders, parameters) are free text in the editor but end up as WGSL
//! identifiers and entry points, so every consumer goes through these functions instead of
//! rolling its own cleanup.

/// Strip every character outside `[A-Za-z0-9_]` and make sure the result starts like an
/// identifier.
///
/// An empty result falls back to `fallback`; a leading digit gets a `_` prefix.
pub fn sanitize_identifier(name: &str, fallback: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let base = if stripped.is_empty() {
        fallback.to_string()
    } else {
        stripped
    };
    match base.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => base,
        _ => format!("_{base}"),
    }
}

/// Entry-point name for a shader: [`sanitize_identifier`] with `main` as the fallback.
///
/// WGSL reserves `_` and every name starting with `__`, so those collapse to one leading
/// underscore, or to `main` when nothing else is left.
pub fn sanitize_entry_name(name: &str) -> String {
    let entry = sanitize_identifier(name, "main");
    let rest = entry.trim_start_matches('_');
    if rest.is_empty() {
        "main".to_string()
    } else if rest.len() + 1 < entry.len() {
        format!("_{rest}")
    } else {
        entry
    }
}

/// Remove all whitespace, the way buffer names are normalized before they are stored.
pub fn collapse_whitespace(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Returns `true` when `candidate` collides (case-insensitively) with any of `existing`.
pub fn name_taken<'a>(candidate: &str, existing: impl IntoIterator<Item = &'a str>) -> bool {
    let lower = candidate.to_lowercase();
    existing.into_iter().any(|n| n.to_lowercase() == lower)
}

/// Make `base` unique among `existing` (case-insensitive).
///
/// A trailing number is incremented (`texture1` -> `texture2`); otherwise a counter starting
/// at 2 is appended.
pub fn unique_name<'a>(base: &str, existing: impl IntoIterator<Item = &'a str> + Clone) -> String {
    if !name_taken(base, existing.clone()) {
        return base.to_string();
    }

    let digits_at = base
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    let (prefix, mut counter) = match digits_at {
        Some(i) => {
            let n: u64 = base[i..].parse().unwrap_or(1);
            (&base[..i], n + 1)
        }
        None => (base, 2),
    };

    loop {
        let candidate = format!("{prefix}{counter}");
        if !name_taken(&candidate, existing.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Next default name of the form `{prefix}{n}` where `n` is one past the largest index
/// already used by a name matching `{prefix}<digits>` (case-insensitive).
pub fn next_default_name<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let lower_prefix = prefix.to_lowercase();
    let max_idx = existing
        .into_iter()
        .filter_map(|name| {
            let lower = name.trim().to_lowercase();
            let rest = lower.strip_prefix(&lower_prefix)?.trim_start();
            if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            rest.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0);
    format!("{prefix}{}", max_idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_invalid_characters() {
        assert_eq!(sanitize_identifier("my buffer-1", "texture"), "mybuffer1");
        assert_eq!(sanitize_identifier("é", "texture0"), "texture0");
    }

    #[test]
    fn leading_digit_gets_prefix() {
        assert_eq!(sanitize_identifier("3d grid", "x"), "_3dgrid");
    }

    #[test]
    fn entry_name_defaults_to_main() {
        assert_eq!(sanitize_entry_name("  "), "main");
        assert_eq!(sanitize_entry_name("Compute 1"), "Compute1");
        assert_eq!(sanitize_entry_name("_"), "main");
    }

    #[test]
    fn entry_name_never_starts_with_a_digit() {
        assert_eq!(sanitize_entry_name("3d"), "_3d");
        assert_eq!(sanitize_entry_name("2 pass blur"), "_2passblur");
        assert_eq!(sanitize_entry_name("__hidden"), "_hidden");
    }

    #[test]
    fn unique_name_increments_numeric_suffix() {
        let existing = ["texture1", "Texture2"];
        assert_eq!(unique_name("texture1", existing), "texture3");
        assert_eq!(unique_name("grid", ["GRID"]), "grid2");
        assert_eq!(unique_name("fresh", existing), "fresh");
    }

    #[test]
    fn next_default_name_uses_max_index() {
        let existing = ["texture1", "texture 7", "other9"];
        assert_eq!(next_default_name("texture", existing), "texture8");
        assert_eq!(next_default_name("Compute", []), "Compute1");
    }
}
