//! Versioned-identifier helpers
//!
//! PDG objects carry versioned identifiers of the shape
//! `function.param-v1`; reports and memo keys want the bare parameter name.

/// Bare parameter name of a versioned identifier
/// (`fn.target-v1` -> `target`). `argv` bindings collapse to `"argv"`.
pub fn param_display_name(full: &str) -> String {
    if full.contains("argv") {
        return "argv".to_string();
    }
    let after_dot = full.split('.').nth(1).unwrap_or(full);
    after_dot
        .split('-')
        .next()
        .unwrap_or(after_dot)
        .to_string()
}

/// Render a dotted versioned name (`module.exports-o1.foo-v2`) as its plain
/// source form (`module.exports.foo`). Numeric segments and `-o` suffixes
/// mark parser-internal versions and are dropped.
pub fn format_source_name(input: &str) -> String {
    let mut words = Vec::new();
    for part in input.split('.') {
        if part.starts_with("-o") {
            break;
        }
        if part.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        words.push(part.split('-').next().unwrap_or(part));
    }
    words.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_function_prefix_and_version() {
        assert_eq!(param_display_name("handler.req-v3"), "req");
        assert_eq!(param_display_name("f.a-o1"), "a");
    }

    #[test]
    fn argv_collapses() {
        assert_eq!(param_display_name("main.process.argv-v1"), "argv");
    }

    #[test]
    fn bare_names_pass_through() {
        assert_eq!(param_display_name("req"), "req");
        assert_eq!(param_display_name("req-v1"), "req");
    }

    #[test]
    fn source_names_drop_versions() {
        assert_eq!(format_source_name("module.exports-o1"), "module.exports");
        assert_eq!(
            format_source_name("module.exports-v1.foo-v2"),
            "module.exports.foo"
        );
    }
}
