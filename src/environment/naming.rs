//! C identifier mangling.
//!
//! Generated names use `$` as the namespace separator (a GNU C extension
//! accepted in identifiers), `_$` as the prefix for user variables, and a
//! filename-derived prefix so that identically named definitions in
//! different files cannot collide at link time.

use sha2::{Digest, Sha256};

use super::{Env, Namespace};
use std::rc::Rc;

/// Sanitize a user name into a valid C identifier fragment.
pub fn valid_c_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// The C name for a user variable.
pub fn user_id(name: &str) -> String {
    format!("_${}", valid_c_name(name))
}

/// A stable per-file identifier prefix: the sanitized base filename plus a
/// truncated SHA-256 of the full path. Deterministic across runs.
pub fn get_id_suffix(filename: &str) -> String {
    let base = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .split('.')
        .next()
        .unwrap_or(filename);
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    let digest = hasher.finalize();
    let mut hash = String::new();
    for byte in &digest[..4] {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("{}${}", valid_c_name(base), hash)
}

fn namespace_chain(ns: Option<&Rc<Namespace>>) -> String {
    let mut parts = vec![];
    let mut cursor = ns;
    while let Some(n) = cursor {
        parts.push(valid_c_name(&n.name));
        cursor = n.parent.as_ref();
    }
    parts.reverse();
    parts.join("$")
}

/// The `Chain$` prefix for names defined under a namespace (empty at the
/// top level of the builtin environment).
pub fn namespace_prefix(env: &Env, ns: Option<&Rc<Namespace>>) -> String {
    let chain = namespace_chain(ns);
    match (env.id_suffix.is_empty(), chain.is_empty()) {
        (true, true) => String::new(),
        (true, false) => format!("{chain}$"),
        (false, true) => format!("{}$", env.id_suffix),
        (false, false) => format!("{}${chain}$", env.id_suffix),
    }
}

/// Mangle `name` into its fully qualified C identifier under a namespace
/// chain. Examples for a file `foo.tm` (prefix `foo$1a2b3c4d`):
///
/// - top-level struct `Baz` → `foo$1a2b3c4d$Baz$$struct`
/// - method `Baz.area` → `foo$1a2b3c4d$Baz$area`
/// - module initializer → `foo$1a2b3c4d$initialize` (via name `$initialize`)
pub fn namespace_name(env: &Env, ns: Option<&Rc<Namespace>>, name: &str) -> String {
    let prefix = namespace_prefix(env, ns);
    if let Some(stripped) = name.strip_prefix('$') {
        // Names like `$initialize` splice directly onto the prefix.
        if prefix.is_empty() {
            return format!("${stripped}");
        }
        return format!("{}${stripped}", prefix.trim_end_matches('$'));
    }
    format!("{prefix}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::global_env;

    #[test]
    fn c_names_are_sanitized() {
        assert_eq!(valid_c_name("foo"), "foo");
        assert_eq!(valid_c_name("foo-bar"), "foo_bar");
        assert_eq!(valid_c_name("3d"), "_3d");
    }

    #[test]
    fn id_suffix_is_stable_and_distinct() {
        let a = get_id_suffix("dir/foo.tm");
        let b = get_id_suffix("dir/foo.tm");
        let c = get_id_suffix("other/foo.tm");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("foo$"));
    }

    #[test]
    fn namespace_names_chain() {
        let env = global_env(false);
        assert_eq!(namespace_name(&env, None, "Baz$$struct"), "Baz$$struct");
        let mut file_env = env.clone();
        file_env.id_suffix = "foo$12345678".into();
        assert_eq!(namespace_name(&file_env, None, "Baz$$struct"), "foo$12345678$Baz$$struct");
        assert_eq!(namespace_name(&file_env, None, "$initialize"), "foo$12345678$initialize");
    }
}
