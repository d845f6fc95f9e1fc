//! Dependency-name normalization
//!
//! `Foo-2.5` -> `foo`, `boost++` -> `boostpp`, `libX ≥ 1.2` -> `libx`,
//! `glib-2.0>=2.56` -> `glib`.

use regex::Regex;
use std::sync::OnceLock;

fn version_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_]v?\d+(\.\d+)*$").expect("version suffix regex"))
}

/// Normalize a package reference into a cache key.
pub fn normalize_package_name(raw: &str) -> String {
    let mut name = raw.trim();

    // Version constraint: cut at the first comparison operator or space
    if let Some(pos) = name.find(|c: char| {
        c.is_whitespace() || matches!(c, '>' | '<' | '=' | '≥' | '≤' | '(' | ':')
    }) {
        name = &name[..pos];
    }

    let mut name = name.replace("++", "pp").to_lowercase();

    // Repeated suffixes like foo-1.2-3 collapse completely
    while let Some(m) = version_suffix().find(&name) {
        if m.start() == 0 {
            break;
        }
        name.truncate(m.start());
    }
    name
}
