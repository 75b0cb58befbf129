use std::path::{Path, PathBuf};

/// Expand a user-supplied working directory
///
/// `""` and `"~"` map to the home directory, `"~/x"` to `<home>/x`. Absolute
/// paths are used verbatim and relative ones start at the home directory.
/// Without a home directory `fallback` takes its place.
pub fn resolve_working_dir(raw: &str, home: Option<&Path>, fallback: &Path) -> PathBuf {
    let base = || home.unwrap_or(fallback).to_path_buf();
    match raw {
        "" | "~" => base(),
        _ => match raw.strip_prefix("~/") {
            Some(rest) => base().join(rest),
            None if Path::new(raw).is_absolute() => PathBuf::from(raw),
            None => base().join(raw),
        },
    }
}
