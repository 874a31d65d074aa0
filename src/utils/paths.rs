//! Path sanitization for received names.
//!
//! Received file and archive entry names are peer-controlled input and
//! must never escape the download directory.

use std::path::PathBuf;

/// Sanitize a (possibly adversarial) relative path for safe use under the
/// download directory.
///
/// - Normalizes `\` to `/`.
/// - Strips `.` and `..` components.
/// - Keeps only alphanumeric chars plus `.`, `-`, `_`, and ` ` per component.
/// - Falls back to `"file"` when the result would otherwise be empty.
pub fn sanitize_relative_path(name: &str) -> PathBuf {
    let normalized = name.replace('\\', "/");
    let mut result = PathBuf::new();

    for part in normalized.split('/').filter(|s| !s.is_empty()) {
        if matches!(part, "." | "..") {
            continue;
        }
        let safe: String = part
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
            .collect();
        if !safe.is_empty() {
            result.push(safe);
        }
    }

    if result.as_os_str().is_empty() {
        PathBuf::from("file")
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize_relative_path("a.bin"), PathBuf::from("a.bin"));
        assert_eq!(
            sanitize_relative_path("dir/notes.txt"),
            PathBuf::from("dir/notes.txt")
        );
    }

    #[test]
    fn traversal_components_are_stripped() {
        assert_eq!(
            sanitize_relative_path("../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(
            sanitize_relative_path("..\\..\\secret.txt"),
            PathBuf::from("secret.txt")
        );
        assert_eq!(sanitize_relative_path("./a.txt"), PathBuf::from("a.txt"));
    }

    #[test]
    fn degenerate_names_fall_back() {
        assert_eq!(sanitize_relative_path(""), PathBuf::from("file"));
        assert_eq!(sanitize_relative_path("../.."), PathBuf::from("file"));
        assert_eq!(sanitize_relative_path("///"), PathBuf::from("file"));
    }
}
