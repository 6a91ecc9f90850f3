//! Translation of remote object keys into local destination paths.
//!
//! Nothing here touches the filesystem; callers create directories only
//! after a key has been fully resolved and checked.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, S3FetchError};

/// Strip from `key` as many leading delimiter-bounded segments as `prefix`
/// contains delimiters.
///
/// A prefix may end part-way through a segment (`my/test/pre`), in which case
/// the whole segment is kept: `my/test/prefix/file` becomes `prefix/file`.
pub fn rollup_key<'a>(key: &'a str, prefix: &str, delimiter: &str) -> Result<&'a str> {
    if delimiter.is_empty() {
        return Err(S3FetchError::InvalidArgument(
            "delimiter must not be empty".to_string(),
        ));
    }

    if !key.starts_with(prefix) {
        return Err(S3FetchError::PrefixMismatch {
            key: key.to_string(),
            prefix: prefix.to_string(),
        });
    }

    if prefix.is_empty() {
        return Ok(key);
    }

    let depth = prefix.matches(delimiter).count();
    Ok(key.splitn(depth + 1, delimiter).last().unwrap_or(key))
}

/// Split a key on its last delimiter into `(directory, filename)`.
pub fn split_key<'a>(key: &'a str, delimiter: &str) -> (&'a str, &'a str) {
    if delimiter.is_empty() {
        return ("", key);
    }
    key.rsplit_once(delimiter).unwrap_or(("", key))
}

/// A key ending in the delimiter stands for an empty "folder".
pub fn is_directory_marker(key: &str, delimiter: &str) -> bool {
    !delimiter.is_empty() && key.ends_with(delimiter)
}

/// Resolve the local file a key downloads to.
///
/// Every segment is checked for `..`, root and drive components, so a key can
/// never escape `download_dir`.
pub fn resolve_destination(
    download_dir: &Path,
    key: &str,
    prefix: &str,
    delimiter: &str,
) -> Result<PathBuf> {
    let relative = rollup_key(key, prefix, delimiter)?;
    let (directory, filename) = split_key(relative, delimiter);

    let mut destination = download_dir.to_path_buf();
    if !directory.is_empty() {
        for segment in directory.split(delimiter) {
            push_segment(&mut destination, segment, key)?;
        }
    }

    if filename.is_empty() || push_segment(&mut destination, filename, key)? == 0 {
        return Err(S3FetchError::InvalidKey(key.to_string()));
    }

    Ok(destination)
}

/// Append one key segment, returning how many path components it added.
fn push_segment(path: &mut PathBuf, segment: &str, key: &str) -> Result<usize> {
    let mut pushed = 0;
    for component in Path::new(segment).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                pushed += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(S3FetchError::PathTraversal {
                    key: key.to_string(),
                });
            }
        }
    }
    Ok(pushed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_with_valid_prefix() {
        // (prefix, delimiter, key, expected)
        let cases = [
            ("", "/", "my/test/prefix/my_test_file", "my/test/prefix/my_test_file"),
            ("my/test/prefix/", "/", "my/test/prefix/my_test_file", "my_test_file"),
            ("my/test/prefix", "/", "my/test/prefix/my_test_file", "prefix/my_test_file"),
            ("my/test/pre", "/", "my/test/prefix/my_test_file", "prefix/my_test_file"),
            ("my/tes", "/", "my/test/prefix/my_test_file", "test/prefix/my_test_file"),
            ("my:test:prefix:", ":", "my:test:prefix:my_test_file", "my_test_file"),
            ("my:test:prefix", ":", "my:test:prefix:my_test_file", "prefix:my_test_file"),
            ("my:test:pre", ":", "my:test:prefix:my_test_file", "prefix:my_test_file"),
            ("sto", "/", "storage/object1", "storage/object1"),
            ("storage/obj", "/", "storage/object1", "object1"),
        ];

        for (prefix, delimiter, key, expected) in cases {
            assert_eq!(
                rollup_key(key, prefix, delimiter).unwrap(),
                expected,
                "prefix={prefix:?} key={key:?}"
            );
        }
    }

    #[test]
    fn test_rollup_with_invalid_prefix() {
        let cases = [
            ("my/test/pre/", "/", "my/test/prefix/my_test_file"),
            ("my:test:pre:", ":", "my:test:prefix:my_test_file"),
        ];

        for (prefix, delimiter, key) in cases {
            let err = rollup_key(key, prefix, delimiter).unwrap_err();
            assert!(matches!(err, S3FetchError::PrefixMismatch { .. }));
        }
    }

    #[test]
    fn test_rollup_rejects_empty_delimiter() {
        assert!(matches!(
            rollup_key("a/b", "a", ""),
            Err(S3FetchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("prefix/file", "/"), ("prefix", "file"));
        assert_eq!(split_key("file", "/"), ("", "file"));
        assert_eq!(
            split_key("my/test/prefix/my_test_file", "/"),
            ("my/test/prefix", "my_test_file")
        );
        assert_eq!(
            split_key("my/test/prefix/my_test_file", ":"),
            ("", "my/test/prefix/my_test_file")
        );
        assert_eq!(
            split_key("my:test:prefix:my_test_file", ":"),
            ("my:test:prefix", "my_test_file")
        );
    }

    #[test]
    fn test_directory_marker() {
        assert!(is_directory_marker("my/folder/", "/"));
        assert!(is_directory_marker("my:folder:", ":"));
        assert!(!is_directory_marker("my/folder/file", "/"));
        assert!(!is_directory_marker("my/folder/", ":"));
    }

    #[test]
    fn test_resolve_destination() {
        let root = Path::new("/downloads");

        assert_eq!(
            resolve_destination(root, "test/another_folder/console", "test/an", "/").unwrap(),
            root.join("another_folder").join("console")
        );
        assert_eq!(
            resolve_destination(root, "object1", "", "/").unwrap(),
            root.join("object1")
        );
        assert_eq!(
            resolve_destination(root, "my:test:prefix:file", "", ":").unwrap(),
            root.join("my").join("test").join("prefix").join("file")
        );
    }

    #[test]
    fn test_resolve_skips_empty_and_current_segments() {
        let root = Path::new("/downloads");
        assert_eq!(
            resolve_destination(root, "a//./b/file", "", "/").unwrap(),
            root.join("a").join("b").join("file")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = Path::new("/downloads");
        for key in ["../../etc/passwd", "a/../../b", "a/b/..", "x:..:y"] {
            let delimiter = if key.contains(':') { ":" } else { "/" };
            let err = resolve_destination(root, key, "", delimiter).unwrap_err();
            assert!(
                matches!(err, S3FetchError::PathTraversal { .. }),
                "key {key:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_absolute_segment() {
        // With a non-slash delimiter a segment may itself look like an absolute path
        let err = resolve_destination(Path::new("/downloads"), "/etc:passwd", "", ":").unwrap_err();
        assert!(matches!(err, S3FetchError::PathTraversal { .. }));
    }

    #[test]
    fn test_resolve_rejects_keys_without_file_name() {
        let root = Path::new("/downloads");
        assert!(matches!(
            resolve_destination(root, "folder/", "", "/"),
            Err(S3FetchError::InvalidKey(_))
        ));
        assert!(matches!(
            resolve_destination(root, "folder/.", "", "/"),
            Err(S3FetchError::InvalidKey(_))
        ));
    }
}
