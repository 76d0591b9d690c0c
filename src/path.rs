//! Source-to-destination path translation
//!
//! Backend paths are plain `/`-separated strings. A path visited under a
//! source root is rebased onto a destination root with exactly one
//! separator between the root and the remainder, whatever trailing
//! slashes either root carries.

use crate::error::{FanCopyError, Result};

/// Rebase `src_path` from `src_root` onto `dst_root`
///
/// ```
/// use fancopy::path::translate;
///
/// assert_eq!(translate("/src", "/dst", "/src/a/b.txt").unwrap(), "/dst/a/b.txt");
/// assert_eq!(translate("/src/", "/dst/", "/src/a/b.txt").unwrap(), "/dst/a/b.txt");
/// ```
pub fn translate(src_root: &str, dst_root: &str, src_path: &str) -> Result<String> {
    let rest = src_path.strip_prefix(src_root).ok_or_else(|| {
        FanCopyError::InvalidPath(format!("'{}' is not under '{}'", src_path, src_root))
    })?;

    let remainder = if src_root.ends_with('/') || rest.is_empty() {
        rest
    } else {
        // "/srcfoo" shares a prefix with "/src" but is not under it
        rest.strip_prefix('/').ok_or_else(|| {
            FanCopyError::InvalidPath(format!("'{}' is not under '{}'", src_path, src_root))
        })?
    };

    let mut dst_path = String::with_capacity(dst_root.len() + remainder.len() + 1);
    dst_path.push_str(dst_root);
    if !dst_root.ends_with('/') {
        dst_path.push('/');
    }
    dst_path.push_str(remainder);

    Ok(dst_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_translate_basic() {
        assert_eq!(translate("/src", "/dst1", "/src/a").unwrap(), "/dst1/a");
        assert_eq!(translate("/src", "/dst1", "/src/a/b.txt").unwrap(), "/dst1/a/b.txt");
    }

    #[test]
    fn test_translate_trailing_slashes() {
        let expected = "/dst/a/b.txt";
        for src_root in ["/src", "/src/"] {
            for dst_root in ["/dst", "/dst/"] {
                assert_eq!(translate(src_root, dst_root, "/src/a/b.txt").unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_translate_root_slash() {
        assert_eq!(translate("/", "/backup", "/etc/hosts").unwrap(), "/backup/etc/hosts");
        assert_eq!(translate("/data", "/", "/data/x").unwrap(), "/x");
    }

    #[test]
    fn test_translate_root_itself() {
        assert_eq!(translate("/src", "/dst", "/src").unwrap(), "/dst/");
    }

    #[test]
    fn test_translate_rejects_foreign_paths() {
        assert!(translate("/src", "/dst", "/other/file").is_err());
        assert!(translate("/src", "/dst", "/srcfoo/file").is_err());
    }

    proptest! {
        #[test]
        fn prop_trailing_slash_invariance(
            root in "/[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            dst in "/[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            rel in "[a-z0-9_.]{1,12}(/[a-z0-9_.]{1,12}){0,3}",
        ) {
            let src_path = format!("{}/{}", root, rel);
            let plain = translate(&root, &dst, &src_path).unwrap();
            let src_slash = translate(&format!("{}/", root), &dst, &src_path).unwrap();
            let dst_slash = translate(&root, &format!("{}/", dst), &src_path).unwrap();
            let both = translate(&format!("{}/", root), &format!("{}/", dst), &src_path).unwrap();

            prop_assert_eq!(&plain, &format!("{}/{}", dst, rel));
            prop_assert_eq!(&plain, &src_slash);
            prop_assert_eq!(&plain, &dst_slash);
            prop_assert_eq!(&plain, &both);
        }
    }
}
