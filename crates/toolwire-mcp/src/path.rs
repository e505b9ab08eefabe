//! PATH construction for provider processes.

use std::collections::HashSet;
use std::env::{self, JoinPathsError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Build the child's PATH: `<module_search_path>/.bin` first, then `base`.
///
/// Entries are deduplicated, first occurrence wins. Entries are kept as raw
/// OS strings, so a non-UTF-8 directory in `base` survives unchanged. Fails
/// only when the module search path itself contains the separator.
pub fn build_effective_path(
    module_search_path: &str,
    base: Option<&OsStr>,
) -> Result<OsString, JoinPathsError> {
    let bin_dir = Path::new(module_search_path).join(".bin");
    let inherited = base.into_iter().flat_map(env::split_paths);

    let mut seen = HashSet::new();
    let entries: Vec<PathBuf> = std::iter::once(bin_dir)
        .chain(inherited)
        .filter(|entry| !entry.as_os_str().is_empty())
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    env::join_paths(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(path: &OsStr) -> Vec<PathBuf> {
        env::split_paths(path).collect()
    }

    #[test]
    #[cfg(unix)]
    fn test_bin_dir_comes_first() {
        let path =
            build_effective_path("/opt/app/node_modules", Some(OsStr::new("/usr/bin:/bin"))).unwrap();
        assert_eq!(
            entries(&path),
            vec![
                PathBuf::from("/opt/app/node_modules/.bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin"),
            ]
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_deduplicates_entries() {
        let path =
            build_effective_path("/nm", Some(OsStr::new("/nm/.bin:/usr/bin::/usr/bin"))).unwrap();
        assert_eq!(
            entries(&path),
            vec![PathBuf::from("/nm/.bin"), PathBuf::from("/usr/bin")]
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_non_utf8_entries_are_kept() {
        use std::os::unix::ffi::OsStrExt;

        let base = OsStr::from_bytes(b"/usr/bin:/opt/caf\xe9/bin");
        let path = build_effective_path("/nm", Some(base)).unwrap();
        assert_eq!(
            entries(&path),
            vec![
                PathBuf::from("/nm/.bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from(OsStr::from_bytes(b"/opt/caf\xe9/bin")),
            ]
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_separator_in_module_path_rejected() {
        assert!(build_effective_path("/a:/b", None).is_err());
    }

    #[test]
    fn test_missing_base_path() {
        let path = build_effective_path("nm", None).unwrap();
        assert_eq!(entries(&path).len(), 1);
    }
}
