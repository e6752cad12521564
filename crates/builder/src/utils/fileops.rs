//! File system operations for the staging root

use globset::GlobBuilder;
use ignore::WalkBuilder;
use kiln_errors::{BuildError, Error};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Symlinks followed while resolving one image path before giving up
const MAX_SYMLINK_HOPS: usize = 40;

/// An entry matched by a glob, relative to the tree it was matched in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobMatch {
    pub relative: PathBuf,
    pub is_dir: bool,
}

/// Resolve `path` against the image directory `base` and normalize it
///
/// The result is always absolute inside the image. `..` stops at the image
/// root, so the result can never point outside it.
#[must_use]
pub fn normalize_image_path(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{base}/{path}")
    };

    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("/{}", parts.join("/"))
}

/// Host location of `image_path` with every symlink resolved inside `root`
///
/// Links are followed the way the image would see them: absolute targets
/// restart at `root` and `..` stops there. The returned path has no symlink
/// components below `root`, so writes through it cannot leave the image.
///
/// # Errors
///
/// Returns `InvalidPath` when the links form a loop.
pub async fn resolve_in_root(root: &Path, image_path: &Path) -> Result<PathBuf, Error> {
    let mut resolved = PathBuf::new();
    let mut pending: Vec<OsString> = Vec::new();
    push_components(&mut pending, image_path);
    let mut hops = 0;

    while let Some(part) = pending.pop() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        if part == "/" {
            resolved = PathBuf::new();
            continue;
        }

        let candidate = root.join(&resolved).join(&part);
        let is_link = fs::symlink_metadata(&candidate)
            .await
            .is_ok_and(|m| m.file_type().is_symlink());
        if !is_link {
            resolved.push(&part);
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(BuildError::InvalidPath {
                path: image_path.display().to_string(),
                reason: "too many levels of symbolic links".to_string(),
            }
            .into());
        }
        let target = fs::read_link(&candidate)
            .await
            .map_err(|e| Error::io_with_path(&e, &candidate))?;
        push_components(&mut pending, &target);
    }

    Ok(root.join(resolved))
}

/// Queue the components of `path` so the first one is popped first
fn push_components(pending: &mut Vec<OsString>, path: &Path) {
    let parts: Vec<OsString> = path
        .components()
        .filter_map(|c| match c {
            Component::RootDir | Component::Prefix(_) => Some(OsString::from("/")),
            Component::ParentDir => Some(OsString::from("..")),
            Component::Normal(name) => Some(name.to_os_string()),
            Component::CurDir => None,
        })
        .collect();
    pending.extend(parts.into_iter().rev());
}

/// Whether `path` lies at or below one of the `excluded` paths
#[must_use]
pub fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|skip| path.starts_with(skip))
}

/// Whether a pattern contains glob metacharacters
#[must_use]
pub fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The leading components of a pattern that contain no metacharacters
#[must_use]
pub fn literal_prefix(pattern: &str) -> PathBuf {
    Path::new(pattern)
        .components()
        .map(|c| c.as_os_str())
        .take_while(|c| !has_glob_meta(&c.to_string_lossy()))
        .collect()
}

/// Match `pattern` against the tree rooted at `root`
///
/// `*` does not cross `/`. A pattern without metacharacters matches the
/// single entry it names, if present. Entries under `excluded` are never
/// matched or walked. The returned matches are sorted.
///
/// # Errors
///
/// Returns an error if the pattern is not a valid glob or the tree cannot be
/// walked.
pub fn match_glob(
    root: &Path,
    pattern: &str,
    excluded: &[PathBuf],
) -> Result<Vec<GlobMatch>, Error> {
    let pattern = pattern.trim_start_matches("./").trim_end_matches('/');

    if pattern.is_empty() || pattern == "." {
        return Ok(vec![GlobMatch {
            relative: PathBuf::new(),
            is_dir: root.is_dir(),
        }]);
    }

    if !has_glob_meta(pattern) {
        let candidate = root.join(pattern);
        if is_excluded(&candidate, excluded) {
            return Ok(Vec::new());
        }
        return Ok(match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => vec![GlobMatch {
                relative: PathBuf::from(pattern),
                is_dir: meta.is_dir(),
            }],
            Err(_) => Vec::new(),
        });
    }

    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| BuildError::InvalidPath {
            path: pattern.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher();

    let walk_root = root.join(literal_prefix(pattern));
    if !walk_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    let skip = excluded.to_vec();
    let walker = WalkBuilder::new(&walk_root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| !is_excluded(entry.path(), &skip))
        .build();

    for entry in walker {
        let entry = entry
            .map_err(|e| Error::internal(format!("failed to walk {}: {e}", root.display())))?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if glob.is_match(relative) {
            matches.push(GlobMatch {
                relative: relative.to_path_buf(),
                is_dir: entry.file_type().is_some_and(|t| t.is_dir()),
            });
        }
    }

    Ok(matches)
}

/// Drop matches nested inside another matched directory
///
/// Matched directories are copied whole, so their contents need no second
/// copy.
#[must_use]
pub fn prune_nested(matches: Vec<GlobMatch>) -> Vec<GlobMatch> {
    let mut kept: Vec<GlobMatch> = Vec::with_capacity(matches.len());
    for candidate in matches {
        let nested = kept
            .iter()
            .any(|m| m.is_dir && candidate.relative.starts_with(&m.relative));
        if !nested {
            kept.push(candidate);
        }
    }
    kept
}

/// Copy a file, directory or symlink to `dst`, creating parent directories
///
/// `dst` must already be resolved with [`resolve_in_root`]. Symlinks met
/// below it are replaced, never written through.
///
/// # Errors
///
/// Returns an error if any filesystem operation fails.
pub async fn copy_entry(src: &Path, dst: &Path, excluded: &[PathBuf]) -> Result<(), Error> {
    let meta = fs::symlink_metadata(src)
        .await
        .map_err(|e| Error::io_with_path(&e, src))?;

    if meta.is_dir() {
        return copy_directory_recursive(src, dst, excluded).await;
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_with_path(&e, parent))?;
    }

    if meta.file_type().is_symlink() {
        copy_symlink(src, dst).await
    } else {
        copy_file(src, dst).await
    }
}

/// Remove `path` if it is a symlink, so the next write creates a real entry
async fn unlink_symlink(path: &Path) -> Result<(), Error> {
    if fs::symlink_metadata(path)
        .await
        .is_ok_and(|m| m.file_type().is_symlink())
    {
        fs::remove_file(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
    }
    Ok(())
}

async fn copy_file(src: &Path, dst: &Path) -> Result<(), Error> {
    unlink_symlink(dst).await?;
    fs::copy(src, dst)
        .await
        .map_err(|e| Error::io_with_path(&e, dst))?;
    Ok(())
}

async fn copy_symlink(src: &Path, dst: &Path) -> Result<(), Error> {
    let target = fs::read_link(src)
        .await
        .map_err(|e| Error::io_with_path(&e, src))?;
    if fs::symlink_metadata(dst).await.is_ok() {
        fs::remove_file(dst)
            .await
            .map_err(|e| Error::io_with_path(&e, dst))?;
    }
    fs::symlink(&target, dst)
        .await
        .map_err(|e| Error::io_with_path(&e, dst))?;
    Ok(())
}

/// Recursively copy directory contents, skipping anything under `excluded`
pub fn copy_directory_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
    excluded: &'a [PathBuf],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        unlink_symlink(dst).await?;
        fs::create_dir_all(dst)
            .await
            .map_err(|e| Error::io_with_path(&e, dst))?;

        let mut entries = fs::read_dir(src)
            .await
            .map_err(|e| Error::io_with_path(&e, src))?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if is_excluded(&entry_path, excluded) {
                continue;
            }
            let dst_path = dst.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                copy_directory_recursive(&entry_path, &dst_path, excluded).await?;
            } else if file_type.is_symlink() {
                copy_symlink(&entry_path, &dst_path).await?;
            } else {
                copy_file(&entry_path, &dst_path).await?;
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_image_path() {
        assert_eq!(normalize_image_path("/", "app"), "/app");
        assert_eq!(normalize_image_path("/app", "."), "/app");
        assert_eq!(normalize_image_path("/app", "src/../lib/"), "/app/lib");
        assert_eq!(normalize_image_path("/app", "/srv"), "/srv");
        assert_eq!(normalize_image_path("/app", "../../../etc"), "/etc");
        assert_eq!(normalize_image_path("/", ".."), "/");
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("docker/*.sh"), PathBuf::from("docker"));
        assert_eq!(literal_prefix("*"), PathBuf::new());
        assert_eq!(literal_prefix("a/b/c.txt"), PathBuf::from("a/b/c.txt"));
        assert_eq!(literal_prefix("src/**/mod.rs"), PathBuf::from("src"));
    }

    #[test]
    fn test_match_glob_star_stays_in_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("docker/nested")).unwrap();
        std::fs::write(root.join("docker/entry.sh"), "#!/bin/sh").unwrap();
        std::fs::write(root.join("docker/nested/deep.sh"), "#!/bin/sh").unwrap();
        std::fs::write(root.join("docker/readme.md"), "docs").unwrap();

        let matches = match_glob(root, "docker/*.sh", &[]).unwrap();
        assert_eq!(
            matches,
            vec![GlobMatch {
                relative: PathBuf::from("docker/entry.sh"),
                is_dir: false
            }]
        );

        let deep = match_glob(root, "docker/**/*.sh", &[]).unwrap();
        assert_eq!(deep.len(), 2);

        assert!(match_glob(root, "missing/*.sh", &[]).unwrap().is_empty());
        assert!(match_glob(root, "nothing-here.txt", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_prune_nested() {
        let matches = vec![
            GlobMatch {
                relative: PathBuf::from("app"),
                is_dir: true,
            },
            GlobMatch {
                relative: PathBuf::from("app/main.py"),
                is_dir: false,
            },
            GlobMatch {
                relative: PathBuf::from("pyproject.toml"),
                is_dir: false,
            },
        ];
        let kept = prune_nested(matches);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].relative, PathBuf::from("pyproject.toml"));
    }

    #[tokio::test]
    async fn test_copy_directory_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("pkg")).unwrap();
        std::fs::write(src.join("pkg/mod.py"), "x = 1").unwrap();
        std::fs::write(src.join("main.py"), "print()").unwrap();

        let dst = temp.path().join("dst");
        copy_directory_recursive(&src, &dst, &[]).await.unwrap();

        assert_eq!(std::fs::read_to_string(dst.join("pkg/mod.py")).unwrap(), "x = 1");
        assert!(dst.join("main.py").is_file());
    }

    #[test]
    fn test_excluded_entries_are_not_matched() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("kiln-out/app/rootfs")).unwrap();
        std::fs::write(root.join("kiln-out/app/image.json"), "{}").unwrap();
        std::fs::write(root.join("main.py"), "print()").unwrap();
        let excluded = vec![root.join("kiln-out")];

        let all = match_glob(root, "**/*", &excluded).unwrap();
        assert_eq!(
            all,
            vec![GlobMatch {
                relative: PathBuf::from("main.py"),
                is_dir: false
            }]
        );
        assert!(match_glob(root, "kiln-out/app", &excluded).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_skips_excluded_subtree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("kiln-out/.kiln-staging-1")).unwrap();
        std::fs::write(src.join("main.py"), "print()").unwrap();

        let dst = temp.path().join("dst");
        copy_directory_recursive(&src, &dst, &[src.join("kiln-out")])
            .await
            .unwrap();

        assert!(dst.join("main.py").is_file());
        assert!(!dst.join("kiln-out").exists());
    }

    #[tokio::test]
    async fn test_resolve_in_root_keeps_links_inside() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(root.join("usr/lib")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();
        std::os::unix::fs::symlink("/usr/lib", root.join("lib")).unwrap();
        std::os::unix::fs::symlink("../../../..", root.join("usr/up")).unwrap();

        // An absolute host target is reinterpreted inside the image
        let escaped = resolve_in_root(&root, Path::new("/escape/created"))
            .await
            .unwrap();
        assert!(escaped.starts_with(&root));
        assert!(!escaped.starts_with(&outside));

        assert_eq!(
            resolve_in_root(&root, Path::new("/lib/libc.so")).await.unwrap(),
            root.join("usr/lib/libc.so")
        );
        assert_eq!(
            resolve_in_root(&root, Path::new("/usr/up/etc")).await.unwrap(),
            root.join("etc")
        );
    }

    #[tokio::test]
    async fn test_resolve_in_root_detects_loops() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::os::unix::fs::symlink("b", root.join("a")).unwrap();
        std::os::unix::fs::symlink("a", root.join("b")).unwrap();

        let err = resolve_in_root(root, Path::new("/a/file")).await.unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_copy_replaces_symlink_destinations() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("data")).unwrap();
        std::fs::write(src.join("data/payload"), "p").unwrap();
        let dst = temp.path().join("dst");
        std::fs::create_dir_all(&dst).unwrap();
        std::os::unix::fs::symlink(&outside, dst.join("data")).unwrap();

        copy_directory_recursive(&src, &dst, &[]).await.unwrap();

        assert!(dst.join("data/payload").is_file());
        assert!(!outside.join("payload").exists());
    }
}
