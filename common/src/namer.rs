//! POSIX-`cp`-equivalent recursive naming.
//!
//! Translates a `(source, target)` pair plus pre-probed `target_exists` /
//! `target_is_dir` booleans into the concrete set of directories, files and
//! symlinks that must be created on the destination side, following exactly
//! the semantics of `cp -r`:
//!
//! - `cp -r source/ dest` — trailing slash on source is significant: if
//!   `dest` exists, the *contents* of `source` land directly in `dest`.
//! - `cp -r source dest` — without a trailing slash, a new directory
//!   `dest/source` is created (if `dest` exists) or `dest` itself becomes
//!   the copy of `source` (if `dest` does not exist).
//! - Symlinks are never followed while walking; they are recorded as
//!   symlinks to be recreated, not descended into.
//!
//! [`LinkRewrite`] selects whether absolute symlink targets that happen to
//! point inside the copied source tree are rewritten to point inside the
//! destination tree instead (the stricter "plus" variant), or left
//! byte-for-byte identical to the source (the default).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A symlink to recreate on the destination side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkEntry {
    /// Path of the symlink on the source side (for logging/errors only).
    pub source: PathBuf,
    /// Path at which the symlink must be created on the destination side.
    pub target: PathBuf,
    /// The value the new symlink should point at (possibly rewritten).
    pub link_target: PathBuf,
}

/// The result of walking `source` against a destination naming decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walk {
    /// `0` on success, `1` if `source` does not exist, `2` if the walk was
    /// aborted partway through by an I/O error (in which case all three
    /// lists below are empty).
    pub rc: i32,
    /// `(source_dir, target_dir)` pairs to create, in top-down order.
    pub dirs: Vec<(PathBuf, PathBuf)>,
    /// `(source_file, target_file)` pairs to copy.
    pub files: Vec<(PathBuf, PathBuf)>,
    /// Symlinks to recreate.
    pub symlinks: Vec<SymlinkEntry>,
}

/// Whether absolute symlink targets under the source tree are rewritten to
/// point under the destination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkRewrite {
    /// Preserve the symlink's recorded target verbatim (plain POSIX `cp`).
    #[default]
    Preserve,
    /// Rewrite targets whose directory component is an absolute path
    /// beneath `source_prefix` to the equivalent path beneath
    /// `target_prefix`; relative targets are left untouched.
    RewriteAbsolute,
}

fn split_tail(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `os.path.relpath(path, start)`-equivalent: express `path` relative to
/// `start`, purely lexically (neither need exist on disk).
fn relative_path(path: &Path, start: &Path) -> PathBuf {
    let path_abs: Vec<_> = path.components().collect();
    let start_abs: Vec<_> = start.components().collect();
    let common = path_abs
        .iter()
        .zip(start_abs.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut result = PathBuf::new();
    for _ in common..start_abs.len() {
        result.push("..");
    }
    for component in &path_abs[common..] {
        result.push(component.as_os_str());
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

fn build_link(
    rewrite: LinkRewrite,
    source: &Path,
    target: &Path,
    source_prefix: &Path,
    target_prefix: &Path,
) -> io::Result<SymlinkEntry> {
    let link_value = fs::read_link(source)?;
    let rewritten = match rewrite {
        LinkRewrite::Preserve => link_value.clone(),
        LinkRewrite::RewriteAbsolute => {
            let target_dir = link_value.parent().filter(|d| !d.as_os_str().is_empty());
            let file_name = link_value
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_default();
            let rel_target_dir = match target_dir {
                Some(dir) if dir.is_absolute() => relative_path(dir, source_prefix),
                Some(dir) => dir.to_path_buf(),
                None => PathBuf::new(),
            };
            let rel_target = if rel_target_dir.as_os_str().is_empty() {
                file_name.clone()
            } else {
                rel_target_dir.join(&file_name)
            };
            if rel_target != link_value {
                target_prefix.join(&rel_target)
            } else {
                link_value.clone()
            }
        }
    };
    Ok(SymlinkEntry {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        link_target: rewritten,
    })
}

#[allow(clippy::too_many_arguments)]
fn walk_into(
    rewrite: LinkRewrite,
    source_prefix: &Path,
    target_prefix: &Path,
    dirpath: &Path,
    reldir: &Path,
    out: &mut Walk,
) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dirpath)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    let mut subdirs = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        let sourcename = dirpath.join(&name);
        let targetname = if reldir.as_os_str().is_empty() {
            target_prefix.join(&name)
        } else {
            target_prefix.join(reldir).join(&name)
        };
        let meta = fs::symlink_metadata(&sourcename)?;
        if meta.file_type().is_symlink() {
            let link = build_link(rewrite, &sourcename, &targetname, source_prefix, target_prefix)?;
            out.symlinks.push(link);
        } else if meta.is_dir() {
            out.dirs.push((sourcename.clone(), targetname.clone()));
            let sub_reldir = if reldir.as_os_str().is_empty() {
                PathBuf::from(&name)
            } else {
                reldir.join(&name)
            };
            subdirs.push((sourcename, sub_reldir));
        } else {
            out.files.push((sourcename, targetname));
        }
    }
    for (sub_source, sub_reldir) in subdirs {
        walk_into(rewrite, source_prefix, target_prefix, &sub_source, &sub_reldir, out)?;
    }
    Ok(())
}

/// Build the destination-side directory/file/symlink plan for copying
/// `source` to `target`.
///
/// `source` is taken as a string (not just a `Path`) because a trailing
/// slash changes behavior (see module docs) and `Path` normalization would
/// otherwise discard it.
pub fn build_dirs_files_links(
    source: &str,
    target: &Path,
    target_exists: bool,
    target_is_dir: bool,
    rewrite: LinkRewrite,
) -> Walk {
    let source_path = Path::new(source);
    let meta = match fs::symlink_metadata(source_path) {
        Ok(m) => m,
        Err(_) => return Walk {
            rc: 1,
            ..Default::default()
        },
    };

    if meta.file_type().is_symlink() {
        let value = match fs::read_link(source_path) {
            Ok(v) => v,
            Err(_) => return Walk { rc: 1, ..Default::default() },
        };
        let tname = if target_is_dir {
            target.join(source_path.file_name().unwrap_or_default())
        } else {
            target.to_path_buf()
        };
        return Walk {
            rc: 0,
            dirs: vec![],
            files: vec![],
            symlinks: vec![SymlinkEntry {
                source: source_path.to_path_buf(),
                target: tname,
                link_target: value,
            }],
        };
    }

    if meta.is_dir() && (target_is_dir || !target_exists) {
        let stail = split_tail(source);
        let has_trailing_slash = stail.is_empty();

        let target_prefix = if target_exists && !has_trailing_slash {
            target.join(stail)
        } else {
            target.to_path_buf()
        };

        let mut out = Walk::default();
        if !target_exists || !has_trailing_slash {
            out.dirs.push((source_path.to_path_buf(), target_prefix.clone()));
        }

        match walk_into(rewrite, source_path, &target_prefix, source_path, Path::new(""), &mut out) {
            Ok(()) => out,
            Err(_) => Walk {
                rc: 2,
                ..Default::default()
            },
        }
    } else if !meta.is_dir() {
        // regular file, block/char device, fifo, etc.
        let tname = if target_is_dir {
            target.join(source_path.file_name().unwrap_or_default())
        } else {
            target.to_path_buf()
        };
        Walk {
            rc: 0,
            dirs: vec![],
            files: vec![(source_path.to_path_buf(), tname)],
            symlinks: vec![],
        }
    } else {
        Walk {
            rc: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn trailing_slash_copies_contents_into_existing_dest() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir(&source).unwrap();
        touch(&source.join("a.txt"));
        let dest = tmp.path().join("dest");
        fs::create_dir(&dest).unwrap();

        let source_str = format!("{}/", source.display());
        let walk = build_dirs_files_links(&source_str, &dest, true, true, LinkRewrite::Preserve);
        assert_eq!(walk.rc, 0);
        // no extra root dir entry because trailing slash + dest exists
        assert!(walk.dirs.is_empty());
        assert_eq!(walk.files.len(), 1);
        assert_eq!(walk.files[0].1, dest.join("a.txt"));
    }

    #[test]
    fn no_trailing_slash_creates_nested_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir(&source).unwrap();
        touch(&source.join("a.txt"));
        let dest = tmp.path().join("dest");
        fs::create_dir(&dest).unwrap();

        let source_str = source.display().to_string();
        let walk = build_dirs_files_links(&source_str, &dest, true, true, LinkRewrite::Preserve);
        assert_eq!(walk.rc, 0);
        assert_eq!(walk.dirs.len(), 1);
        assert_eq!(walk.dirs[0].1, dest.join("source"));
        assert_eq!(walk.files[0].1, dest.join("source").join("a.txt"));
    }

    #[test]
    fn symlinks_are_not_descended_into() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir(&source).unwrap();
        let real_dir = tmp.path().join("elsewhere");
        fs::create_dir(&real_dir).unwrap();
        touch(&real_dir.join("inside.txt"));
        symlink(&real_dir, source.join("link_to_dir")).unwrap();

        let dest = tmp.path().join("dest");
        let source_str = source.display().to_string();
        let walk = build_dirs_files_links(&source_str, &dest, false, false, LinkRewrite::Preserve);
        assert_eq!(walk.rc, 0);
        assert_eq!(walk.symlinks.len(), 1);
        assert!(walk.dirs.iter().all(|(_, t)| t != &dest.join("link_to_dir")));
    }

    #[test]
    fn missing_source_is_rc_1() {
        let walk = build_dirs_files_links("/no/such/path", Path::new("/tmp/x"), false, false, LinkRewrite::Preserve);
        assert_eq!(walk.rc, 1);
    }

    #[test]
    fn rewrite_absolute_link_under_source_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir(&source).unwrap();
        touch(&source.join("real.txt"));
        let abs_target = source.join("real.txt");
        symlink(&abs_target, source.join("abslink")).unwrap();

        let dest = tmp.path().join("dest");
        let source_str = source.display().to_string();
        let walk = build_dirs_files_links(&source_str, &dest, false, false, LinkRewrite::RewriteAbsolute);
        let link = walk
            .symlinks
            .iter()
            .find(|s| s.target.ends_with("abslink"))
            .unwrap();
        assert_eq!(link.link_target, dest.join("real.txt"));
    }

    #[test]
    fn relative_link_target_untouched_by_rewrite() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir(&source).unwrap();
        symlink("../outside", source.join("rel_link")).unwrap();

        let dest = tmp.path().join("dest");
        let source_str = source.display().to_string();
        let walk = build_dirs_files_links(&source_str, &dest, false, false, LinkRewrite::RewriteAbsolute);
        let link = walk
            .symlinks
            .iter()
            .find(|s| s.target.ends_with("rel_link"))
            .unwrap();
        assert_eq!(link.link_target, PathBuf::from("../outside"));
    }
}
