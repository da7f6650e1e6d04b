//! Lazy discovery of the files a batch should consider.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A file found by [`Walk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    /// The last component of `path`, which include patterns are tested on.
    pub name: String,
}

/// Depth-first walk over a set of roots.
///
/// - Directory entries are visited in sorted order.
/// - A directory is skipped, with everything below it, when one of its path
///   components matches an ignore pattern.
/// - A file is yielded when its name matches one of the include patterns.
/// - A root that is a file is yielded as-is, whatever the patterns say.
///
/// Patterns are anchored at the start, not at the end: `IMG` matches
/// `IMG_0001.jpg`. A leading `./` is stripped from yielded paths.
pub struct Walk {
    include: Vec<Regex>,
    ignore: Vec<Regex>,
    /// Paths still to visit, the next one last.
    stack: Vec<(PathBuf, bool)>,
}
impl Walk {
    pub fn new<P, I, G>(roots: impl IntoIterator<Item = P>, include: I, ignore: G) -> Result<Self>
    where
        P: Into<PathBuf>,
        I: IntoIterator,
        I::Item: AsRef<str>,
        G: IntoIterator,
        G::Item: AsRef<str>,
    {
        let mut stack: Vec<_> = roots.into_iter().map(|root| (root.into(), true)).collect();
        stack.reverse();
        Ok(Self { include: anchored(include)?, ignore: anchored(ignore)?, stack })
    }

    fn ignored(&self, dir: &Path) -> bool {
        dir.components().any(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.ignore.iter().any(|re| re.is_match(&name))
            },
            _ => false,
        })
    }

    fn included(&self, name: &str) -> bool {
        self.include.iter().any(|re| re.is_match(name))
    }

    /// Queues the sorted children of `dir`.
    fn descend(&mut self, dir: &Path) -> Result<()> {
        let mut children = fs::read_dir(dir)
            .or_raise(|| ErrorKind::Io)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .or_raise(|| ErrorKind::Io)?;
        children.sort();
        self.stack.extend(children.into_iter().rev().map(|child| (child, false)));
        Ok(())
    }
}

impl Iterator for Walk {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, root)) = self.stack.pop() {
            let Some(kind) = Kind::of(&path, root) else {
                if root {
                    tracing::warn!(path = %path.display(), "Not a file or directory");
                }
                continue;
            };
            match kind {
                Kind::Dir if self.ignored(&path) => {
                    tracing::trace!(path = %path.display(), "Ignoring directory");
                },
                Kind::Dir => {
                    if let Err(e) = self.descend(&path) {
                        return Some(Err(e));
                    }
                },
                Kind::File => {
                    let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
                    if root || self.included(&name) {
                        let path = path.strip_prefix(".").map(Path::to_path_buf).unwrap_or(path);
                        return Some(Ok(Entry { path, name }));
                    }
                },
            }
        }
        None
    }
}

enum Kind {
    Dir,
    File,
}
impl Kind {
    /// Roots are followed whatever they are. Below them, a symlink counts as
    /// a file when it points to one and is otherwise skipped, so links to
    /// directories are never walked into.
    fn of(path: &Path, root: bool) -> Option<Self> {
        let metadata = if root { fs::metadata(path) } else { fs::symlink_metadata(path) }.ok()?;
        if metadata.is_dir() {
            Some(Self::Dir)
        } else if metadata.is_file() || (metadata.is_symlink() && path.is_file()) {
            Some(Self::File)
        } else {
            tracing::trace!(path = %path.display(), "Skipping special file or directory link");
            None
        }
    }
}

fn anchored<I>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(&format!("^(?:{pattern})")).or_raise(|| ErrorKind::Invalid(pattern.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        dir
    }

    fn names(walk: Walk, root: &Path) -> Vec<String> {
        walk.map(|entry| entry.unwrap().path.strip_prefix(root).unwrap().to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_sorted_depth_first() {
        let dir = tree(&["b.txt", "a/2.txt", "a/1.txt", "c/d/e.txt"]);
        let walk = Walk::new([dir.path()], [".*"], Vec::<String>::new()).unwrap();
        assert_eq!(names(walk, dir.path()), ["a/1.txt", "a/2.txt", "b.txt", "c/d/e.txt"]);
    }

    #[test]
    fn test_include_matches_basename_from_start() {
        let dir = tree(&["IMG_1.jpg", "x/IMG_2.JPG", "notIMG.jpg", "doc.pdf"]);
        let walk = Walk::new([dir.path()], ["IMG", r".*\.pdf$"], Vec::<String>::new()).unwrap();
        assert_eq!(names(walk, dir.path()), ["IMG_1.jpg", "doc.pdf", "x/IMG_2.JPG"]);
    }

    #[test]
    fn test_ignore_skips_whole_subtrees() {
        let dir = tree(&[".git/config", "src/.git/objects/x", "src/main.rs", "build/out/a.o", "builder/keep.txt"]);
        let walk = Walk::new([dir.path()], [".*"], [r"\.git$", "build$"]).unwrap();
        assert_eq!(names(walk, dir.path()), ["builder/keep.txt", "src/main.rs"]);
    }

    #[test]
    fn test_file_root_is_yielded_as_is() {
        let dir = tree(&["only.txt"]);
        let file = dir.path().join("only.txt");
        let entries: Vec<_> = Walk::new([&file], ["nomatch"], ["only"]).unwrap().map(Result::unwrap).collect();
        assert_eq!(entries, [Entry { path: file, name: "only.txt".into() }]);
    }

    #[test]
    fn test_relative_prefix_is_stripped() {
        let walk = Walk::new(["./Cargo.toml"], [".*"], Vec::<String>::new()).unwrap();
        let entries: Vec<_> = walk.map(Result::unwrap).collect();
        assert_eq!(entries[0].path, PathBuf::from("Cargo.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_links_are_not_followed() {
        let dir = tree(&["a.txt", "sub/b.txt"]);
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("sub-link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("z.txt")).unwrap();
        let walk = Walk::new([dir.path()], [".*"], Vec::<String>::new()).unwrap();
        assert_eq!(names(walk, dir.path()), ["a.txt", "sub/b.txt", "z.txt"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Walk::new(["."], ["("], Vec::<String>::new()).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Invalid(pattern) if pattern == "("));
    }
}
