//! The entry layer: transient (name, parent, file) cursors minted while
//! navigating paths. A file can be reachable under many names; an entry
//! pins down the one path a resolution went through.

use std::collections::HashSet;
use std::path::{Component, Components, Path, PathBuf};
use std::rc::Rc;

use crate::errors::{FsError, Result};
use crate::file::{Dir, File, FileId};

pub(crate) struct Entry {
    name: String,
    prev: Option<Rc<Entry>>,
    file: File,
}

impl Entry {
    pub fn new_root(dir: Rc<dyn Dir>) -> Rc<Entry> {
        Rc::new(Entry {
            name: "/".to_owned(),
            prev: None,
            file: File::Dir(dir),
        })
    }

    pub fn child(prev: Rc<Entry>, name: String, file: File) -> Rc<Entry> {
        Rc::new(Entry { name, prev: Some(prev), file })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn is_root(&self) -> bool {
        self.prev.is_none()
    }

    /// The entry this one was reached through. The root is its own
    /// parent, so `/..` resolves to `/`.
    pub fn prev(self: &Rc<Self>) -> Result<Rc<Entry>> {
        match &self.prev {
            Some(p) => Ok(p.clone()),
            None => match &self.file {
                File::Dir(_) => Ok(self.clone()),
                _ => Err(FsError::NotMounted(self.path())),
            },
        }
    }

    pub fn top(self: &Rc<Self>) -> Rc<Entry> {
        let mut cur = self.clone();
        while let Some(p) = cur.prev.clone() {
            cur = p;
        }
        cur
    }

    pub fn path(&self) -> PathBuf {
        let mut names = Vec::new();
        let mut cur = self;
        while let Some(p) = &cur.prev {
            names.push(cur.name.clone());
            cur = p;
        }

        let mut path = PathBuf::from("/");
        for name in names.iter().rev() {
            path.push(name);
        }
        path
    }

    pub fn dir(&self) -> Result<Rc<dyn Dir>> {
        self.file
            .as_dir()
            .ok_or_else(|| FsError::NotADirectory(self.path()))
    }

    /// One symlink hop, resolved from the parent of the symlink entry so
    /// relative targets are relative to the containing directory.
    pub fn follow(self: &Rc<Self>) -> Result<Rc<Entry>> {
        let File::Symlink(link) = &self.file else {
            return Ok(self.clone());
        };

        let target = link.target().to_path_buf();
        self.prev()?.navigate_all(&target)
    }

    /// Repeated `follow` while the entry is a symlink. A revisited target
    /// file means the chain is circular.
    pub fn follow_chain(self: &Rc<Self>) -> Result<Rc<Entry>> {
        let mut visited: HashSet<FileId> = HashSet::new();

        let mut cur = self.clone();
        loop {
            if !matches!(cur.file, File::Symlink(_)) {
                return Ok(cur);
            }
            if !visited.insert(cur.file.id()) {
                return Err(FsError::TooManySymlinks(self.path()));
            }

            cur = cur.follow()?;
        }
    }

    /// Walks the component stream as far as it resolves. On failure the
    /// last resolved entry and the remaining components (starting with the
    /// one that failed) come back along with the error, so weak resolvers
    /// can continue lexically.
    pub fn navigate<'a>(
        self: &Rc<Self>,
        p: &'a Path,
    ) -> (Rc<Entry>, Components<'a>, Option<FsError>) {
        let mut cur = self.clone();
        let mut comps = p.components();
        loop {
            let save = comps.clone();
            let Some(c) = comps.next() else {
                return (cur, comps, None);
            };

            match c {
                Component::Prefix(_) | Component::RootDir => cur = cur.top(),
                Component::CurDir => {}
                Component::ParentDir | Component::Normal(_) => {
                    if matches!(cur.file, File::Symlink(_)) {
                        match cur.follow_chain() {
                            Ok(e) => cur = e,
                            Err(e) => return (cur, save, Some(e)),
                        }
                    }

                    let Some(d) = cur.file.as_dir() else {
                        let err = FsError::NotADirectory(cur.path());
                        return (cur, save, Some(err));
                    };

                    if c == Component::ParentDir {
                        match cur.prev() {
                            Ok(p) => cur = p,
                            Err(e) => return (cur, save, Some(e)),
                        }
                        continue;
                    }

                    let Component::Normal(name) = c else {
                        unreachable!()
                    };
                    let name = name.to_string_lossy();
                    match d.next(&name) {
                        Ok(Some(file)) => {
                            cur = Entry::child(cur.clone(), name.into_owned(), file);
                        }
                        Ok(None) => {
                            let err = FsError::NotFound(cur.path().join(&*name));
                            return (cur, save, Some(err));
                        }
                        Err(e) => return (cur, save, Some(e)),
                    }
                }
            }
        }
    }

    pub fn navigate_all(self: &Rc<Self>, p: &Path) -> Result<Rc<Entry>> {
        let (entry, _, err) = self.navigate(p);
        match err {
            None => Ok(entry),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemDir;
    use crate::path::remainder;
    use crate::storage::MemStorage;

    fn root() -> Rc<Entry> {
        Entry::new_root(Rc::new(MemDir::new(Rc::new(MemStorage))))
    }

    #[test]
    fn test_root_is_its_own_parent() {
        let root = root();
        assert!(root.is_root());
        assert_eq!(PathBuf::from("/"), root.path());

        let up = root.navigate_all(Path::new("/..")).unwrap();
        assert_eq!(PathBuf::from("/"), up.path());
    }

    #[test]
    fn test_navigate_builds_paths() {
        let root = root();
        let d = root.file().as_dir().unwrap();
        let (sub, _) = d.emplace_dir("foo").unwrap().get().unwrap();
        sub.emplace_regular("bar").unwrap();

        let entry = root.navigate_all(Path::new("foo/bar")).unwrap();
        assert_eq!(PathBuf::from("/foo/bar"), entry.path());
        assert_eq!("bar", entry.name());

        let same = root.navigate_all(Path::new("foo/./../foo/bar")).unwrap();
        assert!(same.file().same_as(entry.file()));
    }

    #[test]
    fn test_navigate_partial_result() {
        let root = root();
        root.file().as_dir().unwrap().emplace_dir("foo").unwrap();

        let (entry, rest, err) = root.navigate(Path::new("foo/missing/tail"));
        assert!(matches!(err, Some(FsError::NotFound(_))));
        assert_eq!(PathBuf::from("/foo"), entry.path());
        assert_eq!(PathBuf::from("missing/tail"), remainder(&rest));
    }

    #[test]
    fn test_symlink_follow_from_parent() {
        let root = root();
        let d = root.file().as_dir().unwrap();
        let (sub, _) = d.emplace_dir("sub").unwrap().get().unwrap();
        sub.emplace_regular("file").unwrap();
        sub.emplace_symlink("rel", Path::new("file")).unwrap();

        let entry = root.navigate_all(Path::new("sub/rel")).unwrap();
        let target = entry.follow().unwrap();
        assert_eq!(PathBuf::from("/sub/file"), target.path());
    }

    #[test]
    fn test_follow_chain_detects_cycle() {
        let root = root();
        let d = root.file().as_dir().unwrap();
        d.emplace_symlink("a", Path::new("b")).unwrap();
        d.emplace_symlink("b", Path::new("a")).unwrap();

        let entry = root.navigate_all(Path::new("a")).unwrap();
        assert!(matches!(
            entry.follow_chain(),
            Err(FsError::TooManySymlinks(_))
        ));
    }

    #[test]
    fn test_navigate_through_symlink_dir() {
        let root = root();
        let d = root.file().as_dir().unwrap();
        let (sub, _) = d.emplace_dir("real").unwrap().get().unwrap();
        sub.emplace_regular("x").unwrap();
        d.emplace_symlink("alias", Path::new("/real")).unwrap();

        let entry = root.navigate_all(Path::new("alias/x")).unwrap();
        assert_eq!(PathBuf::from("/real/x"), entry.path());
    }
}
