//! The virtual filesystem facade: every public operation, resolved over
//! the entry tree.

use std::io::{Read, Write};
use std::path::{Component, Components, Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use log::debug;

use crate::entry::Entry;
use crate::errors::{FsError, Result};
use crate::file::{
    Dir, File, FileStatus, Mode, OpenMode, PermOptions, SpaceInfo,
};
use crate::path::{is_dir_shaped, lexically_normal, remainder};

/// One virtual tree plus a working directory. Handles produced by
/// [`Vfs::with_current_path`] share the tree and differ only in cwd.
#[derive(Clone)]
pub(crate) struct Vfs {
    root: Rc<Entry>,
    cwd: Rc<Entry>,
    temp: PathBuf,
}

impl Vfs {
    pub fn new(root_dir: Rc<dyn Dir>, temp: impl Into<PathBuf>) -> Self {
        let root = Entry::new_root(root_dir);
        Self { root: root.clone(), cwd: root, temp: temp.into() }
    }

    pub fn cwd_entry(&self) -> &Rc<Entry> {
        &self.cwd
    }

    pub fn cwd_dir(&self) -> Result<Rc<dyn Dir>> {
        self.cwd.dir()
    }

    /// Resolves `p` to an entry. A trailing separator demands the final
    /// resolvent (after following any symlink chain) be a directory.
    pub(crate) fn navigate(&self, p: &Path) -> Result<Rc<Entry>> {
        let entry = self.cwd.navigate_all(p)?;
        if is_dir_shaped(p) {
            let entry = entry.follow_chain()?;
            entry.dir()?;
            return Ok(entry);
        }
        Ok(entry)
    }

    fn navigate_partial<'a>(&self, p: &'a Path) -> (Rc<Entry>, Components<'a>, Option<FsError>) {
        self.cwd.navigate(p)
    }

    pub(crate) fn resolve_dir(&self, p: &Path) -> Result<Rc<Entry>> {
        let entry = self.cwd.navigate_all(p)?.follow_chain()?;
        entry.dir()?;
        Ok(entry)
    }

    /// Weakly resolves `p` into its parent directory entry, the tail name
    /// and the normalized absolute destination path.
    pub(crate) fn dst_parent(&self, p: &Path) -> Result<(Rc<Entry>, String, PathBuf)> {
        let dst_p = self.weakly_canonical(p)?;
        let name = dst_p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FsError::InvalidArgument(dst_p.clone()))?;
        let parent = dst_p.parent().unwrap_or(Path::new("/")).to_path_buf();
        let prev = self.resolve_dir(&parent)?;
        Ok((prev, name, dst_p))
    }

    pub fn open_read(&self, p: &Path, mode: OpenMode) -> Result<Box<dyn Read>> {
        let entry = self.navigate(p)?;
        match entry.file() {
            File::Regular(r) => r.open_read(mode),
            File::Dir(_) => Err(FsError::IsADirectory(entry.path())),
            _ => Err(FsError::InvalidArgument(entry.path())),
        }
    }

    pub fn open_write(&self, p: &Path, mode: OpenMode) -> Result<Box<dyn Write>> {
        let (entry, rest, err) = self.navigate_partial(p);
        let Some(err) = err else {
            return match entry.file() {
                File::Regular(r) => r.open_write(mode),
                File::Dir(_) => Err(FsError::IsADirectory(entry.path())),
                _ => Err(FsError::InvalidArgument(entry.path())),
            };
        };

        // The tail may name a file to create, provided everything up to it
        // resolved to a directory.
        let Some(d) = entry.file().as_dir() else {
            return Err(err);
        };
        let mut comps = rest.clone();
        let Some(Component::Normal(name)) = comps.next() else {
            return Err(err);
        };
        if comps.next().is_some() {
            return Err(err);
        }

        let name = name.to_string_lossy();
        match d.emplace_regular(&name)?.get() {
            Some((f, _)) => f.open_write(mode),
            None => Err(err),
        }
    }

    pub fn canonical(&self, p: &Path) -> Result<PathBuf> {
        Ok(self.navigate(p)?.follow_chain()?.path())
    }

    pub fn weakly_canonical(&self, p: &Path) -> Result<PathBuf> {
        let total = p.components().count();
        let (entry, rest, err) = self.navigate_partial(p);
        if err.is_some() && rest.clone().count() == total {
            return Ok(lexically_normal(p));
        }

        let mut t = entry.follow_chain()?.path();
        let rem = remainder(&rest);
        if !rem.as_os_str().is_empty() {
            t.push(rem);
        }
        Ok(lexically_normal(&t))
    }

    pub fn create_directory(&self, p: &Path) -> Result<bool> {
        self.create_directory_impl(p, None)
    }

    pub fn create_directory_with_attributes(&self, p: &Path, attr: &Path) -> Result<bool> {
        let attr_entry = self.resolve_dir(attr)?;
        let mode = attr_entry.file().node().mode();
        self.create_directory_impl(p, Some(mode))
    }

    fn create_directory_impl(&self, p: &Path, mode: Option<Mode>) -> Result<bool> {
        let (prev, name, dst_p) = self.dst_parent(p)?;
        let d = prev.dir()?;

        if let Some(existing) = d.next(&name)? {
            return match existing {
                File::Dir(_) => Ok(false),
                _ => Err(FsError::AlreadyExists(dst_p)),
            };
        }

        let new_d = d
            .emplace_dir(&name)?
            .created()
            .ok_or(FsError::AlreadyExists(dst_p))?;
        if let Some(mode) = mode {
            new_d.set_mode(mode)?;
        }
        Ok(true)
    }

    pub fn create_directories(&self, p: &Path) -> Result<bool> {
        let t = self.weakly_canonical(p)?;
        let (entry, rest, err) = self.navigate_partial(&t);
        if err.is_none() {
            return Ok(false);
        }

        let mut d = entry
            .file()
            .as_dir()
            .ok_or_else(|| FsError::NotADirectory(entry.path()))?;
        let mut at = entry.path();
        for c in rest {
            let Component::Normal(name) = c else {
                return Err(FsError::InvalidArgument(t));
            };

            let name = name.to_string_lossy();
            at.push(&*name);
            d = d
                .emplace_dir(&name)?
                .get()
                .ok_or_else(|| FsError::AlreadyExists(at.clone()))?
                .0;
        }
        Ok(true)
    }

    pub fn create_hard_link(&self, target: &Path, link: &Path) -> Result<()> {
        let target_entry = self.navigate(target)?;
        let (prev, name, link_p) = self.dst_parent(link)?;
        if !prev.dir()?.link(&name, target_entry.file().clone())? {
            return Err(FsError::AlreadyExists(link_p));
        }
        Ok(())
    }

    pub fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let (prev, name, link_p) = self.dst_parent(link)?;
        let d = prev.dir()?;
        if d.contains(&name)? {
            return Err(FsError::AlreadyExists(link_p));
        }

        d.emplace_symlink(&name, target)?
            .created()
            .ok_or(FsError::AlreadyExists(link_p))?;
        Ok(())
    }

    pub fn current_path(&self) -> PathBuf {
        self.cwd.path()
    }

    pub fn with_current_path(&self, p: &Path) -> Result<Vfs> {
        let entry = self.cwd.navigate_all(p)?.follow_chain()?;
        entry.dir()?;
        Ok(Vfs {
            root: self.root.clone(),
            cwd: entry,
            temp: self.temp.clone(),
        })
    }

    pub fn change_root(&self, p: &Path, temp: &Path) -> Result<Vfs> {
        let entry = self.resolve_dir(p)?;
        Ok(Vfs::new(entry.dir()?, temp))
    }

    pub fn equivalent(&self, p1: &Path, p2: &Path) -> Result<bool> {
        let f1 = self.navigate(p1).and_then(|e| e.follow_chain()).ok();
        let f2 = self.navigate(p2).and_then(|e| e.follow_chain()).ok();
        match (f1, f2) {
            (Some(a), Some(b)) => Ok(a.file().same_as(b.file())),
            (None, None) => Err(FsError::NotFound(p1.to_path_buf())),
            _ => Ok(false),
        }
    }

    fn regular_at(&self, p: &Path) -> Result<Rc<dyn crate::file::Regular>> {
        let entry = self.navigate(p)?.follow_chain()?;
        match entry.file() {
            File::Regular(r) => Ok(r.clone()),
            File::Dir(_) => Err(FsError::IsADirectory(entry.path())),
            _ => Err(FsError::InvalidArgument(entry.path())),
        }
    }

    pub fn file_size(&self, p: &Path) -> Result<u64> {
        self.regular_at(p)?.size()
    }

    pub fn hard_link_count(&self, p: &Path) -> Result<u64> {
        Ok(self.navigate(p)?.file().node().nlink())
    }

    pub fn last_write_time(&self, p: &Path) -> Result<SystemTime> {
        self.regular_at(p)?.last_write_time()
    }

    pub fn set_last_write_time(&self, p: &Path, t: SystemTime) -> Result<()> {
        self.regular_at(p)?.set_last_write_time(t)
    }

    pub fn permissions(&self, p: &Path, prms: Mode, opts: PermOptions) -> Result<()> {
        let action = opts & (PermOptions::REPLACE | PermOptions::ADD | PermOptions::REMOVE);
        let mut entry = self.navigate(p)?;
        if !opts.contains(PermOptions::NOFOLLOW) {
            entry = entry.follow_chain()?;
        }

        let node = entry.file().node();
        let new_mode = if action == PermOptions::REPLACE {
            prms & Mode::MASK
        } else if action == PermOptions::ADD {
            node.mode() | (prms & Mode::MASK)
        } else if action == PermOptions::REMOVE {
            node.mode() & !(prms & Mode::MASK)
        } else {
            return Err(FsError::InvalidArgument(p.to_path_buf()));
        };
        node.set_mode(new_mode)
    }

    pub fn read_symlink(&self, p: &Path) -> Result<PathBuf> {
        let entry = self.navigate(p)?;
        match entry.file() {
            File::Symlink(l) => Ok(l.target().to_path_buf()),
            _ => Err(FsError::InvalidArgument(entry.path())),
        }
    }

    pub fn remove(&self, p: &Path) -> Result<bool> {
        let Ok(entry) = self.navigate(p) else {
            return Ok(false);
        };
        if entry.is_root() {
            return Err(FsError::InvalidArgument(entry.path()));
        }

        if let File::Dir(d) = entry.file() {
            if !d.is_empty()? {
                return Err(FsError::DirectoryNotEmpty(entry.path()));
            }
        }

        let cnt = entry.prev()?.dir()?.erase(entry.name())?;
        Ok(cnt > 0)
    }

    pub fn remove_all(&self, p: &Path) -> Result<u64> {
        let Ok(entry) = self.navigate(p) else {
            return Ok(0);
        };
        if entry.is_root() {
            return Err(FsError::InvalidArgument(entry.path()));
        }

        debug!("removing subtree at '{}'", entry.path().display());
        entry.prev()?.dir()?.erase(entry.name())
    }

    pub fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        let src_entry = self.navigate(src)?;
        let (prev, name, dst_p) = self.dst_parent(dst)?;

        if matches!(src_entry.file(), File::Dir(_)) {
            let mut cursor = prev.clone();
            loop {
                if src_entry.file().same_as(cursor.file()) {
                    return Err(FsError::InvalidArgument(src_entry.path()));
                }
                if cursor.is_root() {
                    break;
                }
                cursor = cursor.prev()?;
            }
        }

        let prev_d = prev.dir()?;
        if let Some(existing) = prev_d.next(&name)? {
            if src_entry.file().same_as(&existing) {
                return Ok(());
            }

            match (src_entry.file(), &existing) {
                (File::Dir(_), File::Dir(d)) => {
                    if !d.is_empty()? {
                        return Err(FsError::DirectoryNotEmpty(dst_p));
                    }
                }
                (File::Dir(_), _) => return Err(FsError::NotADirectory(dst_p)),
                (_, File::Dir(_)) => return Err(FsError::IsADirectory(dst_p)),
                _ => {}
            }
        }

        prev_d.relink(&name, src_entry.file().clone())?;
        src_entry.prev()?.dir()?.unlink(src_entry.name())?;
        Ok(())
    }

    pub fn resize_file(&self, p: &Path, new_size: u64) -> Result<()> {
        self.regular_at(p)?.resize(new_size)
    }

    pub fn space(&self, p: &Path) -> Result<SpaceInfo> {
        self.navigate(p)?.follow_chain()?.file().node().space()
    }

    pub fn status(&self, p: &Path) -> Result<FileStatus> {
        match self.navigate(p).and_then(|e| e.follow_chain()) {
            Ok(entry) => Ok(entry.file().status()),
            Err(FsError::NotFound(_)) | Err(FsError::NotADirectory(_)) => {
                Ok(FileStatus::not_found())
            }
            Err(e) => Err(e),
        }
    }

    pub fn symlink_status(&self, p: &Path) -> Result<FileStatus> {
        match self.navigate(p) {
            Ok(entry) => Ok(entry.file().status()),
            Err(FsError::NotFound(_)) | Err(FsError::NotADirectory(_)) => {
                Ok(FileStatus::not_found())
            }
            Err(e) => Err(e),
        }
    }

    pub fn temp_directory_path(&self) -> Result<PathBuf> {
        if self.temp.as_os_str().is_empty() {
            return Ok(std::env::temp_dir());
        }
        Ok(self.temp.clone())
    }

    pub fn is_empty(&self, p: &Path) -> Result<bool> {
        let entry = self.navigate(p)?;
        match entry.file() {
            File::Dir(d) => d.is_empty(),
            File::Regular(r) => Ok(r.size()? == 0),
            _ => Err(FsError::NotFound(entry.path())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemDir;
    use crate::storage::MemStorage;
    use std::time::Duration;

    fn mem_vfs() -> Vfs {
        Vfs::new(Rc::new(MemDir::new(Rc::new(MemStorage))), "/tmp")
    }

    fn write(fs: &Vfs, p: &str, content: &[u8]) {
        fs.open_write(Path::new(p), OpenMode::empty())
            .unwrap()
            .write_all(content)
            .unwrap();
    }

    fn read(fs: &Vfs, p: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        fs.open_read(Path::new(p), OpenMode::BINARY)
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_write_then_read() {
        let fs = mem_vfs();
        write(&fs, "foo", b"Lorem ipsum");
        assert_eq!(b"Lorem ipsum".to_vec(), read(&fs, "foo"));
        assert!(fs.status(Path::new("foo")).unwrap().exists());
    }

    #[test]
    fn test_open_write_needs_existing_parent() {
        let fs = mem_vfs();
        assert!(matches!(
            fs.open_write(Path::new("no/foo"), OpenMode::empty()),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_read_missing() {
        let fs = mem_vfs();
        assert!(matches!(
            fs.open_read(Path::new("foo"), OpenMode::empty()),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_canonical_through_symlink_chain() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("foo/bar")).unwrap();
        fs.create_symlink(Path::new("foo/bar"), Path::new("baz"))
            .unwrap();
        fs.create_symlink(Path::new("baz"), Path::new("qux"))
            .unwrap();

        let fs = fs.with_current_path(Path::new("foo")).unwrap();
        assert_eq!(
            PathBuf::from("/foo/bar"),
            fs.canonical(Path::new("../qux")).unwrap()
        );
        assert_eq!(
            PathBuf::from("/foo"),
            fs.canonical(Path::new("../baz/..")).unwrap()
        );
        assert_eq!(
            PathBuf::from("/not-there"),
            fs.weakly_canonical(Path::new("../not-there")).unwrap()
        );
        assert!(matches!(
            fs.canonical(Path::new("not-exists")),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_canonical_is_idempotent() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("a/b")).unwrap();
        fs.create_symlink(Path::new("a/b"), Path::new("l")).unwrap();

        let once = fs.canonical(Path::new("l/../b")).unwrap();
        assert_eq!(once, fs.canonical(&once).unwrap());
    }

    #[test]
    fn test_weakly_canonical_is_normal() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("a/b")).unwrap();
        assert_eq!(
            PathBuf::from("/a/b/nope"),
            fs.weakly_canonical(Path::new("a/./b/x/../nope")).unwrap()
        );
        assert_eq!(
            PathBuf::from("not-there"),
            fs.weakly_canonical(Path::new("not-there")).unwrap()
        );
    }

    #[test]
    fn test_create_directories_idempotent() {
        let fs = mem_vfs();
        assert!(fs.create_directories(Path::new("x/y/z")).unwrap());
        assert!(!fs.create_directories(Path::new("x/y/z")).unwrap());
        assert!(fs.status(Path::new("x/y/z")).unwrap().kind() == crate::file::FileKind::Directory);
    }

    #[test]
    fn test_create_directory_needs_parent() {
        let fs = mem_vfs();
        assert!(matches!(
            fs.create_directory(Path::new("no/dir")),
            Err(FsError::NotFound(_))
        ));

        write(&fs, "file", b"");
        assert!(matches!(
            fs.create_directory(Path::new("file")),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_hard_links_share_and_survive() {
        let fs = mem_vfs();
        write(&fs, "a", b"payload");
        assert_eq!(1, fs.hard_link_count(Path::new("a")).unwrap());

        fs.create_hard_link(Path::new("a"), Path::new("b")).unwrap();
        assert!(fs.equivalent(Path::new("a"), Path::new("b")).unwrap());
        assert_eq!(2, fs.hard_link_count(Path::new("a")).unwrap());
        assert_eq!(2, fs.hard_link_count(Path::new("b")).unwrap());

        assert!(fs.remove(Path::new("a")).unwrap());
        assert_eq!(b"payload".to_vec(), read(&fs, "b"));
        assert_eq!(1, fs.hard_link_count(Path::new("b")).unwrap());
    }

    #[test]
    fn test_equivalent_missing_paths() {
        let fs = mem_vfs();
        write(&fs, "a", b"");
        assert!(!fs.equivalent(Path::new("a"), Path::new("missing")).unwrap());
        assert!(matches!(
            fs.equivalent(Path::new("gone"), Path::new("missing")),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_semantics() {
        let fs = mem_vfs();
        assert!(!fs.remove(Path::new("absent")).unwrap());

        fs.create_directories(Path::new("d/inner")).unwrap();
        assert!(matches!(
            fs.remove(Path::new("d")),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert!(fs.remove(Path::new("d/inner")).unwrap());
        assert!(fs.remove(Path::new("d")).unwrap());
    }

    #[test]
    fn test_remove_all_counts() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("d/s")).unwrap();
        write(&fs, "d/a", b"");
        write(&fs, "d/s/b", b"");

        assert_eq!(4, fs.remove_all(Path::new("d")).unwrap());
        assert_eq!(0, fs.remove_all(Path::new("d")).unwrap());
    }

    #[test]
    fn test_rename_file_and_noop() {
        let fs = mem_vfs();
        write(&fs, "foo", b"v");
        fs.rename(Path::new("foo"), Path::new("bar")).unwrap();
        assert!(!fs.status(Path::new("foo")).unwrap().exists());
        assert_eq!(b"v".to_vec(), read(&fs, "bar"));

        // Renaming onto itself is a no-op.
        fs.rename(Path::new("bar"), Path::new("bar")).unwrap();
        assert_eq!(b"v".to_vec(), read(&fs, "bar"));
    }

    #[test]
    fn test_rename_into_own_ancestor_rejected() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("foo/qux")).unwrap();
        assert!(matches!(
            fs.rename(Path::new("foo"), Path::new("foo/bar")),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(fs.status(Path::new("foo/qux")).unwrap().exists());
    }

    #[test]
    fn test_rename_over_existing() {
        let fs = mem_vfs();
        write(&fs, "f", b"src");
        fs.create_directory(Path::new("d")).unwrap();
        fs.create_directory(Path::new("empty")).unwrap();
        fs.create_directory(Path::new("full")).unwrap();
        write(&fs, "full/x", b"");

        assert!(matches!(
            fs.rename(Path::new("f"), Path::new("d")),
            Err(FsError::IsADirectory(_))
        ));
        assert!(matches!(
            fs.rename(Path::new("d"), Path::new("f")),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            fs.rename(Path::new("d"), Path::new("full")),
            Err(FsError::DirectoryNotEmpty(_))
        ));

        fs.rename(Path::new("d"), Path::new("empty")).unwrap();
        assert!(!fs.status(Path::new("d")).unwrap().exists());
    }

    #[test]
    fn test_resize_is_observable() {
        let fs = mem_vfs();
        write(&fs, "f", b"123456");
        fs.resize_file(Path::new("f"), 3).unwrap();
        assert_eq!(3, fs.file_size(Path::new("f")).unwrap());
        fs.resize_file(Path::new("f"), 10).unwrap();
        assert_eq!(10, fs.file_size(Path::new("f")).unwrap());
    }

    #[test]
    fn test_symlink_round_trip_may_dangle() {
        let fs = mem_vfs();
        fs.create_symlink(Path::new("not-yet"), Path::new("l"))
            .unwrap();
        assert_eq!(
            PathBuf::from("not-yet"),
            fs.read_symlink(Path::new("l")).unwrap()
        );

        assert!(fs.symlink_status(Path::new("l")).unwrap().exists());
        assert!(!fs.status(Path::new("l")).unwrap().exists());
    }

    #[test]
    fn test_symlink_cycle_detected() {
        let fs = mem_vfs();
        fs.create_symlink(Path::new("b"), Path::new("a")).unwrap();
        fs.create_symlink(Path::new("a"), Path::new("b")).unwrap();
        assert!(matches!(
            fs.canonical(Path::new("a")),
            Err(FsError::TooManySymlinks(_))
        ));
        assert!(matches!(
            fs.status(Path::new("a")),
            Err(FsError::TooManySymlinks(_))
        ));
    }

    #[test]
    fn test_trailing_slash_demands_directory() {
        let fs = mem_vfs();
        write(&fs, "f", b"");
        assert!(matches!(
            fs.navigate(Path::new("f/")),
            Err(FsError::NotADirectory(_))
        ));
        fs.create_directory(Path::new("d")).unwrap();
        assert!(fs.navigate(Path::new("d/")).is_ok());
    }

    #[test]
    fn test_permissions() {
        let fs = mem_vfs();
        write(&fs, "f", b"");

        fs.permissions(
            Path::new("f"),
            Mode::from_bits_truncate(0o600),
            PermOptions::REPLACE,
        )
        .unwrap();
        assert_eq!(
            Mode::from_bits_truncate(0o600),
            fs.status(Path::new("f")).unwrap().permissions()
        );

        fs.permissions(Path::new("f"), Mode::OTHERS_READ, PermOptions::ADD)
            .unwrap();
        assert_eq!(
            Mode::from_bits_truncate(0o604),
            fs.status(Path::new("f")).unwrap().permissions()
        );

        fs.permissions(Path::new("f"), Mode::OWNER_WRITE, PermOptions::REMOVE)
            .unwrap();
        assert_eq!(
            Mode::from_bits_truncate(0o404),
            fs.status(Path::new("f")).unwrap().permissions()
        );

        assert!(matches!(
            fs.permissions(
                Path::new("f"),
                Mode::OWNER_READ,
                PermOptions::REPLACE | PermOptions::ADD
            ),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_last_write_time_set_get() {
        let fs = mem_vfs();
        write(&fs, "f", b"");
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(20);
        fs.set_last_write_time(Path::new("f"), t).unwrap();
        assert_eq!(t, fs.last_write_time(Path::new("f")).unwrap());
    }

    #[test]
    fn test_is_empty() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("d")).unwrap();
        assert!(fs.is_empty(Path::new("d")).unwrap());
        write(&fs, "d/x", b"");
        assert!(!fs.is_empty(Path::new("d")).unwrap());

        write(&fs, "f", b"");
        assert!(fs.is_empty(Path::new("f")).unwrap());
        write(&fs, "f", b"content");
        assert!(!fs.is_empty(Path::new("f")).unwrap());
    }

    #[test]
    fn test_change_root_confines() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("jail/inner")).unwrap();
        write(&fs, "outside", b"secret");

        let jail = fs.change_root(Path::new("jail"), Path::new("/tmp")).unwrap();
        assert!(jail.status(Path::new("/inner")).unwrap().exists());
        assert!(!jail.status(Path::new("/outside")).unwrap().exists());
        assert_eq!(
            PathBuf::from("/"),
            jail.canonical(Path::new("/inner/../..")).unwrap()
        );
    }

    #[test]
    fn test_cwd_shifted_view_shares_tree() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("d")).unwrap();
        let sub = fs.with_current_path(Path::new("d")).unwrap();
        assert_eq!(PathBuf::from("/d"), sub.current_path());

        write(&sub, "made-inside", b"x");
        assert_eq!(b"x".to_vec(), read(&fs, "d/made-inside"));
    }
}
