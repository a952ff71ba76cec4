//! Directory iteration: flat and recursive cursors over both backends.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use crate::entry::Entry;
use crate::errors::{FsError, Result};
use crate::file::{file_from_host, File, FileKind, FileStatus, HostCtx, WalkOptions};
use crate::os_fs::HostFs;
use crate::vfs::Vfs;

/// One directory child met during iteration.
pub struct DirEntry {
    path: PathBuf,
    file: File,
}

impl DirEntry {
    pub(crate) fn new(path: PathBuf, file: File) -> Self {
        Self { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    pub fn kind(&self) -> FileKind {
        self.file.kind()
    }

    pub fn status(&self) -> FileStatus {
        self.file.status()
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind() == FileKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }

    pub fn file_size(&self) -> Result<u64> {
        match &self.file {
            File::Regular(r) => r.size(),
            _ => Err(FsError::InvalidArgument(self.path.clone())),
        }
    }

    pub fn last_write_time(&self) -> Result<SystemTime> {
        match &self.file {
            File::Regular(r) => r.last_write_time(),
            _ => Err(FsError::InvalidArgument(self.path.clone())),
        }
    }
}

/// Flat cursor: the children of one directory, in unspecified order, each
/// name at most once. The snapshot is taken when the cursor is created.
pub struct ReadDir {
    inner: ReadDirInner,
}

enum ReadDirInner {
    Snapshot {
        base: PathBuf,
        items: std::vec::IntoIter<(String, File)>,
    },
    Host {
        base: PathBuf,
        host: PathBuf,
        ctx: Rc<HostCtx>,
        iter: fs::ReadDir,
    },
}

impl ReadDir {
    pub(crate) fn snapshot(base: PathBuf, items: Vec<(String, File)>) -> Self {
        Self {
            inner: ReadDirInner::Snapshot { base, items: items.into_iter() },
        }
    }

    pub(crate) fn host(base: PathBuf, host: PathBuf, iter: fs::ReadDir) -> Self {
        Self {
            inner: ReadDirInner::Host { base, host, ctx: HostCtx::new(), iter },
        }
    }
}

impl Iterator for ReadDir {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ReadDirInner::Snapshot { base, items } => {
                let (name, file) = items.next()?;
                Some(Ok(DirEntry::new(base.join(name), file)))
            }
            ReadDirInner::Host { base, host, ctx, iter } => loop {
                let item = match iter.next()? {
                    Ok(item) => item,
                    Err(e) => return Some(Err(FsError::io(host.clone(), e))),
                };

                let name = item.file_name().to_string_lossy().into_owned();
                match file_from_host(ctx, host.join(&name)) {
                    Ok(Some(file)) => return Some(Ok(DirEntry::new(base.join(name), file))),
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                }
            },
        }
    }
}

/// Recursive cursor: pre-order depth-first iteration with an explicit
/// stack of flat cursors. Entries directly inside the seed directory are
/// at depth 0.
pub struct RecursiveReadDir {
    inner: WalkInner,
}

enum WalkInner {
    Virtual(VirtualWalk),
    Host(HostWalk),
}

impl RecursiveReadDir {
    pub(crate) fn virtual_walk(seed: Rc<Entry>, opts: WalkOptions) -> Result<Self> {
        let items = seed.dir()?.entries()?;
        let frame = WalkFrame {
            base: seed.path(),
            dir: seed,
            items: items.into_iter(),
        };
        Ok(Self {
            inner: WalkInner::Virtual(VirtualWalk {
                opts,
                stack: vec![frame],
                pending: None,
            }),
        })
    }

    pub(crate) fn host_walk(host_fs: HostFs, host_seed: PathBuf, opts: WalkOptions) -> Result<Self> {
        fs::read_dir(&host_seed).map_err(|e| FsError::io(&host_seed, e))?;

        let iter = walkdir::WalkDir::new(&host_seed)
            .follow_links(opts.contains(WalkOptions::FOLLOW_DIRECTORY_SYMLINK))
            .min_depth(1)
            .into_iter();
        Ok(Self {
            inner: WalkInner::Host(HostWalk {
                fs: host_fs,
                ctx: HostCtx::new(),
                iter,
                depth: 0,
            }),
        })
    }

    /// Depth of the most recently yielded entry.
    pub fn depth(&self) -> usize {
        match &self.inner {
            WalkInner::Virtual(w) => w.stack.len().saturating_sub(1),
            WalkInner::Host(w) => w.depth,
        }
    }

    /// True when the next step would descend into the current entry.
    pub fn recursion_pending(&self) -> bool {
        match &self.inner {
            WalkInner::Virtual(w) => w.pending.is_some(),
            WalkInner::Host(_) => false,
        }
    }

    /// Keeps the next step from descending into the current entry.
    pub fn skip_current_dir(&mut self) {
        match &mut self.inner {
            WalkInner::Virtual(w) => w.pending = None,
            WalkInner::Host(w) => w.iter.skip_current_dir(),
        }
    }

    /// Stops iterating the current directory and continues in its parent.
    pub fn pop(&mut self) {
        match &mut self.inner {
            WalkInner::Virtual(w) => {
                w.pending = None;
                w.stack.pop();
            }
            WalkInner::Host(w) => w.iter.skip_current_dir(),
        }
    }
}

impl Iterator for RecursiveReadDir {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            WalkInner::Virtual(w) => w.next(),
            WalkInner::Host(w) => w.next(),
        }
    }
}

struct WalkFrame {
    base: PathBuf,
    dir: Rc<Entry>,
    items: std::vec::IntoIter<(String, File)>,
}

struct VirtualWalk {
    opts: WalkOptions,
    stack: Vec<WalkFrame>,
    /// Set when the last yielded entry is a non-empty directory; the next
    /// step enters it unless descent is disabled first.
    pending: Option<(PathBuf, Rc<Entry>)>,
}

impl VirtualWalk {
    fn next(&mut self) -> Option<Result<DirEntry>> {
        if let Some((base, dir_entry)) = self.pending.take() {
            match dir_entry.dir().and_then(|d| d.entries()) {
                Ok(items) => self.stack.push(WalkFrame {
                    base,
                    dir: dir_entry,
                    items: items.into_iter(),
                }),
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            let frame = self.stack.last_mut()?;
            let Some((name, file)) = frame.items.next() else {
                self.stack.pop();
                continue;
            };

            let entry = Entry::child(frame.dir.clone(), name.clone(), file);
            let item_path = frame.base.join(&name);

            // Resolve what a descent would enter. A symlink is a candidate
            // only when following is requested; its chain starts from the
            // entry's parent directory. A broken chain does not descend,
            // the entry itself is still yielded.
            let target = if matches!(entry.file(), File::Symlink(_)) {
                if self.opts.contains(WalkOptions::FOLLOW_DIRECTORY_SYMLINK) {
                    entry.follow_chain().ok()
                } else {
                    None
                }
            } else {
                Some(entry.clone())
            };

            if let Some(target) = target {
                if let File::Dir(d) = target.file() {
                    if !d.is_empty().unwrap_or(true) {
                        self.pending = Some((item_path.clone(), target.clone()));
                    }
                }
            }

            return Some(Ok(DirEntry::new(item_path, entry.file().clone())));
        }
    }
}

struct HostWalk {
    fs: HostFs,
    ctx: Rc<HostCtx>,
    iter: walkdir::IntoIter,
    depth: usize,
}

impl HostWalk {
    fn next(&mut self) -> Option<Result<DirEntry>> {
        loop {
            let item = match self.iter.next()? {
                Ok(item) => item,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(Err(match e.into_io_error() {
                        Some(io) => FsError::io(path, io),
                        None => FsError::TooManySymlinks(path),
                    }));
                }
            };

            self.depth = item.depth().saturating_sub(1);
            let host = item.path().to_path_buf();
            match file_from_host(&self.ctx, host.clone()) {
                Ok(Some(file)) => {
                    return Some(Ok(DirEntry::new(self.fs.to_virtual(&host), file)))
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Vfs {
    pub fn read_dir(&self, p: &Path) -> Result<ReadDir> {
        let entry = self.resolve_dir(p)?;
        let items = entry.dir()?.entries()?;
        Ok(ReadDir::snapshot(entry.path(), items))
    }

    pub fn read_dir_recursive(&self, p: &Path, opts: WalkOptions) -> Result<RecursiveReadDir> {
        let entry = self.resolve_dir(p)?;
        RecursiveReadDir::virtual_walk(entry, opts)
    }
}

impl HostFs {
    pub fn read_dir(&self, p: &Path) -> Result<ReadDir> {
        let host = self.host_path(p);
        let iter = fs::read_dir(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(ReadDir::host(self.to_virtual(&host), host, iter))
    }

    pub fn read_dir_recursive(&self, p: &Path, opts: WalkOptions) -> Result<RecursiveReadDir> {
        let host = self.host_path(p);
        RecursiveReadDir::host_walk(self.clone(), host, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{MemDir, OpenMode};
    use crate::storage::MemStorage;
    use std::collections::BTreeSet;
    use std::io::Write;

    fn mem_vfs() -> Vfs {
        Vfs::new(Rc::new(MemDir::new(Rc::new(MemStorage))), "/tmp")
    }

    fn write(fs: &Vfs, p: &str) {
        fs.open_write(Path::new(p), OpenMode::empty())
            .unwrap()
            .write_all(b"")
            .unwrap();
    }

    fn collect_paths(iter: impl Iterator<Item = Result<DirEntry>>) -> BTreeSet<PathBuf> {
        iter.map(|e| e.unwrap().path().to_path_buf()).collect()
    }

    #[test]
    fn test_flat_iteration() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("d")).unwrap();
        write(&fs, "d/a");
        write(&fs, "d/b");
        fs.create_directory(Path::new("d/sub")).unwrap();
        write(&fs, "d/sub/deep");

        let paths = collect_paths(fs.read_dir(Path::new("d")).unwrap());
        let expected: BTreeSet<PathBuf> = ["/d/a", "/d/b", "/d/sub"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(expected, paths);
    }

    #[test]
    fn test_recursive_iteration() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("d/x/y")).unwrap();
        write(&fs, "d/a");
        write(&fs, "d/x/b");
        write(&fs, "d/x/y/c");

        let paths = collect_paths(fs.read_dir_recursive(Path::new("d"), WalkOptions::empty()).unwrap());
        let expected: BTreeSet<PathBuf> = ["/d/a", "/d/x", "/d/x/b", "/d/x/y", "/d/x/y/c"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(expected, paths);
    }

    #[test]
    fn test_depth_and_skip() {
        let fs = mem_vfs();
        fs.create_directories(Path::new("d/deep/deeper")).unwrap();
        write(&fs, "d/deep/deeper/x");

        let mut walk = fs
            .read_dir_recursive(Path::new("d"), WalkOptions::empty())
            .unwrap();
        let first = walk.next().unwrap().unwrap();
        assert_eq!(PathBuf::from("/d/deep"), first.path());
        assert_eq!(0, walk.depth());
        assert!(walk.recursion_pending());

        walk.skip_current_dir();
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_pop_ascends() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("d")).unwrap();
        fs.create_directory(Path::new("d/sub")).unwrap();
        write(&fs, "d/sub/one");
        write(&fs, "d/sub/two");

        // After popping out of /d/sub on its first child, none of its
        // remaining children may be yielded.
        let mut walk = fs
            .read_dir_recursive(Path::new("d"), WalkOptions::empty())
            .unwrap();
        let mut inside_sub = 0;
        while let Some(item) = walk.next() {
            let item = item.unwrap();
            if item.path().starts_with("/d/sub/") {
                inside_sub += 1;
                walk.pop();
            }
        }
        assert_eq!(1, inside_sub);
    }

    #[test]
    fn test_follow_directory_symlink() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("seed")).unwrap();
        fs.create_directories(Path::new("real")).unwrap();
        write(&fs, "real/inner");
        fs.create_symlink(Path::new("/real"), Path::new("seed/alias"))
            .unwrap();

        let flat = collect_paths(
            fs.read_dir_recursive(Path::new("seed"), WalkOptions::empty())
                .unwrap(),
        );
        assert_eq!(
            BTreeSet::from([PathBuf::from("/seed/alias")]),
            flat
        );

        let followed = collect_paths(
            fs.read_dir_recursive(Path::new("seed"), WalkOptions::FOLLOW_DIRECTORY_SYMLINK)
                .unwrap(),
        );
        assert_eq!(
            BTreeSet::from([
                PathBuf::from("/seed/alias"),
                PathBuf::from("/seed/alias/inner"),
            ]),
            followed
        );
    }

    #[test]
    fn test_host_iteration() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a"), b"").unwrap();
        std::fs::write(temp.path().join("sub/b"), b"").unwrap();

        let fs = HostFs::new().with_current_path(temp.path()).unwrap();
        let flat: Vec<_> = fs
            .read_dir(Path::new("."))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(2, flat.len());

        let all = fs
            .read_dir_recursive(Path::new("."), WalkOptions::empty())
            .unwrap()
            .count();
        assert_eq!(3, all);
    }
}
