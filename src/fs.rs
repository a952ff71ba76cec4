//! The public filesystem handle. A handle wraps one backend (the virtual
//! tree, the host filesystem, or a read-only view over either) and every
//! operation dispatches through it.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use crate::copy::{copy_file_into, copy_into};
use crate::errors::{FsError, Result};
use crate::file::{
    file_from_host, CopyOptions, Dir, File, FileKind, FileStatus, HostCtx, HostDir, HostRegular,
    Mode, OpenMode, PermOptions, SpaceInfo, WalkOptions,
};
use crate::os_fs::HostFs;
use crate::path::{lexically_normal, lexically_relative};
use crate::vfs::Vfs;
use crate::walk::{ReadDir, RecursiveReadDir};

/// A filesystem handle. All filesystem work of a program flows through
/// one of these, so tests and sandboxed code can swap the real host
/// filesystem for a virtual one without touching caller code.
///
/// Handles are cheap to clone; clones share the same underlying tree.
/// A handle is single-threaded: share it across threads only behind
/// external serialization.
#[derive(Clone)]
pub struct FileSystem {
    backend: Backend,
}

#[derive(Clone)]
pub(crate) enum Backend {
    Virtual(Vfs),
    Host(HostFs),
    ReadOnly(Box<Backend>),
}

impl FileSystem {
    pub(crate) fn from_vfs(vfs: Vfs) -> Self {
        Self { backend: Backend::Virtual(vfs) }
    }

    pub(crate) fn from_host(host: HostFs) -> Self {
        Self { backend: Backend::Host(host) }
    }

    pub(crate) fn read_only(fs: FileSystem) -> Self {
        Self { backend: Backend::ReadOnly(Box::new(fs.backend)) }
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    /// A read-only byte source over the regular file at `p`.
    pub fn open_read(&self, p: impl AsRef<Path>, mode: OpenMode) -> Result<Box<dyn Read>> {
        self.backend.open_read(p.as_ref(), mode)
    }

    /// A byte sink over the regular file at `p`, creating it when the
    /// tail component is absent and its parent is a directory. Content
    /// becomes observable when the sink is dropped.
    pub fn open_write(&self, p: impl AsRef<Path>, mode: OpenMode) -> Result<Box<dyn Write>> {
        self.backend.open_write(p.as_ref(), mode)
    }

    /// Reads the whole content of the regular file at `p`.
    pub fn read(&self, p: impl AsRef<Path>) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read(p.as_ref(), OpenMode::BINARY)?
            .read_to_end(&mut buf)
            .map_err(|e| FsError::io(p.as_ref(), e))?;
        Ok(buf)
    }

    pub fn read_to_string(&self, p: impl AsRef<Path>) -> Result<String> {
        let buf = self.read(p.as_ref())?;
        String::from_utf8(buf).map_err(|_| FsError::InvalidArgument(p.as_ref().to_path_buf()))
    }

    /// Replaces the content of the regular file at `p`, creating it if
    /// needed.
    pub fn write(&self, p: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let mut w = self.open_write(p.as_ref(), OpenMode::TRUNCATE)?;
        w.write_all(contents.as_ref())
            .and_then(|()| w.flush())
            .map_err(|e| FsError::io(p.as_ref(), e))?;
        Ok(())
    }

    /// Absolute normalized path of the existing file at `p`, with every
    /// symlink resolved.
    pub fn canonical(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        self.backend.canonical(p.as_ref())
    }

    /// Resolves as far as components exist, then appends the rest
    /// lexically.
    pub fn weakly_canonical(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        self.backend.weakly_canonical(p.as_ref())
    }

    pub fn absolute(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        let p = p.as_ref();
        if p.is_absolute() {
            return Ok(lexically_normal(p));
        }
        Ok(lexically_normal(&self.current_path()?.join(p)))
    }

    /// `p` expressed relative to the working directory (or `base`).
    pub fn relative(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        let base = self.current_path()?;
        self.relative_to(p, base)
    }

    pub fn relative_to(&self, p: impl AsRef<Path>, base: impl AsRef<Path>) -> Result<PathBuf> {
        let p = self.weakly_canonical(p)?;
        let base = self.weakly_canonical(base)?;
        Ok(lexically_relative(&p, &base).unwrap_or_default())
    }

    pub fn proximate(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        let rel = self.relative(p.as_ref())?;
        if rel.as_os_str().is_empty() {
            return Ok(p.as_ref().to_path_buf());
        }
        Ok(rel)
    }

    /// Copies `src` to `dst` within this filesystem, honoring `opts` as
    /// described for [`CopyOptions`].
    pub fn copy(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>, opts: CopyOptions) -> Result<()> {
        self.backend.copy(src.as_ref(), dst.as_ref(), opts)
    }

    /// Copies `src` from this filesystem to `dst` on `other`. Creating
    /// symlinks or hard links across two distinct filesystems is
    /// rejected; everything else falls back to the byte-copying
    /// algorithm driven through `other`'s public surface.
    pub fn copy_to(
        &self,
        src: impl AsRef<Path>,
        other: &FileSystem,
        dst: impl AsRef<Path>,
        opts: CopyOptions,
    ) -> Result<()> {
        let src = src.as_ref();
        let dst = dst.as_ref();
        if matches!(other.backend, Backend::ReadOnly(_)) {
            return Err(FsError::ReadOnlyFs);
        }
        if self.backend.tree_token() == other.backend.tree_token() {
            return other.backend.copy(src, dst, opts);
        }

        if opts.contains(CopyOptions::CREATE_SYMLINKS)
            || opts.contains(CopyOptions::CREATE_HARD_LINKS)
        {
            return Err(FsError::InvalidArgument(src.to_path_buf()));
        }

        let (src_f, src_p) = self.backend.source_file(src)?;
        let (dst_dir, dst_p) = other.backend.dest_parent(dst)?;
        copy_into(&src_f, &src_p, &dst_dir, &dst_p, opts)
    }

    pub fn copy_file(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        opts: CopyOptions,
    ) -> Result<bool> {
        self.backend.copy_file(src.as_ref(), dst.as_ref(), opts)
    }

    /// Re-creates the symlink at `from` under `to`, with the same target.
    pub fn copy_symlink(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let target = self.read_symlink(from)?;
        self.create_symlink(target, to)
    }

    /// Creates the directory `p`; its parent must exist. `false` when `p`
    /// already is a directory.
    pub fn create_directory(&self, p: impl AsRef<Path>) -> Result<bool> {
        self.backend.create_directory(p.as_ref(), None)
    }

    /// Like [`create_directory`](Self::create_directory), copying the
    /// permission bits of the existing directory `attr`.
    pub fn create_directory_with_attributes(
        &self,
        p: impl AsRef<Path>,
        attr: impl AsRef<Path>,
    ) -> Result<bool> {
        self.backend.create_directory(p.as_ref(), Some(attr.as_ref()))
    }

    /// Creates every missing directory of `p`. `false` when nothing was
    /// missing.
    pub fn create_directories(&self, p: impl AsRef<Path>) -> Result<bool> {
        self.backend.create_directories(p.as_ref())
    }

    pub fn create_hard_link(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        self.backend.create_hard_link(target.as_ref(), link.as_ref())
    }

    /// Creates a symlink at `link` whose target is stored verbatim; the
    /// target does not need to exist.
    pub fn create_symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        self.backend.create_symlink(target.as_ref(), link.as_ref())
    }

    pub fn create_directory_symlink(
        &self,
        target: impl AsRef<Path>,
        link: impl AsRef<Path>,
    ) -> Result<()> {
        self.create_symlink(target, link)
    }

    pub fn current_path(&self) -> Result<PathBuf> {
        self.backend.current_path()
    }

    /// A handle over the same tree whose working directory is the
    /// directory at `p`.
    pub fn with_current_path(&self, p: impl AsRef<Path>) -> Result<FileSystem> {
        Ok(FileSystem { backend: self.backend.with_current_path(p.as_ref())? })
    }

    /// A handle confined to the subtree at `p`, presented as its root.
    pub fn change_root(&self, p: impl AsRef<Path>, temp_dir: impl AsRef<Path>) -> Result<FileSystem> {
        Ok(FileSystem { backend: self.backend.change_root(p.as_ref(), temp_dir.as_ref())? })
    }

    /// True iff both paths resolve to the same underlying file. Exactly
    /// one unresolvable path is `false`; both unresolvable is an error.
    pub fn equivalent(&self, p1: impl AsRef<Path>, p2: impl AsRef<Path>) -> Result<bool> {
        self.backend.equivalent(p1.as_ref(), p2.as_ref())
    }

    pub fn file_size(&self, p: impl AsRef<Path>) -> Result<u64> {
        self.backend.file_size(p.as_ref())
    }

    pub fn hard_link_count(&self, p: impl AsRef<Path>) -> Result<u64> {
        self.backend.hard_link_count(p.as_ref())
    }

    pub fn last_write_time(&self, p: impl AsRef<Path>) -> Result<SystemTime> {
        self.backend.last_write_time(p.as_ref())
    }

    pub fn set_last_write_time(&self, p: impl AsRef<Path>, t: SystemTime) -> Result<()> {
        self.backend.set_last_write_time(p.as_ref(), t)
    }

    /// Applies `prms` to the file at `p` according to `opts`: exactly one
    /// of `REPLACE`, `ADD` or `REMOVE`, plus `NOFOLLOW` to act on a
    /// symlink itself.
    pub fn permissions(&self, p: impl AsRef<Path>, prms: Mode, opts: PermOptions) -> Result<()> {
        self.backend.permissions(p.as_ref(), prms, opts)
    }

    pub fn read_symlink(&self, p: impl AsRef<Path>) -> Result<PathBuf> {
        self.backend.read_symlink(p.as_ref())
    }

    /// Removes the file or empty directory at `p`. `false` when nothing
    /// exists there.
    pub fn remove(&self, p: impl AsRef<Path>) -> Result<bool> {
        self.backend.remove(p.as_ref())
    }

    /// Removes `p` and everything below it; returns the number of files
    /// removed.
    pub fn remove_all(&self, p: impl AsRef<Path>) -> Result<u64> {
        self.backend.remove_all(p.as_ref())
    }

    pub fn rename(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        self.backend.rename(src.as_ref(), dst.as_ref())
    }

    pub fn resize_file(&self, p: impl AsRef<Path>, new_size: u64) -> Result<()> {
        self.backend.resize_file(p.as_ref(), new_size)
    }

    pub fn space(&self, p: impl AsRef<Path>) -> Result<SpaceInfo> {
        self.backend.space(p.as_ref())
    }

    /// Kind and permissions of the file at `p`, following symlinks. An
    /// unresolvable path reports [`FileKind::NotFound`] instead of
    /// failing.
    pub fn status(&self, p: impl AsRef<Path>) -> Result<FileStatus> {
        self.backend.status(p.as_ref())
    }

    /// Like [`status`](Self::status) but without following a final
    /// symlink.
    pub fn symlink_status(&self, p: impl AsRef<Path>) -> Result<FileStatus> {
        self.backend.symlink_status(p.as_ref())
    }

    pub fn temp_directory_path(&self) -> Result<PathBuf> {
        self.backend.temp_directory_path()
    }

    /// Empty means: a directory with no entries, or a regular file of
    /// size zero.
    pub fn is_empty(&self, p: impl AsRef<Path>) -> Result<bool> {
        self.backend.is_empty(p.as_ref())
    }

    pub fn exists(&self, p: impl AsRef<Path>) -> bool {
        self.status(p).map(|s| s.exists()).unwrap_or(false)
    }

    pub fn is_directory(&self, p: impl AsRef<Path>) -> bool {
        self.status(p).map(|s| s.kind() == FileKind::Directory).unwrap_or(false)
    }

    pub fn is_regular_file(&self, p: impl AsRef<Path>) -> bool {
        self.status(p).map(|s| s.kind() == FileKind::Regular).unwrap_or(false)
    }

    pub fn is_symlink(&self, p: impl AsRef<Path>) -> bool {
        self.symlink_status(p)
            .map(|s| s.kind() == FileKind::Symlink)
            .unwrap_or(false)
    }

    pub fn is_other(&self, p: impl AsRef<Path>) -> bool {
        self.status(p).map(|s| s.kind() == FileKind::Unknown).unwrap_or(false)
    }

    /// Iterates the children of the directory at `p`.
    pub fn read_dir(&self, p: impl AsRef<Path>) -> Result<ReadDir> {
        self.backend.read_dir(p.as_ref())
    }

    /// Recursively iterates the subtree at `p`, pre-order.
    pub fn read_dir_recursive(
        &self,
        p: impl AsRef<Path>,
        opts: WalkOptions,
    ) -> Result<RecursiveReadDir> {
        self.backend.read_dir_recursive(p.as_ref(), opts)
    }

    /// Mounts `other`'s working directory over the directory at
    /// `target`. The first mount on a host-backed handle converts it to a
    /// virtual tree of host-backed nodes.
    pub fn mount(&mut self, target: impl AsRef<Path>, other: &FileSystem) -> Result<()> {
        let target = target.as_ref();
        match &mut self.backend {
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
            Backend::Virtual(v) => {
                let attachment = other.backend.cwd_dir()?;
                v.mount(target, File::Dir(attachment))
            }
            Backend::Host(h) => {
                let v = h.into_virtual()?;
                let attachment = other.backend.cwd_dir()?;
                v.mount(target, File::Dir(attachment))?;
                self.backend = Backend::Virtual(v);
                Ok(())
            }
        }
    }

    /// Pops the most recent mount at `target`, restoring what it covered.
    pub fn unmount(&mut self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref();
        match &mut self.backend {
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
            Backend::Virtual(v) => v.unmount(target),
            Backend::Host(_) => Err(FsError::InvalidArgument(target.to_path_buf())),
        }
    }
}

impl Backend {
    pub(crate) fn cwd_dir(&self) -> Result<Rc<dyn Dir>> {
        match self {
            Backend::Virtual(v) => v.cwd_dir(),
            Backend::Host(h) => h.cwd_dir(),
            Backend::ReadOnly(b) => b.cwd_dir(),
        }
    }

    pub(crate) fn temp_for_derived(&self) -> PathBuf {
        self.temp_directory_path().unwrap_or_else(|_| std::env::temp_dir())
    }

    fn tree_token(&self) -> usize {
        match self {
            Backend::Virtual(v) => Rc::as_ptr(&v.cwd_entry().top()) as *const () as usize,
            Backend::Host(_) => 1,
            Backend::ReadOnly(b) => b.tree_token(),
        }
    }

    fn source_file(&self, p: &Path) -> Result<(File, PathBuf)> {
        match self {
            Backend::Virtual(v) => {
                let entry = v.navigate(p)?;
                Ok((entry.file().clone(), entry.path()))
            }
            Backend::Host(h) => {
                let host = h.host_path(p);
                let file = file_from_host(&HostCtx::new(), host.clone())?
                    .ok_or_else(|| FsError::NotFound(h.to_virtual(&host)))?;
                Ok((file, lexically_normal(&h.to_virtual(&host))))
            }
            Backend::ReadOnly(b) => b.source_file(p),
        }
    }

    fn dest_parent(&self, p: &Path) -> Result<(Rc<dyn Dir>, PathBuf)> {
        match self {
            Backend::Virtual(v) => {
                let (prev, _, dst_p) = v.dst_parent(p)?;
                Ok((prev.dir()?, dst_p))
            }
            Backend::Host(h) => {
                let dst_p = h.weakly_canonical(p)?;
                let parent = dst_p.parent().unwrap_or(Path::new("/"));
                let parent_host = h.host_path(parent);
                let meta = std::fs::metadata(&parent_host)
                    .map_err(|e| FsError::io(&parent_host, e))?;
                if !meta.is_dir() {
                    return Err(FsError::NotADirectory(parent.to_path_buf()));
                }
                Ok((Rc::new(HostDir::new(HostCtx::new(), parent_host)), dst_p))
            }
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn open_read(&self, p: &Path, mode: OpenMode) -> Result<Box<dyn Read>> {
        match self {
            Backend::Virtual(v) => v.open_read(p, mode),
            Backend::Host(h) => h.open_read(p, mode),
            Backend::ReadOnly(b) => b.open_read(p, mode),
        }
    }

    fn open_write(&self, p: &Path, mode: OpenMode) -> Result<Box<dyn Write>> {
        match self {
            Backend::Virtual(v) => v.open_write(p, mode),
            Backend::Host(h) => h.open_write(p, mode),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn canonical(&self, p: &Path) -> Result<PathBuf> {
        match self {
            Backend::Virtual(v) => v.canonical(p),
            Backend::Host(h) => h.canonical(p),
            Backend::ReadOnly(b) => b.canonical(p),
        }
    }

    fn weakly_canonical(&self, p: &Path) -> Result<PathBuf> {
        match self {
            Backend::Virtual(v) => v.weakly_canonical(p),
            Backend::Host(h) => h.weakly_canonical(p),
            Backend::ReadOnly(b) => b.weakly_canonical(p),
        }
    }

    fn copy(&self, src: &Path, dst: &Path, opts: CopyOptions) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.copy(src, dst, opts),
            Backend::Host(_) => {
                let (src_f, src_p) = self.source_file(src)?;
                let (dst_dir, dst_p) = self.dest_parent(dst)?;
                copy_into(&src_f, &src_p, &dst_dir, &dst_p, opts)
            }
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn copy_file(&self, src: &Path, dst: &Path, opts: CopyOptions) -> Result<bool> {
        match self {
            Backend::Virtual(v) => v.copy_file(src, dst, opts),
            Backend::Host(h) => {
                let src_host = h.host_path(src);
                let resolved = std::fs::canonicalize(&src_host)
                    .map_err(|e| FsError::io(&src_host, e))?;
                let meta = std::fs::metadata(&resolved)
                    .map_err(|e| FsError::io(&resolved, e))?;
                if !meta.is_file() {
                    return Err(FsError::InvalidArgument(h.to_virtual(&resolved)));
                }

                let src_r: Rc<dyn crate::file::Regular> = Rc::new(HostRegular::new(resolved));
                let (dst_dir, dst_p) = self.dest_parent(dst)?;
                copy_file_into(&src_r, &h.to_virtual(&src_host), &dst_dir, &dst_p, opts)
            }
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn create_directory(&self, p: &Path, attr: Option<&Path>) -> Result<bool> {
        match self {
            Backend::Virtual(v) => match attr {
                None => v.create_directory(p),
                Some(attr) => v.create_directory_with_attributes(p, attr),
            },
            Backend::Host(h) => h.create_directory(p, attr),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn create_directories(&self, p: &Path) -> Result<bool> {
        match self {
            Backend::Virtual(v) => v.create_directories(p),
            Backend::Host(h) => h.create_directories(p),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn create_hard_link(&self, target: &Path, link: &Path) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.create_hard_link(target, link),
            Backend::Host(h) => h.create_hard_link(target, link),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.create_symlink(target, link),
            Backend::Host(h) => h.create_symlink(target, link),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn current_path(&self) -> Result<PathBuf> {
        match self {
            Backend::Virtual(v) => Ok(v.current_path()),
            Backend::Host(h) => Ok(h.current_path()),
            Backend::ReadOnly(b) => b.current_path(),
        }
    }

    fn with_current_path(&self, p: &Path) -> Result<Backend> {
        match self {
            Backend::Virtual(v) => Ok(Backend::Virtual(v.with_current_path(p)?)),
            Backend::Host(h) => Ok(Backend::Host(h.with_current_path(p)?)),
            Backend::ReadOnly(b) => Ok(Backend::ReadOnly(Box::new(b.with_current_path(p)?))),
        }
    }

    fn change_root(&self, p: &Path, temp: &Path) -> Result<Backend> {
        match self {
            Backend::Virtual(v) => Ok(Backend::Virtual(v.change_root(p, temp)?)),
            Backend::Host(h) => Ok(Backend::Host(h.change_root(p, temp)?)),
            Backend::ReadOnly(b) => Ok(Backend::ReadOnly(Box::new(b.change_root(p, temp)?))),
        }
    }

    fn equivalent(&self, p1: &Path, p2: &Path) -> Result<bool> {
        match self {
            Backend::Virtual(v) => v.equivalent(p1, p2),
            Backend::Host(h) => h.equivalent(p1, p2),
            Backend::ReadOnly(b) => b.equivalent(p1, p2),
        }
    }

    fn file_size(&self, p: &Path) -> Result<u64> {
        match self {
            Backend::Virtual(v) => v.file_size(p),
            Backend::Host(h) => h.file_size(p),
            Backend::ReadOnly(b) => b.file_size(p),
        }
    }

    fn hard_link_count(&self, p: &Path) -> Result<u64> {
        match self {
            Backend::Virtual(v) => v.hard_link_count(p),
            Backend::Host(h) => h.hard_link_count(p),
            Backend::ReadOnly(b) => b.hard_link_count(p),
        }
    }

    fn last_write_time(&self, p: &Path) -> Result<SystemTime> {
        match self {
            Backend::Virtual(v) => v.last_write_time(p),
            Backend::Host(h) => h.last_write_time(p),
            Backend::ReadOnly(b) => b.last_write_time(p),
        }
    }

    fn set_last_write_time(&self, p: &Path, t: SystemTime) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.set_last_write_time(p, t),
            Backend::Host(h) => h.set_last_write_time(p, t),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn permissions(&self, p: &Path, prms: Mode, opts: PermOptions) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.permissions(p, prms, opts),
            Backend::Host(h) => h.permissions(p, prms, opts),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn read_symlink(&self, p: &Path) -> Result<PathBuf> {
        match self {
            Backend::Virtual(v) => v.read_symlink(p),
            Backend::Host(h) => h.read_symlink(p),
            Backend::ReadOnly(b) => b.read_symlink(p),
        }
    }

    fn remove(&self, p: &Path) -> Result<bool> {
        match self {
            Backend::Virtual(v) => v.remove(p),
            Backend::Host(h) => h.remove(p),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn remove_all(&self, p: &Path) -> Result<u64> {
        match self {
            Backend::Virtual(v) => v.remove_all(p),
            Backend::Host(h) => h.remove_all(p),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.rename(src, dst),
            Backend::Host(h) => h.rename(src, dst),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn resize_file(&self, p: &Path, new_size: u64) -> Result<()> {
        match self {
            Backend::Virtual(v) => v.resize_file(p, new_size),
            Backend::Host(h) => h.resize_file(p, new_size),
            Backend::ReadOnly(_) => Err(FsError::ReadOnlyFs),
        }
    }

    fn space(&self, p: &Path) -> Result<SpaceInfo> {
        match self {
            Backend::Virtual(v) => v.space(p),
            Backend::Host(h) => h.space(p),
            Backend::ReadOnly(b) => b.space(p),
        }
    }

    fn status(&self, p: &Path) -> Result<FileStatus> {
        match self {
            Backend::Virtual(v) => v.status(p),
            Backend::Host(h) => h.status(p),
            Backend::ReadOnly(b) => b.status(p),
        }
    }

    fn symlink_status(&self, p: &Path) -> Result<FileStatus> {
        match self {
            Backend::Virtual(v) => v.symlink_status(p),
            Backend::Host(h) => h.symlink_status(p),
            Backend::ReadOnly(b) => b.symlink_status(p),
        }
    }

    fn temp_directory_path(&self) -> Result<PathBuf> {
        match self {
            Backend::Virtual(v) => v.temp_directory_path(),
            Backend::Host(h) => h.temp_directory_path(),
            Backend::ReadOnly(b) => b.temp_directory_path(),
        }
    }

    fn is_empty(&self, p: &Path) -> Result<bool> {
        match self {
            Backend::Virtual(v) => v.is_empty(p),
            Backend::Host(h) => h.is_empty(p),
            Backend::ReadOnly(b) => b.is_empty(p),
        }
    }

    fn read_dir(&self, p: &Path) -> Result<ReadDir> {
        match self {
            Backend::Virtual(v) => v.read_dir(p),
            Backend::Host(h) => h.read_dir(p),
            Backend::ReadOnly(b) => b.read_dir(p),
        }
    }

    fn read_dir_recursive(&self, p: &Path, opts: WalkOptions) -> Result<RecursiveReadDir> {
        match self {
            Backend::Virtual(v) => v.read_dir_recursive(p, opts),
            Backend::Host(h) => h.read_dir_recursive(p, opts),
            Backend::ReadOnly(b) => b.read_dir_recursive(p, opts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{make_mem_fs, make_read_only_fs, make_union_fs, make_vfs};

    #[test]
    fn test_scenario_write_read() {
        let fs = make_mem_fs("/tmp");
        fs.write("foo", "Lorem ipsum").unwrap();
        assert_eq!("Lorem ipsum", fs.read_to_string("foo").unwrap());
        assert!(fs.exists("foo"));
    }

    #[test]
    fn test_spilled_payload_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let fs = make_vfs(temp.path());
        fs.write("foo", "spilled bytes").unwrap();
        assert_eq!("spilled bytes", fs.read_to_string("foo").unwrap());

        // The payload landed under the temp dir with a random name.
        assert_eq!(1, std::fs::read_dir(temp.path()).unwrap().count());

        drop(fs);
        assert_eq!(0, std::fs::read_dir(temp.path()).unwrap().count());
    }

    #[test]
    fn test_union_copy_on_write() {
        let upper = make_mem_fs("/tmp");
        let lower = make_mem_fs("/tmp");
        lower.write("foo", "AAA").unwrap();

        let union = make_union_fs(&upper, &lower).unwrap();
        assert_eq!("AAA", union.read_to_string("foo").unwrap());
        assert!(!upper.exists("foo"));

        union.write("foo", "BBB").unwrap();
        assert!(upper.exists("foo"));
        assert_eq!("BBB", union.read_to_string("foo").unwrap());
        assert_eq!("AAA", lower.read_to_string("foo").unwrap());
    }

    #[test]
    fn test_union_whiteout_through_handle() {
        let upper = make_mem_fs("/tmp");
        let lower = make_mem_fs("/tmp");
        lower.write("doomed", "x").unwrap();

        let union = make_union_fs(&upper, &lower).unwrap();
        assert!(union.remove("doomed").unwrap());
        assert!(!union.exists("doomed"));
        assert!(lower.exists("doomed"));
    }

    #[test]
    fn test_mount_scenario() {
        let mut lhs = make_mem_fs("/tmp");
        let rhs = make_mem_fs("/tmp");
        lhs.create_directory("foo").unwrap();
        lhs.write("foo/a", "X").unwrap();
        rhs.create_directory("bar").unwrap();

        lhs.mount("foo", &rhs.with_current_path("bar").unwrap())
            .unwrap();
        assert!(!lhs.exists("foo/a"));
        lhs.write("foo/y", "Y").unwrap();
        assert_eq!("Y", rhs.read_to_string("bar/y").unwrap());

        lhs.unmount("foo").unwrap();
        assert_eq!("X", lhs.read_to_string("foo/a").unwrap());
    }

    #[test]
    fn test_mount_converts_host_backend() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("mnt")).unwrap();
        std::fs::write(temp.path().join("plain"), b"host data").unwrap();
        std::fs::write(temp.path().join("mnt/original"), b"hidden").unwrap();

        let mut host = crate::make_sys_fs().with_current_path(temp.path()).unwrap();
        let mem = make_mem_fs("/tmp");
        mem.write("virtual", "from mem").unwrap();

        host.mount("mnt", &mem).unwrap();
        assert_eq!("from mem", host.read_to_string("mnt/virtual").unwrap());
        assert!(!host.exists("mnt/original"));
        // Paths outside the mounted subtree still reach the host.
        assert_eq!("host data", host.read_to_string("plain").unwrap());
        // Writes through the mount land in the memory tree.
        host.write("mnt/new", "x").unwrap();
        assert_eq!("x", mem.read_to_string("new").unwrap());

        host.unmount("mnt").unwrap();
        assert_eq!("hidden", host.read_to_string("mnt/original").unwrap());
    }

    #[test]
    fn test_host_unmount_without_mount() {
        let fs = crate::make_sys_fs();
        assert!(matches!(
            fs.clone().unmount("anything"),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_only_refuses_mutators() {
        let fs = make_mem_fs("/tmp");
        fs.create_directory("d").unwrap();
        fs.write("d/f", "original").unwrap();

        let ro = make_read_only_fs(fs.clone());
        assert!(matches!(ro.write("d/f", "nope"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(ro.remove("d/f"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(ro.remove_all("d"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(ro.rename("d/f", "d/g"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(ro.create_directory("x"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(ro.create_directories("x/y"), Err(FsError::ReadOnlyFs)));
        assert!(matches!(
            ro.create_symlink("d/f", "l"),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(
            ro.create_hard_link("d/f", "l"),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(
            ro.copy("d/f", "d/g", CopyOptions::empty()),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(
            ro.copy_file("d/f", "d/g", CopyOptions::empty()),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(ro.resize_file("d/f", 0), Err(FsError::ReadOnlyFs)));
        assert!(matches!(
            ro.set_last_write_time("d/f", SystemTime::now()),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(
            ro.permissions("d/f", Mode::OWNER_READ, PermOptions::REPLACE),
            Err(FsError::ReadOnlyFs)
        ));

        // Reads pass through and the tree is unchanged.
        assert_eq!("original", ro.read_to_string("d/f").unwrap());
        assert_eq!("original", fs.read_to_string("d/f").unwrap());
        assert_eq!(1, ro.read_dir("d").unwrap().count());
    }

    #[test]
    fn test_read_only_wraps_derived_views() {
        let fs = make_mem_fs("/tmp");
        fs.create_directories("a/b").unwrap();
        fs.write("a/b/f", "x").unwrap();

        let ro = make_read_only_fs(fs);
        let sub = ro.with_current_path("a").unwrap();
        assert!(matches!(sub.write("b/g", "y"), Err(FsError::ReadOnlyFs)));

        let jail = ro.change_root("a", "/tmp").unwrap();
        assert!(matches!(jail.write("g", "y"), Err(FsError::ReadOnlyFs)));
        assert_eq!("x", jail.read_to_string("b/f").unwrap());
    }

    #[test]
    fn test_cross_filesystem_copy() {
        let a = make_mem_fs("/tmp");
        let b = make_mem_fs("/tmp");
        a.create_directories("src/sub").unwrap();
        a.write("src/f", "payload").unwrap();
        a.write("src/sub/g", "deep").unwrap();

        a.copy_to("src", &b, "dst", CopyOptions::RECURSIVE).unwrap();
        assert_eq!("payload", b.read_to_string("dst/f").unwrap());
        assert_eq!("deep", b.read_to_string("dst/sub/g").unwrap());

        // Links cannot span two filesystems.
        assert!(matches!(
            a.copy_to("src/f", &b, "link", CopyOptions::CREATE_HARD_LINKS),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            a.copy_to("src/f", &b, "link", CopyOptions::CREATE_SYMLINKS),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cross_copy_to_host() {
        let temp = tempfile::tempdir().unwrap();
        let mem = make_mem_fs("/tmp");
        mem.create_directory("src").unwrap();
        mem.write("src/f", "to host").unwrap();

        let host = crate::make_sys_fs().with_current_path(temp.path()).unwrap();
        mem.copy_to("src", &host, "dst", CopyOptions::RECURSIVE)
            .unwrap();
        assert_eq!(
            "to host",
            std::fs::read_to_string(temp.path().join("dst/f")).unwrap()
        );

        // And back again.
        let back = make_mem_fs("/tmp");
        host.copy_to("dst", &back, "returned", CopyOptions::RECURSIVE)
            .unwrap();
        assert_eq!("to host", back.read_to_string("returned/f").unwrap());
    }

    #[test]
    fn test_relative_and_proximate() {
        let fs = make_mem_fs("/tmp");
        fs.create_directories("a/b/c").unwrap();
        let fs = fs.with_current_path("a/b").unwrap();

        assert_eq!(PathBuf::from("c"), fs.relative("/a/b/c").unwrap());
        assert_eq!(PathBuf::from("../.."), fs.relative("/").unwrap());
        assert_eq!(PathBuf::from("c"), fs.proximate("c").unwrap());
        assert_eq!(PathBuf::from("/a/b/c"), fs.absolute("c").unwrap());
    }
}
