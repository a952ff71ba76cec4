//! File objects: the shared node surface, the regular/directory/symlink
//! contracts and the handle type directories store their children as.

mod host;
mod mem;
mod spill;
mod union;

pub(crate) use host::{file_from_host, host_space, HostCtx, HostDir, HostRegular};
pub(crate) use mem::{MemDir, MemRegular};
pub(crate) use spill::SpillRegular;
pub(crate) use union::UnionDir;

use std::cell::Cell;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::errors::{FsError, Result};

bitflags! {
    /// POSIX-style permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXEC = 0o001;
        const SET_UID = 0o4000;
        const SET_GID = 0o2000;
        const STICKY = 0o1000;
    }
}

impl Mode {
    /// All bits that carry meaning; everything else is masked off.
    pub const MASK: Mode = Mode::all();

    pub(crate) const REGULAR_DEFAULT: Mode = Mode::from_bits_truncate(0o644);
    pub(crate) const DIR_DEFAULT: Mode = Mode::from_bits_truncate(0o755);
    pub(crate) const TEMP_DIR: Mode = Mode::from_bits_truncate(0o1777);
}

bitflags! {
    /// How [`FileSystem::permissions`](crate::FileSystem::permissions)
    /// combines the given bits with the current ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermOptions: u8 {
        const REPLACE = 1;
        const ADD = 2;
        const REMOVE = 4;
        const NOFOLLOW = 8;
    }
}

bitflags! {
    /// Options recognized when opening byte streams.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        /// Replace the content when the sink is closed. This is also the
        /// behavior of an empty mode.
        const TRUNCATE = 1;
        /// Extend the content when the sink is closed.
        const APPEND = 2;
        /// No text translation. Streams never translate, so this is
        /// accepted and ignored.
        const BINARY = 4;
    }
}

bitflags! {
    /// Behavior of [`FileSystem::copy`](crate::FileSystem::copy).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CopyOptions: u16 {
        const SKIP_EXISTING = 1 << 0;
        const OVERWRITE_EXISTING = 1 << 1;
        const UPDATE_EXISTING = 1 << 2;
        const RECURSIVE = 1 << 3;
        const COPY_SYMLINKS = 1 << 4;
        const SKIP_SYMLINKS = 1 << 5;
        const DIRECTORIES_ONLY = 1 << 6;
        const CREATE_SYMLINKS = 1 << 7;
        const CREATE_HARD_LINKS = 1 << 8;
    }
}

bitflags! {
    /// Options of recursive directory iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WalkOptions: u8 {
        /// Descend into symlinks whose chain resolves to a directory.
        const FOLLOW_DIRECTORY_SYMLINK = 1;
    }
}

/// Kind of a file, as reported by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    NotFound,
    Regular,
    Directory,
    Symlink,
    /// A node the model has no richer representation for, e.g. a FIFO on a
    /// host-backed filesystem.
    Unknown,
}

/// Kind and permissions of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    kind: FileKind,
    mode: Mode,
}

impl FileStatus {
    pub(crate) fn new(kind: FileKind, mode: Mode) -> Self {
        Self { kind, mode }
    }

    pub(crate) fn not_found() -> Self {
        Self { kind: FileKind::NotFound, mode: Mode::empty() }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn permissions(&self) -> Mode {
        self.mode
    }

    pub fn exists(&self) -> bool {
        self.kind != FileKind::NotFound
    }
}

/// Capacity of the volume a file lives on, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    pub capacity: u64,
    pub free: u64,
    pub available: u64,
}

impl SpaceInfo {
    /// Purely in-memory files are not backed by a sized volume.
    pub const UNBOUNDED: SpaceInfo = SpaceInfo {
        capacity: u64::MAX,
        free: u64::MAX,
        available: u64::MAX,
    };
}

/// Identity of the underlying file object. Hard links compare equal;
/// distinct files never do, even with equal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FileId {
    Node(usize),
    Host { dev: u64, ino: u64 },
    HostPath(PathBuf),
}

/// Owner, group, permission bits and link count of a virtual file.
#[derive(Debug)]
pub(crate) struct Meta {
    owner: Cell<i64>,
    group: Cell<i64>,
    mode: Cell<Mode>,
    nlink: Cell<u64>,
}

impl Meta {
    pub fn new(mode: Mode) -> Self {
        Self {
            owner: Cell::new(0),
            group: Cell::new(0),
            mode: Cell::new(mode),
            nlink: Cell::new(0),
        }
    }

    pub fn id(&self) -> FileId {
        FileId::Node(self as *const Meta as usize)
    }

    pub fn owner(&self) -> i64 {
        self.owner.get()
    }

    pub fn group(&self) -> i64 {
        self.group.get()
    }

    pub fn set_ownership(&self, owner: i64, group: i64) {
        self.owner.set(owner);
        self.group.set(group);
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.set(mode & Mode::MASK);
    }

    pub fn nlink(&self) -> u64 {
        self.nlink.get()
    }

    pub fn link_added(&self) {
        self.nlink.set(self.nlink.get() + 1);
    }

    pub fn link_removed(&self) {
        self.nlink.set(self.nlink.get().saturating_sub(1));
    }
}

/// Surface common to every file kind.
pub(crate) trait Node {
    fn owner(&self) -> i64;
    fn group(&self) -> i64;
    fn set_ownership(&self, owner: i64, group: i64);
    fn mode(&self) -> Mode;
    fn set_mode(&self, mode: Mode) -> Result<()>;
    fn id(&self) -> FileId;

    /// Number of directory entries naming this file.
    fn nlink(&self) -> u64;
    fn link_added(&self);
    fn link_removed(&self);

    fn space(&self) -> Result<SpaceInfo> {
        Ok(SpaceInfo::UNBOUNDED)
    }

    /// The host path backing this node, for nodes that live on the host
    /// filesystem. Host-level hard links and renames need it.
    fn host_path(&self) -> Option<PathBuf> {
        None
    }
}

/// A regular file: a byte payload with a modification time.
pub(crate) trait Regular: Node {
    fn size(&self) -> Result<u64>;
    fn resize(&self, new_size: u64) -> Result<()>;
    fn last_write_time(&self) -> Result<SystemTime>;
    fn set_last_write_time(&self, t: SystemTime) -> Result<()>;

    /// A read-only byte source positioned at offset 0.
    fn open_read(&self, mode: OpenMode) -> Result<Box<dyn Read>>;

    /// A buffered sink. Content becomes observable when the sink is
    /// dropped, which also stamps the modification time.
    fn open_write(&self, mode: OpenMode) -> Result<Box<dyn Write>>;

    /// Replaces this file's bytes with `src`'s bytes.
    fn copy_content_from(&self, src: &dyn Regular) -> Result<()>;

    /// In-memory files expose their buffer so content copies between them
    /// can share it copy-on-write instead of duplicating bytes.
    fn shared_bytes(&self) -> Option<Rc<Vec<u8>>> {
        None
    }
}

/// Result of an idempotent emplace: the child of the expected kind, or
/// `Conflict` when the name is taken by a different kind.
pub(crate) enum Emplaced<T> {
    Created(T),
    Existing(T),
    Conflict,
}

impl<T> Emplaced<T> {
    pub fn get(self) -> Option<(T, bool)> {
        match self {
            Emplaced::Created(v) => Some((v, true)),
            Emplaced::Existing(v) => Some((v, false)),
            Emplaced::Conflict => None,
        }
    }

    pub fn created(self) -> Option<T> {
        match self {
            Emplaced::Created(v) => Some(v),
            _ => None,
        }
    }
}

/// A directory: a mapping from names to owned child files.
pub(crate) trait Dir: Node {
    fn len(&self) -> Result<u64>;
    fn is_empty(&self) -> Result<bool>;
    fn contains(&self, name: &str) -> Result<bool>;
    fn next(&self, name: &str) -> Result<Option<File>>;

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>>;
    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>>;
    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>>;

    /// Installs an existing file under a new name. `false` if taken.
    fn link(&self, name: &str, file: File) -> Result<bool>;

    /// Installs `file` under `name`, replacing any current holder.
    fn relink(&self, name: &str, file: File) -> Result<()>;

    /// Removes the name; the file survives while other names reference it.
    /// `false` if the name is absent.
    fn unlink(&self, name: &str) -> Result<bool>;

    /// Like unlink but recursive for directories; returns the number of
    /// files that were removed.
    fn erase(&self, name: &str) -> Result<u64>;

    /// Erases all children; returns the total number of files removed.
    fn clear(&self) -> Result<u64>;

    /// Snapshot of the current children, in unspecified order.
    fn entries(&self) -> Result<Vec<(String, File)>>;

    /// Replaces the child `name` with `file`, remembering the replaced
    /// child so `unmount_next` can restore it.
    fn mount_next(&self, name: &str, file: File) -> Result<()>;
    fn unmount_next(&self, name: &str) -> Result<()>;
}

/// A symbolic link; the target is stored verbatim and may dangle.
/// Permissions are cosmetic.
#[derive(Debug)]
pub(crate) struct Symlink {
    meta: Meta,
    target: PathBuf,
}

impl Symlink {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { meta: Meta::new(Mode::MASK), target: target.into() }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Node for Symlink {
    fn owner(&self) -> i64 {
        self.meta.owner()
    }

    fn group(&self) -> i64 {
        self.meta.group()
    }

    fn set_ownership(&self, owner: i64, group: i64) {
        self.meta.set_ownership(owner, group);
    }

    fn mode(&self) -> Mode {
        self.meta.mode()
    }

    fn set_mode(&self, _mode: Mode) -> Result<()> {
        Ok(())
    }

    fn id(&self) -> FileId {
        self.meta.id()
    }

    fn nlink(&self) -> u64 {
        self.meta.nlink()
    }

    fn link_added(&self) {
        self.meta.link_added();
    }

    fn link_removed(&self) {
        self.meta.link_removed();
    }
}

/// A node of a kind outside the model, e.g. a FIFO seen on the host.
#[derive(Debug)]
pub(crate) struct UnknownNode {
    meta: Meta,
}

impl UnknownNode {
    pub fn new(mode: Mode) -> Self {
        Self { meta: Meta::new(mode) }
    }
}

impl Node for UnknownNode {
    fn owner(&self) -> i64 {
        self.meta.owner()
    }

    fn group(&self) -> i64 {
        self.meta.group()
    }

    fn set_ownership(&self, owner: i64, group: i64) {
        self.meta.set_ownership(owner, group);
    }

    fn mode(&self) -> Mode {
        self.meta.mode()
    }

    fn set_mode(&self, mode: Mode) -> Result<()> {
        self.meta.set_mode(mode);
        Ok(())
    }

    fn id(&self) -> FileId {
        self.meta.id()
    }

    fn nlink(&self) -> u64 {
        self.meta.nlink()
    }

    fn link_added(&self) {
        self.meta.link_added();
    }

    fn link_removed(&self) {
        self.meta.link_removed();
    }
}

/// Shared handle to a file object. Hard links are clones of the same
/// handle living under several directory names.
#[derive(Clone)]
pub(crate) enum File {
    Regular(Rc<dyn Regular>),
    Dir(Rc<dyn Dir>),
    Symlink(Rc<Symlink>),
    Unknown(Rc<UnknownNode>),
}

impl File {
    pub fn kind(&self) -> FileKind {
        match self {
            File::Regular(_) => FileKind::Regular,
            File::Dir(_) => FileKind::Directory,
            File::Symlink(_) => FileKind::Symlink,
            File::Unknown(_) => FileKind::Unknown,
        }
    }

    pub fn node(&self) -> &dyn Node {
        match self {
            File::Regular(f) => &**f,
            File::Dir(f) => &**f,
            File::Symlink(f) => &**f,
            File::Unknown(f) => &**f,
        }
    }

    pub fn id(&self) -> FileId {
        self.node().id()
    }

    pub fn same_as(&self, other: &File) -> bool {
        self.id() == other.id()
    }

    pub fn status(&self) -> FileStatus {
        FileStatus::new(self.kind(), self.node().mode())
    }

    pub fn as_regular(&self) -> Option<Rc<dyn Regular>> {
        match self {
            File::Regular(f) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn as_dir(&self) -> Option<Rc<dyn Dir>> {
        match self {
            File::Dir(f) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<Rc<Symlink>> {
        match self {
            File::Symlink(f) => Some(f.clone()),
            _ => None,
        }
    }
}

/// Number of files in the subtree hanging off `file`, counting `file`
/// itself and each directory entry below it once.
pub(crate) fn count_subtree(file: &File) -> u64 {
    let mut cnt = 1;
    if let File::Dir(d) = file {
        for (_, child) in d.entries().unwrap_or_default() {
            cnt += count_subtree(&child);
        }
    }
    cnt
}

/// Maps an open mode to a write disposition, rejecting the combinations
/// the contract does not recognize.
pub(crate) fn write_disposition(mode: OpenMode) -> Result<WriteDisposition> {
    let truncate = mode.contains(OpenMode::TRUNCATE);
    let append = mode.contains(OpenMode::APPEND);
    match (truncate, append) {
        (_, false) => Ok(WriteDisposition::Truncate),
        (false, true) => Ok(WriteDisposition::Append),
        (true, true) => Err(FsError::InvalidArgument(PathBuf::new())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteDisposition {
    Truncate,
    Append,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mask() {
        let m = Mode::from_bits_truncate(0o755);
        assert_eq!(
            Mode::OWNER_READ | Mode::OWNER_WRITE | Mode::OWNER_EXEC
                | Mode::GROUP_READ | Mode::GROUP_EXEC
                | Mode::OTHERS_READ | Mode::OTHERS_EXEC,
            m
        );
        assert_eq!(0o755, m.bits());
    }

    #[test]
    fn test_meta_links() {
        let meta = Meta::new(Mode::REGULAR_DEFAULT);
        assert_eq!(0, meta.nlink());
        meta.link_added();
        meta.link_added();
        assert_eq!(2, meta.nlink());
        meta.link_removed();
        assert_eq!(1, meta.nlink());
    }

    #[test]
    fn test_symlink_identity() {
        let a = Rc::new(Symlink::new("/foo"));
        let b = Rc::new(Symlink::new("/foo"));
        let fa = File::Symlink(a.clone());
        let fa2 = File::Symlink(a);
        let fb = File::Symlink(b);
        assert!(fa.same_as(&fa2));
        assert!(!fa.same_as(&fb));
    }

    #[test]
    fn test_write_disposition() {
        assert_eq!(
            WriteDisposition::Truncate,
            write_disposition(OpenMode::empty()).unwrap()
        );
        assert_eq!(
            WriteDisposition::Truncate,
            write_disposition(OpenMode::TRUNCATE | OpenMode::BINARY).unwrap()
        );
        assert_eq!(
            WriteDisposition::Append,
            write_disposition(OpenMode::APPEND).unwrap()
        );
        assert!(write_disposition(OpenMode::TRUNCATE | OpenMode::APPEND).is_err());
    }
}
