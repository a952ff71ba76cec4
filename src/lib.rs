//! A virtual filesystem library: one filesystem-like API backed by
//! pluggable implementations and composable overlays.
//!
//! A program obtains a [`FileSystem`] handle from one of the factories
//! and performs all filesystem work through it, so tests and sandboxed
//! code can swap the real host filesystem for an in-memory tree, a
//! chroot, a mount composition, a read-only view or a copy-on-write
//! union without touching caller code.
//!
//! ```
//! # fn main() -> vfs_kit::Result<()> {
//! let fs = vfs_kit::make_mem_fs("/tmp");
//! fs.create_directories("etc/app")?;
//! fs.write("etc/app/config", "answer = 42")?;
//! assert_eq!("answer = 42", fs.read_to_string("etc/app/config")?);
//! # Ok(())
//! # }
//! ```

mod copy;
mod entry;
mod errors;
mod file;
mod fs;
mod mount;
mod os_fs;
mod path;
mod storage;
mod vfs;
mod walk;

use std::path::Path;
use std::rc::Rc;

pub use errors::{FsError, Result};
pub use file::{
    CopyOptions, FileKind, FileStatus, Mode, OpenMode, PermOptions, SpaceInfo, WalkOptions,
};
pub use fs::FileSystem;
pub use walk::{DirEntry, ReadDir, RecursiveReadDir};

use file::{MemDir, UnionDir};
use os_fs::HostFs;
use storage::{MemStorage, SpillStorage};
use vfs::Vfs;

/// An in-memory tree whose regular-file bytes are spilled into uniquely
/// named files under `temp_dir` on the host.
pub fn make_vfs(temp_dir: impl AsRef<Path>) -> FileSystem {
    let storage = Rc::new(SpillStorage::new(temp_dir.as_ref()));
    let root = Rc::new(MemDir::new(storage));
    FileSystem::from_vfs(Vfs::new(root, temp_dir.as_ref()))
}

/// An in-memory tree with purely in-memory regular files. `temp_dir` is
/// only what [`FileSystem::temp_directory_path`] reports.
pub fn make_mem_fs(temp_dir: impl AsRef<Path>) -> FileSystem {
    let root = Rc::new(MemDir::new(Rc::new(MemStorage)));
    FileSystem::from_vfs(Vfs::new(root, temp_dir.as_ref()))
}

/// The host filesystem, with the process working directory captured at
/// creation.
pub fn make_sys_fs() -> FileSystem {
    FileSystem::from_host(HostFs::new())
}

/// Same host backend as [`make_sys_fs`]; both names are kept for callers
/// used to either.
pub fn make_os_fs() -> FileSystem {
    make_sys_fs()
}

/// A copy-on-write union: reads fall through to `lower`'s working
/// directory where `upper`'s has no entry; writes land on `upper`.
pub fn make_union_fs(upper: &FileSystem, lower: &FileSystem) -> Result<FileSystem> {
    let up = upper.backend().cwd_dir()?;
    let lo = lower.backend().cwd_dir()?;
    let root = Rc::new(UnionDir::new(up, lo));
    let temp = upper.backend().temp_for_derived();
    Ok(FileSystem::from_vfs(Vfs::new(root, temp)))
}

/// A view of `fs` that refuses every mutating operation with
/// [`FsError::ReadOnlyFs`].
pub fn make_read_only_fs(fs: FileSystem) -> FileSystem {
    FileSystem::read_only(fs)
}
