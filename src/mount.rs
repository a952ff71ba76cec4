//! Mount points: a file that stands in for another file at a path, with
//! unmount restoring the original.

use std::path::Path;

use log::debug;

use crate::errors::{FsError, Result};
use crate::file::{File, FileKind};
use crate::vfs::Vfs;

/// The attachment must be of the same kind as the file currently at the
/// mount point, and symlinks can stand on neither side.
pub(crate) fn check_mount_kinds(p: &Path, existing: FileKind, attachment: FileKind) -> Result<()> {
    if existing == FileKind::NotFound {
        return Err(FsError::NotFound(p.to_path_buf()));
    }
    if existing == FileKind::Symlink || attachment == FileKind::Symlink {
        return Err(FsError::InvalidArgument(p.to_path_buf()));
    }
    if existing != attachment {
        if existing == FileKind::Directory || attachment == FileKind::Directory {
            return Err(FsError::NotADirectory(p.to_path_buf()));
        }
        return Err(FsError::InvalidArgument(p.to_path_buf()));
    }
    Ok(())
}

impl Vfs {
    pub fn mount(&self, target: &Path, attachment: File) -> Result<()> {
        let entry = self.navigate(target)?.follow_chain()?;
        if entry.is_root() {
            return Err(FsError::InvalidArgument(entry.path()));
        }

        debug!("mounting onto '{}'", entry.path().display());
        entry.prev()?.dir()?.mount_next(entry.name(), attachment)
    }

    pub fn unmount(&self, target: &Path) -> Result<()> {
        let entry = self.navigate(target)?.follow_chain()?;
        if entry.is_root() {
            return Err(FsError::InvalidArgument(entry.path()));
        }

        debug!("unmounting '{}'", entry.path().display());
        entry.prev()?.dir()?.unmount_next(entry.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{MemDir, OpenMode};
    use crate::storage::MemStorage;
    use std::io::{Read, Write};
    use std::rc::Rc;

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
    fn test_mount_hides_and_unmount_restores() {
        let lhs = mem_vfs();
        let rhs = mem_vfs();
        lhs.create_directory(Path::new("foo")).unwrap();
        write(&lhs, "foo/a", b"X");
        rhs.create_directory(Path::new("bar")).unwrap();

        let attachment = rhs
            .with_current_path(Path::new("bar"))
            .unwrap()
            .cwd_dir()
            .unwrap();
        lhs.mount(Path::new("foo"), File::Dir(attachment)).unwrap();

        assert!(!lhs.status(Path::new("foo/a")).unwrap().exists());
        write(&lhs, "foo/y", b"Y");
        assert_eq!(b"Y".to_vec(), read(&rhs, "bar/y"));

        lhs.unmount(Path::new("foo")).unwrap();
        assert_eq!(b"X".to_vec(), read(&lhs, "foo/a"));
    }

    #[test]
    fn test_mount_stacking() {
        let fs = mem_vfs();
        fs.create_directory(Path::new("at")).unwrap();
        write(&fs, "at/base", b"");

        let first = mem_vfs();
        first.create_directory(Path::new("x")).unwrap();
        let second = mem_vfs();
        second.create_directory(Path::new("y")).unwrap();

        fs.mount(Path::new("at"), File::Dir(first.cwd_dir().unwrap()))
            .unwrap();
        fs.mount(Path::new("at"), File::Dir(second.cwd_dir().unwrap()))
            .unwrap();
        assert!(fs.status(Path::new("at/y")).unwrap().exists());

        fs.unmount(Path::new("at")).unwrap();
        assert!(fs.status(Path::new("at/x")).unwrap().exists());

        fs.unmount(Path::new("at")).unwrap();
        assert!(fs.status(Path::new("at/base")).unwrap().exists());

        assert!(matches!(
            fs.unmount(Path::new("at")),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mount_constraints() {
        let fs = mem_vfs();
        let other = mem_vfs();

        // Absent mount point.
        assert!(matches!(
            fs.mount(Path::new("missing"), File::Dir(other.cwd_dir().unwrap())),
            Err(FsError::NotFound(_))
        ));

        // Kind mismatch: directory attachment onto a regular file.
        write(&fs, "file", b"");
        assert!(matches!(
            fs.mount(Path::new("file"), File::Dir(other.cwd_dir().unwrap())),
            Err(FsError::NotADirectory(_))
        ));
    }
}
