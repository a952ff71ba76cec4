//! Purely in-memory file objects.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::SystemTime;

use crate::errors::{FsError, Result};
use crate::file::{
    write_disposition, Dir, Emplaced, File, FileId, FileKind, Meta, Mode, Node, OpenMode, Regular,
    Symlink, WriteDisposition,
};
use crate::mount::check_mount_kinds;
use crate::storage::Storage;

/// A regular file whose bytes live in a shared buffer. Content copies
/// between in-memory files share the buffer copy-on-write.
pub(crate) struct MemRegular {
    meta: Meta,
    inner: Rc<MemBytes>,
}

struct MemBytes {
    data: RefCell<Rc<Vec<u8>>>,
    mtime: Cell<SystemTime>,
}

impl MemBytes {
    fn touch(&self) {
        self.mtime.set(SystemTime::now());
    }
}

impl MemRegular {
    pub fn new() -> Self {
        Self {
            meta: Meta::new(Mode::REGULAR_DEFAULT),
            inner: Rc::new(MemBytes {
                data: RefCell::new(Rc::new(Vec::new())),
                mtime: Cell::new(SystemTime::now()),
            }),
        }
    }
}

impl Node for MemRegular {
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

impl Regular for MemRegular {
    fn size(&self) -> Result<u64> {
        Ok(self.inner.data.borrow().len() as u64)
    }

    fn resize(&self, new_size: u64) -> Result<()> {
        let mut data = self.inner.data.borrow_mut();
        Rc::make_mut(&mut data).resize(new_size as usize, 0);
        Ok(())
    }

    fn last_write_time(&self) -> Result<SystemTime> {
        Ok(self.inner.mtime.get())
    }

    fn set_last_write_time(&self, t: SystemTime) -> Result<()> {
        self.inner.mtime.set(t);
        Ok(())
    }

    fn open_read(&self, _mode: OpenMode) -> Result<Box<dyn Read>> {
        let snapshot = self.inner.data.borrow().clone();
        Ok(Box::new(io::Cursor::new(ByteBuf(snapshot))))
    }

    fn open_write(&self, mode: OpenMode) -> Result<Box<dyn Write>> {
        let disposition = write_disposition(mode)?;
        Ok(Box::new(MemWriter {
            buf: Vec::new(),
            dest: Rc::downgrade(&self.inner),
            disposition,
        }))
    }

    fn copy_content_from(&self, src: &dyn Regular) -> Result<()> {
        match src.shared_bytes() {
            Some(buf) => *self.inner.data.borrow_mut() = buf,
            None => {
                let mut buf = Vec::new();
                src.open_read(OpenMode::BINARY)?
                    .read_to_end(&mut buf)
                    .map_err(|e| FsError::io(PathBuf::new(), e))?;
                *self.inner.data.borrow_mut() = Rc::new(buf);
            }
        }
        self.inner.touch();
        Ok(())
    }

    fn shared_bytes(&self) -> Option<Rc<Vec<u8>>> {
        Some(self.inner.data.borrow().clone())
    }
}

struct ByteBuf(Rc<Vec<u8>>);

impl AsRef<[u8]> for ByteBuf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Accumulates writes privately and installs them into the file when
/// dropped. A file destroyed before then discards the pending write.
struct MemWriter {
    buf: Vec<u8>,
    dest: Weak<MemBytes>,
    disposition: WriteDisposition,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        let Some(dest) = self.dest.upgrade() else {
            return;
        };

        match self.disposition {
            WriteDisposition::Truncate => {
                *dest.data.borrow_mut() = Rc::new(std::mem::take(&mut self.buf));
            }
            WriteDisposition::Append => {
                let mut data = dest.data.borrow_mut();
                Rc::make_mut(&mut data).extend_from_slice(&self.buf);
            }
        }
        dest.touch();
    }
}

/// The in-memory directory. Both storage policies use it; the policy only
/// decides how the regular files it emplaces are backed.
pub(crate) struct MemDir {
    meta: Meta,
    storage: Rc<dyn Storage>,
    children: RefCell<HashMap<String, File>>,
    mounts: RefCell<HashMap<String, Vec<File>>>,
}

impl MemDir {
    pub fn new(storage: Rc<dyn Storage>) -> Self {
        Self::with_mode(storage, Mode::DIR_DEFAULT)
    }

    pub fn with_mode(storage: Rc<dyn Storage>, mode: Mode) -> Self {
        Self {
            meta: Meta::new(mode),
            storage,
            children: RefCell::new(HashMap::new()),
            mounts: RefCell::new(HashMap::new()),
        }
    }
}

/// Drops the name's hold on `file`, recursing into directories that just
/// lost their last name. Returns the number of files that went away.
fn release(file: &File) -> u64 {
    file.node().link_removed();
    let mut cnt = 1;
    if let File::Dir(d) = file {
        if d.nlink() == 0 {
            for (_, child) in d.entries().unwrap_or_default() {
                cnt += release(&child);
            }
        }
    }
    cnt
}

impl Node for MemDir {
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

impl Dir for MemDir {
    fn len(&self) -> Result<u64> {
        Ok(self.children.borrow().len() as u64)
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.children.borrow().is_empty())
    }

    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.children.borrow().contains_key(name))
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        Ok(self.children.borrow().get(name).cloned())
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        if let Some(existing) = self.children.borrow().get(name) {
            return Ok(match existing.as_regular() {
                Some(r) => Emplaced::Existing(r),
                None => Emplaced::Conflict,
            });
        }

        let file = self.storage.make_regular()?;
        file.link_added();
        self.children
            .borrow_mut()
            .insert(name.to_owned(), File::Regular(file.clone()));
        Ok(Emplaced::Created(file))
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        if let Some(existing) = self.children.borrow().get(name) {
            return Ok(match existing.as_dir() {
                Some(d) => Emplaced::Existing(d),
                None => Emplaced::Conflict,
            });
        }

        let dir = self.storage.make_dir();
        dir.link_added();
        self.children
            .borrow_mut()
            .insert(name.to_owned(), File::Dir(dir.clone()));
        Ok(Emplaced::Created(dir))
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        if let Some(existing) = self.children.borrow().get(name) {
            return Ok(match existing.as_symlink() {
                Some(l) => Emplaced::Existing(l),
                None => Emplaced::Conflict,
            });
        }

        let link = self.storage.make_symlink(target);
        link.link_added();
        self.children
            .borrow_mut()
            .insert(name.to_owned(), File::Symlink(link.clone()));
        Ok(Emplaced::Created(link))
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        let mut children = self.children.borrow_mut();
        if children.contains_key(name) {
            return Ok(false);
        }

        file.node().link_added();
        children.insert(name.to_owned(), file);
        Ok(true)
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        file.node().link_added();
        if let Some(old) = self.children.borrow_mut().insert(name.to_owned(), file) {
            old.node().link_removed();
        }
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        match self.children.borrow_mut().remove(name) {
            Some(old) => {
                old.node().link_removed();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn erase(&self, name: &str) -> Result<u64> {
        match self.children.borrow_mut().remove(name) {
            Some(old) => Ok(release(&old)),
            None => Ok(0),
        }
    }

    fn clear(&self) -> Result<u64> {
        let drained: Vec<File> = self.children.borrow_mut().drain().map(|(_, f)| f).collect();
        Ok(drained.iter().map(release).sum())
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        Ok(self
            .children
            .borrow()
            .iter()
            .map(|(name, file)| (name.clone(), file.clone()))
            .collect())
    }

    fn mount_next(&self, name: &str, file: File) -> Result<()> {
        let current = self.next(name)?.map(|f| f.kind()).unwrap_or(FileKind::NotFound);
        check_mount_kinds(Path::new(name), current, file.kind())?;

        let original = self.children.borrow().get(name).cloned();
        if let Some(original) = original {
            self.mounts
                .borrow_mut()
                .entry(name.to_owned())
                .or_default()
                .push(original);
        }

        // The replaced original stays alive on the mount stack and takes
        // its name back on unmount.
        file.node().link_added();
        self.children.borrow_mut().insert(name.to_owned(), file);
        Ok(())
    }

    fn unmount_next(&self, name: &str) -> Result<()> {
        let mut mounts = self.mounts.borrow_mut();
        let Some(original) = mounts.get_mut(name).and_then(|stack| stack.pop()) else {
            return Err(FsError::InvalidArgument(PathBuf::from(name)));
        };
        if mounts.get(name).is_some_and(|stack| stack.is_empty()) {
            mounts.remove(name);
        }

        if let Some(att) = self.children.borrow_mut().insert(name.to_owned(), original) {
            att.node().link_removed();
        }
        Ok(())
    }
}
