//! File objects backed by host paths. They power the host-backed
//! filesystem once a mount converts it to a virtual tree, and give the
//! cross-filesystem copy a destination surface on the host.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use filetime::FileTime;

use crate::errors::{FsError, Result};
use crate::file::{
    count_subtree, write_disposition, Dir, Emplaced, File, FileId, FileKind, Mode, Node, OpenMode,
    Regular, SpaceInfo, Symlink, UnknownNode, WriteDisposition,
};
use crate::mount::check_mount_kinds;

/// State shared by every host node of one tree: the mount table, keyed by
/// the host path of the mount point. The value is the stack of
/// attachments; the host file itself is the bottom "original".
pub(crate) struct HostCtx {
    mounts: RefCell<HashMap<PathBuf, Vec<File>>>,
}

impl HostCtx {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { mounts: RefCell::new(HashMap::new()) })
    }

    fn attachment(&self, p: &Path) -> Option<File> {
        self.mounts.borrow().get(p).and_then(|stack| stack.last().cloned())
    }
}

/// Builds the model view of the host node at `p`, not following a final
/// symlink. `None` when nothing exists there.
pub(crate) fn file_from_host(ctx: &Rc<HostCtx>, p: PathBuf) -> Result<Option<File>> {
    if let Some(att) = ctx.attachment(&p) {
        return Ok(Some(att));
    }

    let meta = match fs::symlink_metadata(&p) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::io(p, e)),
    };

    let ft = meta.file_type();
    let file = if ft.is_dir() {
        File::Dir(Rc::new(HostDir::new(ctx.clone(), p)))
    } else if ft.is_file() {
        File::Regular(Rc::new(HostRegular::new(p)))
    } else if ft.is_symlink() {
        let target = fs::read_link(&p).map_err(|e| FsError::io(p, e))?;
        File::Symlink(Rc::new(Symlink::new(target)))
    } else {
        File::Unknown(Rc::new(UnknownNode::new(host_mode(&meta))))
    };
    Ok(Some(file))
}

fn host_meta(p: &Path) -> Result<fs::Metadata> {
    fs::symlink_metadata(p).map_err(|e| FsError::io(p, e))
}

#[cfg(unix)]
fn host_mode(meta: &fs::Metadata) -> Mode {
    use std::os::unix::fs::PermissionsExt;
    Mode::from_bits_truncate(meta.permissions().mode())
}

#[cfg(not(unix))]
fn host_mode(meta: &fs::Metadata) -> Mode {
    if meta.permissions().readonly() {
        Mode::from_bits_truncate(0o555)
    } else {
        Mode::from_bits_truncate(0o755)
    }
}

#[cfg(unix)]
fn host_id(p: &Path) -> FileId {
    use std::os::unix::fs::MetadataExt;
    match fs::symlink_metadata(p) {
        Ok(m) => FileId::Host { dev: m.dev(), ino: m.ino() },
        Err(_) => FileId::HostPath(p.to_path_buf()),
    }
}

#[cfg(not(unix))]
fn host_id(p: &Path) -> FileId {
    FileId::HostPath(p.to_path_buf())
}

#[cfg(unix)]
fn host_owner(p: &Path) -> (i64, i64) {
    use std::os::unix::fs::MetadataExt;
    match fs::symlink_metadata(p) {
        Ok(m) => (i64::from(m.uid()), i64::from(m.gid())),
        Err(_) => (0, 0),
    }
}

#[cfg(not(unix))]
fn host_owner(_p: &Path) -> (i64, i64) {
    (0, 0)
}

#[cfg(unix)]
fn host_nlink(p: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    fs::symlink_metadata(p).map(|m| m.nlink()).unwrap_or(1)
}

#[cfg(not(unix))]
fn host_nlink(_p: &Path) -> u64 {
    1
}

#[cfg(unix)]
fn set_host_mode(p: &Path, mode: Mode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(p, fs::Permissions::from_mode(mode.bits())).map_err(|e| FsError::io(p, e))
}

#[cfg(not(unix))]
fn set_host_mode(p: &Path, mode: Mode) -> Result<()> {
    let mut perms = host_meta(p)?.permissions();
    perms.set_readonly(!mode.contains(Mode::OWNER_WRITE));
    fs::set_permissions(p, perms).map_err(|e| FsError::io(p, e))
}

/// Free, total and available bytes of the volume holding `p`.
#[cfg(unix)]
pub(crate) fn host_space(p: &Path) -> Result<SpaceInfo> {
    use std::os::unix::ffi::OsStrExt;

    let c = std::ffi::CString::new(p.as_os_str().as_bytes())
        .map_err(|_| FsError::InvalidArgument(p.to_path_buf()))?;
    let mut s: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c.as_ptr(), &mut s) } != 0 {
        return Err(FsError::io(p, std::io::Error::last_os_error()));
    }

    let frsize = s.f_frsize as u64;
    Ok(SpaceInfo {
        capacity: s.f_blocks as u64 * frsize,
        free: s.f_bfree as u64 * frsize,
        available: s.f_bavail as u64 * frsize,
    })
}

#[cfg(not(unix))]
pub(crate) fn host_space(_p: &Path) -> Result<SpaceInfo> {
    Ok(SpaceInfo::UNBOUNDED)
}

macro_rules! host_node_impl {
    () => {
        fn owner(&self) -> i64 {
            host_owner(&self.path).0
        }

        fn group(&self) -> i64 {
            host_owner(&self.path).1
        }

        fn set_ownership(&self, _owner: i64, _group: i64) {}

        fn mode(&self) -> Mode {
            host_meta(&self.path).map(|m| host_mode(&m)).unwrap_or(Mode::empty())
        }

        fn set_mode(&self, mode: Mode) -> Result<()> {
            set_host_mode(&self.path, mode)
        }

        fn id(&self) -> FileId {
            host_id(&self.path)
        }

        fn nlink(&self) -> u64 {
            host_nlink(&self.path)
        }

        fn link_added(&self) {}

        fn link_removed(&self) {}

        fn space(&self) -> Result<SpaceInfo> {
            host_space(&self.path)
        }

        fn host_path(&self) -> Option<PathBuf> {
            Some(self.path.clone())
        }
    };
}

/// A regular file on the host.
pub(crate) struct HostRegular {
    path: PathBuf,
}

impl HostRegular {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Node for HostRegular {
    host_node_impl!();
}

impl Regular for HostRegular {
    fn size(&self) -> Result<u64> {
        Ok(host_meta(&self.path)?.len())
    }

    fn resize(&self, new_size: u64) -> Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_len(new_size))
            .map_err(|e| FsError::io(&self.path, e))
    }

    fn last_write_time(&self) -> Result<SystemTime> {
        host_meta(&self.path)?
            .modified()
            .map_err(|e| FsError::io(&self.path, e))
    }

    fn set_last_write_time(&self, t: SystemTime) -> Result<()> {
        filetime::set_file_mtime(&self.path, FileTime::from_system_time(t))
            .map_err(|e| FsError::io(&self.path, e))
    }

    fn open_read(&self, _mode: OpenMode) -> Result<Box<dyn Read>> {
        let f = fs::File::open(&self.path).map_err(|e| FsError::io(&self.path, e))?;
        Ok(Box::new(f))
    }

    fn open_write(&self, mode: OpenMode) -> Result<Box<dyn Write>> {
        let mut opts = fs::OpenOptions::new();
        match write_disposition(mode)? {
            WriteDisposition::Truncate => opts.write(true).truncate(true).create(true),
            WriteDisposition::Append => opts.append(true).create(true),
        };

        let f = opts.open(&self.path).map_err(|e| FsError::io(&self.path, e))?;
        Ok(Box::new(f))
    }

    fn copy_content_from(&self, src: &dyn Regular) -> Result<()> {
        let mut reader = src.open_read(OpenMode::BINARY)?;
        let mut writer = self.open_write(OpenMode::TRUNCATE)?;
        std::io::copy(&mut reader, &mut writer).map_err(|e| FsError::io(&self.path, e))?;
        Ok(())
    }
}

/// A directory on the host. Children are minted on demand from host
/// metadata; mounted attachments shadow them through the shared table.
pub(crate) struct HostDir {
    ctx: Rc<HostCtx>,
    path: PathBuf,
}

impl HostDir {
    pub fn new(ctx: Rc<HostCtx>, path: PathBuf) -> Self {
        Self { ctx, path }
    }

    fn child(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Node for HostDir {
    host_node_impl!();
}

impl Dir for HostDir {
    fn len(&self) -> Result<u64> {
        Ok(self.entries()?.len() as u64)
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.next(name)?.is_some())
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        file_from_host(&self.ctx, self.child(name))
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        if let Some(existing) = self.next(name)? {
            return Ok(match existing.as_regular() {
                Some(r) => Emplaced::Existing(r),
                None => Emplaced::Conflict,
            });
        }

        let p = self.child(name);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&p)
            .map_err(|e| FsError::io(&p, e))?;
        Ok(Emplaced::Created(Rc::new(HostRegular::new(p))))
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        if let Some(existing) = self.next(name)? {
            return Ok(match existing.as_dir() {
                Some(d) => Emplaced::Existing(d),
                None => Emplaced::Conflict,
            });
        }

        let p = self.child(name);
        fs::create_dir(&p).map_err(|e| FsError::io(&p, e))?;
        Ok(Emplaced::Created(Rc::new(HostDir::new(self.ctx.clone(), p))))
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        if let Some(existing) = self.next(name)? {
            return Ok(match existing.as_symlink() {
                Some(l) => Emplaced::Existing(l),
                None => Emplaced::Conflict,
            });
        }

        let p = self.child(name);
        make_host_symlink(target, &p)?;
        Ok(Emplaced::Created(Rc::new(Symlink::new(target))))
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        let Some(src) = file.node().host_path() else {
            return Err(FsError::InvalidArgument(self.child(name)));
        };

        let p = self.child(name);
        match fs::hard_link(&src, &p) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(FsError::io(&p, e)),
        }
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        let Some(src) = file.node().host_path() else {
            return Err(FsError::InvalidArgument(self.child(name)));
        };

        let p = self.child(name);
        fs::rename(&src, &p).map_err(|e| FsError::io(&p, e))
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        let p = self.child(name);
        let meta = match fs::symlink_metadata(&p) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(FsError::io(&p, e)),
        };

        let rst = if meta.file_type().is_dir() {
            fs::remove_dir(&p)
        } else {
            fs::remove_file(&p)
        };
        rst.map(|()| true).map_err(|e| FsError::io(&p, e))
    }

    fn erase(&self, name: &str) -> Result<u64> {
        let Some(file) = self.next(name)? else {
            return Ok(0);
        };

        let cnt = count_subtree(&file);
        let p = self.child(name);
        let rst = if matches!(file, File::Dir(_)) {
            fs::remove_dir_all(&p)
        } else {
            fs::remove_file(&p)
        };
        rst.map_err(|e| FsError::io(&p, e))?;
        Ok(cnt)
    }

    fn clear(&self) -> Result<u64> {
        let mut cnt = 0;
        for (name, _) in self.entries()? {
            cnt += self.erase(&name)?;
        }
        Ok(cnt)
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        let rd = fs::read_dir(&self.path).map_err(|e| FsError::io(&self.path, e))?;

        let mut out = Vec::new();
        for item in rd {
            let item = item.map_err(|e| FsError::io(&self.path, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if let Some(file) = file_from_host(&self.ctx, self.child(&name))? {
                out.push((name, file));
            }
        }
        Ok(out)
    }

    fn mount_next(&self, name: &str, file: File) -> Result<()> {
        let p = self.child(name);
        let current = match self.next(name)? {
            Some(f) => f.kind(),
            None => FileKind::NotFound,
        };
        check_mount_kinds(&p, current, file.kind())?;

        self.ctx.mounts.borrow_mut().entry(p).or_default().push(file);
        Ok(())
    }

    fn unmount_next(&self, name: &str) -> Result<()> {
        let p = self.child(name);
        let mut mounts = self.ctx.mounts.borrow_mut();
        let Some(stack) = mounts.get_mut(&p) else {
            return Err(FsError::InvalidArgument(p));
        };

        stack.pop();
        if stack.is_empty() {
            mounts.remove(&p);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn make_host_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| FsError::io(link, e))
}

#[cfg(not(unix))]
fn make_host_symlink(_target: &Path, link: &Path) -> Result<()> {
    Err(FsError::InvalidArgument(link.to_path_buf()))
}
