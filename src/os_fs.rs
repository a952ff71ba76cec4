//! The host-backed filesystem: the same surface as the virtual facade,
//! delegated to `std::fs`, with an optional chroot base that every path is
//! clamped into.

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use log::debug;

use crate::errors::{FsError, Result};
use crate::file::{
    host_space, write_disposition, FileKind, FileStatus, HostCtx, HostDir, Mode, OpenMode,
    PermOptions, SpaceInfo, WriteDisposition,
};
use crate::path::lexically_normal;
use crate::vfs::Vfs;

#[derive(Clone)]
pub(crate) struct HostFs {
    /// Working directory in this filesystem's own namespace: a host path,
    /// or a virtual absolute path when chrooted.
    cwd: PathBuf,
    /// Chroot base on the host; `None` exposes the whole host tree.
    base: Option<PathBuf>,
    temp: Option<PathBuf>,
}

impl HostFs {
    pub fn new() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self { cwd, base: None, temp: None }
    }

    pub fn chrooted(base: PathBuf, temp: Option<PathBuf>) -> Self {
        Self { cwd: PathBuf::from("/"), base: Some(base), temp }
    }

    fn absolute(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }

    /// Maps a caller path to the host path it acts on. Under a chroot the
    /// normalized path is clamped to the base, so no amount of `..` can
    /// escape it.
    pub(crate) fn host_path(&self, p: &Path) -> PathBuf {
        let normal = lexically_normal(&self.absolute(p));
        match &self.base {
            None => normal,
            Some(base) => {
                let mut out = base.clone();
                for c in normal.components() {
                    if let Component::Normal(n) = c {
                        out.push(n);
                    }
                }
                out
            }
        }
    }

    /// Expresses a host path in this filesystem's namespace.
    pub(crate) fn to_virtual(&self, host: &Path) -> PathBuf {
        match &self.base {
            None => host.to_path_buf(),
            Some(base) => match host.strip_prefix(base) {
                Ok(rel) => Path::new("/").join(rel),
                Err(_) => PathBuf::from("/"),
            },
        }
    }

    /// Rebuilds this filesystem as a virtual tree of host-backed nodes,
    /// which is what the first mount on a host filesystem turns it into.
    pub fn into_virtual(&self) -> Result<Vfs> {
        let root_host = self.base.clone().unwrap_or_else(|| PathBuf::from("/"));
        debug!(
            "converting host filesystem rooted at '{}' to a virtual tree",
            root_host.display()
        );

        let root = HostDir::new(HostCtx::new(), root_host);
        let vfs = Vfs::new(std::rc::Rc::new(root), self.temp_directory_path()?);
        vfs.with_current_path(&self.cwd)
    }

    /// The working directory as a host-backed directory object, e.g. for
    /// mounting it into another filesystem.
    pub fn cwd_dir(&self) -> Result<std::rc::Rc<dyn crate::file::Dir>> {
        let host = self.host_path(Path::new("."));
        let meta = fs::metadata(&host).map_err(|e| FsError::io(&host, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(host));
        }
        Ok(std::rc::Rc::new(HostDir::new(HostCtx::new(), host)))
    }

    pub fn open_read(&self, p: &Path, _mode: OpenMode) -> Result<Box<dyn Read>> {
        let host = self.host_path(p);
        let f = fs::File::open(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(Box::new(f))
    }

    pub fn open_write(&self, p: &Path, mode: OpenMode) -> Result<Box<dyn Write>> {
        let host = self.host_path(p);
        let mut opts = fs::OpenOptions::new();
        match write_disposition(mode)? {
            WriteDisposition::Truncate => opts.write(true).truncate(true).create(true),
            WriteDisposition::Append => opts.append(true).create(true),
        };

        let f = opts.open(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(Box::new(f))
    }

    pub fn canonical(&self, p: &Path) -> Result<PathBuf> {
        let host = self.host_path(p);
        let canon = fs::canonicalize(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(self.to_virtual(&canon))
    }

    pub fn weakly_canonical(&self, p: &Path) -> Result<PathBuf> {
        let host = self.host_path(p);

        let mut existing = host.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        while fs::symlink_metadata(&existing).is_err() {
            match existing.file_name() {
                Some(name) => {
                    tail.push(name.to_owned());
                    existing.pop();
                }
                None => break,
            }
        }

        let mut out = match fs::canonicalize(&existing) {
            Ok(canon) => canon,
            Err(_) => return Ok(lexically_normal(&self.absolute(p))),
        };
        for name in tail.iter().rev() {
            out.push(name);
        }
        Ok(lexically_normal(&self.to_virtual(&out)))
    }

    pub fn create_directory(&self, p: &Path, attr: Option<&Path>) -> Result<bool> {
        let host = self.host_path(p);
        match fs::create_dir(&host) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let meta = fs::metadata(&host).map_err(|e| FsError::io(&host, e))?;
                return if meta.is_dir() {
                    Ok(false)
                } else {
                    Err(FsError::AlreadyExists(host))
                };
            }
            Err(e) => return Err(FsError::io(&host, e)),
        }

        if let Some(attr) = attr {
            let attr_host = self.host_path(attr);
            let perms = fs::metadata(&attr_host)
                .map_err(|e| FsError::io(&attr_host, e))?
                .permissions();
            fs::set_permissions(&host, perms).map_err(|e| FsError::io(&host, e))?;
        }
        Ok(true)
    }

    pub fn create_directories(&self, p: &Path) -> Result<bool> {
        let host = self.host_path(p);
        if fs::symlink_metadata(&host).is_ok() {
            return Ok(false);
        }

        fs::create_dir_all(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(true)
    }

    pub fn create_hard_link(&self, target: &Path, link: &Path) -> Result<()> {
        let target_host = self.host_path(target);
        let link_host = self.host_path(link);
        fs::hard_link(&target_host, &link_host).map_err(|e| FsError::io(&link_host, e))
    }

    pub fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        // The target is stored verbatim; only the link location is mapped.
        let link_host = self.host_path(link);
        make_symlink(target, &link_host)
    }

    pub fn current_path(&self) -> PathBuf {
        self.cwd.clone()
    }

    pub fn with_current_path(&self, p: &Path) -> Result<HostFs> {
        let host = self.host_path(p);
        let meta = fs::metadata(&host).map_err(|e| FsError::io(&host, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(host));
        }

        Ok(HostFs {
            cwd: lexically_normal(&self.absolute(p)),
            base: self.base.clone(),
            temp: self.temp.clone(),
        })
    }

    pub fn change_root(&self, p: &Path, temp: &Path) -> Result<HostFs> {
        let host = self.host_path(p);
        let base = fs::canonicalize(&host).map_err(|e| FsError::io(&host, e))?;
        if !base.is_dir() {
            return Err(FsError::NotADirectory(host));
        }

        let temp = (!temp.as_os_str().is_empty()).then(|| temp.to_path_buf());
        Ok(HostFs::chrooted(base, temp))
    }

    pub fn equivalent(&self, p1: &Path, p2: &Path) -> Result<bool> {
        let id1 = follow_id(&self.host_path(p1));
        let id2 = follow_id(&self.host_path(p2));
        match (id1, id2) {
            (Some(a), Some(b)) => Ok(a == b),
            (None, None) => Err(FsError::NotFound(p1.to_path_buf())),
            _ => Ok(false),
        }
    }

    pub fn file_size(&self, p: &Path) -> Result<u64> {
        let host = self.host_path(p);
        let meta = fs::metadata(&host).map_err(|e| FsError::io(&host, e))?;
        if meta.is_dir() {
            return Err(FsError::IsADirectory(host));
        }
        if !meta.is_file() {
            return Err(FsError::InvalidArgument(host));
        }
        Ok(meta.len())
    }

    pub fn hard_link_count(&self, p: &Path) -> Result<u64> {
        let host = self.host_path(p);
        fs::metadata(&host)
            .map(|m| nlink_of(&m))
            .map_err(|e| FsError::io(&host, e))
    }

    pub fn last_write_time(&self, p: &Path) -> Result<SystemTime> {
        let host = self.host_path(p);
        fs::metadata(&host)
            .and_then(|m| m.modified())
            .map_err(|e| FsError::io(&host, e))
    }

    pub fn set_last_write_time(&self, p: &Path, t: SystemTime) -> Result<()> {
        let host = self.host_path(p);
        filetime::set_file_mtime(&host, FileTime::from_system_time(t))
            .map_err(|e| FsError::io(&host, e))
    }

    pub fn permissions(&self, p: &Path, prms: Mode, opts: PermOptions) -> Result<()> {
        let host = self.host_path(p);
        let action = opts & (PermOptions::REPLACE | PermOptions::ADD | PermOptions::REMOVE);

        if opts.contains(PermOptions::NOFOLLOW) {
            let meta = fs::symlink_metadata(&host).map_err(|e| FsError::io(&host, e))?;
            if meta.file_type().is_symlink() {
                // Symlink permissions are cosmetic; nothing to change.
                return Ok(());
            }
        }

        let current = self.status(p)?.permissions();
        let new_mode = if action == PermOptions::REPLACE {
            prms & Mode::MASK
        } else if action == PermOptions::ADD {
            current | (prms & Mode::MASK)
        } else if action == PermOptions::REMOVE {
            current & !(prms & Mode::MASK)
        } else {
            return Err(FsError::InvalidArgument(host));
        };
        set_mode(&host, new_mode)
    }

    pub fn read_symlink(&self, p: &Path) -> Result<PathBuf> {
        let host = self.host_path(p);
        fs::read_link(&host).map_err(|e| FsError::io(&host, e))
    }

    pub fn remove(&self, p: &Path) -> Result<bool> {
        let host = self.host_path(p);
        let meta = match fs::symlink_metadata(&host) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(FsError::io(&host, e)),
        };

        let rst = if meta.is_dir() {
            fs::remove_dir(&host)
        } else {
            fs::remove_file(&host)
        };
        rst.map(|()| true).map_err(|e| FsError::io(&host, e))
    }

    pub fn remove_all(&self, p: &Path) -> Result<u64> {
        let host = self.host_path(p);
        let meta = match fs::symlink_metadata(&host) {
            Ok(m) => m,
            Err(_) => return Ok(0),
        };

        if !meta.is_dir() {
            fs::remove_file(&host).map_err(|e| FsError::io(&host, e))?;
            return Ok(1);
        }

        let cnt = walkdir::WalkDir::new(&host)
            .into_iter()
            .filter_map(|e| e.ok())
            .count() as u64;
        fs::remove_dir_all(&host).map_err(|e| FsError::io(&host, e))?;
        Ok(cnt)
    }

    pub fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        let src_host = self.host_path(src);
        let dst_host = self.host_path(dst);
        fs::rename(&src_host, &dst_host).map_err(|e| FsError::io(&dst_host, e))
    }

    pub fn resize_file(&self, p: &Path, new_size: u64) -> Result<()> {
        let host = self.host_path(p);
        fs::OpenOptions::new()
            .write(true)
            .open(&host)
            .and_then(|f| f.set_len(new_size))
            .map_err(|e| FsError::io(&host, e))
    }

    pub fn space(&self, p: &Path) -> Result<SpaceInfo> {
        host_space(&self.host_path(p))
    }

    pub fn status(&self, p: &Path) -> Result<FileStatus> {
        let host = self.host_path(p);
        match fs::metadata(&host) {
            Ok(meta) => Ok(status_of(&meta, false)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                Ok(FileStatus::not_found())
            }
            Err(e) => Err(FsError::io(&host, e)),
        }
    }

    pub fn symlink_status(&self, p: &Path) -> Result<FileStatus> {
        let host = self.host_path(p);
        match fs::symlink_metadata(&host) {
            Ok(meta) => Ok(status_of(&meta, meta.file_type().is_symlink())),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                Ok(FileStatus::not_found())
            }
            Err(e) => Err(FsError::io(&host, e)),
        }
    }

    pub fn temp_directory_path(&self) -> Result<PathBuf> {
        match &self.temp {
            Some(t) => Ok(t.clone()),
            None => Ok(std::env::temp_dir()),
        }
    }

    pub fn is_empty(&self, p: &Path) -> Result<bool> {
        let host = self.host_path(p);
        let meta = fs::metadata(&host).map_err(|e| FsError::io(&host, e))?;
        if meta.is_dir() {
            let mut rd = fs::read_dir(&host).map_err(|e| FsError::io(&host, e))?;
            Ok(rd.next().is_none())
        } else {
            Ok(meta.len() == 0)
        }
    }
}

fn status_of(meta: &fs::Metadata, symlink: bool) -> FileStatus {
    let kind = if symlink {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Directory
    } else if meta.is_file() {
        FileKind::Regular
    } else {
        FileKind::Unknown
    };
    FileStatus::new(kind, mode_of(meta))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> Mode {
    use std::os::unix::fs::PermissionsExt;
    Mode::from_bits_truncate(meta.permissions().mode())
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> Mode {
    if meta.permissions().readonly() {
        Mode::from_bits_truncate(0o555)
    } else {
        Mode::from_bits_truncate(0o755)
    }
}

#[cfg(unix)]
fn set_mode(p: &Path, mode: Mode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(p, fs::Permissions::from_mode(mode.bits())).map_err(|e| FsError::io(p, e))
}

#[cfg(not(unix))]
fn set_mode(p: &Path, mode: Mode) -> Result<()> {
    let mut perms = fs::metadata(p).map_err(|e| FsError::io(p, e))?.permissions();
    perms.set_readonly(!mode.contains(Mode::OWNER_WRITE));
    fs::set_permissions(p, perms).map_err(|e| FsError::io(p, e))
}

#[cfg(unix)]
fn nlink_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
fn nlink_of(_meta: &fs::Metadata) -> u64 {
    1
}

#[cfg(unix)]
fn follow_id(p: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(p).ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(not(unix))]
fn follow_id(p: &Path) -> Option<(u64, u64)> {
    // Without inode identity the canonical path has to stand in.
    let canon = fs::canonicalize(p).ok()?;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    use std::hash::{Hash, Hasher};
    canon.hash(&mut hasher);
    Some((0, hasher.finish()))
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| FsError::io(link, e))
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, link: &Path) -> Result<()> {
    Err(FsError::InvalidArgument(link.to_path_buf()))
}
