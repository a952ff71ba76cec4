//! Regular files whose bytes are spilled into host temp files.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use log::{debug, trace};
use rand::distributions::{Alphanumeric, DistString};

use crate::errors::{FsError, Result};
use crate::file::host::host_space;
use crate::file::{
    write_disposition, FileId, Meta, Mode, Node, OpenMode, Regular, SpaceInfo, WriteDisposition,
};

const SPILL_NAME_LEN: usize = 32;

/// A regular file backed by a uniquely named host file under the storage
/// policy's temp directory. The payload is removed when the object drops.
pub(crate) struct SpillRegular {
    meta: Meta,
    sys_path: PathBuf,
}

impl SpillRegular {
    pub fn create(temp_dir: &Path) -> Result<Self> {
        fs::create_dir_all(temp_dir).map_err(|e| FsError::io(temp_dir, e))?;

        loop {
            let name = Alphanumeric.sample_string(&mut rand::thread_rng(), SPILL_NAME_LEN);
            let sys_path = temp_dir.join(name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&sys_path)
            {
                Ok(_) => {
                    debug!("spilled regular file payload to '{}'", sys_path.display());
                    return Ok(Self {
                        meta: Meta::new(Mode::REGULAR_DEFAULT),
                        sys_path,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(FsError::io(sys_path, e)),
            }
        }
    }

    #[cfg(test)]
    pub fn sys_path(&self) -> &Path {
        &self.sys_path
    }
}

impl Drop for SpillRegular {
    fn drop(&mut self) {
        if fs::remove_file(&self.sys_path).is_ok() {
            trace!("removed spilled payload at '{}'", self.sys_path.display());
        }
    }
}

impl Node for SpillRegular {
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

    fn space(&self) -> Result<SpaceInfo> {
        host_space(&self.sys_path)
    }
}

impl Regular for SpillRegular {
    fn size(&self) -> Result<u64> {
        fs::metadata(&self.sys_path)
            .map(|m| m.len())
            .map_err(|e| FsError::io(&self.sys_path, e))
    }

    fn resize(&self, new_size: u64) -> Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .open(&self.sys_path)
            .and_then(|f| f.set_len(new_size))
            .map_err(|e| FsError::io(&self.sys_path, e))
    }

    fn last_write_time(&self) -> Result<SystemTime> {
        fs::metadata(&self.sys_path)
            .and_then(|m| m.modified())
            .map_err(|e| FsError::io(&self.sys_path, e))
    }

    fn set_last_write_time(&self, t: SystemTime) -> Result<()> {
        filetime::set_file_mtime(&self.sys_path, FileTime::from_system_time(t))
            .map_err(|e| FsError::io(&self.sys_path, e))
    }

    fn open_read(&self, _mode: OpenMode) -> Result<Box<dyn Read>> {
        let f = fs::File::open(&self.sys_path).map_err(|e| FsError::io(&self.sys_path, e))?;
        Ok(Box::new(f))
    }

    fn open_write(&self, mode: OpenMode) -> Result<Box<dyn Write>> {
        let mut opts = fs::OpenOptions::new();
        match write_disposition(mode)? {
            WriteDisposition::Truncate => opts.write(true).truncate(true),
            WriteDisposition::Append => opts.append(true),
        };

        let f = opts
            .open(&self.sys_path)
            .map_err(|e| FsError::io(&self.sys_path, e))?;
        Ok(Box::new(f))
    }

    fn copy_content_from(&self, src: &dyn Regular) -> Result<()> {
        let mut reader = src.open_read(OpenMode::BINARY)?;
        let mut writer = self.open_write(OpenMode::TRUNCATE)?;
        std::io::copy(&mut reader, &mut writer).map_err(|e| FsError::io(&self.sys_path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_lifecycle() {
        let temp = tempfile::tempdir().unwrap();
        let f = SpillRegular::create(temp.path()).unwrap();
        let payload = f.sys_path().to_path_buf();

        assert!(payload.exists());
        assert_eq!(SPILL_NAME_LEN, payload.file_name().unwrap().len());

        f.open_write(OpenMode::empty())
            .unwrap()
            .write_all(b"spilled")
            .unwrap();
        assert_eq!(7, f.size().unwrap());

        let mut buf = Vec::new();
        f.open_read(OpenMode::BINARY)
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(b"spilled".to_vec(), buf);

        drop(f);
        assert!(!payload.exists());
    }

    #[test]
    fn test_resize_and_times() {
        let temp = tempfile::tempdir().unwrap();
        let f = SpillRegular::create(temp.path()).unwrap();

        f.resize(16).unwrap();
        assert_eq!(16, f.size().unwrap());

        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        f.set_last_write_time(t).unwrap();
        assert_eq!(t, f.last_write_time().unwrap());
    }
}
