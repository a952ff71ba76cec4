//! The copy algorithm. It only drives the public directory surface of the
//! destination, so the same code serves same-tree copies and copies into a
//! different filesystem, host-backed destinations included.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::errors::{FsError, Result};
use crate::file::{CopyOptions, Dir, File, Regular};
use crate::vfs::Vfs;

fn tail(p: &Path) -> Result<String> {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FsError::InvalidArgument(p.to_path_buf()))
}

/// Applies the `copy_file` policy of `opts` for a regular source against
/// the `dst_p.file_name()` slot of `dst_prev`. Returns whether bytes were
/// copied.
pub(crate) fn copy_file_into(
    src: &Rc<dyn Regular>,
    src_p: &Path,
    dst_prev: &Rc<dyn Dir>,
    dst_p: &Path,
    opts: CopyOptions,
) -> Result<bool> {
    let name = tail(dst_p)?;

    let dst = match dst_prev.emplace_regular(&name)? {
        crate::file::Emplaced::Created(dst) => {
            dst.copy_content_from(&**src)?;
            return Ok(true);
        }
        crate::file::Emplaced::Existing(dst) => dst,
        crate::file::Emplaced::Conflict => {
            return Err(FsError::InvalidArgument(dst_p.to_path_buf()))
        }
    };

    if src.id() == dst.id() {
        return Err(FsError::AlreadyExists(dst_p.to_path_buf()));
    }
    if opts.contains(CopyOptions::SKIP_EXISTING) {
        return Ok(false);
    }
    if opts.contains(CopyOptions::OVERWRITE_EXISTING) {
        dst.copy_content_from(&**src)?;
        return Ok(true);
    }
    if opts.contains(CopyOptions::UPDATE_EXISTING) {
        if src.last_write_time()? < dst.last_write_time()? {
            return Ok(false);
        }

        dst.copy_content_from(&**src)?;
        return Ok(true);
    }

    Err(FsError::AlreadyExists(dst_p.to_path_buf()))
}

/// Copies `src` (any kind) into the `dst_p.file_name()` slot of
/// `dst_prev`, honoring every copy option.
pub(crate) fn copy_into(
    src: &File,
    src_p: &Path,
    dst_prev: &Rc<dyn Dir>,
    dst_p: &Path,
    opts: CopyOptions,
) -> Result<()> {
    match src {
        File::Regular(src_r) => {
            if opts.contains(CopyOptions::DIRECTORIES_ONLY) {
                return Ok(());
            }

            let name = tail(dst_p)?;
            if opts.contains(CopyOptions::CREATE_SYMLINKS) {
                return match dst_prev.emplace_symlink(&name, src_p)?.created() {
                    Some(_) => Ok(()),
                    None => Err(FsError::AlreadyExists(dst_p.to_path_buf())),
                };
            }
            if opts.contains(CopyOptions::CREATE_HARD_LINKS) {
                if !dst_prev.link(&name, src.clone())? {
                    return Err(FsError::AlreadyExists(dst_p.to_path_buf()));
                }
                return Ok(());
            }

            // An existing destination directory receives the file under
            // the source's own name.
            if let Some(File::Dir(next_d)) = dst_prev.next(&name)? {
                let file_name = tail(src_p)?;
                copy_file_into(src_r, src_p, &next_d, &dst_p.join(file_name), opts)?;
            } else {
                copy_file_into(src_r, src_p, dst_prev, dst_p, opts)?;
            }
            Ok(())
        }
        File::Symlink(src_l) => {
            if opts.contains(CopyOptions::SKIP_SYMLINKS) {
                return Ok(());
            }
            if !opts.contains(CopyOptions::COPY_SYMLINKS) {
                return Err(FsError::InvalidArgument(src_p.to_path_buf()));
            }

            let name = tail(dst_p)?;
            match dst_prev.emplace_symlink(&name, src_l.target())?.created() {
                Some(_) => Ok(()),
                None => Err(FsError::AlreadyExists(dst_p.to_path_buf())),
            }
        }
        File::Dir(src_d) => {
            if opts.contains(CopyOptions::CREATE_SYMLINKS) {
                return Err(FsError::IsADirectory(src_p.to_path_buf()));
            }
            if !(opts.contains(CopyOptions::RECURSIVE) || opts.is_empty()) {
                return Ok(());
            }

            let name = tail(dst_p)?;
            let Some((dst_d, _)) = dst_prev.emplace_dir(&name)?.get() else {
                return Err(FsError::AlreadyExists(dst_p.to_path_buf()));
            };

            for (child_name, child) in src_d.entries()? {
                match child.kind() {
                    crate::file::FileKind::Symlink
                        if !opts.contains(CopyOptions::COPY_SYMLINKS) =>
                    {
                        continue
                    }
                    crate::file::FileKind::Directory
                        if !opts.contains(CopyOptions::RECURSIVE) =>
                    {
                        continue
                    }
                    _ => {}
                }

                copy_into(
                    &child,
                    &src_p.join(&child_name),
                    &dst_d,
                    &dst_p.join(&child_name),
                    opts,
                )?;
            }
            Ok(())
        }
        File::Unknown(_) => Err(FsError::InvalidArgument(src_p.to_path_buf())),
    }
}

impl Vfs {
    pub fn copy(&self, src: &Path, dst: &Path, opts: CopyOptions) -> Result<()> {
        let src_entry = self.navigate(src)?;
        let (prev, _, dst_p) = self.dst_parent(dst)?;
        copy_into(src_entry.file(), &src_entry.path(), &prev.dir()?, &dst_p, opts)
    }

    pub fn copy_file(&self, src: &Path, dst: &Path, opts: CopyOptions) -> Result<bool> {
        let src_entry = self.navigate(src)?.follow_chain()?;
        let File::Regular(src_r) = src_entry.file() else {
            return Err(FsError::InvalidArgument(src_entry.path()));
        };

        let (prev, _, dst_p) = self.dst_parent(dst)?;
        copy_file_into(src_r, &src_entry.path(), &prev.dir()?, &dst_p, opts)
    }
}
