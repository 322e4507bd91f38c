//! The filesystem sink driven by the unpacker.

use crate::newc;

/// The type of a filesystem object or archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Block device.
    BlockDevice,
    /// Character device.
    CharDevice,
    /// Named pipe.
    Fifo,
    /// Socket.
    Socket,
    /// Anything else.
    Other,
}

impl FileKind {
    /// Classify a mode by its file-type bits.
    pub fn from_mode(mode: u32) -> FileKind {
        match mode & newc::S_IFMT {
            newc::S_IFREG => FileKind::Regular,
            newc::S_IFDIR => FileKind::Directory,
            newc::S_IFLNK => FileKind::Symlink,
            newc::S_IFBLK => FileKind::BlockDevice,
            newc::S_IFCHR => FileKind::CharDevice,
            newc::S_IFIFO => FileKind::Fifo,
            newc::S_IFSOCK => FileKind::Socket,
            _ => FileKind::Other,
        }
    }
}

/// Where unpacked entries are materialized.
///
/// The unpacker drives a sink the way the kernel populates its root
/// filesystem during boot: operations fail individually, and nearly every
/// failure demotes the affected entry to a warning instead of aborting the
/// archive. Errors are therefore a bare `Err(())`; diagnostics are the
/// implementation's business.
///
/// Entry names are raw bytes. Device numbers arrive as raw major/minor
/// pairs; encoding them for the platform is the sink's job.
pub trait Sink {
    /// Handle for a regular file opened by [`Sink::create_file`].
    type File;

    /// Return the type of an existing object, or `None` if there is none.
    /// Symbolic links are not followed.
    fn file_type(&mut self, path: &[u8]) -> Option<FileKind>;

    /// Remove a non-directory object.
    fn unlink(&mut self, path: &[u8]) -> Result<(), ()>;

    /// Remove an empty directory.
    fn remove_dir(&mut self, path: &[u8]) -> Result<(), ()>;

    /// Create a directory.
    fn create_dir(&mut self, path: &[u8], mode: u32) -> Result<(), ()>;

    /// Create or open a regular file for writing, truncating on request.
    fn create_file(&mut self, path: &[u8], mode: u32, truncate: bool) -> Result<Self::File, ()>;

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(&mut self, file: &mut Self::File, offset: u64, data: &[u8]) -> Result<usize, ()>;

    /// Set the owner of an open file.
    fn set_file_owner(&mut self, file: &mut Self::File, uid: u32, gid: u32) -> Result<(), ()>;

    /// Set the permission bits of an open file.
    fn set_file_mode(&mut self, file: &mut Self::File, mode: u32) -> Result<(), ()>;

    /// Set the length of an open file.
    fn set_file_len(&mut self, file: &mut Self::File, len: u64) -> Result<(), ()>;

    /// Set the modification (and access) time of an open file.
    fn set_file_mtime(&mut self, file: &mut Self::File, mtime: u64) -> Result<(), ()>;

    /// Close an open file.
    fn close(&mut self, file: Self::File);

    /// Create a hard link at `path` to the object at `existing`.
    fn hard_link(&mut self, existing: &[u8], path: &[u8]) -> Result<(), ()>;

    /// Create a symbolic link at `path` pointing to `target`.
    fn symlink(&mut self, target: &[u8], path: &[u8]) -> Result<(), ()>;

    /// Create a device, fifo, or socket node. The mode carries the type
    /// bits.
    fn make_node(
        &mut self,
        path: &[u8],
        mode: u32,
        rdev_major: u32,
        rdev_minor: u32,
    ) -> Result<(), ()>;

    /// Set the owner of an object by path, optionally without following a
    /// symbolic link.
    fn set_owner(&mut self, path: &[u8], uid: u32, gid: u32, follow: bool) -> Result<(), ()>;

    /// Set the permission bits of an object by path.
    fn set_mode(&mut self, path: &[u8], mode: u32) -> Result<(), ()>;

    /// Set the modification (and access) time of an object by path,
    /// optionally without following a symbolic link.
    fn set_mtime(&mut self, path: &[u8], mtime: u64, follow: bool) -> Result<(), ()>;
}

impl<'a, S: Sink> Sink for &'a mut S {
    type File = S::File;

    #[inline]
    fn file_type(&mut self, path: &[u8]) -> Option<FileKind> {
        (**self).file_type(path)
    }

    #[inline]
    fn unlink(&mut self, path: &[u8]) -> Result<(), ()> {
        (**self).unlink(path)
    }

    #[inline]
    fn remove_dir(&mut self, path: &[u8]) -> Result<(), ()> {
        (**self).remove_dir(path)
    }

    #[inline]
    fn create_dir(&mut self, path: &[u8], mode: u32) -> Result<(), ()> {
        (**self).create_dir(path, mode)
    }

    #[inline]
    fn create_file(&mut self, path: &[u8], mode: u32, truncate: bool) -> Result<Self::File, ()> {
        (**self).create_file(path, mode, truncate)
    }

    #[inline]
    fn write(&mut self, file: &mut Self::File, offset: u64, data: &[u8]) -> Result<usize, ()> {
        (**self).write(file, offset, data)
    }

    #[inline]
    fn set_file_owner(&mut self, file: &mut Self::File, uid: u32, gid: u32) -> Result<(), ()> {
        (**self).set_file_owner(file, uid, gid)
    }

    #[inline]
    fn set_file_mode(&mut self, file: &mut Self::File, mode: u32) -> Result<(), ()> {
        (**self).set_file_mode(file, mode)
    }

    #[inline]
    fn set_file_len(&mut self, file: &mut Self::File, len: u64) -> Result<(), ()> {
        (**self).set_file_len(file, len)
    }

    #[inline]
    fn set_file_mtime(&mut self, file: &mut Self::File, mtime: u64) -> Result<(), ()> {
        (**self).set_file_mtime(file, mtime)
    }

    #[inline]
    fn close(&mut self, file: Self::File) {
        (**self).close(file)
    }

    #[inline]
    fn hard_link(&mut self, existing: &[u8], path: &[u8]) -> Result<(), ()> {
        (**self).hard_link(existing, path)
    }

    #[inline]
    fn symlink(&mut self, target: &[u8], path: &[u8]) -> Result<(), ()> {
        (**self).symlink(target, path)
    }

    #[inline]
    fn make_node(
        &mut self,
        path: &[u8],
        mode: u32,
        rdev_major: u32,
        rdev_minor: u32,
    ) -> Result<(), ()> {
        (**self).make_node(path, mode, rdev_major, rdev_minor)
    }

    #[inline]
    fn set_owner(&mut self, path: &[u8], uid: u32, gid: u32, follow: bool) -> Result<(), ()> {
        (**self).set_owner(path, uid, gid, follow)
    }

    #[inline]
    fn set_mode(&mut self, path: &[u8], mode: u32) -> Result<(), ()> {
        (**self).set_mode(path, mode)
    }

    #[inline]
    fn set_mtime(&mut self, path: &[u8], mtime: u64, follow: bool) -> Result<(), ()> {
        (**self).set_mtime(path, mtime, follow)
    }
}

#[cfg(all(feature = "std", unix))]
mod local {
    use super::{FileKind, Sink};
    use std::ffi::{CString, OsStr};
    use std::fs;
    use std::io::ErrorKind;
    use std::os::unix::ffi::{OsStrExt, OsStringExt};
    use std::os::unix::fs as unix_fs;
    use std::os::unix::fs::{DirBuilderExt, FileExt, FileTypeExt, OpenOptionsExt, PermissionsExt};
    use std::path::{Component, Path, PathBuf};
    use std::time::{Duration, SystemTime};

    /// A sink writing into a directory on the local filesystem.
    ///
    /// Entry names are interpreted relative to the root; leading slashes
    /// are stripped and names containing `..` components are refused, so
    /// an archive cannot climb out of the root directory.
    #[derive(Debug)]
    pub struct LocalFs {
        root: PathBuf,
    }

    impl LocalFs {
        /// Create a sink rooted at `root`, creating the directory if it
        /// does not exist.
        pub fn new<P: AsRef<Path>>(root: P) -> std::io::Result<LocalFs> {
            fs::create_dir_all(&root)?;
            Ok(LocalFs {
                root: root.as_ref().to_path_buf(),
            })
        }

        fn resolve(&self, path: &[u8]) -> Option<PathBuf> {
            let mut stripped = path;
            while let [b'/', rest @ ..] = stripped {
                stripped = rest;
            }
            let rel = Path::new(OsStr::from_bytes(stripped));
            if rel.components().any(|c| matches!(c, Component::ParentDir)) {
                return None;
            }
            Some(self.root.join(rel))
        }

        fn c_path(&self, path: &[u8]) -> Option<CString> {
            CString::new(self.resolve(path)?.into_os_string().into_vec()).ok()
        }
    }

    impl Sink for LocalFs {
        type File = fs::File;

        fn file_type(&mut self, path: &[u8]) -> Option<FileKind> {
            let meta = fs::symlink_metadata(self.resolve(path)?).ok()?;
            let ft = meta.file_type();
            Some(if ft.is_dir() {
                FileKind::Directory
            } else if ft.is_file() {
                FileKind::Regular
            } else if ft.is_symlink() {
                FileKind::Symlink
            } else if ft.is_block_device() {
                FileKind::BlockDevice
            } else if ft.is_char_device() {
                FileKind::CharDevice
            } else if ft.is_fifo() {
                FileKind::Fifo
            } else if ft.is_socket() {
                FileKind::Socket
            } else {
                FileKind::Other
            })
        }

        fn unlink(&mut self, path: &[u8]) -> Result<(), ()> {
            fs::remove_file(self.resolve(path).ok_or(())?).map_err(drop)
        }

        fn remove_dir(&mut self, path: &[u8]) -> Result<(), ()> {
            fs::remove_dir(self.resolve(path).ok_or(())?).map_err(drop)
        }

        fn create_dir(&mut self, path: &[u8], mode: u32) -> Result<(), ()> {
            fs::DirBuilder::new()
                .mode(mode & 0o7777)
                .create(self.resolve(path).ok_or(())?)
                .map_err(drop)
        }

        fn create_file(
            &mut self,
            path: &[u8],
            mode: u32,
            truncate: bool,
        ) -> Result<Self::File, ()> {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).mode(mode & 0o7777);
            if truncate {
                options.truncate(true);
            }
            options.open(self.resolve(path).ok_or(())?).map_err(drop)
        }

        fn write(&mut self, file: &mut Self::File, offset: u64, data: &[u8]) -> Result<usize, ()> {
            // The write is restarted on interruption and on partial
            // progress; a short return only happens on a hard error.
            let mut written = 0;
            while written < data.len() {
                match file.write_at(&data[written..], offset + written as u64) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e)
                        if e.kind() == ErrorKind::Interrupted
                            || e.kind() == ErrorKind::WouldBlock =>
                    {
                        continue
                    }
                    Err(_) => {
                        if written == 0 {
                            return Err(());
                        }
                        break;
                    }
                }
            }
            Ok(written)
        }

        fn set_file_owner(&mut self, file: &mut Self::File, uid: u32, gid: u32) -> Result<(), ()> {
            unix_fs::fchown(&*file, Some(uid), Some(gid)).map_err(drop)
        }

        fn set_file_mode(&mut self, file: &mut Self::File, mode: u32) -> Result<(), ()> {
            file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
                .map_err(drop)
        }

        fn set_file_len(&mut self, file: &mut Self::File, len: u64) -> Result<(), ()> {
            file.set_len(len).map_err(drop)
        }

        fn set_file_mtime(&mut self, file: &mut Self::File, mtime: u64) -> Result<(), ()> {
            let t = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime);
            file.set_times(fs::FileTimes::new().set_accessed(t).set_modified(t))
                .map_err(drop)
        }

        fn close(&mut self, file: Self::File) {
            drop(file);
        }

        fn hard_link(&mut self, existing: &[u8], path: &[u8]) -> Result<(), ()> {
            fs::hard_link(
                self.resolve(existing).ok_or(())?,
                self.resolve(path).ok_or(())?,
            )
            .map_err(drop)
        }

        fn symlink(&mut self, target: &[u8], path: &[u8]) -> Result<(), ()> {
            // The target is the link's content, not a location on disk; it
            // is stored verbatim.
            unix_fs::symlink(OsStr::from_bytes(target), self.resolve(path).ok_or(())?)
                .map_err(drop)
        }

        fn make_node(
            &mut self,
            path: &[u8],
            mode: u32,
            rdev_major: u32,
            rdev_minor: u32,
        ) -> Result<(), ()> {
            let path = self.c_path(path).ok_or(())?;
            let dev = libc::makedev(rdev_major, rdev_minor);
            let res = unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, dev) };
            if res == 0 {
                Ok(())
            } else {
                Err(())
            }
        }

        fn set_owner(&mut self, path: &[u8], uid: u32, gid: u32, follow: bool) -> Result<(), ()> {
            let path = self.resolve(path).ok_or(())?;
            if follow {
                unix_fs::chown(path, Some(uid), Some(gid)).map_err(drop)
            } else {
                unix_fs::lchown(path, Some(uid), Some(gid)).map_err(drop)
            }
        }

        fn set_mode(&mut self, path: &[u8], mode: u32) -> Result<(), ()> {
            fs::set_permissions(
                self.resolve(path).ok_or(())?,
                fs::Permissions::from_mode(mode & 0o7777),
            )
            .map_err(drop)
        }

        fn set_mtime(&mut self, path: &[u8], mtime: u64, follow: bool) -> Result<(), ()> {
            let path = self.c_path(path).ok_or(())?;
            let t = libc::timespec {
                tv_sec: mtime as libc::time_t,
                tv_nsec: 0,
            };
            let times = [t, t];
            let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
            let res =
                unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), flags) };
            if res == 0 {
                Ok(())
            } else {
                Err(())
            }
        }
    }
}

#[cfg(all(feature = "std", unix))]
pub use local::LocalFs;
