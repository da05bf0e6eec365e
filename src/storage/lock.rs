//! Single-process guard for a store root.
//!
//! Index, snapshot and queue writes are plain read-modify-write cycles with
//! no coordination between processes. Holding a [`StoreLock`] for the
//! lifetime of a [`crate::Store`] turns a second opener into an immediate
//! `StorageError::Locked` instead of silently interleaved writes.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on `<root>/.lock`, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Takes the lock without blocking.
    ///
    /// # Errors
    /// - `StorageError::Locked` if another process holds it
    /// - `StorageError::Io` if the lock file cannot be opened
    pub fn acquire(root: &Path) -> Result<Self, StorageError> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        match try_lock_exclusive(&file) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "store lock acquired");
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(StorageError::Locked {
                path: root.to_path_buf(),
            }),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays open for the duration of the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Err(IoError::new(ErrorKind::WouldBlock, "store root is locked"));
    }
    Err(err)
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: the handle stays open and `overlapped` outlives the call.
    let ok = unsafe {
        let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok == 0 {
        return Err(IoError::new(ErrorKind::WouldBlock, "store root is locked"));
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn try_lock_exclusive(_file: &File) -> IoResult<()> {
    tracing::warn!("file locking is not supported on this platform; store root is unguarded");
    Ok(())
}
