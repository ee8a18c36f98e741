// SPDX-License-Identifier: Apache-2.0

//! Handle identity.
//!
//! Fingerprints say whether two files hold the same content; the handle
//! identity says whether a path still points at the same on-disk object. The
//! reconciler needs both to tell copy-truncate rotation (same object, new
//! content) apart from create-after-rename (new object at the old path).

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;

/// OS identity of an open file: device + inode on unix, volume serial +
/// file index on windows. Survives renames, not re-creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    device: u64,
    index: u64,
}

impl FileId {
    pub fn new(device: u64, index: u64) -> Self {
        Self { device, index }
    }

    /// Identity of the object behind `file`.
    pub fn from_file(file: &File) -> io::Result<Self> {
        let (device, index) = os_identity(file)?;
        Ok(Self { device, index })
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device, self.index)
    }
}

#[cfg(unix)]
fn os_identity(file: &File) -> io::Result<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;

    let meta = file.metadata()?;
    Ok((meta.dev(), meta.ino()))
}

#[cfg(windows)]
fn os_identity(file: &File) -> io::Result<(u64, u64)> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
    };

    let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
    if unsafe { GetFileInformationByHandle(file.as_raw_handle() as HANDLE, &mut info) } == 0 {
        return Err(io::Error::last_os_error());
    }

    let index = (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow);
    Ok((u64::from(info.dwVolumeSerialNumber), index))
}

#[cfg(not(any(unix, windows)))]
fn os_identity(_file: &File) -> io::Result<(u64, u64)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file identity is not available on this platform",
    ))
}
