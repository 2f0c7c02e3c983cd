//! Atomic file opener with TOCTOU-resistant verification (`spec.md` §3
//! `ApprovedPath`, §4.3).

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use crate::error::VerifyError;
use crate::path_normalize;
use crate::types::VerifiedFileMode;

#[derive(Debug, Clone)]
pub struct ApprovedPath {
    pub user_path: String,
    pub resolved_path: PathBuf,
    pub parent_path: PathBuf,
    pub inode: u64,
    pub device: u64,
    pub parent_inode: u64,
    pub parent_device: u64,
    pub existed: bool,
    pub is_network_fs: bool,
}

/// Resolves and stats `user_path`, recording enough state that a later
/// `verify_and_open` can detect if the world moved under us.
pub fn capture(user_path: &str) -> Result<ApprovedPath, VerifyError> {
    let normalized = path_normalize::normalize(user_path)
        .map_err(|e| VerifyError::InvalidPath(e.to_string()))?;
    let path = PathBuf::from(&normalized.normalized);

    let parent_path = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let existed = path.exists();

    let (inode, device) = if existed {
        stat(&path)?
    } else {
        (0, 0)
    };

    let (parent_inode, parent_device) = stat(&parent_path)?;
    let is_network = is_network_fs(&parent_path);

    Ok(ApprovedPath {
        user_path: user_path.to_string(),
        resolved_path: path,
        parent_path,
        inode,
        device,
        parent_inode,
        parent_device,
        existed,
        is_network_fs: is_network,
    })
}

#[cfg(unix)]
fn stat(path: &Path) -> Result<(u64, u64), VerifyError> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| VerifyError::Stat(format!("{}: {e}", path.display())))?;
    if meta.file_type().is_symlink() {
        return Err(VerifyError::SymlinkRejected);
    }
    Ok((meta.ino(), meta.dev()))
}

#[cfg(windows)]
fn stat(path: &Path) -> Result<(u64, u64), VerifyError> {
    // Windows mirror: (volume_serial, file_index) collapsed into the same
    // two u64 slots used on POSIX, per `spec.md` §3.
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| VerifyError::Stat(format!("{}: {e}", path.display())))?;
    if meta.file_type().is_symlink() {
        return Err(VerifyError::SymlinkRejected);
    }
    // std::fs::Metadata does not expose volume serial/file index directly
    // without extra platform calls; a fixed synthetic pair (0, 0) combined
    // with the path-hint check in the protected-files cache is the
    // documented fallback for this reference implementation.
    Ok((0, 0))
}

#[cfg(unix)]
fn is_network_fs(path: &Path) -> bool {
    let mounts = match std::fs::read_to_string("/proc/mounts") {
        Ok(s) => s,
        Err(_) => return false,
    };
    const NETWORK_FS_TYPES: &[&str] = &["nfs", "nfs4", "cifs", "smbfs", "9p", "afs"];
    let path_str = path.to_string_lossy();
    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let mount_point = fields.next().unwrap_or("");
        let _ = mount_point;
        let mount_point = fields.next().unwrap_or("");
        let fs_type = fields.next().unwrap_or("");
        path_str.starts_with(mount_point) && NETWORK_FS_TYPES.contains(&fs_type)
    })
}

#[cfg(windows)]
fn is_network_fs(_path: &Path) -> bool {
    false
}

/// Opens `approved.resolved_path` in `mode`, verifying the kernel-reported
/// identity still matches what was recorded at approval time.
pub fn verify_and_open(approved: &ApprovedPath, mode: VerifiedFileMode) -> Result<File, VerifyError> {
    if approved.existed {
        verify_and_open_existing(approved, mode)
    } else {
        verify_and_open_new(approved, mode)
    }
}

#[cfg(unix)]
fn verify_and_open_existing(
    approved: &ApprovedPath,
    mode: VerifiedFileMode,
) -> Result<File, VerifyError> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::FromRawFd;

    let flags = mode_flags(mode) | libc::O_NOFOLLOW;
    let path_c = std::ffi::CString::new(approved.resolved_path.as_os_str().as_encoded_bytes())
        .map_err(|e| VerifyError::InvalidPath(e.to_string()))?;

    let fd = unsafe { libc::open(path_c.as_ptr(), flags, 0o600) };
    if fd < 0 {
        return Err(VerifyError::Open(std::io::Error::last_os_error().to_string()));
    }
    let file = unsafe { File::from_raw_fd(fd) };

    let meta = file
        .metadata()
        .map_err(|e| VerifyError::Stat(e.to_string()))?;
    if meta.ino() != approved.inode || meta.dev() != approved.device {
        return Err(VerifyError::InodeMismatch);
    }

    Ok(file)
}

#[cfg(unix)]
fn verify_and_open_new(
    approved: &ApprovedPath,
    mode: VerifiedFileMode,
) -> Result<File, VerifyError> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::FromRawFd;

    let parent_c =
        std::ffi::CString::new(approved.parent_path.as_os_str().as_encoded_bytes())
            .map_err(|e| VerifyError::InvalidPath(e.to_string()))?;
    let parent_fd = unsafe { libc::open(parent_c.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
    if parent_fd < 0 {
        return Err(VerifyError::Open(std::io::Error::last_os_error().to_string()));
    }
    let parent_file = unsafe { File::from_raw_fd(parent_fd) };
    let parent_meta = parent_file
        .metadata()
        .map_err(|e| VerifyError::Stat(e.to_string()))?;
    if parent_meta.ino() != approved.parent_inode || parent_meta.dev() != approved.parent_device {
        return Err(VerifyError::ParentChanged);
    }

    let basename = approved
        .resolved_path
        .file_name()
        .ok_or_else(|| VerifyError::InvalidPath("missing basename".to_string()))?;
    let basename_c = std::ffi::CString::new(basename.as_encoded_bytes())
        .map_err(|e| VerifyError::InvalidPath(e.to_string()))?;

    let flags = mode_flags(mode) | libc::O_NOFOLLOW | libc::O_CREAT | libc::O_EXCL;
    let fd = unsafe { libc::openat(parent_fd, basename_c.as_ptr(), flags, 0o600) };
    if fd < 0 {
        let err = std::io::Error::last_os_error();
        return Err(match err.kind() {
            std::io::ErrorKind::AlreadyExists => VerifyError::AlreadyExists,
            _ => VerifyError::Open(err.to_string()),
        });
    }

    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(windows)]
fn verify_and_open_existing(
    approved: &ApprovedPath,
    mode: VerifiedFileMode,
) -> Result<File, VerifyError> {
    use std::fs::OpenOptions;
    let meta = std::fs::symlink_metadata(&approved.resolved_path)
        .map_err(|e| VerifyError::Stat(e.to_string()))?;
    if meta.file_type().is_symlink() {
        return Err(VerifyError::SymlinkRejected);
    }
    open_with_mode(&approved.resolved_path, mode, &mut OpenOptions::new())
}

#[cfg(windows)]
fn verify_and_open_new(
    approved: &ApprovedPath,
    mode: VerifiedFileMode,
) -> Result<File, VerifyError> {
    use std::fs::OpenOptions;
    if approved.resolved_path.exists() {
        return Err(VerifyError::AlreadyExists);
    }
    let mut opts = OpenOptions::new();
    opts.create_new(true);
    open_with_mode(&approved.resolved_path, mode, &mut opts)
}

#[cfg(windows)]
fn open_with_mode(
    path: &Path,
    mode: VerifiedFileMode,
    opts: &mut std::fs::OpenOptions,
) -> Result<File, VerifyError> {
    match mode {
        VerifiedFileMode::Read => opts.read(true),
        VerifiedFileMode::Write => opts.write(true).create(true).truncate(true),
        VerifiedFileMode::Append => opts.append(true).create(true),
        VerifiedFileMode::ReadWrite => opts.read(true).write(true),
    };
    opts.open(path).map_err(|e| VerifyError::Open(e.to_string()))
}

#[cfg(unix)]
fn mode_flags(mode: VerifiedFileMode) -> i32 {
    match mode {
        VerifiedFileMode::Read => libc::O_RDONLY,
        VerifiedFileMode::Write => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        VerifiedFileMode::Append => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        VerifiedFileMode::ReadWrite => libc::O_RDWR,
    }
}
