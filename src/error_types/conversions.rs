// Mapping between FsError and the C error values the rest of a kernel (or a
// FUSE shim) would speak.

use libc::c_int;

use crate::error_types::fs::FsError;

// Errors gleamed from
// https://man7.org/linux/man-pages/man3/errno.3.html

/// You can't do that. Not a permissions system, just physics.
const NOT_PERMITTED: c_int = libc::EPERM;
/// Access denied / file does not exist.
const NO_SUCH_ITEM: c_int = libc::ENOENT;
/// This seat's taken.
const ITEM_ALREADY_EXISTS: c_int = libc::EEXIST;
/// Tried to do directory stuff to a file.
const NOT_A_DIRECTORY: c_int = libc::ENOTDIR;
/// Tried to do file stuff to a directory.
const IS_A_DIRECTORY: c_int = libc::EISDIR;
/// Bro thinks he's Shakespeare.
const FILE_NAME_TOO_LONG: c_int = libc::ENAMETOOLONG;
/// Tried to remove a directory that still has stuff in it.
const DIRECTORY_NOT_EMPTY: c_int = libc::ENOTEMPTY;

impl From<FsError> for c_int {
    fn from(value: FsError) -> Self {
        match value {
            FsError::NotPermitted => NOT_PERMITTED,
            FsError::NotFound => NO_SUCH_ITEM,
            FsError::AlreadyExists => ITEM_ALREADY_EXISTS,
            FsError::NotADirectory => NOT_A_DIRECTORY,
            FsError::IsADirectory => IS_A_DIRECTORY,
            FsError::NameTooLong => FILE_NAME_TOO_LONG,
            FsError::NotEmpty => DIRECTORY_NOT_EMPTY,
        }
    }
}

impl FsError {
    /// The syscall convention: errors travel as negative errno values.
    pub fn errno(self) -> c_int {
        -c_int::from(self)
    }
}
