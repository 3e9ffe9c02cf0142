// User-visible filesystem errors.
//
// These are the only errors an operation may return, and only before it has
// logged its first block. Anything that goes wrong after that point is a
// broken invariant and panics instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("Operation not permitted on this kind of inode.")]
    NotPermitted,
    #[error("No such file or directory.")]
    NotFound,
    #[error("An entry with that name already exists.")]
    AlreadyExists,
    #[error("A path component that should be a directory is not one.")]
    NotADirectory,
    #[error("Tried to do file things to a directory.")]
    IsADirectory,
    #[error("Filenames cannot be longer than 14 bytes.")]
    NameTooLong,
    #[error("The directory still has entries in it.")]
    NotEmpty,
}
