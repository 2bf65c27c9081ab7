//! `io::Error` constructors for the file system error taxonomy
//!
//! Every operation returns `io::Result`. The kinds used are:
//! `NotFound`, `AlreadyExists`, `PermissionDenied`, `DirectoryNotEmpty`,
//! `NotADirectory`, `IsADirectory`, `InvalidInput` (bad option combination
//! or malformed input), `Unsupported`, `StorageFull`, and OS / `Other`
//! errors for everything else.

use std::fmt::Display;
use std::io;

use crate::path::FsPath;

pub fn not_found(path: &FsPath) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("No such file: {}", path))
}

pub fn already_exists(path: &FsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("File already exists: {}", path),
    )
}

pub fn access_denied(path: &FsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("Access denied: {}", path),
    )
}

/// A content handle was used for an access it was not opened with
pub fn not_opened_for(path: &FsPath, access: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{} was not opened for {}", path, access),
    )
}

pub fn directory_not_empty(path: &FsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::DirectoryNotEmpty,
        format!("Directory not empty: {}", path),
    )
}

pub fn not_a_directory(path: &FsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("Not a directory: {}", path),
    )
}

pub fn is_a_directory(path: &FsPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("Is a directory: {}", path),
    )
}

pub fn invalid_argument(message: impl Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

pub fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("Operation not supported: {}", operation),
    )
}

/// The path belongs to a different namespace than the file system it was handed to
pub fn scheme_mismatch(expected: &str, path: &FsPath) -> io::Error {
    invalid_argument(format!(
        "Path {} does not belong to the '{}' file system",
        path, expected
    ))
}

pub fn too_many_links(path: &FsPath) -> io::Error {
    io::Error::other(format!("Too many levels of symbolic links: {}", path))
}
