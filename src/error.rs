/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Errors reported by filesystem operations.

use std::io;
use thiserror::Error;

/// An error raised by a filesystem operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The filename exceeds the maximum length.
    #[error("filename is too long")]
    InvalidName,
    /// The filename is not present in the directory.
    #[error("file not found")]
    NotFound,
    /// The inode table is full.
    #[error("no free inode left")]
    OutOfInodes,
    /// The file descriptor table is full.
    #[error("no free file descriptor left")]
    OutOfDescriptors,
    /// The directory has no empty entry left.
    #[error("directory is full")]
    DirectoryFull,
    /// The free bitmap has no free block left.
    #[error("no free block left")]
    OutOfSpace,
    /// A seek target lies outside the bounds of the file.
    #[error("offset is out of bounds")]
    OutOfBounds,
    /// The file has an open descriptor and cannot be removed.
    #[error("file is in use")]
    FileBusy,
    /// The descriptor does not refer to an open file.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// The image's superblock does not carry the filesystem's magic number.
    #[error("invalid filesystem signature")]
    BadMagic,
    /// An operation on the underlying block device failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type of filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;
