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

//! A simple filesystem stored in a single flat image of fixed-size blocks.
//!
//! The filesystem has one flat directory of byte-addressable files. Each
//! file is described by an inode with twelve direct block pointers and one
//! single-indirect pointer. Free blocks are tracked by a bitmap; the layout
//! on disk is the superblock, the bitmap, the inode table, then the data
//! region.
//!
//! The whole filesystem is a single owned value: format or remount an image
//! with [`mksfs`], then drive it through the methods of
//! [`SimpleFileSystem`]. One process, one mount, no concurrency.

pub mod bitmap;
pub mod directory;
pub mod disk;
pub mod error;
pub mod fs;
pub mod inode;
pub mod superblock;
pub mod util;

pub use error::Error;
pub use error::Result;
pub use fs::DEFAULT_BLOCK_COUNT;
pub use fs::DEFAULT_BLOCK_SIZE;
pub use fs::DEFAULT_INODE_COUNT;
pub use fs::SfsFactory;
pub use fs::SimpleFileSystem;
pub use fs::mksfs;
