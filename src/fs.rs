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

//! The filesystem engine.
//!
//! A [`SimpleFileSystem`] value owns the block device together with the four
//! cached metadata structures (superblock, free bitmap, inode table, root
//! directory) and the in-memory file descriptor table. Every call that
//! mutates persistent state ends by flushing the caches it modified.
//!
//! Files are byte-addressable. A file's content lives in data blocks reached
//! through the inode's twelve direct pointers, then through a single
//! indirection block once the file outgrows them.

use crate::bitmap::FreeBitmap;
use crate::directory::DIR_ENTRY_SIZE;
use crate::directory::Directory;
use crate::directory::MAX_FILENAME;
use crate::disk::Disk;
use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeTable;
use crate::inode::NUM_DIRECT;
use crate::superblock::SFS_MAGIC;
use crate::superblock::Superblock;
use crate::util::ceil_division;
use crate::util::reinterpret;
use crate::util::reinterpret_slice;
use crate::util::reinterpret_slice_mut;
use log::debug;
use std::io;
use std::mem::size_of;
use std::path::Path;

/// The default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024;
/// The default number of blocks on the device.
pub const DEFAULT_BLOCK_COUNT: u64 = 1024;
/// The default number of inodes in the inode table.
pub const DEFAULT_INODE_COUNT: u64 = 100;

/// A file descriptor table entry.
///
/// The entry is empty when `inode` is `0`: inode `0` belongs to the root
/// directory, which is never opened through the descriptor table.
#[derive(Clone, Copy, Default)]
struct FileDescriptor {
    /// The index of the open file's inode. `0` marks an empty slot.
    inode: u32,
    /// The byte offset at which the next read or write begins.
    rwptr: u64,
}

/// A factory to create a filesystem on a device image.
///
/// Unset fields fall back to the defaults.
#[derive(Default)]
pub struct SfsFactory {
    /// The size of a block in bytes.
    pub block_size: Option<u64>,
    /// The number of blocks on the device.
    pub block_count: Option<u64>,
    /// The number of inodes in the inode table.
    pub inode_count: Option<u64>,
}

impl SfsFactory {
    /// Tells whether a filesystem is present on the image at `path`.
    pub fn is_present(&self, path: &Path) -> io::Result<bool> {
        Ok(Superblock::probe(path)?.magic == SFS_MAGIC)
    }

    /// Formats a fresh filesystem on a new image at `path` and returns it,
    /// mounted.
    pub fn create(&self, path: &Path) -> Result<SimpleFileSystem> {
        let block_size = self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
        let block_count = self.block_count.unwrap_or(DEFAULT_BLOCK_COUNT);
        let inode_count = self.inode_count.unwrap_or(DEFAULT_INODE_COUNT);
        debug!(
            "formatting filesystem: {block_count} blocks of {block_size} bytes, {inode_count} inodes"
        );

        let disk = Disk::create(path, block_size, block_count)?;
        let superblock = Superblock::new(block_size, block_count, inode_count);
        let mut fs = SimpleFileSystem {
            disk,
            superblock,
            bitmap: FreeBitmap::new(block_count),
            inodes: InodeTable::new(inode_count as usize),
            directory: Directory::new(superblock.max_directory_entries() as usize),
            fdt: vec![FileDescriptor::default(); superblock.max_open_files() as usize],
        };

        // Block 0 belongs to the superblock
        fs.bitmap.force_mark_used(0);
        fs.flush_superblock()?;

        // Reserve the bitmap's own blocks, then the inode table's. The
        // allocator hands them out consecutively right after block 0.
        for _ in 0..superblock.bitmap_len() {
            fs.bitmap.allocate()?;
        }
        for _ in 0..superblock.inode_table_len {
            fs.bitmap.allocate()?;
        }

        // Inode 0 holds the root directory; its blocks are allocated up
        // front. The directory table itself is all empty entries and the
        // fresh image is zero-filled, so there is nothing to write yet.
        let dir_size = fs.directory.size();
        fs.inodes.initialize(0);
        fs.inodes.get_mut(0).size = dir_size as u32;
        for n in 0..ceil_division(dir_size, block_size) {
            fs.allocate_block(0, n)?;
        }

        fs.flush_inode_table()?;
        fs.flush_bitmap()?;
        Ok(fs)
    }
}

/// Formats or remounts the filesystem image at `path`.
///
/// If `fresh` is `true`, a new image with the default geometry replaces
/// whatever is at `path`. Otherwise the existing image is remounted.
pub fn mksfs(path: &Path, fresh: bool) -> Result<SimpleFileSystem> {
    if fresh {
        SfsFactory::default().create(path)
    } else {
        SimpleFileSystem::open(path)
    }
}

/// A mounted filesystem.
pub struct SimpleFileSystem {
    /// The underlying block device.
    disk: Disk,
    /// Cached superblock.
    superblock: Superblock,
    /// Cached free-block bitmap.
    bitmap: FreeBitmap,
    /// Cached inode table.
    inodes: InodeTable,
    /// Cached root directory, with the filename iteration cursor.
    directory: Directory,
    /// The file descriptor table. Never persisted.
    fdt: Vec<FileDescriptor>,
}

impl SimpleFileSystem {
    /// Remounts the existing filesystem image at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let superblock = Superblock::probe(path)?;
        if superblock.magic != SFS_MAGIC || superblock.block_size == 0 {
            return Err(Error::BadMagic);
        }
        let block_size = superblock.block_size;
        debug!(
            "remounting filesystem: {} blocks of {block_size} bytes",
            superblock.block_count()
        );
        let mut disk = Disk::open(path, block_size, superblock.block_count())?;

        let mut image = vec![0; (superblock.bitmap_len() * block_size) as usize];
        disk.read_blocks(1, &mut image)?;
        let bitmap = FreeBitmap::from_bytes(&image, superblock.block_count());

        let mut image = vec![0; (superblock.inode_table_len * block_size) as usize];
        disk.read_blocks(superblock.inode_table_start(), &mut image)?;
        let inodes = InodeTable::from_bytes(&image, superblock.inode_count as usize);

        let mut fs = Self {
            disk,
            superblock,
            bitmap,
            inodes,
            directory: Directory::new(0),
            fdt: vec![FileDescriptor::default(); superblock.max_open_files() as usize],
        };
        fs.directory = fs.read_directory()?;
        Ok(fs)
    }

    /// Returns the superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Returns the number of free blocks on the device.
    pub fn free_block_count(&self) -> u64 {
        self.bitmap.free_count()
    }

    /// Opens the file `name`, creating it if necessary, and returns its file
    /// descriptor.
    ///
    /// An existing file opens in append mode: the descriptor's read/write
    /// pointer starts at the end of the file. If the file is already open,
    /// its current descriptor is returned unchanged. A created file starts
    /// empty.
    pub fn fopen(&mut self, name: &str) -> Result<usize> {
        // The terminator must fit in the fixed-width name field
        if name.len() >= MAX_FILENAME {
            return Err(Error::InvalidName);
        }
        if let Some(entry) = self.directory.find(name) {
            let inode = self.directory.get(entry).inode;
            if let Some(fd) = self.fdt.iter().position(|f| f.inode == inode) {
                return Ok(fd);
            }
            let fd = self.next_free_descriptor()?;
            self.fdt[fd] = FileDescriptor {
                inode,
                rwptr: self.inodes.get(inode as usize).size as u64,
            };
            Ok(fd)
        } else {
            let inode = self.inodes.next_free().ok_or(Error::OutOfInodes)?;
            self.inodes.initialize(inode);
            self.flush_inode_table()?;
            let fd = self.next_free_descriptor()?;
            self.fdt[fd] = FileDescriptor {
                inode: inode as u32,
                rwptr: 0,
            };
            self.directory.insert(inode as u32, name)?;
            self.flush_directory()?;
            Ok(fd)
        }
    }

    /// Closes the file descriptor `fd`.
    ///
    /// Closing an already-closed or out-of-range descriptor is a no-op.
    pub fn fclose(&mut self, fd: usize) {
        if let Some(desc) = self.fdt.get_mut(fd) {
            *desc = FileDescriptor::default();
        }
    }

    /// Moves the read/write pointer of `fd` to the byte offset `loc`.
    ///
    /// The last valid position is one byte before the end of the file.
    pub fn fseek(&mut self, fd: usize, loc: i64) -> Result<()> {
        let desc = self.descriptor(fd)?;
        let size = self.inodes.get(desc.inode as usize).size as i64;
        if loc < 0 || loc >= size {
            return Err(Error::OutOfBounds);
        }
        self.fdt[fd].rwptr = loc as u64;
        Ok(())
    }

    /// Reads from `fd` into `buf`, starting at the read/write pointer, and
    /// returns the number of bytes read.
    ///
    /// Reads past the end of the file are clamped. After the call the
    /// read/write pointer sits on the last byte read, not past it.
    pub fn fread(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let desc = self.descriptor(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let inode_index = desc.inode as usize;
        let block_size = self.superblock.block_size;
        let size = self.inodes.get(inode_index).size as u64;
        let len = (buf.len() as u64).min(size.saturating_sub(desc.rwptr));
        if len == 0 {
            return Ok(0);
        }

        let first_block = desc.rwptr / block_size;
        let last_block = (desc.rwptr + len - 1) / block_size;
        let mut scratch = vec![0; ((last_block - first_block + 1) * block_size) as usize];
        for n in first_block..=last_block {
            let block = self.resolve_block(inode_index, n)?;
            let off = ((n - first_block) * block_size) as usize;
            self.disk
                .read_blocks(block as u64, &mut scratch[off..off + block_size as usize])?;
        }

        let start = (desc.rwptr % block_size) as usize;
        buf[..len as usize].copy_from_slice(&scratch[start..start + len as usize]);
        self.fdt[fd].rwptr = desc.rwptr + len - 1;
        Ok(len as usize)
    }

    /// Writes `buf` to `fd`, starting at the read/write pointer, and returns
    /// the number of bytes written.
    ///
    /// Writing past the end of the file grows it, allocating data blocks and
    /// the indirection block as needed. After the call the read/write
    /// pointer sits on the last byte written, not past it.
    pub fn fwrite(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        let desc = self.descriptor(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let inode_index = desc.inode as usize;
        let block_size = self.superblock.block_size;
        let len = buf.len() as u64;
        let size = self.inodes.get(inode_index).size as u64;
        let extending = desc.rwptr + len > size;
        let mut added_blocks = false;

        let first_block = desc.rwptr / block_size;
        // The end of the range is computed from the offset one past the last
        // written byte, so a write ending on a block boundary also touches
        // the following block. Files therefore always own the block at
        // `size / block_size`, and containment below must match.
        let last_block = (desc.rwptr + len) / block_size;

        let mut scratch = vec![0; ((last_block - first_block + 1) * block_size) as usize];
        let mut blocks = Vec::with_capacity((last_block - first_block + 1) as usize);
        for n in first_block..=last_block {
            let off = ((n - first_block) * block_size) as usize;
            let chunk = &mut scratch[off..off + block_size as usize];
            let block = if size > 0 && n <= size / block_size {
                let block = self.resolve_block(inode_index, n)?;
                self.disk.read_blocks(block as u64, chunk)?;
                block
            } else {
                added_blocks = true;
                self.allocate_block(inode_index, n)?
            };
            blocks.push(block);
        }

        let start = (desc.rwptr % block_size) as usize;
        scratch[start..start + buf.len()].copy_from_slice(buf);

        if extending {
            self.inodes.get_mut(inode_index).size = (desc.rwptr + len) as u32;
            self.flush_inode_table()?;
        }
        if added_blocks {
            self.flush_bitmap()?;
        }
        for (i, block) in blocks.iter().enumerate() {
            let off = i * block_size as usize;
            self.disk
                .write_blocks(*block as u64, &scratch[off..off + block_size as usize])?;
        }
        self.fdt[fd].rwptr = desc.rwptr + len - 1;
        Ok(buf.len())
    }

    /// Returns the name of the next file in the directory, or `None` once
    /// every file has been returned.
    ///
    /// Exhausting the iteration resets the cursor, so the next call starts a
    /// fresh pass over the directory.
    pub fn fgetnextfilename(&mut self) -> Option<String> {
        let index = self.directory.advance()?;
        let name = self.directory.get(index).name_bytes();
        Some(String::from_utf8_lossy(name).into_owned())
    }

    /// Returns the size in bytes of the file at `path`.
    ///
    /// Both `name` and `/name` are accepted.
    pub fn fgetfilesize(&self, path: &str) -> Result<u64> {
        let name = path.strip_prefix('/').unwrap_or(path);
        let entry = self.directory.find(name).ok_or(Error::NotFound)?;
        let inode = self.directory.get(entry).inode;
        Ok(self.inodes.get(inode as usize).size as u64)
    }

    /// Removes the file `name` and releases its blocks.
    ///
    /// A file with an open descriptor cannot be removed.
    pub fn fremove(&mut self, name: &str) -> Result<()> {
        let entry = self.directory.find(name).ok_or(Error::NotFound)?;
        let inode_index = self.directory.get(entry).inode as usize;
        if self.fdt.iter().any(|f| f.inode as usize == inode_index) {
            return Err(Error::FileBusy);
        }
        debug!("removing `{name}`");
        self.directory.remove(entry);

        let block_size = self.superblock.block_size;
        let size = self.inodes.get(inode_index).size as u64;
        if size > 0 {
            for n in 0..=size / block_size {
                let block = self.resolve_block(inode_index, n)?;
                self.bitmap.free(block as u64);
            }
        }
        // A write ending exactly on the direct/indirect boundary allocates
        // the indirection block without growing the size past it, so the
        // pointer is authoritative, not the size
        let indirect = self.inodes.get(inode_index).indirect;
        if indirect != 0 {
            self.bitmap.free(indirect as u64);
        }
        self.inodes.reset(inode_index);

        self.flush_superblock()?;
        self.flush_bitmap()?;
        self.flush_inode_table()?;
        self.flush_directory()?;
        Ok(())
    }

    /// Returns the descriptor table entry `fd`, which must refer to an open
    /// file.
    fn descriptor(&self, fd: usize) -> Result<FileDescriptor> {
        self.fdt
            .get(fd)
            .filter(|f| f.inode != 0)
            .copied()
            .ok_or(Error::BadDescriptor)
    }

    /// Returns the index of the lowest free descriptor table slot.
    fn next_free_descriptor(&self) -> Result<usize> {
        self.fdt
            .iter()
            .position(|f| f.inode == 0)
            .ok_or(Error::OutOfDescriptors)
    }

    /// Returns the number of block pointers held by the indirection block.
    fn fanout(&self) -> usize {
        self.superblock.block_size as usize / size_of::<u32>()
    }

    /// Returns the maximum number of blocks a file can own.
    fn max_file_blocks(&self) -> u64 {
        (NUM_DIRECT + self.fanout()) as u64
    }

    /// Resolves the sequential block `n` of the file described by the inode
    /// at `inode_index` to its physical block.
    fn resolve_block(&mut self, inode_index: usize, n: u64) -> Result<u32> {
        let n = n as usize;
        if n < NUM_DIRECT {
            return Ok(self.inodes.get(inode_index).direct[n]);
        }
        let indirect = self.inodes.get(inode_index).indirect;
        let slots = self.read_indirect(indirect)?;
        Ok(slots[n - NUM_DIRECT])
    }

    /// Allocates a physical block for the sequential block `n` of the file
    /// described by the inode at `inode_index`, and hooks it to the inode.
    ///
    /// Crossing from the direct pointers into the indirect range also
    /// allocates the indirection block.
    fn allocate_block(&mut self, inode_index: usize, n: u64) -> Result<u32> {
        if n >= self.max_file_blocks() {
            return Err(Error::OutOfSpace);
        }
        let n = n as usize;
        if n < NUM_DIRECT {
            let block = self.bitmap.allocate()?;
            self.inodes.get_mut(inode_index).direct[n] = block;
            return Ok(block);
        }
        let slot = n - NUM_DIRECT;
        let indirect = self.inodes.get(inode_index).indirect;
        if indirect == 0 {
            // First crossing: set up the indirection block
            let indirect = self.bitmap.allocate()?;
            let block = self.bitmap.allocate()?;
            let mut slots = vec![0u32; self.fanout()];
            slots[slot] = block;
            self.write_indirect(indirect, &slots)?;
            self.inodes.get_mut(inode_index).indirect = indirect;
            Ok(block)
        } else {
            let mut slots = self.read_indirect(indirect)?;
            let block = self.bitmap.allocate()?;
            slots[slot] = block;
            self.write_indirect(indirect, &slots)?;
            Ok(block)
        }
    }

    /// Reads the block pointers held by the indirection block at `block`.
    fn read_indirect(&mut self, block: u32) -> Result<Vec<u32>> {
        let mut slots = vec![0u32; self.fanout()];
        self.disk
            .read_blocks(block as u64, reinterpret_slice_mut(&mut slots))?;
        Ok(slots)
    }

    /// Writes the block pointers `slots` to the indirection block at `block`.
    fn write_indirect(&mut self, block: u32, slots: &[u32]) -> Result<()> {
        self.disk
            .write_blocks(block as u64, reinterpret_slice(slots))?;
        Ok(())
    }

    /// Rebuilds the root directory from the blocks of inode `0`.
    fn read_directory(&mut self) -> Result<Directory> {
        let block_size = self.superblock.block_size;
        let size = self.inodes.get(0).size as u64;
        let blocks = ceil_division(size, block_size);
        let mut image = vec![0; (blocks * block_size) as usize];
        for n in 0..blocks {
            let block = self.resolve_block(0, n)?;
            let off = (n * block_size) as usize;
            self.disk
                .read_blocks(block as u64, &mut image[off..off + block_size as usize])?;
        }
        Ok(Directory::from_bytes(
            &image,
            (size / DIR_ENTRY_SIZE) as usize,
        ))
    }

    /// Writes the superblock back to block `0`.
    fn flush_superblock(&mut self) -> Result<()> {
        let mut image = vec![0; self.superblock.block_size as usize];
        let record = reinterpret(&self.superblock);
        image[..record.len()].copy_from_slice(record);
        self.disk.write_blocks(0, &image)?;
        Ok(())
    }

    /// Writes the free bitmap back to its blocks.
    fn flush_bitmap(&mut self) -> Result<()> {
        let block_size = self.superblock.block_size;
        let mut image = vec![0; (self.superblock.bitmap_len() * block_size) as usize];
        let bytes = self.bitmap.as_bytes();
        image[..bytes.len()].copy_from_slice(bytes);
        self.disk.write_blocks(1, &image)?;
        Ok(())
    }

    /// Writes the inode table back to its blocks.
    fn flush_inode_table(&mut self) -> Result<()> {
        let block_size = self.superblock.block_size;
        let mut image = vec![0; (self.superblock.inode_table_len * block_size) as usize];
        let bytes = self.inodes.as_bytes();
        image[..bytes.len()].copy_from_slice(bytes);
        self.disk
            .write_blocks(self.superblock.inode_table_start(), &image)?;
        Ok(())
    }

    /// Writes the root directory table into the blocks of inode `0`.
    fn flush_directory(&mut self) -> Result<()> {
        let block_size = self.superblock.block_size;
        let mut image = self.directory.as_bytes().to_vec();
        image.resize(
            (ceil_division(image.len() as u64, block_size) * block_size) as usize,
            0,
        );
        for n in 0..image.len() / block_size as usize {
            let block = self.resolve_block(0, n as u64)?;
            let off = n * block_size as usize;
            self.disk
                .write_blocks(block as u64, &image[off..off + block_size as usize])?;
        }
        Ok(())
    }
}
