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

//! Block device emulation on top of a regular file or a block device.
//!
//! The device is addressed in whole blocks. Reads and writes always cover an
//! integral number of consecutive blocks.

use libc::ioctl;
use std::ffi::c_long;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The size of a sector in bytes.
const SECTOR_SIZE: u64 = 512;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in number of sectors.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the number of sectors on the given device.
pub fn get_disk_size(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size = 0;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(size / SECTOR_SIZE)
    } else if file_type.is_file() {
        Ok(metadata.len() / SECTOR_SIZE)
    } else {
        Ok(0)
    }
}

/// A block device backed by a file.
pub struct Disk {
    /// The file storing the blocks.
    file: File,
    /// The size of a block in bytes.
    block_size: u64,
    /// The number of blocks on the device.
    block_count: u64,
}

impl Disk {
    /// Creates a fresh, zero-filled device image at `path`.
    ///
    /// Arguments:
    /// - `block_size` is the size of a block in bytes.
    /// - `block_count` is the number of blocks on the device.
    pub fn create(path: &Path, block_size: u64, block_count: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_size * block_count)?;
        Ok(Self {
            file,
            block_size,
            block_count,
        })
    }

    /// Opens the existing device image at `path`.
    ///
    /// Arguments:
    /// - `block_size` is the size of a block in bytes.
    /// - `block_count` is the number of blocks on the device.
    ///
    /// If the backing file or device is smaller than `block_count` blocks, the
    /// function returns an error.
    pub fn open(path: &Path, block_size: u64, block_count: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = get_disk_size(&file)? * SECTOR_SIZE;
        if len < block_size * block_count {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "device is too small for the filesystem",
            ));
        }
        Ok(Self {
            file,
            block_size,
            block_count,
        })
    }

    /// Returns the size of a block in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Returns the number of blocks on the device.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Checks that the range starting at block `start` and covering `buf_len`
    /// bytes lies on the device.
    fn check_range(&self, start: u64, buf_len: usize) -> io::Result<u64> {
        let count = buf_len as u64 / self.block_size;
        if buf_len as u64 % self.block_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer length is not a multiple of the block size",
            ));
        }
        if start + count > self.block_count {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block range is out of bounds",
            ));
        }
        Ok(count)
    }

    /// Reads consecutive blocks starting at block `start` into `buf`.
    ///
    /// The length of `buf` must be a multiple of the block size.
    pub fn read_blocks(&mut self, start: u64, buf: &mut [u8]) -> io::Result<()> {
        self.check_range(start, buf.len())?;
        self.file.seek(SeekFrom::Start(start * self.block_size))?;
        self.file.read_exact(buf)
    }

    /// Writes consecutive blocks from `buf` starting at block `start`.
    ///
    /// The length of `buf` must be a multiple of the block size.
    pub fn write_blocks(&mut self, start: u64, buf: &[u8]) -> io::Result<()> {
        self.check_range(start, buf.len())?;
        self.file.seek(SeekFrom::Start(start * self.block_size))?;
        self.file.write_all(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blocks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let mut disk = Disk::create(&path, 512, 16).unwrap();

        let data: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        disk.write_blocks(3, &data).unwrap();

        let mut buf = vec![0; 1024];
        disk.read_blocks(3, &mut buf).unwrap();
        assert_eq!(buf, data);

        // A fresh image reads as zeros
        disk.read_blocks(0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_bounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let mut disk = Disk::create(&path, 512, 4).unwrap();

        let mut buf = vec![0; 1024];
        assert!(disk.read_blocks(3, &mut buf).is_err());
        assert!(disk.write_blocks(4, &buf).is_err());
        // Length must be block-aligned
        assert!(disk.read_blocks(0, &mut buf[..100]).is_err());
    }

    #[test]
    fn reopen_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let mut disk = Disk::create(&path, 512, 8).unwrap();
            disk.write_blocks(7, &[0xab; 512]).unwrap();
        }

        let mut disk = Disk::open(&path, 512, 8).unwrap();
        let mut buf = [0; 512];
        disk.read_blocks(7, &mut buf).unwrap();
        assert_eq!(buf, [0xab; 512]);

        // Too many blocks for the backing file
        assert!(Disk::open(&path, 512, 9).is_err());
    }
}
