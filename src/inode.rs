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

//! The inode table.
//!
//! The table is a fixed-size array of inode records, held in memory and
//! mirrored to a fixed range of blocks. The first inode is reserved for the
//! root directory.

use crate::util::reinterpret_slice;
use crate::util::reinterpret_slice_mut;
use std::mem::size_of;

/// The number of direct block pointers in an inode.
pub const NUM_DIRECT: usize = 12;

/// The size of an inode record in bytes.
pub const INODE_SIZE: u64 = size_of::<Inode>() as u64;

/// An inode describes a single file: its size in bytes and the data blocks
/// holding its content.
///
/// A block pointer with value `0` is unused. Block `0` always holds the
/// superblock, so it can never be the data block of a file.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Inode {
    /// The size of the file in bytes.
    pub size: u32,
    /// Non-zero when the inode describes a live file.
    pub in_use: u32,
    /// Direct block pointers.
    pub direct: [u32; NUM_DIRECT],
    /// Pointer to the indirection block, holding further block pointers.
    pub indirect: u32,
}

const _: () = assert!(size_of::<Inode>() == 60);

impl Inode {
    /// Tells whether the inode describes a live file.
    pub fn is_used(&self) -> bool {
        self.in_use != 0
    }
}

/// The in-memory copy of the inode table.
pub struct InodeTable {
    /// The inode records.
    inodes: Vec<Inode>,
}

impl InodeTable {
    /// Creates a table of `count` empty inodes.
    pub fn new(count: usize) -> Self {
        Self {
            inodes: vec![Inode::default(); count],
        }
    }

    /// Rebuilds the table of `count` inodes from its on-disk image.
    ///
    /// `bytes` may be longer than the table itself since the image spans
    /// whole blocks. The excess is ignored.
    pub fn from_bytes(bytes: &[u8], count: usize) -> Self {
        let mut table = Self::new(count);
        let len = count * size_of::<Inode>();
        reinterpret_slice_mut(&mut table.inodes).copy_from_slice(&bytes[..len]);
        table
    }

    /// Returns the on-disk image of the table.
    pub fn as_bytes(&self) -> &[u8] {
        reinterpret_slice(&self.inodes)
    }

    /// Returns the number of inodes in the table.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    /// Returns the inode at `index`.
    pub fn get(&self, index: usize) -> &Inode {
        &self.inodes[index]
    }

    /// Returns the inode at `index` for modification.
    pub fn get_mut(&mut self, index: usize) -> &mut Inode {
        &mut self.inodes[index]
    }

    /// Returns the index of the lowest-indexed free inode.
    pub fn next_free(&self) -> Option<usize> {
        self.inodes.iter().position(|inode| !inode.is_used())
    }

    /// Marks the inode at `index` as used and clears its size and pointers.
    pub fn initialize(&mut self, index: usize) {
        self.inodes[index] = Inode {
            in_use: 1,
            ..Default::default()
        };
    }

    /// Releases the inode at `index`.
    pub fn reset(&mut self, index: usize) {
        self.inodes[index] = Inode::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn next_free_skips_used() {
        let mut table = InodeTable::new(4);
        assert_eq!(table.next_free(), Some(0));
        table.initialize(0);
        table.initialize(1);
        assert_eq!(table.next_free(), Some(2));
        table.reset(0);
        assert_eq!(table.next_free(), Some(0));
    }

    #[test]
    fn next_free_on_full_table() {
        let mut table = InodeTable::new(2);
        table.initialize(0);
        table.initialize(1);
        assert_eq!(table.next_free(), None);
    }

    #[test]
    fn initialize_clears_record() {
        let mut table = InodeTable::new(1);
        {
            let inode = table.get_mut(0);
            inode.size = 4096;
            inode.direct[0] = 17;
            inode.indirect = 21;
        }
        table.initialize(0);
        let inode = table.get(0);
        assert!(inode.is_used());
        assert_eq!(inode.size, 0);
        assert_eq!(inode.direct, [0; NUM_DIRECT]);
        assert_eq!(inode.indirect, 0);
    }

    #[test]
    fn image_round_trip() {
        let mut table = InodeTable::new(3);
        table.initialize(1);
        table.get_mut(1).size = 1234;
        table.get_mut(1).direct[3] = 42;

        // The image is padded to a whole number of blocks
        let mut image = table.as_bytes().to_vec();
        image.resize(1024, 0);

        let restored = InodeTable::from_bytes(&image, 3);
        assert!(!restored.get(0).is_used());
        assert!(restored.get(1).is_used());
        assert_eq!(restored.get(1).size, 1234);
        assert_eq!(restored.get(1).direct[3], 42);
        assert_eq!(restored.get(1).indirect, 0);
    }
}
