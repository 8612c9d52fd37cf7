// src/buddy/allocator.rs
//! Buddy allocator with split/status bit indices.
//!
//! # Architecture
//!
//! The allocator manages a power-of-two region as a binary tree of
//! blocks: level 0 is the whole region, each level below halves the block
//! size, down to the configured minimum.  Blocks are addressed by an
//! **absolute index** laid out like a binary heap: the root is 0, the
//! children of block `b` are `2b + 1` and `2b + 2`, and buddies differ by
//! one in absolute index.
//!
//! Three structures describe the tree state:
//! - the **status index**: one bit per block, set while the block is free;
//! - the **split index**: one bit per non-leaf block, set while the block
//!   has been divided into its two children;
//! - per-level **free counts**, a fast "any block at this level?" check.
//!
//! The allocator deals in offsets, not pointers: callers map a
//! [`BuddyBlock`]'s offset onto whatever region base they reserved.  The
//! tail of the region can be declared reserved at construction; reserved
//! bytes are pre-carved out of the tree as minimum-size blocks and never
//! enter a free list.

use crate::error::{Result, TaskError};

/// Maximum number of power-of-two steps between the minimum and maximum
/// block sizes.
pub const MAX_LEVELS: usize = 16;

/// Smallest supported minimum block size, in bytes.
const MIN_BLOCK_FLOOR: u64 = 16;

/// Geometry of a [`BuddyAllocator`].
#[derive(Debug, Clone)]
pub struct BuddyConfig {
    /// Total region size in bytes (usable + reserved).  Must be a power
    /// of two.
    pub memory_size: u64,
    /// Smallest block the allocator will hand out.  Must be a power of
    /// two of at least 16.
    pub min_block: u64,
    /// Largest allocation the allocator will satisfy.  Must be a power of
    /// two between `min_block` and `memory_size`.
    pub max_block: u64,
    /// Bytes at the end of the region withheld from allocation, rounded
    /// up to a multiple of `min_block`.  Must be less than `max_block`.
    pub bytes_reserved: u64,
}

/// A block handed out by [`BuddyAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyBlock {
    /// Byte offset of the block within the managed region.
    pub offset: u64,
    /// Block size in bytes; always a power of two.
    pub size: u64,
}

/// Power-of-two buddy allocator.
///
/// # Example
///
/// ```rust
/// use taskweave::buddy::{BuddyAllocator, BuddyConfig};
///
/// let mut alloc = BuddyAllocator::new(BuddyConfig {
///     memory_size: 64 * 1024,
///     min_block: 16 * 1024,
///     max_block: 64 * 1024,
///     bytes_reserved: 0,
/// })
/// .unwrap();
///
/// let block = alloc.allocate(10 * 1024, 16).unwrap();
/// assert_eq!(block.size, 16 * 1024);
/// alloc.free(block);
/// ```
pub struct BuddyAllocator {
    memory_size: u64,
    min_block: u64,
    max_block: u64,
    bytes_reserved: u64,
    /// Number of levels: level 0 is the whole region, the last level is
    /// `min_block`-sized blocks.
    level_count: u32,
    /// log2 of the block size at each level; `level_shift[0]` is the root.
    level_shift: [u32; MAX_LEVELS],
    /// Free blocks per level.
    free_count: [u32; MAX_LEVELS],
    /// One bit per block (absolute index), set while the block is free.
    status_index: Box<[u64]>,
    /// One bit per non-leaf block, set while the block is split.
    split_index: Box<[u64]>,
}

impl BuddyAllocator {
    /// Builds an allocator from the given geometry.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidAllocatorConfig`] describing the first invalid
    /// parameter.
    pub fn new(config: BuddyConfig) -> Result<Self> {
        if config.memory_size == 0 || !config.memory_size.is_power_of_two() {
            return Err(TaskError::InvalidAllocatorConfig(
                "memory size must be a non-zero power of two",
            ));
        }
        if !config.min_block.is_power_of_two() || config.min_block < MIN_BLOCK_FLOOR {
            return Err(TaskError::InvalidAllocatorConfig(
                "minimum block size must be a power of two of at least 16",
            ));
        }
        if !config.max_block.is_power_of_two()
            || config.max_block < config.min_block
            || config.max_block > config.memory_size
        {
            return Err(TaskError::InvalidAllocatorConfig(
                "maximum block size must be a power of two in [min_block, memory_size]",
            ));
        }
        let bytes_reserved = config.bytes_reserved.next_multiple_of(config.min_block);
        if bytes_reserved >= config.max_block {
            return Err(TaskError::InvalidAllocatorConfig(
                "reserved bytes must be smaller than the maximum block size",
            ));
        }
        let level_count =
            config.memory_size.trailing_zeros() - config.min_block.trailing_zeros() + 1;
        if level_count as usize > MAX_LEVELS {
            return Err(TaskError::InvalidAllocatorConfig(
                "too many levels between memory size and minimum block size",
            ));
        }

        let root_shift = config.memory_size.trailing_zeros();
        let mut level_shift = [0u32; MAX_LEVELS];
        for (level, shift) in level_shift.iter_mut().enumerate().take(level_count as usize) {
            *shift = root_shift - level as u32;
        }

        // 2^level_count - 1 blocks overall; index bitmaps are rounded up
        // to whole 64-bit words.
        let status_words = (1usize << level_count).div_ceil(64);
        let split_words = ((1usize << (level_count - 1)).div_ceil(64)).max(1);

        let mut allocator = Self {
            memory_size: config.memory_size,
            min_block: config.min_block,
            max_block: config.max_block,
            bytes_reserved,
            level_count,
            level_shift,
            free_count: [0; MAX_LEVELS],
            status_index: vec![0u64; status_words].into_boxed_slice(),
            split_index: vec![0u64; split_words].into_boxed_slice(),
        };
        allocator.reinit();
        Ok(allocator)
    }

    /// Total region size in bytes, including reserved bytes.
    #[inline]
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Bytes withheld from allocation at the end of the region.
    #[inline]
    pub fn bytes_reserved(&self) -> u64 {
        self.bytes_reserved
    }

    /// Number of free blocks currently tracked at the level serving
    /// `block_size` allocations.
    pub fn free_blocks_of_size(&self, block_size: u64) -> u32 {
        match self.level_for(block_size) {
            Some(level) => self.free_count[level as usize],
            None => 0,
        }
    }

    /// Allocates a block of at least `max(size, alignment, min_block)`
    /// bytes, rounded up to a power of two.
    ///
    /// Any returned block is naturally aligned to its size within the
    /// region, so `alignment` never exceeds the rounded block size.
    ///
    /// # Errors
    ///
    /// - [`TaskError::AllocationTooLarge`] when the rounded size exceeds
    ///   the configured maximum block size or the usable region.
    /// - [`TaskError::OutOfMemory`] when no free block can satisfy the
    ///   request.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<BuddyBlock> {
        let wanted = size.max(alignment).max(self.min_block);
        let rounded = wanted.next_power_of_two();
        if rounded > self.max_block || rounded > self.memory_size - self.bytes_reserved {
            return Err(TaskError::AllocationTooLarge);
        }
        let target = self
            .level_for(rounded)
            .expect("rounded size maps onto a level");

        // Find the deepest level at or above the target with a free block.
        let mut level = target;
        loop {
            if self.free_count[level as usize] > 0 {
                break;
            }
            if level == 0 {
                return Err(TaskError::OutOfMemory);
            }
            level -= 1;
        }

        let mut abs = self
            .find_free_block(level)
            .expect("free count promised a block");

        // Split down until a block of the target size exists.
        while level < target {
            self.clear_status(abs);
            self.set_split(abs);
            self.free_count[level as usize] -= 1;
            let left = 2 * abs + 1;
            self.set_status(left);
            self.set_status(left + 1);
            self.free_count[level as usize + 1] += 2;
            abs = left;
            level += 1;
        }

        self.clear_status(abs);
        self.free_count[target as usize] -= 1;
        Ok(BuddyBlock {
            offset: self.offset_of(abs, target),
            size: 1u64 << self.level_shift[target as usize],
        })
    }

    /// Returns `block` to the allocator, merging buddies as far up as
    /// possible.
    ///
    /// The block's level is recovered from the split index: walking up
    /// from the leaf, the first ancestor whose parent carries a split bit
    /// marks the level the block was allocated at.
    pub fn free(&mut self, block: BuddyBlock) {
        let mut level = self.level_of_offset(block.offset);
        debug_assert_eq!(
            1u64 << self.level_shift[level as usize],
            block.size.max(self.min_block).next_power_of_two(),
            "freed block size disagrees with the split index"
        );
        let mut abs = self.abs_index(block.offset, level);
        debug_assert!(!self.status(abs), "double free");

        while level > 0 {
            let buddy = if abs & 1 == 1 { abs + 1 } else { abs - 1 };
            if !self.status(buddy) {
                break;
            }
            // Merge: the buddy leaves its free list and the parent stops
            // being split.
            self.clear_status(buddy);
            self.free_count[level as usize] -= 1;
            abs = (abs - 1) / 2;
            self.clear_split(abs);
            level -= 1;
        }

        self.set_status(abs);
        self.free_count[level as usize] += 1;
    }

    /// Restores the freshly constructed state: everything free except the
    /// reserved tail.
    pub fn reset(&mut self) {
        self.status_index.fill(0);
        self.split_index.fill(0);
        self.free_count.fill(0);
        self.reinit();
    }

    fn reinit(&mut self) {
        // The root starts as the single free block.
        self.set_status(0);
        self.free_count[0] = 1;
        if self.bytes_reserved > 0 {
            let reserved_start = self.memory_size - self.bytes_reserved;
            self.carve_reserved(0, 0, reserved_start);
        }
    }

    /// Withdraws the region tail `[reserved_start, memory_size)` from the
    /// free lists by splitting down to minimum-size blocks.
    ///
    /// `reserved_start` is `min_block`-aligned, so recursion always stops
    /// at or above the leaf level.
    fn carve_reserved(&mut self, abs: u64, level: u32, reserved_start: u64) {
        let block_size = 1u64 << self.level_shift[level as usize];
        let block_offset = self.offset_of(abs, level);

        if block_offset >= reserved_start {
            // Fully reserved: withdraw the whole block.
            debug_assert!(self.status(abs));
            self.clear_status(abs);
            self.free_count[level as usize] -= 1;
            return;
        }
        if block_offset + block_size <= reserved_start {
            // Fully usable: stays free.
            return;
        }
        // Straddles the boundary: split and recurse.  Only the right
        // child can straddle again, so the depth is bounded by the level
        // count.
        self.clear_status(abs);
        self.set_split(abs);
        self.free_count[level as usize] -= 1;
        let left = 2 * abs + 1;
        self.set_status(left);
        self.set_status(left + 1);
        self.free_count[level as usize + 1] += 2;
        self.carve_reserved(left, level + 1, reserved_start);
        self.carve_reserved(left + 1, level + 1, reserved_start);
    }

    /// Level whose block size equals `block_size`, if any.
    fn level_for(&self, block_size: u64) -> Option<u32> {
        if !block_size.is_power_of_two() {
            return None;
        }
        let shift = block_size.trailing_zeros();
        let root = self.level_shift[0];
        if shift > root || root - shift >= self.level_count {
            return None;
        }
        Some(root - shift)
    }

    /// Recovers the allocation level of the block at `offset` by walking
    /// the split index from the leaf level upward.
    fn level_of_offset(&self, offset: u64) -> u32 {
        let mut level = self.level_count - 1;
        while level > 0 {
            let abs = self.abs_index(offset, level);
            let parent = (abs - 1) / 2;
            if self.split(parent) {
                return level;
            }
            level -= 1;
        }
        0
    }

    /// Absolute (heap-order) index of the block containing `offset` at
    /// `level`.
    fn abs_index(&self, offset: u64, level: u32) -> u64 {
        let local = offset >> self.level_shift[level as usize];
        (1u64 << level) - 1 + local
    }

    /// Byte offset of the block with absolute index `abs` at `level`.
    fn offset_of(&self, abs: u64, level: u32) -> u64 {
        let local = abs - ((1u64 << level) - 1);
        local << self.level_shift[level as usize]
    }

    /// Scans the status index for the first free block at `level`.
    fn find_free_block(&self, level: u32) -> Option<u64> {
        let first = (1u64 << level) - 1;
        let last = first + (1u64 << level) - 1;
        let first_word = (first / 64) as usize;
        let last_word = (last / 64) as usize;
        for word_index in first_word..=last_word {
            let mut word = self.status_index[word_index];
            // Mask away bits outside the level's index range.
            let word_base = word_index as u64 * 64;
            if word_base < first {
                word &= !0u64 << (first - word_base);
            }
            if word_base + 63 > last {
                let keep = last - word_base + 1;
                if keep < 64 {
                    word &= (1u64 << keep) - 1;
                }
            }
            if word != 0 {
                return Some(word_base + u64::from(word.trailing_zeros()));
            }
        }
        None
    }

    #[inline]
    fn status(&self, abs: u64) -> bool {
        self.status_index[(abs / 64) as usize] & (1u64 << (abs % 64)) != 0
    }

    #[inline]
    fn set_status(&mut self, abs: u64) {
        self.status_index[(abs / 64) as usize] |= 1u64 << (abs % 64);
    }

    #[inline]
    fn clear_status(&mut self, abs: u64) {
        self.status_index[(abs / 64) as usize] &= !(1u64 << (abs % 64));
    }

    #[inline]
    fn split(&self, abs: u64) -> bool {
        self.split_index[(abs / 64) as usize] & (1u64 << (abs % 64)) != 0
    }

    #[inline]
    fn set_split(&mut self, abs: u64) {
        self.split_index[(abs / 64) as usize] |= 1u64 << (abs % 64);
    }

    #[inline]
    fn clear_split(&mut self, abs: u64) {
        self.split_index[(abs / 64) as usize] &= !(1u64 << (abs % 64));
    }
}
