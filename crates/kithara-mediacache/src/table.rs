#![forbid(unsafe_code)]

use std::{ops::Range, sync::Arc};

use kithara_storage::Driver;

use crate::{block::Block, region::SharedRegion};

/// Number of blocks needed to cover `size` bytes.
///
/// `block_size` must be non-zero.
pub fn block_count(size: u64, block_size: u64) -> u64 {
    size.div_ceil(block_size)
}

/// Split `[0, size)` into consecutive windows of `block_size` bytes.
///
/// The last window is shorter when `size` is not a multiple of `block_size`.
/// Windows never overlap and together cover the whole range.
pub fn partition(size: u64, block_size: u64) -> impl Iterator<Item = Range<u64>> {
    (0..block_count(size, block_size)).map(move |i| {
        let start = i * block_size;
        start..start.saturating_add(block_size).min(size)
    })
}

/// All blocks of one allocated file, in order.
pub(crate) struct BlockTable<D: Driver> {
    blocks: Vec<Arc<Block<D>>>,
}

impl<D: Driver> BlockTable<D> {
    pub(crate) fn new(size: u64, block_size: u64, region: &Arc<SharedRegion<D>>) -> Self {
        let blocks = partition(size, block_size)
            .zip(0u64..)
            .map(|(window, index)| Arc::new(Block::new(index, window, Arc::clone(region))))
            .collect();
        Self { blocks }
    }

    pub(crate) fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub(crate) fn get(&self, index: u64) -> Option<&Arc<Block<D>>> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Block<D>>> {
        self.blocks.iter()
    }
}
