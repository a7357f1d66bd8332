//! Memory blocks and the arena that holds them
//!
//! Every block of a pool lives in one `BlockArena` slot. List membership
//! (free, used, aborting) is the block's `state` field; queries filter by
//! state instead of moving nodes between lists. A destroyed block vacates its
//! slot and bumps the slot generation, so a stale `BlockId` can never reach
//! whatever block is stored there next.

use std::fmt;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use vidmem_backend::BufferHandle;

/// Stable identifier of a block within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl BlockId {
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Which list a block currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Waiting in the free list, refcount 0
    Free,
    /// Checked out by at least one consumer
    Used,
    /// Checked out, but torn down on final release instead of recycled
    Aborting,
}

/// One managed buffer
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    pub(crate) handle: BufferHandle,
    /// Descriptor used for sharing, cached at commit
    pub(crate) descriptor: RawFd,
    pub(crate) refcount: usize,
    pub(crate) state: BlockState,
    /// Bytes reserved from the memory budget for this block
    pub(crate) budget_charge: usize,
    /// Order in which the block entered the free list
    free_seq: u64,
}

impl MemoryBlock {
    pub(crate) const fn new(handle: BufferHandle, descriptor: RawFd, budget_charge: usize) -> Self {
        Self {
            handle,
            descriptor,
            refcount: 0,
            state: BlockState::Free,
            budget_charge,
            free_seq: 0,
        }
    }

    pub(crate) const fn size(&self) -> usize {
        self.handle.size()
    }

    pub(crate) const fn addr(&self) -> Option<NonNull<u8>> {
        self.handle.addr()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    block: Option<MemoryBlock>,
}

/// Index-based storage for a pool's blocks
#[derive(Debug, Default)]
pub(crate) struct BlockArena {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    next_free_seq: u64,
}

impl BlockArena {
    /// Store a block as the newest member of the free list
    pub(crate) fn insert(&mut self, mut block: MemoryBlock) -> BlockId {
        block.state = BlockState::Free;
        block.refcount = 0;
        block.free_seq = self.bump_seq();

        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.block = Some(block);
            return BlockId::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            block: Some(block),
        });
        BlockId::new(index, 0)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: BlockId) -> Option<&MemoryBlock> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut MemoryBlock> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_mut())
    }

    /// Vacate the slot; the id is dead from here on
    pub(crate) fn remove(&mut self, id: BlockId) -> Option<MemoryBlock> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.index);
        Some(block)
    }

    /// Put a block back at the tail of the free list
    pub(crate) fn mark_free(&mut self, id: BlockId) {
        let seq = self.bump_seq();
        if let Some(block) = self.get_mut(id) {
            block.state = BlockState::Free;
            block.free_seq = seq;
        }
    }

    /// Oldest free block accepted by `usable`
    pub(crate) fn oldest_free(&self, usable: impl Fn(&MemoryBlock) -> bool) -> Option<BlockId> {
        self.iter()
            .filter(|(_, block)| block.state == BlockState::Free && usable(block))
            .min_by_key(|(_, block)| block.free_seq)
            .map(|(id, _)| id)
    }

    /// Ids of blocks matching `filter`
    pub(crate) fn ids_where(&self, filter: impl Fn(&MemoryBlock) -> bool) -> Vec<BlockId> {
        self.iter()
            .filter(|(_, block)| filter(block))
            .map(|(id, _)| id)
            .collect()
    }

    /// Remove every block matching `filter`
    pub(crate) fn drain_where(&mut self, filter: impl Fn(&MemoryBlock) -> bool) -> Vec<MemoryBlock> {
        self.ids_where(filter)
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub(crate) fn count(&self, state: BlockState) -> usize {
        self.iter().filter(|(_, block)| block.state == state).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn find_descriptor(&self, descriptor: RawFd) -> Option<BlockId> {
        self.iter()
            .find(|(_, block)| block.descriptor == descriptor)
            .map(|(id, _)| id)
    }

    fn iter(&self) -> impl Iterator<Item = (BlockId, &MemoryBlock)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let block = slot.block.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((BlockId::new(index, slot.generation), block))
        })
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_free_seq;
        self.next_free_seq += 1;
        seq
    }
}
