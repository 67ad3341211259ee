//! The item map: a doubly linked ring of blocks describing which items of
//! the source view currently have containers.
//!
//! Blocks live in an arena and link to each other by handle, with slot 0
//! reserved for the head sentinel. A realized block stores up to
//! [`BLOCK_SIZE`] item/container pairs in order; an unrealized block is just
//! a run length. Two invariants hold between operations: the item counts of
//! all blocks sum to the view length, and no two unrealized blocks are
//! adjacent.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::GeneratorError;
use crate::types::GeneratorPosition;

/// Maximum number of entries per realized block.
pub(crate) const BLOCK_SIZE: usize = 16;

/// Handle to a block in the arena. `BlockId::HEAD` is the sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockId(u32);

impl BlockId {
    pub(crate) const HEAD: BlockId = BlockId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One realized item/container pair.
#[derive(Clone, Debug)]
pub(crate) struct Entry<I, C> {
    pub(crate) item: I,
    pub(crate) container: C,
}

type EntrySlots<I, C> = Box<[Option<Entry<I, C>>; BLOCK_SIZE]>;

#[derive(Debug)]
pub(crate) enum BlockKind<I, C> {
    /// The head sentinel. Contributes no items; its container count reads as
    /// infinite so container-index walks terminate on it.
    Head,
    Unrealized {
        count: usize,
    },
    Realized {
        count: usize,
        entries: EntrySlots<I, C>,
    },
}

#[derive(Debug)]
struct Slot<I, C> {
    prev: BlockId,
    next: BlockId,
    kind: BlockKind<I, C>,
}

#[derive(Debug)]
pub(crate) struct ItemMap<I, C> {
    slots: Vec<Slot<I, C>>,
    free: Vec<BlockId>,
}

fn empty_entries<I, C>() -> EntrySlots<I, C> {
    Box::new(core::array::from_fn(|_| None))
}

impl<I, C> ItemMap<I, C> {
    /// An empty ring: just the head sentinel, no blocks.
    pub(crate) fn new() -> Self {
        Self {
            slots: alloc::vec![Slot {
                prev: BlockId::HEAD,
                next: BlockId::HEAD,
                kind: BlockKind::Head,
            }],
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, kind: BlockKind<I, C>) -> BlockId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()].kind = kind;
                id
            }
            None => {
                let id = BlockId(self.slots.len() as u32);
                self.slots.push(Slot {
                    prev: id,
                    next: id,
                    kind,
                });
                id
            }
        }
    }

    /// Allocates an unrealized block; the caller links it into the ring.
    pub(crate) fn new_unrealized(&mut self, count: usize) -> BlockId {
        self.alloc(BlockKind::Unrealized { count })
    }

    /// Allocates an empty realized block; the caller links it into the ring.
    pub(crate) fn new_realized(&mut self) -> BlockId {
        self.alloc(BlockKind::Realized {
            count: 0,
            entries: empty_entries(),
        })
    }

    pub(crate) fn next(&self, block: BlockId) -> BlockId {
        self.slots[block.index()].next
    }

    pub(crate) fn prev(&self, block: BlockId) -> BlockId {
        self.slots[block.index()].prev
    }

    pub(crate) fn insert_after(&mut self, block: BlockId, anchor: BlockId) {
        let next = self.slots[anchor.index()].next;
        self.slots[block.index()].prev = anchor;
        self.slots[block.index()].next = next;
        self.slots[anchor.index()].next = block;
        self.slots[next.index()].prev = block;
    }

    pub(crate) fn insert_before(&mut self, block: BlockId, anchor: BlockId) {
        let prev = self.slots[anchor.index()].prev;
        self.insert_after(block, prev);
    }

    /// Splices a block out of the ring and returns its slot to the free list.
    pub(crate) fn unlink(&mut self, block: BlockId) {
        debug_assert!(block != BlockId::HEAD);
        let prev = self.slots[block.index()].prev;
        let next = self.slots[block.index()].next;
        self.slots[prev.index()].next = next;
        self.slots[next.index()].prev = prev;
        self.slots[block.index()].prev = block;
        self.slots[block.index()].next = block;
        self.slots[block.index()].kind = BlockKind::Unrealized { count: 0 };
        self.free.push(block);
    }

    pub(crate) fn is_realized(&self, block: BlockId) -> bool {
        matches!(self.slots[block.index()].kind, BlockKind::Realized { .. })
    }

    pub(crate) fn is_unrealized(&self, block: BlockId) -> bool {
        matches!(self.slots[block.index()].kind, BlockKind::Unrealized { .. })
    }

    /// Items covered by a block. The head sentinel covers none.
    pub(crate) fn item_count(&self, block: BlockId) -> usize {
        match &self.slots[block.index()].kind {
            BlockKind::Head => 0,
            BlockKind::Unrealized { count } | BlockKind::Realized { count, .. } => *count,
        }
    }

    /// Containers held by a block. Unrealized blocks hold none; the head
    /// reads as infinite so container-index walks stop there.
    pub(crate) fn container_count(&self, block: BlockId) -> usize {
        match &self.slots[block.index()].kind {
            BlockKind::Head => usize::MAX,
            BlockKind::Unrealized { .. } => 0,
            BlockKind::Realized { count, .. } => *count,
        }
    }

    pub(crate) fn add_count(&mut self, block: BlockId, delta: isize) {
        match &mut self.slots[block.index()].kind {
            BlockKind::Unrealized { count } | BlockKind::Realized { count, .. } => {
                *count = count.wrapping_add_signed(delta);
            }
            BlockKind::Head => debug_assert!(false, "count change on head sentinel"),
        }
    }

    pub(crate) fn entry(&self, block: BlockId, offset: usize) -> Option<&Entry<I, C>> {
        match &self.slots[block.index()].kind {
            BlockKind::Realized { entries, .. } => entries[offset].as_ref(),
            _ => None,
        }
    }

    pub(crate) fn set_entry(&mut self, block: BlockId, offset: usize, item: I, container: C) {
        match &mut self.slots[block.index()].kind {
            BlockKind::Realized { entries, .. } => {
                entries[offset] = Some(Entry { item, container });
            }
            _ => debug_assert!(false, "entry write into non-realized block"),
        }
    }

    pub(crate) fn clear_entries(&mut self, block: BlockId, offset: usize, count: usize) {
        if let BlockKind::Realized { entries, .. } = &mut self.slots[block.index()].kind {
            for slot in &mut entries[offset..offset + count] {
                *slot = None;
            }
        }
    }

    /// Moves `count` entry slots from `(src, offset)` to `(dst, new_offset)`.
    /// Within one block the copy runs in whichever direction keeps the
    /// overlap safe; source slots are left empty.
    pub(crate) fn copy_entries(
        &mut self,
        src: BlockId,
        offset: usize,
        count: usize,
        dst: BlockId,
        new_offset: usize,
    ) {
        if count == 0 {
            return;
        }
        if src == dst {
            let BlockKind::Realized { entries, .. } = &mut self.slots[src.index()].kind else {
                return;
            };
            if offset < new_offset {
                for i in (0..count).rev() {
                    entries[new_offset + i] = entries[offset + i].take();
                }
            } else {
                for i in 0..count {
                    entries[new_offset + i] = entries[offset + i].take();
                }
            }
        } else {
            let src_kind = core::mem::replace(
                &mut self.slots[src.index()].kind,
                BlockKind::Unrealized { count: 0 },
            );
            let BlockKind::Realized {
                entries: mut src_entries,
                count: src_count,
            } = src_kind
            else {
                debug_assert!(false, "entry copy from non-realized block");
                return;
            };
            if let BlockKind::Realized { entries, .. } = &mut self.slots[dst.index()].kind {
                for i in 0..count {
                    entries[new_offset + i] = src_entries[offset + i].take();
                }
            }
            self.slots[src.index()].kind = BlockKind::Realized {
                entries: src_entries,
                count: src_count,
            };
        }
    }

    /// Moves the data for a span of items between blocks and updates both
    /// counts. Entry payloads move only when both ends are realized; a
    /// realized-to-unrealized move drops them.
    pub(crate) fn move_span(
        &mut self,
        src: BlockId,
        offset: usize,
        count: usize,
        dst: BlockId,
        new_offset: usize,
    ) {
        if self.is_realized(src) {
            if self.is_realized(dst) {
                self.copy_entries(src, offset, count, dst, new_offset);
            } else {
                self.clear_entries(src, offset, count);
            }
        }
        self.add_count(src, -(count as isize));
        self.add_count(dst, count as isize);
    }

    /// Sum of all block item counts. Matches the view length between
    /// operations.
    pub(crate) fn total_items(&self) -> usize {
        let mut total = 0;
        let mut block = self.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            total += self.item_count(block);
            block = self.next(block);
        }
        total
    }

    /// Resolves an item index to its position plus the block and in-block
    /// offset holding it.
    pub(crate) fn position_from_index(
        &self,
        index: usize,
    ) -> Result<(GeneratorPosition, BlockId, usize), GeneratorError> {
        let mut container_index: isize = -1;
        let mut offset = index;
        let mut block = self.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            if offset < self.item_count(block) {
                let position = if self.is_realized(block) {
                    GeneratorPosition::new(container_index + 1 + offset as isize, 0)
                } else {
                    GeneratorPosition::new(container_index, offset as isize + 1)
                };
                return Ok((position, block, offset));
            }
            offset -= self.item_count(block);
            container_index += self.container_count(block) as isize;
            block = self.next(block);
        }
        Err(GeneratorError::IndexOutOfRange(index as isize))
    }

    /// The item index a position refers to, or `-1` when it addresses no
    /// item.
    pub(crate) fn index_from_position(&self, position: GeneratorPosition) -> isize {
        if position.index == -1 {
            // The offset is relative to the boundary before the first item,
            // or to the end of the sequence when negative.
            return if position.offset >= 0 {
                position.offset - 1
            } else {
                self.total_items() as isize + position.offset
            };
        }
        // Locate the container the index part refers to, then apply offset.
        let mut item_index: isize = 0;
        let mut container_index = position.index;
        let mut block = self.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            if container_index < self.container_count(block) as isize {
                return item_index + container_index + position.offset;
            }
            container_index -= self.container_count(block) as isize;
            item_index += self.item_count(block) as isize;
            block = self.next(block);
        }
        -1
    }
}
