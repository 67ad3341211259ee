//! The generation cursor.
//!
//! A session pins a location in the item map while containers are being
//! produced. Map surgery performed mid-session (splits, merges, item
//! insertions) reports itself through the `on_*` methods so the cursor
//! stays pointed at the same logical item.

use crate::block::{BlockId, ItemMap};
use crate::types::{GeneratorDirection, GeneratorPosition};

#[derive(Clone, Copy, Debug)]
pub(crate) struct Session {
    pub(crate) direction: GeneratorDirection,
    pub(crate) done: bool,
    /// Block the cursor stands in.
    pub(crate) block: BlockId,
    /// Offset of the cursor within `block`.
    pub(crate) offset: isize,
    /// Items contributed by blocks before `block`.
    pub(crate) count: isize,
    /// Absolute index of the item under the cursor.
    pub(crate) item_index: isize,
}

impl Session {
    /// Opens a session at `position`, resolved against the current map.
    ///
    /// With `allow_start_at_realized` false and a zero offset, the cursor
    /// starts just past the addressed container instead of on it.
    pub(crate) fn start<I, C>(
        map: &ItemMap<I, C>,
        position: GeneratorPosition,
        direction: GeneratorDirection,
        allow_start_at_realized: bool,
    ) -> Self {
        let total = map.total_items() as isize;
        let mut state = Session {
            direction,
            done: total == 0,
            block: BlockId::HEAD,
            offset: 0,
            count: 0,
            item_index: -1,
        };

        if position.index != -1 {
            // Locate the container the index part addresses.
            let mut index = position.index;
            let mut item_count: isize = 0;
            let mut items_before: isize = 0;
            let mut block = map.next(BlockId::HEAD);
            while index >= container_count(map, block) {
                item_count += map.item_count(block) as isize;
                index -= container_count(map, block);
                items_before += map.item_count(block) as isize;
                block = map.next(block);
            }
            state.block = block;
            state.offset = index;
            state.count = item_count;
            state.item_index = items_before + index;
        }

        let mut offset = position.offset;
        if offset == 0 && (!allow_start_at_realized || state.block == BlockId::HEAD) {
            offset = match direction {
                GeneratorDirection::Forward => 1,
                GeneratorDirection::Backward => -1,
            };
        }

        if offset > 0 {
            loop {
                let before = (state.block, state.offset, offset);
                state.hop_forward(map, &mut offset, allow_start_at_realized);
                if offset <= 0
                    || state.block == BlockId::HEAD
                    || (state.block, state.offset, offset) == before
                {
                    break;
                }
            }
        } else if offset < 0 {
            if state.block == BlockId::HEAD {
                state.item_index = total;
                state.count = total;
            }
            loop {
                let before = (state.block, state.offset, offset);
                state.hop_backward(map, &mut offset, allow_start_at_realized);
                if offset >= 0
                    || state.block == BlockId::HEAD
                    || (state.block, state.offset, offset) == before
                {
                    break;
                }
            }
        }

        state
    }

    /// Advances one item past the one just produced.
    pub(crate) fn step<I, C>(&mut self, map: &ItemMap<I, C>) {
        match self.direction {
            GeneratorDirection::Forward => {
                let mut offset = 1;
                self.hop_forward(map, &mut offset, true);
            }
            GeneratorDirection::Backward => {
                let mut offset = -1;
                self.hop_backward(map, &mut offset, true);
            }
        }
    }

    fn hop_forward<I, C>(&mut self, map: &ItemMap<I, C>, offset: &mut isize, allow: bool) {
        if !move_allowed(map, self.block, allow) {
            return;
        }
        let item_count = map.item_count(self.block) as isize;
        if self.offset + *offset < item_count {
            self.item_index += *offset;
            self.offset += *offset;
            *offset = 0;
        } else {
            // Step to the start of the next block, consuming at least one.
            let step = (item_count - self.offset).max(1);
            self.item_index += step;
            *offset -= step;
            self.count += item_count;
            self.block = map.next(self.block);
            self.offset = 0;
        }
    }

    fn hop_backward<I, C>(&mut self, map: &ItemMap<I, C>, offset: &mut isize, allow: bool) {
        if !move_allowed(map, self.block, allow) {
            return;
        }
        if self.offset + *offset >= 0 {
            self.item_index += *offset;
            self.offset += *offset;
            *offset = 0;
        } else {
            // Step to the end of the previous block, consuming at least one.
            let step = (self.offset + 1).max(1);
            self.item_index -= step;
            *offset += step;
            self.block = map.prev(self.block);
            self.offset = map.item_count(self.block) as isize - 1;
            self.count -= map.item_count(self.block) as isize;
        }
    }

    /// Items `[offset, offset + count)` of `block` moved to `new_block` at
    /// `new_offset`; `delta` is the change in items-before for the target.
    pub(crate) fn on_items_moved(
        &mut self,
        block: BlockId,
        offset: isize,
        count: isize,
        new_block: BlockId,
        new_offset: isize,
        delta: isize,
    ) {
        if block == self.block && offset <= self.offset && self.offset < offset + count {
            self.block = new_block;
            self.offset += new_offset - offset;
            self.count += delta;
        }
    }

    /// An item was inserted (`delta == 1`) or removed (`delta == -1`) at the
    /// absolute index, inside an existing block. For a removal this must be
    /// raised before the physical shift, which then leaves the session
    /// alone; the cursor is adjusted exactly once.
    pub(crate) fn on_count_changed(&mut self, index: isize, delta: isize) {
        if index < self.count {
            // Before the cursor's block.
            self.count += delta;
            self.item_index += delta;
        } else if index < self.count + self.offset {
            // Within the block, before the cursor.
            self.offset += delta;
            self.item_index += delta;
        } else if index == self.count + self.offset && delta > 0 {
            // An insertion exactly at the cursor shifts it.
            self.offset += delta;
            self.item_index += delta;
        }
    }

    /// An item was inserted at the absolute index but landed in front of
    /// its block (a grown neighboring run, a fresh run, or the gap left by
    /// a split), so only the items-before count can absorb it. Raised after
    /// any physical move has retargeted the cursor.
    pub(crate) fn on_inserted_before_block(&mut self, index: isize) {
        if index <= self.count {
            self.count += 1;
            self.item_index += 1;
        }
    }

    /// `block` emptied and is about to leave the ring; a cursor stranded in
    /// it stands at the head of the following block.
    pub(crate) fn on_block_emptied(&mut self, block: BlockId, next: BlockId) {
        if self.block == block {
            self.block = next;
        }
    }

    /// `from` merged into `into`, whose items now precede it. Catches a
    /// cursor parked past the end of `from`, which the span move did not
    /// cover.
    pub(crate) fn on_blocks_merged(&mut self, from: BlockId, into: BlockId, prev_count: isize) {
        if self.block == from {
            self.block = into;
            self.offset += prev_count;
            self.count -= prev_count;
        }
    }

    /// Walks the cursor out of any block it has run past the end of, onto
    /// the head of the next one.
    pub(crate) fn normalize<I, C>(&mut self, map: &ItemMap<I, C>) {
        while self.block != BlockId::HEAD
            && self.offset >= map.item_count(self.block) as isize
        {
            self.count += map.item_count(self.block) as isize;
            self.block = map.next(self.block);
            self.offset = 0;
        }
    }

    /// The map was rebuilt into a single unrealized block; the cursor keeps
    /// its absolute index.
    pub(crate) fn on_refresh(&mut self, new_block: BlockId) {
        self.block = new_block;
        self.offset += self.count;
        self.count = 0;
    }
}

fn move_allowed<I, C>(map: &ItemMap<I, C>, block: BlockId, allow: bool) -> bool {
    if map.is_realized(block) { allow } else { true }
}

fn container_count<I, C>(map: &ItemMap<I, C>, block: BlockId) -> isize {
    let count = map.container_count(block);
    if count == usize::MAX {
        isize::MAX
    } else {
        count as isize
    }
}
