//! The item container generator.
//!
//! [`ItemContainerGenerator`] maps items of a host's view to realized
//! containers through the block-run [`ItemMap`]. Grouping builds a tree of
//! generator nodes, one per group header, all owned by the facade and
//! addressed by [`GeneratorId`]. Containers leaving the visible range can be
//! removed outright or recycled into per-level pools for later reuse.

use alloc::vec::Vec;
use core::cell::Cell;

use crate::block::{BLOCK_SIZE, BlockId, Entry, ItemMap};
use crate::error::GeneratorError;
use crate::host::GeneratorHost;
use crate::macros::{rdebug, rtrace, rwarn};
use crate::session::Session;
use crate::types::{
    GeneratorDirection, GeneratorId, GeneratorPosition, ItemsChanged, ItemsChangedAction,
    ItemsChangedCallback, SourceChange,
};

/// One generator instance: the root, or the generator behind a group header.
struct Node<I, C> {
    map: ItemMap<I, C>,
    session: Option<Session>,
    level: usize,
    parent: Option<GeneratorId>,
    /// Header container this node generates for, `None` at the root.
    peer: Option<C>,
    /// Group item whose members this node generates, `None` at the root.
    group: Option<I>,
    /// Recycle pool this node draws from.
    pool: usize,
    /// Pool shared by all of this node's children, created lazily.
    child_pool: Option<usize>,
    /// Header container to child node, for headers this node realized.
    nested: Vec<(C, GeneratorId)>,
    is_grouping: bool,
    /// Header currently hidden because the group is empty.
    hidden: bool,
    /// Header currently sits in the parent's recycle pool.
    recycled: bool,
    /// Last hit of the linear search, used as its starting point.
    search_hint: Cell<isize>,
    /// Position produced by the pre-change stage of an insertion, consumed
    /// by the post-change stage.
    pending_insert: Option<GeneratorPosition>,
}

impl<I, C> Node<I, C> {
    fn new(level: usize, parent: Option<GeneratorId>, peer: Option<C>, group: Option<I>, pool: usize) -> Self {
        Self {
            map: ItemMap::new(),
            session: None,
            level,
            parent,
            peer,
            group,
            pool,
            child_pool: None,
            nested: Vec::new(),
            is_grouping: false,
            hidden: false,
            recycled: false,
            search_hint: Cell::new(0),
            pending_insert: None,
        }
    }

    /// Moves a span of items between blocks, keeping the data, the counts
    /// and the open session consistent.
    fn move_items(
        &mut self,
        block: BlockId,
        offset: isize,
        count: isize,
        new_block: BlockId,
        new_offset: isize,
        delta: isize,
    ) {
        self.map
            .move_span(block, offset as usize, count as usize, new_block, new_offset as usize);
        if let Some(session) = self.session.as_mut() {
            session.on_items_moved(block, offset, count, new_block, new_offset, delta);
        }
    }

    /// Removes `block` if it emptied, first merging the unrealized runs
    /// around it so no two unrealized blocks stay adjacent. An open session
    /// never keeps a handle to an unlinked block.
    fn remove_and_coalesce(&mut self, block: BlockId) {
        if block == BlockId::HEAD || self.map.item_count(block) != 0 {
            return;
        }
        let prev = self.map.prev(block);
        let next = self.map.next(block);
        if let Some(session) = self.session.as_mut() {
            session.on_block_emptied(block, next);
        }
        if self.map.is_unrealized(prev) && self.map.is_unrealized(next) {
            let prev_count = self.map.item_count(prev) as isize;
            let next_count = self.map.item_count(next) as isize;
            self.move_items(next, 0, next_count, prev, prev_count, -prev_count);
            if let Some(session) = self.session.as_mut() {
                session.on_blocks_merged(next, prev, prev_count);
            }
            self.map.unlink(next);
        }
        self.map.unlink(block);
    }

    /// Converts the item at `(block, offset)` of an unrealized run into a
    /// realized entry, growing a neighboring realized block when it has
    /// room and splitting the run otherwise.
    fn realize(&mut self, block: BlockId, offset: usize, item: I, container: C) {
        let prev = self.map.prev(block);
        let next = self.map.next(block);
        let run_len = self.map.item_count(block);
        let (new_block, new_offset);

        if offset == 0 && self.map.is_realized(prev) && self.map.item_count(prev) < BLOCK_SIZE {
            // Leftmost item of the run, with room in the previous block.
            new_block = prev;
            new_offset = self.map.item_count(prev);
            self.move_items(block, 0, 1, new_block, new_offset as isize, -(new_offset as isize));
            let rest = self.map.item_count(block) as isize;
            self.move_items(block, 1, rest, block, 0, 1);
        } else if offset + 1 == run_len
            && self.map.is_realized(next)
            && self.map.item_count(next) < BLOCK_SIZE
        {
            // Rightmost item of the run, with room in the next block.
            new_block = next;
            new_offset = 0;
            let next_len = self.map.item_count(next) as isize;
            self.move_items(next, 0, next_len, next, 1, -1);
            self.move_items(block, offset as isize, 1, new_block, 0, offset as isize);
        } else {
            new_block = self.map.new_realized();
            new_offset = 0;
            if offset == 0 {
                self.map.insert_before(new_block, block);
                self.move_items(block, 0, 1, new_block, 0, 0);
                let rest = self.map.item_count(block) as isize;
                self.move_items(block, 1, rest, block, 0, 1);
            } else if offset + 1 == run_len {
                self.map.insert_after(new_block, block);
                self.move_items(block, offset as isize, 1, new_block, 0, offset as isize);
            } else {
                // Split the run, leaving the realized item in the middle.
                let tail = self.map.new_unrealized(0);
                self.map.insert_after(tail, block);
                self.map.insert_after(new_block, block);
                let tail_len = (run_len - offset - 1) as isize;
                self.move_items(block, offset as isize + 1, tail_len, tail, 0, offset as isize + 1);
                self.move_items(block, offset as isize, 1, new_block, 0, offset as isize);
            }
        }

        self.remove_and_coalesce(block);
        self.map.set_entry(new_block, new_offset, item, container);
    }
}

/// A container whose disassociation is postponed until the host finishes
/// its exit transition.
struct DeferredUnlink<I, C> {
    container: C,
    item: I,
}

/// Generates and tracks containers for the items of a [`GeneratorHost`].
///
/// The generator is driven entirely by its host: panels open a generation
/// session with [`start_at`](Self::start_at), pull containers with
/// [`generate_next`](Self::generate_next), and retire ranges with
/// [`remove`](Self::remove) or [`recycle`](Self::recycle). Source mutations
/// are reported through [`source_changing`](Self::source_changing) and
/// [`source_changed`](Self::source_changed).
pub struct ItemContainerGenerator<I, C> {
    nodes: Vec<Option<Node<I, C>>>,
    free_nodes: Vec<u32>,
    pools: Vec<Vec<C>>,
    free_pools: Vec<usize>,
    deferred: Vec<DeferredUnlink<I, C>>,
    on_items_changed: Option<ItemsChangedCallback>,
}

impl<I, C> ItemContainerGenerator<I, C>
where
    I: Clone + PartialEq,
    C: Clone + PartialEq,
{
    /// Creates the root generator over the host's current view.
    pub fn new(host: &mut dyn GeneratorHost<I, C>) -> Self {
        let mut this = Self {
            nodes: alloc::vec![Some(Node::new(0, None, None, None, 0))],
            free_nodes: Vec::new(),
            pools: alloc::vec![Vec::new()],
            free_pools: Vec::new(),
            deferred: Vec::new(),
            on_items_changed: None,
        };
        this.remove_all_impl(GeneratorId::ROOT, host);
        this
    }

    /// Registers the callback raised after each source change is applied.
    pub fn set_on_items_changed(&mut self, callback: ItemsChangedCallback) {
        self.on_items_changed = Some(callback);
    }

    /// Opens a generation session at `position`, moving in `direction`.
    pub fn start_at(
        &mut self,
        generator: GeneratorId,
        position: GeneratorPosition,
        direction: GeneratorDirection,
        allow_start_at_realized: bool,
    ) -> Result<(), GeneratorError> {
        let node = self.node_checked_mut(generator)?;
        if node.session.is_some() {
            return Err(GeneratorError::GenerationInProgress);
        }
        rtrace!(
            "start_at index={} offset={} forward={}",
            position.index,
            position.offset,
            matches!(direction, GeneratorDirection::Forward)
        );
        node.session = Some(Session::start(
            &node.map,
            position,
            direction,
            allow_start_at_realized,
        ));
        Ok(())
    }

    /// Closes the open generation session.
    pub fn stop(&mut self, generator: GeneratorId) -> Result<(), GeneratorError> {
        let node = self.node_checked_mut(generator)?;
        node.session
            .take()
            .map(|_| ())
            .ok_or(GeneratorError::GenerationNotInProgress)
    }

    /// Produces the container for the next item of the open session.
    ///
    /// Returns `None` once the cursor runs off the view. The flag is true
    /// when the host materialized a fresh container in this call; an
    /// already-realized or pool-satisfied container reports false.
    pub fn generate_next(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
    ) -> Result<Option<(C, bool)>, GeneratorError> {
        let node = self.node_checked(generator)?;
        let Some(session) = node.session else {
            return Err(GeneratorError::GenerationNotInProgress);
        };
        let group = node.group.clone();
        let grouping = node.is_grouping;
        let pool_id = node.pool;

        let mut done = session.done;
        if session.block == BlockId::HEAD {
            done = true;
        }
        let len = host.view_len(group.as_ref()) as isize;
        if session.item_index < 0 || session.item_index >= len {
            done = true;
        }
        if done {
            if let Some(s) = self.node_mut(generator).session.as_mut() {
                s.done = true;
            }
            return Ok(None);
        }

        let block = session.block;
        let offset = session.offset as usize;
        let (container, newly_realized) = if self.node(generator).map.is_unrealized(block) {
            let item = host.view_item(group.as_ref(), session.item_index as usize);
            let mut newly = true;

            // Prefer a pooled container over creating one.
            let mut recycled = None;
            if !host.is_item_its_own_container(&item) {
                let pool = &mut self.pools[pool_id];
                if let Some(i) = pool.iter().position(|c| host.can_recycle(c, &item)) {
                    let reused = pool.remove(i);
                    host.container_reused(&reused);
                    newly = false;
                    recycled = Some(reused);
                }
            }

            let container = if grouping && host.is_group(&item) {
                self.container_for_group(generator, host, &item, recycled)
            } else {
                host.container_for_item(&item, recycled)
            };

            self.node_mut(generator)
                .realize(block, offset, item, container.clone());
            (container, newly)
        } else {
            match self.node(generator).map.entry(block, offset) {
                Some(entry) => (entry.container.clone(), false),
                None => return Ok(None),
            }
        };

        let node = self.node_mut(generator);
        if let Some(s) = node.session.as_mut() {
            s.step(&node.map);
        }
        Ok(Some((container, newly_realized)))
    }

    /// Removes the containers for `count` items starting at `position`,
    /// unlinking them from their items. The position must address a
    /// realized container with offset 0 and the whole range must be
    /// realized.
    pub fn remove(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        position: GeneratorPosition,
        count: usize,
    ) -> Result<(), GeneratorError> {
        self.remove_impl(generator, host, position, count, false)
    }

    /// Like [`remove`](Self::remove), but parks the containers in the
    /// recycle pool for later reuse.
    pub fn recycle(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        position: GeneratorPosition,
        count: usize,
    ) -> Result<(), GeneratorError> {
        self.remove_impl(generator, host, position, count, true)
    }

    /// Discards every realized container and rebuilds the map as a single
    /// unrealized run over the host's current view.
    pub fn remove_all(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
    ) -> Result<(), GeneratorError> {
        self.node_checked(generator)?;
        self.remove_all_impl(generator, host);
        Ok(())
    }

    /// Raises a `Reset` notification and rebuilds the map from scratch.
    pub fn refresh(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
    ) -> Result<(), GeneratorError> {
        self.node_checked(generator)?;
        self.refresh_impl(generator, host);
        Ok(())
    }

    /// Pre-change stage of a source mutation, called before any other
    /// consumer of the change reacts. Gives the map a slot for a new item
    /// so position queries made by those consumers already see it.
    pub fn source_changing(
        &mut self,
        generator: GeneratorId,
        change: &SourceChange,
    ) -> Result<(), GeneratorError> {
        let node = self.node_checked(generator)?;
        if let SourceChange::Inserted { index } = change {
            // Grouping defers this work to the post-change stage.
            if node.level == 0 && !node.is_grouping {
                self.item_added(generator, *index)?;
            }
        }
        Ok(())
    }

    /// Post-change stage of a source mutation: applies the change to the
    /// map and raises the items-changed notification.
    pub fn source_changed(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        change: &SourceChange,
    ) -> Result<(), GeneratorError> {
        self.node_checked(generator)?;
        match change {
            SourceChange::Inserted { index } => {
                if self.node(generator).pending_insert.is_none() {
                    self.item_added(generator, *index)?;
                }
                let position = self
                    .node_mut(generator)
                    .pending_insert
                    .take()
                    .ok_or(GeneratorError::UnpairedInsertNotification)?;
                self.raise(generator, ItemsChangedAction::Inserted, position, 1, 0);
                self.unhide_if_refilled(generator, host);
            }
            SourceChange::Removed { index } => {
                self.item_removed(generator, host, *index)?;
            }
            SourceChange::Replaced { index } => {
                self.item_replaced(generator, host, *index)?;
                self.unhide_if_refilled(generator, host);
            }
            SourceChange::Reset => {
                self.refresh_impl(generator, host);
                self.hide_group_if_empty(generator, host);
                self.unhide_if_refilled(generator, host);
            }
        }
        Ok(())
    }

    /// Maps an item index to the position addressing it.
    pub fn position_from_index(
        &self,
        generator: GeneratorId,
        index: usize,
    ) -> Result<GeneratorPosition, GeneratorError> {
        let node = self.node_checked(generator)?;
        node.map.position_from_index(index).map(|(position, _, _)| position)
    }

    /// Maps a position to the item index it addresses, or `-1`.
    pub fn index_from_position(
        &self,
        generator: GeneratorId,
        position: GeneratorPosition,
    ) -> Result<isize, GeneratorError> {
        let node = self.node_checked(generator)?;
        Ok(node.map.index_from_position(position))
    }

    /// Whether an item index falls inside the tracked range.
    pub fn is_index_in_range(&self, generator: GeneratorId, index: usize) -> bool {
        let Some(node) = self.get(generator) else {
            return false;
        };
        let mut offset = index;
        let mut block = node.map.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            if offset < node.map.item_count(block) {
                return true;
            }
            offset -= node.map.item_count(block);
            block = node.map.next(block);
        }
        false
    }

    /// The realized container for `item`, if any. Descends into groups.
    pub fn container_from_item(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        item: &I,
    ) -> Option<C> {
        let mut item_index = 0;
        self.linear_search(generator, host, None, Some(item), &mut item_index)
            .map(|(container, _)| container)
    }

    /// The item a realized container was generated for, if any.
    pub fn item_from_container(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        container: &C,
    ) -> Option<I> {
        let mut item_index = 0;
        self.linear_search(generator, host, Some(container), None, &mut item_index)
            .map(|(_, item)| item)
    }

    /// The absolute item index a realized container was generated for.
    /// Counts leaves across group boundaries.
    pub fn index_from_container(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        container: &C,
    ) -> Option<usize> {
        let mut item_index = 0;
        self.linear_search(generator, host, Some(container), None, &mut item_index)?;
        usize::try_from(item_index).ok()
    }

    /// The container for the item at the absolute index, if realized.
    /// Descends into groups; `index` counts leaves across group boundaries.
    pub fn container_from_index(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        index: usize,
    ) -> Option<C> {
        self.container_from_index_impl(generator, host, index as isize)
    }

    /// The container at `index` within this generator's own level, counting
    /// headers as single items.
    pub fn container_from_group_index(
        &self,
        generator: GeneratorId,
        index: usize,
    ) -> Option<C> {
        let node = self.get(generator)?;
        let mut offset = index;
        let mut block = node.map.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            if offset < node.map.item_count(block) {
                return node.map.entry(block, offset).map(|e| e.container.clone());
            }
            offset -= node.map.item_count(block);
            block = node.map.next(block);
        }
        None
    }

    /// Number of leaf items this generator spans, probing group contents
    /// through the host for unrealized runs.
    pub fn count(&self, generator: GeneratorId, host: &dyn GeneratorHost<I, C>) -> usize {
        if self.get(generator).is_none() {
            return 0;
        }
        self.count_to(generator, host, BlockId::HEAD)
    }

    /// Re-applies item state to a realized container, after the host has
    /// attached it to its tree. Returns false when the container is not in
    /// the map.
    pub fn prepare_item_container(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        container: &C,
    ) -> bool {
        let mut item_index = 0;
        let found = self.linear_search(generator, host, Some(container), None, &mut item_index);
        match found {
            Some((_, item)) => {
                host.prepare_container(container, &item);
                true
            }
            None => false,
        }
    }

    /// Finishes a disassociation postponed because the container was still
    /// transitioning. Returns false when nothing was pending for it.
    pub fn complete_deferred_unlink(
        &mut self,
        host: &mut dyn GeneratorHost<I, C>,
        container: &C,
    ) -> bool {
        let Some(i) = self.deferred.iter().position(|d| d.container == *container) else {
            return false;
        };
        let deferred = self.deferred.remove(i);
        host.clear_container(&deferred.container, &deferred.item);
        true
    }

    /// The generator behind a realized group header.
    pub fn nested_generator(&self, generator: GeneratorId, header: &C) -> Option<GeneratorId> {
        self.get(generator)?
            .nested
            .iter()
            .find(|(c, _)| c == header)
            .map(|(_, id)| *id)
    }

    /// Nesting depth of a generator; the root is level 0.
    pub fn level(&self, generator: GeneratorId) -> Option<usize> {
        self.get(generator).map(|node| node.level)
    }

    /// Whether this generator currently produces group headers.
    pub fn is_grouping(&self, generator: GeneratorId) -> bool {
        self.get(generator).is_some_and(|node| node.is_grouping)
    }

    // ---- internals -------------------------------------------------------

    fn get(&self, id: GeneratorId) -> Option<&Node<I, C>> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    fn node_checked(&self, id: GeneratorId) -> Result<&Node<I, C>, GeneratorError> {
        self.get(id).ok_or(GeneratorError::UnknownGenerator)
    }

    fn node_checked_mut(&mut self, id: GeneratorId) -> Result<&mut Node<I, C>, GeneratorError> {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or(GeneratorError::UnknownGenerator)
    }

    fn node(&self, id: GeneratorId) -> &Node<I, C> {
        self.nodes[id.index()].as_ref().expect("live generator node")
    }

    fn node_mut(&mut self, id: GeneratorId) -> &mut Node<I, C> {
        self.nodes[id.index()].as_mut().expect("live generator node")
    }

    fn alloc_node(&mut self, node: Node<I, C>) -> GeneratorId {
        match self.free_nodes.pop() {
            Some(index) => {
                self.nodes[index as usize] = Some(node);
                GeneratorId(index)
            }
            None => {
                let id = GeneratorId(self.nodes.len() as u32);
                self.nodes.push(Some(node));
                id
            }
        }
    }

    fn alloc_pool(&mut self) -> usize {
        match self.free_pools.pop() {
            Some(pool) => pool,
            None => {
                self.pools.push(Vec::new());
                self.pools.len() - 1
            }
        }
    }

    /// Frees a nested generator and everything beneath it, returning its
    /// node and pool slots to their free lists.
    fn free_subtree(&mut self, id: GeneratorId) {
        let Some(node) = self.nodes[id.index()].take() else {
            return;
        };
        for (_, child) in node.nested {
            self.free_subtree(child);
        }
        if let Some(pool) = node.child_pool {
            self.pools[pool].clear();
            self.free_pools.push(pool);
        }
        self.free_nodes.push(id.0);
    }

    fn raise(
        &self,
        generator: GeneratorId,
        action: ItemsChangedAction,
        position: GeneratorPosition,
        item_count: usize,
        container_count: usize,
    ) {
        if let Some(callback) = &self.on_items_changed {
            callback(
                generator,
                &ItemsChanged {
                    action,
                    position,
                    item_count,
                    container_count,
                },
            );
        }
    }

    /// Severs a container from its item, or parks the disassociation when
    /// the host still has an exit transition running on it.
    fn unlink_container(
        &mut self,
        host: &mut dyn GeneratorHost<I, C>,
        container: &C,
        item: &I,
    ) {
        if host.has_pending_transition(container) {
            self.deferred.push(DeferredUnlink {
                container: container.clone(),
                item: item.clone(),
            });
        } else {
            host.clear_container(container, item);
        }
    }

    fn remove_impl(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        position: GeneratorPosition,
        count: usize,
        is_recycling: bool,
    ) -> Result<(), GeneratorError> {
        if position.offset != 0 {
            return Err(GeneratorError::RemoveRequiresOffsetZero);
        }
        if count == 0 {
            return Err(GeneratorError::RemoveRequiresPositiveCount);
        }
        // A negative index never addresses a realized container.
        if position.index < 0 {
            return Err(GeneratorError::CannotRemoveUnrealizedItems);
        }
        self.node_checked(generator)?;
        rdebug!(
            "{} containers at index {} count {}",
            if is_recycling { "recycle" } else { "remove" },
            position.index,
            count
        );

        // Resolve the realized range and collect the doomed entries.
        let (block_left, block_right, offset_l, offset_r, doomed) = {
            let map = &self.node(generator).map;
            let mut offset_l = position.index;
            let mut block = map.next(BlockId::HEAD);
            while block != BlockId::HEAD && offset_l >= map.container_count(block) as isize {
                offset_l -= map.container_count(block) as isize;
                block = map.next(block);
            }
            if block == BlockId::HEAD || !map.is_realized(block) {
                return Err(GeneratorError::CannotRemoveUnrealizedItems);
            }
            let block_left = block;

            let mut offset_r = offset_l + count as isize - 1;
            loop {
                if block == BlockId::HEAD || !map.is_realized(block) {
                    return Err(GeneratorError::CannotRemoveUnrealizedItems);
                }
                if offset_r < map.container_count(block) as isize {
                    break;
                }
                offset_r -= map.container_count(block) as isize;
                block = map.next(block);
            }
            let block_right = block;

            let mut doomed: Vec<Entry<I, C>> = Vec::with_capacity(count);
            let mut rb = block_left;
            let mut off = offset_l;
            while rb != block_right || off <= offset_r {
                if let Some(entry) = map.entry(rb, off as usize) {
                    doomed.push(entry.clone());
                }
                off += 1;
                if off >= map.container_count(rb) as isize && rb != block_right {
                    rb = map.next(rb);
                    off = 0;
                }
            }
            (block_left, block_right, offset_l, offset_r, doomed)
        };

        // De-initialize the containers leaving the map.
        let pool_id = self.node(generator).pool;
        for entry in &doomed {
            self.unlink_container(host, &entry.container, &entry.item);
            let nested = self.nested_generator(generator, &entry.container);
            if is_recycling {
                if self.pools[pool_id].iter().any(|c| *c == entry.container) {
                    return Err(GeneratorError::ContainerAlreadyInPool);
                }
                host.container_recycled(&entry.container);
                if let Some(child) = nested {
                    // The nested generator parks with its header; its own
                    // containers are recycled when the header is rebound.
                    self.node_mut(child).recycled = true;
                }
                self.pools[pool_id].push(entry.container.clone());
            } else if let Some(child) = nested {
                self.node_mut(generator).nested.retain(|(_, id)| *id != child);
                self.free_subtree(child);
            }
        }

        // Decide where the emptied span folds into: an abutting unrealized
        // run, or a fresh one inserted afterwards.
        let node = self.node_mut(generator);
        let edge_l = offset_l == 0;
        let edge_r = offset_r == node.map.item_count(block_right) as isize - 1;
        let abut_l = edge_l && node.map.is_unrealized(node.map.prev(block_left));
        let abut_r = edge_r && node.map.is_unrealized(node.map.next(block_right));

        let target;
        let mut offset_t: isize;
        let mut delta: isize;
        let mut predecessor = None;
        if abut_l {
            target = node.map.prev(block_left);
            offset_t = node.map.item_count(target) as isize;
            delta = -(node.map.item_count(target) as isize);
        } else if abut_r {
            target = node.map.next(block_right);
            offset_t = 0;
            delta = offset_l;
        } else {
            target = node.map.new_unrealized(0);
            offset_t = 0;
            delta = offset_l;
            predecessor = Some(if edge_l {
                node.map.prev(block_left)
            } else {
                block_left
            });
        }

        // Fold the range into the target, dropping emptied blocks.
        let mut offset_l = offset_l;
        let mut block = block_left;
        while block != block_right {
            let item_count = node.map.item_count(block) as isize;
            node.move_items(block, offset_l, item_count - offset_l, target, offset_t, delta);
            offset_t += item_count - offset_l;
            offset_l = 0;
            delta -= item_count;
            let mut resume = block;
            if node.map.item_count(block) == 0 {
                resume = node.map.prev(block);
                node.map.unlink(block);
            }
            block = node.map.next(resume);
        }

        let remaining = node.map.item_count(block) as isize - 1 - offset_r;
        node.move_items(block, offset_l, offset_r - offset_l + 1, target, offset_t, delta);

        // Realized items surviving past the range move to the front of the
        // right block, or to a new block when the left edge also survives.
        let mut extra = block_right;
        if !edge_r {
            if block_left == block_right && !edge_l {
                extra = node.map.new_realized();
            }
            node.move_items(block, offset_r + 1, remaining, extra, 0, offset_r + 1);
        }

        if let Some(anchor) = predecessor {
            node.map.insert_after(target, anchor);
        }
        if extra != block_right {
            node.map.insert_after(extra, target);
        }
        node.remove_and_coalesce(block);
        Ok(())
    }

    fn refresh_impl(&mut self, generator: GeneratorId, host: &mut dyn GeneratorHost<I, C>) {
        self.raise(
            generator,
            ItemsChangedAction::Reset,
            GeneratorPosition::before_first(),
            0,
            0,
        );
        self.remove_all_impl(generator, host);
    }

    fn remove_all_impl(&mut self, generator: GeneratorId, host: &mut dyn GeneratorHost<I, C>) {
        // A parked header keeps its subtree; everything it generated goes
        // to the shared pool for sibling groups to reuse. The root instead
        // starts its pool over.
        let (level, pool_id) = {
            let node = self.node(generator);
            (node.level, node.pool)
        };
        let recycle = if level == 0 {
            self.pools[pool_id].clear();
            false
        } else {
            self.node(generator).recycled
        };

        self.clear_blocks(generator, host, recycle);
        self.prepare_grouping(generator, host);

        let len = host.view_len(self.node(generator).group.as_ref());
        let node = self.node_mut(generator);
        node.map = ItemMap::new();
        let run = node.map.new_unrealized(len);
        node.map.insert_after(run, BlockId::HEAD);
        if let Some(session) = node.session.as_mut() {
            session.on_refresh(run);
        }
        rtrace!("rebuilt map with {} unrealized items", len);
    }

    fn clear_blocks(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        recycle: bool,
    ) {
        let entries: Vec<Entry<I, C>> = {
            let map = &self.node(generator).map;
            let mut entries = Vec::new();
            let mut block = map.next(BlockId::HEAD);
            while block != BlockId::HEAD {
                for offset in 0..map.container_count(block) {
                    if let Some(entry) = map.entry(block, offset) {
                        entries.push(entry.clone());
                    }
                }
                block = map.next(block);
            }
            entries
        };

        let pool_id = self.node(generator).pool;
        for entry in &entries {
            self.unlink_container(host, &entry.container, &entry.item);
            let nested = self.nested_generator(generator, &entry.container);
            if recycle {
                if let Some(child) = nested {
                    self.node_mut(child).recycled = true;
                }
                self.pools[pool_id].push(entry.container.clone());
            } else if let Some(child) = nested {
                self.node_mut(generator).nested.retain(|(_, id)| *id != child);
                self.free_subtree(child);
            }
        }
    }

    fn prepare_grouping(&mut self, generator: GeneratorId, host: &dyn GeneratorHost<I, C>) {
        let node = self.node_mut(generator);
        node.is_grouping = if node.level == 0 {
            host.group_style(0).is_some() && host.has_collection_groups()
        } else {
            // A nested generator always draws from a group's members.
            true
        };
    }

    /// Pre-change stage of an insertion: gives the new item a slot in the
    /// map and remembers the resulting position for the post-change stage.
    fn item_added(&mut self, generator: GeneratorId, index: usize) -> Result<(), GeneratorError> {
        let node = self.node_mut(generator);
        if node.pending_insert.is_some() {
            return Err(GeneratorError::UnpairedInsertNotification);
        }

        let mut position = GeneratorPosition::before_first();
        let mut offset = index as isize;
        let mut block = node.map.next(BlockId::HEAD);
        while block != BlockId::HEAD && offset >= node.map.item_count(block) as isize {
            offset -= node.map.item_count(block) as isize;
            position.index += node.map.container_count(block) as isize;
            block = node.map.next(block);
        }
        position.offset = offset + 1;

        let grew_in_place = node.map.is_unrealized(block);
        if grew_in_place {
            // Grow the run in place.
            node.map.add_count(block, 1);
        } else if (offset == 0 || block == BlockId::HEAD)
            && node.map.is_unrealized(node.map.prev(block))
        {
            let run = node.map.prev(block);
            node.map.add_count(run, 1);
            position.offset = node.map.item_count(run) as isize;
        } else {
            let run = node.map.new_unrealized(1);
            let mut anchor = block;
            if offset > 0 && node.map.is_realized(block) {
                // Split the realized block around the insertion point.
                let split = node.map.new_realized();
                let tail = node.map.item_count(block) as isize - offset;
                node.move_items(block, offset, tail, split, 0, offset);
                node.map.insert_after(split, block);
                position.index += node.map.container_count(block) as isize;
                position.offset = 1;
                anchor = split;
            }
            node.map.insert_before(run, anchor);
        }

        if let Some(session) = node.session.as_mut() {
            if grew_in_place {
                session.on_count_changed(index as isize, 1);
            } else {
                // The item sits in front of the cursor's block, not inside
                // it; the split's span move has already retargeted a cursor
                // that rode along.
                session.on_inserted_before_block(index as isize);
            }
        }
        node.pending_insert = Some(position);
        Ok(())
    }

    fn item_removed(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        index: usize,
    ) -> Result<(), GeneratorError> {
        let (position, block, offset) = self.node(generator).map.position_from_index(index)?;

        let node = self.node_mut(generator);
        let removed = node.map.entry(block, offset).cloned();
        let container_count = usize::from(removed.is_some());

        // The logical adjustment comes first; the physical shift below
        // bypasses the session so the cursor moves exactly once.
        if let Some(session) = node.session.as_mut() {
            session.on_count_changed(index as isize, -1);
        }

        if node.map.is_realized(block) && node.map.item_count(block) - 1 == offset {
            // Last slot of the block; nothing behind it to shift forward.
            node.map.clear_entries(block, offset, 1);
        } else {
            let tail = node.map.item_count(block) - offset - 1;
            node.map.move_span(block, offset + 1, tail, block, offset);
        }
        node.map.add_count(block, -1);
        node.remove_and_coalesce(block);
        if let Some(session) = node.session.as_mut() {
            session.normalize(&node.map);
        }

        self.raise(
            generator,
            ItemsChangedAction::Removed,
            position,
            1,
            container_count,
        );

        if let Some(entry) = removed {
            self.unlink_container(host, &entry.container, &entry.item);
            if let Some(child) = self.nested_generator(generator, &entry.container) {
                self.node_mut(generator).nested.retain(|(_, id)| *id != child);
                self.free_subtree(child);
            }
        }

        self.hide_group_if_empty(generator, host);
        Ok(())
    }

    fn item_replaced(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        index: usize,
    ) -> Result<(), GeneratorError> {
        let (position, block, offset) = self.node(generator).map.position_from_index(index)?;
        // An unrealized item replaced by another unrealized item leaves the
        // map untouched.
        if !self.node(generator).map.is_realized(block) {
            return Ok(());
        }
        let Some(old) = self.node(generator).map.entry(block, offset).cloned() else {
            return Ok(());
        };

        let group = self.node(generator).group.clone();
        let new_item = host.view_item(group.as_ref(), index);

        if host.is_placeholder(&old.container) {
            // Rebind the placeholder rather than swapping containers.
            self.unlink_container(host, &old.container, &old.item);
            self.node_mut(generator)
                .map
                .set_entry(block, offset, new_item.clone(), old.container.clone());
            host.prepare_container(&old.container, &new_item);
            return Ok(());
        }

        let grouping = self.node(generator).is_grouping;
        let new_container = if grouping && host.is_group(&new_item) {
            self.container_for_group(generator, host, &new_item, None)
        } else {
            host.container_for_item(&new_item, None)
        };
        self.node_mut(generator)
            .map
            .set_entry(block, offset, new_item.clone(), new_container.clone());

        self.raise(generator, ItemsChangedAction::Changed, position, 1, 1);

        self.unlink_container(host, &old.container, &old.item);
        if let Some(child) = self.nested_generator(generator, &old.container) {
            self.node_mut(generator).nested.retain(|(_, id)| *id != child);
            self.free_subtree(child);
        }
        host.prepare_container(&new_container, &new_item);
        Ok(())
    }

    /// Produces (or rebinds) the header container for a group and the
    /// generator node behind it.
    fn container_for_group(
        &mut self,
        generator: GeneratorId,
        host: &mut dyn GeneratorHost<I, C>,
        group_item: &I,
        recycled: Option<C>,
    ) -> C {
        let should_hide = self.should_hide(generator, host, group_item);

        let reuse = recycled.as_ref().and_then(|header| {
            self.node(generator)
                .nested
                .iter()
                .find(|(c, _)| c == header)
                .map(|(_, id)| *id)
        });

        let (header, child) = match (recycled, reuse) {
            (Some(header), Some(child)) => {
                // Rebind the parked header and its generator to the new
                // group; its old containers drain into the shared pool.
                let node = self.node_mut(child);
                node.group = Some(group_item.clone());
                self.refresh_impl(child, host);
                self.node_mut(child).recycled = false;
                host.prepare_container(&header, group_item);
                (header, child)
            }
            (recycled, _) => {
                if recycled.is_some() {
                    rwarn!("recycled header has no generator attached, creating one");
                }
                let header = host.header_for_group(group_item, recycled);
                let level = self.node(generator).level;
                let pool = match self.node(generator).child_pool {
                    Some(pool) => pool,
                    None => {
                        let pool = self.alloc_pool();
                        self.node_mut(generator).child_pool = Some(pool);
                        pool
                    }
                };
                let child = self.alloc_node(Node::new(
                    level + 1,
                    Some(generator),
                    Some(header.clone()),
                    Some(group_item.clone()),
                    pool,
                ));
                self.remove_all_impl(child, host);
                self.node_mut(generator).nested.push((header.clone(), child));
                (header, child)
            }
        };

        let was_hidden = self.node(child).hidden;
        if should_hide != was_hidden {
            host.set_header_hidden(&header, should_hide);
        }
        self.node_mut(child).hidden = should_hide;
        header
    }

    /// Whether a header this generator produces should start out hidden.
    fn should_hide(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        group_item: &I,
    ) -> bool {
        let level = self.node(generator).level;
        host.group_style(level)
            .is_some_and(|style| style.hides_if_empty && host.view_len(Some(group_item)) == 0)
    }

    /// Hides this generator's header once its group has emptied.
    fn hide_group_if_empty(&mut self, generator: GeneratorId, host: &mut dyn GeneratorHost<I, C>) {
        let node = self.node(generator);
        if node.level == 0 || node.hidden {
            return;
        }
        let (Some(parent), Some(peer), Some(group)) =
            (node.parent, node.peer.clone(), node.group.clone())
        else {
            return;
        };
        if self.count(generator, host) != 0 {
            return;
        }
        if self.should_hide(parent, host, &group) {
            host.set_header_hidden(&peer, true);
            self.node_mut(generator).hidden = true;
        }
    }

    /// Unhides this generator's header once its group holds items again.
    fn unhide_if_refilled(&mut self, generator: GeneratorId, host: &mut dyn GeneratorHost<I, C>) {
        let node = self.node(generator);
        if !node.hidden {
            return;
        }
        let Some(peer) = node.peer.clone() else {
            return;
        };
        if self.count(generator, host) == 0 {
            return;
        }
        host.set_header_hidden(&peer, false);
        self.node_mut(generator).hidden = false;
    }

    /// Leaf count of the blocks before `stop`, expanding realized headers
    /// through their generators and unrealized groups through the host.
    fn count_to(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        stop: BlockId,
    ) -> usize {
        let node = self.node(generator);
        let mut count = 0;
        let mut current_index = 0;
        let mut block = node.map.next(BlockId::HEAD);
        while block != stop && block != BlockId::HEAD {
            let items = node.map.item_count(block);
            if node.map.is_realized(block) {
                count += self.realized_block_count(generator, host, block, items);
                current_index += items;
            } else if !node.is_grouping {
                count += items;
                current_index += items;
            } else {
                for _ in 0..items {
                    let item = host.view_item(node.group.as_ref(), current_index);
                    count += Self::items_count(host, &item);
                    current_index += 1;
                }
            }
            block = node.map.next(block);
        }
        count
    }

    /// Leaf count of the first `end` entries of a realized block.
    fn realized_block_count(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        block: BlockId,
        end: usize,
    ) -> usize {
        let node = self.node(generator);
        if !node.is_grouping {
            // Without grouping each entry counts as one, even groups.
            return end;
        }
        let mut count = 0;
        for offset in 0..end {
            let Some(entry) = node.map.entry(block, offset) else {
                continue;
            };
            if host.is_group(&entry.item) {
                match self.nested_generator(generator, &entry.container) {
                    Some(child) => count += self.count(child, host),
                    None => count += Self::items_count(host, &entry.item),
                }
            } else {
                count += 1;
            }
        }
        count
    }

    /// Leaf count of one item, descending through subgroups.
    fn items_count(host: &dyn GeneratorHost<I, C>, item: &I) -> usize {
        if !host.is_group(item) {
            return 1;
        }
        let len = host.view_len(Some(item));
        let mut count = 0;
        for i in 0..len {
            let child = host.view_item(Some(item), i);
            count += Self::items_count(host, &child);
        }
        count
    }

    /// Scans realized entries for a container or an item, starting at the
    /// last hit and wrapping around, descending into realized groups.
    /// Accumulates the absolute leaf index of the hit into `item_index`.
    fn linear_search(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        target_container: Option<&C>,
        target_item: Option<&I>,
        item_index: &mut isize,
    ) -> Option<(C, I)> {
        let node = self.get(generator)?;
        let map = &node.map;
        let hint = node.search_hint.get();

        // Move to the block the hint falls in.
        let mut index: isize = 0;
        let mut start_block = map.next(BlockId::HEAD);
        while index <= hint && start_block != BlockId::HEAD {
            index += map.item_count(start_block) as isize;
            start_block = map.next(start_block);
        }
        start_block = map.prev(start_block);
        index -= map.item_count(start_block) as isize;

        let start_offset = if map.is_realized(start_block) {
            let offset = hint - index;
            // Stale hints from since-removed items restart at the block head.
            if offset >= map.item_count(start_block) as isize {
                0
            } else {
                offset
            }
        } else {
            0
        };

        let mut block = start_block;
        let mut offset = start_offset;
        let mut end_offset = map.item_count(start_block) as isize;
        loop {
            if map.is_realized(block) {
                while offset < end_offset {
                    let entry = map.entry(block, offset as usize)?;
                    let mut hit = match (target_container, target_item) {
                        (Some(container), _) => entry.container == *container,
                        (None, Some(item)) => entry.item == *item,
                        (None, None) => false,
                    };
                    let mut result = if hit {
                        Some((entry.container.clone(), entry.item.clone()))
                    } else {
                        None
                    };

                    if node.is_grouping && !hit && host.is_group(&entry.item) {
                        if let Some(child) = self.nested_generator(generator, &entry.container) {
                            let mut nested_index = 0;
                            if let Some(found) = self.linear_search(
                                child,
                                host,
                                target_container,
                                target_item,
                                &mut nested_index,
                            ) {
                                hit = true;
                                result = Some(found);
                                *item_index += nested_index;
                            }
                        }
                    }

                    if hit {
                        node.search_hint.set(index + offset);
                        *item_index += self
                            .realized_block_count(generator, host, block, offset as usize)
                            as isize
                            + self.count_to(generator, host, block) as isize;
                        return result;
                    }
                    offset += 1;
                }

                if block == start_block && offset == start_offset {
                    return None;
                }
            }

            // Next block, wrapping past the head.
            index += map.item_count(block) as isize;
            offset = 0;
            block = map.next(block);
            if block == BlockId::HEAD {
                block = map.next(block);
                index = 0;
            }
            end_offset = map.item_count(block) as isize;
            if block == start_block {
                if map.is_realized(block) {
                    // Finish with the part of the start block before the hint.
                    end_offset = start_offset;
                } else {
                    return None;
                }
            }
        }
    }

    /// Block runs as `(is_realized, item_count)` pairs, in ring order.
    #[cfg(test)]
    pub(crate) fn block_runs(&self, generator: GeneratorId) -> Vec<(bool, usize)> {
        let mut runs = Vec::new();
        let Some(node) = self.get(generator) else {
            return runs;
        };
        let mut block = node.map.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            runs.push((node.map.is_realized(block), node.map.item_count(block)));
            block = node.map.next(block);
        }
        runs
    }

    #[cfg(test)]
    pub(crate) fn pool_len(&self, generator: GeneratorId) -> usize {
        self.get(generator)
            .map_or(0, |node| self.pools[node.pool].len())
    }

    /// Pool slots ever allocated, live and free alike.
    #[cfg(test)]
    pub(crate) fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn container_from_index_impl(
        &self,
        generator: GeneratorId,
        host: &dyn GeneratorHost<I, C>,
        mut index: isize,
    ) -> Option<C> {
        let node = self.get(generator)?;
        let map = &node.map;

        let groups_len = if node.is_grouping {
            let len = host.view_len(node.group.as_ref());
            if len == 0 {
                return None;
            }
            len
        } else {
            0
        };

        let mut entry_index = 0;
        let mut group_index = 0;
        let mut block = map.next(BlockId::HEAD);
        while block != BlockId::HEAD {
            if !node.is_grouping {
                if index < map.item_count(block) as isize {
                    return map.entry(block, index as usize).map(|e| e.container.clone());
                }
                index -= map.item_count(block) as isize;
                block = map.next(block);
                continue;
            }

            if entry_index >= map.item_count(block) {
                entry_index = 0;
                block = map.next(block);
                continue;
            }

            let mut candidate = None;
            match map.entry(block, entry_index) {
                Some(entry) => {
                    match self.nested_generator(generator, &entry.container) {
                        Some(child) => {
                            group_index += 1;
                            let count = self.count(child, host) as isize;
                            if index < count {
                                return self.container_from_index_impl(child, host, index);
                            }
                            index -= count;
                        }
                        None => {
                            index -= 1;
                            candidate = Some(entry.container.clone());
                        }
                    }
                }
                None => {
                    if group_index >= groups_len {
                        return None;
                    }
                    let item = host.view_item(node.group.as_ref(), group_index);
                    if host.is_group(&item) {
                        group_index += 1;
                        index -= host.view_len(Some(&item)) as isize;
                    } else {
                        index -= 1;
                    }
                }
            }
            if index < 0 {
                return candidate;
            }
            entry_index += 1;
        }
        None
    }
}
