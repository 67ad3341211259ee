//! The host adapter.
//!
//! The generator is headless: it never touches a widget tree or a real
//! collection. Everything it needs from the outside world comes through
//! [`GeneratorHost`], implemented by the owning items control. `I` is the
//! host's item handle and `C` its container handle; both are opaque here
//! and only cloned and compared.

use crate::types::GroupStyle;

pub trait GeneratorHost<I, C> {
    /// Length of the view the generator draws items from. `group` is `None`
    /// for the root view and the group item for a nested level.
    fn view_len(&self, group: Option<&I>) -> usize;

    /// Item at `index` within the given view.
    fn view_item(&self, group: Option<&I>, index: usize) -> I;

    /// Whether an item is a collection group rather than a leaf.
    fn is_group(&self, item: &I) -> bool {
        let _ = item;
        false
    }

    /// Whether the root view currently exposes collection groups.
    fn has_collection_groups(&self) -> bool {
        false
    }

    /// Grouping style for a nesting level, or `None` when items at that
    /// level are generated flat.
    fn group_style(&self, level: usize) -> Option<GroupStyle> {
        let _ = level;
        None
    }

    /// Items that serve as their own container bypass the recycle pool.
    fn is_item_its_own_container(&self, item: &I) -> bool {
        let _ = item;
        false
    }

    /// Produces a container for a leaf item. When `recycled` is provided the
    /// host rebinds that container instead of creating one.
    fn container_for_item(&mut self, item: &I, recycled: Option<C>) -> C;

    /// Produces a header container for a group item.
    fn header_for_group(&mut self, group: &I, recycled: Option<C>) -> C;

    /// Applies item state to a container (template, content, selection).
    fn prepare_container(&mut self, container: &C, item: &I) {
        let _ = (container, item);
    }

    /// Severs a container from its item once it leaves the map.
    fn clear_container(&mut self, container: &C, item: &I) {
        let _ = (container, item);
    }

    /// Whether a pooled container may be rebound to `item`.
    fn can_recycle(&self, container: &C, item: &I) -> bool {
        let _ = (container, item);
        true
    }

    /// Whether a container is an unbound placeholder awaiting its item.
    fn is_placeholder(&self, container: &C) -> bool {
        let _ = container;
        false
    }

    /// Whether a container is animating out and must not be cleared yet.
    /// Deferred containers are finished via
    /// [`crate::ItemContainerGenerator::complete_deferred_unlink`].
    fn has_pending_transition(&self, container: &C) -> bool {
        let _ = container;
        false
    }

    /// Called when a container enters the recycle pool.
    fn container_recycled(&mut self, container: &C) {
        let _ = container;
    }

    /// Called when a container leaves the recycle pool for reuse.
    fn container_reused(&mut self, container: &C) {
        let _ = container;
    }

    /// Shows or hides a group header whose group emptied or refilled.
    fn set_header_hidden(&mut self, container: &C, hidden: bool) {
        let _ = (container, hidden);
    }
}
