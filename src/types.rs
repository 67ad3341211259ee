use alloc::sync::Arc;

/// Addresses an item whether or not it currently has a container.
///
/// `index` is a *container* index: `-1` means "before any realized container",
/// a non-negative value addresses a realized container directly. `offset`
/// counts items (realized or not) past that anchor in the requested
/// direction. With `index == -1`, a non-negative `offset` is relative to the
/// start of the sequence and a negative `offset` is relative to its end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeneratorPosition {
    pub index: isize,
    pub offset: isize,
}

impl GeneratorPosition {
    pub const fn new(index: isize, offset: isize) -> Self {
        Self { index, offset }
    }

    /// The position before any realized container: `(-1, 0)`.
    pub const fn before_first() -> Self {
        Self {
            index: -1,
            offset: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GeneratorDirection {
    Forward,
    Backward,
}

/// What happened to the item collection, as reported by [`ItemsChanged`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ItemsChangedAction {
    Inserted,
    Removed,
    Changed,
    Reset,
}

/// Payload of the public "items changed" notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemsChanged {
    pub action: ItemsChangedAction,
    pub position: GeneratorPosition,
    /// Number of items affected.
    pub item_count: usize,
    /// Number of containers affected (0 when the slot was unrealized).
    pub container_count: usize,
}

/// A change event coming from the source collection.
///
/// The host forwards these to [`crate::ItemContainerGenerator::source_changing`]
/// (before any other consumer reacts) and then to
/// [`crate::ItemContainerGenerator::source_changed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceChange {
    Inserted { index: usize },
    Removed { index: usize },
    Replaced { index: usize },
    Reset,
}

/// Identifies one generator instance inside the grouping tree.
///
/// The root generator is [`GeneratorId::ROOT`]; nested ids are handed out as
/// group headers are prepared and stay valid until the header is discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeneratorId(pub(crate) u32);

impl GeneratorId {
    pub const ROOT: GeneratorId = GeneratorId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A callback fired after the map has been updated for a source change.
///
/// The first argument identifies the generator instance that changed.
pub type ItemsChangedCallback = Arc<dyn Fn(GeneratorId, &ItemsChanged) + Send + Sync>;

/// Per-level grouping style, as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupStyle {
    /// Hide a group's header while the group holds no items.
    pub hides_if_empty: bool,
}
