use thiserror::Error;

/// Errors reported by [`crate::ItemContainerGenerator`].
///
/// These are contract violations by the caller, not internal failures; the
/// map is left untouched when one is returned from a validation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("a generation session is already in progress")]
    GenerationInProgress,
    #[error("no generation session is in progress")]
    GenerationNotInProgress,
    #[error("remove requires a position with offset 0")]
    RemoveRequiresOffsetZero,
    #[error("remove requires a positive count")]
    RemoveRequiresPositiveCount,
    #[error("cannot remove items that have no containers")]
    CannotRemoveUnrealizedItems,
    #[error("container is already in the recycle pool")]
    ContainerAlreadyInPool,
    #[error("item index {0} is out of range")]
    IndexOutOfRange(isize),
    #[error("unknown generator id")]
    UnknownGenerator,
    #[error("insertion notification without a matching pre-change notification")]
    UnpairedInsertNotification,
}
