//! A headless item-to-container realization engine for virtualizing panels.
//!
//! The [`ItemContainerGenerator`] tracks which items of a data view have UI
//! containers, hands containers out one at a time during layout, and keeps
//! every outstanding position stable while the underlying collection
//! changes. The bookkeeping lives in a compact run-length map: contiguous
//! realized items share a block with their containers, and contiguous
//! unrealized items collapse into a bare count.
//!
//! It is UI-agnostic. The panel layer implements [`GeneratorHost`] to
//! provide:
//! - the item view (flat or grouped)
//! - container creation, preparation and teardown
//! - recycling policy and group header chrome
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod block;
mod error;
mod generator;
mod host;
mod macros;
mod session;
mod types;


pub use error::GeneratorError;
pub use generator::ItemContainerGenerator;
pub use host::GeneratorHost;
pub use types::{
    GeneratorDirection, GeneratorId, GeneratorPosition, GroupStyle, ItemsChanged,
    ItemsChangedAction, ItemsChangedCallback, SourceChange,
};
