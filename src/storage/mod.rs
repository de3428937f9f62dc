//! Storage Module
//!
//! The ordered segment set plus background merging.
//!
//! ## Responsibilities
//! - Discover and recover segment files on startup
//! - Point lookups newest → oldest, first hit wins
//! - Rotate the active segment when it exceeds the size limit
//! - Merge sealed segments, dropping shadowed entries and tombstones
//!
//! ## Segment Order
//! ```text
//! ┌──────────────────┬────────────────┬───────┬────────────────┬────────────────────┐
//! │ segment.current  │ segment.<N>    │  ...  │ segment.<M>    │ segment.<W>.merged │
//! │ (active, newest) │ (sealed, N>M)  │       │ (sealed)       │ (oldest)           │
//! └──────────────────┴────────────────┴───────┴────────────────┴────────────────────┘
//! ```

mod compactor;
mod manager;

pub use compactor::{Compactor, MergeStats};
pub use manager::SegmentManager;
