//! Side metadata read by the barrier fast paths.

pub mod side_metadata;

pub use self::side_metadata::{SideMetadataSpec, SideMetadataTable};
