//! pblk on-media meta data: codec, address resolution, instance discovery,
//! line scanning and verification.

pub mod check;
pub mod discover;
pub mod meta;
pub mod report;
pub mod resolve;
pub mod scan;

#[cfg(test)]
pub mod fixtures;

pub use discover::{discover_instances, InstanceDesc};
pub use scan::scan_instance;
