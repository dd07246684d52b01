// Device discovery and classification
//
// - catalog.rs: enumeration source, classification, partition filtering

pub mod catalog;

pub use catalog::{classify, BlockDeviceSource, DeviceCatalog, LsblkSource, RawBlockDevice};
