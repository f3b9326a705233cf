//! Downloaded datasets: unit conversion and persistence

pub mod dataset;
pub mod store;

pub use dataset::{Dataset, DatasetMeta, Units};
