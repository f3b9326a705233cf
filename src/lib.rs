//! IoTaWatt Query API access
//!
//! Downloads recorded channel data from an IoTaWatt energy monitor in
//! bounded windows and exposes it in physical units.

pub mod config;
pub mod data;
pub mod device;
pub mod errors;
pub mod table;
pub mod timestamp;

pub use config::Config;
pub use data::{Dataset, Units};
pub use device::{FetchOptions, IotaWattClient};
pub use errors::IotaWattError;
