//! IoTaWatt device access module
//!
//! Provides a high-level interface to query IoTaWatt status and recorded data
//! via the HTTP Query API.

pub mod client;
pub mod fetch;
pub mod query;
pub mod topology;
pub mod transport;
pub mod types;

pub use client::IotaWattClient;
pub use query::{FileTransactionLog, QueryApi, QueryEvent, TransactionLog};
pub use topology::{ChannelInfo, ChannelSet};
pub use transport::{Credentials, HttpResponse, HttpTransport, Transport};
pub use types::*;
