//! IoTaWatt client
//!
//! High-level interface to the IoTaWatt Query API

use std::ops::ControlFlow;

use serde_json::Value;
use tracing::info;

use super::fetch;
use super::query::{FileTransactionLog, QueryApi};
use super::topology::{self, ChannelInfo, ChannelSet};
use super::transport::{Credentials, HttpTransport, Transport};
use super::types::{FetchOptions, StatusType, WindowProgress};
use crate::config::DeviceConfig;
use crate::data::Dataset;
use crate::errors::IotaWattError;

/// IoTaWatt client with the device's channel topology resolved at construction
pub struct IotaWattClient<T: Transport = HttpTransport> {
    api: QueryApi<T>,
    channels: ChannelSet,
    retry: u32,
}

impl IotaWattClient<HttpTransport> {
    /// Connect to the device described by `config`
    pub fn new(config: &DeviceConfig) -> Result<Self, IotaWattError> {
        let credentials = config.password.as_ref().map(|password| Credentials {
            username: config.username.clone(),
            password: password.clone(),
        });
        let transport = HttpTransport::new(config.timeout, credentials)
            .map_err(|e| IotaWattError::Other(e.into()))?;

        let mut api = QueryApi::new(&config.url, transport);
        if let Some(path) = &config.debug_log {
            let log = FileTransactionLog::open(path).map_err(|e| {
                IotaWattError::Other(anyhow::anyhow!(
                    "opening transaction log {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!("Recording transactions to {}", path.display());
            api = api.with_log(Box::new(log));
        }

        info!("Connecting to IoTaWatt at {}...", config.url);
        Self::with_api(api, config.retry)
    }
}

impl<T: Transport> IotaWattClient<T> {
    /// Build a client over an existing query API, resolving the channel topology
    pub fn with_api(mut api: QueryApi<T>, retry: u32) -> Result<Self, IotaWattError> {
        let channels = topology::resolve(&mut api, retry)?;
        Ok(Self {
            api,
            channels,
            retry,
        })
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Details of the device input and output channels
    pub fn channel_info(&mut self) -> Result<Vec<ChannelInfo>, IotaWattError> {
        topology::channel_info(&mut self.api, self.retry)
    }

    /// Device status section `stype`
    pub fn status(&mut self, stype: StatusType) -> Result<Value, IotaWattError> {
        topology::status(&mut self.api, stype, self.retry)
    }

    /// Download recorded data without progress reporting
    pub fn channel_data(
        &mut self,
        begin: &str,
        end: &str,
        options: &FetchOptions,
    ) -> Result<Dataset, IotaWattError> {
        self.channel_data_with_progress(begin, end, options, |_| ControlFlow::Continue(()))
    }

    /// Download recorded data for `[begin, end)`.
    ///
    /// `options.channels` defaults to every current/power channel. The
    /// callback runs before each window and may cancel the download.
    pub fn channel_data_with_progress<F>(
        &mut self,
        begin: &str,
        end: &str,
        options: &FetchOptions,
        progress: F,
    ) -> Result<Dataset, IotaWattError>
    where
        F: FnMut(&WindowProgress) -> ControlFlow<()>,
    {
        let channels = match &options.channels {
            Some(selected) => {
                if let Some(unknown) = selected.iter().find(|c| !self.channels.is_current(c)) {
                    return Err(IotaWattError::UnknownChannel(unknown.clone()));
                }
                selected.clone()
            }
            None => self.channels.current.clone(),
        };

        fetch::fetch(
            &mut self.api,
            &self.channels.voltage,
            channels,
            begin,
            end,
            options,
            progress,
        )
    }
}
