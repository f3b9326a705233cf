//! Downloaded channel data and derived physical quantities
//!
//! The matrix holds every fetched column except the timestamp, in the order
//! `[volts..., hertz..., watts..., amps...]`. Derived quantities (energy,
//! apparent and reactive power, power factor) are computed on demand.

use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use crate::errors::IotaWattError;

/// Watt-hours accumulated by one watt over one native 5 second sample
pub const WH_PER_WATT_SAMPLE: f64 = 5.0 / 3600.0;

/// Units a channel can be read in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Volts,
    Hertz,
    Watts,
    Amps,
    Wh,
    Va,
    Var,
    Varh,
    Pf,
}

impl Units {
    pub const VOLTAGE: [Units; 2] = [Units::Volts, Units::Hertz];
    pub const POWER: [Units; 7] = [
        Units::Watts,
        Units::Amps,
        Units::Wh,
        Units::Va,
        Units::Var,
        Units::Varh,
        Units::Pf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Volts => "volts",
            Units::Hertz => "hertz",
            Units::Watts => "watts",
            Units::Amps => "amps",
            Units::Wh => "wh",
            Units::Va => "va",
            Units::Var => "var",
            Units::Varh => "varh",
            Units::Pf => "pf",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::VOLTAGE
            .into_iter()
            .chain(Self::POWER)
            .find(|u| u.as_str() == name)
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Units::from_name(s).ok_or_else(|| format!("unknown units '{}'", s))
    }
}

/// Descriptive part of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMeta {
    /// Start of the requested range, as given by the caller
    pub begin: String,
    /// End of the requested range, as given by the caller
    pub end: String,
    pub voltage_channels: Vec<String>,
    pub current_channels: Vec<String>,
    /// Fractional digits requested from the device
    pub frac_digits: u32,
    /// Matrix column names (timestamp column excluded)
    pub columns: Vec<String>,
}

/// Channel data downloaded from an IoTaWatt device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    meta: DatasetMeta,
    time: Array1<i64>,
    data: Array2<f64>,
}

/// sqrt(s^2 - p^2), clamped at zero when noise makes the difference negative
fn reactive(apparent: f64, real: f64) -> f64 {
    let radicand = apparent * apparent - real * real;
    if radicand < 0.0 {
        0.0
    } else {
        radicand.sqrt()
    }
}

impl Dataset {
    /// Assemble a dataset, checking that metadata and arrays agree
    pub fn new(
        meta: DatasetMeta,
        time: Array1<i64>,
        data: Array2<f64>,
    ) -> Result<Self, IotaWattError> {
        let dataset = Self { meta, time, data };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Build from a flat row-major buffer of `time.len()` rows
    pub fn from_rows(
        meta: DatasetMeta,
        time: Vec<i64>,
        values: Vec<f64>,
    ) -> Result<Self, IotaWattError> {
        let shape = (time.len(), meta.columns.len());
        let data = Array2::from_shape_vec(shape, values)
            .map_err(|e| IotaWattError::Other(anyhow::anyhow!("row buffer shape: {}", e)))?;
        Self::new(meta, Array1::from(time), data)
    }

    pub(crate) fn validate(&self) -> Result<(), IotaWattError> {
        let expected = 2 * (self.meta.voltage_channels.len() + self.meta.current_channels.len());
        if self.meta.columns.len() != expected {
            return Err(IotaWattError::Other(anyhow::anyhow!(
                "{} column names for {} expected columns",
                self.meta.columns.len(),
                expected
            )));
        }
        if self.data.ncols() != expected {
            return Err(IotaWattError::Other(anyhow::anyhow!(
                "data has {} columns, expected {}",
                self.data.ncols(),
                expected
            )));
        }
        if self.time.len() != self.data.nrows() {
            return Err(IotaWattError::Other(anyhow::anyhow!(
                "{} timestamps for {} data rows",
                self.time.len(),
                self.data.nrows()
            )));
        }
        Ok(())
    }

    pub fn meta(&self) -> &DatasetMeta {
        &self.meta
    }

    pub fn begin(&self) -> &str {
        &self.meta.begin
    }

    pub fn end(&self) -> &str {
        &self.meta.end
    }

    pub fn voltage_channels(&self) -> &[String] {
        &self.meta.voltage_channels
    }

    pub fn current_channels(&self) -> &[String] {
        &self.meta.current_channels
    }

    pub fn frac_digits(&self) -> u32 {
        self.meta.frac_digits
    }

    pub fn columns(&self) -> &[String] {
        &self.meta.columns
    }

    /// Sample times as Unix timestamps
    pub fn time(&self) -> &Array1<i64> {
        &self.time
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn column(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.column(index)
    }

    /// Get data from channel `name` in units named `units`.
    ///
    /// Valid units are `volts` and `hertz` for voltage channels and
    /// `watts`, `amps`, `wh`, `va`, `var`, `varh`, `pf` for current/power
    /// channels.
    pub fn channel_data(&self, name: &str, units: &str) -> Result<Array1<f64>, IotaWattError> {
        let unsupported = || IotaWattError::UnsupportedUnits {
            channel: name.to_string(),
            units: units.to_string(),
        };
        if !self.has_channel(name) {
            return Err(IotaWattError::UnknownChannel(name.to_string()));
        }
        let units = Units::from_name(units).ok_or_else(unsupported)?;
        self.channel_values(name, units)
    }

    fn has_channel(&self, name: &str) -> bool {
        self.meta.voltage_channels.iter().any(|c| c == name)
            || self.meta.current_channels.iter().any(|c| c == name)
    }

    /// Typed form of [`Dataset::channel_data`]
    pub fn channel_values(&self, name: &str, units: Units) -> Result<Array1<f64>, IotaWattError> {
        let nv = self.meta.voltage_channels.len();
        let nc = self.meta.current_channels.len();
        let unsupported = || IotaWattError::UnsupportedUnits {
            channel: name.to_string(),
            units: units.to_string(),
        };

        if let Some(idx) = self.meta.voltage_channels.iter().position(|c| c == name) {
            return match units {
                Units::Volts => Ok(self.column(idx).to_owned()),
                Units::Hertz => Ok(self.column(nv + idx).to_owned()),
                _ => Err(unsupported()),
            };
        }

        let idx = self
            .meta
            .current_channels
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| IotaWattError::UnknownChannel(name.to_string()))?;
        if !Units::POWER.contains(&units) {
            return Err(unsupported());
        }

        // Power channels are referenced to the first voltage input
        let v = self.column(0);
        let w = self.column(2 * nv + idx);
        let a = self.column(2 * nv + nc + idx);

        let values = match units {
            Units::Watts => w.to_owned(),
            Units::Amps => a.to_owned(),
            Units::Wh => &w * WH_PER_WATT_SAMPLE,
            Units::Va => &v * &a,
            Units::Var => {
                let va = &v * &a;
                Zip::from(&va).and(&w).map_collect(|&s, &p| reactive(s, p))
            }
            Units::Varh => {
                let vah = &v * &a * WH_PER_WATT_SAMPLE;
                let wh = &w * WH_PER_WATT_SAMPLE;
                Zip::from(&vah).and(&wh).map_collect(|&s, &p| reactive(s, p))
            }
            Units::Pf => &w / &(&v * &a),
            Units::Volts | Units::Hertz => return Err(unsupported()),
        };
        Ok(values)
    }
}
