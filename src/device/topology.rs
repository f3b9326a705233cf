//! Channel topology of an IoTaWatt device
//!
//! The device reports its channels as one ordered list. By convention the
//! first entry is the voltage reference and the last `numout` entries are
//! outputs; everything in between is a current/power input. The convention
//! is checked where the device gives us enough information to check it.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::query::QueryApi;
use super::transport::Transport;
use super::types::StatusType;
use crate::errors::IotaWattError;

const VOLTAGE_UNIT: &str = "volts";

/// One entry of the `show=series` channel list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Channel names partitioned into voltage, current/power and output channels
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSet {
    pub voltage: Vec<String>,
    pub current: Vec<String>,
    pub output: Vec<String>,
}

impl ChannelSet {
    /// Split an ordered channel list with `numout` trailing outputs.
    ///
    /// # Errors
    /// `Topology` if the list cannot hold a voltage channel plus `numout`
    /// outputs, or if the first channel reports a unit other than volts.
    pub fn partition(channels: &[ChannelInfo], numout: usize) -> Result<Self, IotaWattError> {
        if channels.len() < numout + 1 {
            return Err(IotaWattError::Topology(format!(
                "{} channels reported but {} outputs plus a voltage input expected",
                channels.len(),
                numout
            )));
        }

        let first = &channels[0];
        match first.unit.as_deref() {
            Some(unit) if !unit.eq_ignore_ascii_case(VOLTAGE_UNIT) => {
                return Err(IotaWattError::Topology(format!(
                    "first channel '{}' has unit '{}', expected a voltage input",
                    first.name, unit
                )));
            }
            Some(_) => {}
            None => debug!("Channel '{}' has no unit, assuming voltage", first.name),
        }

        let names: Vec<String> = channels.iter().map(|c| c.name.clone()).collect();
        let split = names.len() - numout;
        Ok(Self {
            voltage: names[..1].to_vec(),
            current: names[1..split].to_vec(),
            output: names[split..].to_vec(),
        })
    }

    /// All channel names in device order
    pub fn all(&self) -> Vec<String> {
        self.voltage
            .iter()
            .chain(&self.current)
            .chain(&self.output)
            .cloned()
            .collect()
    }

    pub fn is_voltage(&self, name: &str) -> bool {
        self.voltage.iter().any(|c| c == name)
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current.iter().any(|c| c == name)
    }
}

/// Fetch the ordered channel list (`query?show=series`)
pub fn channel_info<T: Transport>(
    api: &mut QueryApi<T>,
    retry: u32,
) -> Result<Vec<ChannelInfo>, IotaWattError> {
    const QUERY: &str = "query?show=series";
    let json = api.query(QUERY, retry)?;
    let series = json
        .get("series")
        .cloned()
        .ok_or_else(|| IotaWattError::UnexpectedResponse {
            query: QUERY.to_string(),
            reason: "missing 'series'".to_string(),
        })?;
    serde_json::from_value(series).map_err(|e| IotaWattError::UnexpectedResponse {
        query: QUERY.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch one status section (`status?<type>`); an empty response is an empty list
pub fn status<T: Transport>(
    api: &mut QueryApi<T>,
    stype: StatusType,
    retry: u32,
) -> Result<Value, IotaWattError> {
    let query = format!("status?{}", stype);
    let json = api.query(&query, retry)?;
    if is_empty(&json) {
        return Ok(Value::Array(Vec::new()));
    }
    json.get(stype.as_str())
        .cloned()
        .ok_or_else(|| IotaWattError::UnexpectedResponse {
            query,
            reason: format!("missing '{}'", stype),
        })
}

fn is_empty(json: &Value) -> bool {
    match json {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Query the device once and partition its channels
pub fn resolve<T: Transport>(api: &mut QueryApi<T>, retry: u32) -> Result<ChannelSet, IotaWattError> {
    let channels = channel_info(api, retry)?;
    let numout = match status(api, StatusType::Outputs, retry)? {
        Value::Array(outputs) => outputs.len(),
        other => {
            return Err(IotaWattError::UnexpectedResponse {
                query: "status?outputs".to_string(),
                reason: format!("expected a list of outputs, got {}", other),
            })
        }
    };

    let set = ChannelSet::partition(&channels, numout)?;
    info!(
        "Resolved {} voltage, {} current/power and {} output channels",
        set.voltage.len(),
        set.current.len(),
        set.output.len()
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(name: &str, unit: Option<&str>) -> ChannelInfo {
        ChannelInfo {
            name: name.to_string(),
            unit: unit.map(str::to_string),
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partition_positional() {
        let channels = vec![
            info("Mains", Some("Volts")),
            info("Oven", Some("Watts")),
            info("Dryer", Some("Watts")),
            info("Heat", Some("Watts")),
            info("Total", Some("Watts")),
            info("Solar", Some("Watts")),
        ];
        let set = ChannelSet::partition(&channels, 2).unwrap();
        assert_eq!(set.voltage, names(&["Mains"]));
        assert_eq!(set.current, names(&["Oven", "Dryer", "Heat"]));
        assert_eq!(set.output, names(&["Total", "Solar"]));
        assert_eq!(
            set.all(),
            channels.iter().map(|c| c.name.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_partition_without_outputs() {
        let channels = vec![info("Mains", None), info("Oven", None)];
        let set = ChannelSet::partition(&channels, 0).unwrap();
        assert_eq!(set.voltage, names(&["Mains"]));
        assert_eq!(set.current, names(&["Oven"]));
        assert!(set.output.is_empty());
    }

    #[test]
    fn test_partition_rejects_short_list() {
        let channels = vec![info("Mains", None), info("Total", None)];
        assert!(matches!(
            ChannelSet::partition(&channels, 2),
            Err(IotaWattError::Topology(_))
        ));
    }

    #[test]
    fn test_partition_rejects_non_voltage_first() {
        let channels = vec![info("Oven", Some("Watts")), info("Mains", Some("Volts"))];
        assert!(matches!(
            ChannelSet::partition(&channels, 0),
            Err(IotaWattError::Topology(_))
        ));
    }

    #[test]
    fn test_channel_info_deserializes_without_unit() {
        let info: Vec<ChannelInfo> =
            serde_json::from_str(r#"[{"name":"Mains","unit":"Volts"},{"name":"Oven"}]"#).unwrap();
        assert_eq!(info[0].unit.as_deref(), Some("Volts"));
        assert_eq!(info[1].unit, None);
    }

    proptest! {
        #[test]
        fn proptest_partition_lengths_and_order(
            len in 1usize..40,
            outputs in 0usize..40,
            unit in prop_oneof![Just(None), Just(Some("Volts")), Just(Some("volts"))],
        ) {
            let numout = outputs % len;
            let channels: Vec<ChannelInfo> = (0..len)
                .map(|i| info(&format!("ch{}", i), if i == 0 { unit } else { Some("Watts") }))
                .collect();
            let set = ChannelSet::partition(&channels, numout).unwrap();

            prop_assert_eq!(set.voltage.len(), 1);
            prop_assert_eq!(set.current.len(), len - 1 - numout);
            prop_assert_eq!(set.output.len(), numout);
            prop_assert_eq!(
                set.all(),
                channels.iter().map(|c| c.name.clone()).collect::<Vec<_>>()
            );
        }
    }
}
