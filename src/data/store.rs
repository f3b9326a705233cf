//! Dataset persistence
//!
//! Datasets are stored as named MessagePack maps, which round-trip every
//! field (including the f64 matrix) bit for bit.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::dataset::Dataset;
use crate::errors::IotaWattError;

pub const FILE_EXTENSION: &str = "msgpack";

fn storage_error(path: &Path, e: impl std::fmt::Display) -> IotaWattError {
    IotaWattError::Storage(format!("{}: {}", path.display(), e))
}

impl Dataset {
    /// Save the dataset to `path`, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IotaWattError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
        }
        let file = File::create(path).map_err(|e| storage_error(path, e))?;
        let mut writer = BufWriter::new(file);
        rmp_serde::encode::write_named(&mut writer, self).map_err(|e| storage_error(path, e))?;
        writer.flush().map_err(|e| storage_error(path, e))?;
        info!("Saved {} rows to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a dataset previously written by [`Dataset::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IotaWattError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| storage_error(path, e))?;
        let dataset: Dataset = rmp_serde::decode::from_read(BufReader::new(file))
            .map_err(|e| storage_error(path, e))?;
        dataset.validate()?;
        Ok(dataset)
    }
}

/// File name derived from the dataset's begin and end strings
pub fn default_file_name(dataset: &Dataset) -> PathBuf {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    };
    PathBuf::from(format!(
        "iotawatt_{}_{}.{}",
        clean(dataset.begin()),
        clean(dataset.end()),
        FILE_EXTENSION
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::DatasetMeta;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn sample() -> Dataset {
        let meta = DatasetMeta {
            begin: "2024-01-02 10:00".to_string(),
            end: "2024-01-02 11:00".to_string(),
            voltage_channels: vec!["Mains".to_string()],
            current_channels: vec!["Oven".to_string()],
            frac_digits: 2,
            columns: vec![
                "Mains.volts.d2".to_string(),
                "Mains.hz.d2".to_string(),
                "Oven.watts.d2".to_string(),
                "Oven.amps.d2".to_string(),
            ],
        };
        Dataset::new(
            meta,
            array![1_704_189_600, 1_704_189_605],
            array![[120.13, 60.01, 0.1, 0.3], [119.87, 59.99, 1234.56, 10.29]],
        )
        .unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.msgpack");
        let ds = sample();
        ds.save(&path).unwrap();
        assert_eq!(Dataset::load(&path).unwrap(), ds);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Dataset::load(dir.path().join("absent.msgpack")),
            Err(IotaWattError::Storage(_))
        ));
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            default_file_name(&sample()),
            PathBuf::from("iotawatt_2024-01-02_10_00_2024-01-02_11_00.msgpack")
        );
    }
}
