//! Request-side types for the IoTaWatt Query API

use std::str::FromStr;

/// Native sampling granularity of the device in seconds
pub const NATIVE_INTERVAL_SECS: i64 = 5;

/// Section selector for `status?<type>` queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    Inputs,
    Outputs,
    Wifi,
    Stats,
    Datalogs,
}

impl StatusType {
    pub const ALL: [StatusType; 5] = [
        StatusType::Inputs,
        StatusType::Outputs,
        StatusType::Wifi,
        StatusType::Stats,
        StatusType::Datalogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Inputs => "inputs",
            StatusType::Outputs => "outputs",
            StatusType::Wifi => "wifi",
            StatusType::Stats => "stats",
            StatusType::Datalogs => "datalogs",
        }
    }
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown status type '{}'", s))
    }
}

/// One bounded request `[start, end)` in Unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: i64,
    pub end: i64,
}

impl QueryWindow {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Progress report handed to the fetch callback before each window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowProgress {
    pub begin: i64,
    pub end: i64,
    pub window: QueryWindow,
}

impl WindowProgress {
    /// Fraction of the requested range already behind the cursor
    pub fn fraction(&self) -> f64 {
        let total = (self.end - self.begin) as f64;
        if total <= 0.0 {
            return 1.0;
        }
        ((self.window.start - self.begin) as f64 / total).clamp(0.0, 1.0)
    }
}

/// Parameters of one fetch session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Current/power channels to download; `None` selects all of them
    pub channels: Option<Vec<String>>,
    /// Grouping interval in seconds, a positive multiple of 5
    pub interval: i64,
    /// Fractional digits requested for every value
    pub frac_digits: u32,
    /// Attempts per query
    pub retry: u32,
    /// Interpret offset-less begin/end strings as UTC instead of local time
    pub utc: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            channels: None,
            interval: NATIVE_INTERVAL_SECS,
            frac_digits: 3,
            retry: 3,
            utc: false,
        }
    }
}
