//! Windowed time-series retrieval
//!
//! The device returns the whole requested range in one response, so the
//! range is walked in windows small enough to keep every response under
//! [`MAX_RESPONSE_BYTES`]. The device occasionally emits truncated rows:
//! a bad row in the middle of a window keeps the rows before it and resumes
//! at the bad row; a bad first row discards the block and retries the same
//! cursor a bounded number of times.

use std::ops::ControlFlow;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::query::QueryApi;
use super::transport::Transport;
use super::types::{FetchOptions, QueryWindow, WindowProgress, NATIVE_INTERVAL_SECS};
use crate::data::dataset::{Dataset, DatasetMeta};
use crate::errors::IotaWattError;
use crate::timestamp::string_to_timestamp;

/// Upper bound on the size of a single query response in bytes
pub const MAX_RESPONSE_BYTES: usize = 100_000;

pub const TIME_COLUMN: &str = "time.utc.unix";

/// Repeated bad first rows tolerated at one cursor position
const MAX_CURSOR_RETRIES: u32 = 2;

/// Requested column list: timestamp, volts and hertz per voltage channel,
/// then watts and amps per selected channel
pub fn select_columns(voltage: &[String], channels: &[String], frac_digits: u32) -> Vec<String> {
    let mut columns = Vec::with_capacity(1 + 2 * (voltage.len() + channels.len()));
    columns.push(TIME_COLUMN.to_string());
    for (names, quantity) in [
        (voltage, "volts"),
        (voltage, "hz"),
        (channels, "watts"),
        (channels, "amps"),
    ] {
        columns.extend(
            names
                .iter()
                .map(|c| format!("{}.{}.d{}", c, quantity, frac_digits)),
        );
    }
    columns
}

/// Estimated size of one response row in bytes
pub fn estimated_row_size(n_voltage: usize, n_channels: usize, frac_digits: u32) -> usize {
    let field = 7 + frac_digits as usize;
    14 + n_voltage * 2 * field + n_channels * 2 * field
}

/// Rows per window that keep a response under [`MAX_RESPONSE_BYTES`]
pub fn max_rows_per_window(row_size: usize) -> i64 {
    (MAX_RESPONSE_BYTES / row_size.max(1)).max(1) as i64
}

/// Partition of `[begin, end)` into windows of at most `step` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub begin: i64,
    pub end: i64,
    pub step: i64,
}

impl WindowPlan {
    /// The step never exceeds the whole range, so huge intervals cannot
    /// overflow the window arithmetic
    pub fn new(begin: i64, end: i64, interval: i64, max_rows: i64) -> Self {
        let span = end.saturating_sub(begin).max(1);
        Self {
            begin,
            end,
            step: interval.saturating_mul(max_rows).clamp(1, span),
        }
    }

    /// Window starting at cursor `t0`
    pub fn window_from(&self, t0: i64) -> QueryWindow {
        QueryWindow {
            start: t0,
            end: self.end.min(t0.saturating_add(self.step)),
        }
    }

    /// Windows visited when every window is accepted whole
    pub fn windows(&self) -> impl Iterator<Item = QueryWindow> + '_ {
        std::iter::successors(Some(self.begin), move |&t0| Some(self.window_from(t0).end))
            .take_while(move |&t0| t0 < self.end)
            .map(move |t0| self.window_from(t0))
    }
}

fn data_query(select: &str, window: QueryWindow, interval: i64) -> String {
    format!(
        "query?select={}&begin={}&end={}&group={}s&format=json&missing=skip",
        select, window.start, window.end, interval
    )
}

/// Decode one response row; `None` marks a corrupt row.
///
/// Missing values decode as NaN, but the timestamp must be a number.
fn parse_row(row: &Value, ncols: usize) -> Option<Vec<f64>> {
    let fields = row.as_array().filter(|fields| fields.len() == ncols)?;
    let (time, values) = fields.split_first()?;
    let time = time.as_f64().filter(|t| t.is_finite())?;
    std::iter::once(Some(time))
        .chain(values.iter().map(|field| match field {
            Value::Number(n) => n.as_f64(),
            Value::Null => Some(f64::NAN),
            _ => None,
        }))
        .collect()
}

fn row_timestamp(row: &Value) -> Option<i64> {
    row.as_array()
        .and_then(|fields| fields.first())
        .and_then(Value::as_f64)
        .map(|t| t as i64)
}

/// Result of checking one response block
#[derive(Debug, PartialEq)]
enum Block {
    /// Every row decoded
    Complete(Vec<Vec<f64>>),
    /// Rows before the first corrupt one, and where to resume
    Truncated { rows: Vec<Vec<f64>>, resume: i64 },
    /// Nothing usable at this cursor
    Corrupt { timestamp: Option<i64> },
}

fn check_block(rows: &[Value], ncols: usize, window: QueryWindow, interval: i64) -> Block {
    let mut good = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match parse_row(row, ncols) {
            Some(values) => good.push(values),
            None => {
                let timestamp = row_timestamp(row);
                warn!(
                    "Bad record received at row {} (time {:?})",
                    index, timestamp
                );
                let last_good = good.last().map(|r| r[0] as i64);
                // Resume at the bad row; fall back to the slot after the
                // last good row when the bad row has no usable timestamp
                let resume = match (timestamp, last_good) {
                    (Some(t), Some(g)) if t > g => Some(t),
                    (_, Some(g)) => Some(g.saturating_add(interval)),
                    (_, None) => None,
                }
                .map(|t| t.min(window.end))
                .filter(|&t| t > window.start);

                return match resume {
                    Some(resume) => Block::Truncated { rows: good, resume },
                    None => Block::Corrupt { timestamp },
                };
            }
        }
    }
    Block::Complete(good)
}

/// Rows accepted so far, split into timestamps and a row-major value buffer
#[derive(Debug, Default)]
struct Accumulator {
    time: Vec<i64>,
    values: Vec<f64>,
}

impl Accumulator {
    fn extend(&mut self, rows: Vec<Vec<f64>>) {
        for row in rows {
            self.time.push(row[0] as i64);
            self.values.extend_from_slice(&row[1..]);
        }
    }
}

/// Validated inputs of a fetch session
struct Session {
    begin: i64,
    end: i64,
    interval: i64,
    ncols: usize,
    select: String,
    plan: WindowPlan,
}

impl Session {
    fn new(
        begin: &str,
        end: &str,
        columns: &[String],
        n_voltage: usize,
        n_channels: usize,
        options: &FetchOptions,
    ) -> Result<Self, IotaWattError> {
        let interval = options.interval;
        if interval <= 0 || interval % NATIVE_INTERVAL_SECS != 0 {
            return Err(IotaWattError::InvalidInterval(interval));
        }
        let tbegin = string_to_timestamp(begin, options.utc)?;
        let tend = string_to_timestamp(end, options.utc)?;
        if tbegin >= tend {
            return Err(IotaWattError::InvalidRange {
                begin: tbegin,
                end: tend,
            });
        }

        let row_size = estimated_row_size(n_voltage, n_channels, options.frac_digits);
        let max_rows = max_rows_per_window(row_size);
        Ok(Self {
            begin: tbegin,
            end: tend,
            interval,
            ncols: columns.len(),
            select: format!("[{}]", columns.join(",")),
            plan: WindowPlan::new(tbegin, tend, interval, max_rows),
        })
    }
}

/// Download `[begin, end)` for `channels` and assemble a [`Dataset`].
///
/// `progress` runs before every window and may stop the download by
/// returning `ControlFlow::Break`.
pub fn fetch<T, F>(
    api: &mut QueryApi<T>,
    voltage: &[String],
    channels: Vec<String>,
    begin: &str,
    end: &str,
    options: &FetchOptions,
    mut progress: F,
) -> Result<Dataset, IotaWattError>
where
    T: Transport,
    F: FnMut(&WindowProgress) -> ControlFlow<()>,
{
    let columns = select_columns(voltage, &channels, options.frac_digits);
    let session = Session::new(begin, end, &columns, voltage.len(), channels.len(), options)?;
    info!(
        "Fetching {} channels from {} to {} in windows of {} s",
        channels.len(),
        session.begin,
        session.end,
        session.plan.step
    );

    let mut acc = Accumulator::default();
    let mut t0 = session.begin;
    let mut t0retry = 0;
    while t0 < session.end {
        let window = session.plan.window_from(t0);
        let report = WindowProgress {
            begin: session.begin,
            end: session.end,
            window,
        };
        if progress(&report).is_break() {
            info!("Fetch cancelled at {}", t0);
            return Err(IotaWattError::Cancelled { timestamp: t0 });
        }

        let query = data_query(&session.select, window, session.interval);
        let rows = match api.query(&query, options.retry)? {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            Value::Object(map) if map.is_empty() => Vec::new(),
            other => {
                return Err(IotaWattError::UnexpectedResponse {
                    query,
                    reason: format!("expected a list of rows, got {}", other),
                })
            }
        };

        if rows.is_empty() {
            // No data recorded for this window
            debug!("No data for window {}..{}", window.start, window.end);
            t0 = window.end;
            continue;
        }

        match check_block(&rows, session.ncols, window, session.interval) {
            Block::Complete(block) => {
                debug!(
                    "Window {}..{}: {} rows",
                    window.start,
                    window.end,
                    block.len()
                );
                acc.extend(block);
                t0 = window.end;
                t0retry = 0;
            }
            Block::Truncated { rows: block, resume } => {
                debug!(
                    "Window {}..{}: kept {} rows, resuming at {}",
                    window.start,
                    window.end,
                    block.len(),
                    resume
                );
                acc.extend(block);
                t0 = resume;
                t0retry = 0;
            }
            Block::Corrupt { timestamp } => {
                t0retry += 1;
                warn!(
                    "Discarding block at {} (bad first row, time {:?}), attempt {}",
                    t0, timestamp, t0retry
                );
                if t0retry > MAX_CURSOR_RETRIES {
                    return Err(IotaWattError::WindowRetryExhausted { timestamp: t0 });
                }
            }
        }
    }

    info!("Fetched {} rows", acc.time.len());
    let meta = DatasetMeta {
        begin: begin.to_string(),
        end: end.to_string(),
        voltage_channels: voltage.to_vec(),
        current_channels: channels,
        frac_digits: options.frac_digits,
        columns: columns[1..].to_vec(),
    };
    Dataset::from_rows(meta, acc.time, acc.values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_columns_order() {
        let columns = select_columns(&names(&["Mains"]), &names(&["Oven", "Dryer"]), 3);
        assert_eq!(
            columns,
            names(&[
                "time.utc.unix",
                "Mains.volts.d3",
                "Mains.hz.d3",
                "Oven.watts.d3",
                "Dryer.watts.d3",
                "Oven.amps.d3",
                "Dryer.amps.d3",
            ])
        );
    }

    #[test]
    fn test_row_budget() {
        // 14 + 1*2*10 + 14*2*10 = 314 bytes per row
        assert_eq!(estimated_row_size(1, 14, 3), 314);
        assert_eq!(max_rows_per_window(314), 318);
        assert_eq!(max_rows_per_window(1_000_000), 1);
    }

    #[test]
    fn test_windows_tile_range() {
        for (begin, end, interval, max_rows) in
            [(0, 1000, 5, 7), (100, 101, 5, 1), (0, 3600, 60, 10), (7, 12_345, 5, 318)]
        {
            let plan = WindowPlan::new(begin, end, interval, max_rows);
            let windows: Vec<_> = plan.windows().collect();
            assert_eq!(windows.first().unwrap().start, begin);
            assert_eq!(windows.last().unwrap().end, end);
            for pair in windows.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            for w in &windows {
                assert!(w.start < w.end);
                assert!(w.len() <= interval * max_rows);
            }
        }
    }

    #[test]
    fn test_parse_row() {
        assert_eq!(parse_row(&json!([10, 1.5, 2]), 3), Some(vec![10.0, 1.5, 2.0]));
        assert!(parse_row(&json!([10, null, 2]), 3).unwrap()[1].is_nan());
        assert_eq!(parse_row(&json!([10, 1.5]), 3), None);
        assert_eq!(parse_row(&json!([null, 1.5, 2]), 3), None);
        assert_eq!(parse_row(&json!(["10", 1.5, 2]), 3), None);
        assert_eq!(parse_row(&json!([10, "x", 2]), 3), None);
        assert_eq!(parse_row(&json!({"a": 1}), 3), None);
    }

    #[test]
    fn test_check_block_mid_window() {
        let window = QueryWindow { start: 0, end: 100 };
        let rows = vec![json!([0, 1]), json!([5, 2]), json!([10]), json!([15, 4])];
        assert_eq!(
            check_block(&rows, 2, window, 5),
            Block::Truncated {
                rows: vec![vec![0.0, 1.0], vec![5.0, 2.0]],
                resume: 10
            }
        );
    }

    #[test]
    fn test_check_block_bad_row_without_timestamp() {
        let window = QueryWindow { start: 0, end: 100 };
        let rows = vec![json!([0, 1]), json!([5, 2]), json!([])];
        assert_eq!(
            check_block(&rows, 2, window, 5),
            Block::Truncated {
                rows: vec![vec![0.0, 1.0], vec![5.0, 2.0]],
                resume: 10
            }
        );
    }

    #[test]
    fn test_check_block_first_row() {
        let window = QueryWindow { start: 0, end: 100 };
        let rows = vec![json!([0]), json!([5, 2])];
        assert_eq!(
            check_block(&rows, 2, window, 5),
            Block::Corrupt { timestamp: Some(0) }
        );
    }

    #[test]
    fn test_check_block_null_timestamp() {
        let window = QueryWindow { start: 0, end: 100 };
        let rows = vec![json!([0, 1]), json!([5, 2]), json!([null, 3]), json!([15, 4])];
        assert_eq!(
            check_block(&rows, 2, window, 5),
            Block::Truncated {
                rows: vec![vec![0.0, 1.0], vec![5.0, 2.0]],
                resume: 10
            }
        );

        let rows = vec![json!([null, 1]), json!([5, 2])];
        assert_eq!(
            check_block(&rows, 2, window, 5),
            Block::Corrupt { timestamp: None }
        );
    }

    #[test]
    fn test_huge_interval_gives_single_window() {
        let plan = WindowPlan::new(1_000, 1_010, 5_000_000_000_000_000, 318);
        assert_eq!(plan.step, 10);
        let windows: Vec<_> = plan.windows().collect();
        assert_eq!(windows, vec![QueryWindow { start: 1_000, end: 1_010 }]);

        let plan = WindowPlan::new(0, 100, i64::MAX, i64::MAX);
        assert_eq!(plan.window_from(99), QueryWindow { start: 99, end: 100 });
    }

    fn interval_strategy() -> impl Strategy<Value = i64> {
        prop_oneof![1i64..2_000, (i64::MAX / 10)..=(i64::MAX / 5)].prop_map(|k| 5 * k)
    }

    fn max_rows_strategy() -> impl Strategy<Value = i64> {
        prop_oneof![1i64..5_000, (i64::MAX / 2)..=i64::MAX]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn proptest_windows_tile_range(
            begin in 0i64..4_000_000_000,
            span in 1i64..100_000,
            interval in interval_strategy(),
            max_rows in max_rows_strategy(),
        ) {
            let end = begin + span;
            let plan = WindowPlan::new(begin, end, interval, max_rows);
            let windows: Vec<_> = plan.windows().collect();

            prop_assert!(!windows.is_empty());
            prop_assert_eq!(windows[0].start, begin);
            prop_assert_eq!(windows[windows.len() - 1].end, end);
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for w in &windows {
                prop_assert!(w.start < w.end);
                prop_assert!(w.len() <= interval.saturating_mul(max_rows));
            }
        }

        #[test]
        fn proptest_truncated_block_keeps_rows_before_bad_one(
            good in 1usize..50,
            trailing in 0usize..5,
        ) {
            let window = QueryWindow { start: 0, end: 1_000 };
            let mut rows: Vec<Value> = (0..good).map(|i| json!([5 * i, 1.0])).collect();
            rows.push(json!([5 * good]));
            rows.extend((0..trailing).map(|i| json!([5 * (good + 1 + i), 1.0])));

            match check_block(&rows, 2, window, 5) {
                Block::Truncated { rows: kept, resume } => {
                    prop_assert_eq!(kept.len(), good);
                    prop_assert_eq!(resume, 5 * good as i64);
                }
                other => prop_assert!(false, "unexpected block {:?}", other),
            }
        }
    }
}
