//! Temperature sensor table parsing and lookup
//!
//! The BMC reports temperatures as a pipe-separated table. Column layouts
//! differ between tool versions and query forms, so rows are interpreted by
//! column count:
//!
//! * `label | id | status | entity | reading` (`sdr type temperature`, `sdr elist`)
//! * `label | reading | unit | status | ...` (`sensor` listing)
//! * `label | reading | status` (`sdr list`)
//! * `label | reading`

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use super::ipmi::{IpmiCommand, IpmiTransport, SafeExecutor};
use crate::constants::control::{MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::error::{BmcfanError, Result};

lazy_static! {
    /// Leading signed decimal number of a reading cell
    static ref READING_NUMBER: Regex =
        Regex::new(r"^\s*([-+]?\d+(?:\.\d+)?)(?:\s|$)").expect("reading pattern is valid");
}

/// Reading text the BMC uses when a sensor has no value
const ABSENT_READINGS: &[&str] = &["no reading", "not present", "disabled", "transition", "na"];

/// Status column value meaning "no reading"
const STATUS_NO_READING: &str = "ns";

/// Prefix selecting a sensor by record id instead of label
const ID_PREFIX: &str = "id:";

/// Identifies one row of the sensor table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SensorSelector {
    /// Exact, case-sensitive match on the row label
    Label(String),
    /// Case-insensitive match on the record id column
    Id(String),
}

impl SensorSelector {
    /// Parse a configured selector. `id:<record>` selects by id, anything else
    /// is a label.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix(ID_PREFIX) {
            Some(id) => Self::Id(id.trim().to_string()),
            None => Self::Label(raw.to_string()),
        }
    }

    pub fn matches(&self, row: &SensorRow) -> bool {
        match self {
            Self::Label(label) => row.label == *label,
            Self::Id(id) => row
                .id
                .as_deref()
                .map(|row_id| row_id.eq_ignore_ascii_case(id))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for SensorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{}", label),
            Self::Id(id) => write!(f, "{}{}", ID_PREFIX, id),
        }
    }
}

impl Serialize for SensorSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One parsed row of the sensor table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorRow {
    pub label: String,
    pub id: Option<String>,
    pub status: Option<String>,
    /// Whole degrees, `None` when the sensor has no usable reading
    pub reading: Option<i32>,
}

impl SensorRow {
    /// Parse one table line, returning `None` for lines that are not rows
    pub fn parse(line: &str) -> Option<Self> {
        let cols: Vec<&str> = line.split('|').map(str::trim).collect();
        if cols.len() < 2 || cols[0].is_empty() {
            return None;
        }

        let label = cols[0].to_string();
        let (id, status, value) = match cols.len() {
            2 => (None, None, cols[1]),
            3 | 4 => (None, Some(cols[2]), cols[1]),
            _ if parse_reading(cols[1]).is_some() => (None, Some(cols[3]), cols[1]),
            n => (Some(cols[1]), Some(cols[2]), cols[n - 1]),
        };

        let status = status.filter(|s| !s.is_empty()).map(String::from);
        let reading = match status.as_deref() {
            Some(s) if s.eq_ignore_ascii_case(STATUS_NO_READING) => None,
            _ => parse_reading(value),
        };

        Some(Self {
            label,
            id: id.filter(|s| !s.is_empty()).map(String::from),
            status,
            reading,
        })
    }
}

/// Parse a reading cell such as `45 degrees C` or `38.6`, rounding to whole
/// degrees. Values outside the credible temperature range are absent.
pub fn parse_reading(text: &str) -> Option<i32> {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.is_empty() || ABSENT_READINGS.iter().any(|absent| lowered.starts_with(absent)) {
        return None;
    }

    let caps = READING_NUMBER.captures(&lowered)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let value = value.round();
    if value < MIN_TEMPERATURE as f64 || value > MAX_TEMPERATURE as f64 {
        trace!(reading = %text, "Discarding out-of-range reading");
        return None;
    }
    Some(value as i32)
}

/// Parsed sensor table from one successful fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SensorSnapshot {
    rows: Vec<SensorRow>,
}

impl SensorSnapshot {
    pub fn parse(text: &str) -> Self {
        let rows = text.lines().filter_map(SensorRow::parse).collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[SensorRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row matching the selector
    pub fn find(&self, selector: &SensorSelector) -> Option<&SensorRow> {
        self.rows.iter().find(|row| selector.matches(row))
    }

    /// Temperature for a selector. Only the first matching row is considered;
    /// if it has no reading the selector is absent even when a later row
    /// would match.
    pub fn temperature_for(&self, selector: &SensorSelector) -> Option<i32> {
        self.find(selector).and_then(|row| row.reading)
    }

    /// Hottest reading among several selectors
    pub fn hottest(&self, selectors: &[SensorSelector]) -> Option<i32> {
        selectors.iter().filter_map(|s| self.temperature_for(s)).max()
    }
}

/// Fetches the sensor table and holds the latest snapshot.
///
/// A fetch replaces the held snapshot wholesale; a failed fetch clears it so
/// nothing stale survives into the next cycle.
#[derive(Debug, Default)]
pub struct SensorReader {
    latest: Option<SensorSnapshot>,
}

impl SensorReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch<T: IpmiTransport>(
        &mut self,
        executor: &SafeExecutor<T>,
    ) -> Result<&SensorSnapshot> {
        self.latest = None;

        let output = executor
            .run(&IpmiCommand::sensor_query())
            .await
            .map_err(|e| BmcfanError::SensorFetch(e.to_string()))?;

        let snapshot = SensorSnapshot::parse(&output);
        if snapshot.is_empty() {
            return Err(BmcfanError::SensorFetch("sensor table was empty".to_string()));
        }

        debug!("Fetched {} sensor rows", snapshot.rows().len());
        for row in snapshot.rows() {
            trace!(label = %row.label, reading = ?row.reading, "sensor");
        }

        Ok(self.latest.insert(snapshot))
    }

    pub fn latest(&self) -> Option<&SensorSnapshot> {
        self.latest.as_ref()
    }
}
