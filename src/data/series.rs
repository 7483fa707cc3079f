//! Read side of the pressure store.
//!
//! Plotting front-ends and the dashboard endpoint consume the store as two
//! parallel arrays, `{labels: time[], values: pressure[]}`. Rows whose time
//! does not parse or whose pressure is not numeric are skipped with a
//! warning instead of failing the whole load; the acquisition side writes
//! the raw instrument field, which is not always a number.

use super::storage::{AcquisitionRecord, HEADER, TIME_FORMAT};
use crate::error::StorageError;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Time labels and pressure values in store order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    /// `time` column, verbatim.
    pub labels: Vec<String>,
    /// `pressure` column, parsed.
    pub values: Vec<f64>,
}

/// Aggregate view of a [`Series`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    /// Number of valid points.
    pub points: usize,
    /// Lowest pressure.
    pub min: f64,
    /// Highest pressure.
    pub max: f64,
    /// Time of the first point.
    pub first: String,
    /// Time of the last point.
    pub last: String,
}

impl Series {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series has no points.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Point count, extremes and time span; `None` for an empty series.
    pub fn summary(&self) -> Option<SeriesSummary> {
        let first = self.labels.first()?;
        let last = self.labels.last()?;
        let (min, max) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Some(SeriesSummary {
            points: self.len(),
            min,
            max,
            first: first.clone(),
            last: last.clone(),
        })
    }

    fn push(&mut self, record: AcquisitionRecord) -> bool {
        let Ok(value) = record.pressure.trim().parse::<f64>() else {
            return false;
        };
        if NaiveDateTime::parse_from_str(&record.time, TIME_FORMAT).is_err() {
            return false;
        }
        self.labels.push(record.time);
        self.values.push(value);
        true
    }
}

/// Load the store at `path`.
///
/// # Errors
/// Returns [`StorageError`] if the file cannot be opened or lacks the
/// `pressure,time` header. Individual bad rows are skipped, not errors.
pub fn load_series(path: impl AsRef<Path>) -> Result<Series, StorageError> {
    let path = path.as_ref();
    let csv_error = |source| StorageError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?;
    if !HEADER.iter().all(|h| headers.iter().any(|c| c == *h)) {
        return Err(StorageError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let mut series = Series::default();
    for (index, row) in reader.deserialize::<AcquisitionRecord>().enumerate() {
        match row {
            Ok(record) => {
                let shown = record.clone();
                if !series.push(record) {
                    warn!(
                        row = index + 1,
                        pressure = %shown.pressure,
                        time = %shown.time,
                        "skipping invalid row"
                    );
                }
            }
            Err(e) => warn!(row = index + 1, error = %e, "skipping unreadable row"),
        }
    }
    Ok(series)
}
