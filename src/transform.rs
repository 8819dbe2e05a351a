use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use std::borrow::Borrow;
use tracing::warn;

use crate::error::TransformError;
use crate::records::Record;

pub const DEFAULT_DATE_FIELD: &str = "date";
pub const DEFAULT_VALUE_FIELD: &str = "amount";

// Tried in order, first match wins. Day-first precedes month-first, so an
// ambiguous 02/01/2025 reads as 2 January.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d"];

// Calendar and ISO week dates, extended and basic.
const ISO_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%G-W%V-%u", "%GW%V%u"];

const ISO_TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%H%M%S%.f", "%H%M"];

const UTC_OFFSET_FORMATS: &[&str] = &["%H:%M", "%H%M", "%H:%M:%S%.f"];

pub type GroupKey = Option<String>;

/// One output row: the group key and the sum of every coercible value seen
/// for it. `key` is `None` for rows that lacked the grouping field.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub key: GroupKey,
    pub total: f64,
}

/// Names the field to group by and the field to sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    pub group_field: String,
    pub value_field: String,
}

impl AggregateSpec {
    pub fn new(group_field: impl Into<String>, value_field: impl Into<String>) -> Self {
        Self {
            group_field: group_field.into(),
            value_field: value_field.into(),
        }
    }

    pub fn total_column(&self) -> String {
        format!("total_{}", self.value_field)
    }
}

impl Default for AggregateSpec {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FIELD, DEFAULT_VALUE_FIELD)
    }
}

/// Receives rows dropped by the transform stage. Swapping the observer changes
/// how skips are reported without touching the algorithms.
pub trait SkipObserver {
    fn on_skip(&mut self, error: &TransformError);
}

impl<F> SkipObserver for F
where
    F: FnMut(&TransformError),
{
    fn on_skip(&mut self, error: &TransformError) {
        self(error)
    }
}

/// Logs every skip at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSkips;

impl SkipObserver for LogSkips {
    fn on_skip(&mut self, error: &TransformError) {
        warn!("Skipping row: {}", error);
    }
}

/// Logs every skip and keeps it, so strict callers can refuse the batch.
#[derive(Debug, Default)]
pub struct SkipLog {
    skipped: Vec<TransformError>,
}

impl SkipLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn errors(&self) -> &[TransformError] {
        &self.skipped
    }
}

impl SkipObserver for SkipLog {
    fn on_skip(&mut self, error: &TransformError) {
        LogSkips.on_skip(error);
        self.skipped.push(error.clone());
    }
}

/// Parses `raw` with the fixed format chain, falling back to ISO 8601
/// dates and date-times. Any time of day is dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    // chrono would otherwise accept a signed or blank-padded year.
    if !raw.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_iso8601(raw))
}

/// `<date>[T|space<time>[Z|offset]]`, where the date is a calendar or week
/// date and the time may be hour-only. Dates are kept as written, not shifted
/// by the offset.
fn parse_iso8601(raw: &str) -> Option<NaiveDate> {
    let upper = raw.to_ascii_uppercase();
    let (date, time) = match upper.split_once(|c: char| c == 'T' || c == ' ') {
        Some((date, time)) => (date, Some(time)),
        None => (upper.as_str(), None),
    };

    let date = ISO_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())?;

    match time {
        Some(time) if !is_iso_time(time) => None,
        _ => Some(date),
    }
}

fn is_iso_time(time: &str) -> bool {
    let (clock, offset) = split_offset(time);
    offset.map_or(true, is_utc_offset) && matches_time(clock, ISO_TIME_FORMATS)
}

fn split_offset(time: &str) -> (&str, Option<&str>) {
    if let Some(clock) = time.strip_suffix('Z') {
        return (clock, None);
    }
    match time.find(|c: char| c == '+' || c == '-') {
        Some(i) => (&time[..i], Some(&time[i + 1..])),
        None => (time, None),
    }
}

fn is_utc_offset(offset: &str) -> bool {
    matches_time(offset, UTC_OFFSET_FORMATS)
}

fn matches_time(text: &str, formats: &[&str]) -> bool {
    let parses = |fmt: &&str| NaiveTime::parse_from_str(text, fmt).is_ok();
    is_hour(text) || formats.iter().any(parses)
}

fn is_hour(text: &str) -> bool {
    text.len() == 2 && text.bytes().all(|b| b.is_ascii_digit()) && text < "24"
}

/// Rewrites `record[field]` as `YYYY-MM-DD`.
pub fn normalize_date(record: &mut Record, field: &str) -> Result<(), TransformError> {
    let raw = match record.get(field) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(TransformError::MissingField(field.to_string())),
    };

    let date = parse_date(raw).ok_or_else(|| TransformError::UnparseableDate(raw.to_string()))?;
    record.insert(field, date.format("%Y-%m-%d").to_string());

    Ok(())
}

/// Float parse after trimming. Single underscores between digits group them,
/// so `1_000` reads as 1000.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if !trimmed.contains('_') {
        return trimmed.parse().ok();
    }

    let bytes = trimmed.as_bytes();
    let grouped = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_' || (i > 0 && digit_at(bytes, i - 1) && digit_at(bytes, i + 1))
    });
    if !grouped {
        return None;
    }
    trimmed.replace('_', "").parse().ok()
}

fn digit_at(bytes: &[u8], i: usize) -> bool {
    bytes.get(i).is_some_and(u8::is_ascii_digit)
}

/// Sums `spec.value_field` per distinct `spec.group_field`, logging rows whose
/// value is not numeric.
pub fn aggregate<I>(records: I, spec: &AggregateSpec) -> Vec<Aggregate>
where
    I: IntoIterator,
    I::Item: Borrow<Record>,
{
    aggregate_with(records, spec, &mut LogSkips)
}

/// Output is in first-occurrence order of each key. A key only gets an entry
/// once a value for it coerces; rows with a missing value field count as zero.
pub fn aggregate_with<I, O>(records: I, spec: &AggregateSpec, observer: &mut O) -> Vec<Aggregate>
where
    I: IntoIterator,
    I::Item: Borrow<Record>,
    O: SkipObserver + ?Sized,
{
    let mut totals: IndexMap<GroupKey, f64> = IndexMap::new();

    for record in records {
        let record = record.borrow();
        let raw = record.get(&spec.value_field).unwrap_or("0");
        let Some(value) = coerce_number(raw) else {
            observer.on_skip(&TransformError::NonNumericValue {
                field: spec.value_field.clone(),
                raw: raw.to_string(),
            });
            continue;
        };

        let key = record.get(&spec.group_field).map(str::to_owned);
        *totals.entry(key).or_insert(0.0) += value;
    }

    totals
        .into_iter()
        .map(|(key, total)| Aggregate { key, total })
        .collect()
}
