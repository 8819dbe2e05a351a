use std::{io::Write, path::PathBuf};
use tracing::info;

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::records::{read_csv_folder, write_aggregates, Record};
use crate::sink::load_aggregates;
use crate::transform::{
    aggregate_with, normalize_date, Aggregate, AggregateSpec, SkipLog, SkipObserver,
};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub dry_run: bool,
    /// Abort before loading if any row was skipped.
    pub strict: bool,
    pub spec: AggregateSpec,
    pub database_url: Option<String>,
    pub config_path: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub groups: usize,
    pub inserted: usize,
}

/// Normalizes the group field of every record, dropping the ones that fail,
/// then aggregates what is left.
pub fn transform<O>(records: Vec<Record>, spec: &AggregateSpec, observer: &mut O) -> Vec<Aggregate>
where
    O: SkipObserver + ?Sized,
{
    let mut normalized = Vec::with_capacity(records.len());
    for mut record in records {
        match normalize_date(&mut record, &spec.group_field) {
            Ok(()) => normalized.push(record),
            Err(err) => observer.on_skip(&err),
        }
    }

    aggregate_with(normalized, spec, observer)
}

/// Extract, transform, then either load into the database or, on a dry run,
/// write the aggregates to `out` as CSV.
pub fn run<W: Write>(options: &RunOptions, out: W) -> Result<RunSummary> {
    info!(
        "Starting ETL on {} (dry_run={})",
        options.input.display(),
        options.dry_run
    );

    let spec = &options.spec;
    let required = [spec.group_field.as_str(), spec.value_field.as_str()];
    let records = read_csv_folder(&options.input, &required)?;
    let rows_read = records.len();

    let mut skipped = SkipLog::new();
    let aggregates = transform(records, spec, &mut skipped);
    info!("Aggregated into {} groups", aggregates.len());

    if options.strict && !skipped.is_empty() {
        return Err(EtlError::StrictSkips(skipped.len()));
    }

    let mut summary = RunSummary {
        rows_read,
        rows_skipped: skipped.len(),
        groups: aggregates.len(),
        inserted: 0,
    };

    if options.dry_run {
        info!("Dry run - would insert: {:?}", aggregates);
        write_aggregates(out, spec, &aggregates)?;
        return Ok(summary);
    }

    let config = Config::load(&options.config_path, options.database_url.as_deref())?;
    summary.inserted = load_aggregates(&config, &aggregates)?;
    info!("ETL finished, inserted={}", summary.inserted);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use crate::error::TransformError;

    fn record(fields: &[(&str, &str)]) -> Record {
        fields.iter().copied().collect()
    }

    fn options(input: &Path, config_dir: &Path) -> RunOptions {
        RunOptions {
            input: input.to_path_buf(),
            dry_run: true,
            strict: false,
            spec: AggregateSpec::default(),
            database_url: None,
            config_path: config_dir.join("config.yml"),
        }
    }

    #[test]
    fn dry_run_writes_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();

        let summary = run(&options(Path::new("test-inputs"), dir.path()), &mut out).unwrap();

        assert_eq!(
            summary,
            RunSummary {
                rows_read: 5,
                rows_skipped: 2,
                groups: 2,
                inserted: 0,
            }
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "date,total_amount\n2025-01-01,107.2500\n2025-01-02,20.5000\n"
        );
    }

    #[test]
    fn strict_mode_refuses_skips() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(Path::new("test-inputs"), dir.path());
        opts.strict = true;
        let mut out = Vec::new();

        let result = run(&opts, &mut out);

        assert!(matches!(result, Err(EtlError::StrictSkips(2))));
        assert!(out.is_empty());
    }

    #[test]
    fn loads_into_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(Path::new("test-inputs"), dir.path());
        opts.dry_run = false;
        opts.database_url = Some(format!("sqlite://{}", dir.path().join("etl.db").display()));

        let summary = run(&opts, std::io::sink()).unwrap();

        assert_eq!(summary.inserted, 2);
        assert!(dir.path().join("etl.db").exists());
    }

    #[test]
    fn custom_fields_flow_through() {
        let input = tempfile::tempdir().unwrap();
        fs::write(
            input.path().join("data.csv"),
            "day,qty\n01/02/2025,1\n2025-02-01,2\n",
        )
        .unwrap();
        let mut opts = options(input.path(), input.path());
        opts.spec = AggregateSpec::new("day", "qty");
        let mut out = Vec::new();

        let summary = run(&opts, &mut out).unwrap();

        assert_eq!(summary.groups, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "day,total_qty\n2025-02-01,3.0000\n"
        );
    }

    #[test]
    fn transform_drops_bad_dates_before_aggregating() {
        let records = vec![
            record(&[("date", "someday"), ("amount", "5")]),
            record(&[("date", "2025/01/01"), ("amount", "1")]),
            record(&[("amount", "9")]),
        ];
        let mut seen = Vec::new();

        let out = transform(
            records,
            &AggregateSpec::default(),
            &mut |e: &TransformError| seen.push(e.clone()),
        );

        assert_eq!(
            out,
            vec![Aggregate {
                key: Some("2025-01-01".to_string()),
                total: 1.0,
            }]
        );
        assert_eq!(
            seen,
            vec![
                TransformError::UnparseableDate("someday".to_string()),
                TransformError::MissingField("date".to_string()),
            ]
        );
    }
}
