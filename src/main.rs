use anyhow::Context;
use clap::Parser;
use std::{io, path::PathBuf};
use tracing::info;

use csv_etl::config::DEFAULT_CONFIG_PATH;
use csv_etl::logging;
use csv_etl::pipeline::{self, RunOptions};
use csv_etl::transform::{AggregateSpec, DEFAULT_DATE_FIELD, DEFAULT_VALUE_FIELD};

#[derive(Parser, Debug)]
#[command(name = "csv-etl")]
#[command(about = "Sum CSV amounts per normalized date and load the totals into a results table")]
#[command(version)]
struct Cli {
    /// Folder holding the input *.csv files
    #[arg(short, long, env = "INPUT_FOLDER", default_value = "/data")]
    input: PathBuf,

    /// Extract and aggregate, print the totals as CSV, skip the database
    #[arg(long)]
    dry_run: bool,

    /// Fail the run if any row is skipped
    #[arg(long)]
    strict: bool,

    /// Overrides DATABASE_URL and the config file
    #[arg(long)]
    database_url: Option<String>,

    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, default_value = DEFAULT_DATE_FIELD)]
    date_field: String,

    #[arg(long, default_value = DEFAULT_VALUE_FIELD)]
    value_field: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn into_options(self) -> RunOptions {
        RunOptions {
            input: self.input,
            dry_run: self.dry_run,
            strict: self.strict,
            spec: AggregateSpec::new(self.date_field, self.value_field),
            database_url: self.database_url,
            config_path: self.config,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json);

    let options = cli.into_options();
    let summary = pipeline::run(&options, io::stdout().lock())
        .with_context(|| format!("ETL run on {} failed", options.input.display()))?;

    info!(
        "Done: {} rows read, {} skipped, {} groups, {} inserted",
        summary.rows_read, summary.rows_skipped, summary.groups, summary.inserted
    );

    Ok(())
}
