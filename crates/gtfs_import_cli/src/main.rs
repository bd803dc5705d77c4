use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use gtfs_atlas_core::{
    AgencyKey, FileSink, ImportConfig, ImportOutcome, ImportProgress, ImportRequest, ImportState,
    Importer, DEFAULT_BATCH_SIZE,
};

#[derive(Debug, Parser)]
#[command(name = "gtfs-atlas")]
#[command(about = "Import a GTFS feed into a GTFS Atlas record store")]
struct Args {
    #[arg(short = 'u', long = "url")]
    url: String,

    /// Partition key used unless agency.txt names an agency_id
    #[arg(short = 'k', long = "agency-key", alias = "agency_key", default_value = "default")]
    agency_key: String,

    #[arg(short = 's', long = "store", default_value = "./gtfs-store")]
    store: PathBuf,

    #[arg(
        short = 'b',
        long = "batch-size",
        alias = "batch_size",
        default_value_t = DEFAULT_BATCH_SIZE
    )]
    batch_size: usize,

    /// Directory for the job's working files (defaults to the system temp dir)
    #[arg(long = "temp-dir", alias = "temp_dir")]
    temp_dir: Option<PathBuf>,

    #[arg(long = "timeout-secs", default_value_t = 300)]
    timeout_secs: u64,

    #[arg(short = 'p', long = "pretty")]
    pretty: bool,

    /// Hide the progress bar
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let agency_key = AgencyKey::new(&args.agency_key)
        .with_context(|| format!("invalid --agency-key {:?}", args.agency_key))?;
    let mut config = ImportConfig::new()
        .with_batch_size(args.batch_size)
        .with_request_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(temp_dir) = &args.temp_dir {
        config = config.with_temp_root(temp_dir);
    }

    let sink = FileSink::open(&args.store)
        .with_context(|| format!("open store {}", args.store.display()))?;
    let importer = Importer::http(Arc::new(sink), config).context("build http client")?;
    info!("Importing into {}", args.store.display());

    let request = ImportRequest::new(&args.url, agency_key);
    let progress = (!args.quiet).then(IndicatifProgress::new);
    let report = importer
        .import(
            &request,
            progress.as_ref().map(|p| p as &dyn ImportProgress),
        )
        .with_context(|| format!("import gtfs from {}", args.url))?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("serialize import report")?;
    println!("{}", json);

    if report.outcome == ImportOutcome::Cancelled {
        info!("Import was cancelled before all files were loaded");
    }
    Ok(())
}

struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        bar.set_message("Waiting to download...");
        Self { bar }
    }
}

impl ImportProgress for IndicatifProgress {
    fn on_state(&self, state: &ImportState) {
        match state {
            ImportState::Downloading => self.bar.set_message("Downloading..."),
            ImportState::Extracting => self.bar.set_message("Unzipping..."),
            ImportState::ResolvingAgencyKey => self.bar.set_message("Reading agency.txt..."),
            ImportState::Completed => self.bar.finish_with_message("Import complete"),
            ImportState::Cancelled => self.bar.abandon_with_message("Import cancelled"),
            ImportState::Failed => self.bar.abandon_with_message("Import failed"),
            ImportState::Idle | ImportState::ImportingFile { .. } => {}
        }
    }

    fn set_total_files(&self, count: usize) {
        self.bar.set_length(count as u64);
    }

    fn on_start_file(&self, file: &str) {
        self.bar.set_message(format!("Importing {}", file));
    }

    fn on_finish_file(&self, _file: &str, _inserted: u64) {
        self.bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["gtfs-atlas", "--url", "https://x.example/gtfs.zip"])
            .expect("parse");
        assert_eq!(args.agency_key, "default");
        assert_eq!(args.store, PathBuf::from("./gtfs-store"));
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!args.pretty);
    }

    #[test]
    fn url_is_required() {
        assert!(Args::try_parse_from(["gtfs-atlas"]).is_err());
    }

    #[test]
    fn accepts_short_flags() {
        let args = Args::try_parse_from([
            "gtfs-atlas", "-u", "https://x.example/gtfs.zip", "-k", "metro", "-b", "50", "-p",
        ])
        .expect("parse");
        assert_eq!(args.agency_key, "metro");
        assert_eq!(args.batch_size, 50);
        assert!(args.pretty);
    }
}
