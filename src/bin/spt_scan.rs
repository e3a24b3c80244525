use std::fs::OpenOptions;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spt_item_scanner::api::ItemApiClient;
use spt_item_scanner::cache::CacheStore;
use spt_item_scanner::config::{ConfigLoader, ResolvedConfig};
use spt_item_scanner::domain::ScanState;
use spt_item_scanner::error::ScanError;
use spt_item_scanner::export;
use spt_item_scanner::output::{JsonOutput, OutputMode, StderrProgress};
use spt_item_scanner::scanner::{ScanReport, ScanSettings, Scanner};
use spt_item_scanner::sources::IdentitySources;
use spt_item_scanner::tui::Tui;

#[derive(Parser)]
#[command(name = "spt-scan")]
#[command(about = "Populate the local SPT item cache from the remote item database")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// SPT server root containing database/templates and database/hideout
    #[arg(long, global = true)]
    server: Option<String>,

    #[arg(long, global = true)]
    cache_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Scan every catalog and recipe item into the cache")]
    Scan(ScanArgs),
    #[command(about = "Print the item identities a scan would visit")]
    Ids,
    #[command(about = "Resolve duplicate cache entries")]
    Dedup,
    #[command(about = "Write the readable cache projection")]
    Export(ExportArgs),
    #[command(about = "Show cache statistics")]
    Stats,
    #[command(about = "Delete the item cache")]
    Clear,
}

#[derive(Args, Clone, Default)]
struct ScanArgs {
    /// Refetch items even when a fresh cached record exists
    #[arg(long)]
    force: bool,

    #[arg(long)]
    no_dedup: bool,

    #[arg(long)]
    no_export: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long)]
    output: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ScanError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ScanError) -> u8 {
    match error {
        ScanError::ConfigRead(_) | ScanError::ConfigParse(_) | ScanError::InvalidConfig(_) => 2,
        ScanError::ApiHttp(_) | ScanError::ApiStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_path = Utf8PathBuf::from(server);
        if cli.cache_dir.is_none() {
            config.cache_dir = config.server_path.join("cache");
        }
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = Utf8PathBuf::from(cache_dir);
    }

    let command = cli.command.unwrap_or(Command::Scan(ScanArgs::default()));
    let tui_owns_terminal =
        matches!(command, Command::Scan(_)) && matches!(output_mode, OutputMode::Interactive);
    let _log_guard = init_tracing(&config.log_file(), !tui_owns_terminal);

    match command {
        Command::Scan(args) => run_scan(&config, args, output_mode),
        Command::Ids => {
            let ids = identity_sources(&config).extract_identities();
            JsonOutput::print_identities(&ids).into_diagnostic()
        }
        Command::Dedup => {
            let mut store = open_store(&config);
            let report = store.deduplicate()?;
            store.flush()?;
            JsonOutput::print_dedup(&report).into_diagnostic()
        }
        Command::Export(args) => {
            let store = open_store(&config);
            let path = args
                .output
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| config.readable_file());
            let index = export::export(store.cache());
            export::write_readable(&path, &index)?;
            println!("{} items exported to {path}", index.len());
            Ok(())
        }
        Command::Stats => {
            let store = open_store(&config);
            JsonOutput::print_stats(&store.stats()).into_diagnostic()
        }
        Command::Clear => {
            let mut store = open_store(&config);
            store.clear()?;
            println!("cache cleared: {}", store.path());
            Ok(())
        }
    }
}

/// The returned guard flushes the scan log on drop; keep it alive until exit.
fn init_tracing(log_file: &Utf8Path, to_stderr: bool) -> Option<WorkerGuard> {
    let (file_writer, guard) = log_file
        .parent()
        .map(|dir| std::fs::create_dir_all(dir.as_std_path()))
        .transpose()
        .ok()
        .and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file.as_std_path())
                .ok()
        })
        .map(tracing_appender::non_blocking)
        .unzip();
    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
    });
    let stderr_layer = to_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn identity_sources(config: &ResolvedConfig) -> IdentitySources {
    IdentitySources::new(config.catalog_file(), config.recipes_file())
}

fn open_store(config: &ResolvedConfig) -> CacheStore {
    CacheStore::open(config.cache_file()).with_freshness(config.freshness)
}

fn run_scan(config: &ResolvedConfig, args: ScanArgs, output_mode: OutputMode) -> miette::Result<()> {
    let identities: Vec<_> = identity_sources(config)
        .extract_identities()
        .into_iter()
        .collect();
    if identities.is_empty() {
        return Err(miette::Report::msg(format!(
            "no item identities found under {}",
            config.server_path
        )));
    }

    let client = ItemApiClient::new(&config.api_base_url, &config.locale, config.request_timeout)?;
    let mut settings = ScanSettings::from_config(config);
    settings.force = args.force;
    settings.deduplicate = !args.no_dedup;
    if args.no_export {
        settings.readable_path = None;
    }
    let mut scanner = Scanner::new(client, open_store(config), settings);

    let report = match output_mode {
        OutputMode::Interactive => Tui::new().run(&mut scanner, identities)?,
        OutputMode::NonInteractive => {
            scanner.set_progress_callback(StderrProgress::progress);
            scanner.set_status_callback(StderrProgress::status);
            scanner.start(identities)?;
            while !scanner.is_finished() {
                scanner.pump_events();
                thread::sleep(Duration::from_millis(100));
            }
            scanner.wait()?
        }
    };

    print_scan_summary(&report);
    JsonOutput::print_report(&report).into_diagnostic()?;
    if let ScanState::Failed(message) = &report.state {
        return Err(miette::Report::msg(format!("scan failed: {message}")));
    }
    Ok(())
}

fn print_scan_summary(report: &ScanReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    eprintln!("{cyan}SPT-SCAN summary ({}){reset}", report.state);
    eprintln!(
        "{green}fetched or reused: {} of {}{reset}",
        report.counters.succeeded, report.total
    );
    eprintln!("{yellow}failed: {}{reset}", report.counters.failed);
    if let Some(dedup) = &report.dedup {
        eprintln!("{cyan}duplicates removed: {}{reset}", dedup.removed);
    }
}
