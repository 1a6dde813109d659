use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use common::client::ClientPool;
use common::config::Configuration;
use purger::{PurgeOptions, Purger};

/// Bulk-delete rows older than a cutoff from a tick-keyed table store.
#[derive(Parser, Debug)]
#[command(name = "tablepurge", version, about)]
struct Args {
    #[arg(long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(long, help = "Store connection dsn (overrides configuration)")]
    connection: Option<String>,

    #[arg(long, help = "Table to purge (overrides configuration)")]
    table: Option<String>,

    #[arg(long, help = "Delete rows older than this many days")]
    older_than_days: Option<u32>,

    #[arg(long, help = "Constant partition key prefix")]
    prefix: Option<String>,

    #[arg(long, help = "Number of concurrent delete workers")]
    workers: Option<usize>,

    #[arg(long, help = "Directory for staging ledgers")]
    staging_dir: Option<String>,

    #[arg(long, help = "Print the summary as JSON")]
    json: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    quiet: bool,
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };

    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: Setting RUST_LOG environment variable is safe for logging
        // configuration
        unsafe {
            std::env::set_var("RUST_LOG", level);
        }
    }
    tracing_subscriber::fmt::init();
}

fn apply_overrides(config: &mut Configuration, args: &Args) {
    if let Some(connection) = &args.connection {
        config.connection.dsn = connection.clone();
    }
    if let Some(table) = &args.table {
        config.table = table.clone();
    }
    if let Some(days) = args.older_than_days {
        config.purge.older_than_days = days;
    }
    if let Some(prefix) = &args.prefix {
        config.purge.partition_key_prefix = prefix.clone();
    }
    if let Some(workers) = args.workers {
        config.purge.workers = workers;
    }
    if let Some(staging_dir) = &args.staging_dir {
        config.purge.staging_dir = staging_dir.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => Configuration::load_from_path(path),
        None => Configuration::load(),
    }
    .context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let pool = ClientPool::new();
    let client = pool
        .get(&config.connection.dsn)
        .await
        .context("Failed to construct store client")?;

    let options = PurgeOptions {
        older_than_days: config.purge.older_than_days,
        partition_key_prefix: config.purge.partition_key_prefix.clone(),
        workers: config.purge.workers,
    };
    let purger = Purger::new(
        client,
        config.table.clone(),
        options,
        PathBuf::from(&config.purge.staging_dir),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutdown requested; finishing in-flight calls");
                cancel.cancel();
            }
        });
    }

    let started = Instant::now();
    let summary = purger.purge(cancel).await?;
    let elapsed = started.elapsed();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let rate = summary.rows_deleted as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        println!("Purge of table {:?} complete", config.table);
        println!("======================");
        println!("Pages read:           {}", summary.pages_read);
        println!("Partitions queued:    {}", summary.partitions_queued);
        println!("Partitions completed: {}", summary.partitions_completed);
        println!("Rows deleted:         {}", summary.rows_deleted);
        println!("Elapsed:              {:.2}s ({rate:.0} rows/s)", elapsed.as_secs_f64());
    }

    Ok(())
}
