use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::SourceArgs;

#[derive(Parser)]
#[command(
    name = "tether",
    about = "tether: owner-keyed database connection cache",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a connection, run the liveness probe and report the driver.
    Check {
        /// Also open connections from this many worker threads and show
        /// the cache once they have been reclaimed.
        #[arg(long, default_value = "0")]
        owners: usize,
    },
    /// Run a query and print its rows.
    Query {
        sql: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ds = commands::data_source(&cli.source)?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(ds.traces())?)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Check { owners } => commands::check::check(&ds, owners),
        Commands::Query { sql, format } => commands::query::query(&ds, &sql, &format),
    };
    let closed = ds.close();
    result?;
    closed?;
    Ok(())
}

/// `RUST_LOG` plus tether warnings, and lifecycle events when tracing is on.
fn log_filter(trace: bool) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env().add_directive("tether=warn".parse()?);
    if trace {
        filter = filter.add_directive("tether::trace=info".parse()?);
    }
    Ok(filter)
}
