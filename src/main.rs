//! reattach - run a warehouse query detached and collect it from a new session.

use anyhow::Context;
use db_reattach::cli::{Cli, Command};
use db_reattach::db::{self, QueryId, SessionBackend};
use db_reattach::detached::{DetachedQueryManager, ResultStream};
use db_reattach::error::DetachError;
use db_reattach::logging;
use db_reattach::output::{self, OutputFormat, RowWriter};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code used when polling was interrupted.
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse_args();
    logging::init_stderr_logging(cli.verbose);
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            trigger.cancel();
        }
    });

    if let Err(e) = run(cli, &cancel).await {
        let code = report(&e);
        std::process::exit(code);
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let format = cli
        .parse_output_format()
        .map_err(anyhow::Error::msg)?;
    let config = cli.resolve_config()?;

    let backend = cli.backend();
    if backend == SessionBackend::Snowflake {
        config.connection.validate()?;
        info!("Connection: {}", config.connection.display_string());
    }

    let factory = db::session_factory(backend)?;
    let manager = DetachedQueryManager::new(factory, &config)?;

    match cli.command {
        Command::Run { statement } => {
            let stream = manager.run(&statement, cancel).await?;
            print_rows(stream, format).await?;
        }
        Command::Submit { statement } => {
            let query_id = manager.submit(&statement).await?;
            println!("{}", output::format_submitted(&query_id, format));
        }
        Command::Resume { query_id } => {
            let query_id = parse_query_id(&query_id)?;
            let stream = manager.resume(&query_id, cancel).await?;
            print_rows(stream, format).await?;
        }
        Command::Status { query_id } => {
            let query_id = parse_query_id(&query_id)?;
            let check = manager.check_status(&query_id).await?;
            println!("{}", output::format_status(&check, format));
        }
    }

    Ok(())
}

fn parse_query_id(raw: &str) -> anyhow::Result<QueryId> {
    let query_id = QueryId::new(raw.trim());
    anyhow::ensure!(!query_id.is_empty(), "Query id must not be empty");
    Ok(query_id)
}

/// Streams rows to stdout, then closes the fetching session.
async fn print_rows(mut stream: ResultStream, format: OutputFormat) -> anyhow::Result<()> {
    let written = write_rows(&mut stream, format).await;
    let report = stream.report().clone();
    let query_id = stream.query_id().clone();
    let closed = stream.close().await;

    let rows = written.with_context(|| format!("Failed to read results of query {query_id}"))?;
    closed?;
    info!(
        "Query {query_id}: {rows} rows after {} polls ({:?})",
        report.polls, report.elapsed
    );
    Ok(())
}

async fn write_rows(stream: &mut ResultStream, format: OutputFormat) -> db_reattach::error::Result<u64> {
    let mut writer = RowWriter::new(format, std::io::stdout(), stream.columns());
    writer.write_header()?;
    while let Some(row) = stream.next_row().await {
        writer.write_row(&row?)?;
    }
    writer.finish()
}

/// Logs a failure and picks the exit code.
fn report(e: &anyhow::Error) -> i32 {
    let Some(detach) = e.chain().find_map(|cause| cause.downcast_ref::<DetachError>()) else {
        error!("{e:#}");
        return 1;
    };

    error!("{}: {e:#}", detach.category());
    match detach {
        DetachError::Timeout { query_id, .. } | DetachError::Cancelled { query_id } => {
            warn!("Query {query_id} may still be running; collect it with `reattach resume {query_id}`");
        }
        _ => {}
    }

    if matches!(detach, DetachError::Cancelled { .. }) {
        EXIT_CANCELLED
    } else {
        1
    }
}
