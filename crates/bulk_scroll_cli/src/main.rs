//! Manual smoke-test harness for the bulk-by-scroll engine. Seeds an
//! in-memory [`FakeSearchClient`] from a JSON-lines document dump and drives
//! one reindex / update-by-query / delete-by-query request against it,
//! printing the resulting progress snapshot. There is no wire client here:
//! this binary exists to exercise [`bulk_scroll_core::driver::ScrollDriver`]
//! the same way the unit tests do, just end to end and from the command
//! line.

use std::fs;
use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use bulk_scroll_client::{
    FakeDocument,
    FakeSearchClient,
};
use bulk_scroll_core::driver::MIN_SUPPORTED_CLUSTER_VERSION;
use bulk_scroll_core::request::{
    BulkByScrollRequest,
    RequestKind,
};
use bulk_scroll_core::transform::{
    DeleteByQueryTransform,
    DocumentTransform,
    ReindexTransform,
    UpdateByQueryTransform,
};
use bulk_scroll_core::ScrollDriver;
use bulk_scroll_runtime::TokioRuntime;
use clap::{
    Parser,
    Subcommand,
};

/// Drive one bulk-by-scroll request against an in-memory fake backend.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON-lines file of `{"index": ..., "id": ..., "version": ...,
    /// "source": {...}}` documents to seed the fake backend with.
    #[arg(long, global = true)]
    seed: String,

    /// How many hits the fake backend returns per scroll page.
    #[arg(long, global = true, default_value_t = 100)]
    page_size: usize,

    /// Cap the number of documents mutated; -1 means "all matches".
    #[arg(long, global = true, default_value_t = -1)]
    size: i64,

    /// Issue a refresh against every touched index once the request
    /// finishes.
    #[arg(long, global = true)]
    refresh: bool,

    /// Maximum number of retries on transient bulk rejection.
    #[arg(long, global = true, default_value_t = 11)]
    max_retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reindex every document matching `--from` into `--to`.
    Reindex {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Rewrite every document matching `--from` in place.
    UpdateByQuery {
        #[arg(long)]
        from: String,
    },
    /// Delete every document matching `--from`.
    DeleteByQuery {
        #[arg(long)]
        from: String,
    },
}

fn seed_documents(path: &str) -> anyhow::Result<Vec<FakeDocument>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open seed file {path}"))?;
    let mut docs = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("invalid JSON line in seed file: {line}"))?;
        docs.push(FakeDocument {
            index: value["index"]
                .as_str()
                .context("seed document missing \"index\"")?
                .to_string(),
            id: value["id"]
                .as_str()
                .context("seed document missing \"id\"")?
                .to_string(),
            version: value["version"].as_i64().unwrap_or(1),
            source: value["source"].clone(),
        });
    }
    Ok(docs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = cmd_util::env::config_tool();
    let args = Args::parse();

    let docs = seed_documents(&args.seed)?;
    let client = Arc::new(FakeSearchClient::new(docs, args.page_size));

    let (kind, source_indices, transform): (RequestKind, Vec<String>, Arc<dyn DocumentTransform>) =
        match &args.command {
            Command::Reindex { from, to } => (
                RequestKind::Reindex,
                vec![from.clone()],
                Arc::new(ReindexTransform::new(to.clone())),
            ),
            Command::UpdateByQuery { from } => (
                RequestKind::UpdateByQuery,
                vec![from.clone()],
                Arc::new(UpdateByQueryTransform::new()),
            ),
            Command::DeleteByQuery { from } => (
                RequestKind::DeleteByQuery,
                vec![from.clone()],
                Arc::new(DeleteByQueryTransform::new()),
            ),
        };

    let mut request = BulkByScrollRequest::new(kind, source_indices);
    request.size = args.size;
    request.refresh = args.refresh;
    request.max_retries = args.max_retries;
    if let Command::Reindex { to, .. } = &args.command {
        request.destination_index = Some(to.clone());
    }
    request.validate()?;

    tracing::info!(kind = kind.as_label(), "starting bulk-by-scroll request");

    let runtime = TokioRuntime::new(cmd_util::env::env_config("BULK_SCROLL_WORKER_POOL_SIZE", 4usize));
    let driver = ScrollDriver::new(request, client, transform, runtime);
    let response = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&response.progress.status_json(kind))?
    );
    if !response.indexing_failures.is_empty() {
        eprintln!("indexing failures:");
        for failure in &response.indexing_failures {
            eprintln!("  {failure}");
        }
    }
    if !response.search_failures.is_empty() {
        eprintln!("search failures:");
        for failure in &response.search_failures {
            eprintln!("  [{}] {}", failure.index, failure.reason);
        }
    }
    tracing::info!(
        elapsed_ms = response.elapsed.as_millis() as u64,
        "bulk-by-scroll request finished"
    );

    Ok(())
}
