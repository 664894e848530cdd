use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use streamexec::datastore::{
    Inclusion, IndexerRegistry, MemoryIndex, MemoryIndexer, MemoryProvider,
};
use streamexec::execution::{build_root, execute, Context, ExplainVisitor};
use streamexec::plan::{IndexCountScan, KeyspaceTerm, PlanArena, PlanKind, PlanSpan, SpanExpr};
use streamexec::ExecConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "streamexec")]
#[command(about = "Counts a generated keyspace with a partitioned index count scan")]
#[command(long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of documents to generate
    #[arg(long, default_value_t = 10_000)]
    docs: u64,

    /// Number of spans counted concurrently
    #[arg(short, long, default_value_t = 4)]
    partitions: u64,

    /// Query deadline in milliseconds (overrides the configuration)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the operator tree with per-node timings
    #[arg(long)]
    explain: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ExecConfig::load(args.config.as_deref())?;
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = Some(ms);
        config.validate()?;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.partitions == 0 {
        anyhow::bail!("--partitions must be at least 1");
    }

    // Build the keyspace and register its provider before any query runs
    let mut index = MemoryIndex::new("by_seq", "events");
    for seq in 0..args.docs {
        index = index.with_entry(json!(seq), format!("event-{}", seq));
    }
    let provider = MemoryProvider::new()
        .with_indexer("default", MemoryIndexer::new("events").with_index(index));
    let registry = Arc::new(
        IndexerRegistry::builder()
            .register("memory", Arc::new(provider))
            .build(),
    );
    tracing::info!("Registered indexer providers: {:?}", registry.provider_names());

    let ctx = Arc::new(Context::from_config(&config, registry));
    let indexer = ctx
        .registry()
        .create_indexer("memory", "local:", "default", "events")?;
    let index = indexer.index_by_name("by_seq")?;

    // One span per partition over the sequence range
    let width = args.docs.div_ceil(args.partitions).max(1);
    let spans: Vec<PlanSpan> = (0..args.partitions)
        .map(|p| {
            PlanSpan::range(
                Some(SpanExpr::Literal(json!(p * width))),
                Some(SpanExpr::Literal(json!((p + 1) * width))),
                Inclusion::Low,
            )
        })
        .collect();

    let mut arena = PlanArena::new();
    let root = arena.add(PlanKind::IndexCountScan(IndexCountScan::new(
        index,
        KeyspaceTerm::new("default", "events"),
        spans,
    )))?;
    arena.set_root(root)?;

    let op = build_root(&arena, ctx.pipeline_cap())?;
    if let Some(timeout) = config.timeout() {
        ctx.arm_deadline(timeout);
    }

    tracing::info!(
        "Request {}: counting {} documents over {} spans",
        ctx.request_id(),
        args.docs,
        args.partitions
    );
    let items = execute(op.clone(), ctx.clone(), None).await?;

    let output = json!({
        "count": items.first().map(|item| item.value().clone()),
        "summary": ctx.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.explain {
        let plan = op.accept(&mut ExplainVisitor::with_profile())?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }

    Ok(())
}
