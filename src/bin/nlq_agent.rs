//! CLI for running analytics questions through the agent pipeline
//!
//! Usage:
//!   cargo run --features cli --bin nlq_agent -- -s schema.yaml "order count"
//!   cargo run --features cli --bin nlq_agent -- -s schema.yaml --llm "revenue per day"
//!   cargo run --features cli --bin nlq_agent -- -s schema.yaml -e http://localhost:4000/load "order count"

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use semantic_query_agent::{
    create_llm_client, AgentOrchestrator, ConfigLoader, DryRunExecutor, HttpQueryExecutor,
    OrchestratorBuilder, QueryExecutor, Schema, StaticSchemaProvider,
};

#[derive(Parser)]
#[command(name = "nlq_agent")]
#[command(about = "Compile an analytics question into a semantic-layer query")]
struct Args {
    /// The question to answer
    query: String,

    /// Schema file (YAML or JSON) listing entities, measures and dimensions
    #[arg(short = 's', long)]
    schema: PathBuf,

    /// Directory with agent.yaml, keywords.yaml, business_rules.yaml, error_patterns.yaml
    /// (defaults to AGENT_CONFIG_DIR, then ./config)
    #[arg(short = 'd', long)]
    config_dir: Option<PathBuf>,

    /// Semantic-layer load endpoint; dry run when absent
    #[arg(short = 'e', long)]
    executor_url: Option<String>,

    /// Authorization token for the executor
    #[arg(long, env = "SEMANTIC_LAYER_TOKEN")]
    token: Option<String>,

    /// Tenant to run the question for
    #[arg(short = 't', long, default_value = "default")]
    tenant: String,

    /// Use the LLM backend selected by AGENT_BACKEND
    #[arg(long)]
    llm: bool,

    /// Pretty-print the JSON result
    #[arg(short = 'p', long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let orchestrator = build(&args)?;
    let outcome = orchestrator.run(&args.query, &args.tenant).await?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{}", json);
    Ok(())
}

fn build(args: &Args) -> Result<AgentOrchestrator> {
    let schema = Schema::from_file(&args.schema)?;
    let loader = match &args.config_dir {
        Some(dir) => ConfigLoader::new(dir.clone()),
        None => ConfigLoader::from_env(),
    };

    let executor: Arc<dyn QueryExecutor> = match &args.executor_url {
        Some(url) => {
            let mut executor = HttpQueryExecutor::new(url.clone());
            if let Some(token) = &args.token {
                executor = executor.with_token(token.clone());
            }
            Arc::new(executor)
        }
        None => Arc::new(DryRunExecutor),
    };

    let mut builder = OrchestratorBuilder::from_config(&loader)?
        .schema_provider(Arc::new(StaticSchemaProvider::new(schema)))
        .executor(executor);

    if args.llm {
        let llm = create_llm_client().context("failed to create LLM client")?;
        builder = builder.llm(llm);
    }

    Ok(builder.build()?)
}
