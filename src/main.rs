//! Context Tester - evaluate feature flags for arbitrary contexts

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use context_tester::{
    api::{ApiClient, FlagCatalog},
    cli::{Cli, Command, EvaluateArgs},
    config::Config,
    engine::RelayEngineFactory,
    gateway::{App, EvaluationGateway, EvaluationTarget, EvaluateRequest, http_client},
    render, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Evaluate(args)) => match run_evaluate(&config, args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Evaluation failed: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Evaluate one context from the terminal
async fn run_evaluate(config: &Config, args: EvaluateArgs) -> anyhow::Result<()> {
    let context = read_context(&args.context)?;
    let target = EvaluateRequest {
        project_key: Some(args.project),
        environment_key: Some(args.environment),
        context: Some(context),
    }
    .validate()?;

    let http = http_client()?;
    let api = ApiClient::new(http.clone(), &config.api.base_url)?;
    let engine = RelayEngineFactory::new(http, &config.engine.base_url)?;
    let gateway = EvaluationGateway::new(api, Arc::new(engine), config.engine.init_timeout);

    let flags = gateway.evaluate_target(&args.access_token, &target).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&flags)?);
        return Ok(());
    }

    let catalog = catalog(&gateway, &args.access_token, &target).await;
    print!("{}", render::to_table(&render::render(&flags, catalog.as_ref())));
    Ok(())
}

async fn catalog(
    gateway: &EvaluationGateway,
    access_token: &str,
    target: &EvaluationTarget,
) -> Option<FlagCatalog> {
    match gateway
        .api()
        .list_flags(access_token, &target.project_key, &target.environment_key)
        .await
    {
        Ok(flags) => Some(FlagCatalog::from_flags(flags)),
        Err(e) => {
            warn!(error = %e, "Printing without flag metadata");
            None
        }
    }
}

/// Inline JSON, or `@path` naming a JSON file
fn read_context(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading context file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("context is not valid JSON")
}

/// Run the web server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting context tester"
    );

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
