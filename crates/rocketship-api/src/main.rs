// Rocketship engine server

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use rocketship_api::{auth::AuthConfig, router, AppState, EngineService};
use rocketship_dsl::EnvMap;
use rocketship_plugins::PluginRegistry;
use rocketship_store::{MemoryRunStore, PostgresRunStore, RunStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        rocketship_api::runs::create_run,
        rocketship_api::runs::list_runs,
        rocketship_api::runs::get_run,
        rocketship_api::runs::cancel_run,
        rocketship_api::logs::add_log,
        rocketship_api::steps::upsert_step,
        rocketship_api::streams::stream_logs,
        rocketship_api::streams::stream_steps,
        rocketship_api::discovery::get_discovery,
    ),
    components(
        schemas(
            rocketship_contracts::Run,
            rocketship_contracts::RunStatus,
            rocketship_contracts::TestExecution,
            rocketship_contracts::StepRecord,
            rocketship_contracts::StepStatus,
            rocketship_contracts::LogEntry,
            rocketship_contracts::Discovery,
            rocketship_api::runs::CreateRunRequest,
            rocketship_api::runs::CreateRunResponse,
            rocketship_api::runs::ListRunsParams,
            rocketship_api::runs::ErrorBody,
            rocketship_api::logs::AddLogRequest,
            rocketship_api::logs::AddLogResponse,
            rocketship_api::steps::UpsertStepRequest,
            rocketship_api::steps::UpsertStepResponse,
        )
    ),
    tags(
        (name = "runs", description = "Run submission and queries"),
        (name = "logs", description = "Log ingestion"),
        (name = "steps", description = "Step record ingestion"),
        (name = "streams", description = "Live log and step streaming"),
        (name = "discovery", description = "Capability negotiation")
    ),
    info(
        title = "Rocketship Engine API",
        description = "Run submission, persistence, and streaming for the test-execution core",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rocketship=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("rocketship-engine starting...");

    // Storage: Postgres when configured, embedded in-memory otherwise
    let store: Arc<dyn RunStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let store = PostgresRunStore::connect(&database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database, migrations applied");
            Arc::new(store)
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using embedded in-memory store");
            Arc::new(MemoryRunStore::new())
        }
    };

    // Environment for {{ .env.* }}: process env over an optional .env file
    let env: BTreeMap<String, String> = match std::env::var("ROCKETSHIP_ENV_FILE") {
        Ok(path) => EnvMap::from_process_and_file(std::path::Path::new(&path))
            .context("Failed to read env file")?
            .into_map(),
        Err(_) => EnvMap::from_process().into_map(),
    };

    let auth = AuthConfig::from_env();
    if auth.required() {
        tracing::info!("Bearer-token auth enabled");
    }

    let service = EngineService::new(store, PluginRegistry::builtin(), env);
    let state = AppState {
        service,
        auth_required: auth.required(),
    };

    let app = router(state, auth)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let port = std::env::var("ROCKETSHIP_PORT").unwrap_or_else(|_| "7700".to_string());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
