use finance_query_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    completion::CompletionService,
    config::OrchestratorConfig,
    gemini::GeminiClient,
    registry::create_default_registry,
    state::build_data_store,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Finance Query Orchestrator - API Server");
    info!("Port: {}", api_port);

    let config = OrchestratorConfig::from_env();

    // Without a key the generative paths are disabled; deterministic ones still answer.
    let completion: Option<Arc<dyn CompletionService>> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) => match GeminiClient::new(key) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Gemini client unavailable: {}", e);
                None
            }
        },
        Err(_) => {
            warn!("GEMINI_API_KEY not set; generative classification and synthesis disabled");
            None
        }
    };

    let registry = Arc::new(create_default_registry(&config));
    info!("Registered agents: {:?}", registry.list());

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        registry,
        build_data_store(),
        completion,
    ));

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
