use recon_review_orchestrator::{
    actions::ActionSelector,
    api::start_server,
    classifier::AnomalyClassifier,
    config::Settings,
    history::build_history_store,
    ingest,
    openrouter::{ChatApi, OpenRouterClient},
    sessions::InMemorySessionStore,
    workflow::ReviewWorkflow,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;

    info!("🚀 Reconciliation Review Orchestrator - API Server");
    info!("📍 Port: {}", settings.port);
    info!("🤖 Review model: {}", settings.model);

    // Create components
    let history = build_history_store();
    if let Some(csv_path) = settings.history_csv_path.as_deref() {
        let loaded = ingest::load_history_csv(history.as_ref(), Path::new(csv_path)).await?;
        info!("📊 History dataset: {} rows from {}", loaded, csv_path);
    }

    let chat: Arc<dyn ChatApi> = Arc::new(OpenRouterClient::new(
        settings.api_key.clone(),
        settings.base_url.clone(),
    ));
    let classifier = AnomalyClassifier::new(chat.clone(), settings.model.clone());
    let selector = ActionSelector::new(chat, settings.action_model.clone(), settings.model.clone());
    let sessions = Box::new(InMemorySessionStore::new());

    // Create workflow
    let workflow = Arc::new(ReviewWorkflow::new(
        history.clone(),
        sessions,
        classifier,
        selector,
        settings.prompt_template.clone(),
        settings.decision_mode,
    ));

    info!("✅ Review workflow initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(workflow, history, settings.port).await?;

    Ok(())
}
