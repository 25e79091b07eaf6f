use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_gateway=info,tower_http=debug".into()),
        )
        .init();

    // config file comes from CONFIG_PATH; a missing file falls back to defaults
    let config = parley_core::config::ParleyConfig::load(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        parley_core::config::ParleyConfig::default()
    });

    let api_key = std::env::var("OPENAI_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow::anyhow!("OPENAI_KEY is not set"))?;

    let conn = rusqlite::Connection::open(&config.database.path)?;
    parley_memory::db::init_db(&conn)?;

    let ids = Arc::new(parley_core::ids::MessageIdGen::new(0));
    let store = parley_memory::ConversationStore::new(conn, ids);
    let memory = Arc::new(parley_memory::MemoryManager::new(store, &config.memory));
    let llm = Arc::new(parley_llm::OpenAiClient::new(
        config.openai.base_url.clone(),
        api_key,
    ));
    let chat = parley_chat::ChatService::new(memory, llm);

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, chat));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("parley gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
