use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use parley_chat::ChatService;
use parley_core::ParleyConfig;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub chat: ChatService,
}

impl AppState {
    pub fn new(config: ParleyConfig, chat: ChatService) -> Self {
        Self { config, chat }
    }
}

/// Assemble the full Axum router. Every conversation-scoped route carries
/// an explicit `user_id`; authentication happens upstream of this service.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/models", get(crate::http::chat::pull_models))
        .route(
            "/v1/conversations",
            post(crate::http::chat::create_conversation).get(crate::http::chat::list_conversations),
        )
        .route(
            "/v1/conversations/{id}",
            get(crate::http::chat::get_conversation).delete(crate::http::chat::delete_conversation),
        )
        .route(
            "/v1/conversations/{id}/title",
            patch(crate::http::chat::update_title),
        )
        .route(
            "/v1/conversations/{id}/clear",
            post(crate::http::chat::clear_messages),
        )
        .route(
            "/v1/conversations/{id}/messages",
            get(crate::http::chat::list_messages),
        )
        .route("/v1/stream", post(crate::http::chat::stream))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::MessageIdGen;
    use parley_llm::OpenAiClient;
    use parley_memory::{db::init_db, ConversationStore, MemoryManager};

    #[tokio::test]
    async fn router_assembles_with_fresh_state() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = ConversationStore::new(conn, Arc::new(MessageIdGen::new(0)));
        let memory = Arc::new(MemoryManager::new(
            store,
            &parley_core::config::MemoryConfig::default(),
        ));
        let llm = Arc::new(OpenAiClient::new("http://127.0.0.1:1", "test-key"));
        let chat = ChatService::new(memory, llm);
        let state = Arc::new(AppState::new(ParleyConfig::default(), chat));
        let _router = build_router(state);
    }
}
