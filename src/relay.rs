//! `POST /chat`: forwards a message to an OpenAI-compatible chat completion
//! API and returns the first choice.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Clone)]
struct RelayState {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

pub fn router(config: RelayConfig) -> Result<Router, RelayError> {
    let client = reqwest::Client::builder().timeout(config.timeout).build()?;
    let state = RelayState {
        client,
        config: Arc::new(config),
    };

    Ok(Router::new()
        .route("/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(state))
}

pub async fn serve(config: RelayConfig, bind: &str) -> anyhow::Result<()> {
    if config.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; upstream requests will be unauthenticated");
    }

    let app = router(config).context("failed to build the upstream client")?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("chat relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("chat relay stopped")?;
    Ok(())
}

async fn chat(
    State(state): State<RelayState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ErrorBody>)> {
    match complete(&state, &request.message).await {
        Ok(reply) => Ok(Json(ChatReply { reply })),
        Err(e) => {
            error!("chat relay failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    detail: e.to_string(),
                }),
            ))
        }
    }
}

async fn complete(state: &RelayState, message: &str) -> Result<String, RelayError> {
    let url = format!(
        "{}/v1/chat/completions",
        state.config.base_url.trim_end_matches('/')
    );
    let body = serde_json::json!({
        "model": state.config.model,
        "messages": [{"role": "user", "content": message}],
    });

    let mut request = state.client.post(&url).json(&body);
    if let Some(api_key) = &state.config.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Status { status, body });
    }

    let completion: Completion = response.json().await?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(RelayError::EmptyChoice)
}
