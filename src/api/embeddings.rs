//! POST /v1/embeddings
//!
//! The request pipeline: authenticate, parse, validate, canonicalize, look
//! each logical input up in the store, fetch the misses from the upstream in
//! one call, persist the new vectors, and reassemble the response in request
//! order. Every request gets a fresh id and exactly one completion log line.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::AppState;
use crate::auth;
use crate::codec;
use crate::error::AppError;
use crate::input::EmbeddingInput;
use crate::upstream::Usage;

pub const EMBEDDINGS_PATH: &str = "/v1/embeddings";

/// Sentinel stored in the `dimension` column when the client did not ask for
/// an explicit dimension.
const DEFAULT_DIMENSION: u32 = 0;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    /// String, string array, token sequence, or token-sequence array;
    /// classified by [`EmbeddingInput::from_value`].
    pub input: Value,
    pub model: String,
    #[serde(default)]
    pub encoding_format: Option<String>,
    #[serde(default)]
    pub dimensions: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodingFormat {
    Float,
    Base64,
}

impl EncodingFormat {
    fn parse(value: Option<&str>) -> Result<Self, AppError> {
        match value {
            None | Some("float") => Ok(Self::Float),
            Some("base64") => Ok(Self::Base64),
            Some(other) => Err(AppError::BadRequest(format!(
                "encoding_format must be \"float\" or \"base64\", got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingObject>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingObject {
    pub object: &'static str,
    pub embedding: EmbeddingPayload,
    pub index: u32,
}

/// The embedding in the client's requested format.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EmbeddingPayload {
    Floats(Vec<f32>),
    Base64(String),
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub async fn create_embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    match handle(&state, &headers, &body).await {
        Ok(response) => {
            tracing::info!(
                request_id = %request_id,
                method = "POST",
                path = EMBEDDINGS_PATH,
                status = 200,
                prompt_tokens = response.usage.prompt_tokens,
                total_tokens = response.usage.total_tokens,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request complete"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                tracing::error!(
                    request_id = %request_id,
                    method = "POST",
                    path = EMBEDDINGS_PATH,
                    status = status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Request failed"
                );
            } else {
                tracing::info!(
                    request_id = %request_id,
                    method = "POST",
                    path = EMBEDDINGS_PATH,
                    status = status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request complete"
                );
            }
            err.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<EmbeddingsResponse, AppError> {
    // -- Authenticate --
    let authorization = auth::authenticate(headers, state.key_pattern.as_ref())?;

    // -- Parse --
    let request: EmbeddingsRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;

    // -- Validate --
    if !state
        .config
        .upstream
        .allowed_models
        .iter()
        .any(|m| m == &request.model)
    {
        return Err(AppError::BadRequest(format!(
            "model {:?} is not allowed",
            request.model
        )));
    }
    let format = EncodingFormat::parse(request.encoding_format.as_deref())?;
    if let Some(d) = request.dimensions {
        if !(2..=9999).contains(&d) {
            return Err(AppError::BadRequest(format!(
                "dimensions must be greater than 1 and less than 10000, got {d}"
            )));
        }
    }
    let dimension = request.dimensions.unwrap_or(DEFAULT_DIMENSION);

    // -- Canonicalize --
    let input = EmbeddingInput::from_value(&request.input)?;
    let hashes = input.hashes();

    // -- Lookup --
    let mut contents: Vec<Option<String>> = Vec::with_capacity(hashes.len());
    for hash in &hashes {
        contents.push(state.store.get(hash, &request.model, dimension).await?);
    }
    let misses: Vec<usize> = contents
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.is_none().then_some(i))
        .collect();

    // -- Fill --
    // A full cache hit is free; misses are charged at the upstream's rate.
    let mut usage = Usage::default();
    let mut model = request.model.clone();

    if !misses.is_empty() {
        let sub_input = input.subset(&misses);
        let fill = state
            .upstream
            .create_embedding(&sub_input, &request.model, request.dimensions, &authorization)
            .await?;

        if fill.data.len() != misses.len() {
            return Err(upstream_mismatch(format!(
                "upstream returned {} embeddings for {} inputs",
                fill.data.len(),
                misses.len()
            )));
        }
        usage = fill.usage;
        if !fill.model.is_empty() {
            model = fill.model;
        }

        // -- Persist --
        for item in fill.data {
            let slot = misses
                .get(item.index as usize)
                .copied()
                .ok_or_else(|| {
                    upstream_mismatch(format!("upstream returned unknown index {}", item.index))
                })?;
            let content = item.embedding.into_base64();
            if let Err(e) = state
                .store
                .put(&hashes[slot], &request.model, dimension, &content)
                .await
            {
                // The response is still correct; the next request refills.
                tracing::warn!(error = %e, hash = %hashes[slot], "Failed to persist embedding");
            }
            contents[slot] = Some(content);
        }
    }

    // -- Assemble --
    let mut data = Vec::with_capacity(contents.len());
    for (i, content) in contents.into_iter().enumerate() {
        let content = content
            .ok_or_else(|| AppError::Internal(format!("no embedding produced for input {i}")))?;
        let embedding = match format {
            EncodingFormat::Base64 => EmbeddingPayload::Base64(content),
            EncodingFormat::Float => EmbeddingPayload::Floats(codec::decode(&content)?),
        };
        data.push(EmbeddingObject {
            object: "embedding",
            embedding,
            index: i as u32,
        });
    }

    Ok(EmbeddingsResponse {
        object: "list",
        data,
        model,
        usage,
    })
}

fn upstream_mismatch(message: String) -> AppError {
    AppError::Upstream {
        status: 502,
        error_type: "upstream_error".to_string(),
        message,
    }
}
