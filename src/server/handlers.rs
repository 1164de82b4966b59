use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::{BrokerStats, PublishMessage};
use crate::persistence::NewMessage;
use crate::server::AppState;
use crate::server::auth::AuthUser;
use crate::server::error::ApiError;
use crate::transport::message::{
    ChatMessage, MessageCreatedEnvelope, MessageDeletedEnvelope, validate_topic,
};
use crate::transport::serve_socket;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: BrokerStats,
}

pub async fn healthcheck(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.broker.stats().await?;
    Ok(Json(HealthResponse { status: "ok", stats }))
}

pub async fn ws_upgrade(
    user: AuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let broker = state.broker.clone();
    let pump = state.pump;
    ws.on_upgrade(move |socket| async move {
        serve_socket(socket, user.principal, broker, pump).await;
    })
}

#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    pub topic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

/// Forward the raw request body to every subscriber of `?topic=`.
pub async fn publish(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> Result<Json<PublishResponse>, ApiError> {
    let topic = query
        .topic
        .ok_or_else(|| ApiError::bad_request("Missing topic"))?;
    validate_topic(&topic, state.pump.max_topic_len).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let message = PublishMessage::new(topic, body).with_origin(format!("publish:{}", user.principal));
    let delivered = state.broker.publish(message).await?;
    Ok(Json(PublishResponse { delivered }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    /// Display name of the sender, echoed in the broadcast.
    pub user: String,
    #[serde(rename = "connectionID")]
    pub connection_id: u64,
    pub text: String,
}

/// Store a chat message for a conversation and broadcast it on `channel`.
pub async fn create_message(
    user: AuthUser,
    State(state): State<AppState>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageCreatedEnvelope>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    validate_topic(&request.channel, state.pump.max_topic_len)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let conversation = state
        .store
        .conversation(request.connection_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Unknown connection {}", request.connection_id)))?;

    let stored = state
        .store
        .save_message(NewMessage {
            conversation_id: conversation.id,
            channel: request.channel.clone(),
            text: request.text,
            source_user_id: conversation.source_user_id,
            source_user: conversation.source_user,
            destination_user_id: conversation.destination_user_id,
        })
        .await?;

    let envelope = MessageCreatedEnvelope {
        channel: request.channel,
        kind: request.kind,
        sub_type: request.sub_type,
        message: ChatMessage {
            id: stored.id,
            created_at: stored.created_at,
            message: stored.text,
            read_by: stored.read_by,
            user: request.user,
        },
    };

    let message = PublishMessage::json(envelope.channel.clone(), &envelope)?
        .with_origin(format!("message:{}", user.principal));
    let delivered = state.broker.publish(message).await?;
    info!(id = stored.id, channel = %envelope.channel, delivered, "message stored");

    Ok(Json(envelope))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub channel: String,
}

/// Delete a stored message and tell `channel` about it.
pub async fn delete_message(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid message id {id}")))?;
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    validate_topic(&request.channel, state.pump.max_topic_len)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if !state.store.delete_message(id).await? {
        return Err(ApiError::not_found(format!("Message {id} not found")));
    }

    let envelope = MessageDeletedEnvelope::new(request.channel, id);
    let message = PublishMessage::json(envelope.channel.clone(), &envelope)?
        .with_origin(format!("delete:{}", user.principal));
    let delivered = state.broker.publish(message).await?;
    info!(id, channel = %envelope.channel, delivered, "message deleted");

    Ok(StatusCode::OK)
}
