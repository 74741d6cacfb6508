//! HTTP read surface
//!
//! Exposes the oracle's two read operations over a small JSON API so the
//! surrounding proxy (or an operator) can query it. The endpoints translate
//! the read path without adding semantics: an unknown validator is a 404, a
//! wrong ownership claim is a 409.

use crate::oracle::Oracle;
use crate::types::ValidatorPubkey;
use alloy_primitives::Address;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Build the API router.
pub fn router(oracle: Arc<Oracle>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/fee-recipient/:pubkey", get(fee_recipient))
        .layer(CorsLayer::permissive())
        .with_state(oracle)
}

async fn health(State(oracle): State<Arc<Oracle>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "highest_block": oracle.highest_block(),
    }))
}

async fn list_nodes(State(oracle): State<Arc<Oracle>>) -> Json<Value> {
    let mut nodes = Vec::new();
    oracle.for_each_node(|addr| {
        nodes.push(addr.to_string());
        true
    });
    Json(json!({
        "count": nodes.len(),
        "nodes": nodes,
    }))
}

#[derive(Debug, Deserialize)]
struct FeeRecipientQuery {
    /// Claimed owning node, to be checked against the minipool index.
    node: Option<String>,
}

async fn fee_recipient(
    State(oracle): State<Arc<Oracle>>,
    Path(pubkey): Path<String>,
    Query(query): Query<FeeRecipientQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let pubkey: ValidatorPubkey = pubkey
        .parse()
        .map_err(|e: anyhow::Error| bad_request(format!("Invalid validator pubkey: {}", e)))?;

    let node = match &query.node {
        Some(raw) => Some(
            raw.parse::<Address>()
                .map_err(|e| bad_request(format!("Invalid node address: {}", e)))?,
        ),
        None => None,
    };

    let (recipient, mismatch) = oracle.validator_fee_recipient(&pubkey, node);

    if mismatch {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "validator is not owned by the claimed node" })),
        ));
    }

    match recipient {
        Some(addr) => Ok(Json(json!({
            "pubkey": pubkey.to_string(),
            "fee_recipient": addr.to_string(),
        }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown validator" })),
        )),
    }
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}
