use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use record_service::{ErrorEntry, ErrorExtensions, Schema, Selection};

use super::{ws, AppState};

// ═══════════════════════════════════════════════════════════════
//  POST: queries and mutations
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestBody {
    Batch { selections: Vec<Selection> },
    Single(Selection),
}

pub(crate) async fn handle_post(State(state): State<AppState>, body: Bytes) -> Response {
    let selections = match serde_json::from_slice::<RequestBody>(&body) {
        Ok(RequestBody::Batch { selections }) => selections,
        Ok(RequestBody::Single(selection)) => vec![selection],
        Err(e) => {
            tracing::debug!(error = %e, "malformed request body");
            return bad_request(format!("malformed request body: {e}"));
        }
    };

    if selections.is_empty() {
        return bad_request("request selects no operations".to_string());
    }

    let response = state.router().execute_batch(&selections).await;
    Json(response).into_response()
}

#[derive(Serialize)]
struct RejectedRequest {
    data: Option<()>,
    errors: [ErrorEntry; 1],
}

fn bad_request(message: String) -> Response {
    let body = RejectedRequest {
        data: None,
        errors: [ErrorEntry {
            message,
            path: Vec::new(),
            extensions: ErrorExtensions { code: "BAD_REQUEST".to_string() },
        }],
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  GET: WebSocket upgrade or schema
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct SchemaDocument {
    #[serde(flatten)]
    schema: Schema,
    sdl: String,
}

pub(crate) async fn handle_get(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(upgrade) => ws::accept(upgrade, state),
        Err(_) => {
            let schema = state.router().schema();
            let sdl = schema.to_sdl();
            Json(SchemaDocument { schema, sdl }).into_response()
        }
    }
}
