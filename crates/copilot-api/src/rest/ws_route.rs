use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use std::sync::Arc;

use crate::state::AppState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bridge = state.bridge.clone();
    ws.on_upgrade(move |socket| bridge.handle_socket(socket))
}
