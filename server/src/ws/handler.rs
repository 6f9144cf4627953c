use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        RawQuery, State,
    },
    http::HeaderMap,
    response::Response,
};

use crate::auth::{resolve_identity, AuthError};
use crate::state::AppState;
use crate::ws::actor;

/// WebSocket close codes for rejected upgrades:
/// 4001 = session expired
/// 4002 = session missing or invalid
const CLOSE_SESSION_EXPIRED: u16 = 4001;
const CLOSE_SESSION_INVALID: u16 = 4002;

/// GET /ws
/// WebSocket upgrade endpoint. The session comes from the `jwt_token` cookie,
/// a Bearer header or `?token=`. On auth failure the socket is upgraded and
/// immediately closed with a code telling the client why; nothing is
/// registered with the hub.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let max_message_size = state.hub_config.max_message_size;
    let ws = ws
        .max_message_size(max_message_size)
        .max_frame_size(max_message_size);

    match resolve_identity(&state.jwt_secret, &headers, query.as_deref()) {
        Ok(claims) => {
            tracing::info!(
                user_id = claims.user_id,
                role = %claims.role,
                "WebSocket connection authenticated"
            );
            let user_id = claims.user_id;
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_SESSION_EXPIRED, "Session expired"),
                AuthError::Missing | AuthError::Invalid(_) => {
                    (CLOSE_SESSION_INVALID, "Session invalid")
                }
            };

            tracing::warn!(
                close_code,
                reason,
                error = %err,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
