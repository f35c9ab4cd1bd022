//! WebSocket push channel handler
//!
//! Opening a socket is the CONNECT action, closing it is DISCONNECT. Every
//! text frame in between is a control message for the dispatcher. Outbound
//! pushes arrive through the socket's queue in [`WsTransport`].
//!
//! [`WsTransport`]: crate::gateway::WsTransport

use crate::config::AppState;
use crate::dispatch::DispatchOutcome;
use crate::error::{Error, Result};
use crate::protocol::ConnectParams;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// GET /ws?connectionType=..&sub=..&selfSub=..
///
/// The bearer credential is read from `Authorization: Bearer <token>` or,
/// for browser clients, the `Authorizer` query parameter.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    params.validate()?;
    let owner = authorize_connect(&state, &headers, &params).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, params, owner)))
}

/// Check the credential and return the trusted owner for a new channel.
pub async fn authorize_connect(state: &AppState, headers: &HeaderMap, params: &ConnectParams) -> Result<String> {
    let credential = bearer_credential(headers, params)?;

    let subject = state.gate.authorize(&credential).await.map_err(|e| {
        warn!("[Socket] Credential rejected: {}", e);
        Error::AuthFailRejected(e)
    })?;

    match params.self_sub.as_deref() {
        Some(claimed) if !claimed.is_empty() && claimed != subject => {
            warn!("[Socket] selfSub {} does not match subject {}", claimed, subject);
            Err(Error::AuthFailSubjectMismatch {
                claimed: claimed.to_string(),
            })
        }
        _ => Ok(subject),
    }
}

fn bearer_credential(headers: &HeaderMap, params: &ConnectParams) -> Result<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| Error::AuthFailTokenWrongFormat)?;
        return value
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(Error::AuthFailTokenWrongFormat);
    }

    params
        .authorizer
        .clone()
        .filter(|token| !token.is_empty())
        .ok_or(Error::AuthFailNoToken)
}

/// CONNECT: attach the outbound queue, then register the channel.
pub async fn open_channel(
    state: &AppState,
    connection_id: &str,
    params: &ConnectParams,
    owner: &str,
) -> Result<mpsc::Receiver<String>> {
    let outbound = state.transport.attach(connection_id);

    if let Err(e) = state.dispatcher.connect(connection_id, params, owner).await {
        error!("[Socket] Unable to register socket {}: {}", connection_id, e);
        // The record may have been written before the failure
        close_channel(state, connection_id).await;
        return Err(e);
    }
    info!("[Socket] {} open for {}", connection_id, owner);
    Ok(outbound)
}

/// DISCONNECT: remove the record, then detach the queue.
///
/// A push to a detached queue reads as Gone and deletes the record, so the
/// queue stays attached until the disconnect fanout has run.
pub async fn close_channel(state: &AppState, connection_id: &str) -> DispatchOutcome {
    let outcome = state.dispatcher.disconnect(connection_id).await;
    state.transport.detach(connection_id);
    info!("[Socket] {} closed: {}", connection_id, outcome.body);
    outcome
}

async fn handle_socket(state: AppState, socket: WebSocket, params: ConnectParams, owner: String) {
    let connection_id = Uuid::new_v4().to_string();
    let Ok(mut outbound) = open_channel(&state, &connection_id, &params, &owner).await else {
        return;
    };

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        let mut open = true;
        // Keep draining after a send error; the queue outlives the socket
        while let Some(payload) = outbound.recv().await {
            if open && sink.send(Message::Text(payload.into())).await.is_err() {
                open = false;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let outcome = state.dispatcher.dispatch(&connection_id, text.as_str()).await;
                debug!(
                    "[Socket] {} -> {} {}",
                    connection_id,
                    outcome.status.as_u16(),
                    outcome.body
                );
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[Socket] {} receive error: {}", connection_id, e);
                break;
            }
        }
    }

    close_channel(&state, &connection_id).await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::identity::StaticIdentity;
    use crate::store::MemoryStore;
    use axum::http::{HeaderValue, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(
            StaticIdentity::new()
                .with_user("sub-alice", "alice")
                .with_user("sub-bob", "bob")
                .with_credential("token-a", "sub-alice"),
        );
        AppState::from_parts(
            ServerConfig::default(),
            store.clone(),
            store,
            identity.clone(),
            identity,
        )
    }

    fn params(self_sub: Option<&str>, authorizer: Option<&str>) -> ConnectParams {
        ConnectParams {
            connection_type: "chat".into(),
            sub: "sub-bob".into(),
            self_sub: self_sub.map(str::to_string),
            authorizer: authorizer.map(str::to_string),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_header_credential() {
        let owner = authorize_connect(&state(), &bearer("token-a"), &params(None, None))
            .await
            .unwrap();
        assert_eq!(owner, "sub-alice");
    }

    #[tokio::test]
    async fn test_query_credential() {
        let owner = authorize_connect(&state(), &HeaderMap::new(), &params(Some("sub-alice"), Some("token-a")))
            .await
            .unwrap();
        assert_eq!(owner, "sub-alice");
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let err = authorize_connect(&state(), &HeaderMap::new(), &params(None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailNoToken));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));

        let err = authorize_connect(&state(), &headers, &params(None, Some("token-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailTokenWrongFormat));
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let err = authorize_connect(&state(), &bearer("forged"), &params(None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailRejected(_)));
    }

    #[tokio::test]
    async fn test_self_sub_must_match_subject() {
        let err = authorize_connect(&state(), &bearer("token-a"), &params(Some("sub-mallory"), None))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    fn partner_of(sub: &str) -> ConnectParams {
        ConnectParams {
            connection_type: "chat".into(),
            sub: sub.into(),
            ..Default::default()
        }
    }

    fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_close_notifies_partner_after_pending_push() {
        let state = state();
        let mut alice_rx = open_channel(&state, "alice-1", &partner_of("sub-bob"), "sub-alice")
            .await
            .unwrap();
        let mut bob_rx = open_channel(&state, "bob-1", &partner_of("sub-alice"), "sub-bob")
            .await
            .unwrap();
        assert_eq!(next_json(&mut alice_rx), json!({"action": "ISONLINE", "value": "1"}));

        let sent = state
            .dispatcher
            .dispatch(
                "bob-1",
                r#"{"action":"SENDMSG","message":"bye","timestamp":1,"fromSub":"sub-bob","toSub":"sub-alice"}"#,
            )
            .await;
        assert!(sent.is_success());

        let closed = close_channel(&state, "alice-1").await;

        assert!(closed.is_success());
        assert_eq!(next_json(&mut alice_rx)["message"], "bye");
        assert_eq!(next_json(&mut bob_rx), json!({"action": "ISONLINE", "value": "0"}));
        assert!(!state.transport.is_attached("alice-1"));
        assert!(state.transport.is_attached("bob-1"));
    }

    #[tokio::test]
    async fn test_failed_open_detaches_queue() {
        let state = state();
        let err = open_channel(&state, "alice-1", &ConnectParams::default(), "sub-alice")
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(state.transport.is_empty());
    }
}
