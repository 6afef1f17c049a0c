//! Live RTM session reader with auto-reconnect.

use std::{sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::{
    api::SlackApi,
    error::{Error, Result},
    types::SessionEvent,
};

/// Maximum reconnect backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Run sessions back to back with exponential backoff. Returns when the
/// token is rejected or nobody listens for events any more.
pub async fn session_loop(
    api: Arc<dyn SlackApi>,
    account_id: String,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut backoff = Duration::from_secs(1);

    loop {
        info!(account_id = %account_id, "connecting to slack rtm");

        let outcome = match api.rtm_connect().await {
            Ok(info) => {
                backoff = Duration::from_secs(1);
                connect_and_run(info.url.clone(), SessionEvent::Connected(info), &events).await
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => debug!(account_id = %account_id, "rtm session closed"),
            Err(Error::InvalidAuth { reason }) => {
                let _ = events.send(SessionEvent::InvalidAuth(reason));
                return;
            },
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "rtm connection failed");
                if events.send(SessionEvent::ConnectionError(e.to_string())).is_err() {
                    return;
                }
            },
        }

        if events.is_closed() {
            return;
        }

        info!(account_id = %account_id, delay_ms = backoff.as_millis(), "reconnecting after delay");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Single session: open the socket, announce it, then forward frames.
async fn connect_and_run(
    url: String,
    connected: SessionEvent,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    let (ws_stream, _response) = connect_async(url.as_str()).await?;
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    if events.send(connected).is_err() {
        return Ok(());
    }

    while let Some(msg) = ws_reader.next().await {
        match msg? {
            Message::Text(text) => match SessionEvent::from_frame(text.as_str()) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
                Err(e) => debug!(error = %e, "undecodable rtm frame"),
            },
            Message::Ping(data) => ws_sink.send(Message::Pong(data)).await?,
            Message::Close(_) => return Ok(()),
            _ => {},
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{api::HttpSlackApi, directory::tests::MockApi},
        secrecy::Secret,
        serde_json::json,
        tokio::net::TcpListener,
    };

    #[tokio::test]
    async fn invalid_auth_stops_the_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session_loop(Arc::new(MockApi::default()), "work".into(), tx));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::InvalidAuth(reason) if reason == "invalid_auth"));
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn forwards_frames_after_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"hello"}"#.to_string().into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"type":"message","channel":"C1","user":"U1","text":"hi","ts":"1.0"}"#
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
            // Keep the socket open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rtm.connect")
            .with_status(200)
            .with_body(
                json!({"ok": true, "url": ws_url, "self": {"id": "U0", "name": "ferrybot"},
                       "team": {"id": "T1", "name": "Acme", "domain": "acme"}})
                .to_string(),
            )
            .create_async()
            .await;
        let api = Arc::new(HttpSlackApi::new(server.url(), Secret::new("xoxb".into())));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session_loop(api, "work".into(), tx));

        let connected = rx.recv().await.unwrap();
        assert!(matches!(connected, SessionEvent::Connected(info) if info.self_user.name == "ferrybot"));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Other(kind) if kind == "hello"));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Message(ev) if ev.text == "hi"));

        drop(rx);
        handle.abort();
    }
}
