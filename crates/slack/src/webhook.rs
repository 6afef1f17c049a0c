//! Receiver for Slack outgoing webhooks.
//!
//! Slack posts a form for every matching channel message. Only the author,
//! text and channel name survive into the canonical message; there are no
//! subtypes, files or edits on this path.

use std::sync::Arc;

use {
    axum::{
        Form, Router,
        extract::State,
        http::StatusCode,
        routing::post,
    },
    ferry_channels::CanonicalMessage,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::{net::TcpListener, sync::mpsc},
    tracing::{debug, info, warn},
};

use crate::error::Result;

/// Slack's own notices; never relayed.
const SLACKBOT: &str = "slackbot";

/// Fields of an outgoing-webhook post that the bridge uses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutgoingWebhook {
    pub token: String,
    pub channel_name: String,
    pub user_name: String,
    pub text: String,
}

#[derive(Clone)]
struct WebhookState {
    account: String,
    token: Option<Arc<Secret<String>>>,
    messages: mpsc::UnboundedSender<CanonicalMessage>,
}

pub fn router(
    account: String,
    token: Option<Secret<String>>,
    messages: mpsc::UnboundedSender<CanonicalMessage>,
) -> Router {
    Router::new()
        .route("/", post(receive))
        .with_state(WebhookState {
            account,
            token: token.map(Arc::new),
            messages,
        })
}

/// Serve the receiver on `bind` until the listener fails.
pub async fn serve(
    bind: &str,
    account: String,
    token: Option<Secret<String>>,
    messages: mpsc::UnboundedSender<CanonicalMessage>,
) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(account = %account, addr = %listener.local_addr()?, "slack webhook receiver listening");
    axum::serve(listener, router(account, token, messages)).await?;
    Ok(())
}

async fn receive(State(state): State<WebhookState>, Form(hook): Form<OutgoingWebhook>) -> StatusCode {
    if let Some(expected) = &state.token
        && hook.token != *expected.expose_secret()
    {
        warn!(account = %state.account, channel = %hook.channel_name, "rejecting webhook with wrong token");
        return StatusCode::UNAUTHORIZED;
    }

    debug!(account = %state.account, user = %hook.user_name, channel = %hook.channel_name, "received outgoing webhook");
    if hook.user_name == SLACKBOT {
        return StatusCode::OK;
    }

    let msg = CanonicalMessage {
        username: hook.user_name,
        text: hook.text,
        channel: hook.channel_name,
        account: state.account.clone(),
        ..Default::default()
    };
    if state.messages.send(msg).is_err() {
        warn!(account = %state.account, "dispatcher gone, dropping webhook message");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}
