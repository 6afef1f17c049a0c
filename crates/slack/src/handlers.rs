//! Ingestion dispatcher and live-session event handling.

use std::{sync::Arc, time::Duration};

use {
    ferry_channels::{CanonicalMessage, RemoteSender},
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use crate::{
    cache::FILE_ID_TTL,
    error::{Error, Result},
    rtm,
    sanitize::sanitize,
    skip::{SkipContext, skip_reason},
    state::AccountContext,
    types::{MessageSubtype, SessionEvent},
    webhook,
};

/// Time the producer gets to establish itself before draining starts.
pub const WARM_UP: Duration = Duration::from_secs(1);

/// Run ingestion for one account.
///
/// Exactly one producer runs: the webhook receiver when
/// `incoming_webhook_bind` is set, the live session otherwise. Its messages
/// go through a single unbounded channel drained here by one consumer in
/// arrival order, which is what lets edit and delete IDs downstream shadow
/// the post they refer to. Every message reaching the gateway passes
/// through [`drain`].
///
/// Returns when the producer stops; a rejected token surfaces as
/// [`Error::InvalidAuth`].
pub async fn handle_slack(ctx: Arc<AccountContext>, remote: RemoteSender) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    let produce = {
        let ctx = Arc::clone(&ctx);
        async move {
            match ctx.config.incoming_webhook_bind.clone() {
                Some(bind) => {
                    debug!(account_id = %ctx.account_id, "choosing webhook based receiving");
                    let token = ctx.config.incoming_webhook_token.clone();
                    webhook::serve(&bind, ctx.account.clone(), token, tx).await
                },
                None => {
                    debug!(account_id = %ctx.account_id, "choosing token based receiving");
                    handle_slack_client(&ctx, tx).await
                },
            }
        }
    };
    let consume = async {
        tokio::time::sleep(WARM_UP).await;
        info!(account_id = %ctx.account_id, "listening for slack messages");
        drain(&ctx, rx, &remote).await
    };
    tokio::pin!(produce, consume);

    // The producer owns the only sender, so once it stops the consumer
    // finishes whatever is still queued.
    tokio::select! {
        produced = &mut produce => consume.await.and(produced),
        drained = &mut consume => match drained {
            Ok(()) => produce.await,
            Err(e) => Err(e),
        },
    }
}

/// Sanitize, attach avatars and forward, strictly in arrival order.
pub async fn drain(
    ctx: &AccountContext,
    mut messages: mpsc::UnboundedReceiver<CanonicalMessage>,
    remote: &RemoteSender,
) -> Result<()> {
    while let Some(mut msg) = messages.recv().await {
        debug!(account_id = %ctx.account_id, user = %msg.username, channel = %msg.channel, "sending message to gateway");
        msg.text = sanitize(&msg.text, |id| ctx.directory.user_name(id));
        msg.avatar = ctx.directory.avatar(&msg.user_id);

        if remote.send(msg).await.is_err() {
            warn!(account_id = %ctx.account_id, "gateway channel closed");
            return Err(ferry_channels::Error::GatewayClosed.into());
        }
    }
    Ok(())
}

/// Live-session producer: drives the RTM reader and feeds its events to
/// [`handle_session_events`].
async fn handle_slack_client(
    ctx: &AccountContext,
    messages: mpsc::UnboundedSender<CanonicalMessage>,
) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = rtm::session_loop(Arc::clone(&ctx.api), ctx.account_id.clone(), events_tx);
    let handling = handle_session_events(ctx, events_rx, &messages);
    tokio::pin!(handling);

    tokio::select! {
        result = &mut handling => result,
        // The reader dropped its sender; handle what it left behind.
        () = session => handling.await,
    }
}

pub async fn handle_session_events(
    ctx: &AccountContext,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    messages: &mpsc::UnboundedSender<CanonicalMessage>,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(ev) => {
                // New members must resolve even when joins are not forwarded.
                if ev.subtype == MessageSubtype::ChannelJoin {
                    spawn_user_refresh(ctx);
                }
                let self_name = ctx.self_name();
                let skip = SkipContext {
                    config: &ctx.config,
                    self_name: &self_name,
                    instance_tag: &ctx.instance_tag,
                    cache: &ctx.cache,
                };
                if let Some(reason) = skip_reason(&ev, &skip) {
                    debug!(account_id = %ctx.account_id, ts = %ev.ts, %reason, "skipped message");
                    continue;
                }
                match ctx.classifier.classify(&ev).await {
                    Ok(msg) => {
                        if messages.send(msg).is_err() {
                            return Ok(());
                        }
                    },
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(account_id = %ctx.account_id, channel = %ev.channel, ts = %ev.ts, error = %e, "dropping slack message");
                    },
                }
            },
            SessionEvent::OutgoingError(e) => {
                debug!(account_id = %ctx.account_id, error = %e, "slack rejected an outgoing frame");
            },
            SessionEvent::ChannelJoined { channel } => {
                debug!(account_id = %ctx.account_id, channel = %channel.name, "joined channel");
                refresh_users(ctx).await;
            },
            SessionEvent::Connected(info) => {
                info!(
                    account_id = %ctx.account_id,
                    user = %info.self_user.name,
                    team = %info.team.name,
                    "slack session connected"
                );
                ctx.set_session(info);
                if let Err(e) = ctx.directory.refresh_channels(ctx.api.as_ref()).await {
                    warn!(account_id = %ctx.account_id, error = %e, "channel directory refresh failed");
                }
                refresh_users(ctx).await;
                let swept = ctx.cache.sweep(FILE_ID_TTL);
                if swept > 0 {
                    debug!(account_id = %ctx.account_id, swept, "swept loop cache");
                }
            },
            SessionEvent::InvalidAuth(reason) => {
                error!(account_id = %ctx.account_id, reason = %reason, "invalid slack token");
                return Err(Error::InvalidAuth { reason });
            },
            SessionEvent::ConnectionError(e) => {
                error!(account_id = %ctx.account_id, error = %e, "slack connection failed");
            },
            SessionEvent::Other(_) => {},
        }
    }
    Ok(())
}

fn spawn_user_refresh(ctx: &AccountContext) {
    let api = Arc::clone(&ctx.api);
    let directory = Arc::clone(&ctx.directory);
    let account_id = ctx.account_id.clone();
    tokio::spawn(async move {
        if let Err(e) = directory.refresh_users(api.as_ref()).await {
            warn!(account_id = %account_id, error = %e, "user directory refresh failed");
        }
    });
}

async fn refresh_users(ctx: &AccountContext) {
    if let Err(e) = ctx.directory.refresh_users(ctx.api.as_ref()).await {
        warn!(account_id = %ctx.account_id, error = %e, "user directory refresh failed");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::SlackAccountConfig,
            directory::tests::MockApi,
            types::{ConnectionInfo, SlackBot, SlackMessageEvent},
        },
        ferry_channels::MessageEvent,
        std::time::Instant,
    };

    fn context(config: SlackAccountConfig) -> Arc<AccountContext> {
        let api = MockApi::default()
            .with_user("U1", "alice")
            .with_user("U2", "bob")
            .with_channel("C1", "general");
        Arc::new(AccountContext::new("work", config, Arc::new(api)))
    }

    fn message(user: &str, text: &str, ts: &str) -> SessionEvent {
        SessionEvent::Message(Box::new(SlackMessageEvent {
            channel: "C1".into(),
            user: user.into(),
            text: text.into(),
            ts: ts.into(),
            ..Default::default()
        }))
    }

    fn connected() -> SessionEvent {
        SessionEvent::Connected(ConnectionInfo {
            self_user: SlackBot {
                id: "U0".into(),
                name: "ferrybot".into(),
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn session_events_flow_until_invalid_auth() {
        let ctx = context(SlackAccountConfig::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();

        events_tx.send(connected()).unwrap();
        events_tx.send(message("U1", "hello", "1.0")).unwrap();
        // Empty text, dropped by the classifier.
        events_tx.send(message("U1", "", "1.1")).unwrap();
        // Our own post, dropped by the skip filter.
        let own = SlackMessageEvent {
            subtype: MessageSubtype::BotMessage,
            channel: "C1".into(),
            username: "ferrybot".into(),
            text: "relayed".into(),
            bot_id: "B0".into(),
            ts: "1.2".into(),
            ..Default::default()
        };
        events_tx
            .send(SessionEvent::Message(Box::new(own)))
            .unwrap();
        events_tx
            .send(SessionEvent::ConnectionError("reset by peer".into()))
            .unwrap();
        events_tx.send(message("U2", "still here", "1.3")).unwrap();
        events_tx
            .send(SessionEvent::InvalidAuth("token_revoked".into()))
            .unwrap();
        events_tx.send(message("U1", "never seen", "1.4")).unwrap();

        let err = handle_session_events(&ctx, events_rx, &tx).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ctx.self_name(), "ferrybot");

        let first = rx.recv().await.unwrap();
        assert_eq!((first.username.as_str(), first.text.as_str()), ("alice", "hello"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.id, "slack 1.3");
        assert!(rx.try_recv().is_err());
    }

    async fn wait_for_user(ctx: &AccountContext, user_id: &str) -> Option<String> {
        for _ in 0..50 {
            if let Some(name) = ctx.directory.user_name(user_id) {
                return Some(name);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    async fn join_refreshes_users(no_send_join_part: bool) {
        let ctx = context(SlackAccountConfig {
            no_send_join_part,
            ..Default::default()
        });
        assert!(ctx.directory.user_name("U2").is_none());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let join = SlackMessageEvent {
            subtype: MessageSubtype::ChannelJoin,
            channel: "C1".into(),
            user: "U2".into(),
            text: "<@U2> has joined the channel".into(),
            ts: "1.0".into(),
            ..Default::default()
        };
        events_tx.send(SessionEvent::Message(Box::new(join))).unwrap();
        drop(events_tx);

        handle_session_events(&ctx, events_rx, &tx).await.unwrap();
        assert_eq!(wait_for_user(&ctx, "U2").await.as_deref(), Some("bob"));
        // The refresh loads the whole listing, not only the joiner.
        assert_eq!(ctx.directory.user_name("U1").as_deref(), Some("alice"));
        assert_eq!(rx.try_recv().is_ok(), !no_send_join_part);
    }

    #[tokio::test]
    async fn forwarded_join_refreshes_users() {
        join_refreshes_users(false).await;
    }

    #[tokio::test]
    async fn dropped_join_still_refreshes_users() {
        join_refreshes_users(true).await;
    }

    #[tokio::test]
    async fn connected_sweeps_stale_uploads() {
        let ctx = context(SlackAccountConfig::default());
        let now = Instant::now();
        let stale = now.checked_sub(Duration::from_secs(120)).unwrap();
        ctx.cache.insert_at("fileFOLD", stale);
        ctx.cache.insert_at("filenameold.png", stale);
        ctx.cache.register_upload_id("FNEW");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        events_tx.send(connected()).unwrap();
        drop(events_tx);
        handle_session_events(&ctx, events_rx, &tx).await.unwrap();

        assert!(ctx.cache.get("fileFOLD").is_none());
        assert!(ctx.cache.get("filenameold.png").is_none());
        assert!(ctx.cache.get("fileFNEW").is_some());
        assert_eq!(ctx.cache.len(), 1);
    }

    #[tokio::test]
    async fn drain_sanitizes_in_order() {
        let ctx = context(SlackAccountConfig::default());
        ctx.directory.refresh_users(ctx.api.as_ref()).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let (remote_tx, mut remote_rx) = mpsc::channel(8);
        for (i, text) in ["hi <@U2> &amp; <!here>", "edit", "msg_delete"].iter().enumerate() {
            tx.send(CanonicalMessage {
                id: format!("slack 1.{i}"),
                text: (*text).into(),
                user_id: "U1".into(),
                event: if i == 2 {
                    MessageEvent::MsgDelete
                } else {
                    MessageEvent::None
                },
                ..Default::default()
            })
            .unwrap();
        }
        drop(tx);

        drain(&ctx, rx, &remote_tx).await.unwrap();

        let first = remote_rx.recv().await.unwrap();
        assert_eq!(first.text, "hi @bob & @here");
        assert_eq!(first.avatar, "https://avatars.example/U1.png");
        let ids: Vec<_> = [remote_rx.recv().await.unwrap(), remote_rx.recv().await.unwrap()]
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["slack 1.1", "slack 1.2"]);
    }

    #[tokio::test]
    async fn drain_reports_closed_gateway() {
        let ctx = context(SlackAccountConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::channel(1);
        drop(remote_rx);
        tx.send(CanonicalMessage::default()).unwrap();
        drop(tx);

        let err = drain(&ctx, rx, &remote_tx).await.unwrap_err();
        assert!(matches!(err, Error::Channel(ferry_channels::Error::GatewayClosed)));
    }

    #[tokio::test]
    async fn invalid_token_ends_the_instance() {
        // The mock refuses rtm.connect with invalid_auth.
        let ctx = context(SlackAccountConfig::default());
        let (remote_tx, _remote_rx) = mpsc::channel(1);
        let err = handle_slack(ctx, remote_tx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAuth { .. }));
    }
}
