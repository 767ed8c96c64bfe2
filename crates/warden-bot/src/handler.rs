//! Inbound-event handling: routing, the moderation filter steps, and
//! support-session turns.
//!
//! Routing is mutually exclusive per message: a private message from an
//! author with an active session goes to the support path and is never
//! filtered; everything else goes through the moderation filter. Messages
//! the bot authored itself are dropped first.
//!
//! No error escapes [`EventHandler::handle_event`]: delivery and backend
//! failures are absorbed per step, and anything unexpected is logged with
//! author context at the top.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use moderation::{ModerationStore, PatternSet, StrikeOutcome};

use crate::backend::SupportBackend;
use crate::gateway::{ChannelKind, ChatGateway, GatewayEvent, MessageEvent};

/// Private invitation sent on the third strike.
const INVITE_TEXT: &str = "👋 Hey, I noticed you've had a few rough moments. \
I'm here to talk privately. Just reply to this message and type `exit` \
anytime to end our chat. 🤖";

/// Acknowledgment sent when a session is closed.
const CLOSING_TEXT: &str =
    "🫂 Session closed. You're always welcome to talk again. Take care!";

/// Fixed apology sent when the language backend fails.
const FALLBACK_TEXT: &str = "I'm having trouble responding right now.";

/// Command that ends an active session.
const EXIT_COMMAND: &str = "exit";

fn warning_text(author_name: &str, count: u8) -> String {
    format!(
        "{author_name}, your message was removed for inappropriate language. \
         Warning {count}/3."
    )
}

fn invite_failed_text(author_name: &str) -> String {
    format!("{author_name}, I tried to DM you but couldn't. Please check your privacy settings.")
}

/// Routes every gateway event and runs the moderation / support flows.
pub struct EventHandler {
    gateway: Arc<dyn ChatGateway>,
    backend: Arc<dyn SupportBackend>,
    store: Arc<ModerationStore>,
    patterns: PatternSet,
}

impl EventHandler {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        backend: Arc<dyn SupportBackend>,
        store: Arc<ModerationStore>,
    ) -> Self {
        Self {
            gateway,
            backend,
            store,
            patterns: PatternSet::standard(),
        }
    }

    /// Top-level entry point. Absorbs every error.
    pub async fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready { identity } => {
                info!(%identity, "Logged in");
            }
            GatewayEvent::Command { name, channel } => {
                if name == "ping" {
                    let reply = match self.gateway.latency_ms().await {
                        Some(ms) => format!("Pong! Latency: {ms}ms"),
                        None => "Pong!".to_string(),
                    };
                    if let Err(e) = self.gateway.send_message(&channel, &reply).await {
                        warn!(error = %e, "Failed to answer ping command");
                    }
                }
            }
            GatewayEvent::Message(msg) => {
                if msg.author_is_bot {
                    return;
                }
                let author = msg.author.clone();
                if let Err(e) = self.route_message(msg).await {
                    error!(author = %author, error = %e, "Message handler failed");
                }
            }
        }
    }

    /// Decide, once per message, which of the two paths handles it.
    async fn route_message(&self, msg: MessageEvent) -> Result<()> {
        let in_session = self.store.in_session(msg.author.as_str())?;
        if msg.channel_kind == ChannelKind::Direct && in_session {
            self.support_turn(&msg).await
        } else {
            self.moderate(&msg).await
        }
    }

    /// The moderation filter: classify, remove, warn, escalate.
    async fn moderate(&self, msg: &MessageEvent) -> Result<()> {
        let content = msg.content.to_lowercase();
        if !self.patterns.is_match(&content) {
            return Ok(());
        }

        if let Err(e) = self.gateway.delete_message(&msg.channel, &msg.id).await {
            warn!(author = %msg.author, error = %e, "Failed to delete message");
        }

        let outcome = self.store.record_strike(msg.author.as_str())?;

        let warning = warning_text(&msg.author_name, outcome.warning_count());
        if let Err(e) = self.gateway.send_message(&msg.channel, &warning).await {
            warn!(author = %msg.author, error = %e, "Failed to post warning");
        }

        if outcome == StrikeOutcome::Escalate {
            self.escalate(msg).await?;
        }
        Ok(())
    }

    /// Third strike: offer a private support session.
    ///
    /// The strike counter is already reset; a failed invitation only skips
    /// session creation.
    async fn escalate(&self, msg: &MessageEvent) -> Result<()> {
        match self.gateway.send_direct(&msg.author, INVITE_TEXT).await {
            Ok(()) => {
                self.store.open_session(msg.author.as_str())?;
                info!(author = %msg.author, "Support session opened");
            }
            Err(e) => {
                warn!(author = %msg.author, error = %e, "Could not deliver private invitation");
                let notice = invite_failed_text(&msg.author_name);
                if let Err(e) = self.gateway.send_message(&msg.channel, &notice).await {
                    warn!(author = %msg.author, error = %e, "Failed to post invitation notice");
                }
            }
        }
        Ok(())
    }

    /// One support-session turn in a private channel.
    async fn support_turn(&self, msg: &MessageEvent) -> Result<()> {
        let content = msg.content.trim();

        // The exit command wins over everything else.
        if content.eq_ignore_ascii_case(EXIT_COMMAND) {
            self.store.close_session(msg.author.as_str())?;
            info!(author = %msg.author, "Support session closed");
            if let Err(e) = self.gateway.send_message(&msg.channel, CLOSING_TEXT).await {
                warn!(author = %msg.author, error = %e, "Failed to send closing message");
            }
            return Ok(());
        }

        let prompt = self.store.append_user_turn(msg.author.as_str(), content)?;

        match self.backend.reply(&prompt).await {
            Ok(reply) => {
                self.store.append_reply(msg.author.as_str(), &reply)?;
                if let Err(e) = self.gateway.send_message(&msg.channel, &reply).await {
                    warn!(author = %msg.author, error = %e, "Failed to relay reply");
                }
            }
            Err(e) => {
                // The failed turn leaves no trace beyond the user's own entry.
                error!(author = %msg.author, error = %e, "Backend completion failed");
                if let Err(e) = self.gateway.send_message(&msg.channel, FALLBACK_TEXT).await {
                    warn!(author = %msg.author, error = %e, "Failed to send fallback message");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSupportBackend;
    use crate::gateway::{AuthorId, ChannelId, GatewayError, MessageId};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Gateway fake that accepts everything and records nothing.
    struct NullGateway;

    #[async_trait]
    impl ChatGateway for NullGateway {
        async fn delete_message(
            &self,
            _channel: &ChannelId,
            _message: &MessageId,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_message(&self, _channel: &ChannelId, _text: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_direct(&self, _author: &AuthorId, _text: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn register_command(
            &self,
            _name: &str,
            _description: &str,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn latency_ms(&self) -> Option<u64> {
            Some(42)
        }
    }

    /// Gateway fake that records sent texts.
    #[derive(Default)]
    struct SendRecorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatGateway for SendRecorder {
        async fn delete_message(
            &self,
            _channel: &ChannelId,
            _message: &MessageId,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_message(&self, _channel: &ChannelId, text: &str) -> Result<(), GatewayError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_direct(&self, _author: &AuthorId, _text: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn register_command(
            &self,
            _name: &str,
            _description: &str,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn latency_ms(&self) -> Option<u64> {
            None
        }
    }

    fn direct_message(author: &str, content: &str) -> MessageEvent {
        MessageEvent {
            id: MessageId("m-1".into()),
            channel: ChannelId(format!("dm-{author}")),
            channel_kind: ChannelKind::Direct,
            author: AuthorId(author.into()),
            author_name: author.to_string(),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_support_turn_sends_full_transcript_prompt() {
        let store = Arc::new(ModerationStore::new());
        store.open_session("u-1").unwrap();

        let mut backend = MockSupportBackend::new();
        backend
            .expect_reply()
            .withf(|prompt| prompt == "User: I feel stressed\nTherapist:")
            .times(1)
            .returning(|_| Ok("Tell me more".to_string()));

        let handler = EventHandler::new(Arc::new(NullGateway), Arc::new(backend), store.clone());
        handler
            .handle_event(GatewayEvent::Message(direct_message("u-1", "I feel stressed")))
            .await;

        assert_eq!(
            store.transcript("u-1").unwrap(),
            vec!["User: I feel stressed", "Therapist: Tell me more"]
        );
    }

    #[tokio::test]
    async fn test_second_turn_resends_whole_window() {
        let store = Arc::new(ModerationStore::new());
        store.open_session("u-1").unwrap();
        store.append_user_turn("u-1", "hello").unwrap();
        store.append_reply("u-1", "hi there").unwrap();

        let mut backend = MockSupportBackend::new();
        backend
            .expect_reply()
            .withf(|prompt| {
                prompt == "User: hello\nTherapist: hi there\nUser: still anxious\nTherapist:"
            })
            .times(1)
            .returning(|_| Ok("That sounds hard".to_string()));

        let handler = EventHandler::new(Arc::new(NullGateway), Arc::new(backend), store);
        handler
            .handle_event(GatewayEvent::Message(direct_message("u-1", "still anxious")))
            .await;
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_only_user_turn() {
        let store = Arc::new(ModerationStore::new());
        store.open_session("u-1").unwrap();

        let mut backend = MockSupportBackend::new();
        backend
            .expect_reply()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("quota exhausted")));

        let gateway = Arc::new(SendRecorder::default());
        let handler = EventHandler::new(gateway.clone(), Arc::new(backend), store.clone());
        handler
            .handle_event(GatewayEvent::Message(direct_message("u-1", "are you there?")))
            .await;

        assert_eq!(
            store.transcript("u-1").unwrap(),
            vec!["User: are you there?"]
        );
        assert_eq!(gateway.sent.lock().unwrap().clone(), vec![FALLBACK_TEXT]);
    }

    #[tokio::test]
    async fn test_exit_skips_backend_entirely() {
        let store = Arc::new(ModerationStore::new());
        store.open_session("u-1").unwrap();

        // No expectation set: any reply() call would panic the test.
        let backend = MockSupportBackend::new();

        let gateway = Arc::new(SendRecorder::default());
        let handler = EventHandler::new(gateway.clone(), Arc::new(backend), store.clone());
        handler
            .handle_event(GatewayEvent::Message(direct_message("u-1", "  Exit ")))
            .await;

        assert!(!store.in_session("u-1").unwrap());
        assert_eq!(gateway.sent.lock().unwrap().clone(), vec![CLOSING_TEXT]);
    }

    #[tokio::test]
    async fn test_bot_messages_are_dropped() {
        let store = Arc::new(ModerationStore::new());
        let backend = MockSupportBackend::new();
        let gateway = Arc::new(SendRecorder::default());
        let handler = EventHandler::new(gateway.clone(), Arc::new(backend), store.clone());

        let mut msg = direct_message("u-1", "fuck");
        msg.author_is_bot = true;
        msg.channel_kind = ChannelKind::Shared;
        handler.handle_event(GatewayEvent::Message(msg)).await;

        assert_eq!(store.strike_count("u-1").unwrap(), 0);
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_command_reports_latency() {
        let store = Arc::new(ModerationStore::new());
        let backend = MockSupportBackend::new();

        // NullGateway reports 42ms but drops sends; use a recorder with latency.
        struct PingGateway(SendRecorder);

        #[async_trait]
        impl ChatGateway for PingGateway {
            async fn delete_message(
                &self,
                channel: &ChannelId,
                message: &MessageId,
            ) -> Result<(), GatewayError> {
                self.0.delete_message(channel, message).await
            }

            async fn send_message(
                &self,
                channel: &ChannelId,
                text: &str,
            ) -> Result<(), GatewayError> {
                self.0.send_message(channel, text).await
            }

            async fn send_direct(
                &self,
                author: &AuthorId,
                text: &str,
            ) -> Result<(), GatewayError> {
                self.0.send_direct(author, text).await
            }

            async fn register_command(
                &self,
                name: &str,
                description: &str,
            ) -> Result<(), GatewayError> {
                self.0.register_command(name, description).await
            }

            async fn latency_ms(&self) -> Option<u64> {
                Some(17)
            }
        }

        let gateway = Arc::new(PingGateway(SendRecorder::default()));
        let handler = EventHandler::new(gateway.clone(), Arc::new(backend), store);
        handler
            .handle_event(GatewayEvent::Command {
                name: "ping".into(),
                channel: ChannelId("c-1".into()),
            })
            .await;

        assert_eq!(
            gateway.0.sent.lock().unwrap().clone(),
            vec!["Pong! Latency: 17ms"]
        );
    }
}
