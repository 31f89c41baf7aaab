//! Relay service: inbound direct message → command or inference → reply.
//!
//! Handles the complete message flow:
//! 1. Drop messages that are self-authored, not direct, or empty
//! 2. Execute recognized commands locally
//! 3. Otherwise append the user turn, call the model with the full history,
//!    append the reply (or the error text) as the assistant turn
//! 4. Send the reply back, chunked to the channel's length limit
//!
//! Steps 3 and 4 of one user run under that user's session lock, so a user
//! has at most one relay in flight and their history never interleaves.
//! The processor feeds each user's messages through their own worker, so
//! they are also handled in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::catalog::ModelPolicy;
use crate::commands::{Command, CommandDispatcher};
use crate::format::split_message;
use crate::inference::{reply_text, InferenceBackend};
use crate::message::{ChannelMessage, OutgoingMessage};
use crate::session::{Role, SessionStore};
use crate::traits::Channel;

/// Longest wait for the typing indicator before the inference call starts.
const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    SelfAuthored,
    NotDirect,
    Empty,
}

/// What `handle` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Ignored(IgnoreReason),
    /// Command executed; carries the reply text.
    Command(String),
    /// Relayed to the model; carries the reply text.
    Relayed(String),
}

/// The relay service. Owns the session store and hands it to the
/// dispatcher and relay steps.
pub struct RelayService<C: Channel> {
    channel: Arc<C>,
    store: Arc<SessionStore>,
    policy: Arc<ModelPolicy>,
    dispatcher: CommandDispatcher,
    backend: Arc<dyn InferenceBackend>,
    typing_timeout: Duration,
}

impl<C: Channel + 'static> RelayService<C> {
    /// Create a new relay service.
    pub fn new(
        channel: Arc<C>,
        store: Arc<SessionStore>,
        policy: ModelPolicy,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        let policy = Arc::new(policy);
        Self {
            channel,
            store,
            dispatcher: CommandDispatcher::new(policy.clone()),
            policy,
            backend,
            typing_timeout: TYPING_TIMEOUT,
        }
    }

    /// Set how long the typing indicator may delay a relay.
    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }

    /// Session store (shared).
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Process one inbound message to completion.
    pub async fn handle(&self, message: ChannelMessage) -> HandleOutcome {
        if message.from_self {
            return HandleOutcome::Ignored(IgnoreReason::SelfAuthored);
        }
        if !message.is_direct() {
            return HandleOutcome::Ignored(IgnoreReason::NotDirect);
        }
        let text = message.text.trim();
        if text.is_empty() {
            return HandleOutcome::Ignored(IgnoreReason::Empty);
        }

        tracing::info!(
            trace_id = %message.trace_id,
            channel = message.channel_type.as_str(),
            user_id = %message.user_id,
            chat_id = %message.channel_id,
            "Direct message received"
        );

        let handle = self.store.get_or_create(&message.user_id);

        if let Some(command) = Command::parse(text) {
            tracing::info!(
                trace_id = %message.trace_id,
                user_id = %message.user_id,
                command = command.name(),
                "Executing command"
            );
            let reply = self
                .dispatcher
                .execute(&self.store, &message.user_id, &command)
                .await;
            self.deliver(&message, &reply).await;
            return HandleOutcome::Command(reply);
        }

        let mut session = handle.lock().await;
        session.append_turn(Role::User, text);
        let model = self.policy.resolve(&session.model).to_string();

        let typing = self.channel.start_typing(&message.channel_id);
        match tokio::time::timeout(self.typing_timeout, typing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                trace_id = %message.trace_id,
                error = %e,
                "Failed to send typing indicator"
            ),
            Err(_) => tracing::warn!(
                trace_id = %message.trace_id,
                timeout_ms = self.typing_timeout.as_millis() as u64,
                "Typing indicator timed out"
            ),
        }

        let started = std::time::Instant::now();
        let outcome = self.backend.chat(&model, &session.history).await;
        if let Err(ref e) = outcome {
            tracing::error!(
                trace_id = %message.trace_id,
                user_id = %message.user_id,
                model = %model,
                error = %e,
                "Inference call failed"
            );
        }

        let reply = reply_text(self.backend.provider(), outcome);
        session.append_turn(Role::Assistant, reply.as_str());

        tracing::info!(
            trace_id = %message.trace_id,
            user_id = %message.user_id,
            model = %model,
            history_len = session.history.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Relay completed"
        );

        self.deliver(&message, &reply).await;
        drop(session);

        HandleOutcome::Relayed(reply)
    }

    /// Send `text` as one or more messages, in order. Stops at the first
    /// failed chunk.
    async fn deliver(&self, message: &ChannelMessage, text: &str) {
        let chunks = match self.channel.max_message_length() {
            Some(limit) => split_message(text, limit),
            None => vec![text.to_string()],
        };
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let outgoing = OutgoingMessage::reply(message, chunk);
            if let Err(e) = self.channel.send(outgoing).await {
                tracing::error!(
                    trace_id = %message.trace_id,
                    user_id = %message.user_id,
                    chat_id = %message.channel_id,
                    chunk = index + 1,
                    chunks = total,
                    error = %e,
                    "Failed to send reply"
                );
                return;
            }
        }
    }

    /// Spawn the processor. Each user gets a worker that handles their
    /// messages one at a time in arrival order; different users run in
    /// parallel. Returns once the queue is closed and every worker drained.
    pub fn spawn_processor(
        service: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(channel = service.channel.name(), "Relay processor started");
            let mut workers: HashMap<String, mpsc::UnboundedSender<ChannelMessage>> =
                HashMap::new();
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        let message = match workers.get(&message.user_id) {
                            Some(worker) => match worker.send(message) {
                                Ok(()) => continue,
                                // Worker gone (panicked); start a new one.
                                Err(mpsc::error::SendError(message)) => message,
                            },
                            None => message,
                        };

                        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
                        let user_id = message.user_id.clone();
                        if worker_tx.send(message).is_ok() {
                            workers.insert(user_id, worker_tx);
                            tasks.spawn(Self::run_worker(service.clone(), worker_rx));
                        }
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "User worker panicked");
                        }
                    }
                }
            }

            // Closing every worker queue lets the workers finish and exit.
            drop(workers);
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "User worker panicked");
                }
            }

            tracing::info!("Relay processor stopped");
        })
    }

    async fn run_worker(service: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ChannelMessage>) {
        while let Some(message) = rx.recv().await {
            service.handle(message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, InferenceResult};
    use crate::message::{ChannelType, ConversationKind};
    use crate::session::Turn;
    use crate::traits::{ChannelError, ChannelResult};
    use async_trait::async_trait;
    use relay_common::ProviderKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<OutgoingMessage>>,
        typing: Mutex<u32>,
        typing_delay: Option<Duration>,
        fail_sends: bool,
    }

    impl RecordingChannel {
        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn max_message_length(&self) -> Option<usize> {
            Some(crate::format::DISCORD_MAX_MESSAGE_LENGTH)
        }

        async fn init(&mut self) -> ChannelResult<()> {
            Ok(())
        }

        async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
            if self.fail_sends {
                return Err(ChannelError::SendFailed("closed".into()));
            }
            self.sent.lock().unwrap().push(message);
            Ok("id".into())
        }

        async fn start_typing(&self, _channel_id: &str) -> ChannelResult<()> {
            *self.typing.lock().unwrap() += 1;
            if let Some(delay) = self.typing_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }

        async fn listen<F>(&self, _callback: F) -> ChannelResult<()>
        where
            F: Fn(ChannelMessage) + Send + Sync + 'static,
        {
            Ok(())
        }

        async fn health_check(&self) -> ChannelResult<()> {
            Ok(())
        }

        async fn shutdown(&self) -> ChannelResult<()> {
            Ok(())
        }
    }

    /// Answers with a fixed outcome and records what it was called with.
    struct ScriptedBackend {
        reply: fn() -> InferenceResult<Option<String>>,
        calls: Mutex<Vec<(String, Vec<Turn>)>>,
    }

    impl ScriptedBackend {
        fn new(reply: fn() -> InferenceResult<Option<String>>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        fn provider(&self) -> ProviderKind {
            ProviderKind::OpenRouter
        }

        async fn chat(&self, model: &str, history: &[Turn]) -> InferenceResult<Option<String>> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), history.to_vec()));
            (self.reply)()
        }
    }

    fn service(
        channel: Arc<RecordingChannel>,
        backend: Arc<ScriptedBackend>,
    ) -> RelayService<RecordingChannel> {
        RelayService::new(
            channel,
            Arc::new(SessionStore::new("deepseek-v3")),
            ModelPolicy::Catalog(crate::catalog::ModelCatalog::builtin()),
            backend,
        )
    }

    fn dm(text: &str) -> ChannelMessage {
        ChannelMessage::direct(ChannelType::Discord, "dm-1", "u1", text)
    }

    #[tokio::test]
    async fn relays_and_records_both_turns() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("hi there".into())));
        let svc = service(channel.clone(), backend.clone());

        let outcome = svc.handle(dm("hello")).await;
        assert_eq!(outcome, HandleOutcome::Relayed("hi there".into()));

        let session = svc.store().snapshot("u1").await.unwrap();
        assert_eq!(
            session.history,
            vec![Turn::user("hello"), Turn::assistant("hi there")]
        );
        assert_eq!(channel.sent_texts(), vec!["hi there".to_string()]);
        assert_eq!(*channel.typing.lock().unwrap(), 1);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0, "deepseek/deepseek-chat");
        assert_eq!(calls[0].1, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn failed_call_becomes_assistant_turn() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| {
            Err(InferenceError::Status {
                status: 500,
                message: Some("boom".into()),
            })
        });
        let svc = service(channel.clone(), backend);

        svc.handle(dm("hello")).await;

        let session = svc.store().snapshot("u1").await.unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1], Turn::assistant("OpenRouter API error: boom"));
        assert_eq!(channel.sent_texts(), vec!["OpenRouter API error: boom".to_string()]);
    }

    #[tokio::test]
    async fn long_reply_is_chunked_in_order() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("ab".repeat(2100))));
        let svc = service(channel.clone(), backend);

        svc.handle(dm("long please")).await;

        let sent = channel.sent_texts();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|c| c.chars().count() <= 2000));
        assert_eq!(sent.concat(), "ab".repeat(2100));
    }

    #[tokio::test]
    async fn ignores_self_guild_and_empty_messages() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("x".into())));
        let svc = service(channel.clone(), backend.clone());

        let mut own = dm("hello");
        own.from_self = true;
        assert_eq!(
            svc.handle(own).await,
            HandleOutcome::Ignored(IgnoreReason::SelfAuthored)
        );

        let mut guild = dm("hello");
        guild.kind = ConversationKind::Guild;
        assert_eq!(
            svc.handle(guild).await,
            HandleOutcome::Ignored(IgnoreReason::NotDirect)
        );

        assert_eq!(
            svc.handle(dm("   ")).await,
            HandleOutcome::Ignored(IgnoreReason::Empty)
        );

        assert!(svc.store().is_empty());
        assert!(channel.sent_texts().is_empty());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commands_never_reach_backend() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("x".into())));
        let svc = service(channel.clone(), backend.clone());

        let outcome = svc.handle(dm("!current")).await;
        assert!(matches!(outcome, HandleOutcome::Command(_)));
        assert!(backend.calls.lock().unwrap().is_empty());
        assert_eq!(svc.store().len(), 1);
        assert_eq!(*channel.typing.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn send_failure_keeps_history() {
        let channel = Arc::new(RecordingChannel {
            fail_sends: true,
            ..Default::default()
        });
        let backend = ScriptedBackend::new(|| Ok(Some("reply".into())));
        let svc = service(channel, backend);

        let outcome = svc.handle(dm("hello")).await;
        assert_eq!(outcome, HandleOutcome::Relayed("reply".into()));
        assert_eq!(svc.store().snapshot("u1").await.unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn processor_drains_queue_before_stopping() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("ok".into())));
        let svc = Arc::new(service(channel.clone(), backend));

        let (tx, rx) = mpsc::unbounded_channel();
        let processor = RelayService::spawn_processor(svc.clone(), rx);
        for i in 0..3 {
            tx.send(dm(&format!("message {i}"))).unwrap();
        }
        drop(tx);
        processor.await.unwrap();

        assert_eq!(channel.sent_texts().len(), 3);
        assert_eq!(svc.store().snapshot("u1").await.unwrap().history.len(), 6);
    }

    #[tokio::test]
    async fn slow_typing_indicator_does_not_hold_up_relay() {
        let channel = Arc::new(RecordingChannel {
            typing_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let backend = ScriptedBackend::new(|| Ok(Some("fast".into())));
        let svc = service(channel.clone(), backend).with_typing_timeout(Duration::from_millis(50));

        let outcome = tokio::time::timeout(Duration::from_secs(5), svc.handle(dm("hello")))
            .await
            .expect("relay waited on the typing indicator");
        assert_eq!(outcome, HandleOutcome::Relayed("fast".into()));
        assert_eq!(channel.sent_texts(), vec!["fast".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processor_keeps_each_users_messages_in_order() {
        let channel = Arc::new(RecordingChannel::default());
        let backend = ScriptedBackend::new(|| Ok(Some("ok".into())));
        let svc = Arc::new(service(channel.clone(), backend.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let processor = RelayService::spawn_processor(svc.clone(), rx);
        let users: Vec<String> = (0..200).map(|i| format!("user-{i}")).collect();
        for user in &users {
            tx.send(ChannelMessage::direct(ChannelType::Discord, "dm", user.as_str(), "!model gpt-4o"))
                .unwrap();
            tx.send(ChannelMessage::direct(ChannelType::Discord, "dm", user.as_str(), "hello"))
                .unwrap();
        }
        drop(tx);
        processor.await.unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), users.len());
        assert!(calls.iter().all(|(model, history)| {
            model == "openai/gpt-4o" && history == &vec![Turn::user("hello")]
        }));
        drop(calls);

        for user in &users {
            let session = svc.store().snapshot(user).await.unwrap();
            assert_eq!(session.model, "gpt-4o");
            assert_eq!(session.history, vec![Turn::user("hello"), Turn::assistant("ok")]);
        }
    }
}
