use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::errors::{
    ConfigError, MarshalingError, ParleyError, ParleyResult, PersistenceError, ValidationError,
};
use crate::models::catalog::ModelSpec;
use crate::models::content::{ContentBlock, ToolResultContent};
use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::request::{GenerationParams, GenerationRequest};
use crate::store::ConversationStore;
use crate::stream::fold::MessageAssembler;
use crate::stream::{self, ChannelSink, EventSink, StreamEvent, StreamOutcome, StreamResults};
use crate::transport::Transport;

#[derive(Debug)]
struct State {
    conversation: Conversation,
    model: &'static ModelSpec,
}

/// A single conversation with the model.
///
/// All history changes go through one lock. `send` and `stream` hold it
/// while building the request and again while appending the reply, never
/// across the network call. Turns added in between make the append fail with
/// [`ValidationError::ConversationChanged`] instead of reordering history.
#[derive(Debug)]
pub struct Chat {
    config: ClientConfig,
    transport: Transport,
    state: Arc<Mutex<State>>,
    store: Option<ConversationStore>,
}

impl Chat {
    /// Create a chat, restoring the saved conversation when a file is configured.
    /// A saved conversation keeps its model if the catalog still knows it.
    pub fn new(config: ClientConfig) -> ParleyResult<Self> {
        let transport = Transport::new(&config)?;
        let store = config.store().cloned();

        let saved = match &store {
            Some(store) => store.load()?,
            None => None,
        };
        let (conversation, model) = match saved {
            Some(mut conversation) => match config.catalog().resolve(&conversation.model) {
                Some(model) => (conversation, model),
                None => {
                    tracing::warn!(
                        saved = %conversation.model,
                        configured = config.model().name,
                        "saved conversation uses an unknown model, using the configured one"
                    );
                    conversation.model = config.model().name.to_string();
                    (conversation, config.model())
                }
            },
            None => (Conversation::new(config.model().name), config.model()),
        };

        Ok(Self {
            config,
            transport,
            state: Arc::new(Mutex::new(State {
                conversation,
                model,
            })),
            store,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A copy of the current conversation
    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    pub async fn model(&self) -> &'static ModelSpec {
        self.state.lock().await.model
    }

    /// Append a turn after validating all of its content. Nothing is appended
    /// if any block is invalid.
    pub async fn add_turn(&self, role: Role, content: Vec<ContentBlock>) -> ParleyResult<()> {
        let message = Message::new(role, content);
        message.validate()?;

        let mut state = self.state.lock().await;
        state.conversation.push(message);
        Ok(())
    }

    pub async fn add_user_text<S: Into<String>>(&self, text: S) -> ParleyResult<()> {
        self.add_turn(Role::User, vec![ContentBlock::text(text)])
            .await
    }

    pub async fn add_assistant_text<S: Into<String>>(&self, text: S) -> ParleyResult<()> {
        self.add_turn(Role::Assistant, vec![ContentBlock::text(text)])
            .await
    }

    /// A user turn with an image, followed by `prompt` when it is not empty
    pub async fn add_user_image(
        &self,
        bytes: &[u8],
        media_type: &str,
        prompt: &str,
    ) -> ParleyResult<()> {
        let mut content = vec![ContentBlock::image_bytes(bytes, media_type)];
        if !prompt.is_empty() {
            content.push(ContentBlock::text(prompt));
        }
        self.add_turn(Role::User, content).await
    }

    /// Answer a `tool_use` request from the model
    pub async fn add_tool_result<S: Into<String>>(
        &self,
        tool_use_id: &str,
        text: S,
        is_error: bool,
    ) -> ParleyResult<()> {
        let block = ContentBlock::tool_result(
            tool_use_id,
            vec![ToolResultContent::text(text)],
            is_error.then_some(true),
        );
        self.add_turn(Role::User, vec![block]).await
    }

    /// Request a complete reply and append it to the conversation. On any
    /// failure the conversation is left as it was.
    ///
    /// The lock is released while the request is in flight. Turns added in
    /// the meantime make the append fail with
    /// [`ValidationError::ConversationChanged`].
    pub async fn send(&self, params: &GenerationParams) -> ParleyResult<Message> {
        let params = params.clone().with_stream(false);
        let (body, expected) = {
            let state = self.state.lock().await;
            let request = GenerationRequest::build(&state.conversation, &params, state.model)?;
            let body = serde_json::to_vec(&request).map_err(MarshalingError::Input)?;
            (body, state.snapshot())
        };

        let reply = self.transport.post(body).await?;
        let message: Message = serde_json::from_slice(&reply).map_err(MarshalingError::Reply)?;
        tracing::debug!(
            id = message.id.as_deref().unwrap_or_default(),
            stop_reason = ?message.stop_reason,
            usage = ?message.usage,
            "received reply"
        );

        append_reply(&self.state, self.store.as_ref(), message.clone(), expected).await?;
        Ok(message)
    }

    /// Stream a reply. Events arrive on the returned channels as they are
    /// decoded. When the stream completes without errors the assembled reply
    /// is appended (and saved) before the channels close.
    pub async fn stream(&self, params: &GenerationParams, token: CancellationToken) -> StreamResults {
        let (mut sink, results) = StreamResults::channel();
        let params = params.clone().with_stream(true);

        let (body, expected) = {
            let state = self.state.lock().await;
            let prepared = GenerationRequest::build(&state.conversation, &params, state.model)
                .map_err(ParleyError::from)
                .and_then(|request| stream::prepare(&request));
            match prepared {
                Ok(body) => (body, state.snapshot()),
                Err(err) => {
                    tracing::debug!("stream request rejected: {}", err);
                    sink.error(err);
                    return results;
                }
            }
        };

        let transport = self.transport.clone();
        let state = Arc::clone(&self.state);
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut folding = FoldingSink {
                inner: sink,
                assembler: MessageAssembler::new(),
                failed: false,
            };
            let outcome = stream::run(&transport, body, &token, &mut folding).await;
            tracing::debug!(?outcome, failed = folding.failed, "stream finished");
            if outcome != StreamOutcome::Completed || folding.failed {
                return;
            }

            let FoldingSink {
                mut inner,
                assembler,
                ..
            } = folding;
            if let Err(err) = fold_reply(&state, store.as_ref(), assembler, expected).await {
                tracing::warn!("reply not added to the conversation: {}", err);
                inner.error(err);
            }
        });
        results
    }

    /// Start a new, empty conversation, optionally with another model. The
    /// saved file is untouched until the next save.
    pub async fn reset_conversation(&self, model: Option<&str>) -> ParleyResult<()> {
        let mut state = self.state.lock().await;
        let model = match model {
            Some(name) => self
                .config
                .catalog()
                .resolve(name)
                .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?,
            None => state.model,
        };
        state.model = model;
        state.conversation = Conversation::new(model.name);
        Ok(())
    }

    /// Write the current conversation to the configured file
    pub async fn save(&self) -> ParleyResult<()> {
        let store = self.store.as_ref().ok_or(PersistenceError::NotConfigured)?;
        let state = self.state.lock().await;
        store.save(&state.conversation)?;
        Ok(())
    }

    /// Replace the conversation with the saved one. Returns false, leaving
    /// the conversation alone, when there is nothing saved.
    pub async fn reload(&self) -> ParleyResult<bool> {
        let store = self.store.as_ref().ok_or(PersistenceError::NotConfigured)?;
        let mut state = self.state.lock().await;
        let Some(conversation) = store.load()? else {
            return Ok(false);
        };
        if let Some(model) = self.config.catalog().resolve(&conversation.model) {
            state.model = model;
        }
        state.conversation = conversation;
        Ok(true)
    }
}

impl State {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.conversation.id.clone(),
            len: self.conversation.len(),
        }
    }
}

/// Identifies the history a request was built from
#[derive(Debug, PartialEq)]
struct Snapshot {
    id: String,
    len: usize,
}

async fn fold_reply(
    state: &Mutex<State>,
    store: Option<&ConversationStore>,
    assembler: MessageAssembler,
    expected: Snapshot,
) -> ParleyResult<()> {
    let Some(message) = assembler.finish()? else {
        return Ok(());
    };
    append_reply(state, store, message, expected).await
}

/// Append a reply if it could be sent back and history has not moved since
/// `expected` was taken. Saves before the in-memory swap.
async fn append_reply(
    state: &Mutex<State>,
    store: Option<&ConversationStore>,
    message: Message,
    expected: Snapshot,
) -> ParleyResult<()> {
    message.validate().map_err(MarshalingError::UnusableReply)?;

    let mut state = state.lock().await;
    if state.snapshot() != expected {
        return Err(ValidationError::ConversationChanged.into());
    }

    let mut updated = state.conversation.clone();
    updated.push(message);
    if let Some(store) = store {
        store.save(&updated)?;
    }
    state.conversation = updated;
    Ok(())
}

/// Forwards to the caller while assembling the reply
struct FoldingSink {
    inner: ChannelSink,
    assembler: MessageAssembler,
    failed: bool,
}

#[async_trait]
impl EventSink for FoldingSink {
    async fn event(&mut self, event: StreamEvent) -> bool {
        self.assembler.push(&event);
        self.inner.event(event).await
    }

    fn error(&mut self, error: ParleyError) {
        self.failed = true;
        self.inner.error(error);
    }
}
