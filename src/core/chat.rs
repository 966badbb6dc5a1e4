//! Streaming tutor chat
//!
//! The ChatController owns the message list of one chat session. A turn:
//! 1. Appends the student's message and an empty AI placeholder
//! 2. Sends the prior history plus the new text to the gateway
//! 3. Replaces the placeholder text with every cumulative snapshot
//! 4. Clears the streaming flag once, swapping in an apology on failure
//!
//! Only one turn may be in flight per session.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::config::prompts_builtin;
use crate::conversation::{Message, MessageStore};
use crate::providers::{AiGateway, ProviderError};

/// A turn that has been accepted but not yet answered
#[derive(Debug, Clone)]
pub struct PendingTurn {
    /// Everything before the student's new message
    pub history: Vec<Message>,
    pub text: String,
    pub user_message: Message,
    pub placeholder: Message,
}

impl PendingTurn {
    pub fn reply_id(&self) -> &str {
        &self.placeholder.id
    }
}

/// Progress of a turn, as pushed to a streaming client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// A message was appended
    Message { message: Message },
    /// Latest cumulative text of the reply
    Snapshot { id: String, text: String },
    /// The reply is final
    Done { message: Message },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Message { .. } => "message",
            ChatEvent::Snapshot { .. } => "snapshot",
            ChatEvent::Done { .. } => "done",
        }
    }
}

#[derive(Debug)]
pub struct ChatController {
    messages: MessageStore,
    /// Placeholder id of the turn in flight
    in_flight: Option<String>,
}

impl ChatController {
    /// New session opened by the persona's greeting
    pub fn new(greeting: &str) -> Self {
        let mut messages = MessageStore::new();
        messages.push(Message::welcome(greeting));
        Self {
            messages,
            in_flight: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    /// Whether the send affordance should be disabled
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Accept a new student message.
    ///
    /// Returns `None` for blank text or while another turn is in flight.
    pub fn begin_turn(&mut self, text: &str) -> Option<PendingTurn> {
        if text.trim().is_empty() {
            return None;
        }
        if self.is_busy() {
            tracing::warn!("Chat turn rejected: a reply is still streaming");
            return None;
        }

        let history = self.messages.messages().to_vec();
        let user_message = Message::user(text);
        let placeholder = Message::placeholder();

        self.messages.push(user_message.clone());
        self.messages.push(placeholder.clone());
        self.in_flight = Some(placeholder.id.clone());

        tracing::debug!(reply_id = %placeholder.id, history = history.len(), "Chat turn started");

        Some(PendingTurn {
            history,
            text: text.to_string(),
            user_message,
            placeholder,
        })
    }

    /// Replace the reply text with the latest snapshot.
    ///
    /// Ignored unless `reply_id` is the turn in flight.
    pub fn apply_snapshot(&mut self, reply_id: &str, snapshot: &str) -> bool {
        if self.in_flight.as_deref() != Some(reply_id) {
            return false;
        }
        self.messages.update(reply_id, |m| {
            m.text.clear();
            m.text.push_str(snapshot);
        })
    }

    /// Close the turn. Runs at most once per turn and returns the final reply.
    ///
    /// On failure the reply text becomes the apology; the error only goes to
    /// the log.
    pub fn complete_turn(
        &mut self,
        reply_id: &str,
        result: Result<(), ProviderError>,
    ) -> Option<Message> {
        if self.in_flight.as_deref() != Some(reply_id) {
            return None;
        }
        self.in_flight = None;

        let failed = match result {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(reply_id, error = %e, "Chat stream failed");
                true
            }
        };

        self.messages.update(reply_id, |m| {
            if failed {
                m.text = prompts_builtin::APOLOGY.to_string();
            }
            m.is_streaming = false;
        });

        self.messages.get(reply_id).cloned()
    }

    /// Run a whole turn against `gateway`.
    ///
    /// Returns the reply id, or `None` when the message was rejected.
    pub async fn send_user_message(
        &mut self,
        gateway: &dyn AiGateway,
        text: &str,
    ) -> Option<String> {
        let turn = self.begin_turn(text)?;
        let reply_id = turn.reply_id().to_string();

        let result = async {
            let mut stream = gateway.stream_chat(&turn.history, &turn.text).await?;
            while let Some(snapshot) = stream.next().await {
                self.apply_snapshot(&reply_id, &snapshot?);
            }
            Ok::<(), ProviderError>(())
        }
        .await;

        self.complete_turn(&reply_id, result);
        Some(reply_id)
    }
}

/// Drive an accepted turn on a shared controller, reporting progress on `events`.
///
/// The controller lock is only held while applying a step, never across a
/// gateway await. A closed `events` channel does not stop the turn.
pub async fn run_turn(
    controller: Arc<Mutex<ChatController>>,
    gateway: Arc<dyn AiGateway>,
    turn: PendingTurn,
    events: mpsc::Sender<ChatEvent>,
) {
    let reply_id = turn.reply_id().to_string();

    for message in [turn.user_message.clone(), turn.placeholder.clone()] {
        let _ = events.send(ChatEvent::Message { message }).await;
    }

    let result = async {
        let mut stream = gateway.stream_chat(&turn.history, &turn.text).await?;
        while let Some(snapshot) = stream.next().await {
            let snapshot = snapshot?;
            let applied = controller.lock().await.apply_snapshot(&reply_id, &snapshot);
            if applied {
                let _ = events
                    .send(ChatEvent::Snapshot {
                        id: reply_id.clone(),
                        text: snapshot,
                    })
                    .await;
            }
        }
        Ok::<(), ProviderError>(())
    }
    .await;

    let finished = controller.lock().await.complete_turn(&reply_id, result);
    if let Some(message) = finished {
        tracing::debug!(reply_id = %message.id, chars = message.text.len(), "Chat turn finished");
        let _ = events.send(ChatEvent::Done { message }).await;
    }
}
