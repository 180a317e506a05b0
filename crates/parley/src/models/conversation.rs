use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;
use super::role::Role;
use crate::errors::ValidationError;

/// Ordered message history plus identity and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub model: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Start an empty conversation with a fresh id
    pub fn new<S: Into<String>>(model: S) -> Self {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            created: now,
            updated: now,
            messages: Vec::new(),
        }
    }

    /// Append a message and bump the update time
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The history must open with a user turn and alternate from there
    pub fn validate_turns(&self) -> Result<(), ValidationError> {
        let first = self
            .messages
            .first()
            .ok_or(ValidationError::EmptyConversation)?;
        if first.role != Role::User {
            return Err(ValidationError::FirstMessageNotUser);
        }

        for (index, pair) in self.messages.windows(2).enumerate() {
            if pair[0].role == pair[1].role {
                return Err(ValidationError::RolesNotAlternating {
                    index: index + 1,
                    role: pair[1].role,
                });
            }
        }
        Ok(())
    }

    /// Turn order plus every content block of every message
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_turns()?;
        for (index, message) in self.messages.iter().enumerate() {
            message
                .validate()
                .map_err(|source| ValidationError::InvalidMessage {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}
