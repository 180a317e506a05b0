use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::errors::PersistenceError;
use crate::models::conversation::Conversation;

/// Version written into every conversation file
pub const FORMAT_VERSION: u32 = 1;

/// What loading does when the conversation file does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFilePolicy {
    /// Start with no prior conversation
    #[default]
    Ignore,
    /// Report [`PersistenceError::NotFound`]
    Error,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    conversation: &'a Conversation,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    conversation: Value,
}

/// A conversation saved as versioned JSON at a fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStore {
    path: PathBuf,
    missing: MissingFilePolicy,
}

impl ConversationStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            missing: MissingFilePolicy::default(),
        }
    }

    pub fn with_missing_file_policy(mut self, policy: MissingFilePolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn missing_file_policy(&self) -> MissingFilePolicy {
        self.missing
    }

    /// Read the saved conversation. `Ok(None)` means there is no file and the
    /// policy says to ignore that.
    pub fn load(&self) -> Result<Option<Conversation>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return match self.missing {
                    MissingFilePolicy::Ignore => {
                        tracing::debug!(path = %self.path.display(), "no saved conversation");
                        Ok(None)
                    }
                    MissingFilePolicy::Error => Err(PersistenceError::NotFound {
                        path: self.path.clone(),
                    }),
                };
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|source| self.decode_error(source))?;
        if envelope.version != FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                path: self.path.clone(),
                version: envelope.version,
            });
        }
        let conversation: Conversation = serde_json::from_value(envelope.conversation)
            .map_err(|source| self.decode_error(source))?;

        tracing::debug!(
            path = %self.path.display(),
            id = %conversation.id,
            messages = conversation.len(),
            "loaded conversation"
        );
        Ok(Some(conversation))
    }

    /// Write the conversation to a temporary file beside the target and
    /// rename it into place, so readers never see a partial file.
    pub fn save(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| self.write_error(source))?;

        let bytes = serde_json::to_vec_pretty(&EnvelopeRef {
            version: FORMAT_VERSION,
            conversation,
        })
        .map_err(PersistenceError::Encode)?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|source| self.write_error(source))?;
        file.write_all(&bytes)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|source| self.write_error(source))?;
        file.persist(&self.path)
            .map_err(|err| self.write_error(err.error))?;

        tracing::debug!(
            path = %self.path.display(),
            id = %conversation.id,
            messages = conversation.len(),
            "saved conversation"
        );
        Ok(())
    }

    fn decode_error(&self, source: serde_json::Error) -> PersistenceError {
        PersistenceError::Decode {
            path: self.path.clone(),
            source,
        }
    }

    fn write_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
