use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::Value;

use super::{ContentDelta, StreamEvent};
use crate::errors::MarshalingError;
use crate::models::content::{ContentBlock, ToolUseBlock};
use crate::models::message::Message;
use crate::models::usage::Usage;

#[derive(Debug)]
enum BlockBuffer {
    Block(ContentBlock),
    ToolUse { block: ToolUseBlock, json: String },
}

impl From<ContentBlock> for BlockBuffer {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::ToolUse(block) => BlockBuffer::ToolUse {
                block,
                json: String::new(),
            },
            block => BlockBuffer::Block(block),
        }
    }
}

/// Rebuilds the assistant message of one stream from its events.
///
/// Blocks are buffered by index, so deltas for different blocks may interleave.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    message: Option<Message>,
    blocks: BTreeMap<usize, BlockBuffer>,
    stopped: bool,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart(start) => {
                let mut message = start.message.clone();
                for (index, block) in message.content.drain(..).enumerate() {
                    self.blocks.insert(index, BlockBuffer::from(block));
                }
                self.message = Some(message);
            }
            StreamEvent::ContentBlockStart(start) => {
                self.blocks
                    .insert(start.index, BlockBuffer::from(start.content_block.clone()));
            }
            StreamEvent::ContentBlockDelta(delta) => self.apply(delta.index, &delta.delta),
            StreamEvent::MessageDelta(delta) => {
                let Some(message) = self.message.as_mut() else {
                    return;
                };
                if delta.delta.stop_reason.is_some() {
                    message.stop_reason = delta.delta.stop_reason.clone();
                }
                if delta.delta.stop_sequence.is_some() {
                    message.stop_sequence = delta.delta.stop_sequence.clone();
                }
                message
                    .usage
                    .get_or_insert_with(Usage::default)
                    .output_tokens = delta.usage.output_tokens;
            }
            StreamEvent::MessageStop => self.stopped = true,
            StreamEvent::ContentBlockStop(_) | StreamEvent::Error(_) | StreamEvent::Ping => {}
        }
    }

    fn apply(&mut self, index: usize, delta: &ContentDelta) {
        match (self.blocks.entry(index), delta) {
            (Entry::Vacant(entry), ContentDelta::TextDelta { text }) => {
                // A delta without content_block_start opens a text block
                entry.insert(BlockBuffer::Block(ContentBlock::text(text.clone())));
            }
            (Entry::Occupied(mut entry), ContentDelta::TextDelta { text }) => {
                match entry.get_mut() {
                    BlockBuffer::Block(ContentBlock::Text(block)) => block.text.push_str(text),
                    _ => tracing::warn!(index, "text delta for a non-text block"),
                }
            }
            (Entry::Occupied(mut entry), ContentDelta::InputJsonDelta { partial_json }) => {
                match entry.get_mut() {
                    BlockBuffer::ToolUse { json, .. } => json.push_str(partial_json),
                    _ => tracing::warn!(index, "input_json delta for a non-tool block"),
                }
            }
            (Entry::Vacant(_), ContentDelta::InputJsonDelta { .. }) => {
                tracing::warn!(index, "input_json delta before its tool_use block");
            }
        }
    }

    /// Whether `message_stop` has been seen
    pub fn is_complete(&self) -> bool {
        self.stopped
    }

    /// The assembled message, or `None` if the stream never started one.
    /// Empty text blocks are dropped.
    pub fn finish(self) -> Result<Option<Message>, MarshalingError> {
        let Some(mut message) = self.message else {
            return Ok(None);
        };

        for buffer in self.blocks.into_values() {
            match buffer {
                BlockBuffer::Block(ContentBlock::Text(block)) if block.text.is_empty() => {}
                BlockBuffer::Block(block) => message.content.push(block),
                BlockBuffer::ToolUse { mut block, json } => {
                    if !json.is_empty() {
                        block.input = serde_json::from_str::<Value>(&json).map_err(|source| {
                            MarshalingError::Frame {
                                event: "content_block_delta".to_string(),
                                source,
                            }
                        })?;
                    }
                    message.content.push(ContentBlock::ToolUse(block));
                }
            }
        }
        Ok(Some(message))
    }
}
