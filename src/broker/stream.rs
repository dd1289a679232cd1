use super::traits::{MessageStream, PollOutcome, RawMessage};
use crate::Result;

/// One-slot lookahead over a [`MessageStream`]. A read task sizes the peeked
/// message before deciding whether to take it; a rejected message stays in
/// the slot and is the first thing the next request sees.
pub struct PeekableStream {
    inner: Box<dyn MessageStream>,
    slot: Option<RawMessage>,
}

impl PeekableStream {
    pub fn new(inner: Box<dyn MessageStream>) -> Self {
        Self { inner, slot: None }
    }

    /// Fill the lookahead slot if needed and return the current message, or
    /// `None` when the bounded poll elapsed without one.
    pub async fn peek(&mut self) -> Result<Option<&RawMessage>> {
        if self.slot.is_none() {
            match self.inner.poll().await {
                PollOutcome::Ready(msg) => self.slot = Some(msg),
                PollOutcome::Empty => return Ok(None),
                PollOutcome::Failed(e) => return Err(e),
            }
        }
        Ok(self.slot.as_ref())
    }

    /// Consume the peeked message. Must be preceded by a successful `peek`.
    pub fn advance(&mut self) -> Option<RawMessage> {
        self.slot.take()
    }
}
