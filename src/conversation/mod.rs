//! Conversation handling: dialogue history and the bounded worker pool
//! that turns transcripts into spoken replies.

mod dialogue;
mod worker;

pub use dialogue::{Dialogue, DialogueMessage, Role};
pub use worker::{ReplyContext, SentenceSplitter, WorkerPool};
