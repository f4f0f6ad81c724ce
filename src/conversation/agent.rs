//! Language model seam
//!
//! The turn controller only needs a lazy stream of text deltas. Real model
//! clients live outside this crate and plug in through [`Agent`].

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::Result;

/// Stream of text deltas produced by a model
pub type TextStream = BoxStream<'static, Result<String>>;

/// Produces a streamed reply for one user input
#[async_trait]
pub trait Agent: Send + Sync {
    /// Start a reply to `input`
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be reached
    async fn chat(&self, input: &str) -> Result<TextStream>;
}

/// Replies with the user's own words, one word per delta
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn chat(&self, input: &str) -> Result<TextStream> {
        let deltas: Vec<Result<String>> = input
            .split_inclusive(char::is_whitespace)
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(deltas).boxed())
    }
}
