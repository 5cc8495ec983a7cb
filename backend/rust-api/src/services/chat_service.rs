//! Tutoring chat: grounds a conversation in one module's content and
//! relays the generator's token stream as protocol payloads.
//!
//! The returned stream is infallible; failures travel in-band as
//! `{"error": ...}` frames so the transport never has to abort mid-event.
//! Dropping the stream drops the upstream connection with it.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use futures::{future, stream, Stream, StreamExt};
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use serde_json::json;

use crate::error::CoreError;
use crate::metrics::CHAT_STREAMS_TOTAL;
use crate::models::chat::ChatRequest;
use crate::models::course::{Course, Stage};
use crate::services::generation::{GenerationRequest, TextGenerator, TokenStream};
use crate::services::prompts;
use crate::utils::stream::{escape_token, DONE_MARKER};

const CHAT_MAX_TOKENS: u32 = 2048;

pub type ChatPayloadStream = Pin<Box<dyn Stream<Item = String> + Send>>;

fn error_payload(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Turn a token stream into protocol payloads: tokens escaped for
/// single-line framing, the first error emitted as an error frame with the
/// rest of the stream discarded, and `[DONE]` always last.
pub fn frame_token_stream(tokens: TokenStream) -> ChatPayloadStream {
    let payloads = tokens
        .scan(false, |errored, item| {
            if *errored {
                return future::ready(None);
            }
            let payload = match item {
                Ok(token) => escape_token(&token),
                Err(e) => {
                    *errored = true;
                    CHAT_STREAMS_TOTAL.with_label_values(&["error"]).inc();
                    error_payload(&e.to_string())
                }
            };
            future::ready(Some(payload))
        })
        .chain(stream::once(future::ready(DONE_MARKER.to_string())));

    Box::pin(payloads)
}

pub struct ChatService {
    mongo: Database,
    generator: Arc<dyn TextGenerator>,
}

impl ChatService {
    pub fn new(mongo: Database, generator: Arc<dyn TextGenerator>) -> Self {
        Self { mongo, generator }
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    /// Open a tutoring stream. Context errors (missing course, module not
    /// yet generated) surface as a single error frame followed by `[DONE]`
    /// rather than failing the call.
    pub async fn open_stream(&self, request: ChatRequest) -> ChatPayloadStream {
        match self.upstream_tokens(request).await {
            Ok(tokens) => {
                CHAT_STREAMS_TOTAL.with_label_values(&["opened"]).inc();
                frame_token_stream(tokens)
            }
            Err(e) => {
                CHAT_STREAMS_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::warn!("Chat stream rejected: {}", e);
                Box::pin(stream::iter(vec![
                    error_payload(&e.to_string()),
                    DONE_MARKER.to_string(),
                ]))
            }
        }
    }

    async fn upstream_tokens(&self, request: ChatRequest) -> Result<TokenStream, CoreError> {
        if request.messages.is_empty() {
            return Err(CoreError::Validation(
                "Chat request carries no messages".to_string(),
            ));
        }

        let course = self
            .courses()
            .find_one(doc! { "_id": &request.course_id })
            .await
            .context("Failed to query courses collection")?
            .ok_or_else(|| {
                CoreError::NotFound(format!("Course {} not found", request.course_id))
            })?;

        if course.modules_status != Stage::Completed {
            return Err(CoreError::Conflict(format!(
                "Course {} modules are {}; tutoring requires completed modules",
                request.course_id,
                course.modules_status.as_str()
            )));
        }

        let module = course
            .modules
            .as_ref()
            .and_then(|modules| modules.get(request.module_index as usize))
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "Module {} of course {} not found",
                    request.module_index, request.course_id
                ))
            })?;

        let generation = GenerationRequest {
            system: Some(prompts::tutoring_system(
                &course.name,
                &module.name,
                &module.content,
            )),
            messages: request.messages,
            max_tokens: CHAT_MAX_TOKENS,
        };

        self.generator.stream(generation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::stream::{decode_frame, StreamFrame};

    fn token_stream(items: Vec<Result<String, CoreError>>) -> TokenStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn frames_tokens_and_terminates_with_done() {
        let payloads: Vec<String> = frame_token_stream(token_stream(vec![
            Ok("Hello ".to_string()),
            Ok("line\nbreak".to_string()),
        ]))
        .collect()
        .await;

        assert_eq!(payloads, vec!["Hello ", "line\\nbreak", "[DONE]"]);
        assert_eq!(
            decode_frame(&payloads[1]),
            StreamFrame::Token("line\nbreak".to_string())
        );
    }

    #[tokio::test]
    async fn first_error_ends_the_stream() {
        let payloads: Vec<String> = frame_token_stream(token_stream(vec![
            Ok("partial".to_string()),
            Err(CoreError::UpstreamGeneration("overloaded".to_string())),
            Ok("never delivered".to_string()),
        ]))
        .collect()
        .await;

        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0], "partial");
        assert!(matches!(
            decode_frame(&payloads[1]),
            StreamFrame::Error(msg) if msg.contains("overloaded")
        ));
        assert_eq!(decode_frame(&payloads[2]), StreamFrame::Done);
    }

    #[tokio::test]
    async fn empty_stream_still_sends_done() {
        let payloads: Vec<String> =
            frame_token_stream(token_stream(Vec::new())).collect().await;
        assert_eq!(payloads, vec!["[DONE]"]);
    }
}
