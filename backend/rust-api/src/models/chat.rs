use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// One tutoring turn. The conversation is self-contained: the caller sends
/// the full prior history with the new user message appended.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub course_id: String,
    pub module_index: u32,
    pub messages: Vec<ChatMessage>,
}
