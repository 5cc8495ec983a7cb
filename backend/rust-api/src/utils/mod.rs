pub mod llm_json;
pub mod retry;
pub mod stream;
