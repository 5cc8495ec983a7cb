use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single generation unit (module synthesis, a module's
/// video, ...). `error` is recoverable through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Generating,
    Completed,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    /// Explicit retries re-enter a stage only from `error`; every other
    /// state rejects with a conflict.
    pub fn can_retry(self) -> bool {
        matches!(self, Stage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Generating => "generating",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present only after module synthesis completed; written as one atomic
    /// batch, never partially.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<Module>>,
    pub modules_status: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub content: String,
    /// Module indices that should be mastered first. Informational; the
    /// grading engine does not enforce them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerequisites: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub course_id: String,
    pub filename: String,
    /// Null until summarization finishes. Failed summarization stores a
    /// human-readable error text here so the synthesis gate never deadlocks.
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleLesson {
    #[serde(rename = "_id")]
    pub id: String,
    pub course_id: String,
    pub module_index: u32,
    pub lesson_content: String,
    pub video_url: Option<String>,
    pub video_status: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_error: Option<String>,
}

impl ModuleLesson {
    pub fn key(course_id: &str, module_index: u32) -> String {
        format!("{}:{}", course_id, module_index)
    }
}

#[derive(Debug, Serialize)]
pub struct CreateCourseResponse {
    pub id: String,
}
