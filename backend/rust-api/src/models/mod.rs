use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod chat;
pub mod course;
pub mod leaderboard;

pub use course::Stage;

/// Account record. Credential storage lives outside this service; only the
/// identity and display name are read here (leaderboard, ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
