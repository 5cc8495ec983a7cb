use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub name: String,
    pub total_courses: u32,
    pub completed_courses: u32,
    pub total_modules_passed: u32,
    /// 1-based dense rank over a total order.
    pub rank: u32,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub current_user: Option<LeaderboardEntry>,
}
