//! Leaderboard aggregation: per-user progress totals ordered with a dense
//! 1-based rank.

use std::collections::HashMap;

use anyhow::Context;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

use crate::error::CoreError;
use crate::models::course::Course;
use crate::models::leaderboard::{LeaderboardEntry, LeaderboardResponse};
use crate::models::test::MasteryRecord;
use crate::models::User;

/// Unranked per-user tallies feeding [`rank_entries`].
#[derive(Debug, Clone)]
pub struct UserProgress {
    pub user_id: String,
    pub name: String,
    pub total_courses: u32,
    pub completed_courses: u32,
    pub total_modules_passed: u32,
}

/// Total order: completed courses desc, then modules passed desc, then
/// user id asc as the deterministic tiebreaker. Ranks are dense: equal
/// keys share a rank and the next distinct key takes rank + 1.
pub fn rank_entries(mut progress: Vec<UserProgress>) -> Vec<LeaderboardEntry> {
    progress.sort_by(|a, b| {
        b.completed_courses
            .cmp(&a.completed_courses)
            .then(b.total_modules_passed.cmp(&a.total_modules_passed))
            .then(a.user_id.cmp(&b.user_id))
    });

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(progress.len());
    let mut rank = 0u32;
    let mut previous_key: Option<(u32, u32)> = None;
    for p in progress {
        let key = (p.completed_courses, p.total_modules_passed);
        if previous_key != Some(key) {
            rank += 1;
            previous_key = Some(key);
        }
        entries.push(LeaderboardEntry {
            user_id: p.user_id,
            name: p.name,
            total_courses: p.total_courses,
            completed_courses: p.completed_courses,
            total_modules_passed: p.total_modules_passed,
            rank,
        });
    }
    entries
}

pub struct LeaderboardService {
    mongo: Database,
}

impl LeaderboardService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn users(&self) -> Collection<User> {
        self.mongo.collection("users")
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    fn mastery(&self) -> Collection<MasteryRecord> {
        self.mongo.collection("mastery")
    }

    /// Full board plus the caller's own entry. A course counts as completed
    /// once the learner's mastery covers every one of its modules.
    pub async fn leaderboard(&self, current_user_id: &str) -> Result<LeaderboardResponse, CoreError> {
        let users: Vec<User> = self
            .users()
            .find(doc! {})
            .await
            .context("Failed to query users collection")?
            .try_collect()
            .await?;

        let courses: Vec<Course> = self
            .courses()
            .find(doc! {})
            .await
            .context("Failed to query courses collection")?
            .try_collect()
            .await?;

        let mastery: Vec<MasteryRecord> = self
            .mastery()
            .find(doc! {})
            .await
            .context("Failed to query mastery collection")?
            .try_collect()
            .await?;

        // module count per course; None until synthesis finishes
        let module_counts: HashMap<&str, usize> = courses
            .iter()
            .map(|c| {
                (
                    c.id.as_str(),
                    c.modules.as_ref().map(|m| m.len()).unwrap_or(0),
                )
            })
            .collect();

        let mut owned_courses: HashMap<&str, u32> = HashMap::new();
        for course in &courses {
            *owned_courses.entry(course.user_id.as_str()).or_insert(0) += 1;
        }

        let mut mastery_by_user: HashMap<&str, Vec<&MasteryRecord>> = HashMap::new();
        for record in &mastery {
            mastery_by_user
                .entry(record.user_id.as_str())
                .or_default()
                .push(record);
        }

        let progress: Vec<UserProgress> = users
            .iter()
            .map(|user| {
                let records = mastery_by_user
                    .get(user.id.as_str())
                    .map(|r| r.as_slice())
                    .unwrap_or(&[]);

                let total_modules_passed: u32 = records
                    .iter()
                    .map(|r| r.passed_modules.len() as u32)
                    .sum();
                let completed_courses = records
                    .iter()
                    .filter(|r| {
                        module_counts
                            .get(r.course_id.as_str())
                            .map(|&count| count > 0 && r.passed_modules.len() >= count)
                            .unwrap_or(false)
                    })
                    .count() as u32;

                UserProgress {
                    user_id: user.id.clone(),
                    name: user.name.clone(),
                    total_courses: owned_courses.get(user.id.as_str()).copied().unwrap_or(0),
                    completed_courses,
                    total_modules_passed,
                }
            })
            .collect();

        let entries = rank_entries(progress);
        let current_user = entries
            .iter()
            .find(|e| e.user_id == current_user_id)
            .cloned();

        Ok(LeaderboardResponse {
            leaderboard: entries,
            current_user,
        })
    }
}
