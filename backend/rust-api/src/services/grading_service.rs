//! Grading engine: deterministic scoring of answer submissions against the
//! stored question set, attempt persistence, and the cumulative mastery
//! record.
//!
//! Mastery only grows. Passing a module adds its index to the learner's
//! record by set union; a later failed attempt never removes it.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::CoreError;
use crate::metrics::TEST_SUBMISSIONS_TOTAL;
use crate::models::course::{Course, Stage};
use crate::models::test::{
    AnswerSubmission, GradedAnswer, MasteryRecord, ModuleResult, ModuleTestResult, QuestionRecord,
    TestAttempt, TestResult, TestStatus, TestSubmission,
};

/// Outcome of scoring one submission against a question scope.
#[derive(Debug)]
pub struct ScoredSubmission {
    pub answers: Vec<GradedAnswer>,
    pub module_results: BTreeMap<u32, ModuleResult>,
    pub passed_modules: Vec<u32>,
}

/// Score answers against the question scope. Pure and deterministic: the
/// same questions and answers always grade identically.
///
/// Every question in scope must be answered exactly once; unknown,
/// duplicate, or missing ids reject the whole submission. A module passes
/// only when every one of its questions is answered correctly, and the
/// unsure sentinel is always wrong.
pub fn score_submission(
    questions: &[QuestionRecord],
    answers: &[AnswerSubmission],
) -> Result<ScoredSubmission, CoreError> {
    let by_id: HashMap<&str, &QuestionRecord> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut module_results: BTreeMap<u32, ModuleResult> = BTreeMap::new();
    for question in questions {
        let entry = module_results
            .entry(question.module_index)
            .or_insert(ModuleResult {
                total: 0,
                correct: 0,
            });
        entry.total += 1;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut graded = Vec::with_capacity(answers.len());
    for answer in answers {
        let question = by_id.get(answer.question_id.as_str()).ok_or_else(|| {
            CoreError::Validation(format!(
                "Answer references unknown question {}",
                answer.question_id
            ))
        })?;
        if !seen.insert(question.id.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate answer for question {}",
                question.id
            )));
        }

        let is_correct = answer.selected_option_index >= 0
            && answer.selected_option_index as u32 == question.correct_answer_index;
        if is_correct {
            // Entry exists: the question contributed to the total above.
            if let Some(result) = module_results.get_mut(&question.module_index) {
                result.correct += 1;
            }
        }

        graded.push(GradedAnswer {
            question_id: question.id.clone(),
            module_index: question.module_index,
            selected_option_index: answer.selected_option_index,
            is_correct,
        });
    }

    // Coverage check: duplicates are already rejected, so fewer answers than
    // questions means some question in scope was left unanswered.
    if seen.len() != questions.len() {
        let missing: Vec<&str> = questions
            .iter()
            .filter(|q| !seen.contains(q.id.as_str()))
            .map(|q| q.id.as_str())
            .collect();
        return Err(CoreError::Validation(format!(
            "Submission is missing answers for questions: {}",
            missing.join(", ")
        )));
    }

    let passed_modules: Vec<u32> = module_results
        .iter()
        .filter(|(_, r)| r.total > 0 && r.correct == r.total)
        .map(|(index, _)| *index)
        .collect();

    Ok(ScoredSubmission {
        answers: graded,
        module_results,
        passed_modules,
    })
}

pub struct GradingService {
    mongo: Database,
}

impl GradingService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    fn questions(&self) -> Collection<QuestionRecord> {
        self.mongo.collection("questions")
    }

    fn attempts(&self) -> Collection<TestAttempt> {
        self.mongo.collection("attempts")
    }

    fn mastery(&self) -> Collection<MasteryRecord> {
        self.mongo.collection("mastery")
    }

    /// Questions for the whole course, correct answers stripped by the
    /// caller via [`crate::models::test::QuestionView`]. Unavailable until
    /// module synthesis completed.
    pub async fn course_questions(&self, course_id: &str) -> Result<Vec<QuestionRecord>, CoreError> {
        self.require_completed_course(course_id).await?;
        self.load_questions(doc! { "course_id": course_id }).await
    }

    pub async fn module_questions(
        &self,
        course_id: &str,
        module_index: u32,
    ) -> Result<Vec<QuestionRecord>, CoreError> {
        self.require_completed_course(course_id).await?;
        self.load_questions(doc! { "course_id": course_id, "module_index": module_index })
            .await
    }

    /// Grade a course-wide submission, persist the attempt, and merge the
    /// passed modules into the learner's mastery record.
    pub async fn submit_course_test(
        &self,
        course_id: &str,
        user_id: &str,
        submission: TestSubmission,
    ) -> Result<TestResult, CoreError> {
        self.require_completed_course(course_id).await?;
        let questions = self.load_questions(doc! { "course_id": course_id }).await?;
        if questions.is_empty() {
            return Err(CoreError::NotFound(format!(
                "No questions available for course {}",
                course_id
            )));
        }

        let scored = score_submission(&questions, &submission.answers)?;
        let attempt_id = self
            .persist_attempt(course_id, user_id, &scored.answers, &scored.passed_modules)
            .await?;
        self.merge_mastery(course_id, user_id, &scored.passed_modules)
            .await?;

        TEST_SUBMISSIONS_TOTAL.with_label_values(&["course"]).inc();
        tracing::info!(
            "Course test graded: course={}, user={}, passed_modules={:?}",
            course_id,
            user_id,
            scored.passed_modules
        );

        Ok(TestResult {
            attempt_id,
            module_results: scored.module_results,
            passed_modules: scored.passed_modules,
        })
    }

    /// Grade a single module's submission. Mastery merges the same way, so
    /// passing module by module is equivalent to passing a full test.
    pub async fn submit_module_test(
        &self,
        course_id: &str,
        module_index: u32,
        user_id: &str,
        submission: TestSubmission,
    ) -> Result<ModuleTestResult, CoreError> {
        self.require_completed_course(course_id).await?;
        let questions = self
            .load_questions(doc! { "course_id": course_id, "module_index": module_index })
            .await?;
        if questions.is_empty() {
            return Err(CoreError::NotFound(format!(
                "No questions available for module {} of course {}",
                module_index, course_id
            )));
        }

        let scored = score_submission(&questions, &submission.answers)?;
        let result = scored
            .module_results
            .get(&module_index)
            .copied()
            .unwrap_or(ModuleResult {
                total: 0,
                correct: 0,
            });
        let is_passed = scored.passed_modules.contains(&module_index);

        self.persist_attempt(course_id, user_id, &scored.answers, &scored.passed_modules)
            .await?;
        self.merge_mastery(course_id, user_id, &scored.passed_modules)
            .await?;

        TEST_SUBMISSIONS_TOTAL.with_label_values(&["module"]).inc();
        tracing::info!(
            "Module test graded: course={}, module={}, user={}, passed={}",
            course_id,
            module_index,
            user_id,
            is_passed
        );

        Ok(ModuleTestResult {
            correct: result.correct,
            total: result.total,
            is_passed,
        })
    }

    /// Progress view: passed modules come from the cumulative mastery
    /// record, per-module tallies from the most recent attempt.
    pub async fn test_status(&self, course_id: &str, user_id: &str) -> Result<TestStatus, CoreError> {
        let mastery = self
            .mastery()
            .find_one(doc! { "_id": MasteryRecord::key(course_id, user_id) })
            .await
            .context("Failed to query mastery collection")?;

        let latest = self
            .attempts()
            .find_one(doc! { "course_id": course_id, "user_id": user_id })
            .sort(doc! { "created_at": -1 })
            .await
            .context("Failed to query attempts collection")?;

        let mut passed_modules = mastery.map(|m| m.passed_modules).unwrap_or_default();
        passed_modules.sort_unstable();

        let module_results = latest.as_ref().map(|attempt| {
            let mut results: BTreeMap<u32, ModuleResult> = BTreeMap::new();
            for answer in &attempt.answers {
                let entry = results.entry(answer.module_index).or_insert(ModuleResult {
                    total: 0,
                    correct: 0,
                });
                entry.total += 1;
                if answer.is_correct {
                    entry.correct += 1;
                }
            }
            results
        });

        Ok(TestStatus {
            has_completed: latest.is_some(),
            passed_modules,
            module_results,
        })
    }

    async fn require_completed_course(&self, course_id: &str) -> Result<Course, CoreError> {
        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses collection")?
            .ok_or_else(|| CoreError::NotFound(format!("Course {} not found", course_id)))?;

        if course.modules_status != Stage::Completed {
            return Err(CoreError::Conflict(format!(
                "Course {} modules are {}; tests require completed modules",
                course_id,
                course.modules_status.as_str()
            )));
        }
        Ok(course)
    }

    async fn load_questions(
        &self,
        filter: mongodb::bson::Document,
    ) -> Result<Vec<QuestionRecord>, CoreError> {
        let cursor = self
            .questions()
            .find(filter)
            .sort(doc! { "module_index": 1, "_id": 1 })
            .await
            .context("Failed to query questions collection")?;
        Ok(cursor.try_collect().await?)
    }

    async fn persist_attempt(
        &self,
        course_id: &str,
        user_id: &str,
        answers: &[GradedAnswer],
        passed_modules: &[u32],
    ) -> Result<String, CoreError> {
        let attempt = TestAttempt {
            id: Uuid::new_v4().to_string(),
            course_id: course_id.to_string(),
            user_id: user_id.to_string(),
            answers: answers.to_vec(),
            passed_modules: passed_modules.to_vec(),
            created_at: Utc::now(),
        };

        self.attempts()
            .insert_one(&attempt)
            .await
            .context("Failed to insert test attempt")?;
        Ok(attempt.id)
    }

    /// Set-union merge. `$addToSet` makes concurrent submissions converge to
    /// the union of both without read-modify-write races.
    async fn merge_mastery(
        &self,
        course_id: &str,
        user_id: &str,
        passed_modules: &[u32],
    ) -> Result<(), CoreError> {
        let passed: Vec<i64> = passed_modules.iter().map(|&m| m as i64).collect();
        // Encode through serde so the field matches struct-serialized
        // datetimes elsewhere in the collection.
        let updated_at =
            mongodb::bson::to_bson(&Utc::now()).context("Failed to encode timestamp")?;
        self.mastery()
            .update_one(
                doc! { "_id": MasteryRecord::key(course_id, user_id) },
                doc! {
                    "$addToSet": { "passed_modules": { "$each": passed } },
                    "$set": { "updated_at": updated_at },
                    "$setOnInsert": {
                        "course_id": course_id,
                        "user_id": user_id,
                    },
                },
            )
            .upsert(true)
            .await
            .context("Failed to merge mastery record")?;
        Ok(())
    }
}
