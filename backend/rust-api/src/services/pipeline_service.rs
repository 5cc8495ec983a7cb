//! Pipeline orchestrator: drives a course through ingestion, module
//! synthesis and the per-module question/video fan-out.
//!
//! Stage dispatch is guarded by claim tickets keyed per unit of work, so
//! duplicate completion signals collapse to a single job and unrelated
//! courses never contend. Completion detection rescans current document
//! state instead of counting events; a signal delivered twice or out of
//! order converges to the same decision.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::CoreError;
use crate::metrics::record_generation_job;
use crate::models::course::{Course, Module, ModuleLesson, SourceDocument, Stage};
use crate::models::test::QuestionRecord;
use crate::services::claims::{
    modules_claim_key, questions_claim_key, video_claim_key, ClaimStore,
};
use crate::services::generation::{GenerationRequest, TextGenerator};
use crate::services::prompts;
use crate::services::video::VideoRenderer;
use crate::services::AppState;
use crate::utils::llm_json::{parse_modules, parse_questions};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const SUMMARY_MAX_TOKENS: u32 = 1024;
const MODULES_MAX_TOKENS: u32 = 4096;
const QUESTIONS_MAX_TOKENS: u32 = 2048;
const NARRATION_MAX_TOKENS: u32 = 2048;

/// Raw uploaded file handed to ingestion.
pub struct UploadedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct PipelineService {
    mongo: Database,
    claims: Arc<dyn ClaimStore>,
    generator: Arc<dyn TextGenerator>,
    video: Arc<dyn VideoRenderer>,
}

/// Module synthesis waits for every document; independent of completion
/// order. A course without documents has no gate to wait on.
pub fn all_summaries_present(documents: &[SourceDocument]) -> bool {
    documents.iter().all(|doc| doc.summary.is_some())
}

impl PipelineService {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            claims: state.claims.clone(),
            generator: state.generator.clone(),
            video: state.video.clone(),
        }
    }

    pub fn new(
        mongo: Database,
        claims: Arc<dyn ClaimStore>,
        generator: Arc<dyn TextGenerator>,
        video: Arc<dyn VideoRenderer>,
    ) -> Self {
        Self {
            mongo,
            claims,
            generator,
            video,
        }
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    fn documents(&self) -> Collection<SourceDocument> {
        self.mongo.collection("documents")
    }

    fn lessons(&self) -> Collection<ModuleLesson> {
        self.mongo.collection("lessons")
    }

    fn questions(&self) -> Collection<QuestionRecord> {
        self.mongo.collection("questions")
    }

    /// Register uploads and fan out one independent ingestion job per
    /// document. Returns as soon as the jobs are spawned.
    pub async fn enqueue_ingestion(
        &self,
        course: &Course,
        files: Vec<UploadedDocument>,
    ) -> Result<(), CoreError> {
        if files.is_empty() {
            // Nothing to summarize; synthesis runs from name/description.
            self.dispatch_module_synthesis(&course.id).await?;
            return Ok(());
        }

        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            records.push(SourceDocument {
                id: Uuid::new_v4().to_string(),
                course_id: course.id.clone(),
                filename: file.filename.clone(),
                summary: None,
                created_at: Utc::now(),
            });
        }

        self.documents()
            .insert_many(&records)
            .await
            .context("Failed to insert source documents")?;

        for (record, file) in records.into_iter().zip(files) {
            // Document formats are handled upstream of the core; the
            // summarizer receives plain text.
            let text = String::from_utf8_lossy(&file.bytes).into_owned();
            let worker = self.clone();
            tokio::spawn(async move {
                worker.run_document_ingestion(record, text).await;
            });
        }

        tracing::info!("Ingestion enqueued for course {}", course.id);
        Ok(())
    }

    async fn run_document_ingestion(&self, record: SourceDocument, text: String) {
        tracing::info!(
            "Summarizing document: course={}, document={}, file={}",
            record.course_id,
            record.id,
            record.filename
        );

        let prompt = prompts::summarize_document(&record.filename, &text);
        let result = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.generator
                .complete(GenerationRequest::prompt(prompt.clone(), SUMMARY_MAX_TOKENS))
                .await
        })
        .await;

        // A failed summary stores its error text so the synthesis gate can
        // never deadlock on a permanently failing document.
        let summary = match result {
            Ok(summary) => {
                record_generation_job("summary", "completed");
                summary
            }
            Err(e) => {
                record_generation_job("summary", "error");
                tracing::warn!(
                    "Summarization failed: course={}, document={}: {}",
                    record.course_id,
                    record.id,
                    e
                );
                format!("Error generating summary: {}", e)
            }
        };

        let update = retry_async_with_config(RetryConfig::default(), || async {
            self.documents()
                .update_one(
                    doc! { "_id": &record.id },
                    doc! { "$set": { "summary": &summary } },
                )
                .await
        })
        .await;

        if let Err(e) = update {
            tracing::error!("Failed to store summary for document {}: {}", record.id, e);
            return;
        }

        if let Err(e) = self.on_document_summarized(&record.course_id).await {
            tracing::error!(
                "Completion handling failed for course {}: {}",
                record.course_id,
                e
            );
        }
    }

    /// Idempotent completion signal: rescans the course's documents and
    /// dispatches module synthesis once all summaries are present.
    pub async fn on_document_summarized(&self, course_id: &str) -> Result<(), CoreError> {
        let documents: Vec<SourceDocument> = self
            .documents()
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to scan course documents")?
            .try_collect()
            .await?;

        if !all_summaries_present(&documents) {
            tracing::debug!(
                "Course {} still waiting on summaries ({} docs)",
                course_id,
                documents.len()
            );
            return Ok(());
        }

        self.dispatch_module_synthesis(course_id).await
    }

    /// Exactly-once dispatch: the first admitted caller flips the course to
    /// `generating` and spawns the job; losers exit silently.
    async fn dispatch_module_synthesis(&self, course_id: &str) -> Result<(), CoreError> {
        let course = self.get_course(course_id).await?;
        if course.modules_status != Stage::Pending {
            tracing::debug!(
                "Module synthesis not dispatchable for course {} (status {})",
                course_id,
                course.modules_status.as_str()
            );
            return Ok(());
        }

        if !self.claims.try_claim(&modules_claim_key(course_id)).await? {
            tracing::debug!("Module synthesis already claimed for course {}", course_id);
            return Ok(());
        }

        self.set_modules_stage(course_id, Stage::Generating, None)
            .await?;

        let worker = self.clone();
        let course_id = course_id.to_string();
        tokio::spawn(async move {
            worker.run_module_synthesis(&course_id).await;
        });

        Ok(())
    }

    async fn run_module_synthesis(&self, course_id: &str) {
        tracing::info!("Module synthesis started for course {}", course_id);

        let outcome = self.synthesize_modules(course_id).await;

        // Terminal either way; free the guard. Redispatch is still fenced by
        // the course status check.
        if let Err(release_err) = self.claims.release(&modules_claim_key(course_id)).await {
            tracing::error!(
                "Failed to release synthesis claim for course {}: {}",
                course_id,
                release_err
            );
        }

        match outcome {
            Ok(count) => {
                record_generation_job("modules", "completed");
                tracing::info!("Synthesized {} modules for course {}", count, course_id);
            }
            Err(e) => {
                record_generation_job("modules", "error");
                tracing::error!("Module synthesis failed for course {}: {}", course_id, e);

                if let Err(store_err) = self
                    .set_modules_stage(course_id, Stage::Error, Some(e.to_string()))
                    .await
                {
                    tracing::error!(
                        "Failed to record synthesis error for course {}: {}",
                        course_id,
                        store_err
                    );
                }
            }
        }
    }

    async fn synthesize_modules(&self, course_id: &str) -> Result<usize, CoreError> {
        let course = self.get_course(course_id).await?;
        let documents: Vec<SourceDocument> = self
            .documents()
            .find(doc! { "course_id": course_id })
            .sort(doc! { "created_at": 1 })
            .await
            .context("Failed to load course documents")?
            .try_collect()
            .await?;

        let prompt =
            prompts::synthesize_modules(&course.name, course.description.as_deref(), &documents);
        let raw = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.generator
                .complete(GenerationRequest::prompt(prompt.clone(), MODULES_MAX_TOKENS))
                .await
        })
        .await?;

        let modules = parse_modules(&raw)?;

        // A retry may shrink or reshape the module list; drop derived rows
        // from the previous run before writing the new ones.
        self.questions()
            .delete_many(doc! { "course_id": course_id })
            .await
            .context("Failed to clear previous questions")?;
        self.lessons()
            .delete_many(doc! {
                "course_id": course_id,
                "module_index": { "$gte": modules.len() as i64 },
            })
            .await
            .context("Failed to clear out-of-range lessons")?;

        // Lessons are written before the status flip: once a client sees
        // `completed`, every module's lesson row exists.
        for (index, module) in modules.iter().enumerate() {
            let lesson = ModuleLesson {
                id: ModuleLesson::key(course_id, index as u32),
                course_id: course_id.to_string(),
                module_index: index as u32,
                lesson_content: module.content.clone(),
                video_url: None,
                video_status: Stage::Pending,
                video_error: None,
            };
            self.lessons()
                .replace_one(doc! { "_id": &lesson.id }, &lesson)
                .upsert(true)
                .await
                .context("Failed to upsert module lesson")?;
        }

        // Atomic batch: modules and the `completed` status land in one write.
        let modules_bson =
            mongodb::bson::to_bson(&modules).context("Failed to encode modules")?;
        self.courses()
            .update_one(
                doc! { "_id": course_id },
                doc! {
                    "$set": {
                        "modules": modules_bson,
                        "modules_status": Stage::Completed.as_str(),
                    },
                    "$unset": { "modules_error": "" },
                },
            )
            .await
            .context("Failed to store synthesized modules")?;

        for (index, module) in modules.iter().enumerate() {
            self.dispatch_question_generation(course_id, index as u32, module.clone())
                .await?;
            self.dispatch_video_generation(course_id, index as u32, module.name.clone())
                .await?;
        }

        Ok(modules.len())
    }

    async fn dispatch_question_generation(
        &self,
        course_id: &str,
        module_index: u32,
        module: Module,
    ) -> Result<(), CoreError> {
        if !self
            .claims
            .try_claim(&questions_claim_key(course_id, module_index))
            .await?
        {
            tracing::debug!(
                "Question generation already claimed: course={}, module={}",
                course_id,
                module_index
            );
            return Ok(());
        }

        let worker = self.clone();
        let course_id = course_id.to_string();
        tokio::spawn(async move {
            worker
                .run_question_generation(&course_id, module_index, module)
                .await;
        });
        Ok(())
    }

    async fn run_question_generation(&self, course_id: &str, module_index: u32, module: Module) {
        let result = self
            .generate_questions(course_id, module_index, &module)
            .await;

        if let Err(release_err) = self
            .claims
            .release(&questions_claim_key(course_id, module_index))
            .await
        {
            tracing::error!("Failed to release question claim: {}", release_err);
        }

        match result {
            Ok(count) => {
                record_generation_job("questions", "completed");
                tracing::info!(
                    "Generated {} questions: course={}, module={}",
                    count,
                    course_id,
                    module_index
                );
            }
            Err(e) => {
                record_generation_job("questions", "error");
                tracing::error!(
                    "Question generation failed: course={}, module={}: {}",
                    course_id,
                    module_index,
                    e
                );
            }
        }
    }

    async fn generate_questions(
        &self,
        course_id: &str,
        module_index: u32,
        module: &Module,
    ) -> Result<usize, CoreError> {
        let prompt = prompts::synthesize_questions(&module.name, &module.content);
        let raw = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.generator
                .complete(GenerationRequest::prompt(
                    prompt.clone(),
                    QUESTIONS_MAX_TOKENS,
                ))
                .await
        })
        .await?;

        let generated = parse_questions(&raw)?;
        let records: Vec<QuestionRecord> = generated
            .into_iter()
            .map(|q| QuestionRecord {
                id: Uuid::new_v4().to_string(),
                course_id: course_id.to_string(),
                module_index,
                question_text: q.question_text,
                options: q.options,
                correct_answer_index: q.correct_answer_index,
            })
            .collect();

        let count = records.len();
        if count > 0 {
            self.questions()
                .insert_many(&records)
                .await
                .context("Failed to insert test questions")?;
        }
        Ok(count)
    }

    async fn dispatch_video_generation(
        &self,
        course_id: &str,
        module_index: u32,
        module_name: String,
    ) -> Result<(), CoreError> {
        if !self
            .claims
            .try_claim(&video_claim_key(course_id, module_index))
            .await?
        {
            tracing::debug!(
                "Video generation already claimed: course={}, module={}",
                course_id,
                module_index
            );
            return Ok(());
        }

        self.set_video_stage(course_id, module_index, Stage::Generating, None)
            .await?;

        let worker = self.clone();
        let course_id = course_id.to_string();
        tokio::spawn(async move {
            worker
                .run_video_generation(&course_id, module_index, &module_name)
                .await;
        });
        Ok(())
    }

    async fn run_video_generation(&self, course_id: &str, module_index: u32, module_name: &str) {
        let outcome = self
            .generate_video(course_id, module_index, module_name)
            .await;

        if let Err(release_err) = self
            .claims
            .release(&video_claim_key(course_id, module_index))
            .await
        {
            tracing::error!("Failed to release video claim: {}", release_err);
        }

        match outcome {
            Ok(url) => {
                record_generation_job("video", "completed");
                tracing::info!(
                    "Video rendered: course={}, module={}, url={}",
                    course_id,
                    module_index,
                    url
                );
            }
            Err(e) => {
                record_generation_job("video", "error");
                tracing::error!(
                    "Video generation failed: course={}, module={}: {}",
                    course_id,
                    module_index,
                    e
                );
                if let Err(store_err) = self
                    .set_video_stage(course_id, module_index, Stage::Error, Some(e.to_string()))
                    .await
                {
                    tracing::error!("Failed to record video error: {}", store_err);
                }
            }
        }
    }

    async fn generate_video(
        &self,
        course_id: &str,
        module_index: u32,
        module_name: &str,
    ) -> Result<String, CoreError> {
        let lesson = self
            .lessons()
            .find_one(doc! { "_id": ModuleLesson::key(course_id, module_index) })
            .await
            .context("Failed to load lesson for video generation")?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "Lesson {} of course {} not found",
                    module_index, course_id
                ))
            })?;

        let prompt = prompts::narration_script(module_name, &lesson.lesson_content);
        let script = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.generator
                .complete(GenerationRequest::prompt(
                    prompt.clone(),
                    NARRATION_MAX_TOKENS,
                ))
                .await
        })
        .await?;

        let url = self
            .video
            .render(course_id, module_index, module_name, &script)
            .await?;

        self.lessons()
            .update_one(
                doc! { "_id": ModuleLesson::key(course_id, module_index) },
                doc! {
                    "$set": {
                        "video_url": &url,
                        "video_status": Stage::Completed.as_str(),
                    },
                    "$unset": { "video_error": "" },
                },
            )
            .await
            .context("Failed to store video result")?;

        Ok(url)
    }

    /// Re-enter module synthesis after a failure. Valid only from `error`;
    /// completed sibling work is untouched.
    pub async fn retry_modules(&self, course_id: &str) -> Result<(), CoreError> {
        let course = self.get_course(course_id).await?;
        if !course.modules_status.can_retry() {
            return Err(CoreError::Conflict(format!(
                "Module synthesis is {}; retry is only valid from error",
                course.modules_status.as_str()
            )));
        }

        // CAS serializes concurrent retries: only one caller wins the
        // error -> generating transition.
        let updated = self
            .courses()
            .find_one_and_update(
                doc! { "_id": course_id, "modules_status": Stage::Error.as_str() },
                doc! {
                    "$set": { "modules_status": Stage::Generating.as_str() },
                    "$unset": { "modules_error": "" },
                },
            )
            .await
            .context("Failed to transition course for retry")?;

        if updated.is_none() {
            return Err(CoreError::Conflict(
                "Module synthesis retry already in progress".to_string(),
            ));
        }

        // The failed job released its claim; reclaim for the retry run.
        let key = modules_claim_key(course_id);
        self.claims.release(&key).await?;
        if !self.claims.try_claim(&key).await? {
            return Err(CoreError::Conflict(
                "Module synthesis retry already in progress".to_string(),
            ));
        }

        tracing::info!("Retrying module synthesis for course {}", course_id);
        let worker = self.clone();
        let course_id = course_id.to_string();
        tokio::spawn(async move {
            worker.run_module_synthesis(&course_id).await;
        });
        Ok(())
    }

    /// Re-enter video synthesis for one module after a failure. Only that
    /// module's video job is redispatched.
    pub async fn retry_video(&self, course_id: &str, module_index: u32) -> Result<(), CoreError> {
        let lesson_id = ModuleLesson::key(course_id, module_index);
        let lesson = self
            .lessons()
            .find_one(doc! { "_id": &lesson_id })
            .await
            .context("Failed to query lessons collection")?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "Lesson {} of course {} not found",
                    module_index, course_id
                ))
            })?;

        if !lesson.video_status.can_retry() {
            return Err(CoreError::Conflict(format!(
                "Video generation is {}; retry is only valid from error",
                lesson.video_status.as_str()
            )));
        }

        // Same CAS pattern as module retries.
        let updated = self
            .lessons()
            .find_one_and_update(
                doc! { "_id": &lesson_id, "video_status": Stage::Error.as_str() },
                doc! {
                    "$set": { "video_status": Stage::Generating.as_str() },
                    "$unset": { "video_error": "" },
                },
            )
            .await
            .context("Failed to transition lesson for retry")?;

        if updated.is_none() {
            return Err(CoreError::Conflict(
                "Video retry already in progress".to_string(),
            ));
        }

        let module_name = self
            .get_course(course_id)
            .await?
            .modules
            .and_then(|modules| modules.get(module_index as usize).map(|m| m.name.clone()))
            .unwrap_or_else(|| format!("Module {}", module_index + 1));

        let key = video_claim_key(course_id, module_index);
        self.claims.release(&key).await?;
        if !self.claims.try_claim(&key).await? {
            return Err(CoreError::Conflict(
                "Video retry already in progress".to_string(),
            ));
        }

        tracing::info!(
            "Retrying video generation: course={}, module={}",
            lesson.course_id,
            module_index
        );
        let worker = self.clone();
        let course_id = course_id.to_string();
        tokio::spawn(async move {
            worker
                .run_video_generation(&course_id, module_index, &module_name)
                .await;
        });
        Ok(())
    }

    async fn get_course(&self, course_id: &str) -> Result<Course, CoreError> {
        self.courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses collection")?
            .ok_or_else(|| CoreError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn set_modules_stage(
        &self,
        course_id: &str,
        stage: Stage,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        let update = match error {
            Some(message) => doc! {
                "$set": {
                    "modules_status": stage.as_str(),
                    "modules_error": message,
                },
            },
            None => doc! {
                "$set": { "modules_status": stage.as_str() },
                "$unset": { "modules_error": "" },
            },
        };

        self.courses()
            .update_one(doc! { "_id": course_id }, update)
            .await
            .context("Failed to update modules stage")?;
        Ok(())
    }

    async fn set_video_stage(
        &self,
        course_id: &str,
        module_index: u32,
        stage: Stage,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        let update = match error {
            Some(message) => doc! {
                "$set": {
                    "video_status": stage.as_str(),
                    "video_error": message,
                },
            },
            None => doc! {
                "$set": { "video_status": stage.as_str() },
                "$unset": { "video_error": "" },
            },
        };

        self.lessons()
            .update_one(
                doc! { "_id": ModuleLesson::key(course_id, module_index) },
                update,
            )
            .await
            .context("Failed to update video stage")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(id: &str, summary: Option<&str>) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            course_id: "course-1".to_string(),
            filename: format!("{}.pdf", id),
            summary: summary.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn gate_waits_for_every_summary() {
        let docs = vec![document("a", Some("done")), document("b", None)];
        assert!(!all_summaries_present(&docs));
    }

    #[test]
    fn gate_is_order_independent() {
        // Second upload summarized first; the gate only opens once both are in.
        let after_second_only = vec![document("a", None), document("b", Some("done"))];
        assert!(!all_summaries_present(&after_second_only));

        let after_both = vec![document("a", Some("done")), document("b", Some("done"))];
        assert!(all_summaries_present(&after_both));
    }

    #[test]
    fn gate_accepts_error_text_summaries() {
        // A failed summarization stores its error text; the pipeline moves on.
        let docs = vec![document("a", Some("Error generating summary: timeout"))];
        assert!(all_summaries_present(&docs));
    }

    #[test]
    fn retry_while_generating_is_rejected() {
        // A retry that arrives while the job is still running must not
        // dispatch a second one; only an errored stage reopens.
        assert!(!Stage::Generating.can_retry());
        assert!(!Stage::Pending.can_retry());
        assert!(!Stage::Completed.can_retry());
        assert!(Stage::Error.can_retry());
    }
}
