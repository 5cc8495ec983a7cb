use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::course::{Course, ModuleLesson, SourceDocument, Stage};

/// Collections that hold per-course derived data; wiped on course deletion.
const CASCADE_COLLECTIONS: [&str; 5] = ["documents", "lessons", "questions", "attempts", "mastery"];

pub struct CourseService {
    mongo: Database,
}

impl CourseService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
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

    pub async fn create_course(
        &self,
        user_id: &str,
        name: &str,
        code: &str,
        description: Option<String>,
    ) -> Result<Course, CoreError> {
        let course = Course {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            description,
            modules: None,
            modules_status: Stage::Pending,
            modules_error: None,
            created_at: Utc::now(),
        };

        self.courses()
            .insert_one(&course)
            .await
            .context("Failed to insert course")?;

        tracing::info!("Course created: id={}, owner={}", course.id, course.user_id);
        Ok(course)
    }

    /// Snapshot read for client polling; never blocks on in-flight
    /// generation writes.
    pub async fn get_course(&self, course_id: &str) -> Result<Course, CoreError> {
        self.courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses collection")?
            .ok_or_else(|| CoreError::NotFound(format!("Course {} not found", course_id)))
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>, CoreError> {
        let cursor = self
            .courses()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .await
            .context("Failed to query courses collection")?;

        Ok(cursor.try_collect().await?)
    }

    pub async fn delete_course(&self, course_id: &str) -> Result<(), CoreError> {
        let deleted = self
            .courses()
            .delete_one(doc! { "_id": course_id })
            .await
            .context("Failed to delete course")?;

        if deleted.deleted_count == 0 {
            return Err(CoreError::NotFound(format!(
                "Course {} not found",
                course_id
            )));
        }

        for name in CASCADE_COLLECTIONS {
            self.mongo
                .collection::<Document>(name)
                .delete_many(doc! { "course_id": course_id })
                .await
                .with_context(|| format!("Failed to cascade delete from {}", name))?;
        }

        tracing::info!("Course deleted with cascade: id={}", course_id);
        Ok(())
    }

    /// Documents in upload order, `summary` null until ingestion finishes.
    pub async fn list_documents(&self, course_id: &str) -> Result<Vec<SourceDocument>, CoreError> {
        self.get_course(course_id).await?;

        let cursor = self
            .documents()
            .find(doc! { "course_id": course_id })
            .sort(doc! { "created_at": 1 })
            .await
            .context("Failed to query documents collection")?;

        Ok(cursor.try_collect().await?)
    }

    pub async fn get_lesson(
        &self,
        course_id: &str,
        module_index: u32,
    ) -> Result<ModuleLesson, CoreError> {
        self.lessons()
            .find_one(doc! { "_id": ModuleLesson::key(course_id, module_index) })
            .await
            .context("Failed to query lessons collection")?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "Lesson {} of course {} not found",
                    module_index, course_id
                ))
            })
    }
}
