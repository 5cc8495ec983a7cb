use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::error::CoreError;
use crate::middlewares::auth::JwtClaims;
use crate::models::course::CreateCourseResponse;
use crate::services::course_service::CourseService;
use crate::services::pipeline_service::{PipelineService, UploadedDocument};
use crate::services::AppState;

/// POST /api/courses
///
/// Multipart form: `name`, `code`, optional `description`, repeated `files`.
/// Returns the new course id immediately; ingestion runs in the background.
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut name: Option<String> = None;
    let mut code: Option<String> = None;
    let mut description: Option<String> = None;
    let mut files: Vec<UploadedDocument> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "name" => {
                name = Some(read_text_field(field, "name").await?);
            }
            "code" => {
                code = Some(read_text_field(field, "code").await?);
            }
            "description" => {
                let text = read_text_field(field, "description").await?;
                if !text.is_empty() {
                    description = Some(text);
                }
            }
            "files" => {
                let filename = field
                    .file_name()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| format!("upload-{}.pdf", files.len() + 1));
                let bytes = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read file upload: {}", e),
                    )
                })?;
                files.push(UploadedDocument {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            other => {
                tracing::debug!("Ignoring unknown multipart field: {}", other);
            }
        }
    }

    let name = require_field(name, "name")?;
    let code = require_field(code, "code")?;

    let course_service = CourseService::new(state.mongo.clone());
    let course = course_service
        .create_course(&claims.sub, &name, &code, description)
        .await
        .map_err(CoreError::into_parts)?;

    PipelineService::from_state(&state)
        .enqueue_ingestion(&course, files)
        .await
        .map_err(CoreError::into_parts)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateCourseResponse { id: course.id }),
    ))
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read field {}: {}", name, e),
            )
        })
}

fn require_field(value: Option<String>, name: &str) -> Result<String, (StatusCode, String)> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err((
            StatusCode::BAD_REQUEST,
            format!("Missing required field: {}", name),
        )),
    }
}

/// GET /api/courses
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let courses = CourseService::new(state.mongo.clone())
        .list_courses()
        .await
        .map_err(CoreError::into_parts)?;
    Ok(Json(courses))
}

/// GET /api/courses/{id}
///
/// Clients poll this for `modules_status`; `modules` appears only once the
/// synthesis batch landed.
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let course = CourseService::new(state.mongo.clone())
        .get_course(&course_id)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(Json(course))
}

/// DELETE /api/courses/{id}
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    CourseService::new(state.mongo.clone())
        .delete_course(&course_id)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/courses/{id}/pdfs
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let documents = CourseService::new(state.mongo.clone())
        .list_documents(&course_id)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(Json(documents))
}

/// POST /api/courses/{id}/retry-modules
pub async fn retry_modules(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    PipelineService::from_state(&state)
        .retry_modules(&course_id)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/courses/{id}/modules/{i}/lesson
pub async fn get_lesson(
    State(state): State<Arc<AppState>>,
    Path((course_id, module_index)): Path<(String, u32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let lesson = CourseService::new(state.mongo.clone())
        .get_lesson(&course_id, module_index)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(Json(lesson))
}

/// POST /api/courses/{id}/modules/{i}/retry-video
pub async fn retry_video(
    State(state): State<Arc<AppState>>,
    Path((course_id, module_index)): Path<(String, u32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    PipelineService::from_state(&state)
        .retry_video(&course_id, module_index)
        .await
        .map_err(CoreError::into_parts)?;
    Ok(StatusCode::ACCEPTED)
}
