use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::pipeline::TransformOptions;
use crate::task::{DispatchJob, StagedInput, Task, TaskOptions, TaskStatus};
use crate::AppContext;

pub fn media_router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config.max_file_size as usize + 64 * 1024;
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/media", post(submit))
        .route("/media/:task_id", get(task_status))
        .route("/media/:task_id/audio", get(download_task_audio))
        .route("/artifacts/:artifact_id", get(download_artifact))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

fn error_response(err: &ServiceError) -> Response {
    let status = match err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::NotReady { .. } => StatusCode::CONFLICT,
        ServiceError::Pipeline(_) | ServiceError::Timeout | ServiceError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ApiResponse::<()>::error(err.to_string()))).into_response()
}

async fn home() -> impl IntoResponse {
    Json(json!({
        "service": "transcribe-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "submit": "POST /media - upload a media file",
            "status": "GET /media/:task_id",
            "download": "GET /media/:task_id/audio",
            "artifact": "GET /artifacts/:artifact_id",
            "health": "GET /health",
        }
    }))
}

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let stats = ctx.registry.stats().await;
    let artifacts = ctx.artifacts.len().await;
    Json(json!({
        "status": "ok",
        "tasks": stats,
        "artifacts": artifacts,
    }))
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: String,
    status: TaskStatus,
    message: &'static str,
}

struct Upload {
    bytes: Bytes,
    filename: String,
    language: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ServiceError> {
    let mut bytes = None;
    let mut filename = None;
    let mut language = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(|e| {
                    ServiceError::Validation(format!("failed to read upload: {}", e))
                })?);
            }
            Some("language") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::Validation(format!("bad language field: {}", e)))?;
                if !value.trim().is_empty() {
                    language = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ServiceError::Validation("no file provided".into()))?;
    let filename = filename.ok_or_else(|| ServiceError::Validation("no filename provided".into()))?;

    Ok(Upload {
        bytes,
        filename,
        language,
    })
}

async fn submit(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    multipart: Multipart,
) -> Response {
    // the limiter runs before anything else so a rejected client never
    // creates a task
    let client = addr.ip().to_string();
    if let Err(e) = ctx.limiter.check(&client).await {
        warn!("Submission rejected for {}: {}", client, e);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::<()>::error(e.to_string())),
        )
            .into_response();
    }

    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(e) => return error_response(&e),
    };

    if !ctx.config.is_allowed_extension(&upload.filename) {
        return error_response(&ServiceError::Validation(format!(
            "unsupported file type: {}",
            upload.filename
        )));
    }
    if upload.bytes.is_empty() {
        return error_response(&ServiceError::Validation("empty file".into()));
    }
    if upload.bytes.len() as u64 > ctx.config.max_file_size {
        return error_response(&ServiceError::Validation(format!(
            "file too large (max {} bytes)",
            ctx.config.max_file_size
        )));
    }

    let extension = upload
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string());

    let task = ctx
        .registry
        .create(TaskOptions {
            language: upload.language.clone(),
            original_filename: Some(upload.filename.clone()),
        })
        .await;

    let input_path = ctx.config.upload_dir.join(format!("{}.{}", task.id, extension));
    if let Err(e) = tokio::fs::write(&input_path, &upload.bytes).await {
        error!("Failed to stage upload for {}: {}", task.id, e);
        ctx.registry.delete(&task.id).await;
        return error_response(&ServiceError::Internal("failed to store upload".into()));
    }

    let job = DispatchJob {
        task_id: task.id.clone(),
        input: StagedInput::new(input_path),
        options: TransformOptions {
            language: upload.language,
        },
    };
    if let Err(e) = ctx.dispatcher.submit(job) {
        error!("Failed to enqueue task {}: {}", task.id, e);
        ctx.registry.delete(&task.id).await;
        return error_response(&e);
    }

    info!("Accepted {} as {}", upload.filename, task.id);
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SubmitResponse {
            task_id: task.id,
            status: TaskStatus::Pending,
            message: "media accepted, poll the task for progress",
        })),
    )
        .into_response()
}

async fn task_status(
    State(ctx): State<Arc<AppContext>>,
    UrlPath(task_id): UrlPath<String>,
) -> Response {
    match ctx.registry.get(&task_id).await {
        Some(task) => (StatusCode::OK, Json(ApiResponse::success(task))).into_response(),
        None => error_response(&ServiceError::NotFound("task")),
    }
}

/// Task-centric retrieval: looks the artifact up through the task record and
/// consumes it. A task that has not finished yet is "not ready", which is a
/// different condition from an unknown task or an already-consumed artifact.
async fn download_task_audio(
    State(ctx): State<Arc<AppContext>>,
    UrlPath(task_id): UrlPath<String>,
) -> Response {
    let task = match ctx.registry.get(&task_id).await {
        Some(task) => task,
        None => return error_response(&ServiceError::NotFound("task")),
    };

    if task.status != TaskStatus::Completed {
        return error_response(&ServiceError::NotReady {
            status: task.status,
        });
    }

    let artifact_id = match task.result.as_ref().and_then(|r| r.artifact_id.clone()) {
        Some(id) => id,
        None => return error_response(&ServiceError::NotFound("artifact")),
    };

    serve_artifact(&ctx, &artifact_id, Some(&task)).await
}

async fn download_artifact(
    State(ctx): State<Arc<AppContext>>,
    UrlPath(artifact_id): UrlPath<String>,
) -> Response {
    let task = match ctx.artifacts.resolve(&artifact_id).await {
        Some(record) => ctx.registry.get(&record.owner_task_id).await,
        None => return error_response(&ServiceError::NotFound("artifact")),
    };
    serve_artifact(&ctx, &artifact_id, task.as_ref()).await
}

/// Streams the artifact's bytes and lets consume-on-read delete the file
/// once they have been fully read.
async fn serve_artifact(ctx: &AppContext, artifact_id: &str, task: Option<&Task>) -> Response {
    let consumed = match ctx.artifacts.consume(artifact_id).await {
        Some(consumed) => consumed,
        None => return error_response(&ServiceError::NotFound("artifact")),
    };

    let bytes = match tokio::fs::read(consumed.path()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read artifact {}: {}", artifact_id, e);
            return error_response(&ServiceError::Internal("failed to read artifact".into()));
        }
    };
    let content_type = content_type_for(consumed.media_kind());
    drop(consumed);

    let filename = download_name(task);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn content_type_for(media_kind: &str) -> &'static str {
    match media_kind {
        "audio" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Names the download after the uploaded file, e.g. `talk.mp4` -> `talk.mp3`.
fn download_name(task: Option<&Task>) -> String {
    let stem = task
        .and_then(|t| t.options.original_filename.as_deref())
        .map(Path::new)
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "audio".to_string());
    format!("{}.mp3", stem)
}
