//! The HTTP boundary: upload and download endpoints.
//!
//! Deliberately thin; everything interesting happens in [`crate::pipeline`].

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::{
    artifacts::ArtifactStore,
    pipeline::{self, PipelineOptions},
    prelude::*,
};

/// Largest accepted upload, in bytes.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// MIME type of the packaged output document.
const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// State shared across routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineOptions,
    pub artifacts: ArtifactStore,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "textpress OCR server is running" }))
        .route("/ocr", post(handle_upload))
        .route("/download/:filename", get(handle_download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve the application until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// `POST /ocr`: accept one document and run the conversion pipeline.
#[instrument(level = "debug", skip_all)]
async fn handle_upload(State(state): State<AppState>, multipart: Multipart) -> Response {
    let document = match read_file_field(multipart).await {
        Ok(document) => document,
        Err(err) => return error_response(err),
    };
    match pipeline::process(&state.pipeline, &state.artifacts, document).await {
        Ok(output) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "source": output.source,
                "text": output.text,
                "pageCount": output.page_count,
                "downloadUrl": format!("/download/{}", output.artifact.filename),
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// `GET /download/:filename`: serve a finished document once.
#[instrument(level = "debug", skip_all, fields(filename = %filename))]
async fn handle_download(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Response {
    match state.artifacts.serve_and_expire(&filename).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, DOCX_MIME_TYPE.to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Pull the uploaded document out of the `file` multipart field.
async fn read_file_field(mut multipart: Multipart) -> Result<Vec<u8>> {
    loop {
        let field = multipart
            .next_field()
            .await
            .context("failed to read multipart upload")?;
        match field {
            Some(field) if field.name() == Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .context("failed to read uploaded file")?;
                return Ok(bytes.to_vec());
            }
            Some(_) => continue,
            None => return Err(PipelineError::MissingInput.into()),
        }
    }
}

/// Convert a pipeline failure into the `{error, details}` response shape.
///
/// Server faults keep their full context chain in the log only; the chain
/// carries internal staging and artifact paths that clients have no business
/// seeing.
fn error_response(err: anyhow::Error) -> Response {
    let typed = err.downcast_ref::<PipelineError>();
    let status = match typed {
        Some(PipelineError::MissingInput | PipelineError::UnsupportedInput(_)) => {
            StatusCode::BAD_REQUEST
        }
        Some(PipelineError::NoPagesProduced) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(PipelineError::StageTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        Some(PipelineError::ArtifactExpired(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let (label, details) = if status.is_server_error() {
        error!("request failed: {:#}", err);
        let label = typed
            .map_or_else(|| "internal server error".to_owned(), ToString::to_string);
        (label.clone(), label)
    } else {
        (err.to_string(), format!("{err:#}"))
    };
    (
        status,
        Json(json!({
            "error": label,
            "details": details,
        })),
    )
        .into_response()
}
