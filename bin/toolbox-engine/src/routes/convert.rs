//! `POST /api/convert`: multipart upload in, converted artifact out.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use toolbox_core::{ConversionJob, EngineError, JobOptions, ToolId, UploadedFile, format_bytes};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ServerError;
use crate::middleware::cors::{ADVISORY_HEADER, JOB_ID_HEADER};
use crate::state::AppState;

const MAX_FIELD_BYTES: usize = 64 * 1024;
const MAX_FIELDS: usize = 30;

pub fn router(config: &Config) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/convert", post(convert))
        .layer(DefaultBodyLimit::max(config.body_limit()))
}

/// The three form fields the endpoint understands.
#[derive(Debug, Default)]
struct ConvertForm {
    tool_id: Option<String>,
    options: Option<String>,
    files: Vec<UploadedFile>,
}

impl ConvertForm {
    /// Drain the multipart body, enforcing count and size limits while
    /// streaming so an oversized upload is cut off early.
    async fn read(mut multipart: Multipart, config: &Config) -> Result<Self, ServerError> {
        let mut form = Self::default();
        let mut text_fields = 0usize;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_owned();
            match name.as_str() {
                "files" => {
                    if form.files.len() >= config.max_files {
                        return Err(EngineError::too_large(format!(
                            "Too many files (max {}).",
                            config.max_files
                        ))
                        .into());
                    }
                    form.files.push(read_file(field, config.max_file_bytes).await?);
                }
                "toolId" | "options" => {
                    text_fields += 1;
                    if text_fields > MAX_FIELDS {
                        return Err(ServerError::PayloadTooLarge("Too many form fields.".into()));
                    }
                    let value = read_text(field, &name).await?;
                    if name == "toolId" {
                        form.tool_id = Some(value);
                    } else {
                        form.options = Some(value);
                    }
                }
                other => {
                    return Err(ServerError::BadRequest(format!("Unexpected form field: {other}.")));
                }
            }
        }
        Ok(form)
    }
}

async fn read_text(mut field: Field<'_>, name: &str) -> Result<String, ServerError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if buf.len() + chunk.len() > MAX_FIELD_BYTES {
            return Err(ServerError::PayloadTooLarge(format!("Form field {name} is too large.")));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ServerError::BadRequest(format!("Form field {name} is not UTF-8.")))
}

async fn read_file(mut field: Field<'_>, max_bytes: u64) -> Result<UploadedFile, ServerError> {
    let original_name = field.file_name().unwrap_or("upload").to_owned();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_owned();

    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if (buf.len() + chunk.len()) as u64 > max_bytes {
            return Err(EngineError::too_large(format!(
                "File too large (max {}).",
                format_bytes(max_bytes)
            ))
            .into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(UploadedFile::new(original_name, content_type, buf))
}

pub async fn convert(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = ConvertForm::read(multipart, &state.config).await?;

    let raw_tool = form
        .tool_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::validation("Missing toolId."))?;
    let tool = ToolId::from_str(raw_tool)
        .map_err(|_| EngineError::validation(format!("Unsupported toolId: {raw_tool}.")))?;
    let options = JobOptions::parse(form.options.as_deref())?;

    let job = ConversionJob::new(tool, options, form.files);
    debug!(job_id = %job.id, tool = %tool, ?job.options, "conversion requested");

    let output = state.engine.run(job).await?;
    info!(
        job_id = %output.job_id,
        file_name = %output.file_name,
        bytes = output.bytes.len(),
        "sending artifact"
    );

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", output.file_name))
        .map_err(|e| ServerError::Internal(format!("bad output file name: {e}")))?;
    let job_id = HeaderValue::from_str(&output.job_id.to_string())
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    let mut response = (StatusCode::OK, output.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(output.content_type));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(JOB_ID_HEADER, job_id);
    if let Some(advisory) = output.advisory {
        headers.insert(ADVISORY_HEADER, HeaderValue::from_static(advisory.as_str()));
    }
    Ok(response)
}
