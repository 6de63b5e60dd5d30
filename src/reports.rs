//! 报告上传、公开列表与文件下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use httpdate::fmt_http_date;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::atomic::AtomicFile;
use crate::auth::SessionStore;
use crate::config::REPORTS_PATH;
use crate::db::{NewReport, Report, ReportStore};
use crate::error::AppError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::storage::{ReportFiles, StorageError, display_name};
use crate::views;

const UPLOAD_FIELD: &str = "pdf";
const PDF_MAGIC: &[u8] = b"%PDF-";

/// 上传表单（需登录）。
pub async fn upload_form() -> Result<Html<String>, AppError> {
    views::render_upload(None)
}

/// 处理上传：写入文件后插入元数据，插入失败时删除已写入的文件。
pub async fn upload_report(
    Extension(files): Extension<Arc<ReportFiles>>,
    Extension(store): Extension<Arc<ReportStore>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    match store_upload(&files, &store, multipart).await {
        Ok(report) => {
            info!(
                id = report.id,
                filename = report.filename,
                original_name = report.original_name,
                "report uploaded"
            );
            Ok(Redirect::to(REPORTS_PATH).into_response())
        }
        Err(AppError::BadRequest(message)) => {
            debug!(reason = message, "upload rejected");
            let page = views::render_upload(Some(message.as_str()))?;
            Ok((StatusCode::BAD_REQUEST, page).into_response())
        }
        Err(err) => Err(err),
    }
}

async fn store_upload(
    files: &ReportFiles,
    store: &ReportStore,
    mut multipart: Multipart,
) -> Result<Report, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = field.name().unwrap_or(""), "ignoring multipart field");
            continue;
        }

        let original_name = field
            .file_name()
            .and_then(display_name)
            .ok_or_else(|| AppError::BadRequest("Please choose a PDF file to upload.".into()))?;

        let uploaded_at = Utc::now();
        let filename = ReportFiles::new_stored_name(uploaded_at);
        files
            .ensure_root()
            .await
            .map_err(|err| AppError::Internal(err.to_string()))?;
        let target = files.resolve_checked(&filename, true).await?;

        let mut atomic = AtomicFile::new(&target).await?;
        if let Err(err) = write_pdf_field(field, &mut atomic).await {
            atomic.cleanup().await;
            return Err(err);
        }
        atomic.finalize().await?;

        let record = NewReport {
            original_name,
            filename: filename.clone(),
            uploaded_at,
        };
        return match store.insert(record).await {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(cleanup_err) = files.remove(&filename).await {
                    warn!(filename, error = ?cleanup_err, "failed to remove orphan upload");
                }
                error!(filename, error = %err, "report metadata insert failed");
                Err(AppError::from(err))
            }
        };
    }

    Err(AppError::BadRequest("Please choose a PDF file to upload.".into()))
}

async fn write_pdf_field(mut field: Field<'_>, atomic: &mut AtomicFile) -> Result<(), AppError> {
    let mut header = Vec::with_capacity(PDF_MAGIC.len());
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if chunk.is_empty() {
            continue;
        }
        if header.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - header.len()).min(chunk.len());
            header.extend_from_slice(&chunk[..take]);
            if !PDF_MAGIC.starts_with(&header) {
                return Err(AppError::BadRequest("Only PDF files can be uploaded.".into()));
            }
        }
        atomic.write_all(&chunk).await?;
    }

    if atomic.written() == 0 {
        return Err(AppError::BadRequest("The uploaded file is empty.".into()));
    }
    if header != PDF_MAGIC {
        return Err(AppError::BadRequest("Only PDF files can be uploaded.".into()));
    }
    Ok(())
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge;
    }
    AppError::BadRequest(format!("Could not read the upload: {}", err.body_text()))
}

/// 公开的报告列表，按上传时间倒序。
pub async fn list_reports(
    Extension(store): Extension<Arc<ReportStore>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    let reports = store.list_recent().await?;
    debug!(count = reports.len(), "list reports");
    views::render_reports(sessions.is_admin(&jar).await, &reports)
}

/// 下载报告文件，支持单段 Range 与 If-None-Match。
pub async fn download_report(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(files): Extension<Arc<ReportFiles>>,
    Extension(store): Extension<Arc<ReportStore>>,
) -> Result<Response, AppError> {
    let target = files.resolve_checked(&filename, false).await?;
    let metadata = fs::metadata(&target).await.map_err(StorageError::Io)?;
    let file_size = metadata.len();
    let etag = etag_from_metadata(&metadata);

    let last_modified = metadata.modified().ok().map(fmt_http_date);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Some(last_modified) = &last_modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(last_modified)?);
    }
    if is_not_modified(&request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let download_name = store
        .find_by_filename(&filename)
        .await?
        .map(|report| report.original_name)
        .unwrap_or_else(|| filename.clone());
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(&download_name))?,
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let range = if if_range_matches(&request_headers, &etag, last_modified.as_deref()) {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let mut file = File::open(&target).await.map_err(StorageError::Io)?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(filename, start, end, length, "download range request accepted");
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| AppError::Internal(err.to_string()))?;
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{file_size}"))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(filename, size = file_size, "download report");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value).map_err(|_| AppError::Internal("invalid header value".into()))
}

/// `attachment` 头：ASCII 回退名加 RFC 5987 编码的原始名。
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

/// If-Range 需要强比较：弱 ETag 永不匹配，日期须与 Last-Modified 完全一致。
fn if_range_matches(headers: &HeaderMap, etag: &str, last_modified: Option<&str>) -> bool {
    let Some(value) = headers.get(header::IF_RANGE) else {
        return true;
    };
    let Ok(value) = value.to_str().map(str::trim) else {
        return false;
    };
    if value.starts_with('"') || value.starts_with("W/") {
        return !value.starts_with("W/") && !etag.starts_with("W/") && value == etag;
    }
    last_modified.is_some_and(|modified| modified == value)
}

/// 解析 Range 头，返回可读取的闭区间。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(range) = value.to_str().ok().and_then(|v| v.strip_prefix("bytes=")) else {
        return Ok(None);
    };
    if range.contains(',') {
        return Ok(None);
    }
    if file_size == 0 {
        return Err(AppError::RangeNotSatisfiable(file_size));
    }

    let Some((start_part, end_part)) = range.split_once('-') else {
        return Ok(None);
    };
    let last = file_size - 1;
    let (start, end) = if start_part.is_empty() {
        let Ok(suffix) = end_part.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 {
            return Err(AppError::RangeNotSatisfiable(file_size));
        }
        (file_size.saturating_sub(suffix), last)
    } else {
        let Ok(start) = start_part.parse::<u64>() else {
            return Ok(None);
        };
        let end = if end_part.is_empty() {
            last
        } else {
            match end_part.parse::<u64>() {
                Ok(end) => end.min(last),
                Err(_) => return Ok(None),
            }
        };
        (start, end)
    };

    if start > end || start >= file_size {
        return Err(AppError::RangeNotSatisfiable(file_size));
    }
    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(value: &'static str, size: u64) -> Result<Option<(u64, u64)>, AppError> {
        parse_range(Some(&HeaderValue::from_static(value)), size)
    }

    #[test]
    fn parse_range_handles_common_forms() {
        assert!(matches!(range("bytes=0-9", 100), Ok(Some((0, 9)))));
        assert!(matches!(range("bytes=90-", 100), Ok(Some((90, 99)))));
        assert!(matches!(range("bytes=-10", 100), Ok(Some((90, 99)))));
        assert!(matches!(range("bytes=50-500", 100), Ok(Some((50, 99)))));
        assert!(matches!(parse_range(None, 100), Ok(None)));
    }

    #[test]
    fn parse_range_rejects_unsatisfiable() {
        assert!(matches!(
            range("bytes=100-", 100),
            Err(AppError::RangeNotSatisfiable(100))
        ));
        assert!(matches!(
            range("bytes=9-3", 100),
            Err(AppError::RangeNotSatisfiable(100))
        ));
    }

    #[test]
    fn parse_range_ignores_unsupported_forms() {
        assert!(matches!(range("bytes=0-1,5-6", 100), Ok(None)));
        assert!(matches!(range("items=0-1", 100), Ok(None)));
        assert!(matches!(range("bytes=a-b", 100), Ok(None)));
        assert!(matches!(range("bytes=5", 100), Ok(None)));
    }

    #[test]
    fn if_range_uses_strong_comparison() {
        let mut headers = HeaderMap::new();
        assert!(if_range_matches(&headers, "W/\"1-2\"", None));

        headers.insert(header::IF_RANGE, HeaderValue::from_static("W/\"1-2\""));
        assert!(!if_range_matches(&headers, "W/\"1-2\"", None));

        headers.insert(header::IF_RANGE, HeaderValue::from_static("\"1-2\""));
        assert!(!if_range_matches(&headers, "W/\"1-2\"", None));
        assert!(if_range_matches(&headers, "\"1-2\"", None));

        let date = "Tue, 14 Nov 2023 22:13:20 GMT";
        headers.insert(header::IF_RANGE, HeaderValue::from_static(date));
        assert!(if_range_matches(&headers, "W/\"1-2\"", Some(date)));
        assert!(!if_range_matches(&headers, "W/\"1-2\"", None));
    }

    #[test]
    fn content_disposition_encodes_non_ascii_names() {
        let value = content_disposition("rapport \"été\".pdf");
        assert_eq!(
            value,
            "attachment; filename=\"rapport __t__.pdf\"; \
             filename*=UTF-8''rapport%20%22%C3%A9t%C3%A9%22.pdf"
        );
    }
}
