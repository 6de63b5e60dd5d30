//! 页面渲染：内嵌模板、静态样式资源与首页。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::CookieJar;
use minijinja::{Environment, context};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::warn;

use crate::auth::SessionStore;
use crate::db::Report;
use crate::error::AppError;

#[derive(RustEmbed)]
#[folder = "templates"]
struct TemplateSources;

#[derive(RustEmbed)]
#[folder = "assets"]
struct StaticAssets;

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(build_environment);

fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    for name in TemplateSources::iter() {
        let Some(file) = TemplateSources::get(&name) else {
            continue;
        };
        let source = String::from_utf8_lossy(&file.data).into_owned();
        if let Err(err) = env.add_template_owned(name.to_string(), source) {
            warn!(template = %name, error = %err, "failed to load template");
        }
    }
    env
}

fn render(name: &str, ctx: minijinja::Value) -> Result<Html<String>, minijinja::Error> {
    TEMPLATES.get_template(name)?.render(ctx).map(Html)
}

/// 列表页中单条报告的展示数据。
#[derive(Serialize)]
struct ReportEntry<'a> {
    original_name: &'a str,
    filename: &'a str,
    uploaded_at: String,
    uploaded_at_display: String,
}

impl<'a> From<&'a Report> for ReportEntry<'a> {
    fn from(report: &'a Report) -> Self {
        Self {
            original_name: &report.original_name,
            filename: &report.filename,
            uploaded_at: report.uploaded_at.to_rfc3339(),
            uploaded_at_display: report.uploaded_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

pub fn render_index(is_admin: bool) -> Result<Html<String>, AppError> {
    Ok(render("index.html", context! { is_admin })?)
}

pub fn render_login(is_admin: bool, error: Option<&str>) -> Result<Html<String>, AppError> {
    Ok(render("admin-login.html", context! { is_admin, error })?)
}

pub fn render_upload(error: Option<&str>) -> Result<Html<String>, AppError> {
    Ok(render(
        "report-upload.html",
        context! { is_admin => true, error },
    )?)
}

pub fn render_reports(is_admin: bool, reports: &[Report]) -> Result<Html<String>, AppError> {
    let reports: Vec<ReportEntry<'_>> = reports.iter().map(ReportEntry::from).collect();
    Ok(render("reports.html", context! { is_admin, reports })?)
}

/// 错误页渲染；失败时由调用方回退为纯文本。
pub fn render_error(status: StatusCode, message: &str) -> Result<Html<String>, minijinja::Error> {
    render(
        "error.html",
        context! {
            is_admin => false,
            status => status.to_string(),
            message,
        },
    )
}

/// 首页（公开）。
pub async fn landing_page(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    render_index(sessions.is_admin(&jar).await)
}

/// 内嵌静态资源。
pub async fn serve_static(Path(path): Path<String>) -> Result<Response, AppError> {
    let Some(asset) = StaticAssets::get(&path) else {
        return Err(AppError::NotFound);
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| AppError::Internal("invalid mime type".into()))?,
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    Ok((headers, AxumBody::from(asset.data.into_owned())).into_response())
}
