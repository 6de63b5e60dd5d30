//! 路由装配：公开页面、受保护的上传路由与公共中间件。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::get;
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{self, Credentials, SessionStore};
use crate::config::{LOGIN_PATH, REPORTS_PATH, UPLOAD_PATH};
use crate::db::ReportStore;
use crate::error::AppError;
use crate::storage::ReportFiles;
use crate::{http, reports, version, views};

/// 路由依赖的共享组件。
pub struct AppComponents {
    pub credentials: Arc<Credentials>,
    pub sessions: Arc<SessionStore>,
    pub files: Arc<ReportFiles>,
    pub reports: Arc<ReportStore>,
    pub upload_max_size: usize,
}

pub fn build_router(components: AppComponents) -> Router {
    let protected = Router::new()
        .route(
            UPLOAD_PATH,
            get(reports::upload_form).post(reports::upload_report),
        )
        .layer(DefaultBodyLimit::max(components.upload_max_size))
        .route_layer(middleware::from_fn(auth::require_admin));

    Router::new()
        .route("/", get(views::landing_page))
        .route(LOGIN_PATH, get(auth::login_page).post(auth::login_submit))
        .route("/admin/logout", get(auth::logout))
        .route(REPORTS_PATH, get(reports::list_reports))
        .route("/uploads/reports/{filename}", get(reports::download_report))
        .route("/static/{*path}", get(views::serve_static))
        .route("/api/version", get(version::get_version_info))
        .merge(protected)
        .fallback(|| async { AppError::NotFound })
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(http::make_request_span)
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(components.credentials))
        .layer(Extension(components.sessions))
        .layer(Extension(components.files))
        .layer(Extension(components.reports))
}
