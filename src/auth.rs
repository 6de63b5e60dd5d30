//! 管理员认证：口令哈希校验、服务端会话与受保护路由的登录拦截。

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use axum::body::Body as AxumBody;
use axum::extract::{Extension, Form};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LOGIN_PATH, MAX_SESSION_TTL_SECS, SESSION_COOKIE_NAME, UPLOAD_PATH};
use crate::error::AppError;
use crate::http::is_https_request;
use crate::views;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// 启动时从配置读取的管理员账号与口令哈希。
#[derive(Debug)]
pub struct Credentials {
    username: String,
    password_hash: String,
}

#[derive(Debug)]
pub enum CredentialsError {
    MissingUsername,
    MissingPasswordHash,
    InvalidPasswordHash(String),
}

impl std::fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsError::MissingUsername => write!(f, "ADMIN_USERNAME is not set"),
            CredentialsError::MissingPasswordHash => write!(f, "ADMIN_PASSWORD_HASH is not set"),
            CredentialsError::InvalidPasswordHash(err) => {
                write!(f, "ADMIN_PASSWORD_HASH is not a valid PHC string: {err}")
            }
        }
    }
}

impl std::error::Error for CredentialsError {}

impl Credentials {
    pub fn new(
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<Self, CredentialsError> {
        let username = username
            .filter(|value| !value.is_empty())
            .ok_or(CredentialsError::MissingUsername)?;
        let password_hash = password_hash
            .filter(|value| !value.is_empty())
            .ok_or(CredentialsError::MissingPasswordHash)?;
        PasswordHash::new(&password_hash)
            .map_err(|err| CredentialsError::InvalidPasswordHash(err.to_string()))?;
        Ok(Self {
            username,
            password_hash,
        })
    }

    /// 用户名精确匹配且口令哈希校验通过时返回 true。
    ///
    /// 无论用户名是否匹配都会执行哈希校验，失败路径不区分是哪个字段出错。
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let password_ok = PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        let username_ok = username == self.username;
        username_ok && password_ok
    }
}

/// 生成 Argon2id 口令哈希（PHC 字符串）。
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub admin_logged_in: bool,
    pub expires_at: Instant,
}

/// 以不透明会话 ID 为键的内存会话表。
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// 会话有效期上限为 `MAX_SESSION_TTL_SECS`。
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: ttl.min(Duration::from_secs(MAX_SESSION_TTL_SECS)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create_admin_session(&self) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            admin_logged_in: true,
            expires_at: expiry_after(self.ttl),
        };
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// 返回未过期的会话；过期会话会被顺带移除。
    pub async fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        match sessions.get(id) {
            Some(session) if session.expires_at > now => Some(session.clone()),
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    pub async fn destroy(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(id);
    }

    /// 当前请求的 Cookie 是否对应已登录的管理员会话。
    pub async fn is_admin(&self, jar: &CookieJar) -> bool {
        let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
            return false;
        };
        self.get(cookie.value())
            .await
            .is_some_and(|session| session.admin_logged_in)
    }

    /// 清理过期会话。
    pub async fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }
}

fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_SESSION_TTL_SECS)))
        .unwrap_or(now)
}

/// 受保护路由的拦截中间件：未登录时重定向到登录页。
pub async fn require_admin(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    if sessions.is_admin(&jar).await {
        return next.run(req).await;
    }
    Redirect::to(LOGIN_PATH).into_response()
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// 登录页；已登录时直接跳转到上传页。
pub async fn login_page(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    if sessions.is_admin(&jar).await {
        return Ok(Redirect::to(UPLOAD_PATH).into_response());
    }
    Ok(views::render_login(false, None)?.into_response())
}

/// 提交登录表单：成功时创建会话并写入 Cookie。
pub async fn login_submit(
    Extension(credentials): Extension<Arc<Credentials>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let LoginForm { username, password } = form;
    let verified = tokio::task::spawn_blocking(move || credentials.verify(&username, &password))
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;

    if !verified {
        warn!("admin login rejected");
        let page = views::render_login(false, Some(INVALID_CREDENTIALS))?;
        return Ok((StatusCode::UNAUTHORIZED, page).into_response());
    }

    if let Some(previous) = jar.get(SESSION_COOKIE_NAME) {
        sessions.destroy(previous.value()).await;
    }
    let session = sessions.create_admin_session().await;
    info!("admin logged in");

    let cookie = Cookie::build((SESSION_COOKIE_NAME, session.id))
        .path("/")
        .http_only(true)
        .secure(is_https_request(&headers))
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(
            i64::try_from(sessions.ttl().as_secs()).unwrap_or(i64::MAX),
        ))
        .build();
    Ok((jar.add(cookie), Redirect::to(UPLOAD_PATH)).into_response())
}

/// 登出：销毁会话、删除 Cookie 并跳转到登录页。
pub async fn logout(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        sessions.destroy(cookie.value()).await;
        info!("admin logged out");
    }

    (
        jar.remove(Cookie::build(SESSION_COOKIE_NAME).path("/").build()),
        Redirect::to(LOGIN_PATH),
    )
}

#[cfg(test)]
pub(crate) fn cheap_hash(password: &str) -> String {
    use argon2::{Algorithm, Params, Version};

    let params = Params::new(8, 1, 1, None).expect("argon2 params");
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .expect("hash password")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new(Some("editor".into()), Some(cheap_hash("s3cret"))).expect("credentials")
    }

    #[test]
    fn verify_accepts_only_exact_pair() {
        let credentials = credentials();
        assert!(credentials.verify("editor", "s3cret"));
        assert!(!credentials.verify("editor", "wrong"));
        assert!(!credentials.verify("Editor", "s3cret"));
        assert!(!credentials.verify("someone", "s3cret"));
        assert!(!credentials.verify("", ""));
    }

    #[test]
    fn credentials_reject_missing_or_malformed_hash() {
        assert!(matches!(
            Credentials::new(None, Some(cheap_hash("x"))),
            Err(CredentialsError::MissingUsername)
        ));
        assert!(matches!(
            Credentials::new(Some("editor".into()), None),
            Err(CredentialsError::MissingPasswordHash)
        ));
        assert!(matches!(
            Credentials::new(Some("editor".into()), Some("plaintext".into())),
            Err(CredentialsError::InvalidPasswordHash(_))
        ));
    }

    #[test]
    fn hash_password_produces_verifiable_phc_string() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        let credentials = Credentials::new(Some("editor".into()), Some(hash)).expect("credentials");
        assert!(credentials.verify("editor", "correct horse"));
    }

    #[tokio::test]
    async fn sessions_expire_and_are_pruned() {
        let store = SessionStore::new(Duration::from_millis(20));
        let session = store.create_admin_session().await;
        assert!(store.get(&session.id).await.is_some());

        let stale = store.create_admin_session().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get(&session.id).await.is_none());
        assert_eq!(store.prune_expired().await, 1);
        assert!(store.get(&stale.id).await.is_none());
    }

    #[tokio::test]
    async fn oversized_ttl_is_clamped() {
        let store = SessionStore::new(Duration::from_secs(u64::MAX));
        assert_eq!(store.ttl(), Duration::from_secs(MAX_SESSION_TTL_SECS));

        let session = store.create_admin_session().await;
        assert!(session.expires_at > Instant::now());
        assert!(store.get(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn destroyed_session_is_not_admin() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create_admin_session().await;
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE_NAME, session.id.clone()));
        assert!(store.is_admin(&jar).await);

        store.destroy(&session.id).await;
        assert!(!store.is_admin(&jar).await);
        assert!(!store.is_admin(&CookieJar::new()).await);
    }
}
