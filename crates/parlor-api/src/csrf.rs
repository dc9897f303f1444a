//! Cross-site request forgery protection.
//!
//! Each client holds a signed, short-lived cookie carrying a random token.
//! Safe requests always pass and get a fresh cookie when theirs is missing or
//! stale. Unsafe requests must also submit the token, masked with a one-time
//! pad, in the `X-CSRF-Token` header or the `csrf_token` form field.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, Method, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use cookie::time::Duration as CookieDuration;
use hmac::{Hmac, Mac};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "_csrf_token";
pub const HEADER_NAME: &str = "x-csrf-token";
pub const FORM_FIELD: &str = "csrf_token";
pub const MAX_AGE: Duration = Duration::from_secs(2);

/// Largest form body scanned for the token field.
pub const MAX_BODY_BYTES: usize = 10 << 20;

const TOKEN_LEN: usize = 32;

pub type CsrfState = Arc<CsrfConfig>;

/// Policy for [`csrf_protect`]. `new` applies the fixed production policy:
/// strict same-site, secure, http-only cookie named `_csrf_token` that is
/// valid for two seconds.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    key: Vec<u8>,
    cookie_name: String,
    max_age: Duration,
    secure: bool,
    trusted_origins: Vec<String>,
    max_body_bytes: usize,
}

impl CsrfConfig {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        if key.is_empty() {
            warn!("CSRF secret key is empty; cookies are signed with an empty key");
        }

        Self {
            key,
            cookie_name: COOKIE_NAME.to_string(),
            max_age: MAX_AGE,
            secure: true,
            trusted_origins: Vec::new(),
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Plain-HTTP development only.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Extra `host[:port]` values accepted in the `Origin` header besides the
    /// request's own host. The scheme must still match.
    pub fn with_trusted_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Form bodies above this size are answered with 413 instead of being
    /// scanned for the token.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, CsrfFailure> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| CsrfFailure::BadKey)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Cookie value: `<unix_ts>.<token>.<hmac(ts.token)>`.
    fn seal(&self, token: &[u8], issued_at: u64) -> Result<String, CsrfFailure> {
        let payload = format!("{}.{}", issued_at, B64.encode(token));
        let tag = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", payload, B64.encode(tag)))
    }

    fn open(&self, value: &str, now: u64) -> Result<Vec<u8>, CsrfFailure> {
        let (payload, tag) = value.rsplit_once('.').ok_or(CsrfFailure::MalformedCookie)?;
        let (issued_at, token) = payload.split_once('.').ok_or(CsrfFailure::MalformedCookie)?;

        let tag = B64.decode(tag).map_err(|_| CsrfFailure::MalformedCookie)?;
        self.mac(payload)?
            .verify_slice(&tag)
            .map_err(|_| CsrfFailure::BadSignature)?;

        let issued_at: u64 = issued_at.parse().map_err(|_| CsrfFailure::MalformedCookie)?;
        if issued_at.saturating_add(self.max_age.as_secs()) < now {
            return Err(CsrfFailure::Expired);
        }

        let token = B64.decode(token).map_err(|_| CsrfFailure::MalformedCookie)?;
        if token.len() != TOKEN_LEN {
            return Err(CsrfFailure::MalformedCookie);
        }
        Ok(token)
    }

    fn set_cookie(&self, sealed: String) -> Option<HeaderValue> {
        let cookie = Cookie::build((self.cookie_name.clone(), sealed))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(CookieDuration::seconds(self.max_age.as_secs() as i64))
            .build();
        HeaderValue::from_str(&cookie.to_string()).ok()
    }

    /// An `Origin` header, when sent, must carry our scheme and either the
    /// request's own host or a trusted one.
    fn origin_allowed(&self, req: &Request) -> bool {
        let Some(origin) = req.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
            return true;
        };
        let Some((scheme, origin_host)) = origin.split_once("://") else {
            return false;
        };

        let default_scheme = if self.secure { "https" } else { "http" };
        if scheme != req.uri().scheme_str().unwrap_or(default_scheme) {
            return false;
        }

        request_host(req) == Some(origin_host)
            || self.trusted_origins.iter().any(|o| o == origin_host)
    }
}

#[derive(Debug, thiserror::Error)]
enum CsrfFailure {
    #[error("CSRF cookie missing or no longer valid")]
    NoCookie,
    #[error("CSRF cookie malformed")]
    MalformedCookie,
    #[error("CSRF cookie signature mismatch")]
    BadSignature,
    #[error("CSRF cookie expired")]
    Expired,
    #[error("CSRF token not submitted")]
    NoToken,
    #[error("CSRF token does not match cookie")]
    BadToken,
    #[error("origin not allowed")]
    BadOrigin,
    #[error("request body unreadable")]
    BadBody,
    #[error("request body over the scan limit")]
    BodyTooLarge,
    #[error("CSRF key unusable")]
    BadKey,
}

/// The masked token for the current request. Hand it to the client so it
/// can echo it back on the next unsafe request.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CsrfToken>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Rejects unsafe requests that do not prove they came from our own pages.
pub async fn csrf_protect(State(csrf): State<CsrfState>, mut req: Request, next: Next) -> Response {
    let now = unix_now();

    let jar = CookieJar::from_headers(req.headers());
    let existing = jar
        .get(csrf.cookie_name())
        .map(|c| csrf.open(c.value(), now))
        .unwrap_or(Err(CsrfFailure::NoCookie));
    let had_cookie = existing.is_ok();

    let (real_token, issued) = match existing {
        Ok(token) => (token, None),
        Err(reason) => {
            debug!("Issuing new CSRF cookie: {}", reason);
            let token = random_bytes::<TOKEN_LEN>().to_vec();
            let sealed = csrf.seal(&token, now).ok();
            (token, sealed.and_then(|s| csrf.set_cookie(s)))
        }
    };

    req.extensions_mut().insert(CsrfToken(mask(&real_token)));

    if !is_safe(req.method()) {
        let host = request_host(&req).unwrap_or_default().to_string();
        let method = req.method().clone();
        let uri = req.uri().clone();

        let checked = if had_cookie {
            verify(&csrf, req, &real_token).await
        } else {
            Err(CsrfFailure::NoCookie)
        };

        req = match checked {
            Ok(req) => req,
            Err(CsrfFailure::BodyTooLarge) => {
                debug!("Body over {} bytes, not scanned for a CSRF token", csrf.max_body_bytes);
                let mut resp = StatusCode::PAYLOAD_TOO_LARGE.into_response();
                finish(&mut resp, issued);
                return resp;
            }
            Err(reason) => {
                warn!("invalid token from '{}' method '{}' to '{}'", host, method, uri);
                debug!("CSRF rejection reason: {}", reason);
                let mut resp = (StatusCode::FORBIDDEN, "error").into_response();
                finish(&mut resp, issued);
                return resp;
            }
        };
    }

    let mut resp = next.run(req).await;
    finish(&mut resp, issued);
    resp
}

async fn verify(csrf: &CsrfConfig, req: Request, real_token: &[u8]) -> Result<Request, CsrfFailure> {
    if !csrf.origin_allowed(&req) {
        return Err(CsrfFailure::BadOrigin);
    }

    let (req, submitted) = submitted_token(req, csrf.max_body_bytes).await?;
    let submitted = submitted.ok_or(CsrfFailure::NoToken)?;
    let unmasked = unmask(&submitted).ok_or(CsrfFailure::BadToken)?;

    if constant_time_eq(&unmasked, real_token) {
        Ok(req)
    } else {
        Err(CsrfFailure::BadToken)
    }
}

/// Header first, then a form field from an urlencoded or multipart body. A
/// form body is buffered and put back so the handler sees it untouched.
async fn submitted_token(
    req: Request,
    limit: usize,
) -> Result<(Request, Option<String>), CsrfFailure> {
    if let Some(token) = req.headers().get(HEADER_NAME).and_then(|v| v.to_str().ok()) {
        let token = token.to_string();
        return Ok((req, Some(token)));
    }

    let Some(content_type) = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return Ok((req, None));
    };
    let boundary = multer::parse_boundary(&content_type).ok();
    let urlencoded = content_type.starts_with("application/x-www-form-urlencoded");
    if boundary.is_none() && !urlencoded {
        return Ok((req, None));
    }

    let (parts, body) = req.into_parts();
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                CsrfFailure::BodyTooLarge
            } else {
                CsrfFailure::BadBody
            }
        })?
        .to_bytes();

    let token = match boundary {
        Some(boundary) => multipart_field(bytes.clone(), boundary).await,
        None => serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
            .ok()
            .and_then(|fields| fields.into_iter().find(|(k, _)| k == FORM_FIELD))
            .map(|(_, v)| v),
    };

    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

async fn multipart_field(bytes: Bytes, boundary: String) -> Option<String> {
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(bytes) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart.next_field().await.ok()? {
        if field.name() == Some(FORM_FIELD) {
            return field.text().await.ok();
        }
    }
    None
}

/// `Host` header, or the URI authority for HTTP/2 requests.
fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

fn finish(resp: &mut Response, issued: Option<HeaderValue>) {
    if let Some(cookie) = issued {
        resp.headers_mut().append(header::SET_COOKIE, cookie);
    }
    resp.headers_mut()
        .append(header::VARY, HeaderValue::from_static("Cookie"));
}

fn is_safe(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

/// `pad || (pad ^ token)`, so the value sent to clients changes per request.
fn mask(token: &[u8]) -> String {
    let pad = random_bytes::<TOKEN_LEN>();
    let mut out = Vec::with_capacity(TOKEN_LEN * 2);
    out.extend_from_slice(&pad);
    out.extend(pad.iter().zip(token).map(|(p, t)| p ^ t));
    B64.encode(out)
}

fn unmask(masked: &str) -> Option<Vec<u8>> {
    let raw = B64.decode(masked).ok()?;
    if raw.len() != TOKEN_LEN * 2 {
        return None;
    }
    let (pad, xored) = raw.split_at(TOKEN_LEN);
    Some(pad.iter().zip(xored).map(|(p, x)| p ^ x).collect())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
