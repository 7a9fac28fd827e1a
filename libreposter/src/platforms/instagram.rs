//! Instagram platform implementation
//!
//! Talks to the private mobile API the Android app uses. Requests carry an
//! app id and a device identity derived from the account name, so the same
//! account always presents the same device.
//!
//! When Instagram wants a login verified, either on the login itself or on the
//! first feed read after it, the client asks for a security code by email or
//! SMS, reads the code from the terminal and submits it. A challenge that
//! cannot be answered surfaces as `PlatformError::ChallengeRequired`.

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InstagramConfig;
use crate::error::{PlatformError, ReposterError, Result};
use crate::platforms::SocialPlatform;
use crate::types::{FeedItem, FeedPage, FeedUser};

const API_BASE: &str = "https://i.instagram.com/api/v1";
const RUPLOAD_BASE: &str = "https://i.instagram.com/rupload_igphoto";
const APP_ID: &str = "567067343352427";
const USER_AGENT: &str = "Instagram 222.0.0.13.114 Android (29/10; 420dpi; 1080x2069; \
                          samsung; SM-G975F; beyond2; exynos9820; en_US; 350696709)";

/// Stable per-account device identity.
#[derive(Debug, Clone, PartialEq)]
struct Device {
    device_id: String,
    uuid: String,
}

impl Device {
    fn for_username(username: &str) -> Self {
        let digest = Sha256::digest(username.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&digest[16..32]);

        Self {
            device_id: format!("android-{}", &hex[..16]),
            uuid: Uuid::from_bytes(uuid_bytes).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    authorization: String,
    user_pk: u64,
}

pub struct InstagramClient {
    http: Client,
    username: String,
    password: String,
    device: Device,
    session: Option<Session>,
}

impl InstagramClient {
    pub fn new(config: &InstagramConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            username: config.username.clone(),
            password: config.password.clone(),
            device: Device::for_username(&config.username),
            session: None,
        })
    }

    /// Numeric id of the logged-in account, once authenticated.
    pub fn user_pk(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.user_pk)
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| PlatformError::Authentication("Not authenticated".to_string()).into())
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("X-IG-App-ID", APP_ID)
            .header("X-IG-Device-ID", &self.device.uuid)
            .header("X-IG-Android-ID", &self.device.device_id);

        match &self.session {
            Some(session) => request.header("Authorization", &session.authorization),
            None => request,
        }
    }

    /// Send a request and read its answer without classifying it.
    async fn send_raw(&self, request: RequestBuilder, context: &str) -> Result<RawAnswer> {
        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("{}: {}", context, e)))?;
        read_answer(response, context).await
    }

    async fn post_signed(&self, path: &str, body: Value, context: &str) -> Result<ApiResponse> {
        let request = self
            .http
            .post(format!("{}{}", API_BASE, path))
            .form(&[("signed_body", signed_body(&body))]);
        self.send_raw(request, context).await?.into_checked(context)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)], context: &str) -> Result<ApiResponse> {
        let request = self.http.post(format!("{}{}", API_BASE, path)).form(form);
        self.send_raw(request, context).await?.into_checked(context)
    }

    async fn get_json(&self, path: &str, cursor: Option<&str>, context: &str) -> Result<Value> {
        let mut request = self.http.get(format!("{}{}", API_BASE, path));
        if let Some(cursor) = cursor {
            request = request.query(&[("max_id", cursor)]);
        }
        self.send_raw(request, context)
            .await?
            .into_checked(context)
            .map(|answer| answer.body)
    }

    fn login_request(&self) -> RequestBuilder {
        let timestamp = chrono::Utc::now().timestamp();
        let body = json!({
            "username": self.username,
            "enc_password": format!("#PWD_INSTAGRAM:0:{}:{}", timestamp, self.password),
            "device_id": self.device.device_id,
            "guid": self.device.uuid,
            "phone_id": Uuid::new_v4().to_string(),
            "login_attempt_count": "0",
        });
        self.http
            .post(format!("{}/accounts/login/", API_BASE))
            .form(&[("signed_body", signed_body(&body))])
    }

    /// Log in, answering a login challenge once if one comes back.
    async fn login(&self) -> Result<ApiResponse> {
        let answer = self.send_raw(self.login_request(), "Login").await?;
        let Some(api_path) = challenge_path(&answer.body) else {
            return answer.into_checked("Login").map_err(login_error);
        };

        warn!("Instagram asked to verify the login");
        let resolved = self.resolve_challenge(&api_path).await?;
        if resolved.authorization.is_some() && resolved.body.pointer("/logged_in_user/pk").is_some() {
            return Ok(resolved);
        }

        self.send_raw(self.login_request(), "Login")
            .await?
            .into_checked("Login")
            .map_err(login_error)
    }

    /// Read the account's own feed; a fresh session that is held at a
    /// checkpoint fails here rather than on login.
    async fn verify_session(&mut self) -> Result<()> {
        let user_pk = self.user_pk().ok_or_else(|| {
            ReposterError::from(PlatformError::Authentication("Not authenticated".to_string()))
        })?;
        let request = self.http.get(format!("{}/feed/user/{}/", API_BASE, user_pk));
        let answer = self.send_raw(request, "Feed check").await?;

        let Some(api_path) = challenge_path(&answer.body) else {
            return answer.into_checked("Feed check").map(|_| ());
        };

        warn!("Instagram asked to verify the session");
        let resolved = self.resolve_challenge(&api_path).await?;
        if let (Some(authorization), Some(session)) = (resolved.authorization, self.session.as_mut()) {
            session.authorization = authorization;
        }
        Ok(())
    }

    /// Walk a challenge to completion: pick a verification method, then
    /// submit the code the user received.
    async fn resolve_challenge(&self, api_path: &str) -> Result<ApiResponse> {
        let request = self.http.get(format!("{}{}", API_BASE, api_path)).query(&[
            ("guid", self.device.uuid.as_str()),
            ("device_id", self.device.device_id.as_str()),
        ]);
        let state = self
            .send_raw(request, "Challenge state")
            .await?
            .into_checked("Challenge state")?;
        debug!(state = %state.body, "Challenge state");

        match challenge_step(&state.body) {
            ChallengeStep::ConfirmLogin => {
                info!("Confirming the login from this device");
                return self.post_form(api_path, &[("choice", "0")], "Challenge").await;
            }
            ChallengeStep::SelectMethod(choice) => {
                info!("Requesting a security code");
                self.post_form(api_path, &[("choice", choice.as_str())], "Challenge")
                    .await?;
            }
            ChallengeStep::AwaitCode => {}
        }

        let code = tokio::task::spawn_blocking(prompt_security_code)
            .await
            .map_err(|e| {
                ReposterError::from(PlatformError::ChallengeRequired(format!(
                    "Security code prompt failed: {}",
                    e
                )))
            })??;

        let response = self
            .post_form(
                api_path,
                &[
                    ("security_code", code.as_str()),
                    ("guid", self.device.uuid.as_str()),
                    ("device_id", self.device.device_id.as_str()),
                ],
                "Security code",
            )
            .await?;
        info!("Security code accepted");
        Ok(response)
    }

    async fn upload_jpeg(&self, jpeg: &[u8]) -> Result<String> {
        let upload_id = chrono::Utc::now().timestamp_millis().to_string();
        let entity_name = format!(
            "{}_0_{}",
            upload_id,
            rand::thread_rng().gen_range(1_000_000_000u64..10_000_000_000)
        );
        let params = json!({
            "retry_context": r#"{"num_step_auto_retry":0,"num_reupload":0,"num_step_manual_retry":0}"#,
            "media_type": "1",
            "upload_id": upload_id,
            "image_compression": r#"{"lib_name":"moz","lib_version":"3.1.m","quality":"80"}"#,
            "xsharing_user_ids": "[]",
        });

        let request = self
            .http
            .post(format!("{}/{}", RUPLOAD_BASE, entity_name))
            .header("X-Instagram-Rupload-Params", params.to_string())
            .header("X_FB_PHOTO_WATERFALL_ID", Uuid::new_v4().to_string())
            .header("X-Entity-Type", "image/jpeg")
            .header("X-Entity-Name", &entity_name)
            .header("X-Entity-Length", jpeg.len().to_string())
            .header("Offset", "0")
            .header("Content-Type", "application/octet-stream")
            .body(jpeg.to_vec());

        self.send_raw(request, "Photo upload")
            .await?
            .into_checked("Photo upload")?;

        Ok(upload_id)
    }
}

/// The API accepts unsigned bodies marked with a literal signature.
fn signed_body(body: &Value) -> String {
    format!("SIGNATURE.{}", body)
}

/// A successful API answer.
#[derive(Debug)]
struct ApiResponse {
    body: Value,
    /// Session header handed out on login.
    authorization: Option<String>,
}

/// An API answer that has not been classified yet.
struct RawAnswer {
    status: StatusCode,
    body: Value,
    authorization: Option<String>,
}

impl RawAnswer {
    fn into_checked(self, context: &str) -> Result<ApiResponse> {
        check_response(self.status, &self.body, context)?;
        Ok(ApiResponse {
            body: self.body,
            authorization: self.authorization,
        })
    }
}

async fn read_answer(response: reqwest::Response, context: &str) -> Result<RawAnswer> {
    let status = response.status();
    let authorization = response
        .headers()
        .get("ig-set-authorization")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let text = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(format!("{}: {}", context, e)))?;
    let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));

    Ok(RawAnswer {
        status,
        body,
        authorization,
    })
}

/// A rejected login is a credential problem, not a posting one.
fn login_error(error: ReposterError) -> ReposterError {
    match error {
        ReposterError::Platform(PlatformError::Posting(msg)) => PlatformError::Authentication(msg).into(),
        other => other,
    }
}

/// Endpoint of the challenge a failed answer points at, if any.
fn challenge_path(body: &Value) -> Option<String> {
    let message = body.get("message").and_then(Value::as_str);
    if message != Some("challenge_required") && message != Some("checkpoint_required") {
        return None;
    }
    body.pointer("/challenge/api_path")
        .and_then(Value::as_str)
        .filter(|path| path.starts_with('/'))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
enum ChallengeStep {
    /// "Was this you?": confirming needs no code.
    ConfirmLogin,
    /// Ask for a code over the given method (0 SMS, 1 email).
    SelectMethod(String),
    /// A code was already sent.
    AwaitCode,
}

fn challenge_step(state: &Value) -> ChallengeStep {
    match state.get("step_name").and_then(Value::as_str) {
        Some("delta_login_review") => ChallengeStep::ConfirmLogin,
        Some("select_verify_method") => {
            let choice = state
                .pointer("/step_data/choice")
                .and_then(value_as_cursor)
                .unwrap_or_else(|| "1".to_string());
            ChallengeStep::SelectMethod(choice)
        }
        _ => ChallengeStep::AwaitCode,
    }
}

fn prompt_security_code() -> Result<String> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    read_security_code(&mut stdin.lock(), &mut stdout.lock())
}

fn read_security_code(input: &mut impl BufRead, output: &mut impl Write) -> Result<String> {
    let unreadable = |e: std::io::Error| {
        ReposterError::from(PlatformError::ChallengeRequired(format!(
            "Could not read security code: {}",
            e
        )))
    };

    write!(output, "Enter the Instagram security code: ").map_err(unreadable)?;
    output.flush().map_err(unreadable)?;

    let mut line = String::new();
    input.read_line(&mut line).map_err(unreadable)?;
    let code: String = line.chars().filter(|c| !c.is_whitespace()).collect();

    if code.is_empty() {
        return Err(PlatformError::ChallengeRequired("No security code entered".to_string()).into());
    }
    Ok(code)
}

/// Map an API answer to an error when either the status or the body says it
/// failed.
fn check_response(status: StatusCode, body: &Value, context: &str) -> Result<()> {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let failed = body.get("status").and_then(Value::as_str) == Some("fail");

    if message == "challenge_required"
        || message == "checkpoint_required"
        || body.get("two_factor_required").and_then(Value::as_bool) == Some(true)
    {
        return Err(PlatformError::ChallengeRequired(format!("{}: {}", context, message)).into());
    }

    if status == StatusCode::TOO_MANY_REQUESTS || message.contains("Please wait a few minutes") {
        return Err(PlatformError::RateLimit(format!("{}: {}", context, message)).into());
    }

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || message == "login_required"
        || body.get("invalid_credentials").and_then(Value::as_bool) == Some(true)
    {
        return Err(PlatformError::Authentication(format!("{}: {}", context, message)).into());
    }

    if status.is_server_error() {
        return Err(PlatformError::Network(format!("{} failed with {}", context, status)).into());
    }

    if !status.is_success() || failed {
        let detail = if message.is_empty() {
            status.to_string()
        } else {
            message
        };
        return Err(PlatformError::Posting(format!("{}: {}", context, detail)).into());
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    items: Vec<RawMedia>,
    #[serde(default)]
    more_available: bool,
    #[serde(default)]
    next_max_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    id: String,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    pk: Value,
    username: String,
}

/// Ids arrive as numbers in older payloads and as strings in newer ones.
fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_cursor(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a user or tag feed answer into a [`FeedPage`].
fn parse_feed_page(body: Value) -> Result<FeedPage> {
    let raw: RawFeed = serde_json::from_value(body)
        .map_err(|e| PlatformError::InvalidResponse(format!("Malformed feed: {}", e)))?;

    let items = raw
        .items
        .into_iter()
        .map(|media| -> Result<FeedItem> {
            let pk = value_as_u64(&media.user.pk).ok_or_else(|| {
                PlatformError::InvalidResponse(format!("Invalid user id on media {}", media.id))
            })?;
            Ok(FeedItem {
                id: media.id,
                user: FeedUser {
                    pk,
                    username: media.user.username,
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let next_cursor = if raw.more_available {
        raw.next_max_id.as_ref().and_then(value_as_cursor)
    } else {
        None
    };

    Ok(FeedPage { items, next_cursor })
}

#[async_trait]
impl SocialPlatform for InstagramClient {
    async fn authenticate(&mut self) -> Result<()> {
        let response = self.login().await?;

        let user_pk = response
            .body
            .pointer("/logged_in_user/pk")
            .and_then(value_as_u64)
            .ok_or_else(|| {
                PlatformError::Authentication("Login answer carried no user".to_string())
            })?;
        let authorization = response.authorization.ok_or_else(|| {
            PlatformError::Authentication("Login answer carried no session".to_string())
        })?;

        self.session = Some(Session {
            authorization,
            user_pk,
        });
        if let Err(e) = self.verify_session().await {
            self.session = None;
            return Err(e);
        }
        info!("Logged in to Instagram as {} ({})", self.username, user_pk);
        Ok(())
    }

    async fn publish_photo(&self, jpeg: &[u8], caption: &str) -> Result<String> {
        self.session()?;
        let upload_id = self.upload_jpeg(jpeg).await?;
        debug!("Uploaded photo {} ({} bytes)", upload_id, jpeg.len());

        let body = json!({
            "upload_id": upload_id,
            "caption": caption,
            "source_type": "4",
            "_uuid": self.device.uuid,
            "device_id": self.device.device_id,
        });
        let response = self
            .post_signed("/media/configure/", body, "Configure photo")
            .await?;

        response
            .body
            .pointer("/media/id")
            .and_then(value_as_cursor)
            .ok_or_else(|| {
                PlatformError::Posting("Configure answer carried no media id".to_string()).into()
            })
    }

    async fn follow(&self, user_pk: u64) -> Result<()> {
        self.session()?;
        let body = json!({
            "user_id": user_pk.to_string(),
            "radio_type": "wifi-none",
            "_uuid": self.device.uuid,
            "device_id": self.device.device_id,
        });
        self.post_signed(&format!("/friendships/create/{}/", user_pk), body, "Follow")
            .await
            .map(|_| ())
    }

    async fn like(&self, media_id: &str, owner: &FeedUser) -> Result<()> {
        self.session()?;
        let body = json!({
            "media_id": media_id,
            "module_name": "profile",
            "user_id": owner.pk.to_string(),
            "username": owner.username,
            "radio_type": "wifi-none",
            "_uuid": self.device.uuid,
            "device_id": self.device.device_id,
            "d": "0",
        });
        self.post_signed(&format!("/media/{}/like/", media_id), body, "Like")
            .await
            .map(|_| ())
    }

    async fn user_feed_page(&self, user_pk: u64, cursor: Option<&str>) -> Result<FeedPage> {
        self.session()?;
        let body = self
            .get_json(&format!("/feed/user/{}/", user_pk), cursor, "User feed")
            .await?;
        parse_feed_page(body)
    }

    async fn tag_feed_page(&self, tag: &str, cursor: Option<&str>) -> Result<FeedPage> {
        self.session()?;
        let tag = tag.trim_start_matches('#');
        let body = self
            .get_json(&format!("/feed/tag/{}/", tag), cursor, "Tag feed")
            .await?;
        parse_feed_page(body)
    }

    fn name(&self) -> &str {
        "instagram"
    }
}
