//! HTTP client with browser-identifying request profiles.
//!
//! Pages are fetched with the first profile; when the server answers with a
//! challenge (403/429/503 or a known anti-bot marker in the body), the next
//! profile is tried. A challenge that survives every profile is reported as
//! [`ItemError::BotProtection`], distinct from ordinary fetch errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use bindery_shared::{BinderyError, ItemError, Result};

// ---------------------------------------------------------------------------
// Browser profiles
// ---------------------------------------------------------------------------

/// A set of request headers that identifies as a mainstream browser.
#[derive(Debug, Clone, Copy)]
pub struct BrowserProfile {
    pub name: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
}

/// Profiles tried in order.
pub const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        name: "chrome-windows",
        headers: &[
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            ),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Sec-Ch-Ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\""),
            ("Sec-Ch-Ua-Mobile", "?0"),
            ("Sec-Ch-Ua-Platform", "\"Windows\""),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
            ("Upgrade-Insecure-Requests", "1"),
        ],
    },
    BrowserProfile {
        name: "firefox-linux",
        headers: &[
            (
                "User-Agent",
                "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
            ),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Upgrade-Insecure-Requests", "1"),
        ],
    },
    BrowserProfile {
        name: "safari-macos",
        headers: &[
            (
                "User-Agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
            ),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.9"),
        ],
    },
];

// ---------------------------------------------------------------------------
// Challenge detection
// ---------------------------------------------------------------------------

/// Markers that identify a challenge page anywhere in the body.
const BODY_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "cf-chl-bypass",
    "_Incapsula_Resource",
    "px-captcha",
    "captcha-delivery.com",
    "geo.captcha-delivery.com",
];

/// Markers that identify a challenge page by its `<title>`.
const TITLE_MARKERS: &[&str] = &[
    "Just a moment...",
    "Attention Required! | Cloudflare",
    "Checking your browser",
    "Access to this page has been denied",
    "Pardon Our Interruption",
];

/// Return the first anti-bot challenge marker found in `body`, if any.
pub fn detect_challenge(body: &str) -> Option<&'static str> {
    if let Some(marker) = BODY_MARKERS.iter().find(|m| body.contains(**m)) {
        return Some(*marker);
    }

    let title = page_title(body)?;
    TITLE_MARKERS.iter().find(|m| title.contains(**m)).copied()
}

fn page_title(body: &str) -> Option<&str> {
    let mut end = body.len().min(16 * 1024);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let lower = body[..end].to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = start + lower[start..].find('>')? + 1;
    let close = open_end + lower[open_end..].find("</title>")?;
    body.get(open_end..close).map(str::trim)
}

fn is_challenge_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    /// Raw response body.
    pub html: String,
    /// Name of the profile that succeeded.
    pub profile: &'static str,
}

/// A remote file saved to disk.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub content_type: Option<String>,
}

/// HTTP client shared by page fetches, downloads and the encyclopedia client.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BinderyError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// The underlying `reqwest` client.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Fetch a page's HTML, rotating through browser profiles on challenges.
    #[instrument(skip(self))]
    pub async fn fetch_html(&self, url: &str) -> std::result::Result<FetchedPage, ItemError> {
        let parsed = Url::parse(url).map_err(|e| ItemError::fetch(url, format!("invalid URL: {e}")))?;

        let mut last_marker: Option<&'static str> = None;
        let mut last_status: Option<StatusCode> = None;

        for profile in BROWSER_PROFILES {
            let mut request = self.client.get(parsed.as_str());
            for (name, value) in profile.headers {
                request = request.header(*name, *value);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ItemError::fetch(url, e))?;

            let status = response.status();
            let final_url = response.url().to_string();
            let body = response
                .text()
                .await
                .map_err(|e| ItemError::fetch(url, format!("body read failed: {e}")))?;

            let marker = detect_challenge(&body);
            if marker.is_none() && status.is_success() {
                debug!(profile = profile.name, %status, len = body.len(), "page fetched");
                return Ok(FetchedPage {
                    url: final_url,
                    html: body,
                    profile: profile.name,
                });
            }

            if marker.is_none() && !is_challenge_status(status) {
                return Err(ItemError::fetch(url, format!("HTTP {status}")));
            }

            warn!(
                profile = profile.name,
                %status,
                marker = marker.unwrap_or("-"),
                "challenge response, trying next profile"
            );
            last_marker = marker.or(last_marker);
            last_status = Some(status);
        }

        match (last_marker, last_status) {
            (Some(marker), _) => Err(ItemError::BotProtection {
                url: url.to_string(),
                marker: marker.to_string(),
            }),
            (None, Some(status)) => Err(ItemError::fetch(url, format!("HTTP {status}"))),
            (None, None) => Err(ItemError::fetch(url, "no request profile configured")),
        }
    }

    /// Download a binary resource into `dir`, named by a hash of its URL.
    #[instrument(skip(self, dir))]
    pub async fn download(
        &self,
        url: &str,
        dir: &Path,
    ) -> std::result::Result<DownloadedFile, ItemError> {
        let mut request = self.client.get(url);
        if let Some(profile) = BROWSER_PROFILES.first() {
            for (name, value) in profile.headers {
                if *name != "Accept" {
                    request = request.header(*name, *value);
                }
            }
        }

        let response = request.send().await.map_err(|e| ItemError::fetch(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ItemError::fetch(url, format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ItemError::fetch(url, format!("body read failed: {e}")))?;

        let ext = extension_for(url, content_type.as_deref());
        let path = dir.join(format!("{}.{ext}", url_hash(url)));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ItemError::Conversion(format!("failed to write {}: {e}", path.display())))?;

        debug!(path = %path.display(), bytes = bytes.len(), "download complete");

        Ok(DownloadedFile { path, content_type })
    }
}

/// Short SHA-256 digest of a URL, used for download file names.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// File extension from the URL path, falling back to the content type.
fn extension_for(url: &str, content_type: Option<&str>) -> String {
    let from_path = Url::parse(url).ok().and_then(|u| {
        let path = u.path().to_string();
        let name = path.rsplit('/').next()?.to_string();
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then_some(ext)
    });
    if let Some(ext) = from_path {
        return ext;
    }

    match content_type {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/svg+xml") => "svg",
        Some("application/pdf") => "pdf",
        _ => "bin",
    }
    .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
