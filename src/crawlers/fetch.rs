// fetch.rs - HTTP plumbing shared by the site crawlers
// Page fetches go through the per-host throttle and are checked for block
// pages before any parsing happens.

use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::politeness::{random_user_agent, HostThrottle};
use super::CrawlerError;

/// Labels a response that looks like rate limiting, a bot wall or an access
/// denial rather than real content.
pub fn detect_block_reason(status: StatusCode, body: &str) -> Option<String> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => return Some("http_429".to_string()),
        StatusCode::FORBIDDEN => return Some("http_403".to_string()),
        StatusCode::SERVICE_UNAVAILABLE => return Some("http_503".to_string()),
        _ => {}
    }

    let lower = body.to_lowercase();
    let needles = [
        ("unusual traffic", "unusual_traffic"),
        ("verify you are human", "captcha"),
        ("recaptcha", "captcha"),
        ("hcaptcha", "captcha"),
        ("captcha", "captcha"),
        ("access denied", "access_denied"),
        ("비정상적인 접근", "access_denied"),
        ("접근이 차단", "access_denied"),
    ];
    for (needle, label) in needles {
        if lower.contains(needle) {
            return Some(label.to_string());
        }
    }

    // Tiny HTML with a block-ish token.
    if body.len() < 3500 && lower.contains("blocked") {
        return Some("block_page".to_string());
    }
    None
}

/// Fetches `url` as HTML after waiting for the host's next slot.
pub async fn fetch_html(
    client: &reqwest::Client,
    throttle: &HostThrottle,
    url: &Url,
) -> Result<String, CrawlerError> {
    throttle.wait(url.host_str().unwrap_or_default()).await;
    debug!("GET {}", url);

    let resp = client
        .get(url.clone())
        .header("User-Agent", random_user_agent())
        .header("Accept", "text/html,application/xhtml+xml")
        .header("Accept-Language", "ko-KR,ko;q=0.9,en-US;q=0.8")
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if let Some(reason) = detect_block_reason(status, &body) {
        return Err(CrawlerError::Blocked {
            url: url.to_string(),
            reason,
        });
    }
    if !status.is_success() {
        return Err(CrawlerError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(body)
}

/// Resolves `href` against `base`, keeping only http(s) targets.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    base.join(href)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Filesystem-safe file name for an attachment, prefixed with a stable
/// digest of its URL so two attachments sharing a name do not collide.
pub fn attachment_file_name(name: &str, url: &Url) -> String {
    let fallback = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("attachment");
    let raw = if name.trim().is_empty() { fallback } else { name.trim() };
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_str().as_bytes()).simple().to_string();
    format!("{}_{}", &digest[..8], if cleaned.is_empty() { "attachment" } else { cleaned })
}

/// Largest attachment written to disk.
pub const MAX_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Downloads one attachment into `dir`, returning the saved path.
pub async fn download_attachment(
    client: &reqwest::Client,
    throttle: &HostThrottle,
    url: &Url,
    name: &str,
    dir: &Path,
) -> Result<PathBuf, CrawlerError> {
    download_capped(client, throttle, url, name, dir, MAX_ATTACHMENT_BYTES).await
}

async fn download_capped(
    client: &reqwest::Client,
    throttle: &HostThrottle,
    url: &Url,
    name: &str,
    dir: &Path,
    limit: u64,
) -> Result<PathBuf, CrawlerError> {
    throttle.wait(url.host_str().unwrap_or_default()).await;

    let mut resp = client
        .get(url.clone())
        .header("User-Agent", random_user_agent())
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(CrawlerError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let too_large = || CrawlerError::TooLarge {
        url: url.to_string(),
        limit,
    };
    if resp.content_length().is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(attachment_file_name(name, url));
    let written = match stream_to_file(&mut resp, &path, limit).await {
        Ok(Some(written)) => written,
        Ok(None) => {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(too_large());
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
    };
    info!("Saved attachment {} ({} bytes)", path.display(), written);
    Ok(path)
}

/// Copies the body chunk by chunk. `None` once the body passes `limit`.
async fn stream_to_file(
    resp: &mut reqwest::Response,
    path: &Path,
    limit: u64,
) -> Result<Option<u64>, CrawlerError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = resp.chunk().await? {
        written += chunk.len() as u64;
        if written > limit {
            return Ok(None);
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(Some(written))
}
