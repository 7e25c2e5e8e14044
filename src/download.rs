use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{info, warn};

const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_ATTEMPTS: u64 = 4;
const YANDEX_DISK_API: &str = "https://cloud-api.yandex.net/v1/disk/public/resources/download";

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(concat!("sports-forecast/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug, Deserialize)]
struct PublicResourceLink {
    href: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub url: String,
    pub path: PathBuf,
    pub bytes: usize,
}

pub fn is_yandex_disk_link(url: &str) -> bool {
    url.contains("disk.yandex") || url.contains("yadi.sk")
}

/// Turns a public Yandex.Disk link into a direct download href.
pub fn resolve_yandex_disk_url(client: &Client, public_url: &str) -> Result<String> {
    let link: PublicResourceLink = client
        .get(YANDEX_DISK_API)
        .query(&[("public_key", public_url)])
        .send()
        .with_context(|| format!("request download link for {public_url}"))?
        .error_for_status()
        .with_context(|| format!("status for download link of {public_url}"))?
        .json()
        .context("decode Yandex.Disk download link")?;
    link.href
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| anyhow!("Yandex.Disk response has no download href for {public_url}"))
}

pub fn download_file(url: &str, dst: &Path) -> Result<DownloadSummary> {
    let client = http_client()?;
    let direct = if is_yandex_disk_link(url) {
        resolve_yandex_disk_url(client, url)?
    } else {
        url.to_string()
    };
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    info!(url = %direct, dst = %dst.display(), "downloading");

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let fetched = client
            .get(&direct)
            .send()
            .with_context(|| format!("request {direct}"))
            .and_then(|res| {
                res.error_for_status()
                    .with_context(|| format!("status for {direct}"))
            })
            .and_then(|res| res.bytes().with_context(|| format!("read body {direct}")));
        match fetched {
            Ok(bytes) => {
                let tmp = dst.with_extension("download.tmp");
                fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
                fs::rename(&tmp, dst).with_context(|| format!("move into {}", dst.display()))?;
                return Ok(DownloadSummary {
                    url: direct,
                    path: dst.to_path_buf(),
                    bytes: bytes.len(),
                });
            }
            Err(err) => {
                warn!(attempt, error = %err, "download attempt failed");
                last_err = Some(err);
                if attempt < MAX_ATTEMPTS {
                    std::thread::sleep(Duration::from_millis(500 * attempt));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("download failed for {direct}")))
}

#[cfg(test)]
mod tests {
    use super::is_yandex_disk_link;

    #[test]
    fn recognises_public_disk_links() {
        assert!(is_yandex_disk_link("https://disk.yandex.ru/d/abc123"));
        assert!(is_yandex_disk_link("https://yadi.sk/d/abc123"));
        assert!(!is_yandex_disk_link("https://example.com/source.csv"));
    }
}
