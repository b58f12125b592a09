//! Locating and fetching documents

use crate::error::{Error, Result};
use dag::{Context, POLL_INTERVAL};
use log::debug;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use url::Url;

/// Largest document accepted over HTTP
const MAX_DOCUMENT_SIZE: u64 = 8 * 1024 * 1024;

fn location_error(location: &str, message: impl Into<String>) -> Error {
    Error::Location {
        location: location.to_string(),
        message: message.into(),
    }
}

fn fetch_error(url: &Url, message: impl Into<String>) -> Error {
    Error::Fetch {
        location: url.to_string(),
        message: message.into(),
    }
}

/// Resolve a location against the document that refers to it
///
/// Locations without a scheme are paths; relative paths are taken from the
/// directory of `base`, or from the working directory at the top level.
pub fn resolve(location: &str, base: Option<&Url>) -> Result<Url> {
    if let Ok(url) = Url::parse(location)
        && matches!(url.scheme(), "file" | "http" | "https")
    {
        return Ok(url);
    }
    if location.contains("://") {
        return Err(location_error(location, "unsupported scheme"));
    }

    let expanded = shellexpand::tilde(location);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        return Url::from_file_path(path).map_err(|()| location_error(location, "not a valid path"));
    }

    match base {
        Some(base) => base
            .join(expanded.as_ref())
            .map_err(|e| location_error(location, e.to_string())),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| location_error(location, format!("no working directory: {e}")))?;
            Url::from_file_path(cwd.join(path))
                .map_err(|()| location_error(location, "not a valid path"))
        }
    }
}

/// Read a document
pub fn fetch(ctx: &Context, url: &Url) -> Result<String> {
    ctx.check()?;
    debug!("fetching {url}");
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| fetch_error(url, "not a local path"))?;
            std::fs::read_to_string(&path).map_err(|e| fetch_error(url, e.to_string()))
        }
        "http" | "https" => fetch_http(ctx, url),
        other => Err(fetch_error(url, format!("unsupported scheme {other:?}"))),
    }
}

/// GET on a helper thread, abandoned if the context is cancelled
fn fetch_http(ctx: &Context, url: &Url) -> Result<String> {
    let (tx, rx) = mpsc::channel();
    let target = url.clone();
    thread::Builder::new()
        .name("fetch".into())
        .spawn(move || {
            let _ = tx.send(http_get(&target));
        })
        .map_err(|e| fetch_error(url, format!("cannot start request: {e}")))?;

    loop {
        ctx.check()?;
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => return result.map_err(|message| fetch_error(url, message)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(fetch_error(url, "request thread exited"));
            }
        }
    }
}

fn http_get(url: &Url) -> std::result::Result<String, String> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .max_redirects(0)
        .http_status_as_error(false)
        .build()
        .into();

    let mut response = agent
        .get(url.as_str())
        .header("User-Agent", concat!("keel/", env!("CARGO_PKG_VERSION")))
        .call()
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if status.as_u16() >= 300 {
        return Err(format!("server responded {status}"));
    }

    response
        .body_mut()
        .with_config()
        .limit(MAX_DOCUMENT_SIZE)
        .read_to_string()
        .map_err(|e| e.to_string())
}
