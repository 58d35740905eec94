//! Source classification and remote fetch.

use crate::error::{Result, ThumbnailError};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Where a thumbnail is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file on the local filesystem.
    Local(PathBuf),
    /// A resource fetched over the network.
    Remote(Url),
}

impl Source {
    /// Classify `input` as a URL or a local path.
    ///
    /// Any absolute URL with a host is remote and is not checked for existence.
    /// `file://` URLs resolve to their path. Everything else must name an
    /// existing path, otherwise `FileDoesNotExist` is returned.
    pub fn parse(input: &str) -> Result<Self> {
        if let Ok(url) = Url::parse(input) {
            if url.scheme() == "file" {
                return match url.to_file_path() {
                    Ok(path) if path.exists() => Ok(Source::Local(path)),
                    _ => Err(ThumbnailError::FileDoesNotExist(input.to_string())),
                };
            }
            if url.has_host() {
                return Ok(Source::Remote(url));
            }
        }

        let path = Path::new(input);
        if path.exists() {
            Ok(Source::Local(path.to_path_buf()))
        } else {
            Err(ThumbnailError::FileDoesNotExist(input.to_string()))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Read a local source into memory, refusing files larger than `max_bytes`.
pub(crate) fn read_local(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let len = std::fs::metadata(path)?.len();
    if len > max_bytes {
        return Err(ThumbnailError::ResourceLimit {
            resource: "map",
            limit: max_bytes,
            requested: len,
        });
    }
    Ok(std::fs::read(path)?)
}

/// Download `url` into an anonymous temporary file and read it back.
///
/// The download is spooled to disk first so that `disk_limit` bounds what is
/// written and `map_limit` bounds what is held in memory. There is no request
/// timeout.
pub(crate) fn fetch_remote(url: &Url, disk_limit: Option<u64>, map_limit: u64) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(None::<Duration>)
        .build()?;

    debug!("Fetching {}", url);
    let response = client.get(url.as_str()).send()?.error_for_status()?;

    if let (Some(limit), Some(len)) = (disk_limit, response.content_length()) {
        if len > limit {
            return Err(ThumbnailError::ResourceLimit {
                resource: "disk",
                limit,
                requested: len,
            });
        }
    }

    let mut spool = tempfile::tempfile()?;
    let written = spool_body(response, &mut spool, disk_limit)?;
    spool.flush()?;
    debug!("Spooled {} bytes from {}", written, url);

    if written > map_limit {
        return Err(ThumbnailError::ResourceLimit {
            resource: "map",
            limit: map_limit,
            requested: written,
        });
    }

    spool.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::with_capacity(written as usize);
    spool.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Copy `body` into `spool`, failing once more than `limit` bytes arrive.
fn spool_body(body: impl Read, spool: &mut File, limit: Option<u64>) -> Result<u64> {
    match limit {
        Some(limit) => {
            // One extra byte tells "exactly at the limit" apart from "over it".
            let mut bounded = body.take(limit.saturating_add(1));
            let written = io::copy(&mut bounded, spool)?;
            if written > limit {
                return Err(ThumbnailError::ResourceLimit {
                    resource: "disk",
                    limit,
                    requested: written,
                });
            }
            Ok(written)
        }
        None => {
            let mut body = body;
            Ok(io::copy(&mut body, spool)?)
        }
    }
}
