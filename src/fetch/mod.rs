//! Script and dataset downloads
//!
//! A download streams the response body in `download_chunk_bytes` chunks into
//! `<dest>/<name>.part`, hashing as it goes, then renames the part file over
//! `<dest>/<name>`. `<name>` is the last segment of the URL path. A failed
//! transfer removes its part file and leaves any earlier download in place.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::config::WorkerConfig;
use crate::job::ScriptSource;
use crate::log_sink::LogSink;
use crate::workspace::is_safe_component;

/// Download errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("invalid download URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("download of {url} failed with HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("download of {url} failed: {cause}")]
    Transport { url: String, cause: String },

    #[error("failed writing {path:?} while downloading {url}: {source}")]
    Io {
        url: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("local script {0:?} does not exist")]
    LocalScriptMissing(PathBuf),
}

impl FetchError {
    /// URL being fetched, when the error concerns one
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::InvalidUrl { url, .. }
            | FetchError::Http { url, .. }
            | FetchError::Transport { url, .. }
            | FetchError::Io { url, .. } => Some(url),
            FetchError::Client(_) | FetchError::LocalScriptMissing(_) => None,
        }
    }
}

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the file contents
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// No URL was given
    Skipped,
    Downloaded(DownloadedFile),
}

impl FetchOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Skipped => None,
            FetchOutcome::Downloaded(file) => Some(&file.path),
        }
    }
}

/// Blocking downloader that reports progress to the job log
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    chunk_bytes: usize,
    sink: LogSink,
}

impl Fetcher {
    pub fn new(config: &WorkerConfig, sink: LogSink) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.download_timeout())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            chunk_bytes: config.download_chunk_bytes.max(1),
            sink,
        })
    }

    /// Download `url` into `dest_dir`.
    ///
    /// An absent or blank URL is not an error: it logs one warning and
    /// returns [`FetchOutcome::Skipped`].
    pub fn download(&self, url: Option<&str>, dest_dir: &Path) -> Result<FetchOutcome, FetchError> {
        let url = match url.map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => {
                self.sink.warning("Download URL not provided. Skipping.");
                return Ok(FetchOutcome::Skipped);
            }
        };

        let parsed = parse_download_url(url)?;
        let name = file_name(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "URL path has no file name".to_string(),
        })?;

        let dest = dest_dir.join(&name);
        self.sink
            .info(format!("Downloading {} to {}...", name, dest.display()));

        let file = self.transfer(parsed, &dest)?;
        tracing::debug!(url, path = %file.path.display(), bytes = file.bytes, sha256 = %file.sha256, "download complete");
        self.sink.info(format!("{} downloaded successfully.", name));
        Ok(FetchOutcome::Downloaded(file))
    }

    /// Make the script available inside `dest_dir` and return its absolute path.
    pub fn fetch_script(&self, source: &ScriptSource, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        match source {
            ScriptSource::Remote(url) => match self.download(Some(url.as_str()), dest_dir)? {
                FetchOutcome::Downloaded(file) => Ok(file.path),
                FetchOutcome::Skipped => Err(FetchError::InvalidUrl {
                    url: url.clone(),
                    reason: "empty script URL".to_string(),
                }),
            },
            ScriptSource::Local(path) => {
                if !path.is_file() {
                    return Err(FetchError::LocalScriptMissing(path.clone()));
                }
                fs::canonicalize(path).map_err(|_| FetchError::LocalScriptMissing(path.clone()))
            }
        }
    }

    fn transfer(&self, url: Url, dest: &Path) -> Result<DownloadedFile, FetchError> {
        let url_text = url.to_string();
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Transport {
                url: url_text.clone(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url_text,
                status: status.as_u16(),
            });
        }

        let part = part_path(dest);
        let result = self.stream_to(&mut response, &url_text, &part).and_then(|(bytes, sha256)| {
            fs::rename(&part, dest).map_err(|source| FetchError::Io {
                url: url_text.clone(),
                path: dest.to_path_buf(),
                source,
            })?;
            Ok(DownloadedFile {
                path: dest.to_path_buf(),
                bytes,
                sha256,
            })
        });

        if result.is_err() {
            // The part file may or may not exist at this point
            let _ = fs::remove_file(&part);
        }
        result
    }

    /// Copy `reader` into `path` chunk by chunk, returning size and digest.
    fn stream_to(&self, reader: &mut impl Read, url: &str, path: &Path) -> Result<(u64, String), FetchError> {
        let io_error = |source: io::Error| FetchError::Io {
            url: url.to_string(),
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::create(path).map_err(io_error)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_bytes];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        cause: e.to_string(),
                    })
                }
            };
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).map_err(io_error)?;
            total += n as u64;
        }

        file.sync_all().map_err(io_error)?;
        Ok((total, hex::encode(hasher.finalize())))
    }
}

fn parse_download_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {:?}", parsed.scheme()),
        });
    }
    Ok(parsed)
}

/// Last non-empty path segment, usable as a file name
fn file_name(url: &Url) -> Option<String> {
    let name = url.path_segments()?.last()?;
    is_safe_component(name).then(|| name.to_string())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::LogLevel;
    use httpmock::{Method, MockServer};
    use tempfile::TempDir;

    fn fetcher(sink: &LogSink) -> Fetcher {
        Fetcher::new(&WorkerConfig::default(), sink.clone()).unwrap()
    }

    fn small_chunk_fetcher(sink: &LogSink, chunk: usize) -> Fetcher {
        let config = WorkerConfig {
            download_chunk_bytes: chunk,
            ..WorkerConfig::default()
        };
        Fetcher::new(&config, sink.clone()).unwrap()
    }

    #[test]
    fn test_download_writes_named_file() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET).path("/data/train.csv");
            then.status(200).body("a,b\n1,2\n");
        });
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();

        let outcome = small_chunk_fetcher(&sink, 3)
            .download(Some(&server.url("/data/train.csv?token=x")), dir.path())
            .unwrap();
        mock.assert();

        let FetchOutcome::Downloaded(file) = outcome else {
            panic!("expected a download");
        };
        assert_eq!(file.path, dir.path().join("train.csv"));
        assert_eq!(file.bytes, 8);
        assert_eq!(file.sha256, hex::encode(Sha256::digest(b"a,b\n1,2\n")));
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "a,b\n1,2\n");
        assert!(!dir.path().join("train.csv.part").exists());

        let info = sink.lines_at(LogLevel::Info);
        assert!(info[0].starts_with("Downloading train.csv to "));
        assert_eq!(info[1], "train.csv downloaded successfully.");
    }

    #[test]
    fn test_empty_url_warns_once() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();
        let fetcher = fetcher(&sink);

        assert_eq!(fetcher.download(None, dir.path()).unwrap(), FetchOutcome::Skipped);
        assert_eq!(sink.lines_at(LogLevel::Warning).len(), 1);

        assert_eq!(fetcher.download(Some("  "), dir.path()).unwrap(), FetchOutcome::Skipped);
        assert_eq!(
            sink.lines_at(LogLevel::Warning),
            vec!["Download URL not provided. Skipping.", "Download URL not provided. Skipping."]
        );
        assert!(sink.lines_at(LogLevel::Error).is_empty());
    }

    #[test]
    fn test_http_error_leaves_nothing_behind() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/missing.py");
            then.status(404);
        });
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();

        let err = fetcher(&sink)
            .download(Some(&server.url("/missing.py")), dir.path())
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));
        assert!(err.url().unwrap().ends_with("/missing.py"));
        assert!(!dir.path().join("missing.py").exists());
        assert!(!dir.path().join("missing.py.part").exists());
    }

    #[test]
    fn test_download_overwrites_existing_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/run.py");
            then.status(200).body("print('v2')\n");
        });
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("run.py"), "print('v1')\n").unwrap();

        let sink = LogSink::new();
        fetcher(&sink)
            .download(Some(&server.url("/run.py")), dir.path())
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("run.py")).unwrap(),
            "print('v2')\n"
        );
    }

    #[test]
    fn test_url_without_file_name() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();
        let err = fetcher(&sink)
            .download(Some("http://127.0.0.1:1/data/"), dir.path())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn test_unsupported_scheme() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();
        let err = fetcher(&sink)
            .download(Some("ftp://example.com/data.csv"), dir.path())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { ref reason, .. } if reason.contains("ftp")));
    }

    #[test]
    fn test_connection_refused_is_transport() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new();
        let err = fetcher(&sink)
            .download(Some("http://127.0.0.1:1/data.csv"), dir.path())
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[test]
    fn test_local_script_source() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("job.py");
        std::fs::write(&script, "print(1)\n").unwrap();
        let sink = LogSink::new();
        let fetcher = fetcher(&sink);

        let path = fetcher
            .fetch_script(&ScriptSource::Local(script.clone()), dir.path())
            .unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("job.py"));

        let missing = ScriptSource::Local(dir.path().join("nope.py"));
        let err = fetcher.fetch_script(&missing, dir.path()).unwrap_err();
        assert!(matches!(err, FetchError::LocalScriptMissing(_)));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/w/1/train.csv")),
            PathBuf::from("/w/1/train.csv.part")
        );
    }
}
