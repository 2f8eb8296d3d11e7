//! Direct HTTP downloads of audio files.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::config::DirectSettings;
use crate::error::FetchError;
use crate::layout::{exists_nonempty, make_readable};

/// Blocking HTTP client for direct-URL sources.
pub struct DirectClient {
    client: reqwest::blocking::Client,
}

impl DirectClient {
    pub fn new(settings: &DirectSettings) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest`. Returns the number of bytes written.
    ///
    /// The body goes to a temp file in the destination directory that is
    /// renamed into place only once complete.
    pub fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let total_size = response.content_length();

        let mut tmp_file = tempfile::NamedTempFile::new_in(dir)?;
        let mut downloaded: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = response.read(&mut buf)?;
            if n == 0 {
                break;
            }
            tmp_file.write_all(&buf[..n])?;
            downloaded += n as u64;
        }

        if let Some(expected) = total_size {
            if downloaded != expected {
                return Err(FetchError::Incomplete {
                    got: downloaded,
                    expected,
                });
            }
        }
        if downloaded == 0 {
            return Err(FetchError::MissingOutput(dest.to_path_buf()));
        }

        tmp_file.flush()?;
        make_readable(tmp_file.path())?;
        tmp_file.persist(dest).map_err(|e| FetchError::Io(e.error))?;
        Ok(downloaded)
    }
}

/// Download `url` to `dest` unless a non-empty file is already there.
///
/// Never fails loudly: errors are logged and reported as `false`, with any
/// leftover partial file removed.
pub fn fetch_direct(client: &DirectClient, url: &str, dest: &Path) -> bool {
    if exists_nonempty(dest) {
        log::info!("Already downloaded: {}", dest.display());
        return true;
    }

    log::info!("Downloading {}", url);
    match client.download(url, dest) {
        Ok(bytes) => {
            log::info!(
                "Saved {} ({:.1} MB)",
                dest.display(),
                bytes as f64 / 1_048_576.0
            );
            true
        }
        Err(e) => {
            log::warn!("Download failed for {}: {}", url, e);
            if dest.exists() && !exists_nonempty(dest) {
                std::fs::remove_file(dest).ok();
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scroll_audio_direct_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn client() -> DirectClient {
        DirectClient::new(&DirectSettings {
            timeout_secs: 5,
            ..DirectSettings::default()
        })
        .unwrap()
    }

    /// Serve exactly one HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let header = format!(
                    "HTTP/1.1 {}\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{}/audio.mp3", addr)
    }

    #[test]
    fn test_fetch_direct_writes_body() {
        let dir = temp_dir("ok");
        let dest = dir.join("nested").join("ambient.mp3");
        let url = serve_once("200 OK", b"ID3 fake mp3 payload".to_vec());

        assert!(fetch_direct(&client(), &url, &dest));
        assert_eq!(std::fs::read(&dest).unwrap(), b"ID3 fake mp3 payload");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fetch_direct_http_error() {
        let dir = temp_dir("404");
        let dest = dir.join("missing.mp3");
        let url = serve_once("404 Not Found", b"nope".to_vec());

        assert!(!fetch_direct(&client(), &url, &dest));
        assert!(!dest.exists());
        // Nothing but the (absent) destination may be left behind
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_download_reports_status() {
        let dir = temp_dir("status");
        let url = serve_once("503 Service Unavailable", vec![]);
        let err = client().download(&url, &dir.join("x.mp3")).unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fetch_direct_unreachable() {
        let dir = temp_dir("unreachable");
        let dest = dir.join("ambient.mp3");
        assert!(!fetch_direct(&client(), "http://127.0.0.1:1/audio.mp3", &dest));
        assert!(!dest.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fetch_direct_skips_existing() {
        let dir = temp_dir("existing");
        let dest = dir.join("ambient.mp3");
        std::fs::write(&dest, b"cached").unwrap();

        // Unreachable URL proves no request is made
        assert!(fetch_direct(&client(), "http://127.0.0.1:1/audio.mp3", &dest));
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fetch_direct_replaces_empty_file() {
        let dir = temp_dir("empty");
        let dest = dir.join("ambient.mp3");
        std::fs::write(&dest, b"").unwrap();
        let url = serve_once("200 OK", b"fresh".to_vec());

        assert!(fetch_direct(&client(), &url, &dest));
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");

        std::fs::remove_dir_all(&dir).ok();
    }
}
