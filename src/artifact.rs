//! Artifact acquisition with cross-process concurrency safety.
//!
//! Downloads are coordinated across independent test processes sharing one
//! download directory, without a kernel-level lock: a finished download is
//! marked by a zero-byte `<name>.done` file, and a target file without a
//! marker is judged in-flight or abandoned by how recently its modification
//! time moved. The heuristic breaks down on filesystems without reliable
//! mtimes or on links slow enough to stall past the recency window; sharing
//! a download directory across machines is unsupported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;

use crate::config::{ArtifactLocation, InstallationConfig};
use crate::error::{Error, Result};

/// A file whose mtime moved within this window is assumed to be written to
/// by another thread or process.
const RECENCY_WINDOW: Duration = Duration::from_secs(10);
/// One slice of waiting for another party's completion marker.
const WAIT_SLICE: Duration = Duration::from_secs(30);
/// How often the completion marker is polled within a slice.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Suffix of the zero-byte marker written next to a finished download.
const COMPLETED_SUFFIX: &str = ".done";

/// Fetches distribution archives into a shared download directory.
///
/// `fetch` is idempotent and safe to call concurrently from independent
/// processes; parallel test runs sharing a download directory are the
/// documented use case.
pub struct ArtifactCache {
    download_dir: PathBuf,
    client: reqwest::Client,
    recency_window: Duration,
    wait_slice: Duration,
}

impl ArtifactCache {
    pub fn new(
        download_dir: impl Into<PathBuf>,
        connect_timeout: Duration,
        read_timeout: Duration,
        proxy: Option<&Url>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        Ok(Self {
            download_dir: download_dir.into(),
            client: builder.build()?,
            recency_window: RECENCY_WINDOW,
            wait_slice: WAIT_SLICE,
        })
    }

    pub fn from_config(config: &InstallationConfig) -> Result<Self> {
        Self::new(
            &config.download_dir,
            config.connect_timeout,
            config.read_timeout,
            config.proxy.as_ref(),
        )
    }

    /// Fetch `location` into the download directory and return the local
    /// archive path.
    ///
    /// Repeated calls are cache hits; concurrent calls for the same target
    /// resolve to a single download via the marker/recency protocol.
    pub async fn fetch(&self, location: &ArtifactLocation) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let target = self.download_dir.join(local_file_name(location));
        let marker = completion_marker(&target);

        self.remove_broken_download(&target, &marker).await?;

        if !target.exists() {
            self.acquire(location, &target).await?;
            tokio::fs::File::create(&marker).await?;
        } else if !marker.exists() && self.recently_changed(&target) {
            self.wait_for_other_party(&target, &marker).await?;
        } else if !marker.exists() {
            return Err(Error::BrokenDownload { path: target });
        } else {
            info!("download skipped, {} already cached", target.display());
        }
        Ok(target)
    }

    /// A target without a marker whose mtime stopped moving is a leftover
    /// from a crashed download and gets deleted.
    async fn remove_broken_download(&self, target: &Path, marker: &Path) -> Result<()> {
        if target.exists() && !marker.exists() && !self.recently_changed(target) {
            info!("removing broken download file {}", target.display());
            tokio::fs::remove_file(target).await?;
        }
        Ok(())
    }

    fn recently_changed(&self, target: &Path) -> bool {
        std::fs::metadata(target)
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|elapsed| elapsed < self.recency_window)
    }

    async fn acquire(&self, location: &ArtifactLocation, target: &Path) -> Result<()> {
        match location {
            ArtifactLocation::Remote(url) => self.download(url, target).await,
            ArtifactLocation::Local(source) => {
                info!(
                    "copying {} to {} ...",
                    source.display(),
                    target.display()
                );
                tokio::fs::copy(source, target).await?;
                Ok(())
            }
        }
    }

    /// Stream the response body to disk chunk by chunk, so the target's
    /// mtime keeps moving while the download is alive. Any failure leaves
    /// the partial file behind for a later call to clean up.
    async fn download(&self, url: &Url, target: &Path) -> Result<()> {
        info!("downloading {} to {} ...", url, target.display());
        let download_error = |message: String| Error::Download {
            url: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        info!("download complete");
        Ok(())
    }

    /// Another fetch is presumed in flight. Poll for its completion marker
    /// in bounded slices; once the target stops changing with the marker
    /// still missing, the other party is assumed dead.
    async fn wait_for_other_party(&self, target: &Path, marker: &Path) -> Result<()> {
        loop {
            let size = std::fs::metadata(target).map(|m| m.len()).unwrap_or(0);
            info!(
                "file {} (size={size}) is probably being downloaded by another thread or process, waiting ...",
                target.display()
            );
            if wait_for_file(marker, self.wait_slice).await {
                info!("file was downloaded by another party, download skipped");
                return Ok(());
            }
            if !self.recently_changed(target) {
                return Err(Error::DownloadAbandoned {
                    path: target.to_path_buf(),
                });
            }
        }
    }
}

/// Poll for `path` to appear, for at most `patience`.
async fn wait_for_file(path: &Path, patience: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + patience;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    path.exists()
}

fn completion_marker(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(COMPLETED_SUFFIX);
    target.with_file_name(name)
}

/// Local file name for a source: the URL path basename, or a random name
/// when the source has no usable path component.
fn local_file_name(location: &ArtifactLocation) -> String {
    let name = match location {
        ArtifactLocation::Remote(url) => url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or("")
            .to_string(),
        ArtifactLocation::Local(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    if name.is_empty() {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache_for(dir: &TempDir) -> ArtifactCache {
        ArtifactCache::new(
            dir.path(),
            Duration::from_secs(1),
            Duration::from_secs(5),
            None,
        )
        .unwrap()
    }

    fn remote(server_uri: &str, file: &str) -> ArtifactLocation {
        ArtifactLocation::Remote(Url::parse(&format!("{server_uri}/{file}")).unwrap())
    }

    #[tokio::test]
    async fn downloads_and_creates_completion_marker() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elasticsearch-6.8.0.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&dir);
        let fetched = cache
            .fetch(&remote(&server.uri(), "elasticsearch-6.8.0.tar.gz"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&fetched).unwrap(), b"archive-bytes");
        assert!(completion_marker(&fetched).exists());
    }

    #[tokio::test]
    async fn cache_hit_performs_no_network_calls() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let target = dir.path().join("elasticsearch-6.8.0.tar.gz");
        std::fs::write(&target, b"cached").unwrap();
        std::fs::File::create(completion_marker(&target)).unwrap();

        let cache = cache_for(&dir);
        let fetched = cache
            .fetch(&remote(&server.uri(), "elasticsearch-6.8.0.tar.gz"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn stale_partial_download_is_deleted_and_refetched() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elasticsearch-6.8.0.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let target = dir.path().join("elasticsearch-6.8.0.tar.gz");
        std::fs::write(&target, b"partial-garbage").unwrap();

        let mut cache = cache_for(&dir);
        cache.recency_window = Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(120)).await;

        let fetched = cache
            .fetch(&remote(&server.uri(), "elasticsearch-6.8.0.tar.gz"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"fresh");
        assert!(completion_marker(&fetched).exists());
    }

    #[tokio::test]
    async fn waits_for_concurrent_download_to_finish() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let target = dir.path().join("elasticsearch-6.8.0.tar.gz");
        std::fs::write(&target, b"in-progress").unwrap();
        let marker = completion_marker(&target);

        // Simulated other downloader: keeps the target fresh, then marks done
        let writer_target = target.clone();
        let writer_marker = marker.clone();
        let writer = tokio::spawn(async move {
            for round in 0..5u8 {
                std::fs::write(&writer_target, format!("chunk-{round}")).unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            std::fs::File::create(&writer_marker).unwrap();
        });

        let mut cache = cache_for(&dir);
        cache.recency_window = Duration::from_millis(400);
        let fetched = cache
            .fetch(&remote(&server.uri(), "elasticsearch-6.8.0.tar.gz"))
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(fetched, target);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn abandoned_download_is_reported() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let target = dir.path().join("elasticsearch-6.8.0.tar.gz");
        std::fs::write(&target, b"stuck").unwrap();

        let mut cache = cache_for(&dir);
        // Freshly written, so it looks in-flight; one short slice later the
        // mtime is stale and the other party is assumed dead
        cache.recency_window = Duration::from_millis(300);
        cache.wait_slice = Duration::from_millis(400);

        let result = cache
            .fetch(&remote(&server.uri(), "elasticsearch-6.8.0.tar.gz"))
            .await;
        assert!(matches!(result, Err(Error::DownloadAbandoned { .. })));
    }

    #[tokio::test]
    async fn copies_local_archives_through_the_same_protocol() {
        let dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("elasticsearch-5.6.16.tar.gz");
        std::fs::write(&source, b"local-bytes").unwrap();

        let cache = cache_for(&dir);
        let fetched = cache
            .fetch(&ArtifactLocation::Local(source))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"local-bytes");
        assert!(completion_marker(&fetched).exists());
        assert_eq!(fetched.parent().unwrap(), dir.path());
    }

    #[test]
    fn nameless_urls_get_a_random_file_name() {
        let location = ArtifactLocation::Remote(Url::parse("https://example.com").unwrap());
        let name = local_file_name(&location);
        assert_eq!(name.len(), 10);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
