//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use updraft_bridge::ProgressSnapshot;
use url::Url;

use crate::{Artifact, EngineError, InstallMode, InstallReport, ProgressSink, ReleaseInfo, UpdateEngine};

/// Read size for artifacts served from the local filesystem.
pub const LOCAL_CHUNK_SIZE: usize = 64 * 1024;

/// With an unknown total, report progress after this many bytes.
const UNKNOWN_TOTAL_REPORT_STEP: u64 = 1024 * 1024;

/// Where the release feed lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    /// JSON file on disk.
    File(PathBuf),
    /// JSON document served over http(s).
    Http(Url),
}

impl FeedSource {
    /// Interpret a configured feed location.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw).map_err(|err| EngineError::MalformedFeed {
                feed: raw.to_owned(),
                reason: err.to_string(),
            })?;
            return Ok(FeedSource::Http(url));
        }
        if let Some(stripped) = raw.strip_prefix("file://") {
            return Ok(FeedSource::File(PathBuf::from(stripped)));
        }
        Ok(FeedSource::File(PathBuf::from(raw)))
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::File(path) => write!(f, "{}", path.display()),
            FeedSource::Http(url) => write!(f, "{url}"),
        }
    }
}

/// Release feed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFeed {
    /// Published releases in any order.
    #[serde(default)]
    pub releases: Vec<FeedRelease>,
}

/// One release entry of the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRelease {
    /// SemVer string, optionally prefixed with `v`.
    pub version: String,
    /// Release notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Artifact location; relative paths resolve against the feed.
    pub url: String,
    /// Expected SHA-256, hex.
    #[serde(default)]
    pub sha256: Option<String>,
    /// Expected size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Publication timestamp.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedRelease {
    fn semver(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

/// Pick the release to offer.
///
/// Without `allow_downgrade` only versions strictly greater than `current`
/// qualify; with it any version other than `current` does. The highest
/// qualifying version wins. Entries with unparsable versions are skipped.
pub fn select_release(
    releases: Vec<FeedRelease>,
    current: &Version,
    allow_downgrade: bool,
) -> Option<ReleaseInfo> {
    releases
        .into_iter()
        .filter_map(|entry| match entry.semver() {
            Some(version) => Some((version, entry)),
            None => {
                warn!(version = %entry.version, "skipping feed entry with invalid version");
                None
            }
        })
        .filter(|(version, _)| {
            if allow_downgrade {
                version != current
            } else {
                version > current
            }
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(version, entry)| ReleaseInfo {
            version,
            notes: entry.notes,
            url: entry.url,
            sha256: entry.sha256.map(|s| s.to_ascii_lowercase()),
            size: entry.size,
            published_at: entry.published_at,
        })
}

/// Settings for [`FeedEngine`].
#[derive(Debug, Clone)]
pub struct FeedEngineSettings {
    /// Feed location.
    pub source: FeedSource,
    /// Directory receiving downloaded artifacts.
    pub cache_dir: PathBuf,
    /// Executable replaced on install.
    pub install_target: PathBuf,
    /// Offer releases older than the running one.
    pub allow_downgrade: bool,
}

enum ArtifactLocation {
    Local(PathBuf),
    Remote(Url),
}

/// Engine backed by a JSON release feed.
#[derive(Debug, Clone)]
pub struct FeedEngine {
    settings: FeedEngineSettings,
    client: reqwest::Client,
}

impl FeedEngine {
    /// Build the engine and its HTTP client.
    pub fn new(settings: FeedEngineSettings) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("updraft/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| EngineError::FeedUnreachable {
                feed: settings.source.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { settings, client })
    }

    /// Active settings.
    pub fn settings(&self) -> &FeedEngineSettings {
        &self.settings
    }

    /// Fetch and parse the feed document.
    pub async fn load_feed(&self) -> Result<UpdateFeed, EngineError> {
        let feed = self.settings.source.to_string();
        let raw = match &self.settings.source {
            FeedSource::File(path) => fs::read_to_string(path).await.map_err(|err| {
                EngineError::FeedUnreachable {
                    feed: feed.clone(),
                    reason: err.to_string(),
                }
            })?,
            FeedSource::Http(url) => {
                let unreachable = |err: reqwest::Error| EngineError::FeedUnreachable {
                    feed: feed.clone(),
                    reason: err.to_string(),
                };
                self.client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(unreachable)?
                    .text()
                    .await
                    .map_err(unreachable)?
            }
        };
        serde_json::from_str(&raw).map_err(|err| EngineError::MalformedFeed {
            feed,
            reason: err.to_string(),
        })
    }

    fn resolve_artifact(&self, url: &str) -> Result<ArtifactLocation, EngineError> {
        if let Ok(parsed) = Url::parse(url) {
            match parsed.scheme() {
                "http" | "https" => return Ok(ArtifactLocation::Remote(parsed)),
                "file" => {
                    let path = parsed.to_file_path().map_err(|_| {
                        EngineError::Transfer(format!("invalid file url {url}"))
                    })?;
                    return Ok(ArtifactLocation::Local(path));
                }
                _ => {}
            }
        }
        match &self.settings.source {
            FeedSource::File(feed_path) => {
                let base = feed_path.parent().unwrap_or_else(|| Path::new("."));
                Ok(ArtifactLocation::Local(base.join(url)))
            }
            FeedSource::Http(base) => base
                .join(url)
                .map(ArtifactLocation::Remote)
                .map_err(|err| EngineError::Transfer(format!("invalid artifact url {url}: {err}"))),
        }
    }

    fn artifact_path(&self, release: &ReleaseInfo) -> PathBuf {
        let name = release
            .url
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or("artifact");
        self.settings
            .cache_dir
            .join(format!("{}-{}", release.version, name))
    }

    async fn transfer(
        &self,
        release: &ReleaseInfo,
        partial: &Path,
        progress: &ProgressSink,
    ) -> Result<(u64, String), EngineError> {
        let location = self.resolve_artifact(&release.url)?;
        let file = fs::File::create(partial).await?;
        match location {
            ArtifactLocation::Local(path) => {
                debug!(source = %path.display(), "copying local artifact");
                let mut source = fs::File::open(&path).await.map_err(|err| {
                    EngineError::Transfer(format!("{}: {err}", path.display()))
                })?;
                let total = release
                    .size
                    .unwrap_or(source.metadata().await.map(|m| m.len()).unwrap_or(0));
                let mut writer = TransferWriter::new(file, total, progress.clone());
                let mut buf = vec![0u8; LOCAL_CHUNK_SIZE];
                loop {
                    let read = source.read(&mut buf).await?;
                    if read == 0 {
                        break;
                    }
                    writer.push(&buf[..read]).await?;
                }
                writer.finish().await
            }
            ArtifactLocation::Remote(url) => {
                debug!(source = %url, "downloading artifact");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|err| EngineError::Transfer(err.to_string()))?;
                let total = release
                    .size
                    .or(response.content_length())
                    .unwrap_or(0);
                let mut writer = TransferWriter::new(file, total, progress.clone());
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|err| EngineError::Transfer(err.to_string()))?;
                    writer.push(&chunk).await?;
                }
                writer.finish().await
            }
        }
    }
}

struct TransferWriter {
    file: fs::File,
    hasher: Sha256,
    total: u64,
    transferred: u64,
    started: Instant,
    last_percent: Option<u8>,
    last_step: u64,
    sink: ProgressSink,
}

impl TransferWriter {
    fn new(file: fs::File, total: u64, sink: ProgressSink) -> Self {
        Self {
            file,
            hasher: Sha256::new(),
            total,
            transferred: 0,
            started: Instant::now(),
            last_percent: None,
            last_step: 0,
            sink,
        }
    }

    async fn push(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.transferred += chunk.len() as u64;
        let snapshot = self.snapshot();
        if self.total > 0 {
            if self.last_percent != Some(snapshot.percent) {
                self.last_percent = Some(snapshot.percent);
                self.sink.report(snapshot);
            }
        } else if self.transferred / UNKNOWN_TOTAL_REPORT_STEP > self.last_step {
            self.last_step = self.transferred / UNKNOWN_TOTAL_REPORT_STEP;
            self.sink.report(snapshot);
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<(u64, String), EngineError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        if self.last_percent != Some(100) {
            self.sink.report(self.snapshot().with_percent(100));
        }
        Ok((self.transferred, hex::encode(self.hasher.finalize())))
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (self.transferred as f64 / elapsed) as u64
        } else {
            0
        };
        ProgressSnapshot::from_counts(self.transferred, self.total, rate)
    }
}

fn verify(release: &ReleaseInfo, size: u64, digest: &str) -> Result<(), EngineError> {
    if let Some(expected) = release.size {
        if expected != size {
            return Err(EngineError::Verification(format!(
                "expected {expected} bytes, received {size}"
            )));
        }
    }
    match &release.sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(digest) => {
            Err(EngineError::Verification(format!(
                "sha256 mismatch: expected {expected}, computed {digest}"
            )))
        }
        Some(_) => Ok(()),
        None => {
            warn!(version = %release.version, "release carries no checksum; skipping digest check");
            Ok(())
        }
    }
}

#[async_trait]
impl UpdateEngine for FeedEngine {
    fn name(&self) -> &'static str {
        "feed"
    }

    async fn check(&self, current: &Version) -> Result<Option<ReleaseInfo>, EngineError> {
        let feed = self.load_feed().await?;
        let total = feed.releases.len();
        let selected = select_release(feed.releases, current, self.settings.allow_downgrade);
        debug!(
            feed = %self.settings.source,
            releases = total,
            current = %current,
            selected = ?selected.as_ref().map(|r| r.version.to_string()),
            "feed inspected"
        );
        Ok(selected)
    }

    async fn download(
        &self,
        release: &ReleaseInfo,
        progress: ProgressSink,
    ) -> Result<Artifact, EngineError> {
        fs::create_dir_all(&self.settings.cache_dir).await?;
        let target = self.artifact_path(release);
        let partial = PathBuf::from(format!("{}.part", target.display()));

        let outcome = match self.transfer(release, &partial, &progress).await {
            Ok((size, digest)) => verify(release, size, &digest).map(|()| (size, digest)),
            Err(err) => Err(err),
        };
        let (size, sha256) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "partial artifact already gone");
                }
                return Err(err);
            }
        };
        fs::rename(&partial, &target).await?;
        info!(
            version = %release.version,
            path = %target.display(),
            bytes = size,
            "artifact downloaded and verified"
        );
        Ok(Artifact {
            version: release.version.clone(),
            path: target,
            size,
            sha256,
        })
    }

    async fn install(
        &self,
        artifact: &Artifact,
        mode: InstallMode,
    ) -> Result<InstallReport, EngineError> {
        let target = self.settings.install_target.clone();
        swap_binary(&artifact.path, &target).await?;
        info!(
            version = %artifact.version,
            target = %target.display(),
            mode = %mode,
            "update installed"
        );
        Ok(InstallReport {
            version: artifact.version.clone(),
            target,
            mode,
            restart_required: mode == InstallMode::RestartNow,
        })
    }
}

/// Replace `target` with `artifact`, keeping a `.bak` copy until the swap lands.
async fn swap_binary(artifact: &Path, target: &Path) -> Result<(), EngineError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::InstallFailed {
            path: target.to_path_buf(),
            reason: "install target has no file name".to_owned(),
        })?;
    let staged = dir.join(format!(".{name}.updraft-staged"));
    let backup = dir.join(format!("{name}.bak"));

    fs::copy(artifact, &staged)
        .await
        .map_err(|err| EngineError::from_install_io(&staged, err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|err| EngineError::from_install_io(&staged, err))?;
    }

    let had_target = fs::try_exists(target).await.unwrap_or(false);
    if had_target {
        if let Err(err) = fs::rename(target, &backup).await {
            let _ = fs::remove_file(&staged).await;
            return Err(EngineError::from_install_io(target, err));
        }
    }

    if let Err(err) = fs::rename(&staged, target).await {
        if had_target {
            if let Err(restore) = fs::rename(&backup, target).await {
                warn!(target = %target.display(), error = %restore, "rollback of install target failed");
            }
        }
        let _ = fs::remove_file(&staged).await;
        return Err(EngineError::from_install_io(target, err));
    }

    if had_target {
        if let Err(err) = fs::remove_file(&backup).await {
            debug!(path = %backup.display(), error = %err, "backup left in place");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str) -> FeedRelease {
        FeedRelease {
            version: version.to_owned(),
            notes: None,
            url: format!("app-{version}.bin"),
            sha256: None,
            size: None,
            published_at: None,
        }
    }

    #[test]
    fn selects_highest_newer_release() {
        let current = Version::new(1, 9, 0);
        let releases = vec![entry("1.8.0"), entry("v2.1.0"), entry("2.0.0"), entry("garbage")];
        let picked = select_release(releases, &current, false).expect("newer release");
        assert_eq!(picked.version, Version::new(2, 1, 0));
    }

    #[test]
    fn never_offers_older_or_equal_without_downgrade() {
        let current = Version::new(2, 0, 0);
        let releases = vec![entry("1.8.0"), entry("2.0.0")];
        assert!(select_release(releases.clone(), &current, false).is_none());
        let picked = select_release(releases, &current, true).expect("downgrade allowed");
        assert_eq!(picked.version, Version::new(1, 8, 0));
    }

    #[test]
    fn feed_source_parsing() {
        assert!(matches!(
            FeedSource::parse("https://updates.example.com/feed.json"),
            Ok(FeedSource::Http(_))
        ));
        assert_eq!(
            FeedSource::parse("configs/update_feed.json").ok(),
            Some(FeedSource::File(PathBuf::from("configs/update_feed.json")))
        );
    }

    #[test]
    fn verification_rejects_size_and_digest_mismatch() {
        let mut release = ReleaseInfo::new(Version::new(2, 0, 0));
        release.size = Some(10);
        assert!(matches!(
            verify(&release, 9, "00"),
            Err(EngineError::Verification(_))
        ));
        release.size = None;
        release.sha256 = Some("ab".into());
        assert!(verify(&release, 9, "AB").is_ok());
        assert!(verify(&release, 9, "cd").is_err());
    }
}
