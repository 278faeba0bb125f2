//! ---
//! upd_section: "00-shared"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Shared primitives and utilities for the update runtime."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use semver::Version;
use serde::Serialize;

const UNKNOWN: &str = "UNKNOWN";

/// Where [`VersionInfo::semver`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// The daemon crate's own package version.
    Package,
    /// `app.version` in the configuration, for a packaged host application.
    Config,
}

/// Running version plus the build metadata `vergen` captured.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Version compared against the release feed.
    pub semver: String,
    pub source: VersionSource,
    pub git_sha: String,
    pub build_timestamp: String,
    pub target: String,
    pub profile: String,
}

fn build_var(value: Option<&'static str>) -> String {
    value.unwrap_or(UNKNOWN).to_owned()
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            source: VersionSource::Package,
            git_sha: build_var(option_env!("VERGEN_GIT_SHA")),
            build_timestamp: build_var(option_env!("VERGEN_BUILD_TIMESTAMP")),
            target: build_var(option_env!("VERGEN_CARGO_TARGET_TRIPLE")),
            profile: build_var(option_env!("VERGEN_CARGO_PROFILE")),
        }
    }

    /// Report the host application's release number instead of the crate's.
    #[must_use]
    pub fn with_semver(mut self, semver: impl Into<String>) -> Self {
        self.semver = semver.into();
        self.source = VersionSource::Config;
        self
    }

    /// Parsed running version, as the controller compares it.
    pub fn running_version(&self) -> Result<Version, semver::Error> {
        Version::parse(self.semver.trim())
    }

    #[must_use]
    pub fn banner(&self) -> String {
        format!("Updraft v{} (git {})", self.semver, self.git_sha)
    }

    /// Multi-line text for `--version`.
    #[must_use]
    pub fn extended(&self) -> String {
        let source = match self.source {
            VersionSource::Package => "package",
            VersionSource::Config => "config",
        };
        format!(
            "{banner}\nVersion source: {source}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}
