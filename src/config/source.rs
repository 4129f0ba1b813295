//! Resolution of the installation source.
//!
//! Exactly one of version, download URL, or local archive may be given.
//! Resolving yields both a version and an artifact location: from a version
//! the URL is derived from the version-range table, and from a URL or local
//! archive the version is extracted from the archive file name.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::version::{Version, VersionBehavior};

/// Where the distribution archive is acquired from.
#[derive(Debug, Clone)]
pub enum ArtifactLocation {
    /// Download from a URL
    Remote(Url),
    /// Copy from a file already on disk
    Local(PathBuf),
}

/// Caller-facing source selection, prior to resolution.
#[derive(Debug, Clone)]
pub enum InstallationSource {
    /// A plain version such as `"6.8.0"`, or `"oss-7.9.2"` for the
    /// `oss-` distribution flavor
    Version(String),
    /// A direct download URL; the version is parsed from the file name
    DownloadUrl(String),
    /// A distribution archive already on disk; the version is parsed from
    /// the file name
    LocalArchive(PathBuf),
}

/// Outcome of resolving an [`InstallationSource`].
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub version: Version,
    pub oss_flavor: bool,
    pub location: ArtifactLocation,
}

impl InstallationSource {
    pub fn resolve(&self) -> Result<ResolvedSource> {
        match self {
            Self::Version(requested) => {
                let oss_flavor = requested.starts_with("oss-");
                let bare = requested.strip_prefix("oss-").unwrap_or(requested);
                let version: Version = bare.parse()?;
                let behavior = VersionBehavior::for_version(&version)?;
                let url = behavior.download_url(&version, oss_flavor);
                let url = Url::parse(&url)
                    .map_err(|e| Error::Config(format!("derived invalid download URL: {e}")))?;
                Ok(ResolvedSource {
                    version,
                    oss_flavor,
                    location: ArtifactLocation::Remote(url),
                })
            }
            Self::DownloadUrl(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| Error::Config(format!("invalid download URL '{raw}': {e}")))?;
                require_tar_gz(raw)?;
                let version = version_from_archive_name(raw)?;
                Ok(ResolvedSource {
                    version,
                    oss_flavor: false,
                    location: ArtifactLocation::Remote(url),
                })
            }
            Self::LocalArchive(path) => {
                let name = path.to_string_lossy();
                require_tar_gz(&name)?;
                let version = version_from_archive_name(&name)?;
                Ok(ResolvedSource {
                    version,
                    oss_flavor: false,
                    location: ArtifactLocation::Local(path.clone()),
                })
            }
        }
    }
}

/// Only gzipped tarballs can be extracted.
fn require_tar_gz(name: &str) -> Result<()> {
    if name.ends_with(".zip") {
        return Err(Error::Config(format!(
            "'{name}' is a zip archive; only .tar.gz distributions are supported"
        )));
    }
    Ok(())
}

/// Pull the version out of an archive name such as
/// `elasticsearch-6.8.0.tar.gz` or `elasticsearch-7.17.0-linux-x86_64.tar.gz`.
fn version_from_archive_name(name: &str) -> Result<Version> {
    static VERSION_IN_NAME: OnceLock<Regex> = OnceLock::new();
    let pattern = VERSION_IN_NAME.get_or_init(|| {
        Regex::new(r"-([^/]*?)(-(windows|linux|darwin)-x86_64)?\.(zip|tar\.gz)$")
            .expect("version pattern is valid")
    });
    let captured = pattern
        .captures(name)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| {
            Error::Config(format!(
                "cannot find version in '{name}'; expected an archive named like \
                 anyArchiveName-versionInAnyFormat.tar.gz, e.g. \
                 elasticsearch-6.8.0.tar.gz"
            ))
        })?;
    captured.as_str().parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_version_source() {
        let resolved = InstallationSource::Version("6.8.0".into()).resolve().unwrap();
        assert_eq!(resolved.version, Version::new(6, 8, 0));
        assert!(!resolved.oss_flavor);
        match resolved.location {
            ArtifactLocation::Remote(url) => {
                assert_eq!(
                    url.as_str(),
                    "https://artifacts.elastic.co/downloads/elasticsearch/elasticsearch-6.8.0.tar.gz"
                );
            }
            other => panic!("expected remote location, got {other:?}"),
        }
    }

    #[test]
    fn resolves_oss_flavor() {
        let resolved = InstallationSource::Version("oss-6.8.0".into())
            .resolve()
            .unwrap();
        assert_eq!(resolved.version, Version::new(6, 8, 0));
        assert!(resolved.oss_flavor);
    }

    #[test]
    fn extracts_version_from_url() {
        let resolved = InstallationSource::DownloadUrl(
            "https://example.com/myDistributionOfElasticWithChangedName-1.0.0.tar.gz".into(),
        )
        .resolve()
        .unwrap();
        assert_eq!(resolved.version, Version::new(1, 0, 0));
    }

    #[test]
    fn extracts_version_from_platform_suffixed_url() {
        let resolved = InstallationSource::DownloadUrl(
            "https://artifacts.elastic.co/downloads/elasticsearch/elasticsearch-7.17.0-linux-x86_64.tar.gz"
                .into(),
        )
        .resolve()
        .unwrap();
        assert_eq!(resolved.version, Version::new(7, 17, 0));
    }

    #[test]
    fn extracts_version_from_local_archive() {
        let resolved =
            InstallationSource::LocalArchive(PathBuf::from("/tmp/elasticsearch-5.6.16.tar.gz"))
                .resolve()
                .unwrap();
        assert_eq!(resolved.version, Version::new(5, 6, 16));
        assert!(matches!(resolved.location, ArtifactLocation::Local(_)));
    }

    #[test]
    fn rejects_url_without_version() {
        let result = InstallationSource::DownloadUrl("https://example.com/archive.tgz".into())
            .resolve();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zip_distributions() {
        let result = InstallationSource::DownloadUrl(
            "https://example.com/elasticsearch-6.8.0.zip".into(),
        )
        .resolve();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
