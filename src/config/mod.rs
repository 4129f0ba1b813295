//! Configuration for esbox.
//!
//! Everything here is resolved once, before any I/O, and owned immutably by
//! the session that built it. Mutually-exclusive-source violations and
//! unparseable versions surface as [`Error::Config`](crate::Error::Config)
//! at build time.

mod java_home;
mod settings;
mod source;

pub use java_home::JavaHomeOption;
pub use settings::InstanceSettings;
pub use source::{ArtifactLocation, InstallationSource};

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::version::{Version, VersionBehavior};

/// Default wait for the server to reach the started state.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);
/// Default connect timeout for artifact downloads.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default read timeout for artifact downloads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// A plugin to install, expressed the way the server's plugin manager
/// accepts it: a bare name, `owner/name[/version]`, or a direct URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    expression: String,
}

impl PluginRequest {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    /// The raw expression handed to the plugin manager.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Canonical plugin name, used to check the request against the set of
    /// already-installed plugins. For URL expressions the archive base name
    /// is stripped of its version suffix; `owner/name[/version]` expressions
    /// reduce to the name component.
    pub fn plugin_name(&self) -> String {
        let base = if self.expression_is_url() {
            let base = self
                .expression
                .rsplit('/')
                .next()
                .unwrap_or(&self.expression)
                .trim_end_matches(".zip")
                .trim_end_matches(".tar.gz");
            strip_version_suffix(base)
        } else if self.expression.contains('/') {
            let mut parts = self.expression.split('/');
            parts.nth(1).unwrap_or(&self.expression)
        } else {
            &self.expression
        };
        base.strip_prefix("elasticsearch-").unwrap_or(base).to_string()
    }

    fn expression_is_url(&self) -> bool {
        self.expression.starts_with("http")
    }
}

/// Cut a trailing `-<digit>...` version suffix off an archive base name.
fn strip_version_suffix(name: &str) -> &str {
    for (idx, _) in name.match_indices('-') {
        if name[idx + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
        {
            return &name[..idx];
        }
    }
    name
}

/// Immutable, fully-resolved description of one installation.
#[derive(Debug, Clone)]
pub struct InstallationConfig {
    /// Resolved server version
    pub version: Version,
    /// Whether the `oss-` distribution flavor was requested
    pub oss_flavor: bool,
    /// Where the distribution archive comes from
    pub artifact: ArtifactLocation,
    /// Version-conditional behavior, selected once at resolution time
    pub behavior: &'static VersionBehavior,
    /// Plugins the installation must converge to, in request order
    pub plugins: Vec<PluginRequest>,
    /// Directory the versioned installation lives under
    pub install_dir: PathBuf,
    /// Directory downloaded archives are cached in (shareable across
    /// independent test processes)
    pub download_dir: PathBuf,
    /// Remove the whole installation directory on stop
    pub clean_on_stop: bool,
    /// How long `start` waits for the readiness log line
    pub start_timeout: Duration,
    /// Downloader connect timeout
    pub connect_timeout: Duration,
    /// Downloader read timeout
    pub read_timeout: Duration,
    /// Optional HTTP proxy for downloads
    pub proxy: Option<url::Url>,
    /// JAVA_HOME policy for the spawned server process
    pub java_home: JavaHomeOption,
    /// Value for the ES_JAVA_OPTS environment variable, if any
    pub es_java_opts: Option<String>,
    /// Settings written verbatim into the server's configuration file
    pub settings: InstanceSettings,
}

impl InstallationConfig {
    /// Resolve a configuration from an installation source, with defaults
    /// for everything else.
    pub fn from_source(source: InstallationSource) -> Result<Self> {
        let resolved = source.resolve()?;
        let behavior = VersionBehavior::for_version(&resolved.version)?;
        let base_dir = std::env::temp_dir().join("esbox");
        Ok(Self {
            version: resolved.version,
            oss_flavor: resolved.oss_flavor,
            artifact: resolved.location,
            behavior,
            plugins: Vec::new(),
            install_dir: base_dir.clone(),
            download_dir: base_dir.join("downloads"),
            clean_on_stop: false,
            start_timeout: DEFAULT_START_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            proxy: None,
            java_home: JavaHomeOption::UseSystem,
            es_java_opts: None,
            settings: InstanceSettings::new(),
        })
    }
}
