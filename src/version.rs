//! Version parsing and version-conditional server behavior.
//!
//! Elasticsearch changed its download URL layout, plugin manager CLI and
//! bulk-request metadata across major releases. Rather than branching at
//! each call site, the differences are collected into a [`VersionBehavior`]
//! selected once from an ordered version-range table.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed `major.minor.patch` server version.
///
/// Pre-release suffixes are tolerated and ignored for ordering, so
/// `7.0.0-beta1` compares equal to `7.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Strip a pre-release/build suffix such as "-beta1" or "+build42"
        let numeric = s.split(['-', '+']).next().unwrap_or(s);
        let mut parts = numeric.split('.');
        let mut next = |what: &str| -> Result<u32> {
            parts
                .next()
                .unwrap_or("0")
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("unparseable {what} in version '{s}'")))
        };
        let major = next("major component")?;
        let minor = next("minor component")?;
        let patch = next("patch component")?;
        Ok(Self::new(major, minor, patch))
    }
}

/// Behavior that varies with the server version.
#[derive(Debug, Clone, Copy)]
pub struct VersionBehavior {
    /// Download URL template; `{VERSION}` is replaced by the (possibly
    /// `oss-`-prefixed) version string
    pub download_url_template: &'static str,
    /// Whether the archive file name carries a `-<os>-x86_64` platform suffix
    pub platform_suffixed_archive: bool,
    /// Base name of the plugin manager executable under `bin/`
    pub plugin_manager_executable: &'static str,
    /// Install expressed as `--install <expr>` instead of `install <expr>`
    pub plugin_install_flag_syntax: bool,
    /// `remove` requires `--purge` to also drop plugin config files
    pub plugin_remove_purge: bool,
    /// Metadata key naming the routing value in bulk actions
    pub bulk_routing_key: &'static str,
}

/// Ordered `(minimum version, behavior)` table, newest first. The first
/// entry whose minimum is not above the resolved version wins.
const BEHAVIOR_TABLE: &[(Version, VersionBehavior)] = &[
    (
        Version::new(7, 0, 0),
        VersionBehavior {
            download_url_template:
                "https://artifacts.elastic.co/downloads/elasticsearch/elasticsearch-{VERSION}",
            platform_suffixed_archive: true,
            plugin_manager_executable: "elasticsearch-plugin",
            plugin_install_flag_syntax: false,
            plugin_remove_purge: true,
            bulk_routing_key: "routing",
        },
    ),
    (
        Version::new(6, 4, 0),
        VersionBehavior {
            download_url_template:
                "https://artifacts.elastic.co/downloads/elasticsearch/elasticsearch-{VERSION}.tar.gz",
            platform_suffixed_archive: false,
            plugin_manager_executable: "elasticsearch-plugin",
            plugin_install_flag_syntax: false,
            plugin_remove_purge: true,
            bulk_routing_key: "_routing",
        },
    ),
    (
        Version::new(5, 0, 0),
        VersionBehavior {
            download_url_template:
                "https://artifacts.elastic.co/downloads/elasticsearch/elasticsearch-{VERSION}.tar.gz",
            platform_suffixed_archive: false,
            plugin_manager_executable: "elasticsearch-plugin",
            plugin_install_flag_syntax: false,
            plugin_remove_purge: false,
            bulk_routing_key: "_routing",
        },
    ),
    (
        Version::new(2, 0, 0),
        VersionBehavior {
            download_url_template:
                "https://download.elasticsearch.org/elasticsearch/release/org/elasticsearch/distribution/tar/elasticsearch/{BARE_VERSION}/elasticsearch-{VERSION}.tar.gz",
            platform_suffixed_archive: false,
            plugin_manager_executable: "plugin",
            plugin_install_flag_syntax: false,
            plugin_remove_purge: false,
            bulk_routing_key: "_routing",
        },
    ),
    (
        Version::new(1, 0, 0),
        VersionBehavior {
            download_url_template:
                "https://download.elastic.co/elasticsearch/elasticsearch/elasticsearch-{VERSION}.tar.gz",
            platform_suffixed_archive: false,
            plugin_manager_executable: "plugin",
            plugin_install_flag_syntax: true,
            plugin_remove_purge: false,
            bulk_routing_key: "_routing",
        },
    ),
];

impl VersionBehavior {
    /// Look up the behavior for a resolved server version.
    pub fn for_version(version: &Version) -> Result<&'static VersionBehavior> {
        BEHAVIOR_TABLE
            .iter()
            .find(|(min, _)| version >= min)
            .map(|(_, behavior)| behavior)
            .ok_or_else(|| Error::Config(format!("unsupported server version: {version}")))
    }

    /// Build the download URL for `version`, honoring the `oss-` flavor.
    pub fn download_url(&self, version: &Version, oss_flavor: bool) -> String {
        let version_to_use = if oss_flavor {
            format!("oss-{version}")
        } else {
            version.to_string()
        };
        let mut file_version = version_to_use.clone();
        if self.platform_suffixed_archive {
            file_version = format!("{file_version}-{}-x86_64.tar.gz", platform_name());
        }
        self.download_url_template
            .replace("{BARE_VERSION}", &version.to_string())
            .replace("{VERSION}", &file_version)
    }
}

fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "windows",
        _ => "linux",
    }
}
