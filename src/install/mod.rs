//! Installation of the server distribution.
//!
//! Resolves the archive through the artifact cache, extracts it into a
//! versioned directory, writes the instance configuration file and
//! converges the plugin set.

mod archive;
mod plugins;

pub(crate) use plugins::purge_scratch_directory;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::artifact::ArtifactCache;
use crate::config::InstallationConfig;
use crate::error::Result;
use crate::version::VersionBehavior;

/// Paths of one installed server distribution.
#[derive(Debug, Clone)]
pub struct Installation {
    root: PathBuf,
    behavior: &'static VersionBehavior,
}

impl Installation {
    pub(crate) fn new(root: PathBuf, behavior: &'static VersionBehavior) -> Self {
        Self { root, behavior }
    }

    /// The versioned installation directory,
    /// `<installDir>/elasticsearch-<version>`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The server executable under `bin/`.
    pub fn executable(&self) -> PathBuf {
        self.root.join("bin").join(with_script_extension("elasticsearch"))
    }

    /// The plugin manager executable under `bin/`; its name changed across
    /// server versions.
    pub fn plugin_manager(&self) -> PathBuf {
        self.root
            .join("bin")
            .join(with_script_extension(self.behavior.plugin_manager_executable))
    }

    /// The instance configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config").join("elasticsearch.yml")
    }

    /// The runtime data directory, purged on warm reuse.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// The plugin directory enumerated during reconciliation.
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }
}

fn with_script_extension(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.bat")
    } else {
        base.to_string()
    }
}

/// Installs one distribution according to an [`InstallationConfig`].
pub struct Installer<'a> {
    config: &'a InstallationConfig,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a InstallationConfig) -> Self {
        Self { config }
    }

    /// Acquire, extract and configure the distribution, then reconcile
    /// plugins. Returns the resulting installation layout.
    ///
    /// When clean-on-stop is off and a previous installation still has a
    /// working executable, extraction is skipped and only the runtime data
    /// directory is purged, which lets repeated test runs reuse a warm
    /// installation without re-downloading.
    pub async fn install(&self) -> Result<Installation> {
        let cache = ArtifactCache::from_config(self.config)?;
        let root = self
            .config
            .install_dir
            .join(format!("elasticsearch-{}", self.config.version));
        let installation = Installation::new(root, self.config.behavior);

        if self.reusable(&installation) {
            info!(
                "reusing existing installation at {}",
                installation.root().display()
            );
            remove_dir_if_present(&installation.data_dir()).await?;
        } else {
            let archive_path = cache.fetch(&self.config.artifact).await?;
            info!(
                "installing Elasticsearch {} into {}",
                self.config.version,
                installation.root().display()
            );
            remove_dir_if_present(installation.root()).await?;
            archive::extract_into(&archive_path, installation.root())?;
            apply_executable_permissions(&installation)?;
        }

        self.write_instance_settings(&installation).await?;
        plugins::reconcile(
            &installation,
            &self.config.plugins,
            self.config.behavior,
            &cache,
        )
        .await?;
        Ok(installation)
    }

    fn reusable(&self, installation: &Installation) -> bool {
        !self.config.clean_on_stop && installation.executable().is_file()
    }

    /// The settings file is rewritten on every install, including warm
    /// reuse, so setting changes between runs take effect.
    async fn write_instance_settings(&self, installation: &Installation) -> Result<()> {
        let config_file = installation.config_file();
        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let yaml = self.config.settings.to_yaml()?;
        tokio::fs::write(&config_file, yaml).await?;
        Ok(())
    }
}

pub(crate) async fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn apply_executable_permissions(installation: &Installation) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let bin_dir = installation.root().join("bin");
    if !bin_dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&bin_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_executable_permissions(_installation: &Installation) -> Result<()> {
    Ok(())
}
