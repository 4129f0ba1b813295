//! Plugin reconciliation.
//!
//! The installation's plugin directory is converged to the requested set:
//! missing plugins are installed, unrequested ones removed, strictly
//! sequentially since every invocation shares the plugin manager executable
//! and the installation directory.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::artifact::ArtifactCache;
use crate::config::PluginRequest;
use crate::error::{Error, Result};
use crate::install::Installation;
use crate::version::VersionBehavior;

/// Converge the installed plugin set to `requested`.
pub(crate) async fn reconcile(
    installation: &Installation,
    requested: &[PluginRequest],
    behavior: &VersionBehavior,
    cache: &ArtifactCache,
) -> Result<()> {
    let installed = installed_plugins(installation)?;

    for request in to_install(requested, &installed) {
        install_plugin(installation, request, behavior, cache).await?;
    }
    for name in to_remove(requested, &installed) {
        remove_plugin(installation, &name, behavior).await?;
    }
    Ok(())
}

/// Requested plugins not yet present, in request order.
fn to_install<'a>(
    requested: &'a [PluginRequest],
    installed: &BTreeSet<String>,
) -> Vec<&'a PluginRequest> {
    requested
        .iter()
        .filter(|request| !installed.contains(&request.plugin_name()))
        .collect()
}

/// Installed plugins nobody asked for.
fn to_remove(requested: &[PluginRequest], installed: &BTreeSet<String>) -> Vec<String> {
    let requested_names: BTreeSet<String> =
        requested.iter().map(|request| request.plugin_name()).collect();
    installed
        .iter()
        .filter(|name| !requested_names.contains(*name))
        .cloned()
        .collect()
}

/// Names of the plugins currently present, read from the plugin directory.
fn installed_plugins(installation: &Installation) -> Result<BTreeSet<String>> {
    let plugins_dir = installation.plugins_dir();
    if !plugins_dir.exists() {
        return Ok(BTreeSet::new());
    }
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(&plugins_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

async fn install_plugin(
    installation: &Installation,
    request: &PluginRequest,
    behavior: &VersionBehavior,
    cache: &ArtifactCache,
) -> Result<()> {
    let plugin_name = request.plugin_name();
    let expression = resolve_expression(request, cache).await?;
    info!("installing plugin {plugin_name} ({expression})");

    let mut command = Command::new(installation.plugin_manager());
    if behavior.plugin_install_flag_syntax {
        command.args(["--install", &expression]);
    } else {
        command.args(["install", &expression]);
    }
    run_plugin_manager(command, &plugin_name).await
}

async fn remove_plugin(
    installation: &Installation,
    name: &str,
    behavior: &VersionBehavior,
) -> Result<()> {
    info!("removing plugin {name}");
    let mut command = Command::new(installation.plugin_manager());
    command.args(["remove", name]);
    if behavior.plugin_remove_purge {
        command.arg("--purge");
    }
    run_plugin_manager(command, name).await
}

/// URL-form plugin expressions go through the artifact cache, so parallel
/// test runs download each plugin archive once; everything else is handed
/// to the plugin manager untouched.
async fn resolve_expression(request: &PluginRequest, cache: &ArtifactCache) -> Result<String> {
    if let Ok(url) = Url::parse(request.expression()) {
        if matches!(url.scheme(), "http" | "https") {
            let local = cache
                .fetch(&crate::config::ArtifactLocation::Remote(url))
                .await?;
            let file_url = Url::from_file_path(&local).map_err(|_| {
                Error::Config(format!(
                    "plugin archive path is not absolute: {}",
                    local.display()
                ))
            })?;
            return Ok(file_url.to_string());
        }
    }
    Ok(request.expression().to_string())
}

/// Run one plugin manager invocation, streaming its merged output to the
/// log; a non-zero exit is fatal and names the offending plugin.
async fn run_plugin_manager(mut command: Command, plugin: &str) -> Result<()> {
    purge_scratch_directory().await;
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stdout = child.stdout.take().map(forward_output);
    let stderr = child.stderr.take().map(forward_output);
    let status = child.wait().await?;
    if let Some(task) = stdout {
        let _ = task.await;
    }
    if let Some(task) = stderr {
        let _ = task.await;
    }
    purge_scratch_directory().await;

    if !status.success() {
        return Err(Error::PluginManager {
            plugin: plugin.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

fn forward_output<R>(reader: R) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "esbox::plugin", "{line}");
        }
    })
}

/// The server recreates a fixed-name scratch directory in the OS temp dir
/// on every launch and fails if it already exists, so it is deleted around
/// every child process we spawn.
pub(crate) async fn purge_scratch_directory() {
    let scratch = scratch_directory();
    match tokio::fs::remove_dir_all(&scratch).await {
        Ok(()) => debug!("removed scratch directory {}", scratch.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("could not remove scratch directory {}: {e}", scratch.display()),
    }
}

fn scratch_directory() -> PathBuf {
    std::env::temp_dir().join("elasticsearch")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::version::Version;

    fn requests(names: &[&str]) -> Vec<PluginRequest> {
        names.iter().map(|name| PluginRequest::new(*name)).collect()
    }

    fn installed(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn installs_missing_and_removes_unrequested() {
        let requested = requests(&["analysis-a", "analysis-b"]);
        let present = installed(&["analysis-b", "analysis-c"]);

        let install: Vec<String> = to_install(&requested, &present)
            .iter()
            .map(|request| request.plugin_name())
            .collect();
        assert_eq!(install, vec!["analysis-a"]);
        assert_eq!(to_remove(&requested, &present), vec!["analysis-c"]);
    }

    #[test]
    fn converged_set_is_untouched() {
        let requested = requests(&["analysis-a", "analysis-b"]);
        let present = installed(&["analysis-a", "analysis-b"]);
        assert!(to_install(&requested, &present).is_empty());
        assert!(to_remove(&requested, &present).is_empty());
    }

    #[test]
    fn url_requests_match_installed_directory_names() {
        let requested = vec![PluginRequest::new(
            "https://example.com/elasticsearch-analysis-icu-6.8.0.zip",
        )];
        let present = installed(&["analysis-icu"]);
        assert!(to_install(&requested, &present).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reconciliation_invokes_the_plugin_manager() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("elasticsearch-6.8.0");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::create_dir_all(root.join("plugins/analysis-b")).unwrap();
        std::fs::create_dir_all(root.join("plugins/analysis-c")).unwrap();

        let log = dir.path().join("invocations.log");
        let manager = root.join("bin/elasticsearch-plugin");
        std::fs::write(
            &manager,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&manager, std::fs::Permissions::from_mode(0o755)).unwrap();

        let behavior = VersionBehavior::for_version(&Version::new(6, 8, 0)).unwrap();
        let installation = Installation::new(root, behavior);
        let cache = ArtifactCache::new(
            dir.path().join("downloads"),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
            None,
        )
        .unwrap();

        let requested = requests(&["analysis-a", "analysis-b"]);
        reconcile(&installation, &requested, behavior, &cache)
            .await
            .unwrap();

        let invocations = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = invocations.lines().collect();
        assert_eq!(lines, vec!["install analysis-a", "remove analysis-c --purge"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_plugin_manager_is_fatal_and_names_the_plugin() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("elasticsearch-6.8.0");
        std::fs::create_dir_all(root.join("bin")).unwrap();

        let manager = root.join("bin/elasticsearch-plugin");
        std::fs::write(&manager, "#!/bin/sh\necho 'no such plugin' >&2\nexit 74\n").unwrap();
        std::fs::set_permissions(&manager, std::fs::Permissions::from_mode(0o755)).unwrap();

        let behavior = VersionBehavior::for_version(&Version::new(6, 8, 0)).unwrap();
        let installation = Installation::new(root, behavior);
        let cache = ArtifactCache::new(
            dir.path().join("downloads"),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
            None,
        )
        .unwrap();

        let requested = requests(&["analysis-missing"]);
        let result = reconcile(&installation, &requested, behavior, &cache).await;
        match result {
            Err(Error::PluginManager { plugin, .. }) => assert_eq!(plugin, "analysis-missing"),
            other => panic!("expected plugin manager error, got {other:?}"),
        }
    }
}
