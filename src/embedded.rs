//! Caller-facing facade: configure, start, use, stop.
//!
//! ```no_run
//! use esbox::{EmbeddedElastic, IndexDescriptor};
//!
//! # async fn example() -> esbox::Result<()> {
//! let elastic = EmbeddedElastic::builder()
//!     .with_elastic_version("6.8.0")
//!     .with_setting("cluster.name", "test-cluster")
//!     .with_index(IndexDescriptor::new("docs"))
//!     .start()
//!     .await?;
//!
//! elastic.client().bulk_index(&[/* ... */]).await?;
//! elastic.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Ownership of the running instance carries the cleanup obligation: `stop`
//! shuts the process down on the happy path, and dropping the handle kills
//! the child process as a last resort, so an aborted test run does not leak
//! a server.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::client::{ElasticClient, IndexDescriptor, IndexRequest, TemplateDescriptor};
use crate::config::{
    InstallationConfig, InstallationSource, InstanceSettings, JavaHomeOption, PluginRequest,
};
use crate::error::{Error, Result};
use crate::install::Installer;
use crate::server::ElasticServer;

/// Configures and boots an embedded server instance.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedElasticBuilder {
    version: Option<String>,
    download_url: Option<String>,
    local_archive: Option<PathBuf>,
    settings: InstanceSettings,
    plugins: Vec<PluginRequest>,
    indices: Vec<IndexDescriptor>,
    templates: Vec<TemplateDescriptor>,
    install_dir: Option<PathBuf>,
    download_dir: Option<PathBuf>,
    clean_on_stop: bool,
    start_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    proxy: Option<url::Url>,
    java_home: JavaHomeOption,
    es_java_opts: Option<String>,
}

impl EmbeddedElasticBuilder {
    /// Install the distribution for a released version, e.g. `"6.8.0"` or
    /// `"oss-7.9.2"`. Mutually exclusive with the other two sources.
    pub fn with_elastic_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Install from a direct download URL. Mutually exclusive with the
    /// other two sources.
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    /// Install from a distribution archive already on disk. Mutually
    /// exclusive with the other two sources.
    pub fn with_local_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_archive = Some(path.into());
        self
    }

    /// Add one `elasticsearch.yml` setting.
    pub fn with_setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_yaml::Value>,
    ) -> Self {
        self.settings = self.settings.with_setting(key, value);
        self
    }

    /// Request a plugin by name, `owner/name[/version]` expression or URL.
    pub fn with_plugin(mut self, expression: impl Into<String>) -> Self {
        self.plugins.push(PluginRequest::new(expression));
        self
    }

    /// Declare an index created (if absent) right after startup.
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indices.push(index);
        self
    }

    /// Declare a template created (if absent) right after startup.
    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.push(TemplateDescriptor::new(name, body));
        self
    }

    pub fn with_installation_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    pub fn with_download_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Wipe the whole installation directory when the instance stops.
    pub fn with_clean_installation_directory_on_stop(mut self, clean: bool) -> Self {
        self.clean_on_stop = clean;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn with_downloader_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = Some(connect);
        self.read_timeout = Some(read);
        self
    }

    pub fn with_download_proxy(mut self, proxy: url::Url) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_java_home(mut self, java_home: JavaHomeOption) -> Self {
        self.java_home = java_home;
        self
    }

    /// Value for the `ES_JAVA_OPTS` environment variable, e.g.
    /// `"-Xms128m -Xmx512m"`.
    pub fn with_es_java_opts(mut self, opts: impl Into<String>) -> Self {
        self.es_java_opts = Some(opts.into());
        self
    }

    /// Resolve the configuration without any I/O. Exposed for callers that
    /// drive [`Installer`] and [`ElasticServer`] themselves.
    pub fn build_config(&self) -> Result<InstallationConfig> {
        let source = match (&self.version, &self.download_url, &self.local_archive) {
            (Some(version), None, None) => InstallationSource::Version(version.clone()),
            (None, Some(url), None) => InstallationSource::DownloadUrl(url.clone()),
            (None, None, Some(path)) => InstallationSource::LocalArchive(path.clone()),
            (None, None, None) => {
                return Err(Error::Config(
                    "an installation source is required: version, download URL, or local archive"
                        .into(),
                ))
            }
            _ => {
                return Err(Error::Config(
                    "version, download URL and local archive are mutually exclusive; pick one"
                        .into(),
                ))
            }
        };
        let mut config = InstallationConfig::from_source(source)?;
        config.plugins = self.plugins.clone();
        config.settings = self.settings.clone();
        config.clean_on_stop = self.clean_on_stop;
        config.java_home = self.java_home.clone();
        config.es_java_opts = self.es_java_opts.clone();
        config.proxy = self.proxy.clone();
        if let Some(dir) = &self.install_dir {
            config.install_dir = dir.clone();
        }
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        if let Some(timeout) = self.start_timeout {
            config.start_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.read_timeout {
            config.read_timeout = timeout;
        }
        Ok(config)
    }

    /// Download, install, start and provision the instance, blocking until
    /// it is ready to serve requests.
    pub async fn start(self) -> Result<EmbeddedElastic> {
        let config = self.build_config()?;
        let installation = Installer::new(&config).install().await?;
        let mut server = ElasticServer::new(installation, &config);
        server.start().await?;

        let Some(http_port) = server.http_port() else {
            let _ = server.stop().await;
            return Err(Error::UnexpectedResponse(
                "server reported started but published no HTTP address".into(),
            ));
        };
        let client = ElasticClient::new(http_port);

        let elastic = EmbeddedElastic {
            server,
            client,
            indices: self.indices,
            templates: self.templates,
        };
        match elastic.provision().await {
            Ok(()) => Ok(elastic),
            Err(e) => {
                let _ = elastic.stop().await;
                Err(e)
            }
        }
    }
}

/// A running embedded instance.
///
/// Obtained from [`EmbeddedElastic::builder`]; stop it with
/// [`EmbeddedElastic::stop`]. Dropping the handle without stopping kills
/// the server process without the graceful shutdown or cleanup steps.
pub struct EmbeddedElastic {
    server: ElasticServer,
    client: ElasticClient,
    indices: Vec<IndexDescriptor>,
    templates: Vec<TemplateDescriptor>,
}

impl EmbeddedElastic {
    pub fn builder() -> EmbeddedElasticBuilder {
        EmbeddedElasticBuilder::default()
    }

    /// Create the declared templates and indices, then load any declared
    /// documents.
    async fn provision(&self) -> Result<()> {
        for template in &self.templates {
            self.client
                .create_template_if_absent(&template.name, &template.body)
                .await?;
        }
        for index in &self.indices {
            self.create_declared_index(index).await?;
        }
        Ok(())
    }

    async fn create_declared_index(&self, index: &IndexDescriptor) -> Result<()> {
        self.client
            .create_index_if_absent(&index.name, index.settings_json.as_deref())
            .await?;
        if !index.documents.is_empty() {
            let requests: Vec<IndexRequest> = index
                .documents
                .iter()
                .map(|document| IndexRequest::from_document(&index.name, document))
                .collect();
            self.client.bulk_index(&requests).await?;
        }
        Ok(())
    }

    /// The control client for index, template, document and search calls.
    pub fn client(&self) -> &ElasticClient {
        &self.client
    }

    /// HTTP API port discovered from the server logs.
    pub fn http_port(&self) -> Option<u16> {
        self.server.http_port()
    }

    /// Transport port discovered from the server logs.
    pub fn transport_port(&self) -> Option<u16> {
        self.server.transport_port()
    }

    /// Delete and re-create one declared index, reloading its declared
    /// documents. The index must have been declared on the builder.
    pub async fn recreate_index(&self, name: &str) -> Result<()> {
        let index = self
            .indices
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| Error::Config(format!("index '{name}' was not declared")))?;
        self.client.delete_index_if_present(name).await?;
        self.create_declared_index(index).await
    }

    /// Delete and re-create every declared index.
    pub async fn recreate_indices(&self) -> Result<()> {
        for index in &self.indices {
            self.client.delete_index_if_present(&index.name).await?;
            self.create_declared_index(index).await?;
        }
        Ok(())
    }

    /// Gracefully stop the server, consuming the handle.
    pub async fn stop(mut self) -> Result<()> {
        info!("stopping embedded server");
        self.server.stop().await
    }
}
