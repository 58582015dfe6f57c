//! Request routing across the content sources.
//!
//! A request is classified once into a [`RequestKind`] from its content type
//! and payload hints, then dispatched to the matching extractor. Results are
//! policy filtered and serialized to the report path.

use crate::config::Config;
use crate::definitions::ContentRegistry;
use crate::extractors::database::{DatabaseExtractor, ResourceConnector, SqliteConnector};
use crate::extractors::file::FileExtractor;
use crate::extractors::proxy::ProxyReportFetcher;
use crate::policy::PolicyFilter;
use crate::types::{ExtractionError, ExtractionResult, ENTRY_REPORT_PREFIX, SUMMARY_REPORT_PREFIX};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a request is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Entry report produced by a peer site
    Proxy { url: String },
    /// Entry report from the dataset's container file
    Entry,
    /// Summary report from relational resources at `site_id`
    Summary { site_id: String },
    Unrecognized,
}

impl RequestKind {
    /// Classify a request. A proxy URL only applies to entry reports; a
    /// query site only applies to summary reports.
    pub fn resolve(
        content_type: &str,
        proxy_url: Option<&str>,
        query_site: Option<&str>,
        default_site: &str,
    ) -> Self {
        let proxy_url = proxy_url.map(str::trim).filter(|u| !u.is_empty());
        let query_site = query_site.map(str::trim).filter(|s| !s.is_empty());

        if content_type.starts_with(ENTRY_REPORT_PREFIX) {
            match proxy_url {
                Some(url) => RequestKind::Proxy {
                    url: url.to_string(),
                },
                None => RequestKind::Entry,
            }
        } else if content_type.starts_with(SUMMARY_REPORT_PREFIX) {
            RequestKind::Summary {
                site_id: query_site.unwrap_or(default_site).to_string(),
            }
        } else {
            RequestKind::Unrecognized
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Proxy { .. } => "proxy",
            RequestKind::Entry => "entry",
            RequestKind::Summary { .. } => "summary",
            RequestKind::Unrecognized => "unrecognized",
        }
    }
}

/// What to produce and where
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub content_type: String,
    pub dataset_id: String,
    pub format_type: String,
    pub report_path: PathBuf,
    /// Container file for entry reports
    pub pdbx_file_path: Option<PathBuf>,
    /// Destination for reader diagnostics
    pub parser_log_path: PathBuf,
}

/// Owns the registry and extractors and dispatches requests to them
pub struct ContentRouter {
    config: Config,
    registry: Arc<ContentRegistry>,
    file_extractor: FileExtractor,
    db_extractor: DatabaseExtractor,
    policy: PolicyFilter,
    proxy: ProxyReportFetcher,
}

impl ContentRouter {
    /// Build a router with SQLite resources and the built-in policies
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ContentRegistry::from_config(&config.definitions));
        let connector: Arc<dyn ResourceConnector> = Arc::new(SqliteConnector::new(config.clone()));
        let proxy = ProxyReportFetcher::new(&config.proxy);
        Self::with_parts(config, registry, connector, PolicyFilter::new(), proxy)
    }

    pub fn with_parts(
        config: Config,
        registry: Arc<ContentRegistry>,
        connector: Arc<dyn ResourceConnector>,
        policy: PolicyFilter,
        proxy: ProxyReportFetcher,
    ) -> Self {
        info!(
            "Content router for site {} using definitions {:?}",
            config.site.site_id,
            registry.path()
        );
        Self {
            file_extractor: FileExtractor::new(Arc::clone(&registry)),
            db_extractor: DatabaseExtractor::new(
                Arc::clone(&registry),
                &config.site.site_id,
                connector,
            ),
            config,
            registry,
            policy,
            proxy,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ContentRegistry> {
        &self.registry
    }

    pub fn resolve(
        &self,
        content_type: &str,
        proxy_url: Option<&str>,
        query_site: Option<&str>,
    ) -> RequestKind {
        RequestKind::resolve(content_type, proxy_url, query_site, &self.config.site.site_id)
    }

    /// Produce the report for `request`. Returns true once a report has been
    /// written; never fails past this call.
    pub fn dispatch(&self, kind: &RequestKind, request: &ReportRequest) -> bool {
        let start = Instant::now();
        let ok = match kind {
            RequestKind::Proxy { url } => {
                debug!("Forwarding {} for {} to {}", request.content_type, request.dataset_id, url);
                self.proxy.retrieve_proxy_report(
                    &request.dataset_id,
                    url,
                    &request.content_type,
                    &request.format_type,
                    &request.report_path,
                )
            }
            RequestKind::Entry => self.dispatch_entry(request),
            RequestKind::Summary { site_id } => self.dispatch_summary(site_id, request),
            RequestKind::Unrecognized => {
                warn!("Unrecognized content type {:?}", request.content_type);
                false
            }
        };

        info!(
            "{} request {} for {} -> {:?}: {} ({:.2}s)",
            kind.as_str(),
            request.content_type,
            request.dataset_id,
            request.report_path,
            if ok { "ok" } else { "failed" },
            start.elapsed().as_secs_f64()
        );
        ok
    }

    fn dispatch_entry(&self, request: &ReportRequest) -> bool {
        if !self.file_extractor.is_known(&request.content_type) {
            warn!("No entry definition for {}", request.content_type);
            return false;
        }
        let Some(pdbx_path) = request.pdbx_file_path.as_deref() else {
            error!("Entry request {} has no container file", request.content_type);
            return false;
        };

        let result = self.file_extractor.extract_content(
            pdbx_path,
            &request.parser_log_path,
            &request.content_type,
        );
        let result = self.policy.filter_content(&request.content_type, result);
        self.write(&request.report_path, &result)
    }

    fn dispatch_summary(&self, site_id: &str, request: &ReportRequest) -> bool {
        let scoped;
        let extractor = if site_id == self.db_extractor.site_id() {
            &self.db_extractor
        } else {
            debug!("Querying resources of site {} from {}", site_id, self.config.site.site_id);
            scoped = self.db_extractor.for_site(site_id);
            &scoped
        };

        if !extractor.is_known(&request.content_type) {
            warn!("No summary definition for {}", request.content_type);
            return false;
        }

        let result = extractor.extract_content(&request.content_type);
        info!("Database content has {} categories", result.len());
        self.write(&request.report_path, &result)
    }

    fn write(&self, path: &Path, result: &ExtractionResult) -> bool {
        match write_report(path, result) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed writing report {:?}: {}", path, e);
                false
            }
        }
    }
}

/// Serialize a result as JSON to `path`
pub fn write_report(path: &Path, result: &ExtractionResult) -> Result<(), ExtractionError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, result)?;
    writer.flush()?;
    debug!("Wrote report {:?}", path);
    Ok(())
}
