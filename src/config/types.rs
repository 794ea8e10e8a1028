use crate::crawler::DownloadSettings;
use crate::fetch::{DomainType, Egress, LadderSettings, Tier, TierParams, TierTable};
use crate::state::{CrawlLimits, CrawlPolicy};
use crate::url::{LinkClassifier, ScopeMode, DEFAULT_DOCUMENT_EXTENSIONS};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Escalade
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub system: SystemConfig,
    pub provider: ProviderConfig,
    pub tiers: TiersConfig,
    pub downloader: DownloaderConfig,
    pub sufficiency: SufficiencyConfig,
    pub storage: StorageConfig,
}

/// Default budgets and policy applied to new crawl tasks
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum pages visited per task
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Maximum documents downloaded per task
    #[serde(rename = "max-documents")]
    pub max_documents: u32,

    /// Maximum discovery depth (seed is 0)
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Worker pool size, bounded by `system.worker-ceiling`
    #[serde(rename = "max-workers")]
    pub max_workers: u32,

    /// Delay between two dispatches of one worker (milliseconds)
    #[serde(rename = "request-delay-ms")]
    pub request_delay_ms: u64,

    /// Wall-clock budget of a task (seconds)
    #[serde(rename = "total-timeout-secs")]
    pub total_timeout_secs: u64,

    /// Timeout of one provider request (seconds)
    #[serde(rename = "page-timeout-secs")]
    pub page_timeout_secs: u64,

    /// Fetch errors tolerated before a task fails
    #[serde(rename = "max-fetch-errors")]
    pub max_fetch_errors: u32,

    /// Storage errors tolerated before a task fails
    #[serde(rename = "max-storage-errors")]
    pub max_storage_errors: u32,

    /// Use content that still failed the checker at the top tier
    #[serde(rename = "accept-degraded")]
    pub accept_degraded: bool,

    #[serde(rename = "scope")]
    pub scope: ScopeMode,

    /// Download documents hosted outside the seed origin
    #[serde(rename = "allow-offsite-documents")]
    pub allow_offsite_documents: bool,

    /// Sufficiency checker used for pages
    #[serde(rename = "domain-type")]
    pub domain_type: DomainType,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_documents: 20,
            max_depth: 3,
            max_workers: 4,
            request_delay_ms: 500,
            total_timeout_secs: 600,
            page_timeout_secs: 60,
            max_fetch_errors: 25,
            max_storage_errors: 3,
            accept_degraded: true,
            scope: ScopeMode::SameOrigin,
            allow_offsite_documents: false,
            domain_type: DomainType::Generic,
        }
    }
}

/// System-wide resource caps
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Upper bound on any task's worker pool
    #[serde(rename = "worker-ceiling")]
    pub worker_ceiling: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { worker_ceiling: 16 }
    }
}

/// Fetch provider connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Rendering API endpoint; without one targets are fetched directly
    #[serde(rename = "endpoint")]
    pub endpoint: Option<String>,

    #[serde(rename = "api-key")]
    pub api_key: String,

    /// Country/region hint for premium and stealth egress
    #[serde(rename = "country-code")]
    pub country_code: Option<String>,

    /// Extra attempts per tier after a transport failure
    #[serde(rename = "retries")]
    pub retries: u32,

    /// Delay before each retry (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: String::new(),
            country_code: None,
            retries: 2,
            retry_delay_ms: 1000,
            user_agent: format!("escalade/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Optional per-tier overrides, `[tiers.basic]` through `[tiers.stealth]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub basic: Option<TierOverride>,
    pub rendered: Option<TierOverride>,
    pub premium: Option<TierOverride>,
    pub stealth: Option<TierOverride>,
}

impl TiersConfig {
    pub fn get(&self, tier: Tier) -> Option<&TierOverride> {
        match tier {
            Tier::Basic => self.basic.as_ref(),
            Tier::Rendered => self.rendered.as_ref(),
            Tier::Premium => self.premium.as_ref(),
            Tier::Stealth => self.stealth.as_ref(),
        }
    }
}

/// Fields left unset keep the tier's default
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TierOverride {
    #[serde(rename = "render-js")]
    pub render_js: Option<bool>,

    #[serde(rename = "egress")]
    pub egress: Option<Egress>,

    #[serde(rename = "block-resources")]
    pub block_resources: Option<bool>,

    #[serde(rename = "block-ads")]
    pub block_ads: Option<bool>,

    #[serde(rename = "wait-ms")]
    pub wait_ms: Option<u64>,

    /// Credits charged per request
    #[serde(rename = "cost")]
    pub cost: Option<u32>,
}

impl TierOverride {
    /// Applies the set fields on top of `base`
    pub fn apply(&self, base: &TierParams) -> TierParams {
        TierParams {
            render_js: self.render_js.unwrap_or(base.render_js),
            egress: self.egress.unwrap_or(base.egress),
            block_resources: self.block_resources.unwrap_or(base.block_resources),
            block_ads: self.block_ads.unwrap_or(base.block_ads),
            wait_ms: self.wait_ms.unwrap_or(base.wait_ms),
            cost: self.cost.unwrap_or(base.cost),
        }
    }
}

/// Document validation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Smallest accepted document (bytes)
    #[serde(rename = "min-size")]
    pub min_size: u64,

    /// Largest accepted document (bytes)
    #[serde(rename = "max-size")]
    pub max_size: u64,

    /// Extensions treated as documents, without dots
    #[serde(rename = "allowed-extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            min_size: 1024,
            max_size: 100 * 1024 * 1024,
            allowed_extensions: DEFAULT_DOCUMENT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SufficiencyConfig {
    /// Overrides every checker's minimum visible text length
    #[serde(rename = "min-text-len")]
    pub min_text_len: Option<usize>,
}

/// Where tasks and documents are persisted
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory under which document blobs are written
    #[serde(rename = "blob-root")]
    pub blob_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./escalade.db".to_string(),
            blob_root: "./documents".to_string(),
        }
    }
}

impl Config {
    /// Per-tier request parameters with overrides applied
    pub fn tier_table(&self) -> TierTable {
        let mut table = TierTable::default();
        for tier in Tier::ALL {
            if let Some(overrides) = self.tiers.get(tier) {
                let params = overrides.apply(table.get(tier));
                table.set(tier, params);
            }
        }
        table
    }

    /// Ladder settings for a task whose requests time out after `request_timeout`
    pub fn ladder_settings(&self, request_timeout: Duration) -> LadderSettings {
        LadderSettings {
            retries: self.provider.retries,
            retry_delay: Duration::from_millis(self.provider.retry_delay_ms),
            request_timeout,
            country_code: self.provider.country_code.clone(),
            min_text_len: self.sufficiency.min_text_len,
        }
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            min_size: self.downloader.min_size,
            max_size: self.downloader.max_size,
            allowed_extensions: self.downloader.allowed_extensions.clone(),
        }
    }

    pub fn link_classifier(&self) -> LinkClassifier {
        LinkClassifier::new(self.downloader.allowed_extensions.iter())
    }

    /// Limits given to tasks created without explicit ones
    pub fn default_limits(&self) -> CrawlLimits {
        let crawl = &self.crawl;
        CrawlLimits {
            max_pages: crawl.max_pages,
            max_documents: crawl.max_documents,
            max_depth: crawl.max_depth,
            max_workers: crawl.max_workers,
            request_delay_ms: crawl.request_delay_ms,
            total_timeout_secs: crawl.total_timeout_secs,
            page_timeout_secs: crawl.page_timeout_secs,
        }
        .bounded(self.system.worker_ceiling)
    }

    pub fn default_policy(&self) -> CrawlPolicy {
        let crawl = &self.crawl;
        CrawlPolicy {
            domain_type: crawl.domain_type,
            accept_degraded: crawl.accept_degraded,
            scope: crawl.scope,
            allow_offsite_documents: crawl.allow_offsite_documents,
            max_fetch_errors: crawl.max_fetch_errors,
            max_storage_errors: crawl.max_storage_errors,
        }
    }
}
