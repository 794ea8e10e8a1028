//! Tier ladder: escalating fetches over the external provider
//!
//! # Escalation Logic
//!
//! | Condition                         | Action                                   |
//! |-----------------------------------|------------------------------------------|
//! | 2xx, checker passes               | Return immediately                       |
//! | 2xx, checker rejects              | Keep as degraded, escalate               |
//! | HTTP 403 / 429                    | Escalate immediately, no retries         |
//! | Transport error, HTTP 408 / 5xx   | Retry same tier (fixed delay), then escalate |
//! | Other non-2xx (404, 410, ...)     | Fail immediately, no escalation          |
//! | Ladder exhausted with content     | `InsufficientContent` carrying the content |

use crate::fetch::provider::{FetchProvider, ProviderError, ProviderRequest, ProviderResponse};
use crate::fetch::sufficiency::{ContentChecker, DomainType, InsufficientReason};
use crate::fetch::tier::{Tier, TierParams, TierTable};
use crate::fetch::usage::{FetchAttempt, UsageStats};
use crate::state::ErrorKind;
use crate::{UrlError, UrlResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Retry and timeout settings shared by all tiers
#[derive(Debug, Clone)]
pub struct LadderSettings {
    /// Extra attempts at the same tier after a transport failure
    pub retries: u32,

    /// Fixed delay before each retry
    pub retry_delay: Duration,

    /// Bound on a single provider request
    pub request_timeout: Duration,

    /// Country/region hint forwarded to the provider
    pub country_code: Option<String>,

    /// Overrides the checkers' minimum visible text length
    pub min_text_len: Option<usize>,
}

impl Default for LadderSettings {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            country_code: None,
            min_text_len: None,
        }
    }
}

/// Content returned by a successful (or degraded) fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: Url,

    /// Tier whose response this is
    pub tier: Tier,

    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    fn from_response(url: &Url, tier: Tier, response: ProviderResponse) -> Self {
        Self {
            url: url.clone(),
            tier,
            status: response.status,
            content_type: response.content_type,
            body: response.body,
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Lowercased MIME essence of the declared content type
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
    }

    /// Returns true if the body is markup the sufficiency checkers understand
    ///
    /// Missing or generic content types (`text/plain`,
    /// `application/octet-stream`) fall back to sniffing the start of the body.
    pub fn is_markup(&self) -> bool {
        match self.mime().as_deref() {
            Some("text/html") | Some("application/xhtml+xml") => true,
            None | Some("text/plain") | Some("application/octet-stream") => {
                sniff_markup(&self.body)
            }
            Some(_) => false,
        }
    }
}

/// Looks for an HTML prologue in the first bytes of a body
fn sniff_markup(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<!doctype html") || head.contains("<html")
}

/// Errors produced by the tier ladder
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("transport failure at tier {tier}: {message}")]
    Transport { tier: Tier, message: String },

    #[error("blocked with HTTP {status} at tier {tier}")]
    Blocked { tier: Tier, status: u16 },

    #[error("insufficient content at tier {tier}: {reason}")]
    InsufficientContent {
        tier: Tier,
        reason: InsufficientReason,
        page: Box<FetchedPage>,
    },

    #[error("HTTP {status} at tier {tier}")]
    HttpStatus { tier: Tier, status: u16 },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::Transport { .. } => ErrorKind::FetchTransport,
            Self::Blocked { .. } => ErrorKind::FetchBlocked,
            Self::InsufficientContent { .. } => ErrorKind::FetchInsufficientContent,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
        }
    }
}

/// How a provider status code is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    Blocked,
    Transient,
    Definitive,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        403 | 429 => StatusClass::Blocked,
        408 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Definitive,
    }
}

/// Result of working one tier to completion
enum TierOutcome {
    Accepted(FetchedPage),
    Insufficient(FetchedPage, InsufficientReason),
    Blocked(u16),
    Transport(String),
    Definitive(u16),
}

/// Escalating fetcher shared by every worker of one task
pub struct TierLadder {
    provider: Arc<dyn FetchProvider>,
    tiers: TierTable,
    settings: LadderSettings,
    usage: Arc<UsageStats>,
}

impl TierLadder {
    pub fn new(provider: Arc<dyn FetchProvider>, tiers: TierTable, settings: LadderSettings) -> Self {
        Self {
            provider,
            tiers,
            settings,
            usage: Arc::new(UsageStats::new()),
        }
    }

    /// Usage counters fed by every attempt of this ladder
    pub fn usage(&self) -> Arc<UsageStats> {
        Arc::clone(&self.usage)
    }

    /// The sufficiency checker used for `domain_type`
    pub fn checker_for(&self, domain_type: DomainType) -> ContentChecker {
        let checker = ContentChecker::new(domain_type);
        match self.settings.min_text_len {
            Some(min) => checker.with_min_text_len(min),
            None => checker,
        }
    }

    /// Fetches a page, escalating until its content passes the checker
    ///
    /// Non-markup responses (e.g. a PDF behind an extensionless URL) are
    /// returned as soon as they arrive; they are not subject to the checker.
    pub async fn fetch_page(
        &self,
        url: &Url,
        domain_type: DomainType,
    ) -> Result<FetchedPage, FetchError> {
        validate_url(url)?;
        let checker = self.checker_for(domain_type);

        let mut degraded: Option<(FetchedPage, InsufficientReason)> = None;
        let mut last_error: Option<FetchError> = None;

        for tier in Tier::ALL {
            let params = self.tiers.get(tier).clone();
            match self.run_tier(url, tier, &params, Some(&checker)).await {
                TierOutcome::Accepted(page) => {
                    if tier != Tier::Basic {
                        tracing::debug!("{} accepted at tier {}", url, tier);
                    }
                    return Ok(page);
                }
                TierOutcome::Insufficient(page, reason) => {
                    tracing::debug!("{} insufficient at tier {}: {}", url, tier, reason);
                    degraded = Some((page, reason));
                }
                TierOutcome::Blocked(status) => {
                    tracing::debug!("{} blocked (HTTP {}) at tier {}", url, status, tier);
                    last_error = Some(FetchError::Blocked { tier, status });
                }
                TierOutcome::Transport(message) => {
                    tracing::debug!("{} transport failure at tier {}: {}", url, tier, message);
                    last_error = Some(FetchError::Transport { tier, message });
                }
                TierOutcome::Definitive(status) => {
                    return Err(FetchError::HttpStatus { tier, status });
                }
            }
        }

        if let Some((page, reason)) = degraded {
            return Err(FetchError::InsufficientContent {
                tier: page.tier,
                reason,
                page: Box::new(page),
            });
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transport {
            tier: Tier::Stealth,
            message: "no tier attempted".to_string(),
        }))
    }

    /// Fetches a binary payload with rendering switched off
    ///
    /// Egress is escalated only on blocking or transport failures. The
    /// rendered tier is skipped: without rendering it equals the basic tier.
    pub async fn fetch_binary(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        validate_url(url)?;
        let mut last_error: Option<FetchError> = None;

        for tier in [Tier::Basic, Tier::Premium, Tier::Stealth] {
            let params = self.tiers.get(tier).without_rendering();
            match self.run_tier(url, tier, &params, None).await {
                TierOutcome::Accepted(page) | TierOutcome::Insufficient(page, _) => {
                    return Ok(page)
                }
                TierOutcome::Blocked(status) => {
                    last_error = Some(FetchError::Blocked { tier, status });
                }
                TierOutcome::Transport(message) => {
                    last_error = Some(FetchError::Transport { tier, message });
                }
                TierOutcome::Definitive(status) => {
                    return Err(FetchError::HttpStatus { tier, status });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transport {
            tier: Tier::Stealth,
            message: "no tier attempted".to_string(),
        }))
    }

    /// Works one tier: retries transport failures, classifies the answer
    async fn run_tier(
        &self,
        url: &Url,
        tier: Tier,
        params: &TierParams,
        checker: Option<&ContentChecker>,
    ) -> TierOutcome {
        let request = ProviderRequest {
            url: url.clone(),
            tier,
            params: params.clone(),
            country_code: self.settings.country_code.clone(),
            timeout: self.settings.request_timeout,
        };

        let mut last_message = String::from("no attempt made");

        for attempt in 0..=self.settings.retries {
            if attempt > 0 {
                tokio::time::sleep(self.settings.retry_delay).await;
            }

            let started = Instant::now();
            let result =
                tokio::time::timeout(self.settings.request_timeout, self.provider.fetch(&request))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout));
            let elapsed = started.elapsed();

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    self.record(url, tier, params, None, 0, elapsed, Some(ErrorKind::FetchTransport));
                    tracing::debug!(
                        "{} attempt {} at tier {} failed: {}",
                        url,
                        attempt + 1,
                        tier,
                        e
                    );
                    last_message = e.to_string();
                    continue;
                }
            };

            let status = response.status;
            let length = response.body.len();

            match classify_status(status) {
                StatusClass::Transient => {
                    self.record(url, tier, params, Some(status), length, elapsed, Some(ErrorKind::FetchTransport));
                    last_message = format!("HTTP {}", status);
                }
                StatusClass::Blocked => {
                    self.record(url, tier, params, Some(status), length, elapsed, Some(ErrorKind::FetchBlocked));
                    return TierOutcome::Blocked(status);
                }
                StatusClass::Definitive => {
                    self.record(url, tier, params, Some(status), length, elapsed, Some(ErrorKind::HttpStatus));
                    return TierOutcome::Definitive(status);
                }
                StatusClass::Success => {
                    let page = FetchedPage::from_response(url, tier, response);
                    let verdict = match checker {
                        Some(checker) if page.is_markup() => checker.check(&page.text()),
                        _ => Ok(()),
                    };

                    return match verdict {
                        Ok(()) => {
                            self.record(url, tier, params, Some(status), length, elapsed, None);
                            TierOutcome::Accepted(page)
                        }
                        Err(reason) => {
                            self.record(
                                url,
                                tier,
                                params,
                                Some(status),
                                length,
                                elapsed,
                                Some(ErrorKind::FetchInsufficientContent),
                            );
                            TierOutcome::Insufficient(page, reason)
                        }
                    };
                }
            }
        }

        TierOutcome::Transport(last_message)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        url: &Url,
        tier: Tier,
        params: &TierParams,
        status: Option<u16>,
        content_length: usize,
        elapsed: Duration,
        error: Option<ErrorKind>,
    ) {
        self.usage.record(&FetchAttempt {
            url: url.clone(),
            tier,
            status,
            content_length,
            elapsed,
            success: error.is_none(),
            error,
            cost: params.cost,
        });
    }
}

fn validate_url(url: &Url) -> UrlResult<()> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }
    Ok(())
}
