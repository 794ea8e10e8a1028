//! Fetch module: the tier ladder and its provider abstraction
//!
//! Pages are fetched through an external provider at increasing cost:
//!
//! 1. `basic` - no rendering, standard egress
//! 2. `rendered` - JavaScript rendering, standard egress
//! 3. `premium` - rendering through premium egress
//! 4. `stealth` - rendering through stealth egress
//!
//! A page stops climbing as soon as its content passes the sufficiency
//! checker for the task's domain type. Every attempt is accounted in
//! `UsageStats`.

mod ladder;
mod provider;
mod sufficiency;
mod tier;
mod usage;

#[cfg(test)]
pub(crate) mod test_support;

pub use ladder::{FetchError, FetchedPage, LadderSettings, TierLadder};
pub use provider::{
    build_http_client, ApiFetchProvider, DirectFetchProvider, FetchProvider, ProviderError,
    ProviderRequest, ProviderResponse,
};
pub use sufficiency::{ContentChecker, DomainType, InsufficientReason};
pub use tier::{Egress, Tier, TierParams, TierTable};
pub use usage::{FetchAttempt, TierUsage, UsageSnapshot, UsageStats};
