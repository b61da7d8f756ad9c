//! Cache Strategy Policies
//!
//! Static table mapping each content type to a TTL, the tiers it may live in
//! and (for dedup-capable types) a similarity threshold.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use super::entry::ContentType;
use crate::domain::Tier;
use crate::error::{Error, Result};

const HOUR: u64 = 60 * 60;

/// Similarity threshold used for AI-backed content (85% token overlap)
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Caching strategy for one content type
#[derive(Debug, Clone, PartialEq)]
pub struct ContentTypePolicy {
    /// Content type this row applies to
    pub content_type: ContentType,
    /// Time-to-live for newly written entries
    pub ttl: Duration,
    /// Tiers the entry may be stored in (never empty)
    pub eligible_tiers: Vec<Tier>,
    /// Minimum token-overlap score for near-duplicate lookups
    pub similarity_threshold: Option<f64>,
}

impl ContentTypePolicy {
    /// Policy stored in every tier
    pub fn everywhere(content_type: ContentType, ttl: Duration) -> Self {
        Self {
            content_type,
            ttl,
            eligible_tiers: Tier::ALL.to_vec(),
            similarity_threshold: None,
        }
    }

    /// Policy confined to this device (memory + local)
    pub fn device_only(content_type: ContentType, ttl: Duration) -> Self {
        Self {
            content_type,
            ttl,
            eligible_tiers: vec![Tier::Memory, Tier::Local],
            similarity_threshold: None,
        }
    }

    /// Enable near-duplicate lookups for this policy
    pub fn with_similarity(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// Check if a tier may hold entries of this type
    #[inline]
    pub fn allows(&self, tier: Tier) -> bool {
        self.eligible_tiers.contains(&tier)
    }

    /// Check the row invariants
    pub fn validate(&self) -> Result<()> {
        if self.eligible_tiers.is_empty() {
            return Err(Error::Config(format!(
                "policy for {} has no eligible tiers",
                self.content_type
            )));
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "similarity threshold {} for {} is outside [0, 1]",
                    threshold, self.content_type
                )));
            }
        }
        Ok(())
    }
}

/// Resolves content types to caching policies
#[derive(Debug, Clone)]
pub struct CacheStrategyResolver {
    table: HashMap<ContentType, ContentTypePolicy>,
}

impl Default for CacheStrategyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStrategyResolver {
    /// Resolver populated with the standard table
    pub fn new() -> Self {
        let rows = [
            ContentTypePolicy::everywhere(ContentType::DailyNews, Duration::from_secs(6 * HOUR)),
            ContentTypePolicy::everywhere(
                ContentType::GlobalContent,
                Duration::from_secs(12 * HOUR),
            ),
            ContentTypePolicy::everywhere(ContentType::GameHelp, Duration::from_secs(24 * HOUR))
                .with_similarity(DEFAULT_SIMILARITY_THRESHOLD),
            ContentTypePolicy::everywhere(ContentType::AiResponse, Duration::from_secs(24 * HOUR))
                .with_similarity(DEFAULT_SIMILARITY_THRESHOLD),
            ContentTypePolicy::device_only(ContentType::Default, Duration::from_secs(24 * HOUR)),
        ];

        Self {
            table: rows.into_iter().map(|p| (p.content_type, p)).collect(),
        }
    }

    /// Replace the row for `policy.content_type`
    pub fn with_override(mut self, policy: ContentTypePolicy) -> Result<Self> {
        policy.validate()?;
        self.table.insert(policy.content_type, policy);
        Ok(self)
    }

    /// Resolve the policy for a content type
    pub fn resolve(&self, content_type: ContentType) -> ContentTypePolicy {
        match self.table.get(&content_type) {
            Some(policy) => policy.clone(),
            None => self.default_policy(),
        }
    }

    /// Resolve a raw content-type tag, falling back to the default policy
    pub fn resolve_name(&self, tag: &str) -> ContentTypePolicy {
        match tag.parse::<ContentType>() {
            Ok(content_type) => self.resolve(content_type),
            Err(e) => {
                debug!(error = %e, "Falling back to default cache policy");
                self.default_policy()
            }
        }
    }

    /// The conservative fallback row
    pub fn default_policy(&self) -> ContentTypePolicy {
        self.table
            .get(&ContentType::Default)
            .cloned()
            .unwrap_or_else(|| {
                ContentTypePolicy::device_only(ContentType::Default, Duration::from_secs(HOUR))
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let resolver = CacheStrategyResolver::new();

        let news = resolver.resolve(ContentType::DailyNews);
        assert_eq!(news.ttl, Duration::from_secs(6 * HOUR));
        assert_eq!(news.eligible_tiers, Tier::ALL.to_vec());

        let global = resolver.resolve(ContentType::GlobalContent);
        assert_eq!(global.ttl, Duration::from_secs(12 * HOUR));

        let help = resolver.resolve(ContentType::GameHelp);
        assert_eq!(help.ttl, Duration::from_secs(24 * HOUR));
        assert_eq!(help.similarity_threshold, Some(0.85));

        let default = resolver.resolve(ContentType::Default);
        assert!(!default.allows(Tier::Remote));
        assert!(default.allows(Tier::Memory));
        assert!(default.allows(Tier::Local));
    }

    #[test]
    fn test_every_row_is_valid() {
        let resolver = CacheStrategyResolver::new();
        for ct in ContentType::ALL {
            resolver.resolve(ct).validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_tag_falls_back_to_default() {
        let resolver = CacheStrategyResolver::new();
        let policy = resolver.resolve_name("pc_client_status");
        assert_eq!(policy.content_type, ContentType::Default);
        assert_eq!(policy.eligible_tiers, vec![Tier::Memory, Tier::Local]);
    }

    #[test]
    fn test_known_tag_resolves() {
        let resolver = CacheStrategyResolver::new();
        assert_eq!(
            resolver.resolve_name("global_content").content_type,
            ContentType::GlobalContent
        );
    }

    #[test]
    fn test_override_rejects_empty_tiers() {
        let mut policy = ContentTypePolicy::everywhere(ContentType::DailyNews, Duration::ZERO);
        policy.eligible_tiers.clear();
        assert!(CacheStrategyResolver::new().with_override(policy).is_err());
    }

    #[test]
    fn test_override_rejects_bad_threshold() {
        let policy = ContentTypePolicy::everywhere(ContentType::GameHelp, Duration::ZERO)
            .with_similarity(1.5);
        assert!(CacheStrategyResolver::new().with_override(policy).is_err());
    }

    #[test]
    fn test_override_replaces_row() {
        let policy =
            ContentTypePolicy::device_only(ContentType::DailyNews, Duration::from_secs(60));
        let resolver = CacheStrategyResolver::new().with_override(policy).unwrap();
        let news = resolver.resolve(ContentType::DailyNews);
        assert_eq!(news.ttl, Duration::from_secs(60));
        assert!(!news.allows(Tier::Remote));
    }
}
