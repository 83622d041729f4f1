//! Trailer fallback chain.
//!
//! A trailer is not one job but an ordered chain of (provider, variant)
//! links. Each link is a normal retry-governed attempt series; the chain
//! decides when a link is exhausted and assembles the final report.

use providers::MediaProvider;
use std::sync::Arc;

/// One link: a provider plus how to shape the request for it.
pub struct ChainLink {
    pub provider: Arc<dyn MediaProvider>,
    /// Human-readable label for the chain report.
    pub label: String,
    /// Drop the supporting reference image for this link.
    pub drop_reference: bool,
}

impl ChainLink {
    pub fn new(provider: Arc<dyn MediaProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            drop_reference: false,
        }
    }

    pub fn without_reference(provider: Arc<dyn MediaProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            drop_reference: true,
        }
    }
}

/// Strictly ordered list of links; each is attempted at most once (the
/// retry ceiling applies within a link).
pub struct TrailerChain {
    pub links: Vec<ChainLink>,
}

impl TrailerChain {
    pub fn new(links: Vec<ChainLink>) -> Self {
        Self { links }
    }

    /// The observed production chain: primary provider (retries and a
    /// prompt adjustment happen inside the link), then the fallback
    /// provider, then the primary again without the reference image.
    pub fn standard(
        primary: Arc<dyn MediaProvider>,
        fallback: Arc<dyn MediaProvider>,
    ) -> Self {
        let primary_label = primary.name().to_string();
        let fallback_label = fallback.name().to_string();
        Self::new(vec![
            ChainLink::new(primary.clone(), primary_label.clone()),
            ChainLink::new(fallback, fallback_label),
            ChainLink::without_reference(
                primary,
                format!("{} (no reference image)", primary_label),
            ),
        ])
    }
}

/// Why one link gave up.
#[derive(Debug, Clone)]
pub struct LinkFailure {
    pub label: String,
    pub attempts: u32,
    pub detail: String,
}

/// User-facing summary of a fully exhausted chain.
pub fn compose_chain_report(failures: &[LinkFailure]) -> String {
    let tried: Vec<String> = failures
        .iter()
        .map(|f| {
            format!(
                "{} ({} attempt{}): {}",
                f.label,
                f.attempts,
                if f.attempts == 1 { "" } else { "s" },
                f.detail
            )
        })
        .collect();
    format!(
        "all {} trailer options failed - {}",
        failures.len(),
        tried.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[test]
    fn test_standard_chain_shape() {
        let primary: Arc<dyn MediaProvider> = Arc::new(ScriptedProvider::new("veo"));
        let fallback: Arc<dyn MediaProvider> = Arc::new(ScriptedProvider::new("kling"));
        let chain = TrailerChain::standard(primary, fallback);

        assert_eq!(chain.links.len(), 3);
        assert_eq!(chain.links[0].label, "veo");
        assert!(!chain.links[0].drop_reference);
        assert_eq!(chain.links[1].label, "kling");
        assert!(!chain.links[1].drop_reference);
        assert_eq!(chain.links[2].label, "veo (no reference image)");
        assert!(chain.links[2].drop_reference);
    }

    #[test]
    fn test_chain_report_enumerates_links() {
        let report = compose_chain_report(&[
            LinkFailure {
                label: "veo".to_string(),
                attempts: 3,
                detail: "flagged by content policy".to_string(),
            },
            LinkFailure {
                label: "kling".to_string(),
                attempts: 1,
                detail: "timed out waiting for the provider".to_string(),
            },
        ]);

        assert!(report.contains("all 2 trailer options failed"));
        assert!(report.contains("veo (3 attempts): flagged by content policy"));
        assert!(report.contains("kling (1 attempt): timed out"));
    }
}
