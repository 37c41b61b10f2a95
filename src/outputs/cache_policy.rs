/// Build cache eligibility
///
/// The decision only gates cache I/O; storing and loading entries is up to
/// the build cache collaborator.
use std::fmt;

use super::registry::OutputRegistry;

/// Why a task's outputs may not go through the build cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDisabledReason {
    NoOutputsDeclared,
    NotEnabled,
    /// The named property is marked non-cacheable.
    PropertyNotCacheable(String),
}

impl fmt::Display for CacheDisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDisabledReason::NoOutputsDeclared => f.write_str("no outputs declared"),
            CacheDisabledReason::NotEnabled => f.write_str("caching has not been enabled for the task"),
            CacheDisabledReason::PropertyNotCacheable(name) => write!(f, "{name} not cacheable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDecision {
    /// The task opted into caching.
    pub enabled: bool,
    /// Caching is both enabled and structurally possible.
    pub allowed: bool,
    pub reason: Option<CacheDisabledReason>,
}

pub struct CachePolicy;

impl CachePolicy {
    /// Decides cache eligibility for a task.
    ///
    /// When caching is not allowed the reason names the first disqualifying
    /// condition: missing outputs, then missing opt-in, then the first
    /// non-cacheable property in declaration order.
    pub fn evaluate(explicit_opt_in: bool, registry: &OutputRegistry) -> CacheDecision {
        let reason = if !registry.declares_output() {
            Some(CacheDisabledReason::NoOutputsDeclared)
        } else if !explicit_opt_in {
            Some(CacheDisabledReason::NotEnabled)
        } else {
            registry
                .all()
                .iter()
                .find(|property| !property.cacheable)
                .map(|property| CacheDisabledReason::PropertyNotCacheable(property.name.clone()))
        };

        CacheDecision {
            enabled: explicit_opt_in,
            allowed: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(properties: &[(&str, bool)]) -> OutputRegistry {
        let mut registry = OutputRegistry::new();
        for (name, cacheable) in properties {
            registry
                .declare(name, [format!("build/{name}")], *cacheable)
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_allowed_when_enabled_and_all_cacheable() {
        let decision = CachePolicy::evaluate(true, &registry(&[("classes", true), ("jar", true)]));
        assert_eq!(
            decision,
            CacheDecision {
                enabled: true,
                allowed: true,
                reason: None,
            }
        );
    }

    #[test]
    fn test_non_cacheable_property() {
        let decision = CachePolicy::evaluate(true, &registry(&[("classes", true), ("report", false)]));
        assert!(decision.enabled);
        assert!(!decision.allowed);
        assert_eq!(decision.reason.unwrap().to_string(), "report not cacheable");
    }

    #[test]
    fn test_first_non_cacheable_property_wins() {
        let decision = CachePolicy::evaluate(true, &registry(&[("b", false), ("a", false)]));
        assert_eq!(
            decision.reason,
            Some(CacheDisabledReason::PropertyNotCacheable("b".to_string()))
        );
    }

    #[test]
    fn test_not_enabled() {
        let decision = CachePolicy::evaluate(false, &registry(&[("classes", false)]));
        assert!(!decision.enabled);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(CacheDisabledReason::NotEnabled));
    }

    #[test]
    fn test_no_outputs_takes_priority() {
        for opt_in in [true, false] {
            let decision = CachePolicy::evaluate(opt_in, &OutputRegistry::new());
            assert_eq!(decision.enabled, opt_in);
            assert!(!decision.allowed);
            assert_eq!(decision.reason, Some(CacheDisabledReason::NoOutputsDeclared));
        }
    }
}
