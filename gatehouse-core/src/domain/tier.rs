//! Tier policies and the role → tier table

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Named rate-limiting policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPolicy {
    pub name: String,
    /// Requests allowed per window; `None` marks the tier unrestricted
    pub limit: Option<u32>,
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl TierPolicy {
    pub fn restricted(name: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit: Some(limit),
            window,
        }
    }

    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            window: Duration::from_secs(60),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.limit.is_none()
    }

    /// Sustained request rate this tier allows; infinite when unrestricted
    pub fn requests_per_second(&self) -> f64 {
        match self.limit {
            Some(limit) => limit as f64 / self.window.as_secs_f64().max(f64::MIN_POSITIVE),
            None => f64::INFINITY,
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

/// Errors raised while building a [`TierTable`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    #[error("tier table has no restricted tier")]
    NoRestrictedTier,

    #[error("tier `{0}` is defined more than once")]
    DuplicateTier(String),

    #[error("role `{role}` is assigned to both `{first}` and `{second}`")]
    DuplicateRole {
        role: String,
        first: String,
        second: String,
    },

    #[error("tier `{0}` has a zero-length window")]
    ZeroWindow(String),
}

/// Immutable role → tier lookup
///
/// Unknown roles resolve to the strictest restricted tier so that a newly
/// introduced role can never bypass throttling by accident.
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<TierPolicy>,
    by_role: HashMap<String, usize>,
    strictest: usize,
    anonymous_role: String,
}

impl TierTable {
    /// Build the table from `(policy, roles)` pairs
    ///
    /// A request without a role is looked up as `anonymous_role`.
    pub fn new(
        entries: Vec<(TierPolicy, Vec<String>)>,
        anonymous_role: impl Into<String>,
    ) -> Result<Self, TierError> {
        let mut tiers: Vec<TierPolicy> = Vec::with_capacity(entries.len());
        let mut by_role: HashMap<String, usize> = HashMap::new();

        for (policy, roles) in entries {
            if tiers.iter().any(|t| t.name == policy.name) {
                return Err(TierError::DuplicateTier(policy.name));
            }
            if policy.window.is_zero() {
                return Err(TierError::ZeroWindow(policy.name));
            }

            let index = tiers.len();
            for role in roles {
                if let Some(&existing) = by_role.get(&role) {
                    return Err(TierError::DuplicateRole {
                        role,
                        first: tiers[existing].name.clone(),
                        second: policy.name.clone(),
                    });
                }
                by_role.insert(role, index);
            }
            tiers.push(policy);
        }

        let strictest = tiers
            .iter()
            .enumerate()
            .filter(|(_, tier)| !tier.is_unrestricted())
            .min_by(|(_, a), (_, b)| {
                a.requests_per_second()
                    .total_cmp(&b.requests_per_second())
                    .then(a.limit.cmp(&b.limit))
            })
            .map(|(index, _)| index)
            .ok_or(TierError::NoRestrictedTier)?;

        Ok(Self {
            tiers,
            by_role,
            strictest,
            anonymous_role: anonymous_role.into(),
        })
    }

    /// Resolve the policy for `role`
    pub fn resolve(&self, role: Option<&str>) -> &TierPolicy {
        let role = role.unwrap_or(&self.anonymous_role);
        match self.by_role.get(role) {
            Some(&index) => &self.tiers[index],
            None => &self.tiers[self.strictest],
        }
    }

    /// Whether `role` is assigned to a tier explicitly
    pub fn knows_role(&self, role: &str) -> bool {
        self.by_role.contains_key(role)
    }

    /// Most restrictive restricted tier
    pub fn strictest(&self) -> &TierPolicy {
        &self.tiers[self.strictest]
    }

    pub fn get(&self, name: &str) -> Option<&TierPolicy> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn tiers(&self) -> &[TierPolicy] {
        &self.tiers
    }

    pub fn anonymous_role(&self) -> &str {
        &self.anonymous_role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> TierTable {
        TierTable::new(
            vec![
                (
                    TierPolicy::restricted("anonymous", 30, Duration::from_secs(60)),
                    roles(&["anonymous"]),
                ),
                (
                    TierPolicy::restricted("standard", 120, Duration::from_secs(60)),
                    roles(&["user"]),
                ),
                (
                    TierPolicy::restricted("elevated", 1000, Duration::from_secs(60)),
                    roles(&["admin", "partner"]),
                ),
                (TierPolicy::unrestricted("internal"), roles(&["service"])),
            ],
            "anonymous",
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_known_roles() {
        let table = table();
        assert_eq!(table.resolve(Some("user")).name, "standard");
        assert_eq!(table.resolve(Some("partner")).name, "elevated");
        assert!(table.resolve(Some("service")).is_unrestricted());
    }

    #[test]
    fn test_missing_role_uses_anonymous_role() {
        assert_eq!(table().resolve(None).name, "anonymous");
    }

    #[test]
    fn test_unknown_role_resolves_to_strictest_restricted_tier() {
        let table = table();
        let tier = table.resolve(Some("brand-new-role"));
        assert_eq!(tier.name, "anonymous");
        assert!(!tier.is_unrestricted());
    }

    #[test]
    fn test_strictest_compares_rate_not_limit() {
        // 10 per second beats 100 per minute on limit but not on rate
        let table = TierTable::new(
            vec![
                (
                    TierPolicy::restricted("burst", 10, Duration::from_secs(1)),
                    roles(&["a"]),
                ),
                (
                    TierPolicy::restricted("slow", 100, Duration::from_secs(60)),
                    roles(&["b"]),
                ),
            ],
            "a",
        )
        .unwrap();
        assert_eq!(table.strictest().name, "slow");
    }

    #[test]
    fn test_strictest_ties_broken_by_lower_limit() {
        let table = TierTable::new(
            vec![
                (
                    TierPolicy::restricted("hourly", 3600, Duration::from_secs(3600)),
                    vec![],
                ),
                (
                    TierPolicy::restricted("per-minute", 60, Duration::from_secs(60)),
                    vec![],
                ),
            ],
            "anonymous",
        )
        .unwrap();
        assert_eq!(table.strictest().name, "per-minute");
    }

    #[test]
    fn test_table_without_restricted_tier_is_rejected() {
        let result = TierTable::new(
            vec![(TierPolicy::unrestricted("internal"), roles(&["service"]))],
            "anonymous",
        );
        assert_eq!(result.unwrap_err(), TierError::NoRestrictedTier);
    }

    #[test]
    fn test_duplicate_definitions_are_rejected() {
        let window = Duration::from_secs(60);
        let duplicate_tier = TierTable::new(
            vec![
                (TierPolicy::restricted("a", 1, window), vec![]),
                (TierPolicy::restricted("a", 2, window), vec![]),
            ],
            "anonymous",
        );
        assert!(matches!(duplicate_tier, Err(TierError::DuplicateTier(_))));

        let duplicate_role = TierTable::new(
            vec![
                (TierPolicy::restricted("a", 1, window), roles(&["user"])),
                (TierPolicy::restricted("b", 2, window), roles(&["user"])),
            ],
            "anonymous",
        );
        assert!(matches!(
            duplicate_role,
            Err(TierError::DuplicateRole { .. })
        ));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let result = TierTable::new(
            vec![(TierPolicy::restricted("a", 1, Duration::ZERO), vec![])],
            "anonymous",
        );
        assert_eq!(result.unwrap_err(), TierError::ZeroWindow("a".into()));
    }
}
