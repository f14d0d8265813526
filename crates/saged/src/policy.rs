//! Scope classification and execution policy.
//!
//! Pure decision functions: the classifier only reads its owner list, the
//! builder is a table lookup, and the tool predicate is a single expression.

use sage_shared::{ExecutionPolicy, Mode, Scope, ToolTier};
use std::collections::HashSet;

/// Resolves the caller's trust scope for a request.
#[derive(Debug, Clone, Default)]
pub struct ScopeClassifier {
    owner_ids: HashSet<String>,
}

impl ScopeClassifier {
    pub fn new<I, S>(owner_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owner_ids: owner_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_owner(&self, user_id: Option<&str>) -> bool {
        user_id
            .map(|id| self.owner_ids.contains(id))
            .unwrap_or(false)
    }

    /// Whether the caller may run under `scope`. OWNER is reserved for
    /// owners; every other scope grants no more than GENERAL.
    pub fn is_permitted(&self, scope: Scope, user_id: Option<&str>) -> bool {
        match scope {
            Scope::Owner => self.is_owner(user_id),
            Scope::General | Scope::Auto | Scope::PrivacySafe | Scope::PrivacyRequest => true,
        }
    }

    /// Explicit non-AUTO scope wins if permitted, else owners are promoted,
    /// else GENERAL.
    pub fn classify(&self, requested: Option<Scope>, user_id: Option<&str>) -> Scope {
        if let Some(scope) = requested {
            if scope != Scope::Auto && self.is_permitted(scope, user_id) {
                return scope;
            }
        }
        if self.is_owner(user_id) {
            return Scope::Owner;
        }
        Scope::General
    }
}

/// Maps a scope to its immutable policy.
pub struct PolicyBuilder;

impl PolicyBuilder {
    pub fn build(scope: Scope) -> ExecutionPolicy {
        match scope {
            Scope::Owner => ExecutionPolicy {
                allow_file: true,
                allow_rag: true,
                tool_access_level: ToolTier::Full,
                max_tool_rounds: 5,
                allow_side_effect_tools: false,
                preferred_mode: Mode::Deep,
            },
            Scope::General | Scope::Auto => ExecutionPolicy {
                allow_file: true,
                allow_rag: false,
                tool_access_level: ToolTier::TierAB,
                max_tool_rounds: 2,
                allow_side_effect_tools: false,
                preferred_mode: Mode::Fast,
            },
            Scope::PrivacySafe => ExecutionPolicy {
                allow_file: false,
                allow_rag: false,
                tool_access_level: ToolTier::TierA,
                max_tool_rounds: 1,
                allow_side_effect_tools: false,
                preferred_mode: Mode::Fast,
            },
            Scope::PrivacyRequest => ExecutionPolicy {
                allow_file: false,
                allow_rag: false,
                tool_access_level: ToolTier::None,
                max_tool_rounds: 0,
                allow_side_effect_tools: false,
                preferred_mode: Mode::Fast,
            },
        }
    }
}

/// A tool is callable iff the policy grants some tool access, its tier covers
/// the tool's tier, and side effects are either absent or allowed.
pub fn can_use_tool(
    policy_tier: ToolTier,
    tool_tier: ToolTier,
    side_effecting: bool,
    allow_side_effects: bool,
) -> bool {
    policy_tier > ToolTier::None
        && policy_tier >= tool_tier
        && (!side_effecting || allow_side_effects)
}
