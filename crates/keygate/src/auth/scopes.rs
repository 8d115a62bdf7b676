//! Scope matching.
//!
//! A token authorizes a `(organization, namespace)` pair when any of its scope
//! entries, after stripping a leading [`MEMBER_OF_PREFIX`], equals
//! `<org>.<ns>` or `<org>.<ns>.write`.

/// Group-membership prefix removed from scope entries before comparison.
pub const MEMBER_OF_PREFIX: &str = "user:memberof:";

/// Suffix of the write-level scope.
const WRITE_SUFFIX: &str = ".write";

/// The organization/namespace pair a token is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTarget {
    organization: String,
    namespace: String,
}

impl ScopeTarget {
    #[must_use]
    pub fn new(organization: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn organization(&self) -> &str {
        &self.organization
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The two scope strings that grant access: `<org>.<ns>` and
    /// `<org>.<ns>.write`.
    #[must_use]
    pub fn required_scopes(&self) -> [String; 2] {
        let read = format!("{}.{}", self.organization, self.namespace);
        let write = format!("{read}{WRITE_SUFFIX}");
        [read, write]
    }

    /// Whether any of `scopes` grants access to this target.
    ///
    /// Matching is exact and case-sensitive after prefix stripping.
    #[must_use]
    pub fn is_granted_by(&self, scopes: &[String]) -> bool {
        let required = self.required_scopes();
        scopes
            .iter()
            .map(|scope| normalize_scope(scope))
            .any(|scope| required.iter().any(|r| r == scope))
    }
}

impl std::fmt::Display for ScopeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.organization, self.namespace)
    }
}

/// Strip a leading [`MEMBER_OF_PREFIX`], if present.
#[must_use]
pub fn normalize_scope(scope: &str) -> &str {
    scope.strip_prefix(MEMBER_OF_PREFIX).unwrap_or(scope)
}
