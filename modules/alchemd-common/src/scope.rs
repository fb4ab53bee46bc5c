use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Validate a single org/campaign/project component or key token.
/// `-` is the string-format separator and can never appear inside a field.
fn valid_component(s: &str) -> bool {
    !s.is_empty() && s != "*" && !s.contains('-')
}

/// Org/campaign/project namespace triple. `None` at a position is the `*`
/// wildcard and means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub org: Option<String>,
    pub campaign: Option<String>,
    pub project: Option<String>,
}

impl Scope {
    /// A fully-specified scope. Fails if any component is empty, `*`,
    /// or contains `-`.
    pub fn new(org: &str, campaign: &str, project: &str) -> Result<Self, StateError> {
        for c in [org, campaign, project] {
            if !valid_component(c) {
                return Err(StateError::InvalidRequest(format!(
                    "invalid scope component: '{c}'"
                )));
            }
        }
        Ok(Self {
            org: Some(org.to_string()),
            campaign: Some(campaign.to_string()),
            project: Some(project.to_string()),
        })
    }

    /// The all-wildcard scope `*-*-*`.
    pub fn wildcard() -> Self {
        Self::default()
    }

    pub fn is_concrete(&self) -> bool {
        self.org.is_some() && self.campaign.is_some() && self.project.is_some()
    }

    /// Hierarchical scope comparison: a wildcard position in `self` matches
    /// anything in `other`, so the grant `a-*-*` contains every scope of
    /// org `a`.
    pub fn contains(&self, other: &Scope) -> bool {
        fn position(grant: &Option<String>, target: &Option<String>) -> bool {
            match (grant, target) {
                (None, _) => true,
                (Some(g), Some(t)) => g == t,
                (Some(_), None) => false,
            }
        }
        position(&self.org, &other.org)
            && position(&self.campaign, &other.campaign)
            && position(&self.project, &other.project)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |o: &Option<String>| o.clone().unwrap_or_else(|| "*".to_string());
        write!(
            f,
            "{}-{}-{}",
            part(&self.org),
            part(&self.campaign),
            part(&self.project)
        )
    }
}

impl FromStr for Scope {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let &[org, campaign, project] = parts.as_slice() else {
            return Err(StateError::InvalidRequest(format!(
                "scope string must have exactly three `-`-separated fields: '{s}'"
            )));
        };
        let field = |p: &str| -> Result<Option<String>, StateError> {
            if p == "*" {
                Ok(None)
            } else if valid_component(p) {
                Ok(Some(p.to_string()))
            } else {
                Err(StateError::InvalidRequest(format!(
                    "invalid scope component: '{p}'"
                )))
            }
        };
        Ok(Self {
            org: field(org)?,
            campaign: field(campaign)?,
            project: field(project)?,
        })
    }
}

/// Content-address of a domain object: class name plus content token,
/// rendered `<class>-<token>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GufeKey {
    class_name: String,
    token: String,
}

impl GufeKey {
    pub fn new(class_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            token: token.into(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for GufeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.class_name, self.token)
    }
}

impl FromStr for GufeKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let &[class_name, token] = parts.as_slice() else {
            return Err(StateError::InvalidRequest(format!(
                "gufe key must be '<class>-<token>': '{s}'"
            )));
        };
        if !valid_component(class_name) || !valid_component(token) {
            return Err(StateError::InvalidRequest(format!(
                "malformed gufe key: '{s}'"
            )));
        }
        Ok(Self::new(class_name, token))
    }
}

/// Globally unique identifier of a persisted object: gufe key plus the
/// concrete scope it lives in, rendered
/// `<class>-<token>-<org>-<campaign>-<project>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedKey {
    gufe_key: GufeKey,
    org: String,
    campaign: String,
    project: String,
}

impl ScopedKey {
    /// Combine a gufe key with a scope. The scope must be concrete:
    /// wildcards identify sets of objects, not an object.
    pub fn new(gufe_key: GufeKey, scope: &Scope) -> Result<Self, StateError> {
        let (Some(org), Some(campaign), Some(project)) =
            (&scope.org, &scope.campaign, &scope.project)
        else {
            return Err(StateError::InvalidRequest(format!(
                "cannot build a scoped key in non-concrete scope '{scope}'"
            )));
        };
        Ok(Self {
            gufe_key,
            org: org.clone(),
            campaign: campaign.clone(),
            project: project.clone(),
        })
    }

    pub fn gufe_key(&self) -> &GufeKey {
        &self.gufe_key
    }

    pub fn class_name(&self) -> &str {
        self.gufe_key.class_name()
    }

    pub fn scope(&self) -> Scope {
        Scope {
            org: Some(self.org.clone()),
            campaign: Some(self.campaign.clone()),
            project: Some(self.project.clone()),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.gufe_key, self.org, self.campaign, self.project
        )
    }
}

impl FromStr for ScopedKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let &[class_name, token, org, campaign, project] = parts.as_slice() else {
            return Err(StateError::InvalidRequest(format!(
                "scoped key must be '<class>-<token>-<org>-<campaign>-<project>': '{s}'"
            )));
        };
        for p in [class_name, token, org, campaign, project] {
            if !valid_component(p) {
                return Err(StateError::InvalidRequest(format!(
                    "malformed scoped key: '{s}'"
                )));
            }
        }
        Ok(Self {
            gufe_key: GufeKey::new(class_name, token),
            org: org.to_string(),
            campaign: campaign.to_string(),
            project: project.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_display_round_trip() {
        let scope = Scope::new("a", "b", "c").unwrap();
        assert_eq!(scope.to_string(), "a-b-c");
        assert_eq!("a-b-c".parse::<Scope>().unwrap(), scope);
    }

    #[test]
    fn scope_wildcard_positions() {
        let scope: Scope = "a-*-*".parse().unwrap();
        assert_eq!(scope.org.as_deref(), Some("a"));
        assert!(scope.campaign.is_none());
        assert!(scope.project.is_none());
        assert_eq!(scope.to_string(), "a-*-*");
        assert!(!scope.is_concrete());
    }

    #[test]
    fn scope_rejects_malformed_strings() {
        assert!("a-b".parse::<Scope>().is_err());
        assert!("a-b-c-d".parse::<Scope>().is_err());
        assert!("-b-c".parse::<Scope>().is_err());
        assert!(Scope::new("a-x", "b", "c").is_err());
        assert!(Scope::new("", "b", "c").is_err());
    }

    #[test]
    fn scope_hierarchy() {
        let all: Scope = "*-*-*".parse().unwrap();
        let org: Scope = "a-*-*".parse().unwrap();
        let full: Scope = "a-b-c".parse().unwrap();
        let other: Scope = "z-b-c".parse().unwrap();

        assert!(all.contains(&full));
        assert!(org.contains(&full));
        assert!(!org.contains(&other));
        assert!(!full.contains(&org));
        assert!(full.contains(&full));
    }

    #[test]
    fn scoped_key_round_trip() {
        let scope = Scope::new("org", "camp", "proj").unwrap();
        let sk = ScopedKey::new(GufeKey::new("Task", "abc123"), &scope).unwrap();
        assert_eq!(sk.to_string(), "Task-abc123-org-camp-proj");

        let parsed: ScopedKey = "Task-abc123-org-camp-proj".parse().unwrap();
        assert_eq!(parsed, sk);
        assert_eq!(parsed.class_name(), "Task");
        assert_eq!(parsed.scope(), scope);
    }

    #[test]
    fn scoped_key_requires_concrete_scope() {
        let scope: Scope = "a-*-*".parse().unwrap();
        assert!(ScopedKey::new(GufeKey::new("Task", "abc"), &scope).is_err());
    }
}
