//! Authorization seam.
//!
//! The registry consults a single `enforce(principal, action)` query
//! before every mutating or download operation. The policy language
//! itself lives elsewhere; this module only defines the seam and two
//! small implementations.

use std::collections::HashSet;

use imagevault_common::{Error, Result};

/// The identity an operation runs as.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub owner: Option<String>,
    pub is_admin: bool,
}

impl Principal {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A caller acting as the given owner.
    pub fn user(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            is_admin: false,
        }
    }

    /// An administrative caller.
    pub fn admin() -> Self {
        Self {
            owner: None,
            is_admin: true,
        }
    }

    /// Whether this principal may see the given record owner's private
    /// records.
    pub fn can_see(&self, record_owner: Option<&str>) -> bool {
        self.is_admin
            || record_owner.is_none()
            || self.owner.as_deref() == record_owner
    }
}

/// Authorization decisions for registry actions.
pub trait Policy: Send + Sync {
    /// Allow the action or fail with `Forbidden`.
    fn enforce(&self, principal: &Principal, action: &str) -> Result<()>;
}

/// Policy that allows everything.
pub struct AllowAll;

impl Policy for AllowAll {
    fn enforce(&self, _principal: &Principal, _action: &str) -> Result<()> {
        Ok(())
    }
}

/// Policy restricting a configured set of actions to administrators.
pub struct AdminOnlyActions {
    actions: HashSet<String>,
}

impl AdminOnlyActions {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Policy for AdminOnlyActions {
    fn enforce(&self, principal: &Principal, action: &str) -> Result<()> {
        if self.actions.contains(action) && !principal.is_admin {
            return Err(Error::forbidden(format!(
                "action '{action}' requires administrative access"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let policy = AllowAll;
        assert!(policy
            .enforce(&Principal::anonymous(), "delete_image")
            .is_ok());
    }

    #[test]
    fn test_admin_only_actions() {
        let policy = AdminOnlyActions::new(["publicize_image"]);

        assert!(policy
            .enforce(&Principal::user("alice"), "add_image")
            .is_ok());
        assert!(matches!(
            policy.enforce(&Principal::user("alice"), "publicize_image"),
            Err(Error::Forbidden(_))
        ));
        assert!(policy
            .enforce(&Principal::admin(), "publicize_image")
            .is_ok());
    }

    #[test]
    fn test_visibility() {
        let alice = Principal::user("alice");
        assert!(alice.can_see(Some("alice")));
        assert!(alice.can_see(None));
        assert!(!alice.can_see(Some("bob")));
        assert!(Principal::admin().can_see(Some("bob")));
    }
}
