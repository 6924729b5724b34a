//! Caller identity
//!
//! The engine never authenticates. Every workflow call receives an explicit
//! `Actor` and only authorizes by role name.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

text_enum! {
    /// Role supplied by the identity collaborator
    pub enum Role {
        Viewer => "Viewer",
        Editor => "Editor",
        Admin => "Admin",
    }
}

impl Role {
    pub fn can_mutate(self) -> bool {
        matches!(self, Role::Editor | Role::Admin)
    }
}

/// Authenticated user performing a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Parse `user` or `user:Role` (role defaults to Viewer)
    pub fn parse(raw: &str) -> Result<Self> {
        let (id, role) = match raw.split_once(':') {
            Some((id, role)) => (id.trim(), role.parse::<Role>()?),
            None => (raw.trim(), Role::Viewer),
        };
        if id.is_empty() {
            return Err(Error::Validation("actor id must not be empty".to_string()));
        }
        Ok(Self::new(id, role))
    }

    /// Editor or Admin
    pub fn require_mutate(&self, action: &'static str) -> Result<()> {
        if self.role.can_mutate() {
            Ok(())
        } else {
            Err(self.forbidden(action))
        }
    }

    pub fn require_admin(&self, action: &'static str) -> Result<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(self.forbidden(action))
        }
    }

    fn forbidden(&self, action: &'static str) -> Error {
        Error::Forbidden {
            actor: format!("{} ({})", self.id, self.role),
            action,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actor_text() {
        let a = Actor::parse("alice:admin").unwrap();
        assert_eq!(a, Actor::new("alice", Role::Admin));
        assert_eq!(Actor::parse("bob").unwrap().role, Role::Viewer);
        assert!(Actor::parse(":Editor").is_err());
        assert!(Actor::parse("carol:janitor").is_err());
    }

    #[test]
    fn test_role_gates() {
        let viewer = Actor::new("v", Role::Viewer);
        let editor = Actor::new("e", Role::Editor);
        assert!(matches!(
            viewer.require_mutate("change status"),
            Err(Error::Forbidden { .. })
        ));
        assert!(editor.require_mutate("change status").is_ok());
        assert!(editor.require_admin("cancel a progress request").is_err());
    }
}
