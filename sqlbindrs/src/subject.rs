//! The principal a query is generated for.
//!
//! The engine only asks two questions of the current subject: does it hold a
//! permission, and what is stored in one of its session attributes. Anything
//! that authenticates users can implement [`Subject`].

use std::collections::{BTreeSet, HashMap};

pub trait Subject: Send + Sync {
    fn is_permitted(&self, permission: &str) -> bool;
    fn session_attribute(&self, name: &str) -> Option<String>;
}

/// Value of a session attribute that grants access to every value of a filter type.
pub const WILDCARD: &str = "*";

/// Fixed set of permissions and session attributes.
///
/// Permissions are colon separated parts. `*` in a granted permission matches
/// any part, and a granted permission with fewer parts implies every longer one
/// (`report` implies `report:sales:read`).
#[derive(Debug, Clone, Default)]
pub struct StaticSubject {
    permissions: BTreeSet<String>,
    session: HashMap<String, String>,
}

impl StaticSubject {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subject holding every permission.
    pub fn unrestricted() -> Self {
        Self::new().with_permission(WILDCARD)
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_session_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.session.insert(name.into(), value.into());
        self
    }
}

impl Subject for StaticSubject {
    fn is_permitted(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|granted| permission_implies(granted, permission))
    }

    fn session_attribute(&self, name: &str) -> Option<String> {
        self.session.get(name).cloned()
    }
}

pub(crate) fn permission_implies(granted: &str, requested: &str) -> bool {
    let granted: Vec<&str> = granted.split(':').collect();
    let requested: Vec<&str> = requested.split(':').collect();
    for (idx, part) in granted.iter().enumerate() {
        match requested.get(idx) {
            Some(req) if *part == WILDCARD || part == req => continue,
            // Trailing wildcards still match a shorter request.
            None if *part == WILDCARD => continue,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_permission_matches() {
        let subject = StaticSubject::new().with_permission("report:sales");
        assert!(subject.is_permitted("report:sales"));
        assert!(!subject.is_permitted("report:costs"));
    }

    #[test]
    fn wildcard_part_matches_any_value() {
        let subject = StaticSubject::new().with_permission("geo:*");
        assert!(subject.is_permitted("geo:*"));
        assert!(subject.is_permitted("geo:DE"));
        assert!(!subject.is_permitted("channel:web"));
    }

    #[test]
    fn shorter_grant_implies_longer_request() {
        let subject = StaticSubject::new().with_permission("report");
        assert!(subject.is_permitted("report:sales:read"));
        assert!(!StaticSubject::new()
            .with_permission("report:sales:read")
            .is_permitted("report"));
    }

    #[test]
    fn unrestricted_subject_holds_everything() {
        assert!(StaticSubject::unrestricted().is_permitted("anything:at:all"));
    }

    #[test]
    fn session_attributes_are_returned() {
        let subject = StaticSubject::new().with_session_attribute("geo", "*");
        assert_eq!(subject.session_attribute("geo").as_deref(), Some("*"));
        assert!(subject.session_attribute("channel").is_none());
    }
}
