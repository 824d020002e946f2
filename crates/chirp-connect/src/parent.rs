//! Read-only child → parent lookup.
//!
//! The mapping is maintained by the account-management collaborator, which
//! calls [`ParentDirectory::link`] when a parent account is attached to a
//! child and [`ParentDirectory::unlink`] when it is detached. This core only
//! reads it, to decide which user id receives a child's emotion report.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Child id → parent id directory.
///
/// Uses a synchronous `RwLock` intentionally: all accesses are brief map
/// operations that never span `.await` points.
#[derive(Clone, Default)]
pub struct ParentDirectory {
    links: Arc<RwLock<HashMap<String, String>>>,
}

impl ParentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `parent_id` as the parent of `child_id`, replacing any
    /// previous link.
    pub fn link(&self, child_id: impl Into<String>, parent_id: impl Into<String>) {
        self.links
            .write()
            .expect("parent directory lock poisoned")
            .insert(child_id.into(), parent_id.into());
    }

    /// Removes the link for `child_id`; no-op if absent.
    pub fn unlink(&self, child_id: &str) {
        self.links
            .write()
            .expect("parent directory lock poisoned")
            .remove(child_id);
    }

    /// The parent linked to `child_id`, if any.
    pub fn parent_of(&self, child_id: &str) -> Option<String> {
        self.links
            .read()
            .expect("parent directory lock poisoned")
            .get(child_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_lookup() {
        let directory = ParentDirectory::new();
        assert_eq!(directory.parent_of("child-1"), None);

        directory.link("child-1", "parent-1");
        assert_eq!(directory.parent_of("child-1"), Some("parent-1".to_string()));

        directory.link("child-1", "parent-2");
        assert_eq!(
            directory.parent_of("child-1"),
            Some("parent-2".to_string()),
            "relinking replaces the previous parent"
        );

        directory.unlink("child-1");
        assert_eq!(directory.parent_of("child-1"), None);
        directory.unlink("child-1");
    }
}
