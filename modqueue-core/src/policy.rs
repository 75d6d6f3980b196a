//! The interception predicate seam.
//!
//! Whether a given request must be intercepted at all is a policy over
//! user rights and namespace configuration that lives outside the core.
//! The core only asks.

use crate::change::{ChangeKind, PageRef, UserRef};

pub trait InterceptionPolicy: Send + Sync {
    fn should_intercept(&self, author: &UserRef, target: &PageRef, kind: &ChangeKind) -> bool;
}

/// Policy that intercepts everything. Useful for tests and for wikis that
/// moderate all contributors.
pub struct InterceptEveryone;

impl InterceptionPolicy for InterceptEveryone {
    fn should_intercept(&self, _author: &UserRef, _target: &PageRef, _kind: &ChangeKind) -> bool {
        true
    }
}
