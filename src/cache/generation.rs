//! Partition naming and the live set.
//!
//! Every partition this application owns is named
//! `{namespace}-{role}-{tag}`, e.g. `app-static-v1`. The namespace marks
//! ownership; the tag is the generation baked into a deployment. Bumping a tag
//! makes every partition under the old one stale.

use std::fmt;

/// The two logical roles a live partition can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Documents, scripts, styles: everything same-origin that is not an image.
    Static,
    /// Same-origin images.
    Images,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Images => "images",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-qualified partition name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionName {
    namespace: String,
    role: Role,
    tag: String,
}

impl PartitionName {
    pub fn new(namespace: impl Into<String>, role: Role, tag: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            role,
            tag: tag.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The generation tag embedded in the name.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.namespace, self.role, self.tag)
    }
}

/// The partition names that are current for this deployment.
///
/// Exactly one name per [`Role`]. Any other stored name under the same
/// namespace is stale.
///
/// # Examples
///
/// ```
/// use swcache::cache::LiveSet;
///
/// let live = LiveSet::new("app", "v2", "v1");
/// assert_eq!(live.static_name(), "app-static-v2");
/// assert_eq!(live.images_name(), "app-images-v1");
/// assert!(live.is_stale("app-static-v1"));
/// assert!(!live.is_stale("other-static-v1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSet {
    namespace: String,
    static_name: String,
    images_name: String,
}

impl LiveSet {
    /// Builds the live set from a namespace and one generation tag per role.
    pub fn new(namespace: &str, static_tag: &str, images_tag: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            static_name: PartitionName::new(namespace, Role::Static, static_tag).to_string(),
            images_name: PartitionName::new(namespace, Role::Images, images_tag).to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the live partition name for `role`.
    pub fn name(&self, role: Role) -> &str {
        match role {
            Role::Static => &self.static_name,
            Role::Images => &self.images_name,
        }
    }

    pub fn static_name(&self) -> &str {
        &self.static_name
    }

    pub fn images_name(&self) -> &str {
        &self.images_name
    }

    /// Returns `true` if `name` is one of the live names.
    pub fn is_live(&self, name: &str) -> bool {
        name == self.static_name || name == self.images_name
    }

    /// Returns `true` if `name` falls under this application's namespace.
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.namespace.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Returns `true` if `name` belongs to this application but is not live.
    pub fn is_stale(&self, name: &str) -> bool {
        self.owns(name) && !self.is_live(name)
    }
}
