//! Request classification.
//!
//! Every intercepted request lands in exactly one [`ResourceClass`]. Rules are
//! checked in order and the first match wins:
//!
//! | # | Rule                                   | Class                          |
//! |---|----------------------------------------|--------------------------------|
//! | 1 | origin differs from the serving origin | [`ResourceClass::CrossOrigin`] |
//! | 2 | path is under the image prefix         | [`ResourceClass::Image`]       |
//! | 3 | anything else                          | [`ResourceClass::Other`]       |
//!
//! The origin check always runs first, so a cross-origin URL is never cached
//! whatever its path looks like.

use std::fmt;

use url::{Origin, Url};

/// The caching class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Same origin, under the image prefix: cache-first.
    Image,
    /// Same origin, anything else: stale-while-revalidate.
    Other,
    /// Different origin: passed through untouched.
    CrossOrigin,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "same-origin-image",
            Self::Other => "same-origin-other",
            Self::CrossOrigin => "cross-origin",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The serving origin and the reserved image path prefix.
///
/// # Examples
///
/// ```
/// use swcache::classify::{ResourceClass, Scope};
/// use url::Url;
///
/// let scope = Scope::new(&Url::parse("https://shop.test").unwrap(), "/images/");
/// let class = |u: &str| scope.classify(&Url::parse(u).unwrap());
///
/// assert_eq!(class("https://shop.test/images/a.png"), ResourceClass::Image);
/// assert_eq!(class("https://shop.test/cart"), ResourceClass::Other);
/// assert_eq!(class("https://cdn.test/images/a.png"), ResourceClass::CrossOrigin);
/// ```
#[derive(Debug, Clone)]
pub struct Scope {
    origin: Origin,
    image_prefix: String,
}

impl Scope {
    /// Builds a scope. `image_prefix` is matched on whole path segments, so
    /// `/images` and `/images/` are equivalent.
    pub fn new(origin: &Url, image_prefix: &str) -> Self {
        let trimmed = image_prefix.trim_end_matches('/');
        let image_prefix = if trimmed.starts_with('/') {
            trimmed.to_owned()
        } else {
            format!("/{trimmed}")
        };
        Self {
            origin: origin.origin(),
            image_prefix,
        }
    }

    /// Returns `true` if `url` has the serving origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    /// Assigns `url` to its resource class.
    pub fn classify(&self, url: &Url) -> ResourceClass {
        if !self.is_same_origin(url) {
            return ResourceClass::CrossOrigin;
        }
        if self.is_image_path(url.path()) {
            return ResourceClass::Image;
        }
        ResourceClass::Other
    }

    fn is_image_path(&self, path: &str) -> bool {
        // An empty prefix ("/") would claim every path; treat it as "no images".
        if self.image_prefix == "/" || self.image_prefix.is_empty() {
            return false;
        }
        path.strip_prefix(self.image_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}
