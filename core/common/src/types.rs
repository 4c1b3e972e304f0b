//! Common types used throughout mirrorsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since the Unix epoch.
///
/// Modification times and watermarks are compared at whole-second precision.
pub type Timestamp = i64;

/// An absolute, `/`-rooted path on a remote filesystem.
///
/// Paths are stored as normalized components: empty and `.` segments are
/// dropped while parsing, and `..` is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, `.`/`..`, or contains `/`
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a RemotePath.
    ///
    /// Uses '/' as separator. A missing leading slash is accepted.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let components: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .map(String::from)
            .collect();
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Relative path component not allowed: {}",
                comp
            )));
        }
        if comp.contains('/') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain '/'".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Every non-root prefix of this path, shortest first.
    ///
    /// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
    pub fn prefixes(&self) -> impl Iterator<Item = RemotePath> + '_ {
        (1..=self.components.len()).map(move |len| Self {
            components: self.components[..len].to_vec(),
        })
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.to_string_path()
    }
}
