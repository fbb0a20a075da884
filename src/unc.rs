//! Structured parsing of UNC-style share paths (`\\host\share\sub\path`).
//!
//! Targets are configured as UNC strings. The parser splits them into
//! `{host, share, subpath}` so the server name used in samples and the lock
//! marker never depends on ad-hoc string splitting.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UncError {
    #[error("invalid UNC path '{input}': {reason}")]
    InvalidPathFormat { input: String, reason: &'static str },
}

/// A parsed `\\host\share[\subpath...]` target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UncPath {
    pub host: String,
    pub share: String,
    pub subpath: Vec<String>,
}

impl UncPath {
    /// Parse a UNC path. Both `\\host\share` and `//host/share` are accepted.
    pub fn parse(input: &str) -> Result<Self, UncError> {
        let invalid = |reason| UncError::InvalidPathFormat {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        let rest = trimmed
            .strip_prefix(r"\\")
            .or_else(|| trimmed.strip_prefix("//"))
            .ok_or_else(|| invalid("must start with \\\\ or //"))?;

        let mut parts = rest
            .split(['\\', '/'])
            .filter(|segment| !segment.is_empty());

        let host = parts.next().ok_or_else(|| invalid("missing host"))?;
        if !is_valid_host(host) {
            return Err(invalid("host contains invalid characters"));
        }

        let share = parts.next().ok_or_else(|| invalid("missing share name"))?;
        if share == "." || share == ".." {
            return Err(invalid("share name cannot be a relative segment"));
        }

        let mut subpath = Vec::new();
        for segment in parts {
            if segment == "." || segment == ".." {
                return Err(invalid("relative segments are not allowed"));
            }
            subpath.push(segment.to_string());
        }

        Ok(Self {
            host: host.to_string(),
            share: share.to_string(),
            subpath,
        })
    }

    /// Stable file-name-safe key, used for per-target payload names.
    pub fn slug(&self) -> String {
        let mut slug = format!("{}-{}", self.host, self.share);
        for segment in &self.subpath {
            slug.push('-');
            slug.push_str(segment);
        }
        slug.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }

    /// Map the target onto the local filesystem.
    ///
    /// With a mount root, `\\host\share\a` becomes `<root>/host/share/a`.
    /// Without one the UNC string itself is the path, which only resolves on
    /// Windows.
    pub fn to_local_path(&self, mount_root: Option<&Path>) -> PathBuf {
        match mount_root {
            Some(root) => {
                let mut path = root.join(&self.host).join(&self.share);
                for segment in &self.subpath {
                    path.push(segment);
                }
                path
            }
            None => PathBuf::from(self.to_string()),
        }
    }
}

fn is_valid_host(host: &str) -> bool {
    // Hostnames, IPv4 literals, and bracket-less IPv6 literals.
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':')
}

impl fmt::Display for UncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r"\\{}\{}", self.host, self.share)?;
        for segment in &self.subpath {
            write!(f, r"\{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for UncPath {
    type Err = UncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UncPath {
    type Error = UncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UncPath> for String {
    fn from(value: UncPath) -> Self {
        value.to_string()
    }
}
