//! Entity identifiers and namespaces
//!
//! An entity id is an absolute `http`/`https` URL. The namespace of an
//! entity is its routing key: `{origin}/{firstPathSegment}/` when the URL has
//! at least two path segments, otherwise `{origin}/`.
//!
//! A namespace maps reversibly to a blob-store path by reversing the host
//! labels (each prefixed with `.`) and appending the path segments:
//!
//! ```text
//! https://api.example.com/crm/acme  ->  .com/.example/.api/crm/acme
//! ```
//!
//! The reversed-domain encoding groups co-domain workloads under shared
//! object-store prefixes so range listings stay cheap.

use crate::error::{EntityIdErrorKind, LatticeError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum accepted entity URL length in characters
pub const MAX_ENTITY_URL_LEN: usize = 2048;

/// A validated entity URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityUrl {
    url: Url,
    raw: String,
}

impl EntityUrl {
    /// Parse and validate an entity URL
    ///
    /// Rejects: empty input, input over [`MAX_ENTITY_URL_LEN`], control /
    /// zero-width / BOM / replacement code points, non-URL input, schemes
    /// other than `http`/`https`, userinfo, and missing hostnames.
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::Empty,
                input,
            ));
        }
        if input.chars().count() > MAX_ENTITY_URL_LEN {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::TooLong,
                input,
            ));
        }
        if input.chars().any(is_forbidden_char) {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::InvalidCharacters,
                input,
            ));
        }

        let url = Url::parse(input).map_err(|_| {
            LatticeError::invalid_entity_id(EntityIdErrorKind::InvalidUrl, input)
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::InvalidProtocol,
                input,
            ));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::HasUserInfo,
                input,
            ));
        }
        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => {
                return Err(LatticeError::invalid_entity_id(
                    EntityIdErrorKind::InvalidHostname,
                    input,
                ));
            }
        }

        Ok(EntityUrl {
            url,
            raw: input.to_string(),
        })
    }

    /// The URL as originally supplied
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The URL origin, e.g. `https://api.example.com`
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// The URL host
    pub fn host(&self) -> &str {
        // Validated at construction.
        self.url.host_str().unwrap_or_default()
    }

    /// Non-empty path segments
    pub fn path_segments(&self) -> Vec<&str> {
        self.url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// The namespace this entity routes under
    ///
    /// `{origin}/{firstPathSegment}/` when the URL has at least two path
    /// segments, otherwise `{origin}/`.
    pub fn namespace(&self) -> Namespace {
        let segments = self.path_segments();
        let ns = if segments.len() >= 2 {
            format!("{}/{}/", self.origin(), segments[0])
        } else {
            format!("{}/", self.origin())
        };
        Namespace(ns)
    }

    /// The blob-store path for this entity (reversed host + path segments)
    pub fn storage_path(&self) -> String {
        let mut parts: Vec<String> = self
            .host()
            .split('.')
            .rev()
            .map(|label| format!(".{}", label))
            .collect();
        parts.extend(self.path_segments().iter().map(|s| s.to_string()));
        parts.join("/")
    }
}

impl std::fmt::Display for EntityUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Rebuild an entity URL from its storage path
///
/// Inverse of [`EntityUrl::storage_path`]: leading `.`-prefixed segments are
/// host labels in reverse order, the remainder are path segments. The scheme
/// is always `https`.
pub fn url_from_storage_path(path: &str) -> Result<String> {
    let mut host_labels: Vec<&str> = Vec::new();
    let mut path_segments: Vec<&str> = Vec::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(label) = segment.strip_prefix('.') {
            if !path_segments.is_empty() {
                return Err(LatticeError::invalid_entity_id(
                    EntityIdErrorKind::InvalidUrl,
                    path,
                ));
            }
            host_labels.push(label);
        } else {
            path_segments.push(segment);
        }
    }

    if host_labels.is_empty() {
        return Err(LatticeError::invalid_entity_id(
            EntityIdErrorKind::InvalidHostname,
            path,
        ));
    }

    host_labels.reverse();
    let host = host_labels.join(".");
    if path_segments.is_empty() {
        Ok(format!("https://{}/", host))
    } else {
        Ok(format!("https://{}/{}", host, path_segments.join("/")))
    }
}

/// A URL-derived routing key
///
/// Always of the form `{origin}/` or `{origin}/{segment}/`; the trailing
/// slash is part of the key. Namespaces partition storage and routing and
/// map 1-to-1 to a blob-store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Derive the namespace of a raw entity URL
    pub fn of_entity(entity_url: &str) -> Result<Self> {
        Ok(EntityUrl::parse(entity_url)?.namespace())
    }

    /// Wrap an already-derived namespace string
    ///
    /// Validates shape only (absolute http(s) URL ending in `/`).
    pub fn parse(input: &str) -> Result<Self> {
        if !input.ends_with('/') {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::InvalidUrl,
                input,
            ));
        }
        let entity = EntityUrl::parse(input)?;
        if entity.path_segments().len() > 1 {
            return Err(LatticeError::invalid_entity_id(
                EntityIdErrorKind::InvalidUrl,
                input,
            ));
        }
        Ok(Namespace(input.to_string()))
    }

    /// The namespace as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace host (used in cache tags)
    pub fn host(&self) -> String {
        EntityUrl::parse(&self.0)
            .map(|e| e.host().to_string())
            .unwrap_or_default()
    }

    /// The namespace path portion including leading slash, e.g. `/crm/`
    pub fn path(&self) -> String {
        EntityUrl::parse(&self.0)
            .ok()
            .and_then(|e| {
                e.path_segments()
                    .first()
                    .map(|segment| format!("/{}/", segment))
            })
            .unwrap_or_else(|| "/".to_string())
    }

    /// The blob-store prefix for this namespace (no trailing slash)
    pub fn storage_path(&self) -> String {
        // A namespace is itself a valid entity URL by construction.
        EntityUrl::parse(&self.0)
            .map(|e| e.storage_path())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate a predicate name
///
/// A predicate is a simple field name: leading ASCII letter or underscore,
/// then letters, digits, or underscores. Colons are never allowed (they
/// delimit storage keys downstream).
pub fn validate_predicate(predicate: &str) -> Result<()> {
    let mut chars = predicate.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(LatticeError::InvalidPredicate(predicate.to_string()))
    }
}

fn is_forbidden_char(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{FFFD}'
        )
}
