//! Endpoint URIs of the form `cth://<common-name>/<type>`.
//!
//! A URI identifies a logical endpoint: the common name comes from the
//! peer's TLS certificate, the type is the role declared at login. The
//! broker itself answers at `cth:///server` (empty common name). Query
//! patterns may use `*` in either position; a wildcard matches exactly
//! one segment.

use std::fmt;

/// URI scheme for all endpoint addresses.
pub const SCHEME: &str = "cth";

/// Address of the broker itself.
pub const SERVER_URI: &str = "cth:///server";

/// Wildcard segment in query patterns.
pub const WILDCARD: &str = "*";

/// Errors raised when parsing or building endpoint URIs.
#[derive(Debug, thiserror::Error)]
pub enum UriError {
    #[error("URI '{0}' does not use the '{SCHEME}' scheme")]
    WrongScheme(String),

    #[error("URI '{0}' is missing the endpoint type segment")]
    MissingType(String),

    #[error("Invalid URI segment '{0}'")]
    InvalidSegment(String),
}

/// A parsed endpoint URI.
///
/// The server URI parses with an empty common name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointUri {
    common_name: String,
    endpoint_type: String,
}

impl EndpointUri {
    /// Build a URI from a common name and endpoint type.
    ///
    /// Both segments must be non-empty, wildcard-free, and contain no
    /// separator characters.
    pub fn new(common_name: &str, endpoint_type: &str) -> Result<Self, UriError> {
        if !is_valid_segment(common_name) {
            return Err(UriError::InvalidSegment(common_name.to_string()));
        }
        if !is_valid_segment(endpoint_type) {
            return Err(UriError::InvalidSegment(endpoint_type.to_string()));
        }
        Ok(Self {
            common_name: common_name.to_string(),
            endpoint_type: endpoint_type.to_string(),
        })
    }

    /// Parse a URI or query pattern into its segments.
    ///
    /// Accepts wildcard segments and the empty common name of the server
    /// URI; use [`EndpointUri::new`] when building a concrete peer URI.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let rest = uri
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| UriError::WrongScheme(uri.to_string()))?;

        let (common_name, endpoint_type) = rest
            .split_once('/')
            .ok_or_else(|| UriError::MissingType(uri.to_string()))?;

        if endpoint_type.is_empty() || endpoint_type.contains('/') {
            return Err(UriError::MissingType(uri.to_string()));
        }

        Ok(Self {
            common_name: common_name.to_string(),
            endpoint_type: endpoint_type.to_string(),
        })
    }

    /// Common name segment (empty for the server URI).
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Endpoint type segment.
    pub fn endpoint_type(&self) -> &str {
        &self.endpoint_type
    }

    /// Whether either segment is a wildcard.
    pub fn is_pattern(&self) -> bool {
        self.common_name == WILDCARD || self.endpoint_type == WILDCARD
    }

    /// Whether a concrete URI falls under this pattern.
    ///
    /// A wildcard segment matches any value of that segment; wildcard
    /// segments in `uri` itself never match.
    pub fn matches(&self, uri: &EndpointUri) -> bool {
        if uri.is_pattern() {
            return false;
        }
        (self.common_name == WILDCARD || self.common_name == uri.common_name)
            && (self.endpoint_type == WILDCARD || self.endpoint_type == uri.endpoint_type)
    }
}

impl fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", SCHEME, self.common_name, self.endpoint_type)
    }
}

/// Check whether a pattern string contains a wildcard segment.
///
/// Unparseable strings are treated as literals.
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    EndpointUri::parse(pattern).map(|p| p.is_pattern()).unwrap_or(false)
}

/// Check whether a concrete URI string falls under a pattern string.
///
/// Unparseable inputs never match.
pub fn pattern_matches(pattern: &str, uri: &str) -> bool {
    match (EndpointUri::parse(pattern), EndpointUri::parse(uri)) {
        (Ok(p), Ok(u)) => p.matches(&u),
        _ => false,
    }
}

/// A valid segment for a concrete peer URI: non-empty, no separators,
/// not a wildcard.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != WILDCARD
        && !segment.contains('/')
        && !segment.contains(':')
        && !segment.contains('*')
}
