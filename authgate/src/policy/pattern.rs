//! Ant-style request path patterns.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::errors::{Error, Result};

const CATCH_ALL: &str = "/**";

/// A compiled path pattern.
///
/// `?` matches one character and `*` any run of characters, neither crossing a `/`. `**`
/// matches zero or more whole segments, and a trailing `/**` also matches the bare prefix, so
/// `/clientes/**` covers `/clientes`, `/clientes/10` and `/clientes/10/pedidos`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    matcher: Option<GlobSet>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::PolicyMisconfigured {
                reason: format!("pattern '{pattern}' must start with '/'"),
            });
        }

        if pattern == CATCH_ALL {
            return Ok(Self {
                source: pattern.to_string(),
                matcher: None,
            });
        }

        let mut builder = GlobSetBuilder::new();
        builder.add(compile(pattern)?);
        if let Some(prefix) = pattern.strip_suffix(CATCH_ALL) {
            builder.add(compile(prefix)?);
        }
        let matcher = builder.build().map_err(|e| Error::PolicyMisconfigured {
            reason: format!("pattern '{pattern}': {e}"),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            matcher: Some(matcher),
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(path),
            None => true,
        }
    }

    /// True for `/**`, which matches every path.
    pub fn is_catch_all(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::PolicyMisconfigured {
            reason: format!("invalid pattern '{pattern}': {e}"),
        })
}
