//! Parsing and resolution-state helpers for external references.
//!
//! An issue's `external_ref` field may point at a capability owned by
//! another project rather than at a local row: `external:<project>:<capability>`.
//! Such a reference is a lookup hint, not an owning edge -- a removed target
//! does not invalidate the reference but does change whether it resolves.

use std::fmt;

const EXTERNAL_PREFIX: &str = "external:";

/// A parsed `external:<project>:<capability>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub project: String,
    pub capability: String,
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{EXTERNAL_PREFIX}{}:{}", self.project, self.capability)
    }
}

/// Parses an external reference of the form `external:<project>:<capability>`.
///
/// The capability may itself contain `:`, so only the first two colons after
/// the prefix are treated as separators.
pub fn parse_external_ref(raw: &str) -> Result<ExternalRef, ParseExternalRefError> {
    let rest = raw
        .strip_prefix(EXTERNAL_PREFIX)
        .ok_or_else(|| ParseExternalRefError::InvalidPrefix(raw.to_owned()))?;

    let mut parts = rest.splitn(2, ':');
    let project = parts.next().unwrap_or_default();
    let capability = parts.next().unwrap_or_default();

    if project.is_empty() || capability.is_empty() {
        return Err(ParseExternalRefError::InvalidFormat(raw.to_owned()));
    }

    Ok(ExternalRef {
        project: project.to_owned(),
        capability: capability.to_owned(),
    })
}

/// Errors returned when parsing an external reference.
#[derive(Debug, thiserror::Error)]
pub enum ParseExternalRefError {
    #[error("invalid external reference: must start with {EXTERNAL_PREFIX:?}, got {0:?}")]
    InvalidPrefix(String),

    #[error("invalid external reference: expected external:<project>:<capability>, got {0:?}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_ref() {
        let r = parse_external_ref("external:acme:deploy").unwrap();
        assert_eq!(r.project, "acme");
        assert_eq!(r.capability, "deploy");
    }

    #[test]
    fn capability_may_contain_colons() {
        let r = parse_external_ref("external:acme:ns:deploy").unwrap();
        assert_eq!(r.project, "acme");
        assert_eq!(r.capability, "ns:deploy");
    }

    #[test]
    fn display_roundtrips() {
        let r = ExternalRef {
            project: "acme".into(),
            capability: "deploy".into(),
        };
        assert_eq!(r.to_string(), "external:acme:deploy");
        assert_eq!(parse_external_ref(&r.to_string()).unwrap(), r);
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(parse_external_ref("acme:deploy").is_err());
    }

    #[test]
    fn rejects_missing_capability() {
        assert!(parse_external_ref("external:acme").is_err());
        assert!(parse_external_ref("external:acme:").is_err());
    }
}
