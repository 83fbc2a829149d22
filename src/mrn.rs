//! MRN (Manetu Resource Name) and entity reference parsing.
//!
//! Every entity in a policy domain is identified by a colon-delimited MRN,
//! e.g. `mrn:iam:role:admin`. References between entities are either
//! unqualified (`<mrn>`, resolved in the source domain) or qualified
//! (`<domain>/<mrn>`).

use crate::error::{Error, Result};

/// A parsed entity reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Explicit target domain, if the reference was qualified.
    pub domain: Option<String>,
    /// The MRN within the target domain.
    pub mrn: String,
}

impl Reference {
    /// Parse a raw reference string.
    ///
    /// Empty strings, empty domain or MRN halves, and references with more
    /// than one `/` are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidParam("empty reference".to_string()));
        }

        match raw.split_once('/') {
            None => Ok(Reference {
                domain: None,
                mrn: raw.to_string(),
            }),
            Some((domain, mrn)) => {
                if domain.is_empty() || mrn.is_empty() || mrn.contains('/') {
                    return Err(Error::InvalidParam(format!(
                        "malformed reference: {raw:?}"
                    )));
                }
                Ok(Reference {
                    domain: Some(domain.to_string()),
                    mrn: mrn.to_string(),
                })
            }
        }
    }

    /// Fully-qualified form, resolving an unqualified reference against the
    /// given source domain.
    pub fn qualified(&self, source_domain: &str) -> String {
        match &self.domain {
            Some(d) => qualify(d, &self.mrn),
            None => qualify(source_domain, &self.mrn),
        }
    }

    /// The domain this reference targets, defaulting to the source domain.
    pub fn domain_or<'a>(&'a self, source_domain: &'a str) -> &'a str {
        self.domain.as_deref().unwrap_or(source_domain)
    }
}

/// Join a domain name and an MRN into the qualified name space used by the
/// dependency graph and cross-domain resolution.
pub fn qualify(domain: &str, mrn: &str) -> String {
    format!("{domain}/{mrn}")
}
