use crate::certificate::{Certificate, KeyUsageBit};
use crate::error::{ModelError, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-domain restriction on the end-entity certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CertificateConstraint {
    /// `required = true`: the bit must be asserted; `false`: it must not be
    KeyUsage { usage: KeyUsageBit, required: bool },
    /// Policy OIDs of one domain form a group; any one of them suffices
    CertificatePolicy { oid: String },
    QcStatements { require_qc_compliance: bool },
    /// Subject DN pattern, `*` matches any run of characters within a value
    DistinguishedName { pattern: String },
}

impl CertificateConstraint {
    pub fn key_usage(usage: KeyUsageBit, required: bool) -> Self {
        Self::KeyUsage { usage, required }
    }

    pub fn policy(oid: impl Into<String>) -> Self {
        Self::CertificatePolicy { oid: oid.into() }
    }

    pub fn qc_statements(require_qc_compliance: bool) -> Self {
        Self::QcStatements {
            require_qc_compliance,
        }
    }

    pub fn distinguished_name(pattern: impl Into<String>) -> Self {
        Self::DistinguishedName {
            pattern: pattern.into(),
        }
    }

    /// Evaluate this constraint on its own
    ///
    /// A single policy constraint is satisfied when the certificate carries
    /// that policy; use [`evaluate_constraints`] for group semantics.
    pub fn is_satisfied_by(&self, cert: &Certificate) -> bool {
        match self {
            CertificateConstraint::KeyUsage { usage, required } => {
                cert.has_key_usage(*usage) == *required
            }
            CertificateConstraint::CertificatePolicy { oid } => {
                cert.policies().iter().any(|policy| policy == oid)
            }
            CertificateConstraint::QcStatements {
                require_qc_compliance,
            } => !*require_qc_compliance || cert.is_qc_compliant(),
            CertificateConstraint::DistinguishedName { pattern } => {
                dn_matches(pattern, cert.subject()).unwrap_or(false)
            }
        }
    }
}

impl fmt::Display for CertificateConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateConstraint::KeyUsage { usage, required } => {
                if *required {
                    write!(f, "key usage {usage} required")
                } else {
                    write!(f, "key usage {usage} forbidden")
                }
            }
            CertificateConstraint::CertificatePolicy { oid } => write!(f, "certificate policy {oid}"),
            CertificateConstraint::QcStatements {
                require_qc_compliance,
            } => write!(f, "QC statements (compliance required: {require_qc_compliance})"),
            CertificateConstraint::DistinguishedName { pattern } => {
                write!(f, "subject DN matching '{pattern}'")
            }
        }
    }
}

/// Evaluate a domain's constraint set against the end-entity certificate
///
/// Returns the description of the first failing constraint. Policy
/// constraints are checked last, as one group.
///
/// # Errors
///
/// `Err(description)` names the violated constraint.
pub fn evaluate_constraints(
    constraints: &[CertificateConstraint],
    cert: &Certificate,
) -> std::result::Result<(), String> {
    let mut policies = Vec::new();

    for constraint in constraints {
        if let CertificateConstraint::CertificatePolicy { oid } = constraint {
            policies.push(oid.as_str());
            continue;
        }
        if !constraint.is_satisfied_by(cert) {
            return Err(constraint.to_string());
        }
    }

    if !policies.is_empty()
        && !cert
            .policies()
            .iter()
            .any(|policy| policies.contains(&policy.as_str()))
    {
        return Err(format!("certificate policy one of [{}]", policies.join(", ")));
    }

    Ok(())
}

/// Order-insensitive DN match with `*` wildcards in values
///
/// # Errors
///
/// Returns [`ModelError::InvalidPattern`] for a pattern without `attr=value` pairs.
pub fn dn_matches(pattern: &str, subject: &str) -> Result<bool> {
    let wanted = split_dn(pattern);
    if wanted.is_empty() || wanted.iter().any(|(attr, _)| attr.is_empty()) {
        return Err(ModelError::InvalidPattern(pattern.to_string()));
    }
    let actual = split_dn(subject);
    if wanted.len() != actual.len() {
        return Ok(false);
    }

    let mut used = vec![false; actual.len()];
    for (attr, value) in &wanted {
        let expression = format!("^{}$", regex::escape(value).replace("\\*", ".*"));
        let matcher = RegexBuilder::new(&expression)
            .case_insensitive(true)
            .build()
            .map_err(|e| ModelError::InvalidPattern(e.to_string()))?;

        let found = actual.iter().enumerate().find(|(index, (candidate_attr, candidate_value))| {
            !used.get(*index).copied().unwrap_or(true)
                && candidate_attr.eq_ignore_ascii_case(attr)
                && matcher.is_match(candidate_value)
        });
        match found {
            Some((index, _)) => {
                if let Some(slot) = used.get_mut(index) {
                    *slot = true;
                }
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn split_dn(dn: &str) -> Vec<(String, String)> {
    dn.split([',', '+'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((attr, value)) => (attr.trim().to_string(), value.trim().to_string()),
            None => (String::new(), part.to_string()),
        })
        .collect()
}
