// Configuration validation

use crate::error::{ConfigError, Result};
use crate::settings::{ConstraintSetting, TrustServiceConfig};
use std::collections::HashSet;

pub trait ConfigValidator {
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    fn validate(&self) -> Result<()>;
}

impl ConfigValidator for TrustServiceConfig {
    fn validate(&self) -> Result<()> {
        if self.harvester.fetch_timeout_secs == 0 {
            return Err(invalid("harvester.fetch_timeout_secs must be positive"));
        }
        if self.harvester.max_crl_size_bytes == 0 {
            return Err(invalid("harvester.max_crl_size_bytes must be positive"));
        }
        if self.harvester.proxy.enabled && self.harvester.proxy.host.trim().is_empty() {
            return Err(invalid("harvester.proxy.host is required when the proxy is enabled"));
        }
        if self.clock_drift.timeout_millis == 0 {
            return Err(invalid("clock_drift.timeout_millis must be positive"));
        }
        if self.clock_drift.max_clock_offset_millis < 0 {
            return Err(invalid("clock_drift.max_clock_offset_millis must not be negative"));
        }

        let mut aliases = HashSet::new();
        for seed in &self.bootstrap.trust_points {
            if !aliases.insert(seed.alias.as_str()) {
                return Err(invalid(&format!("duplicate trust point alias '{}'", seed.alias)));
            }
        }

        let mut names = HashSet::new();
        let mut defaults = 0usize;
        for domain in &self.bootstrap.domains {
            if domain.name.trim().is_empty() {
                return Err(invalid("trust domain name must not be empty"));
            }
            if !names.insert(domain.name.as_str()) {
                return Err(invalid(&format!("duplicate trust domain '{}'", domain.name)));
            }
            if domain.default {
                defaults = defaults.saturating_add(1);
            }
            for alias in &domain.trust_points {
                if !aliases.contains(alias.as_str()) {
                    return Err(invalid(&format!(
                        "trust domain '{}' references unknown trust point '{}'",
                        domain.name, alias
                    )));
                }
            }
            for constraint in &domain.constraints {
                validate_constraint(&domain.name, constraint)?;
            }
        }
        if defaults > 1 {
            return Err(invalid("at most one trust domain may be the default"));
        }

        Ok(())
    }
}

fn validate_constraint(domain: &str, constraint: &ConstraintSetting) -> Result<()> {
    match constraint {
        ConstraintSetting::CertificatePolicy { oid } if !is_dotted_oid(oid) => Err(invalid(
            &format!("trust domain '{domain}' has malformed policy OID '{oid}'"),
        )),
        ConstraintSetting::DistinguishedName { pattern } if pattern.trim().is_empty() => Err(
            invalid(&format!("trust domain '{domain}' has an empty DN pattern")),
        ),
        _ => Ok(()),
    }
}

fn is_dotted_oid(oid: &str) -> bool {
    let arcs: Vec<&str> = oid.split('.').collect();
    arcs.len() >= 2
        && arcs
            .iter()
            .all(|arc| !arc.is_empty() && arc.chars().all(|c| c.is_ascii_digit()))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SeedTrustDomain, SeedTrustPoint};

    fn domain(name: &str, default: bool) -> SeedTrustDomain {
        SeedTrustDomain {
            name: name.to_string(),
            default,
            trust_points: Vec::new(),
            constraints: Vec::new(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrustServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_two_default_domains_rejected() {
        let mut config = TrustServiceConfig::default();
        config.bootstrap.domains = vec![domain("a", true), domain("b", true)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut config = TrustServiceConfig::default();
        let seed = SeedTrustPoint {
            alias: "root".to_string(),
            certificate_path: "/tmp/root.pem".into(),
            crl_refresh_cron: None,
            crl_url: None,
        };
        config.bootstrap.trust_points = vec![seed.clone(), seed];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_policy_oid_rejected() {
        let mut config = TrustServiceConfig::default();
        let mut auth = domain("auth", true);
        auth.constraints.push(ConstraintSetting::CertificatePolicy {
            oid: "2.16.x.1".to_string(),
        });
        config.bootstrap.domains = vec![auth];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_proxy_needs_host() {
        let mut config = TrustServiceConfig::default();
        config.harvester.proxy.enabled = true;
        assert!(config.validate().is_err());
        config.harvester.proxy.host = "proxy.local".to_string();
        config.harvester.proxy.port = 3128;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.harvester.proxy.url().as_deref(),
            Some("http://proxy.local:3128")
        );
    }
}
