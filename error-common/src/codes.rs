// Standardized error codes for the trust service

pub mod configuration {
    pub const INVALID_CRON_EXPRESSION: &str = "TRUST_CFG_1001";
    pub const TRUST_DOMAIN_NOT_FOUND: &str = "TRUST_CFG_1002";
    pub const TRUST_POINT_NOT_FOUND: &str = "TRUST_CFG_1003";
    pub const TRUST_POINT_ALREADY_EXISTS: &str = "TRUST_CFG_1004";
    pub const TRUST_DOMAIN_ALREADY_EXISTS: &str = "TRUST_CFG_1005";
    pub const INVALID_SETTING: &str = "TRUST_CFG_1006";
    pub const CONSTRAINT_NOT_FOUND: &str = "TRUST_CFG_1007";
}

pub mod certificate {
    pub const MALFORMED_CERTIFICATE: &str = "TRUST_CERT_2001";
    pub const MALFORMED_CRL: &str = "TRUST_CERT_2002";
    pub const SIGNATURE_INVALID: &str = "TRUST_CERT_2003";
}

pub mod chain_validation {
    pub const DISTRUSTED: &str = "TRUST_CHAIN_3001";
}

pub mod harvest {
    pub const NETWORK_ERROR: &str = "TRUST_HARVEST_4001";
    pub const PARSE_ERROR: &str = "TRUST_HARVEST_4002";
    pub const SIGNATURE_INVALID: &str = "TRUST_HARVEST_4003";
    pub const SIGNATURE_EXPIRED: &str = "TRUST_HARVEST_4004";
    pub const TIME_SOURCE_FAILED: &str = "TRUST_HARVEST_4005";
}

pub mod initialization {
    pub const SEED_CERTIFICATE_UNREADABLE: &str = "TRUST_INIT_5001";
    pub const BOOTSTRAP_FAILED: &str = "TRUST_INIT_5002";
}

pub mod storage {
    pub const STATE_IO: &str = "TRUST_STORE_6001";
    pub const STATE_CORRUPT: &str = "TRUST_STORE_6002";
}

pub mod internal {
    pub const INTERNAL: &str = "TRUST_INTERNAL_9001";
}
