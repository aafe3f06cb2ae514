//! Prefixed ID generation for ledger entities.
//!
//! Row ids use a `wl_` brand prefix so they can never be mistaken for the
//! payment processor's transaction ids or for contribution correlation uuids.
//!
//! Format: `wl_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &[
    "wl_usr_", "wl_app_", "wl_iap_", "wl_con_", "wl_ref_", "wl_own_",
];

/// Cheap format check for a ledger id: `wl_{entity}_{32_hex_chars}`.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    Webapp,
    InAppProduct,
    Contribution,
    Refund,
    AppPurchase,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "wl_usr",
            Self::Webapp => "wl_app",
            Self::InAppProduct => "wl_iap",
            Self::Contribution => "wl_con",
            Self::Refund => "wl_ref",
            Self::AppPurchase => "wl_own",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// New correlation uuid for an outbound purchase request.
pub fn gen_contrib_uuid() -> String {
    Uuid::new_v4().to_string()
}
