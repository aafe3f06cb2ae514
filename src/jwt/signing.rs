use jwt_simple::prelude::*;

use crate::config::PurchaseTokenConfig;
use crate::error::{AppError, Result};

use super::PaymentClaims;

/// Signing algorithms a processor notice may use. Anything not listed here is
/// rejected from the header alone, before any key is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    HS256,
    RS512,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Self::HS256),
            "RS512" => Some(Self::RS512),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS512 => "RS512",
        }
    }
}

/// Verification accepts any timestamp; the lifetime checks live in
/// `validate` so an expired token is reported as such rather than as a
/// verification failure.
const TIME_TOLERANCE_DAYS: u64 = 3650;

/// Keys for the tokens exchanged with the payment processor.
pub struct TokenKeys {
    config: PurchaseTokenConfig,
    hs256: HS256Key,
    rs512: Option<RS512PublicKey>,
}

impl TokenKeys {
    pub fn from_config(config: &PurchaseTokenConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(AppError::Configuration(
                "APP_PURCHASE_SECRET is empty".to_string(),
            ));
        }

        let rs512 = match &config.rs512_public_key_pem {
            Some(pem) => Some(RS512PublicKey::from_pem(pem).map_err(|e| {
                AppError::Configuration(format!("Invalid RS512 public key: {}", e))
            })?),
            None => None,
        };

        Ok(Self {
            config: config.clone(),
            hs256: HS256Key::from_bytes(config.secret.as_bytes()),
            rs512,
        })
    }

    pub fn config(&self) -> &PurchaseTokenConfig {
        &self.config
    }

    /// Sign claims with `iat = now` and `exp = now + expiry window`.
    /// Outbound tokens are always HS256 with the shared secret.
    pub fn sign(&self, custom: PaymentClaims, now: i64) -> Result<String> {
        let issued_at = now.max(0) as u64;
        let mut claims =
            Claims::with_custom_claims(custom, Duration::from_secs(self.config.expiry_secs));
        claims.issued_at = Some(Duration::from_secs(issued_at));
        claims.expires_at = Some(Duration::from_secs(issued_at + self.config.expiry_secs));
        claims.invalid_before = None;

        let claims = claims
            .with_issuer(&self.config.issuer)
            .with_audience(&self.config.audience);

        self.hs256
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify a processor notice. Order of checks: header parse, algorithm
    /// allow-list, signature. Time validity is left to `validate`.
    pub fn decode(&self, token: &str) -> Result<JWTClaims<PaymentClaims>> {
        let metadata = Token::decode_metadata(token)
            .map_err(|e| AppError::MalformedToken(format!("Invalid token format: {}", e)))?;

        let name = metadata.algorithm();
        let algorithm = Algorithm::from_name(name)
            .filter(|alg| self.config.allowed_algorithms.contains(alg))
            .ok_or_else(|| AppError::UnsupportedAlgorithm(name.to_string()))?;

        let options = VerificationOptions {
            time_tolerance: Some(Duration::from_days(TIME_TOLERANCE_DAYS)),
            ..Default::default()
        };

        let verified = match algorithm {
            Algorithm::HS256 => self
                .hs256
                .verify_token::<PaymentClaims>(token, Some(options)),
            Algorithm::RS512 => {
                let key = self.rs512.as_ref().ok_or_else(|| {
                    AppError::UnsupportedAlgorithm("RS512 (no public key configured)".to_string())
                })?;
                key.verify_token::<PaymentClaims>(token, Some(options))
            }
        };

        verified.map_err(|e| match e.downcast_ref::<jwt_simple::JWTError>() {
            Some(jwt_simple::JWTError::InvalidAuthenticationTag)
            | Some(jwt_simple::JWTError::InvalidSignature) => AppError::InvalidSignature,
            _ => AppError::MalformedToken(e.to_string()),
        })
    }
}
