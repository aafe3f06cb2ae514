use std::env;
use std::time::Duration;

use crate::jwt::Algorithm;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub media_url: String,
    pub dev_mode: bool,
    /// External-id namespace, e.g. `marketplace` for `marketplace.example.com`
    pub domain: Option<String>,
    pub purchase: PurchaseTokenConfig,
    pub solitude_url: String,
    pub solitude_timeout: Duration,
    pub postback_deadline: Duration,
    pub notification_webhook_url: Option<String>,
}

/// Settings for the tokens exchanged with the payment processor.
#[derive(Debug, Clone)]
pub struct PurchaseTokenConfig {
    pub issuer: String,
    pub audience: String,
    pub typ: String,
    pub sig_check_typ: String,
    pub secret: String,
    pub allowed_algorithms: Vec<Algorithm>,
    pub rs512_public_key_pem: Option<String>,
    /// Lifetime of issued tokens, in seconds
    pub expiry_secs: u64,
}

impl Default for PurchaseTokenConfig {
    fn default() -> Self {
        Self {
            issuer: "marketplace-dev".to_string(),
            audience: "marketplace-dev.allizom.org".to_string(),
            typ: "mozilla-dev/payments/pay/v1".to_string(),
            sig_check_typ: "mozilla/payments/sigcheck/v1".to_string(),
            secret: "please change this".to_string(),
            allowed_algorithms: vec![Algorithm::HS256],
            rs512_public_key_pem: None,
            expiry_secs: 3600,
        }
    }
}

fn parse_algorithms(raw: &str) -> Vec<Algorithm> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|name| match Algorithm::from_name(name) {
            Some(alg) => Some(alg),
            None => {
                tracing::warn!("Ignoring unknown signing algorithm in WEBPAY_ALLOWED_ALGS: {}", name);
                None
            }
        })
        .collect()
}

fn env_secs(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("WEBPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));
        let media_url = env::var("MEDIA_URL").unwrap_or_else(|_| format!("{}/media", base_url));

        let defaults = PurchaseTokenConfig::default();
        let allowed_algorithms = env::var("WEBPAY_ALLOWED_ALGS")
            .map(|v| parse_algorithms(&v))
            .unwrap_or(defaults.allowed_algorithms);

        let rs512_public_key_pem = env::var("WEBPAY_RS512_PUBLIC_KEY_FILE").ok().and_then(|path| {
            std::fs::read_to_string(&path)
                .map_err(|e| tracing::error!("Failed to read RS512 public key {}: {}", path, e))
                .ok()
        });

        let purchase = PurchaseTokenConfig {
            issuer: env::var("APP_PURCHASE_KEY").unwrap_or(defaults.issuer),
            audience: env::var("APP_PURCHASE_AUD").unwrap_or(defaults.audience),
            typ: env::var("APP_PURCHASE_TYP").unwrap_or(defaults.typ),
            sig_check_typ: env::var("SIG_CHECK_TYP").unwrap_or(defaults.sig_check_typ),
            secret: env::var("APP_PURCHASE_SECRET").unwrap_or(defaults.secret),
            allowed_algorithms,
            rs512_public_key_pem,
            expiry_secs: env_secs("WEBPAY_EXPIRY_SECS", defaults.expiry_secs),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "webpay.db".to_string()),
            base_url,
            media_url,
            dev_mode,
            domain: env::var("DOMAIN").ok().filter(|d| !d.is_empty()),
            purchase,
            solitude_url: env::var("SOLITUDE_URL")
                .unwrap_or_else(|_| "http://localhost:2602".to_string()),
            solitude_timeout: Duration::from_secs(env_secs("SOLITUDE_TIMEOUT_SECS", 10)),
            postback_deadline: Duration::from_secs(env_secs("POSTBACK_DEADLINE_SECS", 20)),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Namespace used in external product ids: the first label of `DOMAIN`.
    pub fn external_id_namespace(&self) -> &str {
        self.domain
            .as_deref()
            .and_then(|d| d.split('.').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("marketplace-dev")
    }
}
