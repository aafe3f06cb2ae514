//! Purchasable products and their `productData` encoding.
//!
//! A product is either a catalog app or a product sold from inside an app.
//! It is resolved from the catalog on every request and never cached.

use std::collections::BTreeMap;

use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::jwt::{PaymentClaims, PurchaseRequest, TokenKeys};
use crate::models::{Contribution, InAppProduct, ProductRef, Webapp};

pub const APP_ICON_SIZES: [u32; 5] = [16, 32, 48, 64, 128];
const DEFAULT_INAPP_ICON: &str = "img/mkt/icons/rocket-64.png";

#[derive(Debug, Clone)]
pub enum Product {
    App(Webapp),
    InApp {
        inapp: InAppProduct,
        /// Owning app; absent for stub simulation products
        webapp: Option<Webapp>,
    },
}

impl Product {
    pub fn id(&self) -> &str {
        match self {
            Product::App(app) => &app.id,
            Product::InApp { inapp, .. } => &inapp.id,
        }
    }

    pub fn product_ref(&self) -> ProductRef {
        match self {
            Product::App(app) => ProductRef::Webapp(app.id.clone()),
            Product::InApp { inapp, .. } => ProductRef::InApp(inapp.id.clone()),
        }
    }

    /// `{namespace}:{id}` for apps, `inapp.{namespace}:{id}` for in-app products.
    pub fn external_id(&self, namespace: &str) -> String {
        match self {
            Product::App(app) => format!("{}:{}", namespace, app.id),
            Product::InApp { inapp, .. } => format!("inapp.{}:{}", namespace, inapp.id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Product::App(app) => &app.name,
            Product::InApp { inapp, .. } => &inapp.name,
        }
    }

    /// Description with markup removed; in-app products borrow their app's.
    pub fn description(&self) -> String {
        let raw = match self {
            Product::App(app) => app.description.as_str(),
            Product::InApp { webapp, .. } => {
                webapp.as_ref().map(|w| w.description.as_str()).unwrap_or("")
            }
        };
        strip_tags(raw)
    }

    pub fn icons(&self, media_url: &str) -> BTreeMap<String, String> {
        let media_url = media_url.trim_end_matches('/');
        match self {
            Product::App(app) => APP_ICON_SIZES
                .iter()
                .map(|size| {
                    let url = if app.has_icon {
                        format!("{}/app_icons/{}-{}.png", media_url, app.id, size)
                    } else {
                        format!("{}/img/hub/default-{}.png", media_url, size)
                    };
                    (size.to_string(), url)
                })
                .collect(),
            Product::InApp { inapp, .. } => {
                let url = inapp
                    .logo_url
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", media_url, DEFAULT_INAPP_ICON));
                BTreeMap::from([("64".to_string(), url)])
            }
        }
    }

    pub fn price_point(&self) -> Option<&str> {
        match self {
            Product::App(app) => app.price_point.as_deref(),
            Product::InApp { inapp, .. } => Some(&inapp.price_point),
        }
    }

    pub fn price(&self) -> Option<(Decimal, &str)> {
        match self {
            Product::App(app) => app.price_amount.map(|p| (p, app.currency.as_str())),
            Product::InApp { inapp, .. } => Some((inapp.price_amount, inapp.currency.as_str())),
        }
    }

    /// Always `None` for in-app products.
    pub fn application_size(&self) -> Option<i64> {
        match self {
            Product::App(app) => app.application_size,
            Product::InApp { .. } => None,
        }
    }

    /// The processor's seller-product id of the app being paid for.
    pub fn public_id(&self) -> Option<&str> {
        let app = match self {
            Product::App(app) => Some(app),
            Product::InApp { webapp, .. } => webapp.as_ref(),
        };
        app.and_then(|a| a.solitude_public_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Where developer-facing notifications (refund requests, chargebacks) go.
    pub fn developer_email(&self) -> Option<&str> {
        let app = match self {
            Product::App(app) => Some(app),
            Product::InApp { webapp, .. } => webapp.as_ref(),
        };
        app.and_then(|a| a.support_email.as_deref().or(a.developer_email.as_deref()))
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self, Product::InApp { inapp, .. } if inapp.is_simulation())
    }

    /// Free and simulated products identify their buyer by a processor buyer
    /// reference in the notice rather than by a paid transaction.
    pub fn is_free_simulated(&self) -> bool {
        matches!(self, Product::InApp { inapp, .. } if inapp.is_free_simulated())
    }

    /// App whose ownership a purchase of this product materializes.
    /// In-app and simulated purchases never create ownership.
    pub fn owned_webapp_id(&self) -> Option<&str> {
        match self {
            Product::App(app) => Some(&app.id),
            Product::InApp { .. } => None,
        }
    }

    pub fn product_data(&self, contribution: &Contribution) -> ProductData {
        ProductData {
            contrib_uuid: contribution.uuid.clone(),
            product: self.product_ref(),
            public_id: self.public_id().map(str::to_string),
            application_size: self.application_size(),
            buyer_email: None,
        }
    }
}

/// Decoded form of the opaque `productData` string.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductData {
    pub contrib_uuid: String,
    pub product: ProductRef,
    pub public_id: Option<String>,
    pub application_size: Option<i64>,
    pub buyer_email: Option<String>,
}

impl ProductData {
    pub fn with_buyer_email(mut self, email: Option<String>) -> Self {
        self.buyer_email = email;
        self
    }

    /// URL-encode as `contrib_uuid=..&addon_id=..&public_id=..&application_size=..`.
    /// Absent values are encoded as empty strings.
    pub fn encode(&self) -> String {
        let mut out = url::form_urlencoded::Serializer::new(String::new());
        out.append_pair("contrib_uuid", &self.contrib_uuid);
        match &self.product {
            ProductRef::Webapp(id) => out.append_pair("addon_id", id),
            ProductRef::InApp(id) => out.append_pair("inapp_id", id),
        };
        out.append_pair("public_id", self.public_id.as_deref().unwrap_or(""));
        out.append_pair(
            "application_size",
            &self.application_size.map(|s| s.to_string()).unwrap_or_default(),
        );
        if let Some(email) = &self.buyer_email {
            out.append_pair("buyer_email", email);
        }
        out.finish()
    }

    /// Parse a `productData` string. When both product keys are present the
    /// in-app key wins, since older request tokens carried the owning app too.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_empty());

        let contrib_uuid =
            take("contrib_uuid").ok_or(AppError::MissingClaim("productData.contrib_uuid"))?;
        let inapp_id = take("inapp_id");
        let addon_id = take("addon_id");
        let product = match (inapp_id, addon_id) {
            (Some(id), _) => ProductRef::InApp(id),
            (None, Some(id)) => ProductRef::Webapp(id),
            (None, None) => {
                return Err(AppError::UnknownProduct(format!(
                    "productData for {} names no product",
                    contrib_uuid
                )));
            }
        };
        let application_size = take("application_size").and_then(|s| s.parse().ok());

        Ok(Self {
            contrib_uuid,
            product,
            public_id: take("public_id"),
            application_size,
            buyer_email: take("buyer_email"),
        })
    }
}

/// Load the catalog entity a product reference names.
pub fn resolve(conn: &Connection, product: &ProductRef) -> Result<Product> {
    match product {
        ProductRef::Webapp(id) => queries::get_webapp_by_id(conn, id)?
            .map(Product::App)
            .ok_or_else(|| AppError::UnknownProduct(format!("app {}", id))),
        ProductRef::InApp(id) => {
            let inapp = queries::get_inapp_product_by_id(conn, id)?
                .ok_or_else(|| AppError::UnknownProduct(format!("in-app product {}", id)))?;
            let webapp = match &inapp.webapp_id {
                Some(webapp_id) => Some(
                    queries::get_webapp_by_id(conn, webapp_id)?.ok_or_else(|| {
                        AppError::UnknownProduct(format!(
                            "app {} owning in-app product {}",
                            webapp_id, id
                        ))
                    })?,
                ),
                None => None,
            };
            Ok(Product::InApp { inapp, webapp })
        }
    }
}

/// Sign the purchase request the payment UI hands to the processor.
pub fn encode_request(
    keys: &TokenKeys,
    config: &Config,
    product: &Product,
    contribution: &Contribution,
    buyer_email: Option<String>,
    now: i64,
) -> Result<String> {
    let product_data = product
        .product_data(contribution)
        .with_buyer_email(buyer_email);
    if product_data.public_id.is_none() && !product.is_simulation() {
        return Err(AppError::Configuration(format!(
            "Cannot create a purchase token without a public_id for product {}",
            product.id()
        )));
    }

    let default_locale = match product {
        Product::App(app) => Some(app.default_locale.clone()),
        Product::InApp { webapp, .. } => webapp.as_ref().map(|w| w.default_locale.clone()),
    };
    let simulate = match product {
        Product::InApp { inapp, .. } => inapp.simulate.clone(),
        Product::App(_) => None,
    };
    let base_url = config.base_url.trim_end_matches('/');

    let claims = PaymentClaims {
        typ: keys.config().typ.clone(),
        request: PurchaseRequest {
            id: Some(product.external_id(config.external_id_namespace())),
            name: product.name().to_string(),
            description: product.description(),
            icons: product.icons(&config.media_url),
            price_point: product.price_point().map(str::to_string),
            default_locale,
            postback_url: Some(format!("{}/webpay/postback", base_url)),
            chargeback_url: Some(format!("{}/webpay/chargeback", base_url)),
            product_data: Some(product_data.encode()),
            simulate,
        },
        response: None,
    };

    tracing::debug!(
        "Preparing purchase token for product {} (contribution {})",
        product.id(),
        contribution.uuid
    );
    keys.sign(claims, now)
}

/// Remove markup, keeping only text content.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut chars = html.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // A bare `<` in text is not a tag
            '<' if !in_tag
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '/' || *n == '!') =>
            {
                in_tag = true
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
