//! Buyer resolution through the payment processor's lookup API.
//!
//! Lookups happen before any ledger write and outside any transaction. A
//! "not found" answer is a normal outcome (`Ok(None)`); only transport
//! failures and timeouts become `BuyerLookupFailed`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rusqlite::Connection;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{User, UserSource};

/// A processor-side transaction, as far as buyer resolution needs it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorTransaction {
    #[serde(default)]
    pub uuid: Option<String>,
    /// Resource URI of the paying buyer
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorBuyer {
    #[serde(default)]
    pub uuid: Option<String>,
    pub email: Option<String>,
}

#[async_trait::async_trait]
pub trait PaymentsApi: Send + Sync {
    /// Transaction recorded by the processor for a contribution uuid.
    async fn get_transaction(
        &self,
        contribution_uuid: &str,
    ) -> Result<Option<ProcessorTransaction>>;

    /// Buyer behind a resource URI taken from a transaction.
    async fn get_buyer(&self, resource_uri: &str) -> Result<Option<ProcessorBuyer>>;

    /// Buyer by the processor-assigned reference sent with free purchases.
    async fn get_buyer_by_uuid(&self, buyer_uuid: &str) -> Result<Option<ProcessorBuyer>>;
}

/// Find the buyer email for a confirmed purchase.
///
/// Paid purchases go transaction -> buyer -> email. Free and simulated
/// purchases use the buyer reference carried in the notice; without one the
/// purchase is anonymous and `Ok(None)` is returned. A processor that does not
/// know the transaction or buyer also yields `Ok(None)`, so the purchase is
/// still recorded.
pub async fn lookup_buyer_email(
    api: &dyn PaymentsApi,
    free_or_simulated: bool,
    contribution_uuid: &str,
    solitude_buyer_uuid: Option<&str>,
) -> Result<Option<String>> {
    let buyer = if free_or_simulated {
        let Some(buyer_uuid) = solitude_buyer_uuid else {
            tracing::debug!(
                "No buyer reference for free purchase {}, leaving it anonymous",
                contribution_uuid
            );
            return Ok(None);
        };
        api.get_buyer_by_uuid(buyer_uuid).await?
    } else {
        let Some(transaction) = api.get_transaction(contribution_uuid).await? else {
            tracing::warn!("Processor has no transaction for {}", contribution_uuid);
            return Ok(None);
        };
        let Some(uri) = transaction.buyer else {
            tracing::warn!("Transaction for {} has no buyer", contribution_uuid);
            return Ok(None);
        };
        api.get_buyer(&uri).await?
    };

    let email = buyer.and_then(|b| b.email).filter(|e| !e.is_empty());
    if email.is_none() {
        tracing::warn!("No buyer email found for contribution {}", contribution_uuid);
    }
    Ok(email)
}

/// Local user for a processor buyer, created with the payment-flow origin
/// marker when missing.
pub fn resolve_buyer(conn: &Connection, buyer_email: &str) -> Result<User> {
    queries::get_or_create_user(conn, buyer_email, UserSource::Webpay)
}

/// HTTP client for the processor's generic REST API.
#[derive(Clone)]
pub struct SolitudeClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    objects: Vec<T>,
}

impl SolitudeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::BuyerLookupFailed(format!("GET {}: {}", url, e)))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => resp
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| AppError::BuyerLookupFailed(format!("GET {}: {}", url, e))),
            status => Err(AppError::BuyerLookupFailed(format!(
                "GET {} returned {}",
                url, status
            ))),
        }
    }

    async fn get_single<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let list: Option<ObjectList<T>> = self.get_json(path, query).await?;
        Ok(list.and_then(|l| l.objects.into_iter().next()))
    }
}

#[async_trait::async_trait]
impl PaymentsApi for SolitudeClient {
    async fn get_transaction(
        &self,
        contribution_uuid: &str,
    ) -> Result<Option<ProcessorTransaction>> {
        self.get_single("/generic/transaction/", &[("uuid", contribution_uuid)])
            .await
    }

    async fn get_buyer(&self, resource_uri: &str) -> Result<Option<ProcessorBuyer>> {
        self.get_json(resource_uri, &[]).await
    }

    async fn get_buyer_by_uuid(&self, buyer_uuid: &str) -> Result<Option<ProcessorBuyer>> {
        self.get_single("/generic/buyer/", &[("uuid", buyer_uuid)])
            .await
    }
}
