//! Webpay ledger - payment confirmation protocol and contribution ledger
//!
//! Issues signed purchase-request tokens, verifies the processor's signed
//! postbacks and chargeback notices, and keeps the contribution ledger,
//! app ownership and refund requests consistent under redelivery.

pub mod buyer;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod jwt;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod products;
pub mod refunds;
