//! Company directory - where the listed companies come from.
//!
//! Listings are read once at startup. From then on every room owns its own
//! live prices and the directory is never consulted again.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::core::{CompanyListing, Error, Result};
use crate::market::catalog;

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Fetch every listed company
    async fn companies(&self) -> Result<Vec<CompanyListing>>;

    fn name(&self) -> &str;
}

/// In-process list, the built-in catalog by default.
pub struct StaticDirectory {
    listings: Vec<CompanyListing>,
}

impl StaticDirectory {
    pub fn new(listings: Vec<CompanyListing>) -> Self {
        Self { listings }
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new(catalog::default_companies())
    }
}

#[async_trait]
impl CompanyDirectory for StaticDirectory {
    async fn companies(&self) -> Result<Vec<CompanyListing>> {
        validate(self.listings.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Directory served over HTTP as a JSON array of listings.
pub struct RestDirectory {
    url: String,
    client: reqwest::Client,
}

impl RestDirectory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompanyDirectory for RestDirectory {
    async fn companies(&self) -> Result<Vec<CompanyListing>> {
        let listings = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<CompanyListing>>()
            .await?;
        validate(listings)
    }

    fn name(&self) -> &str {
        "rest"
    }
}

/// Reject lists a room could not trade on.
fn validate(listings: Vec<CompanyListing>) -> Result<Vec<CompanyListing>> {
    if listings.is_empty() {
        return Err(Error::Directory("no companies listed".into()));
    }
    let mut seen = HashSet::new();
    for l in &listings {
        if !seen.insert(l.id) {
            return Err(Error::Directory(format!("duplicate company id {}", l.id)));
        }
        if l.current_price <= rust_decimal::Decimal::ZERO {
            return Err(Error::Directory(format!("{} has no positive price", l.symbol)));
        }
    }
    Ok(listings)
}
