//! Subscription entitlement and Stripe-hosted checkout/portal sessions.

use crate::accounts::Identity;
use crate::config::env_string;
use crate::http::build_client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{info, warn};

const STRIPE_API_URL: &str = "https://api.stripe.com";
const DEFAULT_APP_BASE_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub subscribed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing is not configured")]
    NotConfigured,
    #[error("an email address is required for billing")]
    MissingEmail,
    #[error("no billing customer found for this user")]
    NoCustomer,
    #[error("billing request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn entitlement(&self, identity: &Identity) -> Result<Entitlement, BillingError>;

    async fn checkout_url(&self, identity: &Identity) -> Result<String, BillingError>;

    async fn portal_url(&self, identity: &Identity) -> Result<String, BillingError>;
}

/// Used when no Stripe key is set: nobody is subscribed, sessions are refused.
pub struct UnconfiguredBilling;

#[async_trait]
impl BillingProvider for UnconfiguredBilling {
    async fn entitlement(&self, _identity: &Identity) -> Result<Entitlement, BillingError> {
        Ok(Entitlement::default())
    }

    async fn checkout_url(&self, _identity: &Identity) -> Result<String, BillingError> {
        Err(BillingError::NotConfigured)
    }

    async fn portal_url(&self, _identity: &Identity) -> Result<String, BillingError> {
        Err(BillingError::NotConfigured)
    }
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_url: String,
    secret_key: String,
    price_id: Option<String>,
    app_base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<ListResponse<SubscriptionItem>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    price: Option<Price>,
}

#[derive(Debug, Deserialize)]
struct Price {
    #[serde(default)]
    product: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Session {
    url: String,
}

impl Subscription {
    fn first_item(&self) -> Option<&SubscriptionItem> {
        self.items.as_ref().and_then(|items| items.data.first())
    }

    fn into_entitlement(self) -> Entitlement {
        let item = self.first_item();
        let period_end = self
            .current_period_end
            .or_else(|| item.and_then(|item| item.current_period_end));
        Entitlement {
            subscribed: true,
            subscription_end: period_end.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            product_id: item
                .and_then(|item| item.price.as_ref())
                .and_then(|price| price.product.clone()),
        }
    }
}

impl StripeClient {
    pub fn from_env() -> Option<Self> {
        let secret_key = env_string("STRIPE_SECRET_KEY")?;
        let price_id = env_string("STRIPE_PRICE_ID");
        if price_id.is_none() {
            warn!(
                target = "licita.billing",
                "STRIPE_PRICE_ID missing; checkout sessions are disabled"
            );
        }
        Some(Self::new(
            STRIPE_API_URL.to_string(),
            secret_key,
            price_id,
            env_string("APP_BASE_URL").unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string()),
        ))
    }

    pub fn new(
        api_url: String,
        secret_key: String,
        price_id: Option<String>,
        app_base_url: String,
    ) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            secret_key,
            price_id,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
            http: build_client(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}/v1/{path}", self.api_url))
            .basic_auth(&self.secret_key, None::<&str>)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}/v1/{path}", self.api_url))
            .basic_auth(&self.secret_key, None::<&str>)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BillingError> {
        let response = request
            .send()
            .await
            .map_err(|err| BillingError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                target = "licita.billing",
                status = status.as_u16(),
                "stripe request failed"
            );
            return Err(BillingError::Request(format!("HTTP {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| BillingError::Request(err.to_string()))
    }

    async fn find_customer(&self, email: &str) -> Result<Option<String>, BillingError> {
        let customers: ListResponse<Customer> = self
            .send(self.get("customers").query(&[("email", email), ("limit", "1")]))
            .await?;
        Ok(customers.data.into_iter().next().map(|customer| customer.id))
    }
}

fn email_of(identity: &Identity) -> Result<&str, BillingError> {
    identity
        .email
        .as_deref()
        .filter(|email| !email.trim().is_empty())
        .ok_or(BillingError::MissingEmail)
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn entitlement(&self, identity: &Identity) -> Result<Entitlement, BillingError> {
        let email = email_of(identity)?;
        let Some(customer) = self.find_customer(email).await? else {
            return Ok(Entitlement::default());
        };
        let subscriptions: ListResponse<Subscription> = self
            .send(self.get("subscriptions").query(&[
                ("customer", customer.as_str()),
                ("status", "active"),
                ("limit", "1"),
            ]))
            .await?;
        let entitlement = subscriptions
            .data
            .into_iter()
            .next()
            .map(Subscription::into_entitlement)
            .unwrap_or_default();
        info!(
            target = "licita.billing",
            user_id = %identity.user_id,
            subscribed = entitlement.subscribed,
            "entitlement checked"
        );
        Ok(entitlement)
    }

    async fn checkout_url(&self, identity: &Identity) -> Result<String, BillingError> {
        let price = self.price_id.as_deref().ok_or(BillingError::NotConfigured)?;
        let email = email_of(identity)?;
        let customer = self.find_customer(email).await?;
        let success_url = format!("{}/?checkout=success", self.app_base_url);
        let cancel_url = format!("{}/?checkout=cancel", self.app_base_url);

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];
        match customer.as_deref() {
            Some(id) => form.push(("customer", id)),
            None => form.push(("customer_email", email)),
        }

        let session: Session = self.send(self.post("checkout/sessions").form(&form)).await?;
        info!(
            target = "licita.billing",
            user_id = %identity.user_id,
            "checkout session created"
        );
        Ok(session.url)
    }

    async fn portal_url(&self, identity: &Identity) -> Result<String, BillingError> {
        let email = email_of(identity)?;
        let customer = self
            .find_customer(email)
            .await?
            .ok_or(BillingError::NoCustomer)?;
        let return_url = format!("{}/", self.app_base_url);
        let session: Session = self
            .send(
                self.post("billing_portal/sessions")
                    .form(&[("customer", customer.as_str()), ("return_url", return_url.as_str())]),
            )
            .await?;
        Ok(session.url)
    }
}
