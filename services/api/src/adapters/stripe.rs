//! services/api/src/adapters/stripe.rs
//!
//! Billing adapter implementing `BillingService` with form-encoded calls to the
//! Stripe REST API.

use async_trait::async_trait;
use exam_report_core::domain::Subscription;
use exam_report_core::ports::{BillingService, PortError, PortResult};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
}

#[derive(Clone)]
pub struct StripeAdapter {
    client: reqwest::Client,
    secret_key: String,
    price_id: String,
    app_url: String,
    api_base: String,
}

impl StripeAdapter {
    pub fn new(
        client: reqwest::Client,
        secret_key: String,
        price_id: String,
        app_url: String,
    ) -> Self {
        Self {
            client,
            secret_key,
            price_id,
            app_url,
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> PortResult<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!("Billing request '{}' failed: {:?}", what, e);
                PortError::Unexpected(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PortError::NotFound(format!("{} not found", what)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Billing provider rejected '{}' with {}: {}", what, status, body);
            return Err(PortError::Unexpected(format!("billing provider returned {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

/// Return URLs for a checkout started from `app_url`.
pub fn checkout_return_urls(app_url: &str) -> (String, String) {
    (
        format!("{}?payment=success", app_url),
        format!("{}?payment=cancelled", app_url),
    )
}

#[async_trait]
impl BillingService for StripeAdapter {
    async fn create_customer(&self, email: Option<&str>, user_id: Uuid) -> PortResult<String> {
        let user_id = user_id.to_string();
        let mut form = vec![("metadata[user_id]", user_id.as_str())];
        if let Some(email) = email {
            form.push(("email", email));
        }

        let customer: IdObject = self
            .send(
                self.client
                    .post(format!("{}/customers", self.api_base))
                    .form(&form),
                "customer",
            )
            .await?;
        info!(customer_id = %customer.id, "Created billing customer.");
        Ok(customer.id)
    }

    async fn create_checkout_session(&self, customer_id: &str) -> PortResult<String> {
        let (success_url, cancel_url) = checkout_return_urls(&self.app_url);
        let form = [
            ("payment_method_types[0]", "card"),
            ("customer", customer_id),
            ("line_items[0][price]", self.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("mode", "subscription"),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let session: IdObject = self
            .send(
                self.client
                    .post(format!("{}/checkout/sessions", self.api_base))
                    .form(&form),
                "checkout session",
            )
            .await?;
        Ok(session.id)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> PortResult<Subscription> {
        let subscription: SubscriptionObject = self
            .send(
                self.client
                    .get(format!("{}/subscriptions/{}", self.api_base, subscription_id)),
                "subscription",
            )
            .await?;
        Ok(Subscription {
            id: subscription.id,
            status: subscription.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_urls_carry_the_payment_marker() {
        let (success, cancel) = checkout_return_urls("http://localhost:5173");
        assert_eq!(success, "http://localhost:5173?payment=success");
        assert_eq!(cancel, "http://localhost:5173?payment=cancelled");
    }
}
