//! crates/exam_report_core/src/billing.rs
//!
//! Checkout trigger and webhook processing for the subscription plan.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Plan, Profile};
use crate::ports::{BillingService, DatabaseService, PortError, PortResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

//=========================================================================================
// Signatures
//=========================================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header")]
    Malformed,
    #[error("No signature matches the payload")]
    Mismatch,
    #[error("Signature timestamp outside the tolerance window")]
    Expired,
}

fn signature_hex(payload: &[u8], secret: &str, timestamp: i64) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a header value in the provider's `t=<ts>,v1=<hex>` format.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Option<String> {
    let signature = signature_hex(payload, secret, timestamp)?;
    Some(format!("t={},v1={}", timestamp, signature))
}

/// Checks a `t=<ts>,v1=<hex>[,v1=<hex>...]` header against the raw body.
/// Any matching `v1` entry is accepted.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
            }
            Some(("v1", value)) => candidates.push(value),
            Some(_) => {}
            None => return Err(SignatureError::Malformed),
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let expected = signature_hex(payload, secret, timestamp).ok_or(SignatureError::Mismatch)?;
    let matched = candidates
        .iter()
        .any(|c| bool::from(c.as_bytes().ct_eq(expected.as_bytes())));
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

//=========================================================================================
// Events
//=========================================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

/// The part of a completed checkout session the plan update needs.
#[derive(Debug, Deserialize)]
pub struct CompletedCheckout {
    pub customer: String,
    pub subscription: String,
}

/// Subscription status to plan. Anything but `active`/`trialing` drops to free.
pub fn plan_for_status(status: &str) -> (Plan, bool) {
    match status {
        "active" | "trialing" => (Plan::Premium, true),
        _ => (Plan::Free, false),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    PlanUpdated { user_id: Uuid, plan: Plan },
    Ignored { kind: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("Webhook payload could not be parsed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Verifies and applies provider webhooks.
pub struct WebhookProcessor {
    db: Arc<dyn DatabaseService>,
    billing: Arc<dyn BillingService>,
    secret: String,
}

impl WebhookProcessor {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        billing: Arc<dyn BillingService>,
        secret: String,
    ) -> Self {
        Self { db, billing, secret }
    }

    /// Verifies the signature, then applies the event. Nothing is written unless the
    /// signature is valid and every lookup succeeds.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookOutcome, WebhookError> {
        if let Err(e) = verify_signature(payload, signature, &self.secret, now) {
            warn!("Rejected webhook: {}", e);
            return Err(e.into());
        }

        let event: WebhookEvent = serde_json::from_slice(payload)?;
        if event.kind != CHECKOUT_COMPLETED {
            info!("Acknowledging unhandled webhook event '{}'.", event.kind);
            return Ok(WebhookOutcome::Ignored { kind: event.kind });
        }

        let checkout: CompletedCheckout = serde_json::from_value(event.data.object)?;
        let profile = self.db.get_profile_by_customer(&checkout.customer).await?;
        let subscription = self.billing.retrieve_subscription(&checkout.subscription).await?;
        let (plan, active) = plan_for_status(&subscription.status);

        self.db
            .update_plan(profile.id, plan, active, &subscription.id)
            .await
            .map_err(|e| {
                error!("Failed to update plan for {}: {:?}", profile.id, e);
                e
            })?;

        info!(
            user_id = %profile.id,
            plan = plan.as_str(),
            status = %subscription.status,
            "Plan updated from checkout webhook."
        );
        Ok(WebhookOutcome::PlanUpdated {
            user_id: profile.id,
            plan,
        })
    }
}

//=========================================================================================
// Checkout
//=========================================================================================

/// Ensures the profile has a provider customer, then opens a checkout session.
/// Returns the checkout session id.
pub async fn start_checkout(
    db: &dyn DatabaseService,
    billing: &dyn BillingService,
    profile: &Profile,
    email: Option<&str>,
) -> PortResult<String> {
    let customer_id = match &profile.stripe_customer_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            let id = billing.create_customer(email.or(profile.email.as_deref()), profile.id).await?;
            db.set_customer_id(profile.id, &id).await?;
            info!(user_id = %profile.id, "Created billing customer.");
            id
        }
    };

    billing.create_checkout_session(&customer_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBilling, FakeDb};

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    fn completed_event(customer: &str, subscription: &str) -> Vec<u8> {
        serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "customer": customer, "subscription": subscription } }
        })
        .to_string()
        .into_bytes()
    }

    fn setup(plan: Plan, status: &str) -> (Arc<FakeDb>, WebhookProcessor, Profile) {
        let db = Arc::new(FakeDb::default());
        let mut profile = FakeDb::profile(plan);
        profile.stripe_customer_id = Some("cus_1".to_string());
        db.insert_profile(profile.clone());
        let billing = Arc::new(FakeBilling::with_subscription("sub_1", status));
        let processor = WebhookProcessor::new(db.clone(), billing, SECRET.to_string());
        (db, processor, profile)
    }

    #[test]
    fn signature_roundtrip_and_rejections() {
        let body = b"{\"type\":\"x\"}";
        let header = sign_payload(body, SECRET, NOW).unwrap();
        assert_eq!(verify_signature(body, Some(header.as_str()), SECRET, NOW + 10), Ok(()));

        assert_eq!(
            verify_signature(body, None, SECRET, NOW),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(
            verify_signature(b"{\"type\":\"y\"}", Some(header.as_str()), SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(body, Some(header.as_str()), "other", NOW),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(
                body,
                Some(header.as_str()),
                SECRET,
                NOW + SIGNATURE_TOLERANCE_SECS + 1
            ),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_signature(body, Some("v1=abc"), SECRET, NOW),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn any_v1_entry_may_match() {
        let body = b"payload";
        let valid = sign_payload(body, SECRET, NOW).unwrap();
        let v1 = valid.split_once("v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v1={v1}");
        assert_eq!(verify_signature(body, Some(header.as_str()), SECRET, NOW), Ok(()));
    }

    #[test]
    fn status_maps_to_plan() {
        assert_eq!(plan_for_status("active"), (Plan::Premium, true));
        assert_eq!(plan_for_status("trialing"), (Plan::Premium, true));
        assert_eq!(plan_for_status("canceled"), (Plan::Free, false));
        assert_eq!(plan_for_status("past_due"), (Plan::Free, false));
    }

    #[tokio::test]
    async fn active_subscription_upgrades_to_premium() {
        let (db, processor, profile) = setup(Plan::Free, "active");
        let body = completed_event("cus_1", "sub_1");
        let header = sign_payload(&body, SECRET, NOW).unwrap();

        let outcome = processor.handle(&body, Some(header.as_str()), NOW).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::PlanUpdated {
                user_id: profile.id,
                plan: Plan::Premium
            }
        );
        let stored = db.stored_profile(profile.id).unwrap();
        assert_eq!(stored.plan, Plan::Premium);
        assert!(stored.plan_active);
        assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn canceled_subscription_downgrades_to_free() {
        let (db, processor, profile) = setup(Plan::Premium, "canceled");
        let body = completed_event("cus_1", "sub_1");
        let header = sign_payload(&body, SECRET, NOW).unwrap();

        processor.handle(&body, Some(header.as_str()), NOW).await.unwrap();
        let stored = db.stored_profile(profile.id).unwrap();
        assert_eq!(stored.plan, Plan::Free);
        assert!(!stored.plan_active);
    }

    #[tokio::test]
    async fn invalid_signature_changes_nothing() {
        let (db, processor, profile) = setup(Plan::Free, "active");
        let body = completed_event("cus_1", "sub_1");
        let header = sign_payload(&body, "wrong_secret", NOW).unwrap();

        let err = processor.handle(&body, Some(header.as_str()), NOW).await.unwrap_err();
        assert!(matches!(err, WebhookError::Signature(SignatureError::Mismatch)));
        assert_eq!(db.stored_profile(profile.id).unwrap().plan, Plan::Free);
        assert_eq!(db.plan_updates(), 0);
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found_and_other_events_are_ignored() {
        let (db, processor, _) = setup(Plan::Free, "active");
        let body = completed_event("cus_unknown", "sub_1");
        let header = sign_payload(&body, SECRET, NOW).unwrap();
        let err = processor.handle(&body, Some(header.as_str()), NOW).await.unwrap_err();
        assert!(matches!(err, WebhookError::Port(PortError::NotFound(_))));

        let body = br#"{"type":"invoice.paid","data":{"object":{}}}"#;
        let header = sign_payload(body, SECRET, NOW).unwrap();
        let outcome = processor.handle(body, Some(header.as_str()), NOW).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                kind: "invoice.paid".to_string()
            }
        );
        assert_eq!(db.plan_updates(), 0);
    }

    #[tokio::test]
    async fn checkout_creates_the_customer_once() {
        let db = FakeDb::default();
        let billing = FakeBilling::with_subscription("sub_1", "active");
        let profile = FakeDb::profile(Plan::Free);
        db.insert_profile(profile.clone());

        let session = start_checkout(&db, &billing, &profile, Some("medica@example.com"))
            .await
            .unwrap();
        assert_eq!(session, "cs_test_cus_test_1");
        assert_eq!(billing.customers_created(), 1);
        let stored = db.stored_profile(profile.id).unwrap();
        assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_test_1"));

        start_checkout(&db, &billing, &stored, None).await.unwrap();
        assert_eq!(billing.customers_created(), 1);
    }
}
