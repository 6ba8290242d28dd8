// Copyright (C) 2025 Flowgate Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stripe billing webhook.
//!
//! Requests carry `Stripe-Signature: t=<unix ts>,v1=<hex hmac>`, where the
//! HMAC-SHA256 covers `"{t}.{raw body}"`. Subscription events update the
//! tenant's plan and trigger a downgrade check when the plan changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_core::audit::{AuditAction, AuditContext, AuditEvent, AuditLogger};
use flowgate_core::downgrade::DowngradeService;
use flowgate_core::error::Result;
use flowgate_core::models::Subscription;
use flowgate_core::persistence::Persistence;
use flowgate_core::plans::PlanTier;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook signature failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing Stripe-Signature header")]
    Missing,
    #[error("malformed Stripe-Signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature does not match payload")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
) -> std::result::Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let mac = signed_mac(payload, secret, timestamp)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Signature header value for `payload`, as Stripe would send it.
pub fn sign_payload(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> std::result::Result<String, SignatureError> {
    let mac = signed_mac(payload, secret, timestamp)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn signed_mac(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> std::result::Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// What the webhook did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub event_type: String,
    pub handled: bool,
    pub tenant_id: Option<String>,
    pub plan_changed: bool,
}

impl WebhookOutcome {
    fn ignored(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            handled: false,
            tenant_id: None,
            plan_changed: false,
        }
    }
}

/// Applies billing events to subscriptions.
#[derive(Clone)]
pub struct BillingService {
    persistence: Arc<dyn Persistence>,
    downgrade: DowngradeService,
    audit: AuditLogger,
}

impl BillingService {
    pub fn new(persistence: Arc<dyn Persistence>, downgrade: DowngradeService) -> Self {
        let audit = AuditLogger::new(persistence.clone());
        Self {
            persistence,
            downgrade,
            audit,
        }
    }

    /// Apply one verified event.
    pub async fn handle_event(&self, event: &Value) -> Result<WebhookOutcome> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let empty = Value::Null;
        let object = event.pointer("/data/object").unwrap_or(&empty);

        match event_type {
            "customer.subscription.created" | "customer.subscription.updated" => {
                let status = str_field(object, "status").unwrap_or("active");
                self.apply_subscription(event_type, object, plan_of(object), status)
                    .await
            }
            "customer.subscription.deleted" => {
                self.apply_subscription(event_type, object, PlanTier::Free, "canceled")
                    .await
            }
            "invoice.payment_failed" => self.mark_past_due(event_type, object).await,
            _ => {
                info!(event_type, "Ignoring billing event");
                Ok(WebhookOutcome::ignored(event_type))
            }
        }
    }

    async fn resolve_tenant(&self, object: &Value) -> Result<Option<(String, Option<Subscription>)>> {
        if let Some(tenant_id) = object.pointer("/metadata/tenant_id").and_then(Value::as_str) {
            let existing = self.persistence.get_subscription(tenant_id).await?;
            return Ok(Some((tenant_id.to_string(), existing)));
        }
        let Some(customer) = str_field(object, "customer") else {
            return Ok(None);
        };
        Ok(self
            .persistence
            .find_subscription_by_customer(customer)
            .await?
            .map(|s| (s.tenant_id.clone(), Some(s))))
    }

    async fn apply_subscription(
        &self,
        event_type: &str,
        object: &Value,
        plan: PlanTier,
        status: &str,
    ) -> Result<WebhookOutcome> {
        let Some((tenant_id, existing)) = self.resolve_tenant(object).await? else {
            warn!(event_type, "Billing event for unknown tenant");
            return Ok(WebhookOutcome::ignored(event_type));
        };

        let previous_plan = existing
            .as_ref()
            .map(|s| PlanTier::parse(&s.plan_tier))
            .unwrap_or(PlanTier::Free);
        let subscription = Subscription {
            tenant_id: tenant_id.clone(),
            stripe_customer_id: str_field(object, "customer")
                .map(str::to_string)
                .or_else(|| existing.as_ref().and_then(|s| s.stripe_customer_id.clone())),
            stripe_subscription_id: str_field(object, "id")
                .map(str::to_string)
                .or_else(|| existing.as_ref().and_then(|s| s.stripe_subscription_id.clone())),
            plan_tier: plan.as_str().to_string(),
            status: status.to_string(),
            current_period_end: object
                .get("current_period_end")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            updated_at: Utc::now(),
        };
        self.persistence.upsert_subscription(&subscription).await?;

        let ctx = AuditContext::system(&tenant_id);
        self.audit
            .record(
                &ctx,
                AuditEvent::new(AuditAction::BillingUpdate, "subscription", &tenant_id)
                    .old_value(json!({
                        "plan": previous_plan.as_str(),
                        "status": existing.as_ref().map(|s| s.status.clone()),
                    }))
                    .new_value(json!({
                        "plan": plan.as_str(),
                        "status": status,
                        "event": event_type,
                    })),
            )
            .await;

        let plan_changed = plan != previous_plan;
        if plan_changed {
            info!(
                tenant_id = %tenant_id,
                from = previous_plan.as_str(),
                to = plan.as_str(),
                "Plan changed"
            );
            self.downgrade.check_tenant(&ctx).await?;
        }

        Ok(WebhookOutcome {
            event_type: event_type.to_string(),
            handled: true,
            tenant_id: Some(tenant_id),
            plan_changed,
        })
    }

    async fn mark_past_due(&self, event_type: &str, object: &Value) -> Result<WebhookOutcome> {
        let Some((tenant_id, Some(mut subscription))) = self.resolve_tenant(object).await? else {
            warn!(event_type, "Payment failure for unknown subscription");
            return Ok(WebhookOutcome::ignored(event_type));
        };
        let previous_status = std::mem::replace(&mut subscription.status, "past_due".to_string());
        subscription.updated_at = Utc::now();
        self.persistence.upsert_subscription(&subscription).await?;

        self.audit
            .record(
                &AuditContext::system(&tenant_id),
                AuditEvent::new(AuditAction::BillingUpdate, "subscription", &tenant_id)
                    .old_value(json!({"status": previous_status}))
                    .new_value(json!({"status": "past_due", "event": event_type})),
            )
            .await;

        Ok(WebhookOutcome {
            event_type: event_type.to_string(),
            handled: true,
            tenant_id: Some(tenant_id),
            plan_changed: false,
        })
    }
}

fn str_field<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Plan named by `metadata.plan`, else by the first price's lookup key.
fn plan_of(object: &Value) -> PlanTier {
    if let Some(plan) = object.pointer("/metadata/plan").and_then(Value::as_str) {
        return PlanTier::parse(plan);
    }
    object
        .pointer("/items/data/0/price/lookup_key")
        .and_then(Value::as_str)
        .map(plan_from_lookup_key)
        .unwrap_or(PlanTier::Free)
}

/// `pro_monthly` → Pro.
fn plan_from_lookup_key(key: &str) -> PlanTier {
    PlanTier::parse(key.split(['_', '-']).next().unwrap_or(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_signature_roundtrip_and_tolerance() {
        let body = br#"{"type":"ping"}"#;
        let header = sign_payload(body, SECRET, 1_000).unwrap();

        assert_eq!(verify_signature(body, Some(&header), SECRET, 1_100), Ok(()));
        assert_eq!(
            verify_signature(body, Some(&header), SECRET, 1_000 + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_signature(b"{}", Some(&header), SECRET, 1_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(body, Some(&header), "other", 1_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_expired() {
        for ts in [i64::MIN, i64::MAX] {
            let header = format!("t={ts},v1=00");
            assert_eq!(
                verify_signature(b"{}", Some(&header), SECRET, 1_760_000_000),
                Err(SignatureError::Expired)
            );
        }
        let header = sign_payload(b"{}", SECRET, 0).unwrap();
        assert_eq!(
            verify_signature(b"{}", Some(&header), SECRET, i64::MIN),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_signature_header_parsing() {
        assert_eq!(
            verify_signature(b"", None, SECRET, 0),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_signature(b"", Some("v1=abc"), SECRET, 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(b"", Some("t=0"), SECRET, 0),
            Err(SignatureError::Malformed)
        );

        // Any matching v1 entry is accepted.
        let valid = sign_payload(b"x", SECRET, 5).unwrap();
        let v1 = valid.split_once(",v1=").map(|(_, sig)| sig).unwrap();
        let header = format!("t=5,v1=deadbeef,v1={v1}");
        assert_eq!(verify_signature(b"x", Some(&header), SECRET, 5), Ok(()));
    }

    #[test]
    fn test_plan_resolution() {
        assert_eq!(plan_of(&json!({"metadata": {"plan": "agency"}})), PlanTier::Agency);
        assert_eq!(
            plan_of(&json!({"items": {"data": [{"price": {"lookup_key": "pro_monthly"}}]}})),
            PlanTier::Pro
        );
        assert_eq!(plan_of(&json!({})), PlanTier::Free);
    }
}
