//! Signing several orders with one authentication.
//!
//! The caller's session is validated once. Each order is then signed with its own child
//! session derived from it, so the single-use rule of [`OrderService::sign_order`] holds per
//! order and one failure never affects the others. The parent session is consumed once at
//! least one order has been signed.

use crate::events::EventPayload;
use crate::order::SignerId;
use crate::orders::{OrderService, SignRequest};
use crate::{OrderError, OrderResult};
use orderly_ids::ShardableUuid;
use serde::Serialize;

#[derive(Clone, Debug)]
pub struct BatchSignContext {
    pub signer_id: SignerId,
    pub token: String,
    /// Applied to every order in the batch.
    pub signature: Vec<u8>,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchItemResult {
    pub order_id: ShardableUuid,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    fn failed(order_id: ShardableUuid, err: &OrderError) -> Self {
        Self {
            order_id,
            signed: false,
            signature_id: None,
            code: Some(err.code()),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub signed: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl OrderService {
    /// Signs each order independently and reports a per-order breakdown.
    ///
    /// # Errors
    ///
    /// Fails as a whole only for an empty list (`Validation`), more orders than the configured
    /// batch limit (`TooManyOrders`) or an invalid session (`InvalidSession`). Per-order
    /// failures are reported in [`BatchOutcome::results`].
    pub fn sign_many(
        &self,
        order_ids: &[ShardableUuid],
        context: BatchSignContext,
    ) -> OrderResult<BatchOutcome> {
        if order_ids.is_empty() {
            return Err(OrderError::Validation(
                "at least one order is required".into(),
            ));
        }
        let max = self.config().max_batch_size();
        if order_ids.len() > max {
            return Err(OrderError::TooManyOrders {
                count: order_ids.len(),
                max,
            });
        }
        if !self
            .sessions()
            .validate(&context.token, context.signer_id)?
            .valid
        {
            return Err(OrderError::InvalidSession);
        }

        let results: Vec<BatchItemResult> = order_ids
            .iter()
            .map(|order_id| self.sign_one(*order_id, &context))
            .collect();
        let signed = results.iter().filter(|r| r.signed).count();
        let outcome = BatchOutcome {
            total: results.len(),
            signed,
            failed: results.len() - signed,
            results,
        };

        if signed > 0 {
            self.sessions().invalidate(&context.token)?;
        }
        self.audit().append(
            None,
            EventPayload::BatchSigned {
                total: outcome.total,
                signed: outcome.signed,
                failed: outcome.failed,
                order_ids: order_ids.to_vec(),
            },
            Some(context.signer_id),
        );
        tracing::info!(
            signer_id = context.signer_id,
            total = outcome.total,
            signed = outcome.signed,
            failed = outcome.failed,
            "batch signing finished"
        );
        Ok(outcome)
    }

    fn sign_one(&self, order_id: ShardableUuid, context: &BatchSignContext) -> BatchItemResult {
        let child = match self.sessions().derive(&context.token, context.signer_id) {
            Ok(child) => child,
            Err(e) => return BatchItemResult::failed(order_id, &e),
        };

        let request = SignRequest {
            order_id,
            signer_id: context.signer_id,
            token: child.token.clone(),
            signature: context.signature.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
        };
        match self.sign_order(request) {
            Ok(record) => BatchItemResult {
                order_id,
                signed: true,
                signature_id: Some(record.signature_id().to_owned()),
                code: None,
                error: None,
            },
            Err(e) => {
                if let Err(cleanup) = self.sessions().invalidate(&child.token) {
                    tracing::error!(error = %cleanup, "failed to invalidate unused child session");
                }
                BatchItemResult::failed(order_id, &e)
            }
        }
    }
}
