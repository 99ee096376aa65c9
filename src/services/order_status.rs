use chrono::Utc;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::models::order::{Order, StatusTransition};
use crate::models::order_status::PaymentOutcome;
use crate::repositories::OrderRepository;
use crate::services::payment_gateway::GatewayError;

/// How many times a stale write is reloaded and re-applied.
const MAX_CONFLICT_RETRIES: u32 = 1;

/// Runs a gateway call under the configured deadline.
///
/// Expiry is reported as [`ServiceError::GatewayTimeout`]; the caller has not
/// mutated anything yet, so the order stays as it was.
pub(crate) async fn with_gateway_deadline<T, F>(
    deadline: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(operation, error = %e, "Payment gateway call failed");
            counter!("order_payments.gateway.errors", 1);
            Err(e.into())
        }
        Err(_) => {
            warn!(operation, deadline_ms = deadline.as_millis() as u64, "Payment gateway call timed out");
            counter!("order_payments.gateway.timeouts", 1);
            Err(ServiceError::GatewayTimeout(format!(
                "{operation} did not complete within {deadline:?}"
            )))
        }
    }
}

/// Applies an outcome to a loaded order and persists it when anything changed.
///
/// A concurrent writer causes one reload and re-application; the transition
/// function is idempotent so re-running it on fresher state is safe.
pub(crate) async fn apply_outcome(
    repository: &dyn OrderRepository,
    mut order: Order,
    outcome: &PaymentOutcome,
) -> Result<(Order, StatusTransition), ServiceError> {
    let mut retries = 0;

    loop {
        let transition = order.apply_payment_outcome(outcome, Utc::now());

        if let Some(warning) = &transition.warning {
            warn!(order_id = %order.id(), status = %transition.to, "{}", warning);
        }
        if !transition.changed {
            return Ok((order, transition));
        }

        match repository.update(&order).await {
            Ok(saved) => {
                if transition.from != transition.to {
                    info!(
                        order_id = %saved.id(),
                        from = %transition.from,
                        to = %transition.to,
                        "Order status changed"
                    );
                }
                return Ok((saved, transition));
            }
            Err(ServiceError::ConcurrentModification(id)) if retries < MAX_CONFLICT_RETRIES => {
                retries += 1;
                warn!(order_id = %id, "Order changed concurrently, reloading");
                counter!("order_payments.orders.write_conflicts", 1);
                order = repository
                    .find_by_id(id)
                    .await?
                    .ok_or(ServiceError::OrderNotFound(id))?;
            }
            Err(e) => return Err(e),
        }
    }
}
