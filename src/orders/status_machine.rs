use crate::orders::error::OrderError;
use crate::orders::models::{Order, OrderStatus};

/// The gateway's affirmative-accept decision string
pub const DECISION_ACCEPT: &str = "ACCEPT";
/// The gateway's cancellation decision string
pub const DECISION_CANCEL: &str = "CANCEL";

/// The order state machine, driven by gateway callback decisions
pub struct StatusMachine;

impl StatusMachine {
    /// Decide how an order reacts to a gateway decision.
    ///
    /// Returns:
    /// - `Ok(None)` for a CANCEL delivered to an already-failed order: a
    ///   duplicate of a cancellation we have handled, ignored silently.
    /// - `Err(UnexpectedStatus)` for any other decision on an order that
    ///   has left `created`: a duplicate or out-of-order delivery that
    ///   must fail loudly rather than silently double-process.
    /// - `Ok(Some(Failed))` for any decision other than ACCEPT, including
    ///   unknown decision strings. Fail closed.
    /// - `Ok(Some(Fulfilled))` for ACCEPT.
    pub fn determine_status_change(
        order: &Order,
        decision: &str,
    ) -> Result<Option<OrderStatus>, OrderError> {
        if order.status == OrderStatus::Failed && decision == DECISION_CANCEL {
            return Ok(None);
        }

        if order.status != OrderStatus::Created {
            return Err(OrderError::UnexpectedStatus {
                order_id: order.id,
                actual: order.status,
            });
        }

        if decision != DECISION_ACCEPT {
            return Ok(Some(OrderStatus::Failed));
        }

        Ok(Some(OrderStatus::Fulfilled))
    }
}
