//! Domain error types.

use thiserror::Error;

/// An inbound aggregate that must not be persisted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more field rules failed.
    #[error("invalid order {order_uid:?}: {source}")]
    Rules {
        order_uid: String,
        #[source]
        source: validator::ValidationErrors,
    },

    /// The payment currency is not made of three ASCII letters.
    #[error("invalid order {order_uid:?}: currency {currency:?} is not a three-letter code")]
    Currency { order_uid: String, currency: String },
}
