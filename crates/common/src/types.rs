use serde::{Deserialize, Serialize};

/// Internal identifier of a persisted order.
///
/// Assigned by the store on first insert and immutable afterwards. Wraps the
/// raw database key to prevent mixing it up with delivery, payment or item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates an order ID from a raw database key.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw database key.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true if the id can refer to a stored row.
    ///
    /// Keys are generated by a sequence starting at 1, so zero and negative
    /// values never identify an order.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<OrderId> for i64 {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl std::str::FromStr for OrderId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}
