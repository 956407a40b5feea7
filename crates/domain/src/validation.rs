use common::OrderAggregate;
use validator::Validate;

use crate::ValidationError;

/// Checks inbound aggregates before they reach storage.
///
/// Field rules come from the `validator` derives on the model types; the
/// validator adds the checks that a derive cannot express.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateValidator;

impl AggregateValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, aggregate: &OrderAggregate) -> Result<(), ValidationError> {
        aggregate.validate().map_err(|source| ValidationError::Rules {
            order_uid: aggregate.order.order_uid.clone(),
            source,
        })?;

        let currency = &aggregate.payment.currency;
        if !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::Currency {
                order_uid: aggregate.order.order_uid.clone(),
                currency: currency.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::fixtures::sample_aggregate;

    fn validator() -> AggregateValidator {
        AggregateValidator::new()
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(validator().validate(&sample_aggregate("uid", 2, 0)).is_ok());
    }

    #[test]
    fn test_missing_order_uid() {
        let mut aggregate = sample_aggregate("uid", 1, 0);
        aggregate.order.order_uid.clear();
        assert!(matches!(
            validator().validate(&aggregate),
            Err(ValidationError::Rules { .. })
        ));
    }

    #[test]
    fn test_no_items() {
        let aggregate = sample_aggregate("uid", 0, 0);
        assert!(validator().validate(&aggregate).is_err());
    }

    #[test]
    fn test_negative_item_price() {
        let mut aggregate = sample_aggregate("uid", 2, 0);
        aggregate.items[1].price = -1.0;
        assert!(validator().validate(&aggregate).is_err());
    }

    #[test]
    fn test_bad_email() {
        let mut aggregate = sample_aggregate("uid", 1, 0);
        aggregate.delivery.email = "nobody".to_string();
        assert!(validator().validate(&aggregate).is_err());
    }

    #[test]
    fn test_currency_must_be_letters() {
        let mut aggregate = sample_aggregate("uid", 1, 0);
        aggregate.payment.currency = "U$D".to_string();
        let err = validator().validate(&aggregate).unwrap_err();
        assert!(matches!(err, ValidationError::Currency { .. }));
        assert!(err.to_string().contains("U$D"));

        aggregate.payment.currency = "USDT".to_string();
        assert!(matches!(
            validator().validate(&aggregate),
            Err(ValidationError::Rules { .. })
        ));
    }
}
