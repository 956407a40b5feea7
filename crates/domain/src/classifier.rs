use order_store::StoreError;
use retry::{Classifier, Retrier};

/// Retries only errors whose kind is not terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreErrorClassifier;

impl Classifier<StoreError> for StoreErrorClassifier {
    fn is_retryable(&self, error: &StoreError) -> bool {
        !error.is_terminal()
    }
}

/// A retrier that gives up on terminal store errors.
pub type StoreRetrier = Retrier<StoreErrorClassifier>;
