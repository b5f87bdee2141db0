//! Learner role: applying decided values.

use tracing::{debug, info, warn};

use crate::acceptor::Acceptor;
use crate::datum::{Datum, Method};
use crate::store::KeyStore;

/// Applies a datum to the store. Deleting an absent key is logged, not an error.
pub fn apply(store: &KeyStore, datum: &Datum) {
    match datum.method {
        Method::Put => {
            let value = datum.value.clone().unwrap_or_default();
            store.put(datum.key.clone(), value);
        }
        Method::Delete => {
            if store.delete(&datum.key).is_none() {
                warn!(key = %datum.key, "data error while processing DELETE: key doesn't exist");
            }
        }
    }
}

/// Handles a Decide: apply the value, then free the acceptor slot.
pub fn decide(store: &KeyStore, acceptor: &Acceptor, datum: &Datum) {
    apply(store, datum);
    let previous = acceptor.reset();
    debug!(?previous, "acceptor slot reset after decide");
    info!(%datum, "decided");
}
