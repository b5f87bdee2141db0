use std::fmt;

use serde::{Deserialize, Serialize};

/// The mutating operations that go through replication.
///
/// GET never appears here: reads are served from local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Put,
    Delete,
}

/// The value replicas agree on.
///
/// A `Datum` describes an operation rather than carrying a raw client
/// request, so the same value can be proposed, accepted, decided and finally
/// applied to every replica's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub method: Method,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Datum {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            key: key.into(),
            value: None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.method, &self.value) {
            (Method::Put, Some(value)) => write!(f, "PUT {}={}", self.key, value),
            (Method::Put, None) => write!(f, "PUT {}=", self.key),
            (Method::Delete, _) => write!(f, "DELETE {}", self.key),
        }
    }
}
