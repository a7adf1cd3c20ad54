//! Key-value backends for time-boxed records.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use fred::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{EphemeralError, TimeBoxed};

/// Short-lived record storage.
///
/// Redis in production; the in-memory map keeps tests free of a Redis
/// dependency while enforcing the same expiry and replay rules.
#[derive(Clone)]
pub enum EphemeralStore {
    Redis(Client),
    Memory(Arc<DashMap<String, TimeBoxed<Value>>>),
}

impl std::fmt::Debug for EphemeralStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis(_) => f.write_str("EphemeralStore::Redis"),
            Self::Memory(map) => write!(f, "EphemeralStore::Memory({} entries)", map.len()),
        }
    }
}

fn backend_error(e: &Error) -> EphemeralError {
    tracing::error!(error = %e, "Ephemeral store operation failed");
    EphemeralError::Backend(e.to_string())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, EphemeralError> {
    serde_json::from_value(value).map_err(|e| EphemeralError::Serialization(e.to_string()))
}

impl EphemeralStore {
    pub const fn redis(client: Client) -> Self {
        Self::Redis(client)
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(DashMap::new()))
    }

    /// Store `payload` under `key` for `ttl`.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        ttl: Duration,
    ) -> Result<(), EphemeralError> {
        let value =
            serde_json::to_value(payload).map_err(|e| EphemeralError::Serialization(e.to_string()))?;
        let now = Utc::now();
        let record = TimeBoxed::new(value, ttl, now);

        match self {
            Self::Redis(client) => {
                let raw = serde_json::to_string(&record)
                    .map_err(|e| EphemeralError::Serialization(e.to_string()))?;
                client
                    .set::<(), _, _>(
                        key,
                        raw.as_str(),
                        Some(Expiration::EX(ttl.num_seconds().max(1))),
                        None,
                        false,
                    )
                    .await
                    .map_err(|e| backend_error(&e))
            }
            Self::Memory(map) => {
                map.retain(|_, existing| !existing.is_expired(now));
                map.insert(key.to_string(), record);
                Ok(())
            }
        }
    }

    /// Read a live, unconsumed payload without consuming it.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EphemeralError> {
        let record = match self {
            Self::Redis(client) => {
                let raw: Option<String> = client.get(key).await.map_err(|e| backend_error(&e))?;
                match raw {
                    Some(raw) => Some(
                        serde_json::from_str::<TimeBoxed<Value>>(&raw)
                            .map_err(|e| EphemeralError::Serialization(e.to_string()))?,
                    ),
                    None => None,
                }
            }
            Self::Memory(map) => map.get(key).map(|entry| entry.value().clone()),
        };

        match record {
            Some(record) if !record.consumed && !record.is_expired(Utc::now()) => {
                record.payload.map(decode).transpose()
            }
            _ => Ok(None),
        }
    }

    /// Consume the payload under `key`.
    ///
    /// Succeeds at most once per stored record. Later attempts report
    /// `Replayed` for as long as the tombstone lives.
    pub async fn consume<T: DeserializeOwned>(&self, key: &str) -> Result<T, EphemeralError> {
        let now = Utc::now();

        let outcome = match self {
            Self::Redis(client) => {
                let raw: Option<String> = client.getdel(key).await.map_err(|e| backend_error(&e))?;
                let raw = raw.ok_or(EphemeralError::NotFound)?;
                let mut record: TimeBoxed<Value> = serde_json::from_str(&raw)
                    .map_err(|e| EphemeralError::Serialization(e.to_string()))?;

                let outcome = record.take(now);
                let remaining = record.remaining_seconds(now);
                if remaining > 0 {
                    let tombstone = serde_json::to_string(&record.tombstone())
                        .map_err(|e| EphemeralError::Serialization(e.to_string()))?;
                    client
                        .set::<(), _, _>(
                            key,
                            tombstone.as_str(),
                            Some(Expiration::EX(remaining)),
                            None,
                            false,
                        )
                        .await
                        .map_err(|e| backend_error(&e))?;
                }
                outcome
            }
            Self::Memory(map) => {
                let mut entry = map.get_mut(key).ok_or(EphemeralError::NotFound)?;
                entry.value_mut().take(now)
            }
        };

        decode(outcome?)
    }

    /// Drop a record without consuming it.
    pub async fn discard(&self, key: &str) -> Result<(), EphemeralError> {
        match self {
            Self::Redis(client) => client
                .del::<(), _>(key)
                .await
                .map_err(|e| backend_error(&e)),
            Self::Memory(map) => {
                map.remove(key);
                Ok(())
            }
        }
    }
}
