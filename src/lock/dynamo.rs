//! DynamoDB lock store
//!
//! One item per lock in a single table:
//!
//! | Attribute | Type | Description |
//! |-----------|------|-------------|
//! | `LockKey` | S | Partition key |
//! | `LockId` | S | Random ownership token |
//! | `Owner` | S | Principal id |
//! | `AcquiredAt` | S | RFC 3339 |
//! | `ExpiresAt` | N | Epoch seconds; the table's TTL attribute |
//!
//! Acquire is a `PutItem` conditioned on `attribute_not_exists(LockKey) OR
//! ExpiresAt < now`; refresh and release condition on `LockId`. The
//! conditional-check-failed response is the single source of truth for
//! contention.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, TimeZone, Utc};

use super::{new_lock_id, Lock, LockError, LockStore};

/// Lock table client
#[derive(Debug, Clone)]
pub struct DynamoLockStore {
    client: Client,
    table_name: String,
}

impl DynamoLockStore {
    /// Use a pre-built client; the table must exist with `LockKey` as its
    /// partition key and TTL enabled on `ExpiresAt`
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Standard AWS config chain (env vars, profiles, IMDS)
    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), table_name)
    }

    async fn put_lock(&self, lock: &Lock, condition: Condition<'_>) -> Result<(), LockError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("LockKey", AttributeValue::S(lock.key.clone()))
            .item("LockId", AttributeValue::S(lock.lock_id.clone()))
            .item("Owner", AttributeValue::S(lock.owner.clone()))
            .item(
                "AcquiredAt",
                AttributeValue::S(lock.acquired_at.to_rfc3339()),
            )
            .item(
                "ExpiresAt",
                AttributeValue::N(lock.expires_at.timestamp().to_string()),
            );

        request = match condition {
            Condition::NotHeldOrExpired { now } => request
                .condition_expression("attribute_not_exists(LockKey) OR ExpiresAt < :now")
                .expression_attribute_values(":now", AttributeValue::N(now.timestamp().to_string())),
            Condition::TokenMatches { lock_id } => request
                .condition_expression("LockId = :id")
                .expression_attribute_values(":id", AttributeValue::S(lock_id.to_string())),
        };

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    Err(LockError::NotHeld {
                        key: lock.key.clone(),
                    })
                } else {
                    Err(transport(&lock.key, err))
                }
            }
        }
    }
}

enum Condition<'a> {
    NotHeldOrExpired { now: DateTime<Utc> },
    TokenMatches { lock_id: &'a str },
}

fn transport(key: &str, err: impl std::fmt::Display) -> LockError {
    LockError::Transport {
        key: key.to_string(),
        message: err.to_string(),
    }
}

fn lock_from_item(
    key: &str,
    item: &std::collections::HashMap<String, AttributeValue>,
) -> Option<Lock> {
    let lock_id = item.get("LockId")?.as_s().ok()?.clone();
    let owner = item.get("Owner")?.as_s().ok()?.clone();
    let acquired_at = item
        .get("AcquiredAt")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let expires_at = item
        .get("ExpiresAt")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())?;

    Some(Lock {
        key: key.to_string(),
        lock_id,
        owner,
        acquired_at,
        expires_at,
    })
}

#[async_trait]
impl LockStore for DynamoLockStore {
    async fn acquire(&self, key: &str, ttl: Duration, owner: &str) -> Result<Lock, LockError> {
        let now = Utc::now();
        let lock = Lock {
            key: key.to_string(),
            lock_id: new_lock_id(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        };
        if lock.is_expired(now) {
            return Err(LockError::Expired {
                key: key.to_string(),
            });
        }

        match self.put_lock(&lock, Condition::NotHeldOrExpired { now }).await {
            Ok(()) => Ok(lock),
            Err(LockError::NotHeld { .. }) => {
                // A live lock exists; read it to report the holder.
                match self.get(key).await? {
                    Some(existing) => Err(LockError::AlreadyHeld {
                        key: key.to_string(),
                        holder: existing.owner,
                        expires_at: existing.expires_at,
                    }),
                    None => Err(LockError::AlreadyHeld {
                        key: key.to_string(),
                        holder: "unknown".to_string(),
                        expires_at: now,
                    }),
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn refresh(&self, lock: &Lock, ttl: Duration) -> Result<Lock, LockError> {
        let mut renewed = lock.clone();
        renewed.expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.put_lock(
            &renewed,
            Condition::TokenMatches {
                lock_id: &lock.lock_id,
            },
        )
        .await?;
        Ok(renewed)
    }

    async fn release(&self, lock: &Lock) -> Result<(), LockError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("LockKey", AttributeValue::S(lock.key.clone()))
            .condition_expression("LockId = :id")
            .expression_attribute_values(":id", AttributeValue::S(lock.lock_id.clone()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                // Already released, or taken over after expiry; either way
                // this invocation no longer holds it.
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    Ok(())
                } else {
                    Err(transport(&lock.key, err))
                }
            }
        }
    }

    async fn force_release(&self, key: &str) -> Result<(), LockError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("LockKey", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| transport(key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("LockKey", AttributeValue::S(key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| transport(key, e))?;

        Ok(output
            .item()
            .and_then(|item| lock_from_item(key, item))
            .filter(|lock| !lock.is_expired(Utc::now())))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError> {
        let now = Utc::now();
        let mut locks = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let mut scan = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("begins_with(LockKey, :prefix)")
                .expression_attribute_values(":prefix", AttributeValue::S(prefix.to_string()));
            if let Some(start) = exclusive_start_key.take() {
                scan = scan.set_exclusive_start_key(Some(start));
            }

            let output = scan.send().await.map_err(|e| transport(prefix, e))?;
            for item in output.items() {
                if let Some(key) = item.get("LockKey").and_then(|v| v.as_s().ok()) {
                    if let Some(lock) = lock_from_item(key, item) {
                        if !lock.is_expired(now) {
                            locks.push(lock);
                        }
                    }
                }
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => {
                    exclusive_start_key = Some(key.clone());
                }
                _ => break,
            }
        }

        locks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_from_item_parses_attributes() {
        let now = Utc::now();
        let mut item = std::collections::HashMap::new();
        item.insert("LockId".to_string(), AttributeValue::S("abc".into()));
        item.insert("Owner".to_string(), AttributeValue::S("alice".into()));
        item.insert(
            "AcquiredAt".to_string(),
            AttributeValue::S(now.to_rfc3339()),
        );
        item.insert(
            "ExpiresAt".to_string(),
            AttributeValue::N((now.timestamp() + 600).to_string()),
        );

        let lock = lock_from_item("stack:app:env:dev", &item).unwrap();
        assert_eq!(lock.owner, "alice");
        assert!(!lock.is_expired(now));
    }

    #[test]
    fn test_lock_from_item_requires_expiry() {
        let mut item = std::collections::HashMap::new();
        item.insert("LockId".to_string(), AttributeValue::S("abc".into()));
        item.insert("Owner".to_string(), AttributeValue::S("alice".into()));
        assert!(lock_from_item("k", &item).is_none());
    }
}
