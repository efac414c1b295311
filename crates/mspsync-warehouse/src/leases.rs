//! Per-connection sync leases.
//!
//! A lease row marks a connection as being synced by `holder`. Leases older
//! than the caller's TTL are considered abandoned and may be taken over.

use std::time::Duration;

use ::duckdb::params;
use time::OffsetDateTime;

use crate::connections::no_rows_to_none;
use crate::{Warehouse, WarehouseError};

impl Warehouse {
    /// Try to take the sync lease for `connection_id`. Returns `false` when a
    /// live lease is held by someone else, including when a concurrent
    /// acquire wins the write race.
    pub fn try_acquire_lease(
        &self,
        connection_id: i64,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, WarehouseError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let acquired = self.write(|db| {
            let existing: Option<(String, i64)> = db
                .query_row(
                    "SELECT holder, acquired_at_unix FROM sync_leases WHERE connection_id = ?",
                    params![connection_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(no_rows_to_none)?;

            match existing {
                None => {
                    db.execute(
                        "INSERT INTO sync_leases (connection_id, holder, acquired_at_unix) VALUES (?, ?, ?)",
                        params![connection_id, holder, now],
                    )?;
                    Ok(true)
                }
                Some((current, acquired_at)) if current == holder || now.saturating_sub(acquired_at) >= ttl_secs => {
                    db.execute(
                        "UPDATE sync_leases SET holder = ?, acquired_at_unix = ? WHERE connection_id = ?",
                        params![holder, now, connection_id],
                    )?;
                    Ok(true)
                }
                Some(_) => Ok(false),
            }
        });

        match acquired {
            Err(error) if is_lease_contention(&error) => Ok(false),
            other => other,
        }
    }

    /// Restart the TTL of a lease `holder` still owns. `false` means the lease
    /// was released or taken over.
    pub fn renew_lease(&self, connection_id: i64, holder: &str) -> Result<bool, WarehouseError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.write(|db| {
            let renewed = db.execute(
                "UPDATE sync_leases SET acquired_at_unix = ? WHERE connection_id = ? AND holder = ?",
                params![now, connection_id, holder],
            )?;
            Ok(renewed > 0)
        })
    }

    /// Release a lease if `holder` still owns it.
    pub fn release_lease(&self, connection_id: i64, holder: &str) -> Result<(), WarehouseError> {
        self.write(|db| {
            db.execute(
                "DELETE FROM sync_leases WHERE connection_id = ? AND holder = ?",
                params![connection_id, holder],
            )?;
            Ok(())
        })
    }
}

/// DuckDB reports a lost race on the lease row as a transaction conflict or,
/// for two first-time inserts, a primary key violation.
fn is_lease_contention(error: &WarehouseError) -> bool {
    let WarehouseError::DuckDb(error) = error else {
        return false;
    };
    let message = error.to_string().to_ascii_lowercase();
    message.contains("conflict") || message.contains("duplicate key")
}
