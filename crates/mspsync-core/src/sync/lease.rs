use std::time::Duration;

use mspsync_warehouse::{Warehouse, WarehouseError};
use tracing::warn;
use uuid::Uuid;

/// Leases older than this are treated as abandoned by a crashed run.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Holds a connection's sync lease until dropped.
pub(crate) struct SyncLeaseGuard {
    warehouse: Warehouse,
    connection_id: i64,
    holder: String,
}

impl SyncLeaseGuard {
    /// `None` when another live run holds the lease.
    pub(crate) fn acquire(
        warehouse: &Warehouse,
        connection_id: i64,
        ttl: Duration,
    ) -> Result<Option<Self>, WarehouseError> {
        let holder = Uuid::new_v4().to_string();
        if !warehouse.try_acquire_lease(connection_id, &holder, ttl)? {
            return Ok(None);
        }
        Ok(Some(Self {
            warehouse: warehouse.clone(),
            connection_id,
            holder,
        }))
    }
}

impl SyncLeaseGuard {
    pub(crate) const fn connection_id(&self) -> i64 {
        self.connection_id
    }

    /// Restart the lease TTL. `false` when another run has taken it over.
    pub(crate) fn renew(&self) -> Result<bool, WarehouseError> {
        self.warehouse.renew_lease(self.connection_id, &self.holder)
    }
}

impl Drop for SyncLeaseGuard {
    fn drop(&mut self) {
        if let Err(error) = self.warehouse.release_lease(self.connection_id, &self.holder) {
            warn!(connection_id = self.connection_id, %error, "failed to release sync lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{insert_connection, open_temp};

    #[test]
    fn second_holder_waits_until_the_guard_drops() {
        let (_temp, warehouse) = open_temp();
        let id = insert_connection(&warehouse, "syncro");

        let guard = SyncLeaseGuard::acquire(&warehouse, id, DEFAULT_LEASE_TTL)
            .expect("acquire")
            .expect("free lease");
        assert!(SyncLeaseGuard::acquire(&warehouse, id, DEFAULT_LEASE_TTL)
            .expect("acquire")
            .is_none());

        drop(guard);
        assert!(SyncLeaseGuard::acquire(&warehouse, id, DEFAULT_LEASE_TTL)
            .expect("acquire")
            .is_some());
    }

    #[test]
    fn renew_reports_a_lost_lease() {
        let (_temp, warehouse) = open_temp();
        let id = insert_connection(&warehouse, "syncro");

        let guard = SyncLeaseGuard::acquire(&warehouse, id, DEFAULT_LEASE_TTL)
            .expect("acquire")
            .expect("free lease");
        assert!(guard.renew().expect("renew"));

        assert!(warehouse
            .try_acquire_lease(id, "takeover", Duration::ZERO)
            .expect("takeover"));
        assert!(!guard.renew().expect("renew after takeover"));
    }
}
