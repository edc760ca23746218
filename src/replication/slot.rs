//! Creates, drops, peeks, and advances replication slots
//!
//! Ported from `create_replication_slot`/`drop_replication_slot`/
//! `get_max_lsn`/`advance_slot` in the dlt `pg_legacy_replication` source.

use tracing::info;

use crate::core::errors::CdcResult;
use crate::protocol::lsn::Lsn;

use super::connection::{PgConnection, SQLSTATE_DUPLICATE_OBJECT, SQLSTATE_UNDEFINED_OBJECT};

/// Descriptor returned by a successful slot creation.
#[derive(Debug, Clone)]
pub struct SlotDescriptor {
    pub slot_name: String,
    pub consistent_point: Lsn,
    pub snapshot_name: Option<String>,
    pub output_plugin: String,
}

pub struct SlotManager<'a> {
    conn: &'a PgConnection,
}

impl<'a> SlotManager<'a> {
    pub fn new(conn: &'a PgConnection) -> Self {
        Self { conn }
    }

    /// Creates a replication slot with the `decoderbufs` output plugin.
    ///
    /// Idempotent: a `duplicate_object` error is swallowed and `Ok(None)` is
    /// returned, matching the source's "already exists" short-circuit.
    pub fn create(&self, slot_name: &str) -> CdcResult<Option<SlotDescriptor>> {
        let query = format!(r#"CREATE_REPLICATION_SLOT "{slot_name}" LOGICAL decoderbufs"#);
        let result = self.conn.exec(&query)?;

        if result.is_ok() && result.ntuples() > 0 {
            let consistent_point: Lsn = result
                .getvalue(0, 1)
                .unwrap_or_default()
                .parse()
                .unwrap_or(Lsn::ZERO);
            let snapshot_name = result.getvalue(0, 2).filter(|s| !s.is_empty());

            return Ok(Some(SlotDescriptor {
                slot_name: slot_name.to_string(),
                consistent_point,
                snapshot_name,
                output_plugin: "decoderbufs".to_string(),
            }));
        }

        if result.sqlstate().as_deref() == Some(SQLSTATE_DUPLICATE_OBJECT) {
            info!(slot = slot_name, "replication slot already exists");
            return Ok(None);
        }

        Err(crate::core::errors::CdcError::protocol(
            result.error_message().unwrap_or_else(|| "slot creation failed".to_string()),
        ))
    }

    /// Drops a replication slot. Idempotent: `undefined_object` is swallowed.
    pub fn drop(&self, slot_name: &str) -> CdcResult<()> {
        let query = format!(r#"DROP_REPLICATION_SLOT "{slot_name}""#);
        let result = self.conn.exec(&query)?;

        if result.is_ok() {
            return Ok(());
        }

        if result.sqlstate().as_deref() == Some(SQLSTATE_UNDEFINED_OBJECT) {
            info!(slot = slot_name, "replication slot did not exist");
            return Ok(());
        }

        Err(crate::core::errors::CdcError::protocol(
            result.error_message().unwrap_or_else(|| "slot drop failed".to_string()),
        ))
    }

    /// Drops and recreates the slot, for the `reset` configuration flag.
    pub fn ensure(&self, slot_name: &str, reset: bool) -> CdcResult<Option<SlotDescriptor>> {
        if reset {
            self.drop(slot_name)?;
        }
        self.create(slot_name)
    }

    /// Largest pending LSN in the slot without consuming it, via a
    /// non-destructive peek. Returns `None` if the slot is empty.
    ///
    /// PostgreSQL < 10 exposes the peek column as `location`; >= 10 as
    /// `lsn`.
    pub fn max_lsn(&self, slot_name: &str, server_version: i32) -> CdcResult<Option<Lsn>> {
        let lsn_field = if server_version < 100000 { "location" } else { "lsn" };
        let query = format!(
            "SELECT MAX({lsn_field} - '0/0') FROM pg_logical_slot_peek_binary_changes('{slot_name}', NULL, NULL);"
        );
        let result = self.conn.exec(&query)?;
        if !result.is_ok() || result.ntuples() == 0 {
            return Ok(None);
        }
        match result.getvalue(0, 0) {
            Some(value) if !value.is_empty() => {
                let raw: u64 = value
                    .parse()
                    .map_err(|_| crate::core::errors::CdcError::protocol(format!("unexpected max_lsn value '{value}'")))?;
                Ok(Some(Lsn::from_u64(raw)))
            }
            _ => Ok(None),
        }
    }

    /// Advances the slot to `upto_lsn`, letting the server recycle WAL up to
    /// that position. No-op if `upto_lsn == 0`; only runs on server version
    /// strictly greater than 10 (`> 100000`), matching the source's
    /// `get_pg_version(cur) > 100000` check.
    pub fn advance(&self, slot_name: &str, upto_lsn: Lsn, server_version: i32) -> CdcResult<()> {
        if upto_lsn.as_u64() == 0 || server_version <= 100000 {
            return Ok(());
        }
        let query = format!("SELECT * FROM pg_replication_slot_advance('{slot_name}', '{upto_lsn}');");
        self.conn.exec(&query)?;
        Ok(())
    }
}
