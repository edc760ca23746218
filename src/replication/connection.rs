//! PostgreSQL connection handling utilities
//!
//! A safe wrapper around PostgreSQL's C library (libpq) for replication
//! operations: connection lifecycle, query execution, and the COPY-BOTH
//! primitives the streaming protocol rides on.

use std::ffi::{CStr, CString};
use std::ptr;

use libpq_sys::*;

use crate::core::errors::{CdcError, CdcResult};

/// Safe wrapper for a PostgreSQL connection using libpq.
pub struct PgConnection {
    conn: *mut PGconn,
}

// libpq connections are not implicitly `Send`; this engine only ever uses
// one `PgConnection` from the single blocking task that owns it, handing it
// across the `spawn_blocking` boundary once on construction.
unsafe impl Send for PgConnection {}

impl PgConnection {
    /// Establishes a connection to PostgreSQL using the provided connection info.
    pub fn connect(conninfo: &str) -> CdcResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(CdcError::connection("Failed to allocate connection object"));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let error_msg = get_error_message(conn).unwrap_or_else(|| "Unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(CdcError::connection(format!("Connection failed: {error_msg}")));
        }

        Ok(Self { conn })
    }

    /// Executes a query, returning the result wrapper.
    pub fn exec(&self, query: &str) -> CdcResult<PgResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let error_msg = get_error_message(self.conn).unwrap_or_else(|| "Unknown error".to_string());
            return Err(CdcError::protocol(format!("Query execution failed: {error_msg}")));
        }

        Ok(PgResult { result })
    }

    /// Server version as an integer (e.g. `170002`), via `PQserverVersion`.
    ///
    /// Backs the Slot Manager's version-dependent branches: the
    /// `max_lsn`/`location` column name and the `advance` version gate.
    pub fn server_version(&self) -> i32 {
        unsafe { PQserverVersion(self.conn) }
    }

    /// Reads one row of COPY data (blocking). `Ok(None)` means the COPY
    /// stream ended cleanly.
    pub fn get_copy_data(&self) -> CdcResult<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();

        // PQgetCopyData: >0 data bytes, 0 = no row yet (async only), -1 =
        // COPY done, -2 = error. We only ever call this in blocking mode.
        let copy_data_len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };

        match copy_data_len {
            -2 => {
                let error_msg = get_error_message(self.conn).unwrap_or_else(|| "Unknown error".to_string());
                Err(CdcError::protocol(error_msg))
            }
            -1 => {
                let result = PgResult {
                    result: unsafe { PQgetResult(self.conn) },
                };
                if !result.is_ok() {
                    let error_msg = get_error_message(self.conn).unwrap_or_else(|| "Unknown error".to_string());
                    return Err(CdcError::protocol(error_msg));
                }
                Ok(None)
            }
            0 => Ok(None),
            len => {
                if buffer.is_null() {
                    return Err(CdcError::buffer("Received null buffer"));
                }
                let data = unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec() };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    /// Sends one frame of COPY data (used for standby status updates).
    pub fn put_copy_data(&self, data: &[u8]) -> CdcResult<()> {
        let result = unsafe { PQputCopyData(self.conn, data.as_ptr() as *const std::os::raw::c_char, data.len() as i32) };

        if result != 1 {
            let error_msg = get_error_message(self.conn).unwrap_or_else(|| "Unknown error".to_string());
            return Err(CdcError::protocol(format!("Failed to send copy data: {error_msg}")));
        }

        Ok(())
    }

    /// Flushes buffered output to the server.
    pub fn flush(&self) -> CdcResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(CdcError::protocol("Failed to flush connection"));
        }
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn get_error_message(conn: *const PGconn) -> Option<String> {
    unsafe {
        let error_ptr = PQerrorMessage(conn);
        if error_ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(error_ptr).to_string_lossy().into_owned())
        }
    }
}

/// Safe wrapper for a PostgreSQL result.
pub struct PgResult {
    result: *mut PGresult,
}

impl PgResult {
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK
        )
    }

    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    #[allow(dead_code)]
    pub fn nfields(&self) -> i32 {
        unsafe { PQnfields(self.result) }
    }

    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// libpq's textual error message for this result, e.g. `"ERROR:
    /// duplicate_object"`-style messages used to detect idempotent slot
    /// create/drop failures.
    pub fn error_message(&self) -> Option<String> {
        unsafe {
            let ptr = PQresultErrorMessage(self.result);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    /// PostgreSQL `SQLSTATE` code for this result, e.g. `"42710"` for
    /// `duplicate_object`, `"42704"` for `undefined_object`.
    pub fn sqlstate(&self) -> Option<String> {
        unsafe {
            let ptr = PQresultErrorField(self.result, libpq_sys::PG_DIAG_SQLSTATE as i32);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }
}

impl Drop for PgResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}

/// PostgreSQL error classes this engine matches on by `SQLSTATE` prefix.
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";
pub const SQLSTATE_UNDEFINED_OBJECT: &str = "42704";
