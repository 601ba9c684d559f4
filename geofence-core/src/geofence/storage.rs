//! `SQLite` storage for geofence registrations.
//!
//! Registrations are persisted so a host can restore its geofences after a
//! process restart. Only the definitions are stored; runtime state (status,
//! dwell deadlines) starts over as UNKNOWN when geofences are re-registered.

// SQLite operations need to hold the lock for the duration of the operation.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{GeofenceError, Result};
use super::types::{Expiration, Geofence, TransitionMask};

/// `SQLite`-based storage for geofence definitions.
///
/// Thread-safe wrapper around a `SQLite` connection.
pub struct GeofenceStorage {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for GeofenceStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceStorage").finish_non_exhaustive()
    }
}

/// Raw column values of one `geofences` row.
type RawRow = (String, f64, f64, f64, Option<i64>, i64, i64, Option<i64>);

const SELECT_COLUMNS: &str = "id, latitude, longitude, radius_meters, expires_at_ms, \
                              transitions, dwell_delay_ms, initial_trigger";

impl GeofenceStorage {
    /// Creates a new storage instance at the given path.
    ///
    /// Creates the database file and table if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Creates an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GeofenceError::Storage(format!("Failed to acquire database lock: {e}")))
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS geofences (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_meters REAL NOT NULL,
                expires_at_ms INTEGER,
                transitions INTEGER NOT NULL,
                dwell_delay_ms INTEGER NOT NULL DEFAULT 0,
                initial_trigger INTEGER
            );
            ",
        )?;

        Ok(())
    }

    /// Saves a geofence.
    ///
    /// If a geofence with the same id exists it is updated in place and
    /// keeps its original position in [`load_all`](Self::load_all) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the dwell delay
    /// does not fit the column.
    pub fn save(&self, geofence: &Geofence) -> Result<()> {
        let dwell_delay_ms = i64::try_from(geofence.dwell_delay_ms).map_err(|_| {
            GeofenceError::InvalidData(format!(
                "Dwell delay too large to store: {}",
                geofence.dwell_delay_ms
            ))
        })?;

        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO geofences (id, latitude, longitude, radius_meters, expires_at_ms, transitions, dwell_delay_ms, initial_trigger)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                radius_meters = excluded.radius_meters,
                expires_at_ms = excluded.expires_at_ms,
                transitions = excluded.transitions,
                dwell_delay_ms = excluded.dwell_delay_ms,
                initial_trigger = excluded.initial_trigger
            ",
            params![
                &geofence.id,
                geofence.latitude,
                geofence.longitude,
                geofence.radius_meters,
                geofence.expiration.as_millis(),
                geofence.transitions.bits(),
                dwell_delay_ms,
                geofence.initial_trigger.map(TransitionMask::bits),
            ],
        )?;

        Ok(())
    }

    /// Retrieves a geofence by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn get(&self, id: &str) -> Result<Option<Geofence>> {
        let conn = self.lock()?;

        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM geofences WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;

        raw.map(into_geofence).transpose()
    }

    /// Retrieves all geofences in the order they were first saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn load_all(&self) -> Result<Vec<Geofence>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM geofences ORDER BY seq ASC"
        ))?;

        let rows = stmt
            .query_map([], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(into_geofence).collect()
    }

    /// Retrieves every decodable geofence in first-saved order.
    ///
    /// Unlike [`load_all`](Self::load_all), a corrupt row is logged and
    /// skipped instead of failing the whole load, so one bad entry cannot
    /// block restoring the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the table itself cannot be queried.
    pub fn load_restorable(&self) -> Result<Vec<Geofence>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM geofences ORDER BY seq ASC"
        ))?;

        let mut restored = Vec::new();
        for (index, row) in stmt.query_map([], read_row)?.enumerate() {
            match row.map_err(GeofenceError::from).and_then(into_geofence) {
                Ok(geofence) => restored.push(geofence),
                Err(e) => log::warn!("Skipping stored geofence row {index}: {e}"),
            }
        }

        Ok(restored)
    }

    /// Deletes a geofence by id. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM geofences WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Deletes every stored geofence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM geofences", [])?;
        Ok(())
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_geofence(raw: RawRow) -> Result<Geofence> {
    let (id, latitude, longitude, radius_meters, expires_at_ms, transitions, dwell, initial) = raw;

    let expiration = Expiration::from_millis(expires_at_ms).ok_or_else(|| {
        GeofenceError::InvalidData(format!("Invalid expiration for {id}: {expires_at_ms:?}"))
    })?;

    let transitions = mask_from_column(transitions).ok_or_else(|| {
        GeofenceError::InvalidData(format!("Invalid transitions for {id}: {transitions}"))
    })?;

    let initial_trigger = match initial {
        None => None,
        Some(bits) => Some(mask_from_column(bits).ok_or_else(|| {
            GeofenceError::InvalidData(format!("Invalid initial_trigger for {id}: {bits}"))
        })?),
    };

    let dwell_delay_ms = u64::try_from(dwell)
        .map_err(|_| GeofenceError::InvalidData(format!("Invalid dwell delay for {id}: {dwell}")))?;

    Ok(Geofence {
        id,
        latitude,
        longitude,
        radius_meters,
        expiration,
        transitions,
        dwell_delay_ms,
        initial_trigger,
    })
}

fn mask_from_column(bits: i64) -> Option<TransitionMask> {
    u8::try_from(bits).ok().and_then(TransitionMask::from_bits)
}
