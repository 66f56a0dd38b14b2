use chrono::{SecondsFormat, Utc};

use mnemo_core::models::{Entity, EntityKind, ListFilter};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "entities";

/// Synchronous repository over the `entities` table.
#[derive(Clone)]
pub struct EntityRepo {
    db: Database,
}

impl EntityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or replace by id.
    pub fn upsert(&self, entity: &Entity) -> Result<(), StoreError> {
        let body = serde_json::to_string(entity)?;
        let timestamp = entity.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true);
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO entities (id, owner_id, kind, timestamp, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    kind = excluded.kind,
                    timestamp = excluded.timestamp,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                rusqlite::params![entity.id(), entity.owner_id(), entity.kind().as_str(), timestamp, body, now],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Entity>, StoreError> {
        let raw: Option<(String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT kind, body FROM entities WHERE id = ?1")?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok(Some((
                    row_helpers::get(row, 0, TABLE, "kind")?,
                    row_helpers::get(row, 1, TABLE, "body")?,
                ))),
                None => Ok(None),
            }
        })?;
        raw.map(|(kind, body)| decode(&kind, &body)).transpose()
    }

    /// Oldest first. Time bounds and limit are applied after decoding.
    pub fn list_by_owner(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Entity>, StoreError> {
        let kind = filter.kind.map(|k| k.as_str().to_owned());
        let rows: Vec<(String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, body FROM entities
                 WHERE owner_id = ?1 AND (?2 IS NULL OR kind = ?2)
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![owner_id, kind], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut out = Vec::with_capacity(rows.len());
        for (kind, body) in rows {
            let entity = decode(&kind, &body)?;
            if filter.matches(&entity) {
                out.push(entity);
            }
        }
        if let Some(limit) = filter.limit {
            let skip = out.len().saturating_sub(limit);
            let _ = out.drain(..skip);
        }
        Ok(out)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM entities WHERE id = ?1", [id])? > 0))
    }

    pub fn delete_all_for_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM entities WHERE owner_id = ?1", [owner_id])?))
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?))
    }

    /// Overwrite a stored body verbatim. Used to simulate on-disk damage.
    pub fn write_raw_body(&self, id: &str, body: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("UPDATE entities SET body = ?2 WHERE id = ?1", rusqlite::params![id, body])? > 0)
        })
    }
}

fn decode(kind: &str, body: &str) -> Result<Entity, StoreError> {
    let _: EntityKind = row_helpers::parse_enum(kind, TABLE, "kind")?;
    let value = row_helpers::parse_json(body, TABLE, "body")?;
    serde_json::from_value(value).map_err(|e| StoreError::CorruptRow {
        table: TABLE,
        column: "body",
        detail: e.to_string(),
    })
}
