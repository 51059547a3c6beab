//! SQLite-backed implementation of the event store operations from §4.2.

use anyhow::Context;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::DbHandle;
use crate::errors::EventStoreError;

use super::{CampaignEvent, CampaignEventPayload, CampaignSnapshot, StateTransition};

pub struct SqliteEventStore {
    db: DbHandle,
}

impl SqliteEventStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Assigns the next per-campaign sequence and the next global sequence
    /// atomically, rejecting a caller-supplied sequence that does not match
    /// what the log currently holds (optimistic concurrency, §4.1/§4.2).
    pub fn append_event(
        &self,
        campaign_id: &str,
        expected_last_sequence: i64,
        payload: &CampaignEventPayload,
    ) -> Result<CampaignEvent, EventStoreError> {
        let db = self.db.lock();
        let conn = &db.conn;

        let current_max: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) FROM campaign_state_events WHERE campaign_id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        if current_max != expected_last_sequence {
            return Err(EventStoreError::SequenceConflict {
                campaign_id: campaign_id.to_string(),
                expected: expected_last_sequence,
                found: current_max,
            });
        }

        let next_sequence = current_max + 1;
        let occurred_at = Utc::now().to_rfc3339();
        let event_data = serde_json::to_vec(payload)
            .map_err(|e| EventStoreError::Other(anyhow::anyhow!(e)))?;
        let correlation_id = payload.correlation_id().map(|s| s.to_string());

        conn.execute(
            "INSERT INTO campaign_state_events
                (campaign_id, sequence_number, event_type, event_data, metadata, correlation_id, occurred_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
            params![
                campaign_id,
                next_sequence,
                payload.type_name(),
                event_data,
                correlation_id,
                occurred_at,
            ],
        )
        .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        let global_sequence = conn.last_insert_rowid();

        Ok(CampaignEvent {
            campaign_id: campaign_id.to_string(),
            sequence_number: next_sequence,
            global_sequence,
            payload: payload.clone(),
            occurred_at,
            correlation_id,
        })
    }

    /// Events with sequence > `from_version`, ordered ascending.
    pub fn get_events(
        &self,
        campaign_id: &str,
        from_version: i64,
    ) -> Result<Vec<CampaignEvent>, EventStoreError> {
        let db = self.db.lock();
        let mut stmt = db
            .conn
            .prepare(
                "SELECT campaign_id, sequence_number, global_sequence, event_data, correlation_id, occurred_at
                 FROM campaign_state_events
                 WHERE campaign_id = ?1 AND sequence_number > ?2
                 ORDER BY sequence_number ASC",
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        let rows = stmt
            .query_map(params![campaign_id, from_version], Self::row_to_event)
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(|e| EventStoreError::Other(anyhow::anyhow!(e)))?);
        }
        Ok(events)
    }

    /// Paged global read used by fan-out replay (§4.2 `GetEventsAfterSequence`).
    pub fn get_events_after_sequence(
        &self,
        global_seq: i64,
        limit: i64,
    ) -> Result<Vec<CampaignEvent>, EventStoreError> {
        let db = self.db.lock();
        let mut stmt = db
            .conn
            .prepare(
                "SELECT campaign_id, sequence_number, global_sequence, event_data, correlation_id, occurred_at
                 FROM campaign_state_events
                 WHERE global_sequence > ?1
                 ORDER BY global_sequence ASC
                 LIMIT ?2",
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        let rows = stmt
            .query_map(params![global_seq, limit], Self::row_to_event)
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(|e| EventStoreError::Other(anyhow::anyhow!(e)))?);
        }
        Ok(events)
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<CampaignEvent> {
        let campaign_id: String = row.get(0)?;
        let sequence_number: i64 = row.get(1)?;
        let global_sequence: i64 = row.get(2)?;
        let event_data: Vec<u8> = row.get(3)?;
        let correlation_id: Option<String> = row.get(4)?;
        let occurred_at: String = row.get(5)?;

        let payload: CampaignEventPayload = serde_json::from_slice(&event_data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Blob, Box::new(e))
        })?;

        Ok(CampaignEvent {
            campaign_id,
            sequence_number,
            global_sequence,
            payload,
            occurred_at,
            correlation_id,
        })
    }

    /// Current max per-campaign sequence, used by the snapshot ticker to
    /// decide whether enough events have accumulated since the last write.
    pub fn last_sequence(&self, campaign_id: &str) -> Result<i64, EventStoreError> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) FROM campaign_state_events WHERE campaign_id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))
    }

    /// Writes a new snapshot, marking any prior snapshot for this campaign as
    /// non-current. Rejects a snapshot sequence past the log's current max.
    pub fn save_snapshot(&self, snapshot: &CampaignSnapshot) -> Result<(), EventStoreError> {
        let db = self.db.lock();
        let conn = &db.conn;

        let max_sequence: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) FROM campaign_state_events WHERE campaign_id = ?1",
                params![snapshot.campaign_id],
                |row| row.get(0),
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        if snapshot.last_event_sequence > max_sequence {
            return Err(EventStoreError::SnapshotPastLog {
                campaign_id: snapshot.campaign_id.clone(),
                last_event_sequence: snapshot.last_event_sequence,
                max_sequence,
            });
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        tx.execute(
            "UPDATE campaign_state_snapshots SET is_current = 0 WHERE campaign_id = ?1",
            params![snapshot.campaign_id],
        )
        .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        tx.execute(
            "INSERT INTO campaign_state_snapshots
                (campaign_id, last_event_sequence, state, state_data, checksum, is_current, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                snapshot.campaign_id,
                snapshot.last_event_sequence,
                snapshot.state,
                snapshot.state_data,
                snapshot.checksum,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;

        tx.commit().map_err(|e| EventStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignSnapshot>, EventStoreError> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT campaign_id, last_event_sequence, state, state_data, checksum
                 FROM campaign_state_snapshots
                 WHERE campaign_id = ?1 AND is_current = 1",
                params![campaign_id],
                |row| {
                    Ok(CampaignSnapshot {
                        campaign_id: row.get(0)?,
                        last_event_sequence: row.get(1)?,
                        state: row.get(2)?,
                        state_data: row.get(3)?,
                        checksum: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("failed to read current snapshot")
            .map_err(EventStoreError::Other)
    }

    pub fn record_transition(&self, transition: &StateTransition) -> Result<(), EventStoreError> {
        let db = self.db.lock();
        db.conn
            .execute(
                "INSERT INTO campaign_state_transitions
                    (campaign_id, from_state, to_state, reason, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    transition.campaign_id,
                    transition.from_state,
                    transition.to_state,
                    transition.reason,
                    transition.occurred_at,
                ],
            )
            .map_err(|e| EventStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
