//! SQLite-backed storage for campaigns and their phase configs.
//!
//! Follows the row-struct-to-domain-struct conversion pattern used
//! elsewhere in this codebase's SQLite layer: a private row type mirrors
//! the table's TEXT-encoded columns, with an `into_domain` conversion that
//! parses them into the typed enums.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::DbHandle;
use crate::domain::{Campaign, CampaignState, Phase, PhaseConfig};

struct CampaignRow {
    id: String,
    name: String,
    owner: String,
    campaign_type: String,
    state: String,
    configuration: String,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl CampaignRow {
    fn into_domain(self) -> Result<Campaign> {
        Ok(Campaign {
            id: self.id,
            name: self.name,
            owner: self.owner,
            campaign_type: self.campaign_type,
            state: CampaignState::from_str(&self.state).map_err(anyhow::Error::msg)?,
            configuration: serde_json::from_str(&self.configuration).unwrap_or(serde_json::json!({})),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

pub struct CampaignRepository {
    db: DbHandle,
}

impl CampaignRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn create(&self, name: &str, owner: &str, campaign_type: &str) -> Result<Campaign> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn
            .execute(
                "INSERT INTO campaigns (id, name, owner, campaign_type, state, configuration, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'draft', '{}', ?5, ?5)",
                params![id, name, owner, campaign_type, now],
            )
            .context("failed to insert campaign")?;
        drop(db);
        self.get(&id)?.context("campaign not found after insert")
    }

    pub fn get(&self, id: &str) -> Result<Option<Campaign>> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT id, name, owner, campaign_type, state, configuration, created_at, updated_at, started_at, completed_at
                 FROM campaigns WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CampaignRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner: row.get(2)?,
                        campaign_type: row.get(3)?,
                        state: row.get(4)?,
                        configuration: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                        started_at: row.get(8)?,
                        completed_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .context("failed to query campaign")?
            .map(CampaignRow::into_domain)
            .transpose()
    }

    /// Updates state and the `started_at`/`completed_at` columns consistent
    /// with the invariants in §3: `started_at` set iff the campaign has ever
    /// run, `completed_at` set iff the campaign reached a terminal state.
    pub fn update_state(&self, id: &str, new_state: CampaignState) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();

        if new_state == CampaignState::Running {
            db.conn.execute(
                "UPDATE campaigns SET state = ?1, updated_at = ?2, started_at = COALESCE(started_at, ?2) WHERE id = ?3",
                params![new_state.as_str(), now, id],
            )
        } else if new_state.is_terminal() {
            db.conn.execute(
                "UPDATE campaigns SET state = ?1, updated_at = ?2, completed_at = ?2 WHERE id = ?3",
                params![new_state.as_str(), now, id],
            )
        } else {
            db.conn.execute(
                "UPDATE campaigns SET state = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_state.as_str(), now, id],
            )
        }
        .context("failed to update campaign state")?;
        Ok(())
    }

    pub fn upsert_phase_config(&self, campaign_id: &str, cursor: i64, config: &PhaseConfig) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let config_json = serde_json::to_string(config).context("failed to serialize phase config")?;
        let id = format!("{campaign_id}:{}", config.phase().as_str());
        let db = self.db.lock();
        db.conn
            .execute(
                "INSERT INTO campaign_jobs (id, campaign_id, phase, cursor, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(campaign_id, phase) DO UPDATE SET
                     config = excluded.config,
                     updated_at = excluded.updated_at",
                params![id, campaign_id, config.phase().as_str(), cursor, config_json, now],
            )
            .context("failed to upsert phase config")?;
        Ok(())
    }

    pub fn get_phase_config(&self, campaign_id: &str, phase: Phase) -> Result<Option<PhaseConfig>> {
        let db = self.db.lock();
        let config_json: Option<String> = db
            .conn
            .query_row(
                "SELECT config FROM campaign_jobs WHERE campaign_id = ?1 AND phase = ?2",
                params![campaign_id, phase.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query phase config")?;
        config_json
            .map(|json| serde_json::from_str(&json).context("failed to deserialize phase config"))
            .transpose()
    }

    pub fn get_cursor(&self, campaign_id: &str, phase: Phase) -> Result<i64> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT cursor FROM campaign_jobs WHERE campaign_id = ?1 AND phase = ?2",
                params![campaign_id, phase.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query phase cursor")
            .map(|v| v.unwrap_or(0))
    }

    pub fn set_cursor(&self, campaign_id: &str, phase: Phase, cursor: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn
            .execute(
                "UPDATE campaign_jobs SET cursor = ?1, updated_at = ?2 WHERE campaign_id = ?3 AND phase = ?4",
                params![cursor, now, campaign_id, phase.as_str()],
            )
            .context("failed to set phase cursor")?;
        Ok(())
    }

    /// All campaigns in `running` or `paused` state, used by orchestrator
    /// recovery on process start (§4.1).
    pub fn list_recoverable(&self) -> Result<Vec<Campaign>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            "SELECT id, name, owner, campaign_type, state, configuration, created_at, updated_at, started_at, completed_at
             FROM campaigns WHERE state IN ('running', 'paused')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CampaignRow {
                id: row.get(0)?,
                name: row.get(1)?,
                owner: row.get(2)?,
                campaign_type: row.get(3)?,
                state: row.get(4)?,
                configuration: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                started_at: row.get(8)?,
                completed_at: row.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_domain()?);
        }
        Ok(out)
    }
}
