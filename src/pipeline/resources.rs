//! SQLite store-of-record for personas, proxies, and keyword sets, plus the
//! [`CacheStore`] adapters the read-through cache (§4.5) reads through to.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::cache::CacheStore;
use crate::db::DbHandle;
use crate::domain::{KeywordRule, KeywordSet, Persona, Proxy, ProxyHealth, ProxyProtocol};
use crate::errors::CacheError;

pub struct PersonaRepository {
    db: DbHandle,
}

impl PersonaRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn upsert(&self, persona: &Persona) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn.execute(
            "INSERT INTO personas (id, name, headers, tls_fingerprint, jitter_min_ms, jitter_max_ms, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, headers = excluded.headers, tls_fingerprint = excluded.tls_fingerprint,
                jitter_min_ms = excluded.jitter_min_ms, jitter_max_ms = excluded.jitter_max_ms, updated_at = excluded.updated_at",
            params![
                persona.id,
                persona.name,
                serde_json::to_string(&persona.headers)?,
                persona.tls_fingerprint,
                persona.jitter_min_ms,
                persona.jitter_max_ms,
                now,
            ],
        )?;
        Ok(())
    }

    fn row_to_persona(row: &rusqlite::Row) -> rusqlite::Result<Persona> {
        let headers_raw: String = row.get(2)?;
        let headers: HashMap<String, String> = serde_json::from_str(&headers_raw).unwrap_or_default();
        Ok(Persona {
            id: row.get(0)?,
            name: row.get(1)?,
            headers,
            tls_fingerprint: row.get(3)?,
            jitter_min_ms: row.get(4)?,
            jitter_max_ms: row.get(5)?,
        })
    }
}

impl CacheStore<Persona> for PersonaRepository {
    fn load(&self, id: &str) -> Result<Option<Persona>, CacheError> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT id, name, headers, tls_fingerprint, jitter_min_ms, jitter_max_ms FROM personas WHERE id = ?1",
                params![id],
                Self::row_to_persona,
            )
            .optional()
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    fn load_batch(&self, ids: &[String]) -> Result<HashMap<String, Persona>, CacheError> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(p) = self.load(id)? {
                out.insert(id.clone(), p);
            }
        }
        Ok(out)
    }
}

pub struct ProxyRepository {
    db: DbHandle,
}

impl ProxyRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn upsert(&self, proxy: &Proxy) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn.execute(
            "INSERT INTO proxies (id, address, protocol, enabled, health, last_checked_at, weight, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                address = excluded.address, protocol = excluded.protocol, enabled = excluded.enabled,
                health = excluded.health, last_checked_at = excluded.last_checked_at, weight = excluded.weight,
                updated_at = excluded.updated_at",
            params![
                proxy.id,
                proxy.address,
                proxy.protocol.as_str(),
                proxy.enabled,
                proxy.health.as_str(),
                proxy.last_checked_at,
                proxy.weight,
                now,
            ],
        )?;
        Ok(())
    }

    /// Marks a proxy's health, recording the transition (§3 invariant: health
    /// transitions invalidate the cached entry — callers must call
    /// `cache.invalidate(id)` after this returns).
    pub fn set_health(&self, id: &str, health: ProxyHealth) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn.execute(
            "UPDATE proxies SET health = ?1, last_checked_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![health.as_str(), now, id],
        )?;
        Ok(())
    }

    pub fn enabled_proxies(&self) -> anyhow::Result<Vec<Proxy>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            "SELECT id, address, protocol, enabled, health, last_checked_at, weight FROM proxies WHERE enabled = 1",
        )?;
        let rows = stmt.query_map([], Self::row_to_proxy)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.map_err(anyhow::Error::msg)?);
        }
        Ok(out)
    }

    fn row_to_proxy(row: &rusqlite::Row) -> rusqlite::Result<Result<Proxy, String>> {
        let protocol_raw: String = row.get(2)?;
        let health_raw: String = row.get(4)?;
        Ok((|| -> Result<Proxy, String> {
            Ok(Proxy {
                id: row.get(0)?,
                address: row.get(1)?,
                protocol: ProxyProtocol::from_str(&protocol_raw)?,
                enabled: row.get(3)?,
                health: ProxyHealth::from_str(&health_raw)?,
                last_checked_at: row.get(5)?,
                weight: row.get(6)?,
            })
        })())
    }
}

impl CacheStore<Proxy> for ProxyRepository {
    fn load(&self, id: &str) -> Result<Option<Proxy>, CacheError> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT id, address, protocol, enabled, health, last_checked_at, weight FROM proxies WHERE id = ?1",
                params![id],
                Self::row_to_proxy,
            )
            .optional()
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?
            .map(|r| r.map_err(CacheError::StoreUnavailable))
            .transpose()
    }

    fn load_batch(&self, ids: &[String]) -> Result<HashMap<String, Proxy>, CacheError> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(p) = self.load(id)? {
                out.insert(id.clone(), p);
            }
        }
        Ok(out)
    }
}

pub struct KeywordSetRepository {
    db: DbHandle,
}

impl KeywordSetRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn upsert(&self, set: &KeywordSet) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn.execute(
            "INSERT INTO keyword_sets (id, name, rules, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, rules = excluded.rules, version = excluded.version, updated_at = excluded.updated_at",
            params![set.id, set.name, serde_json::to_string(&set.rules)?, set.version, now],
        )?;
        Ok(())
    }

    fn row_to_set(row: &rusqlite::Row) -> rusqlite::Result<KeywordSet> {
        let rules_raw: String = row.get(2)?;
        let rules: Vec<KeywordRule> = serde_json::from_str(&rules_raw).unwrap_or_default();
        Ok(KeywordSet {
            id: row.get(0)?,
            name: row.get(1)?,
            rules,
            version: row.get(3)?,
        })
    }
}

impl CacheStore<KeywordSet> for KeywordSetRepository {
    fn load(&self, id: &str) -> Result<Option<KeywordSet>, CacheError> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT id, name, rules, version FROM keyword_sets WHERE id = ?1",
                params![id],
                Self::row_to_set,
            )
            .optional()
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    fn load_batch(&self, ids: &[String]) -> Result<HashMap<String, KeywordSet>, CacheError> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(s) = self.load(id)? {
                out.insert(id.clone(), s);
            }
        }
        Ok(out)
    }
}
