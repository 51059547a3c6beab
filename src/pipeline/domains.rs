//! CRUD for `generated_domains` rows (§3), shared by all three phase workers.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::DbHandle;
use crate::domain::{DnsStatus, FeatureVector, GeneratedDomain};

#[derive(Clone)]
pub struct DomainRepository {
    db: DbHandle,
}

impl DomainRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn insert(&self, domain: &GeneratedDomain) -> Result<()> {
        let db = self.db.lock();
        db.conn
            .execute(
                "INSERT INTO generated_domains
                    (campaign_id, domain_name, dns_status, ips, http_status, title, keywords, feature_vector, final_score, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(campaign_id, domain_name) DO NOTHING",
                params![
                    domain.campaign_id,
                    domain.name,
                    domain.dns_status.as_str(),
                    serde_json::to_string(&domain.ips)?,
                    domain.http_status,
                    domain.title,
                    serde_json::to_string(&domain.keywords)?,
                    domain.feature_vector.as_ref().map(serde_json::to_string).transpose()?,
                    domain.final_score,
                    domain.created_at,
                ],
            )
            .context("failed to insert generated domain")?;
        Ok(())
    }

    pub fn get(&self, campaign_id: &str, name: &str) -> Result<Option<GeneratedDomain>> {
        let db = self.db.lock();
        db.conn
            .query_row(
                "SELECT campaign_id, domain_name, dns_status, ips, http_status, title, keywords, feature_vector, final_score, created_at, updated_at
                 FROM generated_domains WHERE campaign_id = ?1 AND domain_name = ?2",
                params![campaign_id, name],
                Self::row_to_domain,
            )
            .optional()
            .context("failed to query generated domain")?
            .transpose()
    }

    /// Domains still awaiting DNS resolution for a campaign, in insertion order.
    pub fn pending_dns(&self, campaign_id: &str, limit: i64) -> Result<Vec<GeneratedDomain>> {
        self.by_dns_status(campaign_id, DnsStatus::Pending, limit)
    }

    /// Domains DNS-resolved but not yet HTTP-scored, in insertion order.
    pub fn pending_http(&self, campaign_id: &str, limit: i64) -> Result<Vec<GeneratedDomain>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            "SELECT campaign_id, domain_name, dns_status, ips, http_status, title, keywords, feature_vector, final_score, created_at, updated_at
             FROM generated_domains
             WHERE campaign_id = ?1 AND dns_status = ?2 AND feature_vector IS NULL
             ORDER BY created_at ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![campaign_id, DnsStatus::Resolved.as_str(), limit], Self::row_to_domain)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    fn by_dns_status(&self, campaign_id: &str, status: DnsStatus, limit: i64) -> Result<Vec<GeneratedDomain>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            "SELECT campaign_id, domain_name, dns_status, ips, http_status, title, keywords, feature_vector, final_score, created_at, updated_at
             FROM generated_domains
             WHERE campaign_id = ?1 AND dns_status = ?2
             ORDER BY created_at ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![campaign_id, status.as_str(), limit], Self::row_to_domain)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn update_dns_result(&self, campaign_id: &str, name: &str, status: DnsStatus, ips: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn
            .execute(
                "UPDATE generated_domains SET dns_status = ?1, ips = ?2, updated_at = ?3
                 WHERE campaign_id = ?4 AND domain_name = ?5",
                params![status.as_str(), serde_json::to_string(ips)?, now, campaign_id, name],
            )
            .context("failed to update dns result")?;
        Ok(())
    }

    /// Persists the HTTP worker's output atomically with the domain row
    /// (§4.3 step 7): status, title, keywords, feature vector, and score all
    /// land in one UPDATE.
    #[allow(clippy::too_many_arguments)]
    pub fn update_http_result(
        &self,
        campaign_id: &str,
        name: &str,
        http_status: Option<u16>,
        title: Option<&str>,
        keywords: &[String],
        feature_vector: &FeatureVector,
        final_score: f64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn
            .execute(
                "UPDATE generated_domains
                 SET http_status = ?1, title = ?2, keywords = ?3, feature_vector = ?4, final_score = ?5, updated_at = ?6
                 WHERE campaign_id = ?7 AND domain_name = ?8",
                params![
                    http_status,
                    title,
                    serde_json::to_string(keywords)?,
                    serde_json::to_string(feature_vector)?,
                    final_score,
                    now,
                    campaign_id,
                    name,
                ],
            )
            .context("failed to update http result")?;
        Ok(())
    }

    pub fn update_score_only(&self, campaign_id: &str, name: &str, final_score: f64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.conn
            .execute(
                "UPDATE generated_domains SET final_score = ?1, updated_at = ?2 WHERE campaign_id = ?3 AND domain_name = ?4",
                params![final_score, now, campaign_id, name],
            )
            .context("failed to update score")?;
        Ok(())
    }

    /// All scored domains (feature vector present), for rescore (§4.3 Rescore).
    pub fn scored_domains(&self, campaign_id: &str) -> Result<Vec<GeneratedDomain>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            "SELECT campaign_id, domain_name, dns_status, ips, http_status, title, keywords, feature_vector, final_score, created_at, updated_at
             FROM generated_domains
             WHERE campaign_id = ?1 AND feature_vector IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![campaign_id], Self::row_to_domain)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn count_total(&self, campaign_id: &str) -> Result<u64> {
        let db = self.db.lock();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM generated_domains WHERE campaign_id = ?1", params![campaign_id], |r| r.get(0))
            .context("failed to count domains")?;
        Ok(count as u64)
    }

    fn row_to_domain(row: &rusqlite::Row) -> rusqlite::Result<Result<GeneratedDomain>> {
        let campaign_id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let dns_status_raw: String = row.get(2)?;
        let ips_raw: String = row.get(3)?;
        let http_status: Option<u16> = row.get(4)?;
        let title: Option<String> = row.get(5)?;
        let keywords_raw: String = row.get(6)?;
        let feature_vector_raw: Option<String> = row.get(7)?;
        let final_score: Option<f64> = row.get(8)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok((|| -> Result<GeneratedDomain> {
            Ok(GeneratedDomain {
                campaign_id,
                name,
                dns_status: DnsStatus::from_str(&dns_status_raw).map_err(anyhow::Error::msg)?,
                ips: serde_json::from_str(&ips_raw)?,
                http_status,
                title,
                keywords: serde_json::from_str(&keywords_raw)?,
                feature_vector: feature_vector_raw.map(|s| serde_json::from_str(&s)).transpose()?,
                final_score,
                created_at,
                updated_at,
            })
        })())
    }
}
