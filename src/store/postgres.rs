//! PostgreSQL/TimescaleDB implementation of the time-series store

use crate::error::{LifecycleError, Result};
use crate::models::{EventRow, StorageTier, TimeRange};
use crate::store::{FilterValue, QueryFilter, TimeSeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// Tier tables are fixed identifiers; everything else is a bound parameter.
fn tier_table(tier: StorageTier) -> &'static str {
    match tier {
        StorageTier::Hot => "events_hot",
        StorageTier::Warm => "events_warm",
        StorageTier::Cold => "events_cold",
    }
}

/// SQL fragment for an allow-listed filter key. The value is always bound;
/// an unknown key is a programming error upstream and rejected here too.
fn filter_fragment(key: &str, placeholder: usize) -> Result<String> {
    let fragment = match key {
        "entity" => format!("entity = ${}", placeholder),
        "series" => format!("series = ${}", placeholder),
        "min_value" => format!("value >= ${}", placeholder),
        "max_value" => format!("value <= ${}", placeholder),
        other => {
            return Err(LifecycleError::InvalidQuery(format!(
                "unknown filter key '{}'",
                other
            )))
        }
    };
    Ok(fragment)
}

/// Time-series store backed by PostgreSQL/TimescaleDB.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new connection pool against the given database.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| LifecycleError::TransientStore(format!("connect failed: {}", e)))?;

        info!("Time-series store connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_from_pg(row: PgRow) -> EventRow {
        EventRow {
            series: row.get("series"),
            entity: row.get("entity"),
            value: row.get("value"),
            recorded_at: row.get("recorded_at"),
        }
    }
}

#[async_trait]
impl TimeSeriesStore for PostgresStore {
    async fn query(
        &self,
        tier: StorageTier,
        range: TimeRange,
        selector: &str,
        filters: &[QueryFilter],
    ) -> Result<Vec<EventRow>> {
        let table = tier_table(tier);
        let mut sql = format!(
            "SELECT series, entity, value, recorded_at FROM {} \
             WHERE series = $1 AND recorded_at < $2",
            table
        );
        let mut placeholder = 3;
        if range.start.is_some() {
            sql.push_str(&format!(" AND recorded_at >= ${}", placeholder));
            placeholder += 1;
        }
        for filter in filters {
            sql.push_str(" AND ");
            sql.push_str(&filter_fragment(&filter.key, placeholder)?);
            placeholder += 1;
        }
        sql.push_str(" ORDER BY recorded_at ASC");

        let mut query = sqlx::query(&sql).bind(selector).bind(range.end);
        if let Some(start) = range.start {
            query = query.bind(start);
        }
        for filter in filters {
            query = match &filter.value {
                FilterValue::Text(v) => query.bind(v.clone()),
                FilterValue::Number(v) => query.bind(*v),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Self::row_from_pg).collect())
    }

    async fn write(&self, tier: StorageTier, rows: &[EventRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = tier_table(tier);
        let sql = format!(
            "INSERT INTO {} (series, entity, value, recorded_at) VALUES ($1, $2, $3, $4)",
            table
        );

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(&row.series)
                .bind(&row.entity)
                .bind(row.value)
                .bind(row.recorded_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn delete(&self, tier: StorageTier, range: TimeRange, selector: &str) -> Result<u64> {
        let table = tier_table(tier);
        let mut sql = format!(
            "DELETE FROM {} WHERE series = $1 AND recorded_at < $2",
            table
        );
        if range.start.is_some() {
            sql.push_str(" AND recorded_at >= $3");
        }

        let mut query = sqlx::query(&sql).bind(selector).bind(range.end);
        if let Some(start) = range.start {
            query = query.bind(start);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn tier_usage(&self, tier: StorageTier) -> Result<u64> {
        let table = tier_table(tier);
        let sql = format!("SELECT pg_total_relation_size('{}') AS bytes", table);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let bytes: i64 = row.get("bytes");
        Ok(bytes.max(0) as u64)
    }

    async fn earliest(
        &self,
        tier: StorageTier,
        selector: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let table = tier_table(tier);
        let sql = format!(
            "SELECT MIN(recorded_at) AS earliest FROM {} WHERE series = $1",
            table
        );
        let row = sqlx::query(&sql)
            .bind(selector)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("earliest"))
    }

    async fn series(&self, tier: StorageTier) -> Result<Vec<String>> {
        let table = tier_table(tier);
        let sql = format!("SELECT DISTINCT series FROM {} ORDER BY series", table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| row.get("series")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_tables_are_fixed() {
        assert_eq!(tier_table(StorageTier::Hot), "events_hot");
        assert_eq!(tier_table(StorageTier::Warm), "events_warm");
        assert_eq!(tier_table(StorageTier::Cold), "events_cold");
    }

    #[test]
    fn test_filter_fragment_rejects_unknown_keys() {
        assert!(filter_fragment("entity", 3).is_ok());
        let err = filter_fragment("entity; DROP TABLE events_hot", 3).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidQuery(_)));
    }

    #[test]
    fn test_filter_fragment_binds_values() {
        // Values never appear in the fragment, only placeholders
        let fragment = filter_fragment("min_value", 4).unwrap();
        assert_eq!(fragment, "value >= $4");
    }
}
