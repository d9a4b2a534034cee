use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64},
};
use crate::models::GpsPoint;

fn row_to_point(row: &Row) -> Result<GpsPoint> {
    let recorded_at: String = row.get("recorded_at")?;

    Ok(GpsPoint {
        timestamp: parse_datetime(&recorded_at, "recorded_at")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        accuracy: row.get("accuracy")?,
        speed: row.get("speed")?,
        source: row.get("source")?,
    })
}

impl Database {
    /// Store raw fixes. A fix repeating the (user, timestamp, source) of a
    /// stored one is skipped. Returns how many rows were inserted.
    pub async fn insert_points(&self, user_id: &str, points: &[GpsPoint]) -> Result<usize> {
        let user_id = user_id.to_string();
        let points = points.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO gps_points (
                        user_id,
                        recorded_at,
                        latitude,
                        longitude,
                        accuracy,
                        speed,
                        source
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;

                for point in &points {
                    inserted += stmt.execute(params![
                        user_id,
                        format_datetime(&point.timestamp),
                        point.latitude,
                        point.longitude,
                        point.accuracy,
                        point.speed,
                        point.source,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// One page of a user's points at or after `from`, oldest first.
    pub async fn points_page(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GpsPoint>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT recorded_at, latitude, longitude, accuracy, speed, source
                 FROM gps_points
                 WHERE user_id = ?1 AND recorded_at >= ?2
                 ORDER BY recorded_at ASC, source ASC, id ASC
                 LIMIT ?3 OFFSET ?4",
            )?;

            let mut rows = stmt.query(params![
                user_id,
                format_datetime(&from),
                to_i64(limit as u64)?,
                to_i64(offset as u64)?,
            ])?;
            let mut points = Vec::new();
            while let Some(row) = rows.next()? {
                points.push(row_to_point(row)?);
            }
            Ok(points)
        })
        .await
    }

    pub async fn point_count(&self, user_id: &str) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM gps_points WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub async fn users_with_points(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM gps_points ORDER BY user_id")?;
            let users = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }
}
