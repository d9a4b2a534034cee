use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_travel_type, required},
};
use crate::models::{DataGap, PathPoint, Stay, TimelineEvent, Trip};

fn row_to_event(row: &Row) -> Result<TimelineEvent> {
    let kind: String = row.get("kind")?;
    let start: String = row.get("start_time")?;
    let end: String = row.get("end_time")?;
    let start = parse_datetime(&start, "start_time")?;
    let end = parse_datetime(&end, "end_time")?;

    let event = match kind.as_str() {
        "stay" => TimelineEvent::Stay(Stay {
            start,
            end,
            latitude: required(row.get("latitude")?, "latitude")?,
            longitude: required(row.get("longitude")?, "longitude")?,
            place_id: row.get("place_id")?,
        }),
        "trip" => {
            let path_json: Option<String> = row.get("path_json")?;
            let path: Vec<PathPoint> = match path_json {
                Some(raw) => serde_json::from_str(&raw).context("failed to parse path_json")?,
                None => Vec::new(),
            };
            TimelineEvent::Trip(Trip {
                start,
                end,
                distance_meters: row.get::<_, Option<f64>>("distance_meters")?.unwrap_or(0.0),
                path,
                travel_type: parse_travel_type(row.get("travel_type")?)?,
                avg_speed_kmh: row.get::<_, Option<f64>>("avg_speed_kmh")?.unwrap_or(0.0),
                max_speed_kmh: row.get::<_, Option<f64>>("max_speed_kmh")?.unwrap_or(0.0),
            })
        }
        "data_gap" => TimelineEvent::DataGap(DataGap { start, end }),
        other => return Err(anyhow!("unknown timeline event kind {other}")),
    };
    Ok(event)
}

fn insert_events(tx: &Transaction<'_>, user_id: &str, events: &[TimelineEvent]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO timeline_events (
            id,
            user_id,
            kind,
            start_time,
            end_time,
            duration_secs,
            latitude,
            longitude,
            place_id,
            distance_meters,
            travel_type,
            avg_speed_kmh,
            max_speed_kmh,
            path_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;

    for event in events {
        let (latitude, longitude, place_id) = match event {
            TimelineEvent::Stay(stay) => (Some(stay.latitude), Some(stay.longitude), stay.place_id.clone()),
            _ => (None, None, None),
        };
        let (distance, travel_type, avg_speed, max_speed, path_json) = match event {
            TimelineEvent::Trip(trip) => (
                Some(trip.distance_meters),
                Some(trip.travel_type.as_str()),
                Some(trip.avg_speed_kmh),
                Some(trip.max_speed_kmh),
                Some(serde_json::to_string(&trip.path).context("failed to encode trip path")?),
            ),
            _ => (None, None, None, None, None),
        };

        stmt.execute(params![
            Uuid::new_v4().to_string(),
            user_id,
            event.kind(),
            format_datetime(&event.start()),
            format_datetime(&event.end()),
            event.duration_secs(),
            latitude,
            longitude,
            place_id,
            distance,
            travel_type,
            avg_speed,
            max_speed,
            path_json,
        ])?;
    }
    Ok(())
}

impl Database {
    /// Swap the user's whole timeline in one transaction.
    pub async fn replace_events(&self, user_id: &str, events: &[TimelineEvent]) -> Result<()> {
        let user_id = user_id.to_string();
        let events = events.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM timeline_events WHERE user_id = ?1",
                params![user_id],
            )?;
            insert_events(&tx, &user_id, &events)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Swap the tail of the user's timeline starting at `from`, in one transaction.
    pub async fn replace_events_from(
        &self,
        user_id: &str,
        events: &[TimelineEvent],
        from: DateTime<Utc>,
    ) -> Result<()> {
        let user_id = user_id.to_string();
        let events = events.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM timeline_events WHERE user_id = ?1 AND start_time >= ?2",
                params![user_id, format_datetime(&from)],
            )?;
            insert_events(&tx, &user_id, &events)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn events_for_user(&self, user_id: &str) -> Result<Vec<TimelineEvent>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, start_time, end_time, latitude, longitude, place_id,
                        distance_meters, travel_type, avg_speed_kmh, max_speed_kmh, path_json
                 FROM timeline_events
                 WHERE user_id = ?1
                 ORDER BY start_time ASC, end_time ASC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    /// Start of the user's latest event, optionally of one kind only.
    pub async fn latest_event_start(
        &self,
        user_id: &str,
        kind: Option<&'static str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let latest: Option<String> = conn
                .query_row(
                    "SELECT MAX(start_time) FROM timeline_events
                     WHERE user_id = ?1 AND (?2 IS NULL OR kind = ?2)",
                    params![user_id, kind],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            latest
                .map(|raw| parse_datetime(&raw, "start_time"))
                .transpose()
        })
        .await
    }
}
