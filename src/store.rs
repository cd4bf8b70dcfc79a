//! Append-only SQLite persistence for chat messages and the
//! workout / food logs derived from them.
//!
//! One [`Store`] is opened at startup and shared as `Arc<Store>`. The single
//! connection sits behind a mutex, so concurrent requests serialize their
//! statements. Inserts never replace: a duplicate id surfaces as
//! [`AppError::Storage`]. Listings are oldest first, ties broken by insertion
//! order.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Placeholder owner for derived log rows; there is only one user.
pub const DEFAULT_USER_ID: &str = "default-user";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS workouts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        exercise TEXT NOT NULL,
        sets INTEGER,
        reps INTEGER,
        weight REAL,
        weight_unit TEXT,
        duration TEXT,
        timestamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS food_logs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        food_name TEXT NOT NULL,
        calories INTEGER,
        protein REAL,
        carbs REAL,
        fat REAL,
        timestamp TEXT NOT NULL
    );
";

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(AppError::Storage(format!("unknown message role '{other}'"))),
        }
    }
}

/// One chat turn. Serialized with the timestamp as an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// New message with a fresh time-ordered id, stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { id: new_id(), role, content: content.into(), timestamp: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutEntry {
    pub id: String,
    pub user_id: String,
    pub exercise: String,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
    pub weight: Option<f64>,
    pub weight_unit: Option<String>,
    pub duration: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub id: String,
    pub user_id: String,
    pub food_name: String,
    pub calories: Option<i64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// UUIDv7 string: unique, and sorts by creation time.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn to_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Run a store operation on tokio's blocking pool. All async callers go
/// through here so SQLite I/O never occupies a runtime worker.
pub async fn run_blocking<T, F>(store: &Arc<Store>, op: &'static str, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Store) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| AppError::Storage(format!("{op} join: {e}")))?
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AppError::Storage(format!("open {}: {e}", path.display())))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database; contents vanish on drop.
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Storage(format!("open in-memory: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| AppError::Storage(format!("init schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::Storage("connection mutex poisoned".into()))
    }

    pub fn append_message(&self, msg: &Message) -> Result<(), AppError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![msg.id, msg.role.as_str(), msg.content, to_iso8601(&msg.timestamp)],
        )
        .map_err(|e| AppError::Storage(format!("insert message {}: {e}", msg.id)))?;
        Ok(())
    }

    pub fn append_workout(&self, entry: &WorkoutEntry) -> Result<(), AppError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workouts (id, user_id, exercise, sets, reps, weight, weight_unit, duration, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.user_id,
                entry.exercise,
                entry.sets,
                entry.reps,
                entry.weight,
                entry.weight_unit,
                entry.duration,
                to_iso8601(&entry.timestamp),
            ],
        )
        .map_err(|e| AppError::Storage(format!("insert workout {}: {e}", entry.id)))?;
        Ok(())
    }

    pub fn append_food(&self, entry: &FoodEntry) -> Result<(), AppError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO food_logs (id, user_id, food_name, calories, protein, carbs, fat, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.user_id,
                entry.food_name,
                entry.calories,
                entry.protein,
                entry.carbs,
                entry.fat,
                to_iso8601(&entry.timestamp),
            ],
        )
        .map_err(|e| AppError::Storage(format!("insert food log {}: {e}", entry.id)))?;
        Ok(())
    }

    /// All messages, oldest first.
    pub fn list_messages(&self) -> Result<Vec<Message>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, role, content, timestamp FROM messages ORDER BY timestamp ASC, rowid ASC")
            .map_err(|e| AppError::Storage(format!("prepare list_messages: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    parse_ts(row, 3)?,
                ))
            })
            .map_err(|e| AppError::Storage(format!("query list_messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, role, content, timestamp) =
                row.map_err(|e| AppError::Storage(format!("map list_messages row: {e}")))?;
            messages.push(Message { id, role: role.parse()?, content, timestamp });
        }
        Ok(messages)
    }

    /// All workout entries, oldest first.
    pub fn list_workouts(&self) -> Result<Vec<WorkoutEntry>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, exercise, sets, reps, weight, weight_unit, duration, timestamp
                 FROM workouts ORDER BY timestamp ASC, rowid ASC",
            )
            .map_err(|e| AppError::Storage(format!("prepare list_workouts: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(WorkoutEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    exercise: row.get(2)?,
                    sets: row.get(3)?,
                    reps: row.get(4)?,
                    weight: row.get(5)?,
                    weight_unit: row.get(6)?,
                    duration: row.get(7)?,
                    timestamp: parse_ts(row, 8)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("query list_workouts: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("map list_workouts row: {e}")))
    }

    /// All food log entries, oldest first.
    pub fn list_food_logs(&self) -> Result<Vec<FoodEntry>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, food_name, calories, protein, carbs, fat, timestamp
                 FROM food_logs ORDER BY timestamp ASC, rowid ASC",
            )
            .map_err(|e| AppError::Storage(format!("prepare list_food_logs: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(FoodEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    food_name: row.get(2)?,
                    calories: row.get(3)?,
                    protein: row.get(4)?,
                    carbs: row.get(5)?,
                    fat: row.get(6)?,
                    timestamp: parse_ts(row, 7)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("query list_food_logs: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("map list_food_logs row: {e}")))
    }
}
