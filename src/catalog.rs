//! SQLite-backed track catalog and beat-grid lookup.
//!
//! The catalog and beat-analysis collaborators live in one database: tag
//! metadata in `tracks`, analyzer output in `track_analysis`, and phrase
//! grids in `beat_grid`. Analysis values stay separate from tag values so
//! the scorer's resolution chain can prefer them explicitly.

use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags, Row, ffi, params};

use crate::beatgrid::BeatGrid;
use crate::types::Track;

pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixforge")
        .join("catalog.sqlite3")
}

pub fn resolve_db_path() -> String {
    std::env::var("MIXFORGE_CATALOG_PATH")
        .unwrap_or_else(|_| default_path().to_string_lossy().to_string())
}

pub fn open(path: &str) -> Result<Connection, rusqlite::Error> {
    let catalog_path = std::path::Path::new(path);
    if let Some(parent) = catalog_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CANTOPEN),
                Some(format!(
                    "failed to create parent directory {} for {}: {}",
                    parent.display(),
                    catalog_path.display(),
                    err
                )),
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

/// In-memory catalog for tests and offline experiments.
pub fn open_test() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory catalog should open");
    migrate(&conn).expect("catalog migration should succeed");
    conn
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracks (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL DEFAULT '',
            artist        TEXT NOT NULL DEFAULT '',
            genre         TEXT NOT NULL DEFAULT '',
            duration_secs REAL NOT NULL,
            tag_bpm       REAL,
            tag_key       TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS track_analysis (
            track_id         TEXT PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
            bpm              REAL,
            key_camelot      TEXT,
            energy           REAL,
            spectral_profile REAL
        );
        CREATE TABLE IF NOT EXISTS beat_grid (
            track_id         TEXT PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
            first_beat_sec   REAL NOT NULL,
            bpm              REAL NOT NULL,
            beats_per_phrase INTEGER NOT NULL
        );",
    )
}

const TRACK_SELECT: &str = "SELECT t.id, t.title, t.artist, t.genre, t.duration_secs,
        t.tag_bpm, t.tag_key, a.bpm, a.key_camelot, a.energy, a.spectral_profile
     FROM tracks t LEFT JOIN track_analysis a ON a.track_id = t.id";

fn track_from_row(row: &Row<'_>) -> Result<Track, rusqlite::Error> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        genre: row.get(3)?,
        duration_secs: row.get(4)?,
        tag_bpm: row.get(5)?,
        tag_key: row.get(6)?,
        analysis_bpm: row.get(7)?,
        analysis_key: row.get(8)?,
        energy: row.get(9)?,
        spectral_profile: row.get(10)?,
    })
}

pub fn get_track(conn: &Connection, track_id: &str) -> Result<Option<Track>, rusqlite::Error> {
    let sql = format!("{TRACK_SELECT} WHERE t.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![track_id], track_from_row)?;
    rows.next().transpose()
}

pub fn get_tracks_by_ids(
    conn: &Connection,
    ids: &[String],
) -> Result<Vec<Track>, rusqlite::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("{TRACK_SELECT} WHERE t.id IN ({placeholders}) ORDER BY t.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), track_from_row)?;
    rows.collect()
}

pub fn all_track_ids(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id FROM tracks ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Filter criteria for the criteria form of job submission.
#[derive(Debug, Default, Clone)]
pub struct SearchCriteria {
    /// Substring match against title or artist.
    pub query: Option<String>,
    /// Substring match against the genre tag.
    pub genre: Option<String>,
    pub bpm_min: Option<f64>,
    pub bpm_max: Option<f64>,
    pub limit: Option<u32>,
}

/// Escape LIKE wildcards in user-supplied filter text.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub fn search_tracks(
    conn: &Connection,
    criteria: &SearchCriteria,
) -> Result<Vec<Track>, rusqlite::Error> {
    let mut sql = format!("{TRACK_SELECT} WHERE 1=1");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref query) = criteria.query {
        let idx = args.len() + 1;
        sql.push_str(&format!(
            " AND (t.title LIKE ?{idx} ESCAPE '\\' OR t.artist LIKE ?{idx} ESCAPE '\\')"
        ));
        args.push(Box::new(format!("%{}%", escape_like(query))));
    }
    if let Some(ref genre) = criteria.genre {
        sql.push_str(&format!(" AND t.genre LIKE ?{} ESCAPE '\\'", args.len() + 1));
        args.push(Box::new(format!("%{}%", escape_like(genre))));
    }
    if let Some(bpm_min) = criteria.bpm_min {
        sql.push_str(&format!(" AND COALESCE(a.bpm, t.tag_bpm) >= ?{}", args.len() + 1));
        args.push(Box::new(bpm_min));
    }
    if let Some(bpm_max) = criteria.bpm_max {
        sql.push_str(&format!(" AND COALESCE(a.bpm, t.tag_bpm) <= ?{}", args.len() + 1));
        args.push(Box::new(bpm_max));
    }

    let limit = criteria.limit.unwrap_or(50).min(200);
    sql.push_str(&format!(" ORDER BY t.id LIMIT {limit}"));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
        track_from_row,
    )?;
    rows.collect()
}

/// Beat-grid lookup. Returns None when the track has no usable grid.
pub fn get_beat_grid(
    conn: &Connection,
    track_id: &str,
) -> Result<Option<BeatGrid>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT first_beat_sec, bpm, beats_per_phrase FROM beat_grid WHERE track_id = ?1",
    )?;
    let mut rows = stmt.query_map(params![track_id], |row| {
        Ok((
            row.get::<_, f64>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    Ok(rows
        .next()
        .transpose()?
        .and_then(|(first, bpm, beats)| BeatGrid::new(first, bpm, beats.max(0) as u32)))
}

pub fn insert_track(conn: &Connection, track: &Track) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO tracks (id, title, artist, genre, duration_secs, tag_bpm, tag_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            track.id,
            track.title,
            track.artist,
            track.genre,
            track.duration_secs,
            track.tag_bpm,
            track.tag_key,
        ],
    )?;
    if track.analysis_bpm.is_some()
        || track.analysis_key.is_some()
        || track.energy.is_some()
        || track.spectral_profile.is_some()
    {
        conn.execute(
            "INSERT INTO track_analysis (track_id, bpm, key_camelot, energy, spectral_profile)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                track.id,
                track.analysis_bpm,
                track.analysis_key,
                track.energy,
                track.spectral_profile,
            ],
        )?;
    }
    Ok(())
}

pub fn insert_beat_grid(
    conn: &Connection,
    track_id: &str,
    grid: BeatGrid,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO beat_grid (track_id, first_beat_sec, bpm, beats_per_phrase)
         VALUES (?1, ?2, ?3, ?4)",
        params![track_id, grid.first_beat_sec, grid.bpm, grid.beats_per_phrase],
    )?;
    Ok(())
}
