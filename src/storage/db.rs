use chrono::{Duration, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Result};

use crate::core::config;

/// A registered user. The id is shared between Telegram (chat id) and
/// the HTTP API.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub created_at: String,
}

impl User {
    /// True when the user has a confirmed email and may convert.
    pub fn is_verified(&self) -> bool {
        self.email_verified && self.email.is_some()
    }
}

/// One stored conversion. Amounts are kept as decimal strings so no
/// precision is lost in SQLite.
#[derive(Debug, Clone)]
pub struct ConversionRecord {
    pub id: i64,
    pub user_id: i64,
    pub from_code: String,
    pub to_code: String,
    pub amount: String,
    pub rate: String,
    pub fee: String,
    pub result: String,
    pub created_at: String,
}

/// Outcome of checking a submitted verification code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Code matched; the email is now verified.
    Verified,
    /// Wrong code; this many attempts remain before the code is voided.
    WrongCode { remaining: u32 },
    /// The code expired or ran out of attempts. A new one must be requested.
    Expired,
    /// No pending code for this user.
    NotFound,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and runs schema migrations.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    // Ensure schema is up to date on first connection
    let conn = pool.get()?;
    if let Err(e) = migrate_schema(&conn) {
        log::warn!("Failed to migrate schema: {}", e);
    }

    Ok(pool)
}

/// Get a connection from the pool
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Migrate database schema to ensure all required tables and columns exist.
/// Tables are created if missing; columns are added to existing tables.
pub fn migrate_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT,
            email TEXT,
            email_verified INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS verification_codes (
            user_id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            expires_at DATETIME NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            from_code TEXT NOT NULL,
            to_code TEXT NOT NULL,
            amount TEXT NOT NULL,
            rate TEXT NOT NULL,
            fee TEXT NOT NULL,
            result TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conversions_user_created
         ON conversions(user_id, created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS request_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            request_text TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Check columns on users for databases created by older builds
    let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }

    if !columns.contains(&"email_verified".to_string()) {
        log::info!("Adding missing column: email_verified to users table");
        if let Err(e) = conn.execute(
            "ALTER TABLE users ADD COLUMN email_verified INTEGER NOT NULL DEFAULT 0",
            [],
        ) {
            log::warn!("Failed to add email_verified column: {}", e);
        }
    }

    Ok(())
}

/// Creates a user if one does not exist yet; refreshes the username
/// when it does.
pub fn create_user(conn: &DbConnection, id: i64, username: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET username = COALESCE(?2, username)",
        &[&id as &dyn rusqlite::ToSql, &username as &dyn rusqlite::ToSql],
    )?;
    Ok(())
}

pub fn get_user(conn: &DbConnection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, email_verified, created_at FROM users WHERE id = ?1",
        &[&id as &dyn rusqlite::ToSql],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                email_verified: row.get::<_, i32>(3)? == 1,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Stores a new email address for the user. Any previous verification
/// is reset: changing the address means proving it again.
pub fn set_user_email(conn: &DbConnection, id: i64, email: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET email = ?1, email_verified = 0 WHERE id = ?2",
        &[&email as &dyn rusqlite::ToSql, &id as &dyn rusqlite::ToSql],
    )?;
    Ok(())
}

pub fn mark_email_verified(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET email_verified = 1 WHERE id = ?1",
        &[&id as &dyn rusqlite::ToSql],
    )?;
    Ok(())
}

/// Saves a pending verification code, replacing any previous one.
pub fn save_verification_code(conn: &DbConnection, user_id: i64, code: &str) -> Result<()> {
    let expires_at = (Utc::now() + Duration::minutes(config::verification::CODE_TTL_MINUTES))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    conn.execute(
        "INSERT INTO verification_codes (user_id, code, expires_at, attempts)
         VALUES (?1, ?2, ?3, 0)
         ON CONFLICT(user_id) DO UPDATE SET code = ?2, expires_at = ?3, attempts = 0",
        &[
            &user_id as &dyn rusqlite::ToSql,
            &code as &dyn rusqlite::ToSql,
            &expires_at as &dyn rusqlite::ToSql,
        ],
    )?;
    Ok(())
}

/// Checks a submitted code against the pending one.
///
/// A correct code verifies the email and removes the pending row. A wrong
/// code burns an attempt; after the configured maximum the code is voided.
/// Expired codes are removed on sight.
pub fn check_verification_code(
    conn: &DbConnection,
    user_id: i64,
    submitted: &str,
) -> Result<VerificationOutcome> {
    let row: Option<(String, String, u32)> = conn
        .query_row(
            "SELECT code, expires_at, attempts FROM verification_codes WHERE user_id = ?1",
            &[&user_id as &dyn rusqlite::ToSql],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((code, expires_at, attempts)) = row else {
        return Ok(VerificationOutcome::NotFound);
    };

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    if expires_at < now {
        delete_verification_code(conn, user_id)?;
        return Ok(VerificationOutcome::Expired);
    }

    if code == submitted.trim() {
        mark_email_verified(conn, user_id)?;
        delete_verification_code(conn, user_id)?;
        return Ok(VerificationOutcome::Verified);
    }

    let attempts = attempts + 1;
    let max_attempts = config::verification::MAX_ATTEMPTS;
    if attempts >= max_attempts {
        delete_verification_code(conn, user_id)?;
        return Ok(VerificationOutcome::Expired);
    }

    conn.execute(
        "UPDATE verification_codes SET attempts = ?1 WHERE user_id = ?2",
        &[&attempts as &dyn rusqlite::ToSql, &user_id as &dyn rusqlite::ToSql],
    )?;
    Ok(VerificationOutcome::WrongCode {
        remaining: max_attempts - attempts,
    })
}

fn delete_verification_code(conn: &DbConnection, user_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM verification_codes WHERE user_id = ?1",
        &[&user_id as &dyn rusqlite::ToSql],
    )?;
    Ok(())
}

/// Saves a completed conversion to the user's history.
pub fn save_conversion(
    conn: &DbConnection,
    user_id: i64,
    from_code: &str,
    to_code: &str,
    amount: &str,
    rate: &str,
    fee: &str,
    result: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversions (user_id, from_code, to_code, amount, rate, fee, result)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        &[
            &user_id as &dyn rusqlite::ToSql,
            &from_code as &dyn rusqlite::ToSql,
            &to_code as &dyn rusqlite::ToSql,
            &amount as &dyn rusqlite::ToSql,
            &rate as &dyn rusqlite::ToSql,
            &fee as &dyn rusqlite::ToSql,
            &result as &dyn rusqlite::ToSql,
        ],
    )?;
    Ok(())
}

/// Returns one page of the user's conversion history, newest first.
pub fn get_conversion_history(
    conn: &DbConnection,
    user_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<ConversionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, from_code, to_code, amount, rate, fee, result, created_at
         FROM conversions
         WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(
        &[
            &user_id as &dyn rusqlite::ToSql,
            &limit as &dyn rusqlite::ToSql,
            &offset as &dyn rusqlite::ToSql,
        ],
        |row| {
            Ok(ConversionRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                from_code: row.get(2)?,
                to_code: row.get(3)?,
                amount: row.get(4)?,
                rate: row.get(5)?,
                fee: row.get(6)?,
                result: row.get(7)?,
                created_at: row.get(8)?,
            })
        },
    )?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Conversion counts grouped by source currency, most used first.
pub fn get_user_stats(conn: &DbConnection, user_id: i64) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT from_code, COUNT(*) AS cnt FROM conversions
         WHERE user_id = ?1 GROUP BY from_code ORDER BY cnt DESC, from_code",
    )?;
    let rows = stmt.query_map(&[&user_id as &dyn rusqlite::ToSql], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut stats = Vec::new();
    for row in rows {
        stats.push(row?);
    }
    Ok(stats)
}

/// Total number of conversions a user has made.
pub fn count_conversions(conn: &DbConnection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM conversions WHERE user_id = ?1",
        &[&user_id as &dyn rusqlite::ToSql],
        |row| row.get(0),
    )
}

/// Records a raw incoming request for later inspection.
pub fn log_request(conn: &DbConnection, user_id: i64, request_text: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO request_history (user_id, request_text) VALUES (?1, ?2)",
        &[
            &user_id as &dyn rusqlite::ToSql,
            &request_text as &dyn rusqlite::ToSql,
        ],
    )?;
    Ok(())
}
