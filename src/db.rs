use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS users (username TEXT PRIMARY KEY, password_hash TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS messages (id INTEGER PRIMARY KEY, room TEXT NOT NULL, sender TEXT NOT NULL, message TEXT NOT NULL, timestamp TEXT NOT NULL)",
    "CREATE INDEX IF NOT EXISTS messages_room ON messages (room, id)",
];

pub async fn init(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await?;
    init(&db_pool).await?;
    Ok(db_pool)
}

/// A single-connection in-memory database. The connection is never recycled,
/// since dropping it would drop the data with it.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init(&db_pool).await?;
    Ok(db_pool)
}
