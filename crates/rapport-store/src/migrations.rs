use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;

type Migration = (i64, &'static str);

fn migrations() -> Vec<Migration> {
    vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                conversation_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                participants TEXT NOT NULL,
                start_time TEXT NOT NULL,
                last_update TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_last_update ON sessions(last_update DESC);
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                owner INTEGER NOT NULL,
                related INTEGER NOT NULL,
                relation_type TEXT NOT NULL,
                trust_score REAL NOT NULL,
                avg_sentiment REAL NOT NULL,
                conversation_count INTEGER NOT NULL,
                last_interaction TEXT,
                PRIMARY KEY (owner, related)
            );

            CREATE INDEX IF NOT EXISTS idx_relationships_owner ON relationships(owner);
            "#,
        ),
        (
            3,
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id INTEGER PRIMARY KEY,
                iq_score REAL,
                assessment_completed INTEGER NOT NULL,
                big_five TEXT,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
        (
            4,
            r#"
            CREATE TABLE IF NOT EXISTS assessments (
                user_id INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
    ]
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let mut stmt = conn.prepare("SELECT version FROM __schema_version")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut applied = HashSet::new();
    for row in rows {
        applied.insert(row?);
    }

    for (version, sql) in migrations() {
        if applied.contains(&version) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO __schema_version(version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
        tx.commit()?;
    }

    Ok(())
}
