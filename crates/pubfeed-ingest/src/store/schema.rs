//! SQLite schema for the local content store

use super::StoreResult;
use rusqlite::Connection;

/// Initialize the content store schema
pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Posts, galleries, sports tables, subscriptions and attachments
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,

            author INTEGER,
            last_editor INTEGER,
            published_at TEXT,
            comments_open BOOLEAN,
            parent INTEGER,
            thumbnail INTEGER,

            -- Attachments only
            url TEXT,

            -- Snapshot of the record last imported
            raw BLOB,
            raw_fingerprint TEXT,

            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS entity_meta (
            entity_id INTEGER NOT NULL,
            meta_key TEXT NOT NULL,
            meta_value TEXT NOT NULL,  -- JSON

            PRIMARY KEY(entity_id, meta_key),
            FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS terms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            taxonomy TEXT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,

            UNIQUE(taxonomy, slug)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS term_synonyms (
            term_id INTEGER NOT NULL,
            synonym TEXT NOT NULL,

            PRIMARY KEY(term_id, synonym),
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS entity_terms (
            entity_id INTEGER NOT NULL,
            taxonomy TEXT NOT NULL,
            term_id INTEGER NOT NULL,
            position INTEGER NOT NULL,

            PRIMARY KEY(entity_id, term_id),
            FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE,
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            login TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL DEFAULT '',
            password_digest TEXT,
            display_name TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            registered_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS user_roles (
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL,

            PRIMARY KEY(user_id, role),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS user_meta (
            user_id INTEGER NOT NULL,
            meta_key TEXT NOT NULL,
            meta_value TEXT NOT NULL,  -- JSON

            PRIMARY KEY(user_id, meta_key),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS user_initials (
            user_id INTEGER NOT NULL,
            initials TEXT NOT NULL,

            PRIMARY KEY(user_id, initials),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS folders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS folder_items (
            attachment_id INTEGER PRIMARY KEY,
            folder_id INTEGER NOT NULL,

            FOREIGN KEY(attachment_id) REFERENCES entities(id) ON DELETE CASCADE,
            FOREIGN KEY(folder_id) REFERENCES folders(id) ON DELETE CASCADE
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku TEXT NOT NULL UNIQUE,
            billing_period TEXT NOT NULL,
            billing_interval TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // Create indexes
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entity_terms_taxonomy ON entity_terms(entity_id, taxonomy)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
        [],
    )?;

    Ok(())
}
