//! SQLite-backed content store

use super::{
    effective_status, schema, slugify, AttachmentUpload, ContentStore, EntityDraft, NewUser,
    Product, Role, StoreError, StoreResult, StoredEntity, Term, User, UserUpdate, IMPORTER_LOGIN,
};
use crate::model::{DocumentStatus, EntityId, EntityKind, Guid, TermId, TermRef, UserId};
use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ENTITY_COLUMNS: &str = "id, guid, kind, title, body, excerpt, status, author, last_editor, \
     published_at, comments_open, parent, thumbnail, raw, raw_fingerprint";

const USER_COLUMNS: &str = "id, login, email, display_name, first_name, last_name";

/// Local content store in a single SQLite file
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    uploads_dir: PathBuf,
}

impl SqliteStore {
    /// Open (and initialize) a store database
    pub fn open(db_path: &Path, uploads_dir: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, uploads_dir)
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory(uploads_dir: &Path) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, uploads_dir)
    }

    fn with_connection(conn: Connection, uploads_dir: &Path) -> StoreResult<Self> {
        schema::init_schema(&conn)?;
        std::fs::create_dir_all(uploads_dir)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            uploads_dir: uploads_dir.to_path_buf(),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire database lock: {}", e)))
    }

    /// Ensure the importer account exists and act as it when nobody else is set.
    pub fn bootstrap_importer(&self) -> StoreResult<UserId> {
        let id = match self.find_user_by_login(IMPORTER_LOGIN)? {
            Some(user) => user.id,
            None => {
                let id = self.insert_user(&NewUser {
                    login: IMPORTER_LOGIN.to_string(),
                    display_name: "Importer".to_string(),
                    roles: vec![Role::Administrator],
                    ..Default::default()
                })?;
                info!(user_id = id, login = IMPORTER_LOGIN, "Created importer account");
                id
            },
        };

        if self.current_user()?.is_none() {
            self.set_current_user(id)?;
        }
        Ok(id)
    }

    pub fn set_current_user(&self, id: UserId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ('current_user', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Record an edit made outside the importer.
    pub fn record_manual_edit(&self, id: EntityId, editor: UserId) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET last_editor = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![editor, id],
        )?;
        if changed == 0 {
            return Err(StoreError::EntityNotFound(id));
        }
        Ok(())
    }

    pub fn create_folder(&self, name: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO folders (name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    fn unique_upload_path(&self, target_name: &str) -> PathBuf {
        let candidate = self.uploads_dir.join(target_name);
        if !candidate.exists() {
            return candidate;
        }

        let (stem, ext) = match target_name.rfind('.') {
            Some(dot) if dot > 0 => (&target_name[..dot], &target_name[dot..]),
            _ => (target_name, ""),
        };
        let mut n = 1;
        loop {
            let candidate = self.uploads_dir.join(format!("{}-{}{}", stem, n, ext));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let value: String = row.get(idx)?;
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let value: Option<String> = row.get(idx)?;
    value
        .map(|v| {
            NaiveDateTime::parse_from_str(&v, DATETIME_FORMAT).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

fn format_datetime(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|v| v.format(DATETIME_FORMAT).to_string())
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEntity> {
    Ok(StoredEntity {
        id: row.get(0)?,
        guid: Guid::from(row.get::<_, String>(1)?),
        kind: parse_column(row, 2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        excerpt: row.get(5)?,
        status: parse_column(row, 6)?,
        author: row.get(7)?,
        last_editor: row.get(8)?,
        published_at: parse_datetime(row, 9)?,
        comments_open: row.get(10)?,
        parent: row.get(11)?,
        thumbnail: row.get(12)?,
        meta: BTreeMap::new(),
        terms: BTreeMap::new(),
        raw: row.get(13)?,
        raw_fingerprint: row.get(14)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        login: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        roles: Vec::new(),
        initials: Vec::new(),
        meta: BTreeMap::new(),
    })
}

fn load_meta(conn: &Connection, table: &str, owner: &str, id: i64) -> StoreResult<BTreeMap<String, Value>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT meta_key, meta_value FROM {} WHERE {} = ?1",
        table, owner
    ))?;
    let rows = stmt
        .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut meta = BTreeMap::new();
    for (key, value) in rows {
        meta.insert(key, serde_json::from_str(&value)?);
    }
    Ok(meta)
}

fn complete_entity(conn: &Connection, mut entity: StoredEntity) -> StoreResult<StoredEntity> {
    entity.meta = load_meta(conn, "entity_meta", "entity_id", entity.id)?;

    let mut stmt = conn.prepare(
        "SELECT taxonomy, term_id FROM entity_terms WHERE entity_id = ?1 ORDER BY taxonomy, position",
    )?;
    let rows = stmt
        .query_map(params![entity.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, TermId>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (taxonomy, term_id) in rows {
        entity.terms.entry(taxonomy).or_default().push(term_id);
    }
    Ok(entity)
}

fn query_entity(conn: &Connection, clause: &str, param: &dyn rusqlite::ToSql) -> StoreResult<Option<StoredEntity>> {
    let sql = format!("SELECT {} FROM entities WHERE {}", ENTITY_COLUMNS, clause);
    let entity = conn
        .query_row(&sql, params![param], entity_from_row)
        .optional()?;
    entity.map(|e| complete_entity(conn, e)).transpose()
}

fn complete_user(conn: &Connection, mut user: User) -> StoreResult<User> {
    let mut stmt = conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
    let roles = stmt
        .query_map(params![user.id], |row| parse_column::<Role>(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    user.roles = roles;

    let mut stmt =
        conn.prepare("SELECT initials FROM user_initials WHERE user_id = ?1 ORDER BY initials")?;
    user.initials = stmt
        .query_map(params![user.id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    user.meta = load_meta(conn, "user_meta", "user_id", user.id)?;
    Ok(user)
}

fn query_user(conn: &Connection, clause: &str, param: &dyn rusqlite::ToSql) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause);
    let user = conn.query_row(&sql, params![param], user_from_row).optional()?;
    user.map(|u| complete_user(conn, u)).transpose()
}

fn require_changed(changed: usize, id: EntityId) -> StoreResult<()> {
    if changed == 0 {
        return Err(StoreError::EntityNotFound(id));
    }
    Ok(())
}

impl ContentStore for SqliteStore {
    fn find_by_guid(&self, guid: &Guid) -> StoreResult<Option<StoredEntity>> {
        let conn = self.conn()?;
        query_entity(&conn, "guid = ?1", &guid.as_str())
    }

    fn get_entity(&self, id: EntityId) -> StoreResult<Option<StoredEntity>> {
        let conn = self.conn()?;
        query_entity(&conn, "id = ?1", &id)
    }

    fn insert_entity(&self, draft: &EntityDraft) -> StoreResult<EntityId> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM entities WHERE guid = ?1",
                params![draft.guid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateGuid(draft.guid.to_string()));
        }

        let status = effective_status(draft.status, draft.published_at, Local::now().naive_local());
        conn.execute(
            r#"
            INSERT INTO entities (
                guid, kind, title, body, excerpt, status,
                author, published_at, comments_open, parent
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                draft.guid.as_str(),
                draft.kind.as_str(),
                draft.title,
                draft.body,
                draft.excerpt,
                status.as_str(),
                draft.author,
                format_datetime(draft.published_at),
                draft.comments_open,
                draft.parent,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(entity_id = id, guid = %draft.guid, kind = %draft.kind, "Inserted entity");
        Ok(id)
    }

    fn update_entity(&self, id: EntityId, draft: &EntityDraft) -> StoreResult<()> {
        let conn = self.conn()?;
        let status = effective_status(draft.status, draft.published_at, Local::now().naive_local());
        let changed = conn.execute(
            r#"
            UPDATE entities SET
                title = ?1, body = ?2, excerpt = ?3, status = ?4, author = ?5,
                published_at = ?6, comments_open = ?7, parent = ?8,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?9
            "#,
            params![
                draft.title,
                draft.body,
                draft.excerpt,
                status.as_str(),
                draft.author,
                format_datetime(draft.published_at),
                draft.comments_open,
                draft.parent,
                id,
            ],
        )?;
        require_changed(changed, id)
    }

    fn set_status(&self, id: EntityId, status: DocumentStatus) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        require_changed(changed, id)
    }

    fn set_meta(&self, id: EntityId, key: &str, value: &Value) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entity_meta (entity_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
            params![id, key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    fn delete_meta(&self, id: EntityId, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM entity_meta WHERE entity_id = ?1 AND meta_key = ?2",
            params![id, key],
        )?;
        Ok(())
    }

    fn set_raw(&self, id: EntityId, raw: &[u8], fingerprint: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET raw = ?1, raw_fingerprint = ?2 WHERE id = ?3",
            params![raw, fingerprint, id],
        )?;
        require_changed(changed, id)
    }

    fn delete_raw(&self, id: EntityId) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET raw = NULL, raw_fingerprint = NULL WHERE id = ?1",
            params![id],
        )?;
        require_changed(changed, id)
    }

    fn set_terms(&self, id: EntityId, taxonomy: &str, terms: &[TermRef]) -> StoreResult<Vec<TermId>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut ids: Vec<TermId> = Vec::with_capacity(terms.len());
        for term in terms {
            let term_id = match term.id {
                Some(term_id) => term_id,
                None => {
                    let slug = slugify(&term.name);
                    let found: Option<TermId> = tx
                        .query_row(
                            "SELECT id FROM terms WHERE taxonomy = ?1 AND (name = ?2 OR slug = ?3)
                             ORDER BY name = ?2 DESC LIMIT 1",
                            params![taxonomy, term.name, slug],
                            |row| row.get(0),
                        )
                        .optional()?;
                    match found {
                        Some(term_id) => term_id,
                        None => {
                            tx.execute(
                                "INSERT INTO terms (taxonomy, name, slug) VALUES (?1, ?2, ?3)",
                                params![taxonomy, term.name, slug],
                            )?;
                            tx.last_insert_rowid()
                        },
                    }
                },
            };
            if !ids.contains(&term_id) {
                ids.push(term_id);
            }
        }

        tx.execute(
            "DELETE FROM entity_terms WHERE entity_id = ?1 AND taxonomy = ?2",
            params![id, taxonomy],
        )?;
        for (position, term_id) in ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO entity_terms (entity_id, taxonomy, term_id, position) VALUES (?1, ?2, ?3, ?4)",
                params![id, taxonomy, term_id, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(ids)
    }

    fn list_by_kind(&self, kind: EntityKind) -> StoreResult<Vec<StoredEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entities WHERE kind = ?1 ORDER BY id",
            ENTITY_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![kind.as_str()], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entities
            .into_iter()
            .map(|e| complete_entity(&conn, e))
            .collect()
    }

    fn list_terms(&self) -> StoreResult<Vec<Term>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, taxonomy, name, slug FROM terms ORDER BY id")?;
        let mut terms = stmt
            .query_map([], |row| {
                Ok(Term {
                    id: row.get(0)?,
                    taxonomy: row.get(1)?,
                    name: row.get(2)?,
                    slug: row.get(3)?,
                    synonyms: Vec::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt =
            conn.prepare("SELECT synonym FROM term_synonyms WHERE term_id = ?1 ORDER BY synonym")?;
        for term in &mut terms {
            term.synonyms = stmt
                .query_map(params![term.id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }
        Ok(terms)
    }

    fn insert_term(&self, taxonomy: &str, name: &str, slug: &str) -> StoreResult<TermId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO terms (taxonomy, name, slug) VALUES (?1, ?2, ?3)",
            params![taxonomy, name, slug],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Rejected(format!("term '{}' already exists in '{}'", slug, taxonomy))
            },
            other => StoreError::Database(other),
        })?;
        Ok(conn.last_insert_rowid())
    }

    fn set_term_synonyms(&self, id: TermId, synonyms: &[String]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM term_synonyms WHERE term_id = ?1", params![id])?;
        for synonym in synonyms {
            tx.execute(
                "INSERT OR IGNORE INTO term_synonyms (term_id, synonym) VALUES (?1, ?2)",
                params![id, synonym],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        users.into_iter().map(|u| complete_user(&conn, u)).collect()
    }

    fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        query_user(&conn, "id = ?1", &id)
    }

    fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        query_user(&conn, "login = ?1", &login)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        query_user(&conn, "lower(email) = lower(?1) AND email != ''", &email)
    }

    fn insert_user(&self, user: &NewUser) -> StoreResult<UserId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM users WHERE login = ?1", params![user.login], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateLogin(user.login.clone()));
        }

        let display_name = if user.display_name.is_empty() {
            &user.login
        } else {
            &user.display_name
        };
        let digest = user
            .password
            .as_deref()
            .map(|p| pubfeed_common::checksum::fingerprint(p.as_bytes()));
        tx.execute(
            r#"
            INSERT INTO users (login, email, password_digest, display_name, first_name, last_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                user.login,
                user.email,
                digest,
                display_name,
                user.first_name,
                user.last_name,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let roles: &[Role] = if user.roles.is_empty() {
            &[Role::Subscriber]
        } else {
            &user.roles
        };
        for role in roles {
            tx.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![id, role.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE users SET
                email = COALESCE(?1, email),
                first_name = COALESCE(?2, first_name),
                last_name = COALESCE(?3, last_name)
            WHERE id = ?4
            "#,
            params![update.email, update.first_name, update.last_name, id],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(id));
        }
        Ok(())
    }

    fn set_user_meta(&self, id: UserId, key: &str, value: &Value) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_meta (user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
            params![id, key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    fn set_user_initials(&self, id: UserId, initials: &[String]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_initials WHERE user_id = ?1", params![id])?;
        for value in initials {
            tx.execute(
                "INSERT OR IGNORE INTO user_initials (user_id, initials) VALUES (?1, ?2)",
                params![id, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upload_attachment(&self, upload: &AttachmentUpload) -> StoreResult<EntityId> {
        if self.find_by_guid(&upload.guid)?.is_some() {
            return Err(StoreError::DuplicateGuid(upload.guid.to_string()));
        }

        let destination = self.unique_upload_path(&upload.target_name);
        std::fs::copy(&upload.staged_path, &destination)?;
        std::fs::remove_file(&upload.staged_path)?;
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| upload.target_name.clone());

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO entities (guid, kind, title, excerpt, status, parent, url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                upload.guid.as_str(),
                EntityKind::Attachment.as_str(),
                upload.title,
                upload.caption,
                DocumentStatus::Publish.as_str(),
                upload.parent,
                format!("/uploads/{}", file_name),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(entity_id = id, guid = %upload.guid, path = %destination.display(), "Stored attachment");
        Ok(id)
    }

    fn update_attachment_caption(&self, id: EntityId, caption: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET excerpt = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![caption, id],
        )?;
        require_changed(changed, id)
    }

    fn attachment_url(&self, id: EntityId) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let url: Option<Option<String>> = conn
            .query_row("SELECT url FROM entities WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(url.flatten())
    }

    fn set_thumbnail(&self, id: EntityId, attachment: EntityId) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entities SET thumbnail = ?1 WHERE id = ?2",
            params![attachment, id],
        )?;
        require_changed(changed, id)
    }

    fn move_to_folder(&self, folder: &str, attachments: &[EntityId]) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let folder_id: Option<i64> = conn
            .query_row("SELECT id FROM folders WHERE name = ?1", params![folder], |row| row.get(0))
            .optional()?;
        let Some(folder_id) = folder_id else {
            return Ok(false);
        };

        let tx = conn.transaction()?;
        for attachment in attachments {
            tx.execute(
                "INSERT INTO folder_items (attachment_id, folder_id) VALUES (?1, ?2)
                 ON CONFLICT(attachment_id) DO UPDATE SET folder_id = excluded.folder_id",
                params![attachment, folder_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn find_product_by_sku(&self, sku: &str) -> StoreResult<Option<Product>> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                "SELECT id, sku, billing_period, billing_interval FROM products WHERE sku = ?1",
                params![sku],
                |row| {
                    Ok(Product {
                        id: row.get(0)?,
                        sku: row.get(1)?,
                        billing_period: row.get(2)?,
                        billing_interval: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    fn insert_product(&self, product: &Product) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO products (sku, billing_period, billing_interval) VALUES (?1, ?2, ?3)",
            params![product.sku, product.billing_period, product.billing_interval],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn current_user(&self) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'current_user'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match id.and_then(|v| v.parse::<UserId>().ok()) {
            Some(id) => query_user(&conn, "id = ?1", &id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_in_memory(&dir.path().join("uploads")).unwrap();
        (store, dir)
    }

    fn draft(guid: &str) -> EntityDraft {
        EntityDraft {
            guid: Guid::from(guid.to_string()),
            kind: EntityKind::Post,
            title: "Kreistag tagt".into(),
            body: "<p>Text</p>\n".into(),
            excerpt: String::new(),
            status: DocumentStatus::Publish,
            author: None,
            published_at: NaiveDate::from_ymd_opt(2020, 5, 4).and_then(|d| d.and_hms_opt(4, 0, 0)),
            comments_open: Some(true),
            parent: None,
        }
    }

    #[test]
    fn test_entity_round_trip_with_meta_and_terms() {
        let (store, _dir) = store();
        let id = store.insert_entity(&draft("pz/woodwing/1")).unwrap();
        store.set_meta(id, "_images", &serde_json::json!([3, 4])).unwrap();
        store.set_terms(id, "category", &[TermRef::named("Lokales")]).unwrap();
        store.set_raw(id, b"<article/>", "abc").unwrap();

        let entity = store.find_by_guid(&Guid::from("pz/woodwing/1".to_string())).unwrap().unwrap();
        assert_eq!(entity.id, id);
        assert_eq!(entity.status, DocumentStatus::Publish);
        assert_eq!(entity.published_at, draft("x").published_at);
        assert_eq!(entity.comments_open, Some(true));
        assert_eq!(entity.meta["_images"], serde_json::json!([3, 4]));
        assert_eq!(entity.terms["category"].len(), 1);
        assert_eq!(entity.raw.as_deref(), Some(&b"<article/>"[..]));
    }

    #[test]
    fn test_future_publish_is_scheduled() {
        let (store, _dir) = store();
        let mut future = draft("pz/woodwing/2");
        future.published_at = Some(Local::now().naive_local() + chrono::Duration::days(2));
        let id = store.insert_entity(&future).unwrap();
        assert_eq!(store.get_entity(id).unwrap().unwrap().status, DocumentStatus::Scheduled);
    }

    #[test]
    fn test_bootstrap_importer_is_admin_and_current() {
        let (store, _dir) = store();
        let id = store.bootstrap_importer().unwrap();
        assert_eq!(store.bootstrap_importer().unwrap(), id);

        let current = store.current_user().unwrap().unwrap();
        assert_eq!(current.id, id);
        assert!(current.is_admin());
    }

    #[test]
    fn test_upload_moves_staged_copy() {
        let (store, dir) = store();
        let staged = dir.path().join("photo_.jpg");
        std::fs::write(&staged, b"jpeg").unwrap();

        let id = store
            .upload_attachment(&AttachmentUpload {
                guid: Guid::from("pz/woodwing/photo.jpg".to_string()),
                parent: None,
                staged_path: staged.clone(),
                target_name: "pz-photo.jpg".into(),
                title: "photo.jpg".into(),
                caption: "Caption".into(),
            })
            .unwrap();

        assert!(!staged.exists());
        assert!(dir.path().join("uploads/pz-photo.jpg").exists());
        assert_eq!(store.attachment_url(id).unwrap().as_deref(), Some("/uploads/pz-photo.jpg"));
    }

    #[test]
    fn test_terms_synonyms_and_initials() {
        let (store, _dir) = store();
        let term = store.insert_term("category", "Sport", "sport").unwrap();
        store.set_term_synonyms(term, &["Fußball".to_string()]).unwrap();
        assert!(store.insert_term("category", "Sport", "sport").is_err());

        let terms = store.list_terms().unwrap();
        assert_eq!(terms[0].synonyms, vec!["Fußball".to_string()]);

        let user = store
            .insert_user(&NewUser {
                login: "jdoe".into(),
                display_name: "Jane Doe".into(),
                roles: vec![Role::Author],
                ..Default::default()
            })
            .unwrap();
        store.set_user_initials(user, &["jd".to_string()]).unwrap();
        let loaded = store.get_user(user).unwrap().unwrap();
        assert_eq!(loaded.initials, vec!["jd".to_string()]);
        assert_eq!(loaded.roles, vec![Role::Author]);
    }
}
