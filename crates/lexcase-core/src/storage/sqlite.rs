use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::StorageBackend;
use crate::error::{LexError, Result};
use crate::model::*;

/// SQLite-backed storage for documents, cases and conversations.
///
/// A single `Connection` sits behind `Arc<Mutex<>>` so the store can be
/// shared across async tasks. Every query goes through
/// [`with_conn`](Self::with_conn), which runs it on the Tokio blocking pool
/// while holding the lock, so each trait method is atomic with respect to
/// the others.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

const DOCUMENT_COLUMNS: &str = "d.id, d.filename, d.filepath, d.contents, d.description, \
     d.owner, d.created_at, d.updated_at, e.vector";

const DOCUMENT_FROM: &str =
    "documents d LEFT JOIN document_embeddings e ON e.document_id = d.id";

const CASE_COLUMNS: &str = "id, title, description, status, owner, tags, created_at, updated_at";

const CONVERSATION_COLUMNS: &str =
    "id, title, case_id, owner, is_active, context, created_at, updated_at";

impl SqliteStorage {
    /// Open (or create) a file-backed SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| LexError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LexError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Round-trip a trivial query to check the database is usable.
    pub async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(db_err("ping failed"))?;
            Ok(())
        })
        .await
    }

    // ── helpers ────────────────────────────────────────────────────────

    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| LexError::Storage(format!("failed to set WAL mode: {e}")))?;

        // Cascading deletes of embeddings and links rely on this.
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| LexError::Storage(format!("failed to enable foreign keys: {e}")))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        Ok(storage)
    }

    /// Create all tables and indexes (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LexError::Storage(format!("failed to acquire database lock: {e}")))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                filepath TEXT,
                contents TEXT,
                description TEXT,
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_embeddings (
                document_id INTEGER PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                dimensions INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'closed', 'archived')),
                owner TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS case_documents (
                case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (case_id, document_id)
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                owner TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                context TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message_documents (
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (message_id, document_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner);
            CREATE INDEX IF NOT EXISTS idx_cases_owner ON cases(owner);
            CREATE INDEX IF NOT EXISTS idx_cases_owner_title ON cases(owner, title);
            CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            ",
        )
        .map_err(|e| LexError::Storage(format!("failed to create tables: {e}")))?;

        Ok(())
    }

    /// Run a blocking closure against the SQLite connection on the Tokio
    /// blocking thread-pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| LexError::Storage(format!("failed to acquire database lock: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| LexError::Storage(format!("task join error: {e}")))?
    }
}

// ── row mapping ────────────────────────────────────────────────────────

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> LexError {
    move |e| LexError::Storage(format!("{context}: {e}"))
}

/// Insert one message inside an open transaction and touch its conversation.
fn insert_message(conn: &Connection, message: &Message) -> Result<i64> {
    let metadata = message
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let touched = conn
        .execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![timestamp(&message.created_at), message.conversation_id],
        )
        .map_err(db_err("failed to touch conversation"))?;
    if touched == 0 {
        return Err(LexError::NotFound(format!(
            "conversation {}",
            message.conversation_id
        )));
    }

    conn.execute(
        "INSERT INTO messages (conversation_id, role, content, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.conversation_id,
            message.role.as_str(),
            message.content,
            metadata,
            timestamp(&message.created_at),
        ],
    )
    .map_err(db_err("failed to insert message"))?;
    let id = conn.last_insert_rowid();

    // References to documents deleted since the turn ran are dropped.
    for doc_id in &message.referenced_documents {
        conn.execute(
            "INSERT OR IGNORE INTO message_documents (message_id, document_id)
             SELECT ?1, id FROM documents WHERE id = ?2",
            params![id, doc_id],
        )
        .map_err(db_err("failed to link message document"))?;
    }
    Ok(id)
}

fn insert_conversation_row(conn: &Connection, conversation: Conversation) -> Result<Conversation> {
    load_case(conn, &conversation.owner, conversation.case_id)?;

    let context = conversation
        .context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO conversations
            (title, case_id, owner, is_active, context, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            conversation.title,
            conversation.case_id,
            conversation.owner,
            conversation.is_active,
            context,
            timestamp(&conversation.created_at),
            timestamp(&conversation.updated_at),
        ],
    )
    .map_err(db_err("failed to insert conversation"))?;

    let mut stored = conversation;
    stored.id = conn.last_insert_rowid();
    Ok(stored)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed-width so TEXT ordering matches chronological ordering.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn read_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn read_optional_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let vector: Option<Vec<u8>> = row.get(8)?;
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        filepath: row.get(2)?,
        contents: row.get(3)?,
        description: row.get(4)?,
        owner: row.get(5)?,
        created_at: read_timestamp(row, 6)?,
        updated_at: read_timestamp(row, 7)?,
        embedding: vector.map(|bytes| bytes_to_embedding(&bytes)),
    })
}

fn row_to_case(row: &Row<'_>) -> rusqlite::Result<Case> {
    let status: String = row.get(3)?;
    let status = status.parse::<CaseStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    Ok(Case {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        owner: row.get(4)?,
        tags: read_json(row, 5)?,
        created_at: read_timestamp(row, 6)?,
        updated_at: read_timestamp(row, 7)?,
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        case_id: row.get(2)?,
        owner: row.get(3)?,
        is_active: row.get(4)?,
        context: read_optional_json(row, 5)?,
        created_at: read_timestamp(row, 6)?,
        updated_at: read_timestamp(row, 7)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = role
        .parse::<MessageRole>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        metadata: read_optional_json(row, 4)?,
        referenced_documents: Vec::new(),
        created_at: read_timestamp(row, 5)?,
    })
}

/// Encode an embedding as little-endian f32 bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. Trailing bytes that don't fill a float are dropped.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Escape LIKE wildcards so user text matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn load_document(conn: &Connection, owner: &str, id: i64) -> Result<Document> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM} WHERE d.id = ?1 AND d.owner = ?2"),
        params![id, owner],
        row_to_document,
    )
    .optional()
    .map_err(db_err("failed to load document"))?
    .ok_or_else(|| LexError::NotFound(format!("document {id}")))
}

fn load_case(conn: &Connection, owner: &str, id: i64) -> Result<Case> {
    conn.query_row(
        &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1 AND owner = ?2"),
        params![id, owner],
        row_to_case,
    )
    .optional()
    .map_err(db_err("failed to load case"))?
    .ok_or_else(|| LexError::NotFound(format!("case {id}")))
}

fn load_conversation(conn: &Connection, owner: &str, id: i64) -> Result<Conversation> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1 AND owner = ?2"),
        params![id, owner],
        row_to_conversation,
    )
    .optional()
    .map_err(db_err("failed to load conversation"))?
    .ok_or_else(|| LexError::NotFound(format!("conversation {id}")))
}

fn insert_case_row(conn: &Connection, case: &Case) -> Result<Case> {
    let tags = serde_json::to_string(&case.tags)?;
    conn.execute(
        "INSERT INTO cases (title, description, status, owner, tags, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            case.title,
            case.description,
            case.status.as_str(),
            case.owner,
            tags,
            timestamp(&case.created_at),
            timestamp(&case.updated_at),
        ],
    )
    .map_err(db_err("failed to insert case"))?;

    let mut stored = case.clone();
    stored.id = conn.last_insert_rowid();
    Ok(stored)
}

fn collect_documents(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Document>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(db_err("failed to prepare document query"))?;
    let rows = stmt
        .query_map(params, row_to_document)
        .map_err(db_err("failed to query documents"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("failed to read document row"))
}

// ── StorageBackend ─────────────────────────────────────────────────────

impl StorageBackend for SqliteStorage {
    async fn insert_document(&self, document: &Document) -> Result<Document> {
        let document = document.clone();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(db_err("failed to begin transaction"))?;

            tx.execute(
                "INSERT INTO documents
                    (filename, filepath, contents, description, owner, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    document.filename,
                    document.filepath,
                    document.contents,
                    document.description,
                    document.owner,
                    timestamp(&document.created_at),
                    timestamp(&document.updated_at),
                ],
            )
            .map_err(db_err("failed to insert document"))?;
            let id = tx.last_insert_rowid();

            if let Some(embedding) = document.embedding.as_ref().filter(|e| !e.is_empty()) {
                tx.execute(
                    "INSERT INTO document_embeddings (document_id, vector, dimensions)
                     VALUES (?1, ?2, ?3)",
                    params![id, embedding_to_bytes(embedding), embedding.len() as i64],
                )
                .map_err(db_err("failed to insert embedding"))?;
            }

            tx.commit().map_err(db_err("failed to commit document"))?;

            let mut stored = document;
            stored.id = id;
            Ok(stored)
        })
        .await
    }

    async fn get_document(&self, owner: &str, id: i64) -> Result<Document> {
        let owner = owner.to_string();
        self.with_conn(move |conn| load_document(conn, &owner, id))
            .await
    }

    async fn get_documents(&self, owner: &str, ids: &[i64]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let owner = owner.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM}
                 WHERE d.owner = ? AND d.id IN ({placeholders}) ORDER BY d.id"
            );
            let mut values: Vec<rusqlite::types::Value> = vec![owner.into()];
            values.extend(ids.into_iter().map(rusqlite::types::Value::from));
            collect_documents(conn, &sql, params_from_iter(values))
        })
        .await
    }

    async fn list_documents(&self, owner: &str) -> Result<Vec<Document>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            collect_documents(
                conn,
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM}
                     WHERE d.owner = ?1 ORDER BY d.created_at DESC, d.id DESC"
                ),
                params![owner],
            )
        })
        .await
    }

    async fn embedded_documents(&self, owner: &str) -> Result<Vec<Document>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            collect_documents(
                conn,
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM}
                     WHERE d.owner = ?1 AND e.vector IS NOT NULL ORDER BY d.id"
                ),
                params![owner],
            )
        })
        .await
    }

    async fn search_documents_by_text(
        &self,
        owner: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let owner = owner.to_string();
        let pattern = like_pattern(query.trim());
        self.with_conn(move |conn| {
            collect_documents(
                conn,
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM}
                     WHERE d.owner = ?1 AND (
                        lower(coalesce(d.contents, '')) LIKE ?2 ESCAPE '\\'
                        OR lower(coalesce(d.description, '')) LIKE ?2 ESCAPE '\\'
                        OR lower(d.filename) LIKE ?2 ESCAPE '\\'
                     )
                     ORDER BY d.created_at DESC, d.id DESC
                     LIMIT ?3"
                ),
                params![owner, pattern, sql_limit(limit)],
            )
        })
        .await
    }

    async fn delete_document(&self, owner: &str, id: i64) -> Result<()> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM documents WHERE id = ?1 AND owner = ?2",
                    params![id, owner],
                )
                .map_err(db_err("failed to delete document"))?;
            if deleted == 0 {
                return Err(LexError::NotFound(format!("document {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn insert_case(&self, case: &Case) -> Result<Case> {
        let case = case.clone();
        self.with_conn(move |conn| insert_case_row(conn, &case))
            .await
    }

    async fn get_case(&self, owner: &str, id: i64) -> Result<Case> {
        let owner = owner.to_string();
        self.with_conn(move |conn| load_case(conn, &owner, id))
            .await
    }

    async fn list_cases(&self, query: &CaseQuery) -> Result<Vec<Case>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let order = match query.order {
                CaseOrder::Newest => "created_at DESC, id DESC",
                CaseOrder::Inserted => "id ASC",
            };
            let sql = format!(
                "SELECT {CASE_COLUMNS} FROM cases
                 WHERE owner = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY {order} LIMIT ?3"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(db_err("failed to prepare case query"))?;
            let rows = stmt
                .query_map(
                    params![
                        query.owner,
                        query.status.map(|s| s.as_str()),
                        sql_limit(query.limit)
                    ],
                    row_to_case,
                )
                .map_err(db_err("failed to query cases"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("failed to read case row"))
        })
        .await
    }

    async fn get_or_create_case(
        &self,
        owner: &str,
        title: &str,
        description: &str,
    ) -> Result<(Case, bool)> {
        let owner = owner.to_string();
        let title = title.to_string();
        let description = description.to_string();
        self.with_conn(move |conn| {
            let existing = conn
                .query_row(
                    &format!(
                        "SELECT {CASE_COLUMNS} FROM cases
                         WHERE owner = ?1 AND title = ?2 ORDER BY id LIMIT 1"
                    ),
                    params![owner, title],
                    row_to_case,
                )
                .optional()
                .map_err(db_err("failed to look up case"))?;

            match existing {
                Some(case) => Ok((case, false)),
                None => {
                    let case = Case::new(title, owner).with_description(description);
                    Ok((insert_case_row(conn, &case)?, true))
                }
            }
        })
        .await
    }

    async fn update_case_status(&self, owner: &str, id: i64, status: CaseStatus) -> Result<Case> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE cases SET status = ?1, updated_at = ?2 WHERE id = ?3 AND owner = ?4",
                    params![status.as_str(), timestamp(&Utc::now()), id, owner],
                )
                .map_err(db_err("failed to update case status"))?;
            if updated == 0 {
                return Err(LexError::NotFound(format!("case {id}")));
            }
            load_case(conn, &owner, id)
        })
        .await
    }

    async fn add_case_documents(
        &self,
        owner: &str,
        case_id: i64,
        document_ids: &[i64],
    ) -> Result<usize> {
        let owner = owner.to_string();
        let ids = document_ids.to_vec();
        self.with_conn(move |conn| {
            load_case(conn, &owner, case_id)?;

            let tx = conn
                .unchecked_transaction()
                .map_err(db_err("failed to begin transaction"))?;
            let mut linked = 0;
            for id in ids {
                linked += tx
                    .execute(
                        "INSERT OR IGNORE INTO case_documents (case_id, document_id)
                         SELECT ?1, id FROM documents WHERE id = ?2 AND owner = ?3",
                        params![case_id, id, owner],
                    )
                    .map_err(db_err("failed to link document to case"))?;
            }
            tx.commit().map_err(db_err("failed to commit case links"))?;
            Ok(linked)
        })
        .await
    }

    async fn case_documents(&self, owner: &str, case_id: i64) -> Result<Vec<Document>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            load_case(conn, &owner, case_id)?;
            collect_documents(
                conn,
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM {DOCUMENT_FROM}
                     JOIN case_documents cd ON cd.document_id = d.id
                     WHERE cd.case_id = ?1 AND d.owner = ?2
                     ORDER BY d.created_at DESC, d.id DESC"
                ),
                params![case_id, owner],
            )
        })
        .await
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let conversation = conversation.clone();
        self.with_conn(move |conn| insert_conversation_row(conn, conversation))
            .await
    }

    async fn insert_numbered_conversation(
        &self,
        owner: &str,
        case_id: i64,
        title_prefix: &str,
    ) -> Result<Conversation> {
        let owner = owner.to_string();
        let title_prefix = title_prefix.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM conversations WHERE owner = ?1",
                    params![owner],
                    |row| row.get(0),
                )
                .map_err(db_err("failed to count conversations"))?;
            let title = format!("{title_prefix} {}", count + 1);
            insert_conversation_row(conn, Conversation::new(title, case_id, owner))
        })
        .await
    }

    async fn get_conversation(&self, owner: &str, id: i64) -> Result<Conversation> {
        let owner = owner.to_string();
        self.with_conn(move |conn| load_conversation(conn, &owner, id))
            .await
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<Conversation>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE owner = ?1 ORDER BY updated_at DESC, id DESC"
                ))
                .map_err(db_err("failed to prepare conversation query"))?;
            let rows = stmt
                .query_map(params![owner], row_to_conversation)
                .map_err(db_err("failed to query conversations"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("failed to read conversation row"))
        })
        .await
    }

    async fn append_message(&self, message: &Message) -> Result<Message> {
        self.append_messages(std::slice::from_ref(message))
            .await?
            .pop()
            .ok_or_else(|| LexError::Storage("message was not stored".into()))
    }

    async fn append_messages(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let messages = messages.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(db_err("failed to begin transaction"))?;

            let mut stored = Vec::with_capacity(messages.len());
            for mut message in messages {
                message.id = insert_message(&tx, &message)?;
                stored.push(message);
            }

            tx.commit().map_err(db_err("failed to commit messages"))?;
            Ok(stored)
        })
        .await
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, role, content, metadata, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
                )
                .map_err(db_err("failed to prepare message query"))?;
            let mut messages = stmt
                .query_map(params![conversation_id], row_to_message)
                .map_err(db_err("failed to query messages"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("failed to read message row"))?;

            let mut refs = conn
                .prepare("SELECT document_id FROM message_documents WHERE message_id = ?1 ORDER BY rowid")
                .map_err(db_err("failed to prepare message document query"))?;
            for message in &mut messages {
                message.referenced_documents = refs
                    .query_map(params![message.id], |row| row.get(0))
                    .map_err(db_err("failed to query message documents"))?
                    .collect::<rusqlite::Result<Vec<i64>>>()
                    .map_err(db_err("failed to read message document row"))?;
            }
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SqliteStorage {
        SqliteStorage::open_in_memory().expect("should open in-memory DB")
    }

    async fn doc(storage: &SqliteStorage, name: &str, owner: &str, emb: Option<Vec<f32>>) -> Document {
        let mut d = Document::new(name, owner).with_contents(format!("contents of {name}"));
        if let Some(e) = emb {
            d = d.with_enrichment(format!("summary of {name}"), Some(e));
        }
        storage.insert_document(&d).await.unwrap()
    }

    #[test]
    fn open_in_memory_creates_tables() {
        let storage = storage();
        assert_eq!(storage.path().to_str().unwrap(), ":memory:");

        let conn = storage.conn.lock().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "documents",
            "document_embeddings",
            "cases",
            "case_documents",
            "conversations",
            "messages",
            "message_documents",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn create_tables_is_idempotent() {
        let storage = storage();
        storage.create_tables().expect("idempotent create_tables");
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let v = vec![0.25_f32, -1.5, 3.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&v)), v);
        assert!(bytes_to_embedding(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("Lease"), "%lease%");
    }

    #[tokio::test]
    async fn document_roundtrip_with_embedding() {
        let s = storage();
        let stored = doc(&s, "lease.txt", "alice", Some(vec![1.0, 0.0, 0.5])).await;
        assert!(stored.id > 0);

        let loaded = s.get_document("alice", stored.id).await.unwrap();
        assert_eq!(loaded.filename, "lease.txt");
        assert_eq!(loaded.embedding, Some(vec![1.0, 0.0, 0.5]));
        assert_eq!(loaded.description.as_deref(), Some("summary of lease.txt"));
    }

    #[tokio::test]
    async fn document_without_embedding_has_none() {
        let s = storage();
        let stored = doc(&s, "raw.txt", "alice", None).await;
        let loaded = s.get_document("alice", stored.id).await.unwrap();
        assert!(loaded.embedding.is_none());
        assert!(loaded.description.is_none());
    }

    #[tokio::test]
    async fn documents_are_owner_scoped() {
        let s = storage();
        let d = doc(&s, "secret.txt", "alice", Some(vec![1.0])).await;

        let err = s.get_document("bob", d.id).await.unwrap_err();
        assert!(matches!(err, LexError::NotFound(_)));
        assert!(s.list_documents("bob").await.unwrap().is_empty());
        assert!(s.embedded_documents("bob").await.unwrap().is_empty());
        assert!(s.get_documents("bob", &[d.id]).await.unwrap().is_empty());
        assert!(matches!(
            s.delete_document("bob", d.id).await.unwrap_err(),
            LexError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn embedded_documents_in_insertion_order() {
        let s = storage();
        let a = doc(&s, "a.txt", "alice", Some(vec![1.0])).await;
        doc(&s, "b.txt", "alice", None).await;
        let c = doc(&s, "c.txt", "alice", Some(vec![0.5])).await;

        let ids: Vec<i64> = s
            .embedded_documents("alice")
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn get_documents_skips_unknown_ids() {
        let s = storage();
        let a = doc(&s, "a.txt", "alice", None).await;
        let b = doc(&s, "b.txt", "alice", None).await;
        let found = s.get_documents("alice", &[b.id, 999, a.id]).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert!(s.get_documents("alice", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_search_matches_contents_and_filename() {
        let s = storage();
        doc(&s, "lease.txt", "alice", None).await;
        doc(&s, "will.txt", "alice", None).await;

        let hits = s.search_documents_by_text("alice", "LEASE", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "lease.txt");

        let hits = s.search_documents_by_text("alice", "contents", 1).await.unwrap();
        assert_eq!(hits.len(), 1, "limit applies");
    }

    #[tokio::test]
    async fn delete_document_cascades_embedding_and_links() {
        let s = storage();
        let d = doc(&s, "a.txt", "alice", Some(vec![1.0])).await;
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        s.add_case_documents("alice", case.id, &[d.id]).await.unwrap();

        s.delete_document("alice", d.id).await.unwrap();

        assert!(s.case_documents("alice", case.id).await.unwrap().is_empty());
        let count: i64 = s
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM document_embeddings", [], |r| r.get(0))
                    .map_err(|e| LexError::Storage(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn case_roundtrip_preserves_tags() {
        let s = storage();
        let case = Case::new("Smith v. Jones", "alice")
            .with_description("contract dispute")
            .with_tags(vec!["contract".into(), "civil".into()]);
        let stored = s.insert_case(&case).await.unwrap();

        let loaded = s.get_case("alice", stored.id).await.unwrap();
        assert_eq!(loaded.title, "Smith v. Jones");
        assert_eq!(loaded.tags, vec!["contract", "civil"]);
        assert_eq!(loaded.status, CaseStatus::Active);
        assert!(matches!(
            s.get_case("bob", stored.id).await.unwrap_err(),
            LexError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_cases_filters_and_orders() {
        let s = storage();
        let first = s.insert_case(&Case::new("First", "alice")).await.unwrap();
        let second = s.insert_case(&Case::new("Second", "alice")).await.unwrap();
        s.insert_case(&Case::new("Other", "bob")).await.unwrap();
        s.update_case_status("alice", first.id, CaseStatus::Closed)
            .await
            .unwrap();

        let all = s
            .list_cases(&CaseQuery::for_owner("alice").in_insertion_order())
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let closed = s
            .list_cases(&CaseQuery::for_owner("alice").with_status(Some(CaseStatus::Closed)))
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, first.id);

        let limited = s
            .list_cases(&CaseQuery::for_owner("alice").with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn get_or_create_case_is_idempotent() {
        let s = storage();
        let (a, created) = s
            .get_or_create_case("alice", DEFAULT_CASE_TITLE, DEFAULT_CASE_DESCRIPTION)
            .await
            .unwrap();
        assert!(created);
        let (b, created) = s
            .get_or_create_case("alice", DEFAULT_CASE_TITLE, DEFAULT_CASE_DESCRIPTION)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(a.id, b.id);

        let (c, created) = s
            .get_or_create_case("bob", DEFAULT_CASE_TITLE, DEFAULT_CASE_DESCRIPTION)
            .await
            .unwrap();
        assert!(created);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn add_case_documents_counts_new_links_only() {
        let s = storage();
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        let a = doc(&s, "a.txt", "alice", None).await;
        let foreign = doc(&s, "b.txt", "bob", None).await;

        assert_eq!(
            s.add_case_documents("alice", case.id, &[a.id, foreign.id])
                .await
                .unwrap(),
            1
        );
        assert_eq!(s.add_case_documents("alice", case.id, &[a.id]).await.unwrap(), 0);
        assert!(matches!(
            s.add_case_documents("bob", case.id, &[foreign.id])
                .await
                .unwrap_err(),
            LexError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn conversation_requires_owned_case() {
        let s = storage();
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        let err = s
            .insert_conversation(&Conversation::new("Chat", case.id, "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, LexError::NotFound(_)));
    }

    #[tokio::test]
    async fn messages_keep_order_metadata_and_references() {
        let s = storage();
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        let conv = s
            .insert_conversation(&Conversation::new("Chat", case.id, "alice"))
            .await
            .unwrap();
        let d1 = doc(&s, "a.txt", "alice", None).await;
        let d2 = doc(&s, "b.txt", "alice", None).await;

        s.append_message(&Message::new(conv.id, MessageRole::User, "hello"))
            .await
            .unwrap();
        s.append_message(
            &Message::new(conv.id, MessageRole::Assistant, "answer")
                .with_metadata(serde_json::json!({"sender": "LegalExpert"}))
                .with_documents(vec![d2.id, d1.id, 12345]),
        )
        .await
        .unwrap();

        let messages = s.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].sender(), Some("LegalExpert"));
        assert_eq!(messages[1].referenced_documents, vec![d2.id, d1.id]);
    }

    #[tokio::test]
    async fn append_message_bumps_conversation() {
        let s = storage();
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        let older = s
            .insert_conversation(&Conversation::new("Older", case.id, "alice"))
            .await
            .unwrap();
        let newer = s
            .insert_conversation(&Conversation::new("Newer", case.id, "alice"))
            .await
            .unwrap();

        let mut msg = Message::new(older.id, MessageRole::User, "ping");
        msg.created_at = Utc::now() + chrono::Duration::seconds(5);
        s.append_message(&msg).await.unwrap();

        let listed = s.list_conversations("alice").await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
    }

    #[tokio::test]
    async fn append_message_to_missing_conversation_fails() {
        let s = storage();
        let err = s
            .append_message(&Message::new(42, MessageRole::User, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LexError::NotFound(_)));
    }

    #[tokio::test]
    async fn append_messages_is_all_or_nothing() {
        let s = storage();
        let case = s.insert_case(&Case::new("Smith", "alice")).await.unwrap();
        let conv = s
            .insert_conversation(&Conversation::new("Consult", case.id, "alice"))
            .await
            .unwrap();

        let stored = s
            .append_messages(&[
                Message::new(conv.id, MessageRole::System, "Routing to LegalExpert."),
                Message::new(conv.id, MessageRole::Assistant, "answer"),
            ])
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].id < stored[1].id);

        let err = s
            .append_messages(&[
                Message::new(conv.id, MessageRole::System, "kept?"),
                Message::new(999, MessageRole::Assistant, "orphan"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, LexError::NotFound(_)));
        let listed = s.list_messages(conv.id).await.unwrap();
        assert_eq!(listed.len(), 2, "failed batch leaves nothing behind");
    }

    #[test]
    fn open_file_based_db() {
        let dir = std::env::temp_dir().join(format!(
            "lexcase-test-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("test.db");

        let storage = SqliteStorage::open(&db_path).expect("should open file DB");
        assert_eq!(storage.path(), db_path);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
