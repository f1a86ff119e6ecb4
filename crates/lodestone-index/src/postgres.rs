//! Postgres + pgvector [`ChunkStore`].
//!
//! One table per supported embedding dimension (`chunks_384`, `chunks_768`,
//! ...), each with an HNSW cosine index on the vector column and a GIN index
//! over a generated tsvector column. `init` picks the active table from the
//! provider's dimension; unknown dimensions are rejected rather than
//! creating tables on the fly.

use std::sync::OnceLock;

use pgvector::Vector;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{IndexError, Result};
use crate::lexical::LexicalQuery;
use crate::scope::ScopeSet;
use crate::store::{ChunkStore, SearchOptions, validate_language};
use crate::types::{ChunkInsert, SearchHit};

/// Embedding dimensions with a backing table.
pub const SUPPORTED_DIMENSIONS: &[usize] = &[384, 512, 768, 1024, 1536, 3072];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkTable {
    dimension: usize,
    name: &'static str,
}

const TABLES: &[ChunkTable] = &[
    ChunkTable { dimension: 384, name: "chunks_384" },
    ChunkTable { dimension: 512, name: "chunks_512" },
    ChunkTable { dimension: 768, name: "chunks_768" },
    ChunkTable { dimension: 1024, name: "chunks_1024" },
    ChunkTable { dimension: 1536, name: "chunks_1536" },
    ChunkTable { dimension: 3072, name: "chunks_3072" },
];

fn table_for(dimension: usize) -> Option<ChunkTable> {
    TABLES.iter().copied().find(|t| t.dimension == dimension)
}

/// pgvector refuses hnsw indexes above this many dimensions; bigger tables
/// fall back to exact scans.
const HNSW_MAX_DIMENSION: usize = 2000;

/// DDL for one chunk table and its indexes. `language` must already be
/// validated; both it and the table name are interpolated.
fn table_ddl(table: ChunkTable, language: &str) -> Vec<String> {
    let name = table.name;
    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {name} (\
             id BIGSERIAL PRIMARY KEY, \
             path TEXT NOT NULL, \
             mtime BIGINT NOT NULL, \
             content TEXT NOT NULL, \
             start_line BIGINT NOT NULL, \
             end_line BIGINT NOT NULL, \
             embedding VECTOR({dim}) NOT NULL, \
             content_tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('{language}', content)) STORED)",
            dim = table.dimension,
        ),
        format!("CREATE INDEX IF NOT EXISTS {name}_path_idx ON {name} (path)"),
        format!("CREATE INDEX IF NOT EXISTS {name}_tsv_idx ON {name} USING gin (content_tsv)"),
    ];
    if table.dimension <= HNSW_MAX_DIMENSION {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {name}_embedding_idx ON {name} \
             USING hnsw (embedding vector_cosine_ops)"
        ));
    }
    statements
}

/// Scope restriction fragment plus its two bind arrays (exact paths and
/// escaped LIKE prefixes). Empty scope produces no fragment.
fn scope_clause(scope: &ScopeSet, first_bind: usize) -> (String, Vec<String>, Vec<String>) {
    if scope.is_empty() {
        return (String::new(), Vec::new(), Vec::new());
    }
    let files: Vec<String> = scope.exact_files().map(str::to_owned).collect();
    let patterns: Vec<String> = scope
        .folder_prefixes()
        .map(|p| format!("{}%", escape_like(p)))
        .collect();
    let clause = format!(
        " AND (path = ANY(${first_bind}) OR path LIKE ANY(${next_bind}))",
        next_bind = first_bind + 1,
    );
    (clause, files, patterns)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[derive(sqlx::FromRow)]
struct HitRow {
    id: i64,
    path: String,
    mtime: i64,
    content: String,
    start_line: i64,
    end_line: i64,
    score: f64,
}

impl HitRow {
    #[allow(clippy::cast_possible_truncation)]
    fn into_hit(self) -> SearchHit {
        SearchHit {
            id: self.id,
            path: self.path,
            mtime: self.mtime,
            content: self.content,
            start_line: usize::try_from(self.start_line).unwrap_or_default(),
            end_line: usize::try_from(self.end_line).unwrap_or_default(),
            score: self.score as f32,
        }
    }
}

/// Postgres-backed chunk store.
#[derive(Debug)]
pub struct PgChunkStore {
    pool: PgPool,
    language: String,
    active: OnceLock<ChunkTable>,
}

impl PgChunkStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            language: "simple".to_owned(),
            active: OnceLock::new(),
        }
    }

    /// Connect with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Text search configuration used for the generated tsvector column.
    /// Takes effect at table creation; changing it later requires a full
    /// reindex into a fresh database.
    ///
    /// # Errors
    ///
    /// Returns an error if `language` is not in [`crate::store::LANGUAGES`].
    pub fn with_language(mut self, language: &str) -> Result<Self> {
        validate_language(language)?;
        self.language = language.to_owned();
        Ok(self)
    }

    fn table(&self) -> Result<ChunkTable> {
        self.active.get().copied().ok_or(IndexError::NotInitialized)
    }
}

impl ChunkStore for PgChunkStore {
    async fn init(&self, dimension: usize) -> Result<()> {
        let table = table_for(dimension).ok_or(IndexError::UnsupportedDimension { dimension })?;
        if let Some(active) = self.active.get() {
            if active.dimension == dimension {
                return Ok(());
            }
            return Err(IndexError::Other(format!(
                "store already initialized with dimension {}",
                active.dimension
            )));
        }

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        for statement in table_ddl(table, &self.language) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        let _ = self.active.set(table);
        tracing::info!(table = table.name, dimension, "chunk table ready");
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[ChunkInsert<'_>]) -> Result<usize> {
        let table = self.table()?;
        if chunks.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "INSERT INTO {} (path, mtime, content, start_line, end_line, embedding) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            table.name
        );

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            if chunk.embedding.len() != table.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: table.dimension,
                    got: chunk.embedding.len(),
                });
            }
            sqlx::query(&sql)
                .bind(chunk.path)
                .bind(chunk.mtime)
                .bind(chunk.content)
                .bind(i64::try_from(chunk.start_line)?)
                .bind(i64::try_from(chunk.end_line)?)
                .bind(Vector::from(chunk.embedding.to_vec()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn delete_by_path(&self, path: &str) -> Result<u64> {
        let table = self.table()?;
        let sql = format!("DELETE FROM {} WHERE path = $1", table.name);
        let result = sqlx::query(&sql).bind(path).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<u64> {
        let table = self.table()?;
        if paths.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM {} WHERE path = ANY($1)", table.name);
        let result = sqlx::query(&sql).bind(paths).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn clear_all(&self) -> Result<u64> {
        let table = self.table()?;
        let sql = format!("DELETE FROM {}", table.name);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn max_mtime(&self) -> Result<Option<i64>> {
        let table = self.table()?;
        let sql = format!("SELECT MAX(mtime) FROM {}", table.name);
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max)
    }

    async fn indexed_paths(&self) -> Result<Vec<String>> {
        let table = self.table()?;
        let sql = format!("SELECT DISTINCT path FROM {} ORDER BY path", table.name);
        Ok(sqlx::query_scalar(&sql).fetch_all(&self.pool).await?)
    }

    async fn count_chunks(&self) -> Result<u64> {
        let table = self.table()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.name);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count)?)
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let table = self.table()?;
        if vector.len() != table.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: table.dimension,
                got: vector.len(),
            });
        }

        let (scope_sql, files, patterns) = scope_clause(&opts.scope, 3);
        // Ordering by the raw distance operator keeps the HNSW index usable.
        let sql = format!(
            "SELECT id, path, mtime, content, start_line, end_line, \
             1 - (embedding <=> $1) AS score \
             FROM {name} \
             WHERE 1 - (embedding <=> $1) > $2{scope_sql} \
             ORDER BY embedding <=> $1 \
             LIMIT {limit}",
            name = table.name,
            limit = opts.limit,
        );

        let mut query = sqlx::query_as::<_, HitRow>(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(f64::from(opts.min_similarity));
        if !opts.scope.is_empty() {
            query = query.bind(files).bind(patterns);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(HitRow::into_hit).collect())
    }

    async fn fulltext_search(
        &self,
        query: &LexicalQuery,
        language: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validate_language(language)?;
        let table = self.table()?;

        let (parse_fn, text) = match query {
            LexicalQuery::Or(q) => ("to_tsquery", q.as_str()),
            LexicalQuery::Raw(q) => ("plainto_tsquery", q.as_str()),
        };
        let (scope_sql, files, patterns) = scope_clause(&opts.scope, 3);
        let sql = format!(
            "SELECT id, path, mtime, content, start_line, end_line, \
             ts_rank_cd(content_tsv, query)::float8 AS score \
             FROM {name}, {parse_fn}($1::regconfig, $2) query \
             WHERE content_tsv @@ query{scope_sql} \
             ORDER BY score DESC \
             LIMIT {limit}",
            name = table.name,
            limit = opts.limit,
        );

        let mut db_query = sqlx::query_as::<_, HitRow>(&sql).bind(language).bind(text);
        if !opts.scope.is_empty() {
            db_query = db_query.bind(files).bind(patterns);
        }
        let rows = db_query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(HitRow::into_hit).collect())
    }
}
