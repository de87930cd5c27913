//! SQLite-backed `GraphStore`. Schema and query style follow
//! `agtrace-index`'s `Database` (the only rusqlite-backed store in the
//! retrieval pack): a thin `Connection` wrapper, `execute_batch` schema
//! init, `ON CONFLICT ... DO UPDATE` upserts, and `query_map` +
//! `.collect::<Result<Vec<_>, _>>()` for multi-row reads.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;
use crate::types::EdgeRelation;

use super::{GraphEdge, GraphNode, GraphStore};

pub struct SqliteGraphStore {
    conn: Connection,
}

impl SqliteGraphStore {
    pub fn open(db_path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                workflow_id TEXT NOT NULL,
                key TEXT NOT NULL,
                summary TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (workflow_id, key)
            );

            CREATE TABLE IF NOT EXISTS edges (
                workflow_id TEXT NOT NULL,
                source_key TEXT NOT NULL,
                target_key TEXT NOT NULL,
                relation TEXT NOT NULL,
                description TEXT NOT NULL,
                PRIMARY KEY (workflow_id, source_key, target_key, relation)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_workflow ON nodes(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_edges_workflow ON edges(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(workflow_id, source_key);
            "#,
        )?;
        Ok(())
    }
}

impl GraphStore for SqliteGraphStore {
    fn upsert_node(
        &self,
        workflow: &str,
        key: &str,
        summary: &str,
        content: &str,
    ) -> Result<(), CoreError> {
        self.conn.execute(
            r#"
            INSERT INTO nodes (workflow_id, key, summary, content)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(workflow_id, key) DO UPDATE SET
                summary = excluded.summary,
                content = excluded.content
            "#,
            params![workflow, key, summary, content],
        )?;
        Ok(())
    }

    fn get_node(&self, workflow: &str, key: &str) -> Result<Option<GraphNode>, CoreError> {
        let node = self
            .conn
            .query_row(
                "SELECT key, summary, content FROM nodes WHERE workflow_id = ?1 AND key = ?2",
                params![workflow, key],
                |row| {
                    Ok(GraphNode {
                        key: row.get(0)?,
                        summary: row.get(1)?,
                        content: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(node)
    }

    fn list_nodes(&self, workflow: &str) -> Result<Vec<GraphNode>, CoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, summary, content FROM nodes WHERE workflow_id = ?1")?;
        let nodes = stmt
            .query_map(params![workflow], |row| {
                Ok(GraphNode {
                    key: row.get(0)?,
                    summary: row.get(1)?,
                    content: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    fn delete_node(&self, workflow: &str, key: &str, force: bool) -> Result<(), CoreError> {
        if force {
            self.conn.execute(
                "DELETE FROM edges WHERE workflow_id = ?1 AND (source_key = ?2 OR target_key = ?2)",
                params![workflow, key],
            )?;
        }
        self.conn.execute(
            "DELETE FROM nodes WHERE workflow_id = ?1 AND key = ?2",
            params![workflow, key],
        )?;
        Ok(())
    }

    fn upsert_edge(
        &self,
        workflow: &str,
        source_key: &str,
        target_key: &str,
        relation: EdgeRelation,
        description: &str,
    ) -> Result<(), CoreError> {
        self.conn.execute(
            r#"
            INSERT INTO edges (workflow_id, source_key, target_key, relation, description)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(workflow_id, source_key, target_key, relation) DO UPDATE SET
                description = excluded.description
            "#,
            params![workflow, source_key, target_key, relation.as_str(), description],
        )?;
        Ok(())
    }

    fn list_edges(&self, workflow: &str) -> Result<Vec<GraphEdge>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT source_key, target_key, relation, description FROM edges WHERE workflow_id = ?1",
        )?;
        let edges = stmt
            .query_map(params![workflow], |row| {
                Ok(GraphEdge {
                    source_key: row.get(0)?,
                    target_key: row.get(1)?,
                    relation: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn reset_workflow(&self, workflow: &str) -> Result<(), CoreError> {
        self.conn
            .execute("DELETE FROM edges WHERE workflow_id = ?1", params![workflow])?;
        self.conn
            .execute("DELETE FROM nodes WHERE workflow_id = ?1", params![workflow])?;
        Ok(())
    }
}
