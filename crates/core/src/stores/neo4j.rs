use super::snapshot::IndexSnapshot;
use crate::error::StoreError;
use crate::models::{Chunk, ContentType, EntityNode, GraphEdge, RelationType};
use crate::traits::ChunkStore;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use url::Url;

const LOAD_CHUNKS: &str = r#"
    MATCH (c:Chunk)
    OPTIONAL MATCH (source)-[:HAS_CHUNK]->(c)
    WHERE source:Page OR source:Asset
    RETURN c.id AS chunk_id,
           coalesce(source.url, c.source_url, '') AS source_url,
           coalesce(c.modality, 'text') AS modality,
           coalesce(c.text, '') AS text,
           coalesce(c.embedding, []) AS embedding,
           coalesce(c.entity_tags, []) AS entity_tags,
           c.title AS title,
           c.crawled_at AS crawled_at
    ORDER BY chunk_id;
"#;

const LOAD_EDGES: &str = r#"
    MATCH (a)-[r]->(b)
    WHERE type(r) IN $relations
    RETURN coalesce(a.url, a.id) AS source,
           coalesce(b.url, b.id) AS target,
           type(r) AS relation,
           coalesce(r.weight, 1.0) AS weight;
"#;

const LOAD_ENTITIES: &str = r#"
    MATCH (e:Entity)
    RETURN e.id AS node_id, coalesce(e.name, e.id) AS name
    ORDER BY node_id;
"#;

const LOAD_ENTRY_POINTS: &str = r#"
    MATCH (p:Page)
    WHERE coalesce(p.is_root, false)
    RETURN p.url AS url
    ORDER BY url;
"#;

/// Graph persistence over the Neo4j HTTP transaction endpoint.
///
/// The engine never queries Neo4j per request: [`Neo4jStore::load_snapshot`]
/// reads the whole site graph once into an [`IndexSnapshot`].
pub struct Neo4jStore {
    endpoint: Url,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: &str,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            endpoint,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        })
    }

    fn tx_url(&self) -> Result<Url, StoreError> {
        Ok(self
            .endpoint
            .join(&format!("db/{}/tx/commit", self.database))?)
    }

    async fn run_statements(&self, statements: Vec<Value>) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.tx_url()?)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "neo4j".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        check_errors(&body)?;
        Ok(body)
    }

    pub async fn load_snapshot(&self) -> Result<IndexSnapshot, StoreError> {
        let relations: Vec<&str> = RelationType::ALL.iter().map(RelationType::label).collect();
        let body = self
            .run_statements(vec![
                json!({ "statement": LOAD_CHUNKS }),
                json!({ "statement": LOAD_EDGES, "parameters": { "relations": relations } }),
                json!({ "statement": LOAD_ENTITIES }),
                json!({ "statement": LOAD_ENTRY_POINTS }),
            ])
            .await?;

        let snapshot = snapshot_from_payload(&body)?;
        info!(
            chunks = snapshot.all_chunk_count(),
            edges = snapshot.edge_count(),
            database = %self.database,
            "loaded snapshot from neo4j"
        );
        Ok(snapshot)
    }

    pub async fn upsert_snapshot(&self, snapshot: &IndexSnapshot) -> Result<(), StoreError> {
        let statements = upsert_statements(snapshot);
        debug!(statements = statements.len(), "writing snapshot to neo4j");
        self.run_statements(statements).await?;
        info!(
            chunks = snapshot.all_chunk_count(),
            edges = snapshot.edge_count(),
            "snapshot written to neo4j"
        );
        Ok(())
    }
}

fn check_errors(body: &Value) -> Result<(), StoreError> {
    let messages: Vec<String> = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| {
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        Ok(())
    } else {
        Err(StoreError::BackendResponse {
            backend: "neo4j".to_string(),
            details: messages.join("; "),
        })
    }
}

/// Row arrays of the `index`-th statement result.
fn extract_rows(payload: &Value, index: usize) -> Vec<&Value> {
    payload
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.get(index))
        .and_then(|result| result.get("data"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|entry| {
                    entry
                        .get("row")
                        .or(Some(entry))
                        .filter(|candidate| candidate.is_array())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn text_at(row: &Value, index: usize) -> Option<String> {
    row.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn strings_at(row: &Value, index: usize) -> Vec<String> {
    row.get(index)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn chunk_from_row(row: &Value) -> Option<Chunk> {
    let chunk_id = text_at(row, 0)?;
    let embedding = row
        .get(4)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Some(Chunk {
        chunk_id,
        source_url: text_at(row, 1).unwrap_or_default(),
        content_type: text_at(row, 2)
            .map(|label| ContentType::from_label(&label))
            .unwrap_or_default(),
        text: text_at(row, 3).unwrap_or_default(),
        embedding,
        entity_tags: strings_at(row, 5),
        title: text_at(row, 6),
        crawled_at: text_at(row, 7)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|timestamp| timestamp.with_timezone(&Utc)),
    })
}

fn edge_from_row(row: &Value) -> Option<GraphEdge> {
    Some(GraphEdge {
        source: text_at(row, 0)?,
        target: text_at(row, 1)?,
        relation: RelationType::from_label(&text_at(row, 2)?),
        weight: row.get(3).and_then(Value::as_f64).unwrap_or(1.0),
    })
}

pub(crate) fn snapshot_from_payload(payload: &Value) -> Result<IndexSnapshot, StoreError> {
    let mut seen = HashSet::new();
    let chunks: Vec<Chunk> = extract_rows(payload, 0)
        .into_iter()
        .filter_map(chunk_from_row)
        // a chunk reachable from several pages comes back once per page
        .filter(|chunk| seen.insert(chunk.chunk_id.clone()))
        .collect();
    let edges = extract_rows(payload, 1)
        .into_iter()
        .filter_map(edge_from_row)
        .collect();
    let entities = extract_rows(payload, 2)
        .into_iter()
        .filter_map(|row| {
            Some(EntityNode {
                node_id: text_at(row, 0)?,
                name: text_at(row, 1)?,
            })
        })
        .collect();
    let entry_points = extract_rows(payload, 3)
        .into_iter()
        .filter_map(|row| text_at(row, 0))
        .collect();

    IndexSnapshot::from_parts(chunks, edges, entities, entry_points)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NodeKind {
    Page,
    Chunk,
    Entity,
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            NodeKind::Page => "Page",
            NodeKind::Chunk => "Chunk",
            NodeKind::Entity => "Entity",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            NodeKind::Page => "url",
            NodeKind::Chunk | NodeKind::Entity => "id",
        }
    }
}

pub(crate) fn upsert_statements(snapshot: &IndexSnapshot) -> Vec<Value> {
    let chunk_rows: Vec<Value> = snapshot
        .chunks()
        .map(|chunk| {
            json!({
                "id": chunk.chunk_id,
                "source_url": chunk.source_url,
                "modality": chunk.content_type.as_str(),
                "text": chunk.text,
                "embedding": chunk.embedding,
                "entity_tags": chunk.entity_tags,
                "title": chunk.title,
                "crawled_at": chunk.crawled_at.map(|timestamp| timestamp.to_rfc3339()),
            })
        })
        .collect();

    let mut statements = vec![json!({
        "statement": r#"
            UNWIND $rows AS row
            MERGE (c:Chunk {id: row.id})
            SET c.text = row.text,
                c.modality = row.modality,
                c.embedding = row.embedding,
                c.entity_tags = row.entity_tags,
                c.title = row.title,
                c.crawled_at = row.crawled_at,
                c.source_url = row.source_url
            MERGE (p:Page {url: row.source_url})
            MERGE (p)-[:HAS_CHUNK]->(c)
            RETURN count(c) AS chunk_count;
        "#,
        "parameters": { "rows": chunk_rows }
    })];

    let entity_rows: Vec<Value> = snapshot
        .entities()
        .iter()
        .map(|entity| json!({ "id": entity.node_id, "name": entity.name }))
        .collect();
    if !entity_rows.is_empty() {
        statements.push(json!({
            "statement": "UNWIND $rows AS row MERGE (e:Entity {id: row.id}) SET e.name = row.name",
            "parameters": { "rows": entity_rows }
        }));
    }

    let entity_ids: HashSet<&str> = snapshot
        .entities()
        .iter()
        .map(|entity| entity.node_id.as_str())
        .collect();
    let kind_of = |node: &str| {
        if snapshot.contains_chunk(node) {
            NodeKind::Chunk
        } else if entity_ids.contains(node) {
            NodeKind::Entity
        } else {
            NodeKind::Page
        }
    };

    // Relationship types cannot be parameters, so edges are grouped by type
    // and endpoint labels. Labels come from closed enums.
    let mut groups: BTreeMap<(RelationType, NodeKind, NodeKind), Vec<Value>> = BTreeMap::new();
    for edge in snapshot.edges() {
        groups
            .entry((edge.relation, kind_of(&edge.source), kind_of(&edge.target)))
            .or_default()
            .push(json!({ "source": edge.source, "target": edge.target, "weight": edge.weight }));
    }
    for ((relation, source_kind, target_kind), rows) in groups {
        statements.push(json!({
            "statement": format!(
                "UNWIND $rows AS row \
                 MERGE (a:{} {{{}: row.source}}) \
                 MERGE (b:{} {{{}: row.target}}) \
                 MERGE (a)-[r:{}]->(b) \
                 SET r.weight = row.weight",
                source_kind.label(),
                source_kind.key(),
                target_kind.label(),
                target_kind.key(),
                relation.label()
            ),
            "parameters": { "rows": rows }
        }));
    }

    if !snapshot.entry_points().is_empty() {
        statements.push(json!({
            "statement": "UNWIND $urls AS url MERGE (p:Page {url: url}) SET p.is_root = true",
            "parameters": { "urls": snapshot.entry_points() }
        }));
    }

    statements
}
