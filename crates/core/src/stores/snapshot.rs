use crate::error::StoreError;
use crate::models::{Chunk, ChunkId, ContentType, EntityNode, GraphEdge, NodeId, RelationType};
use crate::traits::ChunkStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// On-disk snapshot layout. Several files in one directory are merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub entities: Vec<EntityNode>,
    #[serde(default)]
    pub entry_points: Vec<NodeId>,
}

/// A chunk as written by the extractor. The id is optional: chunks without one
/// get a content-addressed id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub chunk_id: Option<ChunkId>,
    pub source_url: String,
    #[serde(default, alias = "modality")]
    pub content_type: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub entity_tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub crawled_at: Option<DateTime<Utc>>,
}

impl ChunkRecord {
    pub fn into_chunk(self) -> Chunk {
        let chunk_id = self
            .chunk_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| content_chunk_id(&self.source_url, &self.text));
        Chunk {
            chunk_id,
            source_url: self.source_url,
            content_type: self
                .content_type
                .as_deref()
                .map(ContentType::from_label)
                .unwrap_or_default(),
            text: self.text,
            embedding: self.embedding,
            entity_tags: self.entity_tags,
            title: self.title,
            crawled_at: self.crawled_at,
        }
    }
}

impl From<&Chunk> for ChunkRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: Some(chunk.chunk_id.clone()),
            source_url: chunk.source_url.clone(),
            content_type: Some(chunk.content_type.as_str().to_string()),
            text: chunk.text.clone(),
            embedding: chunk.embedding.clone(),
            entity_tags: chunk.entity_tags.clone(),
            title: chunk.title.clone(),
            crawled_at: chunk.crawled_at,
        }
    }
}

pub fn content_chunk_id(source_url: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SiteSummary {
    pub total_pages: usize,
    pub total_chunks: usize,
    pub total_entities: usize,
    pub total_edges: usize,
    pub entry_points: Vec<NodeId>,
    pub max_depth: usize,
    pub avg_links_per_page: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LinkedPage {
    pub url: NodeId,
    pub chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextWindow {
    pub chunk: Chunk,
    pub siblings: Vec<Chunk>,
    pub linked_pages: Vec<LinkedPage>,
}

/// Immutable, process-wide view of the crawled site: chunks, adjacency and
/// entities. Built once, then shared read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    chunks: Vec<Chunk>,
    by_id: HashMap<ChunkId, usize>,
    by_page: BTreeMap<String, Vec<usize>>,
    adjacency: HashMap<NodeId, Vec<GraphEdge>>,
    entities: Vec<EntityNode>,
    entry_points: Vec<NodeId>,
    edge_count: usize,
    dimensions: Option<usize>,
}

impl IndexSnapshot {
    pub fn from_parts(
        chunks: Vec<Chunk>,
        edges: Vec<GraphEdge>,
        entities: Vec<EntityNode>,
        entry_points: Vec<NodeId>,
    ) -> Result<Self, StoreError> {
        let mut by_id = HashMap::with_capacity(chunks.len());
        let mut by_page: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut dimensions = None;

        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.text.trim().is_empty() {
                return Err(StoreError::InvalidSnapshot(format!(
                    "chunk {} has no text",
                    chunk.chunk_id
                )));
            }
            if by_id.insert(chunk.chunk_id.clone(), position).is_some() {
                return Err(StoreError::InvalidSnapshot(format!(
                    "duplicate chunk id {}",
                    chunk.chunk_id
                )));
            }
            if !chunk.embedding.is_empty() {
                match dimensions {
                    None => dimensions = Some(chunk.embedding.len()),
                    Some(expected) if expected != chunk.embedding.len() => {
                        return Err(StoreError::InvalidSnapshot(format!(
                            "chunk {} has embedding dimension {} but the index uses {}",
                            chunk.chunk_id,
                            chunk.embedding.len(),
                            expected
                        )));
                    }
                    Some(_) => {}
                }
            }
            by_page
                .entry(chunk.source_url.clone())
                .or_default()
                .push(position);
        }

        for positions in by_page.values_mut() {
            positions.sort_by(|left, right| chunks[*left].chunk_id.cmp(&chunks[*right].chunk_id));
        }

        let mut adjacency: HashMap<NodeId, Vec<GraphEdge>> = HashMap::new();
        let edge_count = edges.len();
        for edge in edges {
            if !(edge.weight.is_finite() && (0.0..=1.0).contains(&edge.weight)) {
                return Err(StoreError::InvalidSnapshot(format!(
                    "edge {} -> {} has weight {} outside [0, 1]",
                    edge.source, edge.target, edge.weight
                )));
            }
            adjacency.entry(edge.source.clone()).or_default().push(edge);
        }
        for outgoing in adjacency.values_mut() {
            outgoing.sort_by(|left, right| {
                left.target
                    .cmp(&right.target)
                    .then(left.relation.cmp(&right.relation))
            });
        }

        let mut snapshot = Self {
            chunks,
            by_id,
            by_page,
            adjacency,
            entities,
            entry_points,
            edge_count,
            dimensions,
        };
        if snapshot.entry_points.is_empty() {
            snapshot.entry_points = snapshot.derive_entry_points();
        }

        debug!(
            chunks = snapshot.chunks.len(),
            edges = snapshot.edge_count,
            entry_points = snapshot.entry_points.len(),
            "index snapshot built"
        );
        Ok(snapshot)
    }

    pub fn from_file(file: SnapshotFile) -> Result<Self, StoreError> {
        let chunks = file.chunks.into_iter().map(ChunkRecord::into_chunk).collect();
        Self::from_parts(chunks, file.edges, file.entities, file.entry_points)
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.adjacency.values().flatten()
    }

    pub fn to_snapshot_file(&self) -> SnapshotFile {
        let mut edges: Vec<GraphEdge> = self.edges().cloned().collect();
        edges.sort_by(|left, right| {
            left.source
                .cmp(&right.source)
                .then(left.target.cmp(&right.target))
                .then(left.relation.cmp(&right.relation))
        });
        SnapshotFile {
            chunks: self.chunks.iter().map(ChunkRecord::from).collect(),
            edges,
            entities: self.entities.clone(),
            entry_points: self.entry_points.clone(),
        }
    }

    /// Page urls: every chunk owner plus every endpoint of a `LINKS_TO` edge.
    pub fn pages(&self) -> BTreeSet<NodeId> {
        let mut pages: BTreeSet<NodeId> = self.by_page.keys().cloned().collect();
        for edge in self.edges() {
            if edge.relation == RelationType::LinksTo {
                pages.insert(edge.source.clone());
                pages.insert(edge.target.clone());
            }
        }
        pages
    }

    pub fn chunks_on_page(&self, url: &str) -> Vec<&Chunk> {
        self.by_page
            .get(url)
            .map(|positions| positions.iter().map(|position| &self.chunks[*position]).collect())
            .unwrap_or_default()
    }

    fn derive_entry_points(&self) -> Vec<NodeId> {
        let linked: HashSet<&str> = self
            .edges()
            .filter(|edge| edge.relation == RelationType::LinksTo)
            .map(|edge| edge.target.as_str())
            .collect();
        self.pages()
            .into_iter()
            .filter(|page| !linked.contains(page.as_str()))
            .collect()
    }

    pub fn site_summary(&self) -> SiteSummary {
        let pages = self.pages();
        let link_count = self
            .edges()
            .filter(|edge| edge.relation == RelationType::LinksTo)
            .count();

        let mut depths: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<(&str, usize)> = self
            .entry_points
            .iter()
            .map(|entry| (entry.as_str(), 0))
            .collect();
        while let Some((page, depth)) = queue.pop_front() {
            if depths.contains_key(page) {
                continue;
            }
            depths.insert(page, depth);
            for edge in self.edges_from(page) {
                if edge.relation == RelationType::LinksTo && !depths.contains_key(edge.target.as_str()) {
                    queue.push_back((edge.target.as_str(), depth + 1));
                }
            }
        }

        SiteSummary {
            total_pages: pages.len(),
            total_chunks: self.chunks.len(),
            total_entities: self.entities.len(),
            total_edges: self.edge_count,
            entry_points: self.entry_points.clone(),
            max_depth: depths.values().copied().max().unwrap_or(0),
            avg_links_per_page: if pages.is_empty() {
                0.0
            } else {
                link_count as f64 / pages.len() as f64
            },
        }
    }

    /// Surrounding context for a chunk: up to `window` sibling chunks of the
    /// same page and the chunks of pages it links to directly.
    pub fn context_window(&self, chunk_id: &str, window: usize) -> Result<ContextWindow, StoreError> {
        let chunk = self
            .by_id
            .get(chunk_id)
            .map(|position| self.chunks[*position].clone())
            .ok_or_else(|| StoreError::NotFound {
                missing: vec![chunk_id.to_string()],
            })?;

        let siblings = self
            .chunks_on_page(&chunk.source_url)
            .into_iter()
            .filter(|sibling| sibling.chunk_id != chunk.chunk_id)
            .take(window)
            .cloned()
            .collect();

        let linked_pages = self
            .edges_from(&chunk.source_url)
            .iter()
            .filter(|edge| matches!(edge.relation, RelationType::LinksTo | RelationType::Contains))
            .map(|edge| LinkedPage {
                url: edge.target.clone(),
                chunk_ids: self
                    .chunks_on_page(&edge.target)
                    .into_iter()
                    .take(window)
                    .map(|linked| linked.chunk_id.clone())
                    .collect(),
            })
            .collect();

        Ok(ContextWindow {
            chunk,
            siblings,
            linked_pages,
        })
    }
}

impl ChunkStore for IndexSnapshot {
    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, StoreError> {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !self.by_id.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::NotFound { missing });
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id.as_str()))
            .map(|position| self.chunks[*position].clone())
            .collect())
    }

    fn all_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn edges_from(&self, node_id: &str) -> &[GraphEdge] {
        self.adjacency
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.by_id.contains_key(chunk_id)
    }

    fn chunks(&self) -> Box<dyn Iterator<Item = &Chunk> + '_> {
        Box::new(self.chunks.iter())
    }

    fn entities(&self) -> &[EntityNode] {
        &self.entities
    }

    fn entry_points(&self) -> &[NodeId] {
        &self.entry_points
    }
}

/// Loads every `*.json` snapshot file under `folder` (recursively, sorted by
/// path) and merges them into one index.
pub fn load_snapshot_dir(folder: &Path) -> Result<IndexSnapshot, StoreError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_json = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort_unstable();

    if files.is_empty() {
        return Err(StoreError::InvalidSnapshot(format!(
            "no snapshot files found in {}",
            folder.display()
        )));
    }

    let mut merged = SnapshotFile::default();
    for path in &files {
        let raw = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&raw)?;
        merged.chunks.extend(file.chunks);
        merged.edges.extend(file.edges);
        merged.entities.extend(file.entities);
        merged.entry_points.extend(file.entry_points);
    }
    merged.entry_points.sort();
    merged.entry_points.dedup();

    let snapshot = IndexSnapshot::from_file(merged)?;
    info!(
        folder = %folder.display(),
        files = files.len(),
        chunks = snapshot.all_chunk_count(),
        edges = snapshot.edge_count(),
        "loaded offline snapshot"
    );
    Ok(snapshot)
}

/// File name written by [`save_snapshot_dir`].
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.json";

/// Writes the whole index as one snapshot file in `folder`, creating it if
/// needed. The result loads back with [`load_snapshot_dir`].
pub fn save_snapshot_dir(snapshot: &IndexSnapshot, folder: &Path) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(folder)?;
    let path = folder.join(SNAPSHOT_FILE_NAME);
    let raw = serde_json::to_string_pretty(&snapshot.to_snapshot_file())?;
    std::fs::write(&path, raw)?;
    info!(
        path = %path.display(),
        chunks = snapshot.all_chunk_count(),
        edges = snapshot.edge_count(),
        "saved offline snapshot"
    );
    Ok(path)
}
