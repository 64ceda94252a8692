pub mod neo4j;
pub mod snapshot;

pub use neo4j::Neo4jStore;
pub use snapshot::{
    content_chunk_id, load_snapshot_dir, save_snapshot_dir, ChunkRecord, ContextWindow,
    IndexSnapshot, LinkedPage, SiteSummary, SnapshotFile, SNAPSHOT_FILE_NAME,
};
