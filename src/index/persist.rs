//! On-disk formats for the vector index and its metadata
//!
//! Index file:
//!
//! ```text
//! "EXIDX\0\0\0" | u32 version | u32 header_len | JSON header
//! | u64 payload_len | zstd(payload) | blake3(header ++ compressed payload)
//! ```
//!
//! The payload holds every vector as little-endian f32, then for trained IVF
//! indexes a u32 list count, the centroid table and one u32 list id per vector.
//!
//! Metadata file:
//!
//! ```text
//! "EXMETA\0\0" | u32 version | 16-byte build id | u64 count
//! | count x (u32 byte_len | UTF-8 bytes) | blake3(everything before)
//! ```
//!
//! All integers are little-endian. Both files carry the same build id so a
//! mismatched pair is detected on load.

use super::ivf::IvfLists;
use super::topology::{
    HnswParams, IndexSpec, IndexTopology, VectorIndex, HNSW_MAX_CONNECTIONS,
};
use crate::error::{ExemplarError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

const INDEX_MAGIC: &[u8; 8] = b"EXIDX\0\0\0";
const METADATA_MAGIC: &[u8; 8] = b"EXMETA\0\0";
const FORMAT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHeader {
    pub build_id: Uuid,
    pub topology: IndexTopology,
    pub metric: String,
    pub dimension: usize,
    pub count: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub hnsw: HnswParams,
    pub trained: bool,
    pub built_at: DateTime<Utc>,
}

/// Serialize `index` to `path`
pub fn write_index(path: &Path, index: &VectorIndex, build_id: Uuid) -> Result<IndexHeader> {
    let spec = index.spec();
    let header = IndexHeader {
        build_id,
        topology: spec.topology,
        metric: spec.metric.clone(),
        dimension: spec.dimension,
        count: index.len(),
        nlist: spec.nlist,
        nprobe: spec.nprobe,
        hnsw: spec.hnsw,
        trained: index.is_trained(),
        built_at: Utc::now(),
    };
    let header_bytes = serde_json::to_vec(&header).map_err(|e| ExemplarError::Json {
        source: e,
        context: "Failed to encode index header".to_string(),
    })?;

    let mut payload = Vec::with_capacity(index.vectors().len() * 4);
    put_f32s(&mut payload, index.vectors());
    if let Some(ivf) = index.ivf() {
        payload.extend_from_slice(&(ivf.nlist() as u32).to_le_bytes());
        put_f32s(&mut payload, ivf.centroids());
        for list in ivf.assignments(index.len()) {
            payload.extend_from_slice(&list.to_le_bytes());
        }
    }
    let compressed = zstd::encode_all(&payload[..], ZSTD_LEVEL)
        .map_err(|e| ExemplarError::io(e, "Failed to compress index payload"))?;

    let mut out = Vec::with_capacity(compressed.len() + header_bytes.len() + 64);
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
    out.extend_from_slice(&compressed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&header_bytes);
    hasher.update(&compressed);
    out.extend_from_slice(hasher.finalize().as_bytes());

    write_atomic(path, &out)?;
    Ok(header)
}

/// Read and verify an index file
pub fn read_index(path: &Path) -> Result<(VectorIndex, IndexHeader)> {
    let bytes = read_existing(path)?;
    let corrupt = |message: &str| ExemplarError::serialization(path, message);

    let mut reader = ByteReader::new(&bytes);
    if reader.take(8) != Some(INDEX_MAGIC.as_slice()) {
        return Err(corrupt("not an index file"));
    }
    check_version(path, reader.u32())?;

    let header_len = reader.u32().ok_or_else(|| corrupt("truncated header length"))? as usize;
    let header_bytes = reader
        .take(header_len)
        .ok_or_else(|| corrupt("truncated header"))?;
    let payload_len = reader.u64().ok_or_else(|| corrupt("truncated payload length"))? as usize;
    let compressed = reader
        .take(payload_len)
        .ok_or_else(|| corrupt("truncated payload"))?;
    let checksum = reader
        .take(CHECKSUM_LEN)
        .ok_or_else(|| corrupt("missing checksum"))?;
    if !reader.is_at_end() {
        return Err(corrupt("trailing bytes after checksum"));
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(header_bytes);
    hasher.update(compressed);
    if hasher.finalize().as_bytes().as_slice() != checksum {
        return Err(corrupt("checksum mismatch"));
    }

    let header: IndexHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| corrupt(&format!("invalid header: {}", e)))?;
    if header.hnsw.m == 0 || header.hnsw.m > HNSW_MAX_CONNECTIONS {
        return Err(corrupt(&format!(
            "HNSW m={} outside 1..={}",
            header.hnsw.m, HNSW_MAX_CONNECTIONS
        )));
    }
    let payload = zstd::decode_all(compressed)
        .map_err(|e| corrupt(&format!("payload decompression failed: {}", e)))?;

    let mut reader = ByteReader::new(&payload);
    let floats = header
        .count
        .checked_mul(header.dimension)
        .ok_or_else(|| corrupt("vector count overflows"))?;
    let vectors = reader
        .f32s(floats)
        .ok_or_else(|| corrupt("payload shorter than header count"))?;

    let ivf = if header.topology.requires_training() && header.trained {
        let nlist = reader.u32().ok_or_else(|| corrupt("missing IVF list count"))? as usize;
        let floats = nlist
            .checked_mul(header.dimension)
            .ok_or_else(|| corrupt("IVF centroid table overflows"))?;
        let centroids = reader
            .f32s(floats)
            .ok_or_else(|| corrupt("truncated IVF centroids"))?;
        let assignments = (0..header.count)
            .map(|_| reader.u32())
            .collect::<Option<Vec<u32>>>()
            .ok_or_else(|| corrupt("truncated IVF assignments"))?;
        Some(
            IvfLists::from_parts(header.dimension, centroids, &assignments)
                .map_err(|e| corrupt(&e.to_string()))?,
        )
    } else {
        None
    };
    if !reader.is_at_end() {
        return Err(corrupt("payload longer than header count"));
    }

    let spec = IndexSpec {
        topology: header.topology,
        metric: header.metric.clone(),
        dimension: header.dimension,
        nlist: header.nlist,
        nprobe: header.nprobe,
        hnsw: header.hnsw,
    };
    let index = VectorIndex::restore(spec, vectors, ivf).map_err(|e| corrupt(&e.to_string()))?;

    Ok((index, header))
}

/// Serialize the ordered chunk texts to `path`
pub fn write_metadata(path: &Path, build_id: Uuid, texts: &[String]) -> Result<()> {
    let body_len: usize = texts.iter().map(|t| t.len() + 4).sum();
    let mut out = Vec::with_capacity(36 + body_len + CHECKSUM_LEN);

    out.extend_from_slice(METADATA_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(build_id.as_bytes());
    out.extend_from_slice(&(texts.len() as u64).to_le_bytes());
    for text in texts {
        let len = u32::try_from(text.len()).map_err(|_| {
            ExemplarError::serialization(path, "metadata record exceeds 4 GiB")
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(text.as_bytes());
    }

    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());

    write_atomic(path, &out)
}

/// Read and verify a metadata file
pub fn read_metadata(path: &Path) -> Result<(Uuid, Vec<String>)> {
    let bytes = read_existing(path)?;
    let corrupt = |message: &str| ExemplarError::serialization(path, message);

    if bytes.len() < CHECKSUM_LEN {
        return Err(corrupt("file too short"));
    }
    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if blake3::hash(body).as_bytes().as_slice() != checksum {
        return Err(corrupt("checksum mismatch"));
    }

    let mut reader = ByteReader::new(body);
    if reader.take(8) != Some(METADATA_MAGIC.as_slice()) {
        return Err(corrupt("not a metadata file"));
    }
    check_version(path, reader.u32())?;

    let id_bytes: [u8; 16] = reader
        .take(16)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| corrupt("truncated build id"))?;
    let count = reader.u64().ok_or_else(|| corrupt("truncated record count"))? as usize;

    // Every record needs at least its length prefix.
    if count > body.len() / 4 {
        return Err(corrupt("record count exceeds file size"));
    }

    let mut texts = Vec::with_capacity(count);
    for i in 0..count {
        let len = reader
            .u32()
            .ok_or_else(|| corrupt(&format!("truncated length of record {}", i)))?;
        let raw = reader
            .take(len as usize)
            .ok_or_else(|| corrupt(&format!("truncated record {}", i)))?;
        let text = std::str::from_utf8(raw)
            .map_err(|e| corrupt(&format!("record {} is not UTF-8: {}", i, e)))?;
        texts.push(text.to_string());
    }
    if !reader.is_at_end() {
        return Err(corrupt("trailing bytes after last record"));
    }

    Ok((Uuid::from_bytes(id_bytes), texts))
}

fn check_version(path: &Path, version: Option<u32>) -> Result<()> {
    match version {
        Some(FORMAT_VERSION) => Ok(()),
        Some(other) => Err(ExemplarError::serialization(
            path,
            format!("unsupported format version {}", other),
        )),
        None => Err(ExemplarError::serialization(path, "truncated version")),
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(ExemplarError::IndexNotFound {
            path: path.to_path_buf(),
        });
    }
    fs::read(path).map_err(|e| ExemplarError::io(e, format!("Failed to read {}", path.display())))
}

/// Write to a sibling temp file, sync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            ExemplarError::io(e, format!("Failed to create directory: {}", parent.display()))
        })?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    let written = write_and_rename(&temp_path, path, bytes);
    if written.is_err() && temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            tracing::warn!("Failed to remove {}: {}", temp_path.display(), e);
        }
    }
    written
}

fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(temp_path).map_err(|e| {
        ExemplarError::io(e, format!("Failed to create temp file: {}", temp_path.display()))
    })?;
    file.write_all(bytes).map_err(|e| {
        ExemplarError::io(e, format!("Failed to write temp file: {}", temp_path.display()))
    })?;
    file.sync_all().map_err(|e| {
        ExemplarError::io(e, format!("Failed to sync temp file: {}", temp_path.display()))
    })?;
    drop(file);

    fs::rename(temp_path, path).map_err(|e| {
        ExemplarError::io(
            e,
            format!(
                "Failed to rename {} -> {}",
                temp_path.display(),
                path.display()
            ),
        )
    })
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)?.try_into().ok().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8)?.try_into().ok().map(u64::from_le_bytes)
    }

    fn f32s(&mut self, n: usize) -> Option<Vec<f32>> {
        let raw = self.take(n.checked_mul(4)?)?;
        Some(
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use tempfile::TempDir;

    fn populated(topology: &str) -> VectorIndex {
        let mut config = RagConfig::default();
        config.set_index_type(topology);
        config.index.nlist = 2;
        let mut index = VectorIndex::new(IndexSpec::from_config(&config.index, 3));
        let rows = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        index.train(&rows).unwrap();
        index.add(&rows).unwrap();
        index
    }

    #[test]
    fn test_index_file_restores_vectors_and_search() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.idx");
        let build_id = Uuid::new_v4();

        for topology in ["IndexFlatIP", "IndexIVFFlat", "IndexHNSW"] {
            let index = populated(topology);
            write_index(&path, &index, build_id).unwrap();

            let (restored, header) = read_index(&path).unwrap();
            assert_eq!(header.build_id, build_id);
            assert_eq!(header.count, 3);
            assert_eq!(restored.vectors(), index.vectors());
            assert_eq!(restored.topology(), index.topology());
            assert!(restored.is_trained());

            let hits = restored.search(&[0.0, 1.0, 0.0], 1).unwrap();
            assert_eq!(hits[0].0, 1, "{topology}");
        }
    }

    #[test]
    fn test_metadata_file_preserves_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("metadata.bin");
        let build_id = Uuid::new_v4();
        let texts = vec!["first".to_string(), String::new(), "третий".to_string()];

        write_metadata(&path, build_id, &texts).unwrap();
        let (id, restored) = read_metadata(&path).unwrap();
        assert_eq!(id, build_id);
        assert_eq!(restored, texts);
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[test]
    fn test_corruption_is_detected() {
        let temp = TempDir::new().unwrap();
        let index_path = temp.path().join("vectors.idx");
        let metadata_path = temp.path().join("metadata.bin");
        let build_id = Uuid::new_v4();

        write_index(&index_path, &populated("IndexFlatIP"), build_id).unwrap();
        write_metadata(&metadata_path, build_id, &["a".to_string()]).unwrap();

        for path in [&index_path, &metadata_path] {
            let mut bytes = fs::read(path).unwrap();
            let middle = bytes.len() / 2;
            bytes[middle] ^= 0xFF;
            fs::write(path, &bytes).unwrap();
        }

        assert!(matches!(
            read_index(&index_path),
            Err(ExemplarError::Serialization { .. })
        ));
        assert!(matches!(
            read_metadata(&metadata_path),
            Err(ExemplarError::Serialization { .. })
        ));
    }

    /// Frame `header` and `payload` exactly as `write_index` does
    fn write_raw(path: &Path, header: &IndexHeader, payload: &[u8]) {
        let header_bytes = serde_json::to_vec(header).unwrap();
        let compressed = zstd::encode_all(payload, ZSTD_LEVEL).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
        out.extend_from_slice(&compressed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&compressed);
        out.extend_from_slice(hasher.finalize().as_bytes());
        fs::write(path, out).unwrap();
    }

    #[test]
    fn test_out_of_range_hnsw_params_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.idx");

        for m in [0, HNSW_MAX_CONNECTIONS + 44] {
            let mut config = RagConfig::default();
            config.index.hnsw_m = m;
            let mut index = VectorIndex::new(IndexSpec::from_config(&config.index, 3));
            index.add(&[1.0, 0.0, 0.0]).unwrap();
            write_index(&path, &index, Uuid::new_v4()).unwrap();

            match read_index(&path) {
                Err(ExemplarError::Serialization { message, .. }) => {
                    assert!(message.contains("HNSW"), "{message}")
                }
                other => panic!("m={m}: expected serialization error, got {:?}", other.err()),
            }
        }
    }

    #[test]
    fn test_oversized_ivf_table_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.idx");
        let (_, mut header) = {
            let index = populated("IndexIVFFlat");
            write_index(&path, &index, Uuid::new_v4()).unwrap();
            read_index(&path).unwrap()
        };
        header.count = 0;
        header.dimension = usize::MAX / 2;

        write_raw(&path, &header, &u32::MAX.to_le_bytes());

        assert!(matches!(
            read_index(&path),
            Err(ExemplarError::Serialization { .. })
        ));
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("metadata.bin");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let result = write_metadata(&path, Uuid::new_v4(), &["a".to_string()]);

        assert!(matches!(result, Err(ExemplarError::Io { .. })));
        assert!(!temp.path().join("metadata.bin.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            read_metadata(&temp.path().join("absent.bin")),
            Err(ExemplarError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.idx");
        fs::write(&path, b"definitely not an index").unwrap();
        assert!(matches!(
            read_index(&path),
            Err(ExemplarError::Serialization { .. })
        ));
    }
}
