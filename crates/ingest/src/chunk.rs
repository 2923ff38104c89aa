use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One contiguous slice of a source document.
///
/// `header_path` carries the markdown heading hierarchy above the chunk
/// (H1 down to the nearest heading) so structure survives chunking as
/// metadata rather than as a separate code path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub header_path: Vec<String>,
}

impl Chunk {
    pub fn new(
        doc_id: String,
        text: String,
        start_offset: usize,
        end_offset: usize,
        header_path: Vec<String>,
    ) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, start_offset, end_offset);

        Self {
            chunk_id,
            doc_id,
            text,
            start_offset,
            end_offset,
            header_path,
        }
    }

    /// Chunk identity is a pure function of `(doc_id, start, end)`, so
    /// re-chunking an unchanged document always yields the same ids and
    /// every downstream write is an upsert. Fields are separated so
    /// adjacent values cannot run together.
    fn generate_chunk_id(doc_id: &str, start: usize, end: usize) -> String {
        let mut hasher = Sha256::new();
        for field in [doc_id, &start.to_string(), &end.to_string()] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable() {
        let a = Chunk::new("doc".into(), "hello".into(), 0, 5, vec![]);
        let b = Chunk::new("doc".into(), "hello".into(), 0, 5, vec![]);
        assert_eq!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn chunk_id_fields_do_not_run_together() {
        // Without separators these two would hash identical bytes.
        let a = Chunk::new("doc1".into(), "x".into(), 2, 3, vec![]);
        let b = Chunk::new("doc".into(), "x".into(), 12, 3, vec![]);
        assert_ne!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn chunk_id_varies_with_offsets_and_doc() {
        let a = Chunk::new("doc".into(), "hello".into(), 0, 5, vec![]);
        let b = Chunk::new("doc".into(), "hello".into(), 5, 10, vec![]);
        let c = Chunk::new("other".into(), "hello".into(), 0, 5, vec![]);
        assert_ne!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
    }
}
