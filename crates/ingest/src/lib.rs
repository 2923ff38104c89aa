pub mod chunk;
pub mod chunker;
pub mod source;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use source::{DocumentSource, FsDocumentSource, HttpDocumentSource};

use sha2::{Digest, Sha256};

/// Generate a stable document ID from its source reference.
pub fn generate_doc_id(document_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_ref.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_stable() {
        assert_eq!(generate_doc_id("bucket/a.md"), generate_doc_id("bucket/a.md"));
        assert_ne!(generate_doc_id("bucket/a.md"), generate_doc_id("bucket/b.md"));
    }
}
