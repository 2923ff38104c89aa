use crate::chunk::Chunk;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap carried from the tail of one chunk into the next.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Markdown-aware chunker.
///
/// Splits on paragraph boundaries, packs paragraphs up to `chunk_size`,
/// and records the heading hierarchy above each chunk. Pure and
/// deterministic: the same input always produces the same chunk list.
pub struct Chunker {
    config: ChunkerConfig,
}

struct Header {
    level: usize,
    title: String,
    position: usize,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let headers = self.extract_headers(text);
        let mut chunks = Vec::new();

        let mut buffer = String::new();
        let mut buffer_start = 0;

        for (offset, para) in self.paragraphs(text) {
            if buffer.is_empty() {
                buffer_start = offset;
                buffer.push_str(para);
                continue;
            }

            if buffer.len() + 2 + para.len() <= self.config.chunk_size {
                buffer.push_str("\n\n");
                buffer.push_str(para);
                continue;
            }

            // Flush and seed the next buffer with the overlap tail.
            let flush_end = buffer_start + buffer.len();
            chunks.push(self.make_chunk(doc_id, &headers, &buffer, buffer_start));

            if self.config.chunk_overlap > 0 {
                let tail = overlap_tail(&buffer, self.config.chunk_overlap);
                buffer_start = flush_end - tail.len();
                buffer = format!("{tail}\n\n{para}");
            } else {
                buffer_start = offset;
                buffer = para.to_string();
            }
        }

        if !buffer.trim().is_empty() {
            chunks.push(self.make_chunk(doc_id, &headers, &buffer, buffer_start));
        }

        chunks
    }

    fn make_chunk(&self, doc_id: &str, headers: &[Header], text: &str, start: usize) -> Chunk {
        Chunk::new(
            doc_id.to_string(),
            text.to_string(),
            start,
            start + text.len(),
            self.header_path(headers, start),
        )
    }

    /// Markdown headings (`#` through `######`) with byte positions.
    fn extract_headers(&self, text: &str) -> Vec<Header> {
        let mut headers = Vec::new();
        let mut position = 0;

        for line in text.split('\n') {
            let hashes = line.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&hashes) {
                let title = line[hashes..].trim();
                if !title.is_empty() {
                    headers.push(Header {
                        level: hashes,
                        title: title.to_string(),
                        position,
                    });
                }
            }
            position += line.len() + 1;
        }

        headers
    }

    /// Heading titles from H1 down to the section enclosing `position`.
    fn header_path(&self, headers: &[Header], position: usize) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();
        let mut levels: Vec<usize> = Vec::new();

        for header in headers.iter().filter(|h| h.position < position) {
            while levels.last().is_some_and(|l| *l >= header.level) {
                levels.pop();
                path.pop();
            }
            levels.push(header.level);
            path.push(header.title.clone());
        }

        path
    }

    /// Non-empty paragraphs with their byte offsets.
    fn paragraphs<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let mut out = Vec::new();
        let mut position = 0;

        for part in text.split("\n\n") {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                let lead = part.len() - part.trim_start().len();
                out.push((position + lead, trimmed));
            }
            position += part.len() + 2;
        }

        out
    }
}

/// Last `want` bytes of `s`, nudged forward to a UTF-8 boundary.
fn overlap_tail(s: &str, want: usize) -> &str {
    if s.len() <= want {
        return s;
    }
    let mut idx = s.len() - want;
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    &s[idx..]
}
