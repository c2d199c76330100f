use sha2::{Digest, Sha256};

/// SHA-256 over a body that arrives in chunks, rendered as lowercase hex.
#[derive(Default)]
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_chunks(chunks: &[&[u8]]) -> String {
        let mut hasher = StreamingHasher::default();
        for chunk in chunks {
            hasher.update(chunk);
        }
        hasher.finish()
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(hash_chunks(&[]), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(hash_chunks(&[b"hello"]), "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }

    #[test]
    fn test_chunking_does_not_change_digest() {
        assert_eq!(hash_chunks(&[b"hello ", b"world"]), hash_chunks(&[b"hello world"]));
        assert_eq!(hash_chunks(&[b"hello world"]), "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }
}
