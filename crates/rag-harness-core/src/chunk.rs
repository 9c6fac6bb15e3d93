//! Fixed-size word-window chunker.
//!
//! Splits text on whitespace and joins consecutive windows of
//! `chunk_size` words with single spaces. No overlap and no semantic
//! boundary detection: for `W` words the result always has
//! `ceil(W / chunk_size)` chunks.

/// Default window size in words.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Split `text` into chunks of at most `chunk_size` words.
///
/// Returns an empty vector for text with no words. A `chunk_size` of zero
/// is treated as one word per chunk.
pub fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let size = chunk_size.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words.chunks(size).map(|window| window.join(" ")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        assert!(split_into_chunks("", 500).is_empty());
        assert!(split_into_chunks("   \n\t ", 500).is_empty());
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        for (w, c, expected) in [(1200, 500, 3), (1000, 500, 2), (1, 500, 1), (7, 3, 3)] {
            let chunks = split_into_chunks(&words(w), c);
            assert_eq!(chunks.len(), expected, "W={} C={}", w, c);
        }
    }

    #[test]
    fn test_concatenation_reproduces_normalized_text() {
        let text = "alpha  beta\n\ngamma\tdelta   epsilon";
        let chunks = split_into_chunks(text, 2);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
        assert_eq!(chunks.join(" "), "alpha beta gamma delta epsilon");
    }

    #[test]
    fn test_zero_chunk_size() {
        let chunks = split_into_chunks("a b", 0);
        assert_eq!(chunks.len(), 2);
    }
}
