use crate::models::RetrievedChunk;

/// Attributed grounding text, one block per chunk in retrieval order.
/// Repeated sources stay as separate blocks.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for chunk in chunks {
        context.push_str(&format!(
            "According to \"{}\" (Page {}):\n{}\n\n",
            chunk.source, chunk.page, chunk.text
        ));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::build_context;
    use crate::models::RetrievedChunk;

    fn hit(source: &str, page: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            score: 0.5,
            uid: 1,
            source: source.to_string(),
            page,
            text: text.to_string(),
        }
    }

    #[test]
    fn single_chunk_block_is_exact() {
        let context = build_context(&[hit("doc.pdf", 1, "Visa application fee is 500 rupees")]);
        assert_eq!(
            context,
            "According to \"doc.pdf\" (Page 1):\nVisa application fee is 500 rupees\n\n"
        );
    }

    #[test]
    fn blocks_keep_order_and_duplicates() {
        let context = build_context(&[
            hit("b.pdf", 2, "second"),
            hit("a.pdf", 1, "first"),
            hit("b.pdf", 5, "again"),
        ]);
        assert_eq!(
            context,
            "According to \"b.pdf\" (Page 2):\nsecond\n\n\
             According to \"a.pdf\" (Page 1):\nfirst\n\n\
             According to \"b.pdf\" (Page 5):\nagain\n\n"
        );
    }

    #[test]
    fn empty_retrieval_gives_empty_context() {
        assert!(build_context(&[]).is_empty());
    }
}
