//! Prompt assembly for grounded answering

use crate::types::response::QuerySource;

/// Marker prefixing degraded answers when the LLM is unreachable.
pub const FALLBACK_MARKER: &str = "[LLM unavailable]";

const SYSTEM_PREAMBLE: &str = "\
You are a knowledge-base assistant. Answer using ONLY the passages below.
Rules:
1. Use only information explicitly stated in the passages.
2. If the passages do not contain the answer, say the knowledge base has no \
relevant information.
3. Cite supporting passages inline using their [document_id:chunk_index] tags.
4. Do not use outside knowledge or make assumptions beyond the passages.";

/// Prompt builder for the retrieval path
pub struct PromptBuilder;

impl PromptBuilder {
    /// Each candidate is annotated with its `[document_id:chunk_index]` tag.
    pub fn build_context(candidates: &[(QuerySource, String)]) -> String {
        candidates
            .iter()
            .map(|(source, content)| {
                format!(
                    "[{}:{}] {}",
                    source.document_id, source.chunk_index, content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_prompt(question: &str, context: &str) -> String {
        format!(
            "{SYSTEM_PREAMBLE}\n\nPASSAGES:\n{context}\n\nQUESTION: {question}\n\nANSWER:"
        )
    }

    /// Degraded answer when the LLM cannot be reached: an explicit fallback
    /// note plus the best retrieved passage so the caller still sees evidence.
    pub fn build_fallback_answer(reason: &str, candidates: &[(QuerySource, String)]) -> String {
        let snippet = candidates
            .first()
            .map(|(_, content)| {
                let truncated: String = content.chars().take(400).collect();
                format!("\n\nTop retrieved passage:\n{truncated}")
            })
            .unwrap_or_default();
        format!("{FALLBACK_MARKER} {reason}. Retrieved passages are attached as sources.{snippet}")
    }
}
