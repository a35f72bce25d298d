//! Prompt assembly under a token budget.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tiktoken_rs::CoreBPE;

use crate::models::SourceDocument;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("cl100k_base tokenizer unavailable, estimating tokens: {}", e);
        None
    }
});

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(context|question)\}").unwrap());

/// Token count under `cl100k_base`, or a 4-chars-per-token estimate.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

pub const DEFAULT_TEMPLATE: &str = "You are a helpful assistant analyzing customer support feedback.

Based on the context below, identify recurring issues, themes, or complaints, even if they are indirectly stated or mentioned only once. Focus on extracting useful insights for product or support improvement.

If context is unclear or incomplete, make an educated guess based on tone and wording.

Context:
{context}

Question: {question}
Answer:";

const SOURCE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    /// Leading sources that made it into the prompt.
    pub sources_used: usize,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
    max_tokens: usize,
}

impl PromptBuilder {
    pub fn new(max_tokens: usize) -> Self {
        Self::with_template(DEFAULT_TEMPLATE, max_tokens)
    }

    /// `template` must contain `{context}` and `{question}`.
    pub fn with_template(template: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            template: template.into(),
            max_tokens,
        }
    }

    /// Single pass over the template; placeholder-like text inside a source
    /// or the question is left as is.
    fn render(&self, context: &str, question: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "context" => context.to_string(),
                _ => question.to_string(),
            })
            .into_owned()
    }

    /// Fills the template with as many sources as fit, dropping the
    /// last-ranked ones first. The question is never shortened.
    pub fn assemble(&self, question: &str, sources: &[SourceDocument]) -> AssembledPrompt {
        let base_tokens = count_tokens(&self.render("", question));
        let separator_tokens = count_tokens(SOURCE_SEPARATOR);

        let mut used = 0;
        let mut budget_left = self.max_tokens.saturating_sub(base_tokens);
        for (i, source) in sources.iter().enumerate() {
            let cost = count_tokens(&source.text) + if i > 0 { separator_tokens } else { 0 };
            if cost > budget_left {
                break;
            }
            budget_left -= cost;
            used += 1;
        }

        let context = sources[..used]
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SOURCE_SEPARATOR);
        let text = self.render(&context, question);
        let tokens = count_tokens(&text);

        if used < sources.len() {
            tracing::debug!(
                "Prompt budget {} tokens: kept {} of {} sources",
                self.max_tokens,
                used,
                sources.len()
            );
        }

        AssembledPrompt {
            text,
            sources_used: used,
            tokens,
        }
    }
}
