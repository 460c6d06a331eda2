//! Retrieval-augmented responder: rewrite, search, prompt, generate, guard.
//!
//! [`Responder::respond`] never fails. Retrieval and generation failures turn into a
//! fixed apology, an empty context turns into a fixed "nothing found" reply, and every
//! generated answer passes through [`guard`] before it leaves this module.

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::config::ResponderConfig;
use crate::llm::{self, LlmBackend, ModelProfile};
use crate::store::{ContextPassage, ContextStore};

pub const RETRIEVAL_APOLOGY: &str =
    "I'm sorry, I'm having trouble retrieving the context. Please try again later.";
pub const NOTHING_FOUND: &str = "I couldn't find any relevant data on that.";

const DEFAULT_TOP_K: usize = 8;

const REWRITE_PROMPT: &str = "Given the prompt, determine what kind of data (notes, messages, contacts, and maps) would be most helpful to answer it. Answer in 1 sentence. DO NOT mention RAG, querying, or a vector store.\n\nPrompt: ";

const PERSONA_PROMPT: &str = "You are the user's close friend who happens to know their notes, messages, contacts and places. \
Answer casually, like a text message between friends. \
Use only the information below. Never mention where the information came from, never mention context, documents, searching or retrieval, and never apologize. \
If nothing below is relevant, just say you cannot find relevant data. \
Censor sensitive information such as passwords, API keys and account numbers. \
Condense duplicate information. \
Keep the answer to LESS THAN {max_words} words.";

pub struct Responder {
    backend: Arc<dyn LlmBackend>,
    store: Arc<dyn ContextStore>,
    creative: ModelProfile,
    fast: ModelProfile,
    top_k: usize,
    config: ResponderConfig,
}

impl Responder {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        store: Arc<dyn ContextStore>,
        creative: ModelProfile,
        fast: ModelProfile,
        config: ResponderConfig,
    ) -> Self {
        Self {
            backend,
            store,
            creative,
            fast,
            top_k: DEFAULT_TOP_K,
            config,
        }
    }

    /// Passages to retrieve per query (callers pass the clamped config value).
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    pub async fn respond(&self, query: &str) -> String {
        let search_query = match self.rewrite(query).await {
            Some(hint) => format!("{} {}", query.trim(), hint),
            None => query.trim().to_string(),
        };

        let passages = match self.store.similarity_search(&search_query, self.top_k).await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("responder: retrieval failed: {}", e);
                return RETRIEVAL_APOLOGY.to_string();
            }
        };
        log::debug!("responder: {} passages for query", passages.len());

        let context = context_block(&passages);
        if context.trim().is_empty() {
            return NOTHING_FOUND.to_string();
        }

        let system = PERSONA_PROMPT.replace("{max_words}", &self.config.max_words.to_string());
        let prompt = format!("Information:\n{}\nQuestion: {}", context, query.trim());
        match llm::complete(self.backend.as_ref(), &self.creative, Some(&system), &prompt).await {
            Ok(answer) => {
                let guarded = guard(&answer, &self.config.banned_phrases, self.config.max_words);
                if guarded.is_empty() {
                    NOTHING_FOUND.to_string()
                } else {
                    guarded
                }
            }
            Err(e) => {
                log::warn!("responder: generation failed: {}", e);
                RETRIEVAL_APOLOGY.to_string()
            }
        }
    }

    /// One-sentence data-kind hint from the fast model. `None` when disabled or failed.
    async fn rewrite(&self, query: &str) -> Option<String> {
        if !self.config.rewrite_query {
            return None;
        }
        let prompt = format!("{}{}", REWRITE_PROMPT, query.trim());
        match llm::complete(self.backend.as_ref(), &self.fast, None, &prompt).await {
            Ok(hint) => {
                let hint = hint.trim().to_string();
                if hint.is_empty() {
                    None
                } else {
                    Some(hint)
                }
            }
            Err(e) => {
                log::warn!("responder: query rewrite failed, searching with original: {}", e);
                None
            }
        }
    }
}

fn is_internal_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k == "id" || k.ends_with("_id")
}

/// `Content: …` / `Content metadata: {…}` per passage, without identifier keys.
pub fn context_block(passages: &[ContextPassage]) -> String {
    let mut out = String::new();
    for p in passages {
        if p.content.trim().is_empty() {
            continue;
        }
        let meta: Vec<String> = p
            .metadata
            .iter()
            .filter(|(k, _)| !is_internal_key(k))
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        out.push_str(&format!(
            "Content: {}\nContent metadata: {{{}}}\n\n",
            p.content.trim(),
            meta.join(", ")
        ));
    }
    out
}

/// Keyword, up to six words of lead-in ("password for the office wifi"), then a connector.
static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(passwords?|passcodes?|passphrases?|pwd?|pins?|codes?|api[ _-]?keys?|secrets?|tokens?)\b((?:\s+[^\s:=.!?]+){0,6}?\s*(?:\b(?:is|are|was)\b|[:=])\s*)([^\s,;]*[^\s,;.!?)])",
    )
    .expect("secret assignment regex must compile")
});

/// "password hunter22": a bare keyword followed by a token with a digit in it.
static SECRET_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(passwords?|passcodes?|passphrases?|pwd?)(\s+)([^\s,;.!?]*\d[^\s,;]*[^\s,;.!?)]|[^\s,;.!?]*\d)")
        .expect("bare secret regex must compile")
});

static SECRET_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:sk|pk|ghp|xox[abp])[-_][A-Za-z0-9_-]{12,}\b")
        .expect("secret literal regex must compile")
});

fn redact(text: &str) -> String {
    let text = SECRET_ASSIGNMENT.replace_all(text, "$1$2***");
    let text = SECRET_BARE.replace_all(&text, "$1$2***");
    SECRET_LITERAL.replace_all(&text, "***").into_owned()
}

/// Sentences end at `.`, `!` or `?` followed by whitespace, or at a newline.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = i + c.len_utf8();
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(true),
            _ => false,
        };
        if boundary {
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Whole-word, case-insensitive: "RAG" must not match "storage".
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(i, m)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn drop_banned(text: &str, banned: &[String]) -> String {
    let banned: Vec<String> = banned
        .iter()
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .collect();
    sentences(text)
        .into_iter()
        .filter(|s| {
            let lower = s.to_lowercase();
            !banned.iter().any(|b| contains_phrase(&lower, b))
        })
        .collect()
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let Some(last) = words.by_ref().take(max_words).last() else {
        return String::new();
    };
    if words.next().is_none() {
        return text.to_string();
    }
    let end = last.as_ptr() as usize - text.as_ptr() as usize + last.len();
    format!("{}…", &text[..end])
}

/// Post-generation guard: redact secrets, drop meta-commentary, enforce the word ceiling.
pub fn guard(answer: &str, banned: &[String], max_words: usize) -> String {
    let text = redact(answer.trim());
    let text = drop_banned(&text, banned);
    truncate_words(text.trim(), max_words).trim().to_string()
}
