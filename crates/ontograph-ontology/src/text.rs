//! Token helpers shared between document composition and the hybrid index.
//!
//! Retrieval quality depends on the index and the document composer
//! agreeing on normalization, so both sides use exactly these functions.

/// Splits a camelCase or PascalCase identifier into lowercase words.
///
/// `playsFor` → `["plays", "for"]`, `IOPort2` → `["io", "port", "2"]`.
pub fn split_camel_case(identifier: &str) -> Vec<String> {
    let chars: Vec<char> = identifier.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let boundary = if current.is_empty() {
            false
        } else if c.is_uppercase() {
            let prev = chars[i - 1];
            // aB boundary, or the end of an acronym run: "IOPort" → IO | Port
            prev.is_lowercase()
                || prev.is_numeric()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase())
        } else if c.is_numeric() {
            !chars[i - 1].is_numeric()
        } else {
            chars[i - 1].is_numeric()
        };
        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Lowercases, splits on non-alphanumerics, and expands camelCase runs.
/// Keeps everything, stopwords included; bigram generation wants the full
/// stream so `playsFor` still yields `plays_for`.
pub fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if raw.is_empty() {
            continue;
        }
        out.extend(split_camel_case(raw));
    }
    out
}

/// [`words`] minus stopwords and single characters - the unigram stream
/// both the index and the document composer score on.
pub fn tokenize(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.len() > 1 && !is_stopword(w))
        .collect()
}

/// Adjacent-pair bigrams over a token stream, joined with `_`.
pub fn bigrams(tokens: &[String]) -> Vec<String> {
    tokens
        .windows(2)
        .map(|pair| format!("{}_{}", pair[0], pair[1]))
        .collect()
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "what", "when", "where", "which", "who", "whom", "whose", "why", "how", "this", "that",
    "these", "those", "it", "its", "and", "or", "but", "if", "then", "than", "so", "as", "for",
    "with", "about", "to", "from", "in", "on", "at", "by", "of", "up", "out", "into", "onto",
];
