//! Lexical query construction: tokenization, stop-word removal, OR queries.

/// English function words dropped from lexical queries.
const STOP_WORDS_EN: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
    "has", "have", "he", "her", "here", "him", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "just", "like", "me", "more", "most", "my", "no", "not", "now", "of", "on", "one",
    "only", "or", "other", "our", "out", "over", "she", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "to", "under", "up", "us",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "why", "will",
    "with", "would", "you", "your",
];

/// Korean particles and function words dropped from lexical queries.
const STOP_WORDS_KO: &[&str] = &[
    "이", "그", "저", "것", "수", "들", "및", "에서", "에게", "으로", "로", "를", "을", "은",
    "는", "가", "의", "와", "과", "도", "에", "하다", "있다", "없다", "되다", "같다", "보다",
    "한", "할", "함", "해", "또", "또는", "그리고", "하지만", "그러나",
];

/// A built lexical query: an OR expression over the surviving tokens, or the
/// raw input when every token was filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexicalQuery {
    Or(String),
    Raw(String),
}

impl LexicalQuery {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Or(s) | Self::Raw(s) => s,
        }
    }
}

/// Build the lexical query for `text`: tokenize, drop stop words, join the
/// rest with the OR operator. Falls back to the raw input when nothing
/// survives, so a query of pure stop words still matches something.
#[must_use]
pub fn build_query(text: &str) -> LexicalQuery {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        LexicalQuery::Raw(text.to_owned())
    } else {
        LexicalQuery::Or(tokens.join(" | "))
    }
}

/// Lowercased search tokens: split on non-alphanumeric characters, drop stop
/// words and single-character tokens (CJK characters carry enough meaning on
/// their own and are kept).
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    raw_tokens(text)
        .into_iter()
        .filter(|t| keep_token(t))
        .collect()
}

/// Lowercased tokens with no stop-word filtering. Used for raw-query
/// matching, where stop words are significant.
pub(crate) fn raw_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn keep_token(token: &str) -> bool {
    if STOP_WORDS_EN.contains(&token) || STOP_WORDS_KO.contains(&token) {
        return false;
    }
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(first), None) => is_cjk(first),
        _ => true,
    }
}

fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{3040}'..='\u{30FF}'        // hiragana, katakana
            | '\u{3400}'..='\u{4DBF}'  // CJK extension A
            | '\u{4E00}'..='\u{9FFF}'  // CJK unified
            | '\u{AC00}'..='\u{D7AF}'  // hangul syllables
            | '\u{F900}'..='\u{FAFF}'  // CJK compatibility
    )
}
