//! Value encoders
//!
//! Pure transformations applied to field values before indexing or
//! comparison: whitespace and case normalization, punctuation stripping,
//! digit extraction, URL/email domain extraction, word sorting, reversal
//! and double-metaphone phonetic coding. Every encoder maps empty or
//! blank input to the missing sentinel (`None` / an empty code list).

use std::sync::{Arc, OnceLock};

use regex::Regex;
use rphonetic::{DoubleMetaphone, Encoder as PhoneticEncoder};

/// A single-valued encoder.
pub type EncoderFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn nonblank(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normspace(text: &str) -> Option<String> {
    nonblank(text).map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Strip all whitespace.
pub fn nospace(text: &str) -> Option<String> {
    nonblank(text).map(|t| t.split_whitespace().collect::<Vec<_>>().concat())
}

/// Lowercase and collapse whitespace.
pub fn lowstrip(text: &str) -> Option<String> {
    normspace(&text.to_lowercase())
}

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn alnumsp(text: &str) -> Option<String> {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^\w]+").unwrap());
    normspace(&re.replace_all(&text.to_lowercase(), " "))
}

/// Keep only the digits (for phone numbers).
pub fn digits(text: &str) -> Option<String> {
    let only: String = text.chars().filter(char::is_ascii_digit).collect();
    if only.is_empty() {
        None
    } else {
        Some(only)
    }
}

/// Sort the words of the text.
pub fn sorted_words(text: &str) -> Option<String> {
    nonblank(text).map(|t| {
        let mut words: Vec<&str> = t.split_whitespace().collect();
        words.sort_unstable();
        words.join(" ")
    })
}

/// Reverse the text.
pub fn reverse(text: &str) -> Option<String> {
    nonblank(text).map(|t| t.chars().rev().collect())
}

/// Extract the domain from a URL; text without a recognizable domain is
/// returned unchanged.
pub fn urldomain(text: &str) -> Option<String> {
    static URL: OnceLock<Regex> = OnceLock::new();
    let re = URL.get_or_init(|| Regex::new(r"^(?:https?://)?(?:www\.)?([^/]+)(?:/.*)?$").unwrap());
    let text = nonblank(text)?;
    match re.captures(text) {
        Some(caps) => Some(caps[1].to_string()),
        None => Some(text.to_string()),
    }
}

/// Extract the domain from an email address; text without an `@` is
/// returned unchanged.
pub fn emaildomain(text: &str) -> Option<String> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| Regex::new(r"^[^@]+@(.+)$").unwrap());
    let text = nonblank(text)?;
    match re.captures(text) {
        Some(caps) => Some(caps[1].to_string()),
        None => Some(text.to_string()),
    }
}

/// Double-metaphone phonetic codes: the primary code plus the alternate
/// when it differs. Returns up to two codes, none for blank input, which
/// makes this directly usable as a multi-key index function.
pub fn double_metaphone(text: &str) -> Vec<String> {
    static DM: OnceLock<DoubleMetaphone> = OnceLock::new();
    let Some(text) = nonblank(text) else {
        return Vec::new();
    };
    let dm = DM.get_or_init(DoubleMetaphone::default);
    let primary = dm.encode(text);
    let alternate = dm.encode_alternate(text);
    let mut codes = Vec::new();
    if !primary.is_empty() {
        codes.push(primary);
    }
    if !alternate.is_empty() && codes.first() != Some(&alternate) {
        codes.push(alternate);
    }
    codes
}

/// Wrap a plain function as a shareable [`EncoderFn`].
pub fn encoder(f: fn(&str) -> Option<String>) -> EncoderFn {
    Arc::new(f)
}

/// Right-to-left composition: `compose([f, g, h])` applies `h` first.
/// A `None` from any stage short-circuits to missing.
pub fn compose(encoders: Vec<EncoderFn>) -> EncoderFn {
    Arc::new(move |text: &str| {
        let mut value = text.to_string();
        for enc in encoders.iter().rev() {
            value = enc(&value)?;
        }
        Some(value)
    })
}

/// Alias normalizer
///
/// Replaces known alternate spellings by their primary form, e.g. every
/// word-bounded `str` or `st` becomes `street`. Each primary form's
/// alternates compile into one case-insensitive word-boundary regex.
/// A primary form of `""` deletes its alternates outright.
pub struct Normalizer {
    rules: Vec<(String, Regex)>,
}

impl Normalizer {
    /// Build from `(primary, alternates)` pairs.
    pub fn new(aliases: &[(&str, &[&str])]) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(aliases.len());
        for (primary, alternates) in aliases {
            let pattern = format!(r"(?i)\b(?:{})\b", alternates.join("|"));
            rules.push((primary.to_string(), Regex::new(&pattern)?));
        }
        Ok(Normalizer { rules })
    }

    /// Rewrite aliases in `text` to their primary forms.
    pub fn normalize(&self, text: &str) -> Option<String> {
        let mut text = nonblank(text)?.to_string();
        for (primary, regex) in &self.rules {
            text = regex.replace_all(&text, primary.as_str()).into_owned();
        }
        normspace(&text)
    }

    /// View this normalizer as an [`EncoderFn`].
    pub fn into_encoder(self) -> EncoderFn {
        Arc::new(move |text: &str| self.normalize(text))
    }
}
