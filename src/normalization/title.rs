use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use strsim::{jaro_winkler, normalized_levenshtein};

/// Default minimum similarity for two normalized titles to be treated as the same game.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.90;
/// Default gap the best candidate must keep over the runner-up.
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.04;

/// Trailing tokens that describe where a copy runs rather than what it is.
const PLATFORM_TAGS: &[&str] = &[
    "pc", "windows", "win", "win64", "mac", "macos", "osx", "linux", "steam", "x64", "x86",
];

/// Single-word trailing qualifiers that do not change identity.
const EDITION_WORDS: &[&str] = &[
    "deluxe", "goty", "definitive", "complete", "gold", "ultimate", "premium", "standard",
];

/// Single letters that read as numerals only in context ("Mega Man X", "Malcolm X").
/// They stay letters in the key but still count towards the numeric signature.
const AMBIGUOUS_ROMAN: &[(&str, &str)] = &[("v", "5"), ("x", "10")];

const ROMAN: &[(&str, &str)] = &[
    ("ii", "2"),
    ("iii", "3"),
    ("iv", "4"),
    ("vi", "6"),
    ("vii", "7"),
    ("viii", "8"),
    ("ix", "9"),
    ("xi", "11"),
    ("xii", "12"),
    ("xiii", "13"),
    ("xiv", "14"),
    ("xv", "15"),
    ("xvi", "16"),
];

/// Canonicalized title key used for fuzzy comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleKey {
    normalized: String,
    numeric_sig: Vec<String>,
}

impl TitleKey {
    /// Build a comparison key from a raw store title.
    ///
    /// Normalization steps:
    /// - lowercase, drop trademark symbols and apostrophes
    /// - drop bracketed tags (`[PC]`), keep parenthesised text (`(2016)`) as plain tokens
    /// - replace punctuation with whitespace, collapse runs
    /// - rewrite standalone roman numerals to digits so "II" == "2" ("V" and "X" stay letters)
    /// - strip trailing edition suffixes ("Deluxe Edition", "Game of the Year") and platform tags
    /// - record the numeric signature so sequels stay apart
    pub fn new(raw: &str) -> Self {
        Self::with_normalized(normalize_title(raw))
    }

    /// Rebuild a key from an already-normalized string (e.g. a stored match key).
    pub fn from_normalized(normalized: &str) -> Self {
        Self::with_normalized(normalized.trim().to_string())
    }

    fn with_normalized(normalized: String) -> Self {
        let mut numeric_sig: Vec<String> = normalized
            .split(' ')
            .filter_map(|t| {
                AMBIGUOUS_ROMAN
                    .iter()
                    .find(|(roman, _)| *roman == t)
                    .map(|(_, digit)| *digit)
                    .or_else(|| (!t.is_empty() && t.chars().all(|c| c.is_ascii_digit())).then_some(t))
            })
            .map(|t| t.trim_start_matches('0').to_string())
            .collect();
        numeric_sig.sort();
        Self {
            normalized,
            numeric_sig,
        }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn numeric_signature(&self) -> &[String] {
        &self.numeric_sig
    }

    /// Whether the numeric signatures agree (both empty or equal).
    /// "Dark Souls" (none), "Dark Souls II" (2) and "Dark Souls III" (3) are pairwise incompatible.
    pub fn numeric_compatible(&self, other: &Self) -> bool {
        self.numeric_sig == other.numeric_sig
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Case-folded, suffix-stripped comparison form of a title.
pub fn normalize_title(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    let mut bracket_depth = 0usize;
    for c in lowered.chars() {
        match c {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            _ if bracket_depth > 0 => {}
            '™' | '®' | '©' | '\'' | '’' | '`' => {}
            '&' => cleaned.push_str(" and "),
            c if c.is_alphanumeric() => cleaned.push(c),
            _ => cleaned.push(' '),
        }
    }

    let mut tokens: Vec<&str> = cleaned
        .split_whitespace()
        .map(|t| {
            ROMAN
                .iter()
                .find(|(roman, _)| *roman == t)
                .map(|(_, digit)| *digit)
                .unwrap_or(t)
        })
        .collect();

    strip_trailing_noise(&mut tokens);
    tokens.join(" ")
}

fn strip_trailing_noise(tokens: &mut Vec<&str>) {
    const GOTY_PHRASE: [&str; 4] = ["game", "of", "the", "year"];
    loop {
        if tokens.len() <= 1 {
            return;
        }
        let last = tokens[tokens.len() - 1];
        if PLATFORM_TAGS.contains(&last) || EDITION_WORDS.contains(&last) {
            tokens.pop();
            continue;
        }
        if tokens.len() > GOTY_PHRASE.len() && tokens.ends_with(&GOTY_PHRASE) {
            tokens.truncate(tokens.len() - GOTY_PHRASE.len());
            continue;
        }
        if tokens.len() > 2 && tokens.ends_with(&["directors", "cut"]) {
            tokens.truncate(tokens.len() - 2);
            continue;
        }
        if last == "edition" {
            tokens.pop();
            // "<qualifier> edition": the qualifier goes too, unless it ends a GOTY
            // phrase that the next iteration removes as a whole.
            let year_phrase = tokens.len() > GOTY_PHRASE.len() && tokens.ends_with(&GOTY_PHRASE);
            if !year_phrase && tokens.len() > 1 {
                tokens.pop();
            }
            continue;
        }
        return;
    }
}

/// Display form of a store title: trimmed, trademark symbols removed, whitespace collapsed.
pub fn display_title(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '™' | '®' | '©'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title similarity in `[0, 1]` between two already-normalized titles.
pub trait TitleSimilarity: Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Levenshtein ratio over alphabetically sorted tokens, so word order does not matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSortRatio;

impl TitleSimilarity for TokenSortRatio {
    fn name(&self) -> &'static str {
        "token_sort"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
    }
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Jaro-Winkler similarity, favouring shared prefixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinkler;

impl TitleSimilarity for JaroWinkler {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        jaro_winkler(a, b)
    }
}

/// Configurable choice of similarity algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimilarityKind {
    #[default]
    TokenSort,
    JaroWinkler,
}

impl SimilarityKind {
    pub fn build(self) -> Arc<dyn TitleSimilarity> {
        match self {
            SimilarityKind::TokenSort => Arc::new(TokenSortRatio),
            SimilarityKind::JaroWinkler => Arc::new(JaroWinkler),
        }
    }
}

impl FromStr for SimilarityKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "token_sort" | "levenshtein" => Ok(SimilarityKind::TokenSort),
            "jaro_winkler" | "jaro" => Ok(SimilarityKind::JaroWinkler),
            other => Err(anyhow!("unknown similarity algorithm {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_parentheses() {
        assert_eq!(normalize_title("DOOM (2016)"), "doom 2016");
        assert_eq!(normalize_title("Doom 2016"), "doom 2016");
        assert_eq!(
            normalize_title("The Witcher® 3: Wild Hunt"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(normalize_title("Assassin’s Creed"), "assassins creed");
    }

    #[test]
    fn strips_edition_suffixes() {
        assert_eq!(
            normalize_title("The Witcher 3: Wild Hunt - Game of the Year Edition"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(normalize_title("Hollow Knight: Voidheart Edition"), "hollow knight");
        assert_eq!(normalize_title("DOOM Eternal Deluxe Edition"), "doom eternal");
        assert_eq!(normalize_title("Fallout 4 GOTY"), "fallout 4");
        assert_eq!(normalize_title("Deus Ex: Human Revolution - Director's Cut"), "deus ex human revolution");
        // A lone word is never stripped away entirely.
        assert_eq!(normalize_title("Edition"), "edition");
    }

    #[test]
    fn strips_platform_tags() {
        assert_eq!(normalize_title("Celeste [PC]"), "celeste");
        assert_eq!(normalize_title("Celeste (Windows)"), "celeste");
        assert_eq!(normalize_title("Hades - PC"), "hades");
    }

    #[test]
    fn rewrites_roman_numerals() {
        assert_eq!(normalize_title("Dark Souls III"), "dark souls 3");
        assert_eq!(normalize_title("Final Fantasy VII"), "final fantasy 7");
        assert_eq!(normalize_title("Grand Theft Auto V"), "grand theft auto v");
        assert_eq!(normalize_title("Mega Man X"), "mega man x");
    }

    #[test]
    fn single_letter_numerals_still_separate_sequels() {
        assert_eq!(TitleKey::new("Grand Theft Auto V").numeric_signature(), ["5"]);
        assert!(TitleKey::new("Grand Theft Auto V").numeric_compatible(&TitleKey::new("Grand Theft Auto 5")));
        assert!(!TitleKey::new("Grand Theft Auto V").numeric_compatible(&TitleKey::new("Grand Theft Auto IV")));
        assert!(!TitleKey::new("Mega Man X").numeric_compatible(&TitleKey::new("Mega Man")));
        assert_ne!(TitleKey::new("Mega Man X").normalized(), TitleKey::new("Mega Man 10").normalized());
    }

    #[test]
    fn numeric_signature_keeps_sequels_apart() {
        let one = TitleKey::new("Dark Souls");
        let two = TitleKey::new("Dark Souls II");
        let three = TitleKey::new("Dark Souls III");
        assert!(!three.numeric_compatible(&two));
        assert!(!three.numeric_compatible(&one));
        assert!(!one.numeric_compatible(&two));
        assert!(TitleKey::new("Dark Souls 2").numeric_compatible(&two));
        assert!(TitleKey::new("DOOM (2016)").numeric_compatible(&TitleKey::new("Doom 2016")));
    }

    #[test]
    fn token_sort_ignores_word_order() {
        let sim = TokenSortRatio;
        assert_eq!(sim.score("wild hunt witcher", "witcher wild hunt"), 1.0);
        assert!(sim.score("hollow knight", "hollow night") > 0.9);
        assert!(sim.score("celeste", "portal") < 0.5);
    }

    #[test]
    fn similarity_kind_parses_names() {
        assert_eq!("token-sort".parse::<SimilarityKind>().unwrap(), SimilarityKind::TokenSort);
        assert_eq!("Jaro_Winkler".parse::<SimilarityKind>().unwrap(), SimilarityKind::JaroWinkler);
        assert!("soundex".parse::<SimilarityKind>().is_err());
        assert_eq!(SimilarityKind::JaroWinkler.build().name(), "jaro_winkler");
    }

    #[test]
    fn display_title_collapses_whitespace() {
        assert_eq!(display_title("  Portal™   2 "), "Portal 2");
    }
}
