//! Claim extraction from narrative text.
//!
//! Patterns run over an ASCII-lowercased copy of each sentence so byte
//! offsets line up with the original. Every match masks its span before the
//! next pattern runs, so a date is never re-read as three numbers.

use crate::facts::FactIndex;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use veritas_core::ClaimKind;

// ============================================================================
// PATTERNS
// ============================================================================

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b|\b(\d{1,2})/(\d{1,2})/(\d{4})\b")
        .expect("Invalid date regex")
});

static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:day|row)\s+#?(\d+)\b").expect("Invalid ordinal regex"));

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<cur>[$€£])?
        (?P<sign>[+-])?
        (?P<cur2>[$€£])?
        (?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+)
        (?P<suffix>\s*(?:%|percentage\ points?\b|percent\b|x\b|×|times\b|bn\b|k\b|m\b|thousand\b|million\b|billion\b))?
        ",
    )
    .expect("Invalid number regex")
});

/// Nouns that make the preceding number a count of rows, days or findings.
static COUNT_NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s+(?:(?:complete|incomplete|anomalous|flagged|data|distinct)\s+)?(?:rows?|days?|records?|observations?|points?|entries|anomal(?:y|ies)|outliers?|periods?|kpis?|sources?)\b",
    )
    .expect("Invalid count regex")
});

/// Plain decimal numbers inside free text such as status messages.
pub static NUMBER_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("Invalid number regex"));

static CAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:caused by|due to|because of|driven by|attributed to|attributable to|as a result of|thanks to|resulting from|owing to|fuel?led by|triggered by)\b([^,.;:!?]*)",
    )
    .expect("Invalid cause regex")
});

static EXOGENOUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:weather|rain\w*|snow\w*|storms?|heat ?waves?|holidays?|christmas|black friday|competitors?|competition|campaigns?|marketing|promotions?|promotional|advertising|ads|discounts?|seasonality|seasonal|pandemic|covid|economy|economic|inflation|recession|strikes?|outages?|news|viral|influencers?|elections?|tariffs?|supply chain|shortages?|launch\w*)\b",
    )
    .expect("Invalid exogenous regex")
});

static LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[Ii]n|[Aa]t)\s+([A-Z][\w'&-]*(?:\s+(?:[A-Z][\w'&-]*|\d+))*)")
        .expect("Invalid location regex")
});

static METRIC_VOCAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:revenue|sales|profits?|margins?|orders|order volume|customers|users|visitors|sessions|conversions?|conversion rate|churn|retention|traffic|sign-?ups|clicks|impressions|bookings|subscriptions|refunds|returns|inventory|costs?|expenses|spend|aov|arpu|ltv|cac|roi|nps)\b",
    )
    .expect("Invalid metric regex")
});

static UP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:rose|rise[sn]?|rising|increased?|increases|increasing|grew|grow(?:s|n|th|ing)?|up|higher|jump(?:ed|s)?|spik(?:e|ed|es)|surg(?:e|ed|es)|climb(?:ed|s)?|gain(?:ed|s)?|soar(?:ed|s)?)\b",
    )
    .expect("Invalid direction regex")
});

static DOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:fell|fall(?:s|en|ing)?|decreased?|decreases|decreasing|declin(?:e|ed|es|ing)|drop(?:ped|s)?|down|lower|slump(?:ed|s)?|plung(?:e|ed|es)|shr[ai]nk|shrunk|dipped)\b",
    )
    .expect("Invalid direction regex")
});

static SPECULATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:may|might|could|likely|possibly|perhaps|probably|suggests?|appears?|seems?|presumably|potentially)\b",
    )
    .expect("Invalid speculative regex")
});

static ANOMALY_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:anomal\w*|spik\w*|outliers?|flagged|unusual\w*|abnormal\w*|surg\w*)\b")
        .expect("Invalid anomaly regex")
});

/// First words of capitalized phrases that are not places.
const NOT_LOCATIONS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "q1", "q2", "q3", "q4", "h1", "h2", "unknown", "the", "this", "that",
    "these", "those", "total", "summary", "short", "addition", "contrast", "particular",
    "general", "fact", "day", "row", "week", "month", "year", "period", "comparison",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "at", "to", "for", "and", "or", "its", "their", "this",
    "that", "these", "those", "some", "by", "with", "from", "higher", "lower", "more",
    "less", "increased", "decreased", "strong", "weak", "recent", "same", "other", "factors",
    "factor", "reasons", "reason",
];

// ============================================================================
// SENTENCES
// ============================================================================

/// Byte ranges of the sentences in `text`, trimmed of surrounding whitespace.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text, or at a line break. "1.5" does not end a sentence.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if !c.is_whitespace() {
                start = Some(i);
            } else {
                continue;
            }
        }
        let Some(s) = start else { continue };
        let end = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                None => Some(i + 1),
                Some((_, next)) if next.is_whitespace() => Some(i + 1),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = end {
            let trimmed = text[s..end].trim_end();
            if !trimmed.is_empty() {
                sentences.push(s..s + trimmed.len());
            }
            start = None;
        }
    }
    if let Some(s) = start {
        let trimmed = text[s..].trim_end();
        if !trimmed.is_empty() {
            sentences.push(s..s + trimmed.len());
        }
    }
    sentences
}

// ============================================================================
// EXTRACTED CLAIMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A claim located in a sentence, before verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub kind: ClaimKind,
    /// Span of the whole claim within the sentence
    pub span: Range<usize>,
    /// Span a correction replaces
    pub number_span: Option<Range<usize>>,
    pub value: Option<f64>,
    /// The number carried an explicit `+` or `-`
    pub signed: bool,
    /// Scale applied by a `k`/`m`/`bn` suffix
    pub scale: f64,
    /// Digits written after the decimal point
    pub decimals: u32,
    /// The number counts rows, days or anomalies rather than a metric
    pub counted: bool,
    pub date: Option<NaiveDate>,
    /// Causal object, exogenous term, place or metric word
    pub subject: Option<String>,
}

impl Extracted {
    fn new(kind: ClaimKind, span: Range<usize>) -> Self {
        Self {
            kind,
            span,
            number_span: None,
            value: None,
            signed: false,
            scale: 1.0,
            decimals: 0,
            counted: false,
            date: None,
            subject: None,
        }
    }
}

/// Everything found in one sentence.
#[derive(Debug, Clone, Default)]
pub struct SentenceScan {
    pub claims: Vec<Extracted>,
    pub directions: Vec<(usize, Direction)>,
    pub speculative: bool,
    pub mentions_anomaly: bool,
}

/// Scan one sentence for claims.
pub fn scan_sentence(sentence: &str, index: &FactIndex) -> SentenceScan {
    let lower = sentence.to_ascii_lowercase();
    let mut masked = lower.clone().into_bytes();
    let mut scan = SentenceScan {
        speculative: SPECULATIVE.is_match(&lower),
        mentions_anomaly: ANOMALY_WORDS.is_match(&lower),
        ..SentenceScan::default()
    };

    scan_dates(&lower, &mut masked, &mut scan.claims);
    scan_ordinals(&masked_str(&masked), &mut masked, &mut scan.claims);
    scan_numbers(&lower, &mut masked, &mut scan.claims);
    scan_causes(&masked_str(&masked), &mut masked, &mut scan.claims);

    for m in EXOGENOUS.find_iter(&masked_str(&masked)) {
        let mut claim = Extracted::new(ClaimKind::Cause, m.range());
        claim.subject = Some(m.as_str().to_string());
        scan.claims.push(claim);
        mask(&mut masked, m.range());
    }

    for caps in LOCATION.captures_iter(sentence) {
        let Some(phrase) = caps.get(1) else { continue };
        let range = phrase.range();
        if is_masked(&masked, &lower, &range) {
            continue;
        }
        let phrase_lower = phrase.as_str().to_ascii_lowercase();
        let first = phrase_lower.split_whitespace().next().unwrap_or_default();
        if NOT_LOCATIONS.contains(&first) || !index.metric_mentions(&phrase_lower).is_empty() {
            continue;
        }
        let mut claim = Extracted::new(ClaimKind::Location, range.clone());
        claim.subject = Some(phrase.as_str().to_string());
        scan.claims.push(claim);
        mask(&mut masked, range);
    }

    for mention in index.metric_mentions(&lower) {
        mask(&mut masked, mention.start..mention.end);
    }
    for m in METRIC_VOCAB.find_iter(&masked_str(&masked)) {
        let mut claim = Extracted::new(ClaimKind::Metric, m.range());
        claim.subject = Some(m.as_str().to_string());
        scan.claims.push(claim);
    }

    scan.directions = UP
        .find_iter(&lower)
        .map(|m| (m.start(), Direction::Up))
        .chain(DOWN.find_iter(&lower).map(|m| (m.start(), Direction::Down)))
        .collect();
    scan.directions.sort_by_key(|(pos, _)| *pos);
    scan.claims.sort_by_key(|c| c.span.start);
    scan
}

fn scan_dates(lower: &str, masked: &mut [u8], claims: &mut Vec<Extracted>) {
    for caps in DATE.captures_iter(lower) {
        let Some(whole) = caps.get(0) else { continue };
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = match (field(1), field(2), field(3)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m, d),
            _ => match (field(6), field(4), field(5)) {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m, d),
                _ => None,
            },
        };
        let mut claim = Extracted::new(ClaimKind::Date, whole.range());
        claim.date = date;
        claims.push(claim);
        mask(masked, whole.range());
    }
}

fn scan_ordinals(haystack: &str, masked: &mut [u8], claims: &mut Vec<Extracted>) {
    for caps in ORDINAL.captures_iter(haystack) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let mut claim = Extracted::new(ClaimKind::Ordinal, whole.range());
        claim.value = number.as_str().parse::<f64>().ok();
        claim.number_span = Some(number.range());
        claims.push(claim);
        mask(masked, whole.range());
    }
}

fn scan_numbers(lower: &str, masked: &mut [u8], claims: &mut Vec<Extracted>) {
    let haystack = masked_str(masked);
    for caps in NUMBER.captures_iter(&haystack) {
        let (Some(whole), Some(num)) = (caps.get(0), caps.name("num")) else {
            continue;
        };
        let sign = caps.name("sign");
        let before = lower[..whole.start()].chars().next_back();
        let after = lower[whole.end()..].chars().next();
        if before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
            || after.is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            continue;
        }
        let Ok(magnitude) = num.as_str().replace(',', "").parse::<f64>() else {
            continue;
        };
        let suffix = caps
            .name("suffix")
            .map(|s| s.as_str().trim().to_string())
            .unwrap_or_default();
        let currency = caps.name("cur").is_some() || caps.name("cur2").is_some();
        let negative = sign.is_some_and(|s| s.as_str() == "-");

        let (kind, scale) = match suffix.as_str() {
            "%" | "percent" | "percentage point" | "percentage points" => (ClaimKind::Percent, 1.0),
            "x" | "×" | "times" => (ClaimKind::Multiplier, 1.0),
            "k" | "thousand" => (ClaimKind::Amount, 1e3),
            "m" | "million" => (ClaimKind::Amount, 1e6),
            "bn" | "billion" => (ClaimKind::Amount, 1e9),
            _ => {
                let plain = num.as_str().len() == 4 && num.as_str().bytes().all(|b| b.is_ascii_digit());
                if plain && sign.is_none() && !currency && (1900.0..=2100.0).contains(&magnitude) {
                    (ClaimKind::Year, 1.0)
                } else {
                    (ClaimKind::Amount, 1.0)
                }
            }
        };

        let number_span = match (sign, caps.name("cur2")) {
            (Some(sign), None) if kind == ClaimKind::Percent => sign.start()..num.end(),
            _ => num.range(),
        };
        let mut claim = Extracted::new(kind, whole.range());
        claim.value = Some(if negative { -magnitude } else { magnitude });
        claim.signed = sign.is_some();
        claim.scale = scale;
        claim.decimals = decimal_places(num.as_str());
        claim.counted = kind == ClaimKind::Amount
            && scale == 1.0
            && !currency
            && COUNT_NOUN.is_match(&lower[whole.end()..]);
        claim.number_span = Some(number_span);
        claims.push(claim);
        mask(masked, whole.range());
    }
}

/// Digits after the first decimal point in `text`.
pub fn decimal_places(text: &str) -> u32 {
    text.split_once('.')
        .map_or(0, |(_, frac)| frac.bytes().take_while(u8::is_ascii_digit).count() as u32)
}

fn scan_causes(haystack: &str, masked: &mut [u8], claims: &mut Vec<Extracted>) {
    for caps in CAUSE.captures_iter(haystack) {
        let (Some(whole), Some(object)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let mut claim = Extracted::new(ClaimKind::Cause, whole.range());
        claim.subject = Some(object.as_str().trim().to_string());
        claims.push(claim);
        mask(masked, whole.range());
    }
}

/// Content words of a causal object, stopwords and numbers removed.
pub fn content_words(object: &str) -> Vec<&str> {
    object
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-'))
        .filter(|w| w.len() > 1 && !w.bytes().all(|b| b.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.to_ascii_lowercase().as_str()))
        .collect()
}

/// Exogenous-cause terms inside a causal object.
pub fn exogenous_terms(object: &str) -> Vec<&str> {
    EXOGENOUS.find_iter(object).map(|m| m.as_str()).collect()
}

fn mask(masked: &mut [u8], range: Range<usize>) {
    masked[range].iter_mut().for_each(|b| *b = b' ');
}

fn masked_str(masked: &[u8]) -> String {
    String::from_utf8_lossy(masked).into_owned()
}

fn is_masked(masked: &[u8], lower: &str, range: &Range<usize>) -> bool {
    masked[range.clone()] != lower.as_bytes()[range.clone()]
}

/// Whether a word refers to an anomaly or spike.
pub fn is_anomaly_word(word: &str) -> bool {
    ANOMALY_WORDS.is_match(word)
}
