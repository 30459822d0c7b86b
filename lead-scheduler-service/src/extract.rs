//! Deterministic text extraction: the fast, regex-based layer that runs
//! before (or instead of) the language-model collaborator.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+").expect("Invalid regex")
});

static NAME_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-zÀ-ÿ]+$").expect("Invalid regex"));

static YES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(sim|quero|claro|bora|vamos|pode|gostaria|agendar|marcar|aceito|ok|com certeza|por favor)\b",
    )
    .expect("Invalid regex")
});

static NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(não|nao|agora não|agora nao|depois|talvez|ainda não|ainda nao|obrigado mas|no momento)\b",
    )
    .expect("Invalid regex")
});

static SCHEDULING_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(agendar|marcar|remarcar|reunião|reuniao|consultoria)\b")
        .expect("Invalid regex")
});

static CANCEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cancelar|cancela|desmarcar|desistir)\b").expect("Invalid regex")
});

// Narrow date/time pattern used when the collaborator is unavailable:
// "18/02 às 14h", "17/02/2026 10", "5/3 as 9h"
static DATETIME_FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\s*(?:às?|as)?\s*(\d{1,2})h?")
        .expect("Invalid regex")
});

// A message that is nothing but a time of day: "15h", "às 15", "10:00"
static BARE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:às?\s+)?(\d{1,2})(?::(\d{2}))?\s*h?\s*$").expect("Invalid regex")
});

// Replies that look like words but are never names
const NAME_REJECT_PATTERNS: &[&str] = &[
    "não",
    "nao",
    "quero",
    "reuniao",
    "reunião",
    "consultoria",
    "agendar",
    "marcar",
    "depois",
    "talvez",
    "pode ser",
    "obrigado",
    "por favor",
    "claro",
    "sim",
    "ok",
];

/// Detects an email address anywhere in the text, lowercased
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_lowercase())
}

/// Detects a full name: 2-5 alphabetic words, no '?', '@' or digits, and
/// none of the common non-name replies.
pub fn extract_name(text: &str) -> Option<String> {
    let cleaned = text.trim().to_lowercase();

    if cleaned.contains('?') || cleaned.contains('@') || cleaned.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    if NAME_REJECT_PATTERNS.iter().any(|p| cleaned.contains(p)) {
        return None;
    }

    let words: Vec<&str> = text.trim().split_whitespace().collect();
    if (2..=5).contains(&words.len()) && words.iter().all(|w| NAME_WORD_RE.is_match(w)) {
        return Some(title_case(text.trim()));
    }
    None
}

/// Detects an interest/need description: at least 3 words and 15 characters,
/// and not an email message.
pub fn extract_interest(text: &str) -> Option<String> {
    let cleaned = text.trim();
    if cleaned.contains('@') {
        return None;
    }
    if cleaned.split_whitespace().count() < 3 {
        return None;
    }
    if cleaned.chars().count() >= 15 {
        return Some(cleaned.to_string());
    }
    None
}

/// Accept/decline keyword detection. `Some(true)` on a clean yes,
/// `Some(false)` on a clean no, `Some(false)` when both signals appear
/// (ambiguity resolves conservatively), `None` when neither does.
pub fn detect_yes_no(text: &str) -> Option<bool> {
    let has_yes = YES_RE.is_match(text);
    let has_no = NO_RE.is_match(text);

    match (has_yes, has_no) {
        (false, true) => Some(false),
        (true, false) => Some(true),
        (true, true) => Some(false),
        (false, false) => None,
    }
}

/// Keyword fallback for the scheduling-intent classification
pub fn has_scheduling_intent(text: &str) -> bool {
    SCHEDULING_INTENT_RE.is_match(text)
}

/// Explicit cancellation request embedded in free text
pub fn is_cancellation_request(text: &str) -> bool {
    CANCEL_RE.is_match(text)
}

/// Narrow deterministic date/time parse for collaborator failures.
/// A missing year defaults to `default_year`; two-digit years get 2000 added.
pub fn fallback_datetime(text: &str, default_year: i32) -> Option<NaiveDateTime> {
    let caps = DATETIME_FALLBACK_RE.captures(text)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = match caps.get(3) {
        Some(m) => {
            let raw: i32 = m.as_str().parse().ok()?;
            if raw < 100 { 2000 + raw } else { raw }
        }
        None => default_year,
    };
    let hour: u32 = caps.get(4)?.as_str().parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    Some(date.and_time(time))
}

/// A message consisting only of a time of day ("15h", "às 15", "10:00"),
/// used to resolve follow-ups against a previously requested date.
pub fn bare_time(text: &str) -> Option<NaiveTime> {
    let caps = BARE_TIME_RE.captures(text)?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_email() {
        assert_eq!(
            extract_email("meu email é Maria@Ex.com obrigada"),
            Some("maria@ex.com".to_string())
        );
        assert_eq!(extract_email("não tenho email"), None);
    }

    #[test]
    fn test_extract_name_accepts_full_names() {
        assert_eq!(
            extract_name("Maria Clara Souza"),
            Some("Maria Clara Souza".to_string())
        );
        assert_eq!(
            extract_name("joão da silva"),
            Some("João Da Silva".to_string())
        );
    }

    #[test]
    fn test_extract_name_rejects_non_names() {
        assert_eq!(extract_name("quero agendar uma reunião"), None);
        assert_eq!(extract_name("maria@ex.com"), None);
        assert_eq!(extract_name("pode ser"), None);
        assert_eq!(extract_name("qual o preço?"), None);
        assert_eq!(extract_name("Maria"), None); // single word
        assert_eq!(extract_name("dia 17/02 às 10h"), None); // digits
    }

    #[test]
    fn test_extract_interest() {
        assert_eq!(
            extract_interest("Preciso de mais clientes para minha clínica"),
            Some("Preciso de mais clientes para minha clínica".to_string())
        );
        assert_eq!(extract_interest("maria@ex.com por favor"), None);
        assert_eq!(extract_interest("mais clientes"), None); // too few words
    }

    #[test]
    fn test_detect_yes_no() {
        assert_eq!(detect_yes_no("sim, por favor"), Some(true));
        assert_eq!(detect_yes_no("pode ser"), Some(true));
        assert_eq!(detect_yes_no("agora não, obrigada"), Some(false));
        // Both signals present resolves conservatively to decline
        assert_eq!(detect_yes_no("sim, mas agora não"), Some(false));
        assert_eq!(detect_yes_no("hmm"), None);
    }

    #[test]
    fn test_scheduling_and_cancellation_keywords() {
        assert!(has_scheduling_intent("quero marcar uma consultoria"));
        assert!(!has_scheduling_intent("qual o preço do plano?"));
        assert!(is_cancellation_request("preciso cancelar minha reunião"));
        assert!(!is_cancellation_request("quero remarcar"));
    }

    #[test]
    fn test_fallback_datetime() {
        let dt = fallback_datetime("pode ser 18/02 às 14h", 2026).unwrap();
        assert_eq!(dt, NaiveDate::from_ymd_opt(2026, 2, 18).unwrap().and_hms_opt(14, 0, 0).unwrap());

        let dt = fallback_datetime("17/02/26 10h", 2030).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2026, 2, 17).unwrap());

        assert_eq!(fallback_datetime("quero sim", 2026), None);
        // 31/02 is not a real date
        assert_eq!(fallback_datetime("31/02 às 10h", 2026), None);
    }

    #[test]
    fn test_bare_time() {
        assert_eq!(bare_time("15h"), NaiveTime::from_hms_opt(15, 0, 0));
        assert_eq!(bare_time("às 15"), NaiveTime::from_hms_opt(15, 0, 0));
        assert_eq!(bare_time("10:30"), NaiveTime::from_hms_opt(10, 30, 0));
        assert_eq!(bare_time("quero às 15h amanhã"), None);
        assert_eq!(bare_time("25h"), None);
    }
}
