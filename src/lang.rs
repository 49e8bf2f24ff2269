//! ISO-639 language lookup for track metadata.
//!
//! Containers declare track languages as 2-letter (639-1) or 3-letter
//! (639-2, bibliographic or terminological) codes; the registry derives a
//! human-readable name and a canonical 2-letter code from either form.

/// (639-1, 639-2/B, 639-2/T, English name). The terminological code is
/// empty when it equals the bibliographic one.
const LANGUAGES: &[(&str, &str, &str, &str)] = &[
    ("ar", "ara", "", "Arabic"),
    ("cs", "cze", "ces", "Czech"),
    ("da", "dan", "", "Danish"),
    ("de", "ger", "deu", "German"),
    ("el", "gre", "ell", "Greek"),
    ("en", "eng", "", "English"),
    ("es", "spa", "", "Spanish"),
    ("fa", "per", "fas", "Persian"),
    ("fi", "fin", "", "Finnish"),
    ("fr", "fre", "fra", "French"),
    ("he", "heb", "", "Hebrew"),
    ("hi", "hin", "", "Hindi"),
    ("hu", "hun", "", "Hungarian"),
    ("it", "ita", "", "Italian"),
    ("ja", "jpn", "", "Japanese"),
    ("ko", "kor", "", "Korean"),
    ("nl", "dut", "nld", "Dutch"),
    ("no", "nor", "", "Norwegian"),
    ("pl", "pol", "", "Polish"),
    ("pt", "por", "", "Portuguese"),
    ("ro", "rum", "ron", "Romanian"),
    ("ru", "rus", "", "Russian"),
    ("sv", "swe", "", "Swedish"),
    ("th", "tha", "", "Thai"),
    ("tr", "tur", "", "Turkish"),
    ("uk", "ukr", "", "Ukrainian"),
    ("vi", "vie", "", "Vietnamese"),
    ("zh", "chi", "zho", "Chinese"),
];

/// Undetermined-language code; matches any language preference.
pub const UNDETERMINED: &str = "und";

/// Derived language metadata for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    /// Canonical 2-letter code; falls back to the declared code when the
    /// language is not in the table.
    pub code: String,
    /// English name; falls back to the declared code.
    pub name: String,
}

impl Language {
    /// True when the language was declared absent or undetermined.
    pub fn is_undetermined(&self) -> bool {
        self.code == UNDETERMINED || self.code.is_empty()
    }
}

/// Derive language name and 2-letter code from a declared container code.
pub fn resolve(declared: Option<&str>) -> Language {
    let declared = match declared {
        Some(s) if !s.is_empty() => s.to_ascii_lowercase(),
        _ => {
            return Language {
                code: UNDETERMINED.into(),
                name: "Undetermined".into(),
            }
        }
    };
    if declared == UNDETERMINED {
        return Language {
            code: UNDETERMINED.into(),
            name: "Undetermined".into(),
        };
    }
    for &(iso1, iso2b, iso2t, name) in LANGUAGES {
        if declared == iso1 || declared == iso2b || (!iso2t.is_empty() && declared == iso2t) {
            return Language {
                code: iso1.into(),
                name: name.into(),
            };
        }
    }
    // Unknown code: pass it through so explicit preferences can still
    // match it.
    Language {
        name: declared.clone(),
        code: declared,
    }
}

/// Whether a declared track language satisfies one preference entry.
/// Comparison accepts either code form on either side.
pub fn matches(track: &Language, preference: &str) -> bool {
    if track.is_undetermined() {
        return true;
    }
    let pref = resolve(Some(preference));
    track.code == pref.code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_both_code_forms() {
        assert_eq!(resolve(Some("fre")).code, "fr");
        assert_eq!(resolve(Some("fra")).code, "fr");
        assert_eq!(resolve(Some("fr")).name, "French");
        assert_eq!(resolve(Some("ENG")).code, "en");
    }

    #[test]
    fn test_resolve_unknown_and_missing() {
        assert!(resolve(None).is_undetermined());
        assert!(resolve(Some("und")).is_undetermined());
        let odd = resolve(Some("xx"));
        assert_eq!(odd.code, "xx");
        assert_eq!(odd.name, "xx");
    }

    #[test]
    fn test_matches_mixed_forms() {
        let track = resolve(Some("eng"));
        assert!(matches(&track, "en"));
        assert!(matches(&track, "eng"));
        assert!(!matches(&track, "fr"));
        // Undetermined matches anything.
        assert!(matches(&resolve(None), "ja"));
    }
}
