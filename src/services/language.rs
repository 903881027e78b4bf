//! Language codes versus wiki domain codes.

/// Language code -> Wikipedia domain code, where the two differ
const LANGUAGE_TO_DOMAIN: &[(&str, &str)] = &[
    ("be-tarask", "be-x-old"),
    ("bho", "bh"),
    ("gsw", "als"),
    ("lzh", "zh-classical"),
    ("nan", "zh-min-nan"),
    ("nb", "no"),
    ("rup", "roa-rup"),
    ("sgs", "bat-smg"),
    ("vro", "fiu-vro"),
    ("yue", "zh-yue"),
];

/// Domain code used for `lllang` and langlink matching
pub fn domain_code(language: &str) -> &str {
    LANGUAGE_TO_DOMAIN
        .iter()
        .find(|(code, _)| *code == language)
        .map(|(_, domain)| *domain)
        .unwrap_or(language)
}

/// True for codes that appear on either side of the mapping
pub fn is_mapped_code(code: &str) -> bool {
    LANGUAGE_TO_DOMAIN
        .iter()
        .any(|(language, domain)| *language == code || *domain == code)
}

/// Missing both as the language code and as its domain code
pub fn is_missing_in_target_language<S: AsRef<str>>(language: &str, available: &[S]) -> bool {
    let domain = domain_code(language);
    !available
        .iter()
        .any(|code| code.as_ref() == language || code.as_ref() == domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_code() {
        assert_eq!(domain_code("nb"), "no");
        assert_eq!(domain_code("be-tarask"), "be-x-old");
        assert_eq!(domain_code("fr"), "fr");
    }

    #[test]
    fn test_missing_checks_both_codes() {
        assert!(!is_missing_in_target_language("nb", &["no", "de"]));
        assert!(!is_missing_in_target_language("nb", &["nb"]));
        assert!(is_missing_in_target_language("yue", &["zh"]));
        assert!(is_missing_in_target_language::<&str>("fr", &[]));
    }

    #[test]
    fn test_mapped_codes() {
        assert!(is_mapped_code("zh-min-nan"));
        assert!(is_mapped_code("nan"));
        assert!(!is_mapped_code("xx"));
    }
}
