//! Inline control tags in remote text.
//!
//! The remote may prefix a fragment with `[LANG:XX]` to announce the language
//! it is speaking. The tag is metadata: it never reaches the transcript.

const LANG_PREFIX: &str = "[LANG:";
const MAX_CODE_LEN: usize = 8;

/// A text fragment split into its language tag (if any) and display content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedText<'a> {
    pub language: Option<&'a str>,
    pub content: &'a str,
}

/// Split a leading `[LANG:XX]` tag off `text`.
///
/// Leading whitespace before the tag is allowed; whitespace between the tag
/// and the content is dropped. Malformed tags are left in the content.
pub fn strip_language_tag(text: &str) -> TaggedText<'_> {
    let untagged = TaggedText {
        language: None,
        content: text,
    };

    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix(LANG_PREFIX) else {
        return untagged;
    };
    let Some(end) = rest.find(']') else {
        return untagged;
    };

    let code = rest[..end].trim();
    let valid = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return untagged;
    }

    TaggedText {
        language: Some(code),
        content: rest[end + 1..].trim_start(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tag_and_reports_language() {
        let tagged = strip_language_tag("[LANG:ES] Hola, ¿cómo estás?");
        assert_eq!(tagged.language, Some("ES"));
        assert_eq!(tagged.content, "Hola, ¿cómo estás?");
    }

    #[test]
    fn untagged_text_passes_through_unchanged() {
        let tagged = strip_language_tag(" and then");
        assert_eq!(tagged.language, None);
        assert_eq!(tagged.content, " and then");
    }

    #[test]
    fn leading_whitespace_before_tag_is_tolerated() {
        let tagged = strip_language_tag("  [LANG:pt-BR]Olá");
        assert_eq!(tagged.language, Some("pt-BR"));
        assert_eq!(tagged.content, "Olá");
    }

    #[test]
    fn tag_only_fragment_has_empty_content() {
        let tagged = strip_language_tag("[LANG:FR]");
        assert_eq!(tagged.language, Some("FR"));
        assert!(tagged.content.is_empty());
    }

    #[test]
    fn malformed_tags_are_kept_as_text() {
        for text in ["[LANG:] hi", "[LANG:ES hi", "[LANG:E S] hi", "[LANG:toolongcode] hi"] {
            let tagged = strip_language_tag(text);
            assert_eq!(tagged.language, None, "{text}");
            assert_eq!(tagged.content, text);
        }
    }

    #[test]
    fn tag_must_lead_the_fragment() {
        let tagged = strip_language_tag("Hello [LANG:EN]");
        assert_eq!(tagged.language, None);
    }
}
