//! Text normalization applied before rules see a document.
//!
//! PDF text extraction glues tokens together and scatters whitespace. Rules
//! are learned and replayed on normalized text, so both sides must agree on
//! the same normalization.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LETTER_DIGIT: Regex = Regex::new(r"([a-zA-Z])(\d)").unwrap();
    static ref DIGIT_LETTER: Regex = Regex::new(r"(\d)([a-zA-Z])").unwrap();

    // "nomeNome" and "GOKUInscrição"
    static ref LOWER_UPPER: Regex = Regex::new(r"([a-z])([A-Z])").unwrap();
    static ref UPPER_WORD: Regex = Regex::new(r"([A-Z])([A-Z][a-z])").unwrap();

    static ref INLINE_SPACE: Regex = Regex::new(r"[ \t]+").unwrap();
    static ref NEWLINES: Regex = Regex::new(r"\n+").unwrap();
    static ref ANY_SPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Split conjoined tokens and tidy whitespace, keeping line structure.
///
/// ```
/// use adex_core::text::normalize_structure;
///
/// assert_eq!(
///     normalize_structure("GOKUInscrição\n\n\nSeccional101943"),
///     "GOKU Inscrição\nSeccional 101943"
/// );
/// ```
pub fn normalize_structure(text: &str) -> String {
    let text = LETTER_DIGIT.replace_all(text, "$1 $2");
    let text = DIGIT_LETTER.replace_all(&text, "$1 $2");
    let text = LOWER_UPPER.replace_all(&text, "$1 $2");
    let text = UPPER_WORD.replace_all(&text, "$1 $2");
    let text = INLINE_SPACE.replace_all(&text, " ");
    let text = NEWLINES.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Collapse every whitespace run, newlines included, into one space.
pub fn flatten_whitespace(text: &str) -> String {
    ANY_SPACE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_splits_letters_and_digits() {
        assert_eq!(normalize_structure("Seccional101943"), "Seccional 101943");
        assert_eq!(normalize_structure("101943PR"), "101943 PR");
    }

    #[test]
    fn test_splits_camel_junctions() {
        assert_eq!(normalize_structure("GOKUInscrição"), "GOKU Inscrição");
        assert_eq!(normalize_structure("joanaNome"), "joana Nome");
    }

    #[test]
    fn test_keeps_single_newlines() {
        assert_eq!(
            normalize_structure("  Nome \t JOANA\n\n\nCategoria\n\nEndereco  "),
            "Nome JOANA\nCategoria\nEndereco"
        );
    }

    #[test]
    fn test_flatten_whitespace() {
        assert_eq!(flatten_whitespace("  Rua ABC,\n 10\tCuritiba \n"), "Rua ABC, 10 Curitiba");
        assert_eq!(flatten_whitespace(""), "");
    }
}
