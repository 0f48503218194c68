//! SPARQL construction for the fixed person schema.
//!
//! Three shapes share one projection and one body:
//! - single name: `?person ?label "<name>"@<lang>`
//! - batch of names: `VALUES ?personLabel { "<a>"@<lang> ... }`
//! - batch of identifiers: `VALUES ?person { wd:Q1 ... }`
//!
//! Variables bound by `VALUES` are left alone by the label service, so in the
//! batch form `personLabel` echoes the requested literal back on every row.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ResolveError;

/// Variables selected by every person query, in projection order.
pub const PERSON_VARIABLES: &[&str] = &[
    "person",
    "personLabel",
    "placeOfBirthLabel",
    "dateOfBirth",
    "dateOfDeath",
    "placeOfDeathLabel",
    "genderLabel",
    "citizenshipLabel",
    "occupationLabel",
    "workLocationLabel",
    "startTime",
    "endTime",
    "pointInTime",
];

const PERSON_BODY: &str = "  OPTIONAL { ?person wdt:P19 ?placeOfBirth. }
  OPTIONAL { ?person wdt:P569 ?dateOfBirth. }
  OPTIONAL { ?person wdt:P570 ?dateOfDeath. }
  OPTIONAL { ?person wdt:P20 ?placeOfDeath. }
  OPTIONAL { ?person wdt:P21 ?gender. }
  OPTIONAL { ?person wdt:P27 ?citizenship. }
  OPTIONAL { ?person wdt:P106 ?occupation. }
  OPTIONAL {
    ?person p:P937 ?workStmt.
    ?workStmt ps:P937 ?workLocation.
    OPTIONAL { ?workStmt pq:P580 ?startTime. }
    OPTIONAL { ?workStmt pq:P582 ?endTime. }
    OPTIONAL { ?workStmt pq:P585 ?pointInTime. }
  }
";

/// Instance of (P31) human (Q5).
const HUMAN_FILTER: &str = "  ?person wdt:P31 wd:Q5.\n";

fn language_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2,8}(-[A-Za-z0-9]{1,8})*$").expect("static language regex")
    })
}

fn entity_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Q\d+$").expect("static entity id regex"))
}

/// Validate a BCP-47-style language tag (`en`, `zh-hant`, `de-CH`).
pub fn validate_language(tag: &str) -> Result<(), ResolveError> {
    if language_pattern().is_match(tag) {
        Ok(())
    } else {
        Err(ResolveError::InvalidInput(format!(
            "malformed language tag {:?}",
            tag
        )))
    }
}

/// True for item identifiers of the form `Q<digits>`.
pub fn is_entity_id(id: &str) -> bool {
    entity_id_pattern().is_match(id)
}

/// Escape a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn checked_name(name: &str) -> Result<&str, ResolveError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::InvalidInput("empty entity name".to_string()));
    }
    Ok(trimmed)
}

/// Builds person queries against a fixed default language.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    default_language: String,
}

impl QueryBuilder {
    pub fn new(default_language: &str) -> Result<Self, ResolveError> {
        validate_language(default_language)?;
        Ok(Self {
            default_language: default_language.to_string(),
        })
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Query one name, matched as a label in `language`.
    pub fn person(&self, name: &str, language: &str) -> Result<String, ResolveError> {
        validate_language(language)?;
        let name = checked_name(name)?;
        let matcher = format!("  ?person ?label \"{}\"@{}.\n", escape_literal(name), language);
        Ok(self.render(&matcher, true, language))
    }

    /// Query many names at once through a single `VALUES` clause.
    pub fn batch<S: AsRef<str>>(
        &self,
        names: &[S],
        language: &str,
    ) -> Result<String, ResolveError> {
        validate_language(language)?;
        if names.is_empty() {
            return Err(ResolveError::InvalidInput("empty name batch".to_string()));
        }
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let name = checked_name(name.as_ref())?;
            values.push(format!("\"{}\"@{}", escape_literal(name), language));
        }
        let matcher = format!(
            "  VALUES ?personLabel {{ {} }}\n  ?person ?label ?personLabel.\n",
            values.join(" ")
        );
        Ok(self.render(&matcher, true, language))
    }

    /// Query many identifiers at once. No human filter: the caller already
    /// chose the entities.
    pub fn ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<String, ResolveError> {
        if ids.is_empty() {
            return Err(ResolveError::InvalidInput("empty id batch".to_string()));
        }
        let mut values = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref().trim();
            if !is_entity_id(id) {
                return Err(ResolveError::InvalidInput(format!(
                    "malformed entity id {:?}",
                    id
                )));
            }
            values.push(format!("wd:{}", id));
        }
        let matcher = format!("  VALUES ?person {{ {} }}\n", values.join(" "));
        Ok(self.render(&matcher, false, &self.default_language))
    }

    fn label_languages(&self, language: &str) -> String {
        if language == self.default_language {
            language.to_string()
        } else {
            format!("{},{}", language, self.default_language)
        }
    }

    fn render(&self, matcher: &str, human_only: bool, language: &str) -> String {
        let projection = PERSON_VARIABLES
            .iter()
            .map(|v| format!("?{}", v))
            .collect::<Vec<_>>()
            .join(" ");

        let mut query = format!("SELECT {} WHERE {{\n", projection);
        query.push_str(matcher);
        if human_only {
            query.push_str(HUMAN_FILTER);
        }
        query.push_str(PERSON_BODY);
        query.push_str(&format!(
            "  SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"{}\". }}\n}}\n",
            self.label_languages(language)
        ));
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> QueryBuilder {
        QueryBuilder::new("en").unwrap()
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("Plain Name"), "Plain Name");
        assert_eq!(
            escape_literal(r#"Dwayne "The Rock" Johnson"#),
            r#"Dwayne \"The Rock\" Johnson"#
        );
        assert_eq!(escape_literal(r"back\slash"), r"back\\slash");
        assert_eq!(escape_literal("two\nlines"), "two\\nlines");
        // Backslash is escaped before the quote it might precede
        assert_eq!(escape_literal(r#"\""#), r#"\\\""#);
    }

    #[test]
    fn test_person_query_shape() {
        let query = builder().person("Frida Kahlo", "en").unwrap();
        assert!(query.starts_with("SELECT ?person ?personLabel ?placeOfBirthLabel"));
        assert!(query.contains("?person ?label \"Frida Kahlo\"@en."));
        assert!(query.contains("?person wdt:P31 wd:Q5."));
        assert!(query.contains("?workStmt pq:P585 ?pointInTime."));
        assert!(query.contains("wikibase:language \"en\"."));
        assert_eq!(query.matches('{').count(), query.matches('}').count());
    }

    #[test]
    fn test_person_query_escapes_quotes() {
        let query = builder().person(r#"Henri "Le Douanier" Rousseau"#, "en").unwrap();
        assert!(query.contains(r#""Henri \"Le Douanier\" Rousseau"@en"#));
    }

    #[test]
    fn test_fallback_language_keeps_default_labels() {
        let query = builder().person("Ilia Repin", "ru").unwrap();
        assert!(query.contains("\"Ilia Repin\"@ru."));
        assert!(query.contains("wikibase:language \"ru,en\"."));
    }

    #[test]
    fn test_batch_query_uses_single_values_clause() {
        let query = builder()
            .batch(&["Claude Monet", "Edgar Degas", "O\"Keeffe"], "en")
            .unwrap();
        assert_eq!(query.matches("VALUES").count(), 1);
        assert!(query.contains(
            r#"VALUES ?personLabel { "Claude Monet"@en "Edgar Degas"@en "O\"Keeffe"@en }"#
        ));
        assert!(query.contains("?person ?label ?personLabel."));
    }

    #[test]
    fn test_query_is_deterministic() {
        let names = vec!["A".to_string(), "B".to_string()];
        assert_eq!(
            builder().batch(&names, "de").unwrap(),
            builder().batch(&names, "de").unwrap()
        );
    }

    #[test]
    fn test_ids_query() {
        let query = builder().ids(&["Q5582", "Q296"]).unwrap();
        assert!(query.contains("VALUES ?person { wd:Q5582 wd:Q296 }"));
        assert!(!query.contains("wdt:P31 wd:Q5."));
        assert!(builder().ids(&["Q12", "P31"]).is_err());
        assert!(builder().ids::<&str>(&[]).is_err());
    }

    #[test]
    fn test_rejects_misuse() {
        assert!(builder().person("   ", "en").is_err());
        assert!(builder().person("Name", "e n").is_err());
        assert!(builder().batch(&["ok", ""], "en").is_err());
        assert!(builder().batch::<&str>(&[], "en").is_err());
        assert!(QueryBuilder::new("english!").is_err());
    }

    #[test]
    fn test_language_and_id_validation() {
        for tag in ["en", "zh-hant", "de-CH", "sr-Latn"] {
            assert!(validate_language(tag).is_ok(), "{}", tag);
        }
        for tag in ["", "e", "en_US", "[AUTO_LANGUAGE]", "en,fr"] {
            assert!(validate_language(tag).is_err(), "{}", tag);
        }
        assert!(is_entity_id("Q5598"));
        assert!(!is_entity_id("q5598"));
        assert!(!is_entity_id("L123"));
        assert!(!is_entity_id("Q"));
    }
}
