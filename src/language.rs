use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanguageError {
    #[error("Failed to read language file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid language file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Language '{language}' is missing required prompt '{field}'")]
    MissingPrompt {
        language: String,
        field: &'static str,
    },
}

/// Per-language keyword tables and canned prompts.
///
/// Keyword lists are matched case-insensitively as whole words, so they are
/// stored lower case without punctuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub display_name: String,
    /// ISO 639-1 code
    pub language_code: String,

    /// Acknowledgements that mean "carry on" ("ok", "thanks", "go on")
    pub continuation_keywords: Vec<String>,
    /// Phrases that mean the listener has nothing to ask
    pub no_question_keywords: Vec<String>,
    /// Interrogatives that mark an utterance as a question
    pub question_words: Vec<String>,
    /// Phrases the AI uses to open a quiz question
    pub quiz_introducers: Vec<String>,
    /// General "any questions?" prompts that are not quizzes
    pub general_question_prompts: Vec<String>,

    /// Spoken when a raised hand is honored
    pub ask_question_prompt: String,
    /// Spoken when the AI stopped without asking anything
    pub general_inquiry_prompt: String,
    /// Sent alongside an interjection so the AI returns to the lecture afterwards
    pub interruption_follow_up_instruction: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self::english()
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl LanguageConfig {
    pub fn english() -> Self {
        Self {
            display_name: "English".to_string(),
            language_code: "en".to_string(),
            continuation_keywords: words(&[
                "ok",
                "okay",
                "yes",
                "yeah",
                "sure",
                "thanks",
                "thank you",
                "got it",
                "go on",
                "continue",
                "carry on",
                "next",
                "understood",
            ]),
            no_question_keywords: words(&[
                "no",
                "nope",
                "no questions",
                "no more questions",
                "nothing",
                "all clear",
            ]),
            question_words: words(&[
                "what", "why", "how", "when", "where", "who", "which", "whose", "can", "could",
                "would", "is", "are", "does", "do", "explain",
            ]),
            quiz_introducers: words(&[
                "quick check",
                "quiz question",
                "quiz time",
                "test yourself",
                "here is a question for you",
            ]),
            general_question_prompts: words(&[
                "do you have any questions",
                "any questions",
                "is everything clear so far",
                "shall we continue",
            ]),
            ask_question_prompt: "What is your question?".to_string(),
            general_inquiry_prompt: "Do you have any questions so far?".to_string(),
            interruption_follow_up_instruction: "Answer the student's interjection briefly, \
                 then continue the lecture exactly where you left off."
                .to_string(),
        }
    }

    pub fn hungarian() -> Self {
        Self {
            display_name: "Magyar".to_string(),
            language_code: "hu".to_string(),
            continuation_keywords: words(&[
                "oké",
                "igen",
                "rendben",
                "köszönöm",
                "köszi",
                "értem",
                "mehetünk tovább",
                "folytasd",
                "tovább",
            ]),
            no_question_keywords: words(&["nem", "nincs", "nincs kérdésem", "semmi"]),
            question_words: words(&[
                "mi", "mit", "miért", "hogyan", "hogy", "mikor", "hol", "ki", "melyik", "mennyi",
                "milyen",
            ]),
            quiz_introducers: words(&["gyors kérdés", "kvízkérdés", "teszteljük"]),
            general_question_prompts: words(&[
                "van kérdésed",
                "van kérdésed eddig",
                "minden világos eddig",
            ]),
            ask_question_prompt: "Mi a kérdésed?".to_string(),
            general_inquiry_prompt: "Van eddig kérdésed?".to_string(),
            interruption_follow_up_instruction: "Válaszolj röviden a közbevetésre, \
                 majd folytasd az előadást ott, ahol abbahagytad."
                .to_string(),
        }
    }

    /// Built-in table for an ISO 639-1 code
    pub fn builtin(language_code: &str) -> Option<Self> {
        match language_code.to_ascii_lowercase().as_str() {
            "en" => Some(Self::english()),
            "hu" => Some(Self::hungarian()),
            _ => None,
        }
    }

    /// Load a language table from a JSON file. Missing fields fall back to English.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LanguageError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LanguageError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!(
            "🌐 Loaded language config '{}' ({})",
            config.display_name,
            config.language_code
        );
        Ok(config)
    }

    /// The state machine speaks these prompts itself, so they must be present
    pub fn validate(&self) -> Result<(), LanguageError> {
        let required = [
            ("ask_question_prompt", &self.ask_question_prompt),
            ("general_inquiry_prompt", &self.general_inquiry_prompt),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(LanguageError::MissingPrompt {
                    language: self.language_code.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_tables_are_valid() {
        for code in ["en", "hu", "EN"] {
            let config = LanguageConfig::builtin(code).unwrap();
            assert!(config.validate().is_ok());
        }
        assert!(LanguageConfig::builtin("xx").is_none());
    }

    #[test]
    fn test_keywords_are_lowercase() {
        for config in [LanguageConfig::english(), LanguageConfig::hungarian()] {
            for list in [
                &config.continuation_keywords,
                &config.no_question_keywords,
                &config.question_words,
                &config.quiz_introducers,
                &config.general_question_prompts,
            ] {
                for keyword in list {
                    assert_eq!(keyword, &keyword.to_lowercase());
                }
            }
        }
    }

    #[test]
    fn test_load_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"display_name": "Test", "language_code": "tt", "quiz_introducers": ["pop quiz"]}}"#
        )
        .unwrap();

        let config = LanguageConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.language_code, "tt");
        assert_eq!(config.quiz_introducers, vec!["pop quiz".to_string()]);
        // Unspecified fields keep the English defaults
        assert_eq!(config.ask_question_prompt, "What is your question?");
    }

    #[test]
    fn test_missing_prompt_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ask_question_prompt": "  "}}"#).unwrap();

        let result = LanguageConfig::from_json_file(file.path());
        assert!(matches!(
            result,
            Err(LanguageError::MissingPrompt {
                field: "ask_question_prompt",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = LanguageConfig::from_json_file("/nonexistent/lang.json");
        assert!(matches!(result, Err(LanguageError::Read { .. })));
    }
}
