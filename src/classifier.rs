//! Keyword/punctuation heuristics that label AI and listener utterances.
//!
//! Everything here is a pure function over the utterance text and a
//! [`LanguageConfig`]; the state machine decides what to do with the label.

use crate::language::LanguageConfig;

/// What the AI's last turn asked of the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiTurnAct {
    /// Quiz introduced in one utterance and asked in the next
    TwoSentenceQuiz { question: String },
    /// Quiz introduced and asked in a single utterance
    OneSentenceQuiz { question: String },
    /// One of the configured "any questions?" prompts
    GeneralInquiry,
    /// Ends in `?`/`!` but matched nothing else
    UnrecognizedQuestion,
    /// Plain statement, the caller must ask for questions itself
    Statement,
}

impl AiTurnAct {
    /// The quiz question, if the AI posed one
    pub fn quiz_question(&self) -> Option<&str> {
        match self {
            Self::TwoSentenceQuiz { question } | Self::OneSentenceQuiz { question } => {
                Some(question)
            }
            _ => None,
        }
    }

    /// Whether the AI already asked something the listener can answer
    pub fn awaits_reply(&self) -> bool {
        !matches!(self, Self::Statement)
    }
}

/// Intent of a transcribed listener utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueAct {
    QuizAnswer,
    Continuation,
    Question,
    /// Nothing matched; routed like a question
    AmbiguousStatement,
}

impl DialogueAct {
    /// Whether the utterance goes to the dialogue engine as an interjection
    pub fn is_interjection(&self) -> bool {
        matches!(self, Self::Question | Self::AmbiguousStatement)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierOptions {
    /// Check the combined last two AI utterances of a turn for a quiz
    /// introducer. Off unless asked for; the older lecture client never
    /// reached this path.
    pub two_sentence_quiz: bool,
}

/// Stateless dialogue-act classifier over a language table
#[derive(Debug, Clone)]
pub struct DialogueActClassifier {
    language: LanguageConfig,
    options: ClassifierOptions,
}

impl DialogueActClassifier {
    pub fn new(language: LanguageConfig) -> Self {
        Self::with_options(language, ClassifierOptions::default())
    }

    pub fn with_options(language: LanguageConfig, options: ClassifierOptions) -> Self {
        Self { language, options }
    }

    pub fn language(&self) -> &LanguageConfig {
        &self.language
    }

    /// Classify the AI's last turn from its last one or two utterances,
    /// oldest first. Both must come from that same turn. First match wins,
    /// in the order of [`AiTurnAct`].
    pub fn classify_ai_turn(&self, last_utterances: &[&str]) -> AiTurnAct {
        let Some(last) = last_utterances.last().map(|s| s.trim()) else {
            return AiTurnAct::Statement;
        };

        if self.options.two_sentence_quiz && last_utterances.len() >= 2 {
            let previous = last_utterances[last_utterances.len() - 2].trim();
            let combined = format!("{} {}", previous, last);
            if ends_as_question(&combined) && self.starts_with_quiz_introducer(&combined) {
                return AiTurnAct::TwoSentenceQuiz { question: combined };
            }
        }

        if ends_as_question(last) && self.starts_with_quiz_introducer(last) {
            return AiTurnAct::OneSentenceQuiz {
                question: last.to_string(),
            };
        }

        let prompt = normalize_prompt(last);
        if self
            .language
            .general_question_prompts
            .iter()
            .any(|p| normalize_prompt(p) == prompt)
        {
            return AiTurnAct::GeneralInquiry;
        }

        if ends_as_question(last) {
            return AiTurnAct::UnrecognizedQuestion;
        }

        AiTurnAct::Statement
    }

    /// Classify a freshly transcribed listener utterance
    pub fn classify_user_utterance(&self, utterance: &str, quiz_active: bool) -> DialogueAct {
        if quiz_active {
            return DialogueAct::QuizAnswer;
        }

        let lowered = utterance.trim().to_lowercase();
        let tokens = tokenize(&lowered);

        let continuation = self
            .language
            .continuation_keywords
            .iter()
            .chain(&self.language.no_question_keywords)
            .any(|keyword| contains_phrase(&tokens, keyword));
        if continuation {
            return DialogueAct::Continuation;
        }

        let question = lowered.ends_with('?')
            || self
                .language
                .question_words
                .iter()
                .any(|word| contains_phrase(&tokens, word));
        if question {
            return DialogueAct::Question;
        }

        log::debug!(
            "Classifier: '{}' matched no keyword, treating as ambiguous",
            utterance
        );
        DialogueAct::AmbiguousStatement
    }

    fn starts_with_quiz_introducer(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.language.quiz_introducers.iter().any(|introducer| {
            let introducer = introducer.trim().to_lowercase();
            !introducer.is_empty() && lowered.starts_with(&introducer)
        })
    }
}

fn ends_as_question(text: &str) -> bool {
    text.trim_end().ends_with(['?', '!'])
}

/// Lower case with surrounding whitespace and trailing punctuation removed
fn normalize_prompt(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase()
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whole-word match of a (possibly multi-word) phrase against tokens
fn contains_phrase(tokens: &[&str], phrase: &str) -> bool {
    let phrase = phrase.to_lowercase();
    let needle = tokenize(&phrase);
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens.windows(needle.len()).any(|window| window == needle.as_slice())
}
