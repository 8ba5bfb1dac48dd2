//! Incremental sentence segmentation of streamed dialogue-engine text.
//!
//! A terminator (`.`, `?`, `!`) only ends a sentence when the character right
//! after it is whitespace, a closing quote or a closing bracket. Anything else
//! ("v1.2", "e.g.x") keeps the sentence open. A terminator at the very end of
//! the buffer stays undecided until more text arrives or the stream is flushed.

use crate::types::SentenceUnit;

const TERMINATORS: [char; 3] = ['.', '?', '!'];

fn is_closing(c: char) -> bool {
    matches!(
        c,
        '"' | '\'' | '\u{201D}' | '\u{2019}' | '\u{00BB}' | ')' | ']' | '}'
    )
}

enum Boundary {
    /// Sentence ends at this byte offset
    Confirmed(usize),
    /// Not a sentence end, keep scanning past it
    NotFinal,
    /// Undecidable until more text arrives
    NeedMore,
}

/// Converts an incrementally-arriving character stream into numbered sentences.
#[derive(Debug, Default)]
pub struct TextSegmenter {
    buffer: String,
    scan_from: usize,
    next_index: u64,
}

impl TextSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a text delta. Confirmed sentences are pulled with [`Self::sentences`].
    pub fn append(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// Lazily drain every sentence whose boundary is confirmed
    pub fn sentences(&mut self) -> Sentences<'_> {
        Sentences { segmenter: self }
    }

    /// Append a delta and collect whatever sentences it completes
    pub fn push(&mut self, delta: &str) -> Vec<SentenceUnit> {
        self.append(delta);
        self.sentences().collect()
    }

    /// Emit any unterminated remainder as a final sentence
    pub fn flush(&mut self) -> Option<SentenceUnit> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        self.scan_from = 0;
        self.make_unit(text)
    }

    /// Drop buffered text and restart numbering from 0
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
        self.next_index = 0;
    }

    /// Index the next confirmed sentence will receive
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Text still waiting for a boundary
    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    fn next_sentence(&mut self) -> Option<SentenceUnit> {
        loop {
            let relative = self.buffer[self.scan_from..].find(&TERMINATORS[..])?;
            let position = self.scan_from + relative;
            // Terminators are ASCII, so the next char starts one byte later
            let after = position + 1;

            match self.boundary_after(after) {
                Boundary::Confirmed(end) => {
                    let text = self.buffer[..end].trim().to_string();
                    self.buffer.drain(..end);
                    let leading = self.buffer.len() - self.buffer.trim_start().len();
                    self.buffer.drain(..leading);
                    self.scan_from = 0;

                    if let Some(unit) = self.make_unit(text) {
                        return Some(unit);
                    }
                }
                Boundary::NotFinal => {
                    self.scan_from = after;
                }
                Boundary::NeedMore => {
                    self.scan_from = position;
                    return None;
                }
            }
        }
    }

    fn boundary_after(&self, after: usize) -> Boundary {
        let mut rest = self.buffer[after..].chars();
        match rest.next() {
            None => Boundary::NeedMore,
            Some(c) if c.is_whitespace() => Boundary::Confirmed(after),
            Some(c) if is_closing(c) => {
                // Swallow the whole run of closing quotes/brackets
                let mut end = after + c.len_utf8();
                for c in rest {
                    if !is_closing(c) {
                        return Boundary::Confirmed(end);
                    }
                    end += c.len_utf8();
                }
                Boundary::NeedMore
            }
            Some(_) => Boundary::NotFinal,
        }
    }

    fn make_unit(&mut self, text: String) -> Option<SentenceUnit> {
        if !text.chars().any(char::is_alphanumeric) {
            if !text.is_empty() {
                log::debug!("Segmenter: skipping punctuation-only fragment '{}'", text);
            }
            return None;
        }

        let unit = SentenceUnit::new(self.next_index, text);
        self.next_index += 1;
        Some(unit)
    }
}

/// Iterator over confirmed sentences, see [`TextSegmenter::sentences`]
pub struct Sentences<'a> {
    segmenter: &'a mut TextSegmenter,
}

impl Iterator for Sentences<'_> {
    type Item = SentenceUnit;

    fn next(&mut self) -> Option<Self::Item> {
        self.segmenter.next_sentence()
    }
}
