// ============================================================
// Layer 4 — Code Line Tokenizer
// ============================================================
// Splits a line of source code into the token strings that the
// TokenEmbedder turns into vectors. Two flavours:
//
//   Lexical    — built-in splitter: identifiers, numbers, string
//                and char literals, and single punctuation marks
//   Pretrained — any HuggingFace tokenizer.json (e.g. the
//                CodeBERT BPE vocabulary) via the tokenizers crate
//
// Lines that already carry tokens from preprocessing are left
// untouched; only `code` of token-less lines is split here, and
// blank lines are dropped.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::domain::source_file::Release;

pub enum CodeTokenizer {
    Lexical,
    Pretrained(Box<Tokenizer>),
}

impl CodeTokenizer {
    /// `None` selects the lexical splitter.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::Lexical),
            Some(path) => {
                let tok = Tokenizer::from_file(path).map_err(|e| {
                    anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e)
                })?;
                tracing::info!("Loaded pretrained tokenizer from '{}'", path.display());
                Ok(Self::Pretrained(Box::new(tok)))
            }
        }
    }

    pub fn tokenize(&self, code: &str) -> Result<Vec<String>> {
        match self {
            Self::Lexical => Ok(lexical_split(code)),
            Self::Pretrained(tok) => {
                let enc = tok
                    .encode(code, false)
                    .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
                Ok(enc.get_tokens().to_vec())
            }
        }
    }

    /// Tokenize every line of `release` that has no tokens yet.
    ///
    /// Lines whose code yields no tokens at all (blank or whitespace
    /// only) are dropped. The surviving lines keep their original
    /// `index`, so rankings still point at real source line numbers.
    pub fn fill_missing_tokens(&self, release: &mut Release) -> Result<()> {
        let mut filled  = 0usize;
        let mut dropped = 0usize;
        for file in &mut release.files {
            let lines = std::mem::take(&mut file.lines);
            let mut kept = Vec::with_capacity(lines.len());
            for mut line in lines {
                if line.tokens.is_empty() {
                    line.tokens = self.tokenize(&line.code).with_context(|| {
                        format!("Cannot tokenize {}:{}", file.file_id, line.index)
                    })?;
                    if line.tokens.is_empty() {
                        dropped += 1;
                        continue;
                    }
                    filled += 1;
                }
                kept.push(line);
            }
            file.lines = kept;
        }
        tracing::debug!(
            "Tokenized {} lines of release '{}', dropped {} blank lines",
            filled, release.name, dropped
        );
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CharClass {
    Word,
    Space,
    Punct,
}

fn class_of(c: char) -> CharClass {
    if c.is_alphanumeric() || c == '_' || c == '$' {
        CharClass::Word
    } else if c.is_whitespace() || c.is_control() {
        CharClass::Space
    } else {
        CharClass::Punct
    }
}

/// Split a code line into identifier/number words, quoted literals
/// and single punctuation characters. Whitespace is dropped.
pub fn lexical_split(code: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars  = code.chars().peekable();

    while let Some(c) = chars.next() {
        match class_of(c) {
            CharClass::Space => {}
            CharClass::Word => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if class_of(next) != CharClass::Word {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(word);
            }
            CharClass::Punct if c == '"' || c == '\'' => {
                // Quoted literal up to the matching unescaped quote (or end of line)
                let mut lit     = String::from(c);
                let mut escaped = false;
                for next in chars.by_ref() {
                    lit.push(next);
                    if escaped {
                        escaped = false;
                    } else if next == '\\' {
                        escaped = true;
                    } else if next == c {
                        break;
                    }
                }
                tokens.push(lit);
            }
            CharClass::Punct => tokens.push(c.to_string()),
        }
    }
    tokens
}
