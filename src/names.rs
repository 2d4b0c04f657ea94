//! Scientific name parsing.
//!
//! The normalizer only needs canonical forms and whether a name string
//! already carries its authorship, so the parser is a trait object the
//! pipeline borrows from a [`ParserPool`].

use std::ops::{Deref, DerefMut};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::DwcaError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub parsed: bool,
    /// Canonical form with infraspecific rank markers.
    pub canonical_full: String,
    pub canonical_simple: String,
    pub canonical_stemmed: String,
    pub has_authorship: bool,
}

pub trait NameParser {
    fn parse(&mut self, name: &str) -> ParsedName;
}

const RANK_MARKERS: [&str; 11] = [
    "var.",
    "subsp.",
    "ssp.",
    "f.",
    "forma",
    "fo.",
    "subvar.",
    "subf.",
    "cv.",
    "nothosubsp.",
    "nothovar.",
];

const AUTHOR_PARTICLES: [&str; 14] = [
    "de", "da", "del", "der", "den", "di", "du", "van", "von", "le", "la", "ex", "in", "et",
];

const SUFFIXES: [&str; 19] = [
    "ibus", "ius", "ae", "am", "as", "em", "es", "ia", "is", "nt", "os", "ud", "um", "us", "a",
    "e", "i", "o", "u",
];

/// Heuristic parser for uninomials, binomials and trinomials followed by
/// an optional authorship.
///
/// Anything that does not start with a capitalised genus or uninomial is
/// reported as unparsed.
#[derive(Debug, Default, Clone)]
pub struct BasicNameParser;

impl BasicNameParser {
    pub fn new() -> Self {
        Self
    }
}

impl NameParser for BasicNameParser {
    fn parse(&mut self, name: &str) -> ParsedName {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        let Some((head, rest)) = tokens.split_first() else {
            return ParsedName::default();
        };
        if !is_uninomial(head) {
            return ParsedName::default();
        }

        let mut full = vec![head.to_string()];
        let mut simple = vec![head.to_string()];
        let mut stemmed = vec![head.to_string()];
        let mut position = 0;
        while position < rest.len() {
            let token = rest[position];
            let next = rest.get(position + 1).copied();
            if position == 0 && is_subgenus(token) && next.is_some_and(is_epithet) {
                position += 1;
                continue;
            }
            if RANK_MARKERS.contains(&token) && simple.len() > 1 && next.is_some_and(is_epithet)
            {
                full.push(token.to_string());
                position += 1;
                continue;
            }
            if !is_epithet(token) {
                break;
            }
            full.push(token.to_string());
            simple.push(token.to_string());
            stemmed.push(stem(token));
            position += 1;
        }

        ParsedName {
            parsed: true,
            canonical_full: full.join(" "),
            canonical_simple: simple.join(" "),
            canonical_stemmed: stemmed.join(" "),
            has_authorship: position < rest.len(),
        }
    }
}

fn is_uninomial(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_uppercase()
        && token.chars().count() > 1
        && chars.all(|c| c.is_lowercase() || c == '-')
}

fn is_subgenus(token: &str) -> bool {
    token
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .is_some_and(is_uninomial)
}

fn is_epithet(token: &str) -> bool {
    token.chars().count() > 1
        && !AUTHOR_PARTICLES.contains(&token)
        && token.chars().next().is_some_and(char::is_lowercase)
        && token.chars().all(|c| c.is_lowercase() || c == '-')
}

/// Latin suffix stripping in the manner of the Schinke stemmer; the stem
/// keeps at least two characters.
pub fn stem(word: &str) -> String {
    for suffix in SUFFIXES {
        if let Some(root) = word.strip_suffix(suffix)
            && root.chars().count() >= 2
        {
            return root.to_string();
        }
    }
    word.to_string()
}

/// Fixed set of parsers handed out to concurrent workers.
pub struct ParserPool<P> {
    tx: Sender<P>,
    rx: Receiver<P>,
    size: usize,
}

impl<P: NameParser> ParserPool<P> {
    pub fn new(size: usize, factory: impl Fn() -> P) -> Self {
        let size = size.max(1);
        let (tx, rx) = bounded(size);
        for _ in 0..size {
            let _ = tx.send(factory());
        }
        Self { tx, rx, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Blocks until a parser is free. The parser goes back to the pool when
    /// the guard is dropped.
    pub fn checkout(&self) -> Result<PooledParser<'_, P>, DwcaError> {
        let parser = self.rx.recv().map_err(|_| DwcaError::Cancelled)?;
        Ok(PooledParser {
            parser: Some(parser),
            pool: self,
        })
    }
}

impl ParserPool<BasicNameParser> {
    pub fn basic(size: usize) -> Self {
        Self::new(size, BasicNameParser::new)
    }
}

pub struct PooledParser<'a, P> {
    parser: Option<P>,
    pool: &'a ParserPool<P>,
}

impl<P> Deref for PooledParser<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        match &self.parser {
            Some(parser) => parser,
            None => unreachable!("parser is only taken on drop"),
        }
    }
}

impl<P> DerefMut for PooledParser<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        match &mut self.parser {
            Some(parser) => parser,
            None => unreachable!("parser is only taken on drop"),
        }
    }
}

impl<P> Drop for PooledParser<'_, P> {
    fn drop(&mut self) {
        if let Some(parser) = self.parser.take() {
            let _ = self.pool.tx.try_send(parser);
        }
    }
}
