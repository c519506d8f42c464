//! Rule-based scanner built on an ordered list of regular expressions.
//!
//! Each rule is tried against the start of the buffer in declaration order
//! and the first rule that matches wins, so rule order matters. A rule
//! without a state consumes its match silently; use such rules for
//! whitespace and for recovering from unexpected input. Nothing else skips
//! bytes.
//!
//! Matching runs on raw bytes, so buffers holding invalid UTF-8 are matched
//! and consumed byte-exactly.

use std::fmt;

use bytes::Bytes;
use regex::bytes::{Regex as Pattern, RegexBuilder};

use crate::core::event::{Event, RegexMatch, Tag};
use crate::scan::{ScanTarget, Scanner};

/// Compile options applied to every rule of a [`Regex`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexOptions {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

/// One `(pattern, state, aux...)` rule.
#[derive(Clone)]
pub struct Rule {
    source: String,
    state: Option<Tag>,
    aux: Vec<String>,
}

impl Rule {
    pub fn new(pattern: impl Into<String>, state: Option<&str>) -> Self {
        Self {
            source: pattern.into(),
            state: state.map(Tag::from),
            aux: Vec::new(),
        }
    }

    /// A rule whose matches are consumed without a callout.
    pub fn skip(pattern: impl Into<String>) -> Self {
        Self::new(pattern, None)
    }

    pub fn with_aux<I, S>(mut self, aux: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aux = aux.into_iter().map(Into::into).collect();
        self
    }
}

struct CompiledRule {
    pattern: Pattern,
    state: Option<Tag>,
    aux: Vec<String>,
}

/// Ordered regex rule scanner. Immutable once built.
pub struct Regex {
    rules: Vec<CompiledRule>,
}

impl Regex {
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Result<Self, regex::Error> {
        Self::with_options(rules, RegexOptions::default())
    }

    pub fn with_options(
        rules: impl IntoIterator<Item = Rule>,
        options: RegexOptions,
    ) -> Result<Self, regex::Error> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                // \A pins the match to the buffer start even in multi-line mode.
                let pattern = RegexBuilder::new(&format!(r"\A(?:{})", rule.source))
                    .case_insensitive(options.case_insensitive)
                    .multi_line(options.multi_line)
                    .dot_matches_new_line(options.dot_matches_new_line)
                    .build()?;
                Ok(CompiledRule {
                    pattern,
                    state: rule.state,
                    aux: rule.aux,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.pattern.as_str()))
            .finish()
    }
}

impl Scanner for Regex {
    fn scan(&mut self, target: &mut ScanTarget<'_>) -> bool {
        tracing::trace!(buffered = target.len(), "regex scan");
        for (index, rule) in self.rules.iter().enumerate() {
            let Some(captures) = rule.pattern.captures(target.buffer()) else {
                continue;
            };
            let end = captures.get(0).map_or(0, |m| m.end());
            // An empty match would report progress without consuming anything.
            if end == 0 {
                continue;
            }
            let spans: Vec<Option<(usize, usize)>> = captures
                .iter()
                .skip(1)
                .map(|g| g.map(|m| (m.start(), m.end())))
                .collect();

            let matched = target.consume(end);
            match &rule.state {
                Some(state) => {
                    let groups = spans
                        .into_iter()
                        .map(|span| span.map(|(start, end)| matched.slice(start..end)))
                        .collect();
                    target.callout(Event::Match(RegexMatch {
                        state: state.clone(),
                        rule: index,
                        matched,
                        groups,
                        aux: rule.aux.clone(),
                    }));
                }
                None => tracing::trace!(rule = index, len = end, "match discarded"),
            }
            return true;
        }
        false
    }
}

/// A capture group as UTF-8, when it participated and decodes.
pub fn group_str(group: &Option<Bytes>) -> Option<&str> {
    group.as_ref().and_then(|g| std::str::from_utf8(g).ok())
}
