//! Selector engine
//!
//! CSS subset sufficient for the observed page: compound simple selectors
//! (`tag`, `#id`, `.class`, `[attr]`, `[attr=value]`, `*`), the descendant
//! combinator, and comma-separated alternatives. Matching walks right to
//! left; the rightmost compound is exposed separately so callers can run a
//! cheap local test against freshly mutated nodes before paying for a full
//! document scan.

use crate::ElementData;

/// Selector parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("malformed selector: {0}")]
    Malformed(String),
}

/// A parsed selector list (comma-separated alternatives)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Complex>,
    source: String,
}

/// One alternative: compounds joined by descendant combinators
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
}

/// One compound simple selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrTest>,
}

/// `[name]` or `[name=value]` test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrTest {
    pub name: String,
    pub value: Option<String>,
}

impl Compound {
    /// Local (ancestor-free) match against element data
    pub fn matches(&self, elem: &ElementData) -> bool {
        if let Some(tag) = &self.tag {
            if *tag != elem.tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if elem.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        for class in &self.classes {
            if !elem.has_class(class) {
                return false;
            }
        }
        for test in &self.attrs {
            match (elem.attr(&test.name), &test.value) {
                (None, _) => return false,
                (Some(_), None) => {}
                (Some(actual), Some(expected)) => {
                    if actual != expected {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn parse(input: &str) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut chars = input.char_indices().peekable();

        let malformed = || SelectorError::Malformed(input.to_string());

        while let Some(&(start, ch)) = chars.peek() {
            match ch {
                '*' => {
                    chars.next();
                    if start != 0 {
                        return Err(malformed());
                    }
                }
                '#' | '.' => {
                    chars.next();
                    let name = take_name(&mut chars, input);
                    if name.is_empty() {
                        return Err(malformed());
                    }
                    if ch == '#' {
                        compound.id = Some(name);
                    } else {
                        compound.classes.push(name);
                    }
                }
                '[' => {
                    chars.next();
                    let body_start = start + 1;
                    let mut end = None;
                    for (i, c) in chars.by_ref() {
                        if c == ']' {
                            end = Some(i);
                            break;
                        }
                    }
                    let end = end.ok_or_else(malformed)?;
                    let body = &input[body_start..end];
                    compound.attrs.push(parse_attr_test(body, input)?);
                }
                _ => {
                    if start != 0 || compound.tag.is_some() {
                        return Err(malformed());
                    }
                    let name = take_name(&mut chars, input);
                    if name.is_empty() {
                        return Err(malformed());
                    }
                    compound.tag = Some(name.to_ascii_lowercase());
                }
            }
        }
        Ok(compound)
    }
}

fn take_name(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    input: &str,
) -> String {
    let mut name = String::new();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            name.push_str(&input[i..i + c.len_utf8()]);
            chars.next();
        } else {
            break;
        }
    }
    name
}

fn parse_attr_test(body: &str, full: &str) -> Result<AttrTest, SelectorError> {
    let malformed = || SelectorError::Malformed(full.to_string());
    if body.is_empty() {
        return Err(malformed());
    }
    match body.split_once('=') {
        None => Ok(AttrTest {
            name: body.to_string(),
            value: None,
        }),
        Some((name, value)) => {
            if name.is_empty() {
                return Err(malformed());
            }
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Ok(AttrTest {
                name: name.to_string(),
                value: Some(value.to_string()),
            })
        }
    }
}

impl Selector {
    /// Parse a selector list
    pub fn parse(input: &str) -> Result<Selector, SelectorError> {
        let mut alternatives = Vec::new();
        for alt in input.split(',') {
            let alt = alt.trim();
            if alt.is_empty() {
                return Err(SelectorError::Empty);
            }
            let compounds: Vec<Compound> = alt
                .split_whitespace()
                .map(Compound::parse)
                .collect::<Result<_, _>>()?;
            alternatives.push(Complex { compounds });
        }
        if alternatives.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Selector {
            alternatives,
            source: input.to_string(),
        })
    }

    /// The original selector text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Local test of the rightmost compound of any alternative. A true
    /// result is necessary but not sufficient for a full match; callers use
    /// it to decide whether a mutated node could be relevant.
    pub fn rightmost_matches(&self, elem: &ElementData) -> bool {
        self.alternatives.iter().any(|alt| {
            alt.compounds
                .last()
                .is_some_and(|compound| compound.matches(elem))
        })
    }

    /// Full match: the element matches the rightmost compound of an
    /// alternative and `ancestors` (nearest first) cover the rest in order.
    pub(crate) fn matches_with_ancestors<'a, I, F>(&self, elem: &ElementData, ancestors: F) -> bool
    where
        I: Iterator<Item = &'a ElementData>,
        F: Fn() -> I,
    {
        self.alternatives.iter().any(|alt| {
            let Some((last, rest)) = alt.compounds.split_last() else {
                return false;
            };
            if !last.matches(elem) {
                return false;
            }
            let mut idx = rest.len();
            for ancestor in ancestors() {
                if idx == 0 {
                    break;
                }
                if rest[idx - 1].matches(ancestor) {
                    idx -= 1;
                }
            }
            idx == 0
        })
    }
}
