//! Minimal CSS selector engine for walk filters
//!
//! Supported grammar (a strict subset of CSS, so the same strings work with
//! `document.querySelectorAll` inside the page):
//!
//! ```text
//! list      := complex ( ',' complex )*
//! complex   := compound ( ( ' ' | '>' ) compound )*
//! compound  := ( tag | '*' )? ( '#' id | '.' class | '[' attr ( '=' value )? ']' )*
//! ```

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::{DomNode, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

impl Compound {
    fn matches(&self, node: &DomNode) -> bool {
        if !node.is_element() {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !node.node_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self
            .classes
            .iter()
            .all(|class| node.classes().any(|c| c == class))
        {
            return false;
        }
        self.attrs.iter().all(|attr| match (&attr.value, node.attr(&attr.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        })
    }
}

/// `compounds[i]` and `compounds[i + 1]` are joined by `combinators[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<Compound>,
    combinators: Vec<Combinator>,
}

impl ComplexSelector {
    fn matches_at(&self, arena: &DomArena, node_id: NodeId, index: usize) -> bool {
        let Ok(node) = arena.get(node_id) else {
            return false;
        };
        if !self.compounds[index].matches(node) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match self.combinators[index - 1] {
            Combinator::Child => node
                .parent_id
                .is_some_and(|parent| self.matches_at(arena, parent, index - 1)),
            Combinator::Descendant => {
                let mut current = node.parent_id;
                while let Some(ancestor) = current {
                    if self.matches_at(arena, ancestor, index - 1) {
                        return true;
                    }
                    current = arena.get(ancestor).ok().and_then(|n| n.parent_id);
                }
                false
            }
        }
    }
}

/// A parsed, comma-separated selector list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    /// Parse a single selector string (may itself contain commas)
    pub fn parse(input: &str) -> Result<Self> {
        Parser::new(input).parse_list()
    }

    /// Parse several selector strings into one list that matches if any does
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Self> {
        let mut selectors = Vec::new();
        for input in inputs {
            selectors.extend(Self::parse(input.as_ref())?.selectors);
        }
        Ok(Self { selectors })
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Does any selector in the list match the node?
    pub fn matches(&self, arena: &DomArena, node_id: NodeId) -> bool {
        self.selectors
            .iter()
            .any(|s| s.matches_at(arena, node_id, s.compounds.len() - 1))
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DomError {
        DomError::InvalidSelector {
            selector: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Returns true if any whitespace was consumed
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected `{}` at offset {}", expected, self.pos)))
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_ident_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error(format!("expected identifier at offset {}", start)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_list(&mut self) -> Result<SelectorList> {
        let mut selectors = Vec::new();
        loop {
            self.skip_ws();
            selectors.push(self.parse_complex()?);
            self.skip_ws();
            if self.eof() {
                break;
            }
            self.expect(',')?;
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let had_ws = self.skip_ws();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_ws => combinators.push(Combinator::Descendant),
                Some(c) => return Err(self.error(format!("unexpected `{}`", c))),
            }
            compounds.push(self.parse_compound()?);
        }

        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound> {
        let start = self.pos;
        let mut compound = Compound::default();

        match self.peek() {
            Some('*') => self.pos += 1,
            Some(c) if Self::is_ident_char(c) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error(format!("expected selector at offset {}", start)));
        }
        Ok(compound)
    }

    fn parse_attr(&mut self) -> Result<AttrSelector> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();

        let value = if self.peek() == Some('=') {
            self.pos += 1;
            self.skip_ws();
            Some(match self.peek() {
                Some(quote @ ('"' | '\'')) => {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != quote) {
                        self.pos += 1;
                    }
                    let value: String = self.chars[start..self.pos].iter().collect();
                    self.expect(quote)?;
                    value
                }
                _ => self.ident()?,
            })
        } else {
            None
        };

        self.skip_ws();
        self.expect(']')?;
        Ok(AttrSelector { name, value })
    }
}
