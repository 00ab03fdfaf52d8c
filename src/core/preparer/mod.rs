//! Placeholder substitution
//!
//! Turns a statement template plus [`Params`] into a literal SQL string.
//! Three placeholder syntaxes may be mixed in one template:
//!
//! | Syntax  | Resolved from        | Rendering                          |
//! |---------|----------------------|------------------------------------|
//! | `:name` | named parameter      | generic escaping                   |
//! | `?`     | next positional      | generic escaping                   |
//! | `%s`    | next positional      | quoted string                      |
//! | `%i`    | next positional      | integer (`%d` is an alias)         |
//! | `%f`    | next positional      | float                              |
//! | `%n`    | next positional      | quoted identifier                  |
//! | `%r`    | next positional      | inserted verbatim, never escaped   |
//!
//! Placeholders inside quoted strings, quoted identifiers and comments are
//! left untouched. Outside them, `%%` renders a literal `%`, so a modulo
//! against a column named after a type letter is written `a %%d`.
//!
//! A colon directly followed by a word always starts a named placeholder.
//! A PostgreSQL array slice such as `arr[lo:hi]` must therefore be written
//! with a space after the colon (`arr[lo: hi]`) or with numeric bounds.

mod scanner;

pub use scanner::{Token, TokenKind};

use super::error::{DatabaseError, Result};
use super::escaper::Escaper;
use super::params::Params;

/// Resolves statement templates against parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preparer {
    escaper: Escaper,
}

impl Preparer {
    pub fn new(escaper: Escaper) -> Self {
        Self { escaper }
    }

    pub fn escaper(&self) -> &Escaper {
        &self.escaper
    }

    /// Placeholders of `template` in order of appearance
    pub fn placeholders(&self, template: &str) -> Vec<Token> {
        scanner::tokenize(template, self.escaper.agent())
    }

    /// Substitute every placeholder of `template`
    ///
    /// A template without placeholders is returned unchanged, whatever `params`
    /// holds. Named values are looked up by key; keys no placeholder uses are
    /// ignored. Positional placeholders consume the positional values in order
    /// and the two counts must match.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::MissingParameter`] for a `:name` without a value
    /// - [`DatabaseError::ParameterCount`] when positional placeholders and
    ///   positional values differ in number
    /// - [`DatabaseError::UnsupportedValue`] from the escaper
    pub fn prepare(&self, template: &str, params: &Params) -> Result<String> {
        let tokens = self.placeholders(template);
        if tokens.is_empty() {
            return Ok(template.to_string());
        }

        let expected = tokens.iter().filter(|t| t.is_positional()).count();
        let positional = params.positional();
        let has_placeholders = tokens.iter().any(Token::is_placeholder);
        if has_placeholders && expected != positional.len() {
            return Err(DatabaseError::parameter_count(
                expected,
                positional.len(),
                template,
            ));
        }

        let mut out = String::with_capacity(template.len() + tokens.len() * 8);
        let mut cursor = 0;
        let mut next = positional.iter();

        for token in &tokens {
            out.push_str(&template[cursor..token.offset]);
            let rendered = match &token.kind {
                TokenKind::Named(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| DatabaseError::missing_parameter(name, template))?;
                    self.escaper.escape_value(value, None)?
                }
                TokenKind::Positional => {
                    // counts were checked above
                    let value = next.next().ok_or_else(|| {
                        DatabaseError::parameter_count(expected, positional.len(), template)
                    })?;
                    self.escaper.escape_value(value, None)?
                }
                TokenKind::Typed(letter) => {
                    let value = next.next().ok_or_else(|| {
                        DatabaseError::parameter_count(expected, positional.len(), template)
                    })?;
                    let hint = format!("%{}", letter);
                    self.escaper.escape_value(value, Some(&hint))?
                }
                TokenKind::Percent => "%".to_string(),
            };
            out.push_str(&rendered);
            cursor = token.offset + token.len;
        }
        out.push_str(&template[cursor..]);

        Ok(out)
    }
}
