use crate::core::agent::Agent;

/// Kind of placeholder found in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// `:name`
    Named(String),
    /// `?`
    Positional,
    /// `%s`, `%i`, `%d`, `%f`, `%r` or `%n`; holds the type letter
    Typed(char),
    /// `%%`, rendered as a literal `%`
    Percent,
}

/// One placeholder occurrence, located by byte offset and length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

impl Token {
    /// Whether the token consumes a positional parameter
    pub fn is_positional(&self) -> bool {
        matches!(self.kind, TokenKind::Positional | TokenKind::Typed(_))
    }

    /// Whether the token takes a parameter at all
    pub fn is_placeholder(&self) -> bool {
        !matches!(self.kind, TokenKind::Percent)
    }
}

pub(super) const TYPE_LETTERS: [u8; 6] = [b's', b'i', b'd', b'f', b'r', b'n'];

#[derive(Clone, Copy)]
enum State {
    Normal,
    Quoted(u8),
    LineComment,
    BlockComment(u32),
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Scan `sql` once, left to right, and return its placeholders in order.
///
/// Quoted strings, quoted identifiers and comments are skipped. `::` casts
/// and `:=` assignments are not placeholders, and `%%` is returned as a
/// [`TokenKind::Percent`] escape.
pub(super) fn tokenize(sql: &str, agent: Agent) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let backslash_escapes = matches!(agent, Agent::Mysql);
    let mut tokens = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' | b'"' | b'`' => state = State::Quoted(b),
                b'-' if bytes.get(idx + 1) == Some(&b'-') => state = State::LineComment,
                b'#' if backslash_escapes => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'?' => tokens.push(Token {
                    kind: TokenKind::Positional,
                    offset: idx,
                    len: 1,
                }),
                b'%' if bytes.get(idx + 1) == Some(&b'%') => {
                    tokens.push(Token {
                        kind: TokenKind::Percent,
                        offset: idx,
                        len: 2,
                    });
                    idx += 1;
                }
                b'%' => {
                    if let Some(&letter) = bytes.get(idx + 1) {
                        let boundary = bytes.get(idx + 2).map_or(true, |&next| !is_word(next));
                        if TYPE_LETTERS.contains(&letter) && boundary {
                            tokens.push(Token {
                                kind: TokenKind::Typed(letter as char),
                                offset: idx,
                                len: 2,
                            });
                            idx += 1;
                        }
                    }
                }
                b':' => {
                    if bytes.get(idx + 1) == Some(&b':') {
                        // cast operator, skip both colons
                        idx += 1;
                    } else if bytes
                        .get(idx + 1)
                        .is_some_and(|&next| next.is_ascii_alphabetic() || next == b'_')
                    {
                        let start = idx + 1;
                        let mut end = start;
                        while end < bytes.len() && is_word(bytes[end]) {
                            end += 1;
                        }
                        tokens.push(Token {
                            kind: TokenKind::Named(sql[start..end].to_string()),
                            offset: idx,
                            len: end - idx,
                        });
                        idx = end - 1;
                    }
                }
                _ => {}
            },
            State::Quoted(quote) => {
                if backslash_escapes && b == b'\\' {
                    idx += 1;
                } else if b == quote {
                    if bytes.get(idx + 1) == Some(&quote) {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str, agent: Agent) -> Vec<TokenKind> {
        tokenize(sql, agent).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn finds_all_syntaxes_in_order() {
        let tokens = tokenize("a = :a AND b = ? AND c = %i", Agent::Mysql);
        assert_eq!(
            tokens,
            vec![
                Token {
                    kind: TokenKind::Named("a".to_string()),
                    offset: 4,
                    len: 2
                },
                Token {
                    kind: TokenKind::Positional,
                    offset: 15,
                    len: 1
                },
                Token {
                    kind: TokenKind::Typed('i'),
                    offset: 25,
                    len: 2
                },
            ]
        );
    }

    #[test]
    fn skips_literals_and_comments() {
        let sql = "SELECT '?', \":x\", `%s` -- ?\n/* :y /* ? */ */ FROM t WHERE a = ?";
        assert_eq!(kinds(sql, Agent::Mysql), vec![TokenKind::Positional]);
    }

    #[test]
    fn mysql_backslash_escapes_inside_quotes() {
        let sql = "SELECT 'it\\'s ?' , ?";
        assert_eq!(kinds(sql, Agent::Mysql), vec![TokenKind::Positional]);
    }

    #[test]
    fn postgres_casts_are_not_placeholders() {
        let sql = "SELECT x::int, :name::text FROM t";
        assert_eq!(
            kinds(sql, Agent::Postgres),
            vec![TokenKind::Named("name".to_string())]
        );
    }

    #[test]
    fn assignment_and_slices_are_not_placeholders() {
        assert!(kinds("SET @a := 1", Agent::Mysql).is_empty());
        assert!(kinds("SELECT arr[1:2] FROM t", Agent::Postgres).is_empty());
    }

    #[test]
    fn percent_needs_a_type_letter() {
        assert!(kinds("a % b", Agent::Mysql).is_empty());
        assert!(kinds("a %sx", Agent::Mysql).is_empty());
        assert_eq!(kinds("%n, %r", Agent::Sqlite).len(), 2);
    }

    #[test]
    fn double_percent_is_an_escape() {
        let tokens = tokenize("SELECT 10 %%d, %%%s FROM t", Agent::Mysql);
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Percent, TokenKind::Percent, TokenKind::Typed('s')]
        );
        assert!(!tokens[0].is_placeholder());
        assert!(!tokens[0].is_positional());
    }
}
