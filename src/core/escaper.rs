//! Backend-aware literal and identifier escaping
//!
//! Every piece of SQL text the toolkit emits goes through an [`Escaper`].
//! Values become literals, names become quoted identifiers.

use super::agent::Agent;
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use chrono::DateTime;

/// Format applied by a `%`-prefixed format hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hint {
    Integer,
    Float(Option<usize>),
    String,
    Raw,
    Identifier,
}

impl Hint {
    fn parse(hint: &str) -> Result<Self> {
        match hint {
            "%i" | "%d" => Ok(Hint::Integer),
            "%f" => Ok(Hint::Float(None)),
            "%s" => Ok(Hint::String),
            "%r" => Ok(Hint::Raw),
            "%n" => Ok(Hint::Identifier),
            _ => hint
                .strip_prefix("%.")
                .and_then(|rest| rest.strip_suffix('f'))
                .and_then(|digits| digits.parse::<usize>().ok())
                .map(|precision| Hint::Float(Some(precision)))
                .ok_or_else(|| {
                    DatabaseError::unsupported_value(format!("unknown format hint '{}'", hint))
                }),
        }
    }
}

/// Converts values and names into backend-safe SQL text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escaper {
    agent: Agent,
}

impl Escaper {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> Agent {
        self.agent
    }

    /// Render `value` as a literal
    ///
    /// A `hint` starting with `%` (`%i`, `%d`, `%f`, `%.2f`, `%s`, `%r`, `%n`)
    /// selects a format-specific rendering instead of the generic rules.
    /// Any other hint is ignored.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::UnsupportedValue`] when the value has no rendering,
    /// e.g. a NaN float, a nested list or an empty list.
    pub fn escape_value(&self, value: &DatabaseValue, hint: Option<&str>) -> Result<String> {
        match hint.filter(|h| h.starts_with('%')) {
            Some(hint) => self.escape_with_hint(value, Hint::parse(hint)?),
            None => self.escape_generic(value),
        }
    }

    fn escape_generic(&self, value: &DatabaseValue) -> Result<String> {
        match value {
            DatabaseValue::Null => Ok("NULL".to_string()),
            DatabaseValue::Bool(b) => Ok(self.render_bool(*b)),
            DatabaseValue::Int(v) => Ok(v.to_string()),
            DatabaseValue::Long(v) => Ok(v.to_string()),
            DatabaseValue::Float(v) => render_f32(*v, None),
            DatabaseValue::Double(v) => render_f64(*v, None),
            DatabaseValue::String(s) => self.quote(s),
            DatabaseValue::Bytes(b) => Ok(self.render_bytes(b)),
            DatabaseValue::Timestamp(micros) => self.render_timestamp(*micros),
            DatabaseValue::List(items) => {
                self.join_list(items, |item| self.escape_generic(item))
            }
            DatabaseValue::Raw(sql) => Ok(sql.clone()),
        }
    }

    fn escape_with_hint(&self, value: &DatabaseValue, hint: Hint) -> Result<String> {
        if let DatabaseValue::List(items) = value {
            return self.join_list(items, |item| self.escape_with_hint(item, hint));
        }
        if value.is_null() && hint != Hint::Identifier {
            return Ok("NULL".to_string());
        }

        match hint {
            Hint::Integer => self.render_integer(value),
            Hint::Float(precision) => self.render_float(value, precision),
            Hint::String => match value {
                DatabaseValue::String(s) | DatabaseValue::Raw(s) => self.quote(s),
                DatabaseValue::Bytes(_) => Err(DatabaseError::unsupported_value(
                    "bytes cannot be rendered as %s",
                )),
                other => self.quote(&other.as_string()),
            },
            Hint::Raw => match value {
                DatabaseValue::String(s) | DatabaseValue::Raw(s) => Ok(s.clone()),
                other => self.escape_generic(other),
            },
            Hint::Identifier => match value {
                DatabaseValue::String(s) | DatabaseValue::Raw(s) => {
                    Ok(self.escape_identifier(s))
                }
                other => Err(DatabaseError::unsupported_value(format!(
                    "{} cannot be used as an identifier",
                    other.type_name()
                ))),
            },
        }
    }

    fn join_list<F>(&self, items: &[DatabaseValue], render: F) -> Result<String>
    where
        F: Fn(&DatabaseValue) -> Result<String>,
    {
        if items.is_empty() {
            return Err(DatabaseError::unsupported_value("empty list"));
        }
        let rendered = items
            .iter()
            .map(|item| match item {
                DatabaseValue::List(_) => {
                    Err(DatabaseError::unsupported_value("nested list"))
                }
                other => render(other),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join(", "))
    }

    fn render_bool(&self, b: bool) -> String {
        match (self.agent, b) {
            (Agent::Postgres, true) => "TRUE".to_string(),
            (Agent::Postgres, false) => "FALSE".to_string(),
            (_, true) => "1".to_string(),
            (_, false) => "0".to_string(),
        }
    }

    fn render_integer(&self, value: &DatabaseValue) -> Result<String> {
        let n = match value {
            DatabaseValue::Bool(b) => i64::from(*b),
            DatabaseValue::Int(v) => i64::from(*v),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => *v,
            DatabaseValue::Float(v) if v.is_finite() => *v as i64,
            DatabaseValue::Double(v) if v.is_finite() => *v as i64,
            DatabaseValue::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                    .ok_or_else(|| {
                        DatabaseError::unsupported_value(format!("'{}' is not an integer", s))
                    })?
            }
            other => {
                return Err(DatabaseError::unsupported_value(format!(
                    "{} cannot be rendered as an integer",
                    other.type_name()
                )))
            }
        };
        Ok(n.to_string())
    }

    fn render_float(&self, value: &DatabaseValue, precision: Option<usize>) -> Result<String> {
        match value {
            DatabaseValue::Float(v) => render_f32(*v, precision),
            DatabaseValue::Double(v) => render_f64(*v, precision),
            DatabaseValue::Int(v) => render_f64(f64::from(*v), precision),
            DatabaseValue::Long(v) => render_f64(*v as f64, precision),
            DatabaseValue::Bool(b) => render_f64(f64::from(u8::from(*b)), precision),
            DatabaseValue::String(s) => {
                let parsed = s.trim().parse::<f64>().map_err(|_| {
                    DatabaseError::unsupported_value(format!("'{}' is not a number", s))
                })?;
                render_f64(parsed, precision)
            }
            other => Err(DatabaseError::unsupported_value(format!(
                "{} cannot be rendered as a float",
                other.type_name()
            ))),
        }
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        match self.agent {
            Agent::Postgres => format!("'\\x{}'::bytea", hex),
            Agent::Mysql | Agent::Sqlite => format!("X'{}'", hex),
        }
    }

    fn render_timestamp(&self, micros: i64) -> Result<String> {
        let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            DatabaseError::unsupported_value(format!("timestamp {} is out of range", micros))
        })?;
        Ok(format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f")))
    }

    /// Escape a string with the backend's native rules and wrap it in single quotes
    pub fn quote(&self, s: &str) -> Result<String> {
        Ok(format!("'{}'", self.escape_string(s)?))
    }

    /// Escape a string without adding quotes
    pub fn escape_string(&self, s: &str) -> Result<String> {
        match self.agent {
            Agent::Mysql => {
                let mut out = String::with_capacity(s.len() + 8);
                for c in s.chars() {
                    match c {
                        '\0' => out.push_str("\\0"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\x1a' => out.push_str("\\Z"),
                        c => out.push(c),
                    }
                }
                Ok(out)
            }
            Agent::Postgres if s.contains('\0') => Err(DatabaseError::unsupported_value(
                "PostgreSQL strings cannot contain NUL bytes",
            )),
            Agent::Postgres | Agent::Sqlite => Ok(s.replace('\'', "''")),
        }
    }

    /// Escape `%`, `_` and `\` so a user-supplied string matches literally inside LIKE
    pub fn escape_like(&self, pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() + 4);
        for c in pattern.chars() {
            if matches!(c, '%' | '_' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    /// Quote a table or column name
    ///
    /// `*` passes through. Dotted names are quoted per component, so
    /// `users.id` becomes `` `users`.`id` `` on MySQL.
    pub fn escape_identifier(&self, identifier: &str) -> String {
        let quote = self.agent.identifier_quote();
        identifier
            .trim()
            .split('.')
            .map(|part| {
                let part = part.trim();
                if part == "*" {
                    part.to_string()
                } else {
                    let doubled = format!("{}{}", quote, quote);
                    format!("{}{}{}", quote, part.replace(quote, &doubled), quote)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a list of names and join them with `, `
    pub fn escape_identifiers<S: AsRef<str>>(&self, identifiers: &[S]) -> String {
        identifiers
            .iter()
            .map(|i| self.escape_identifier(i.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn render_f64(v: f64, precision: Option<usize>) -> Result<String> {
    if !v.is_finite() {
        return Err(DatabaseError::unsupported_value(format!(
            "non-finite float {}",
            v
        )));
    }
    Ok(match precision {
        Some(p) => format!("{:.*}", p, v),
        None => v.to_string(),
    })
}

fn render_f32(v: f32, precision: Option<usize>) -> Result<String> {
    if !v.is_finite() {
        return Err(DatabaseError::unsupported_value(format!(
            "non-finite float {}",
            v
        )));
    }
    Ok(match precision {
        Some(p) => format!("{:.*}", p, v),
        None => v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql() -> Escaper {
        Escaper::new(Agent::Mysql)
    }

    fn postgres() -> Escaper {
        Escaper::new(Agent::Postgres)
    }

    #[test]
    fn test_scalars() {
        let e = mysql();
        assert_eq!(e.escape_value(&DatabaseValue::Null, None).unwrap(), "NULL");
        assert_eq!(e.escape_value(&true.into(), None).unwrap(), "1");
        assert_eq!(e.escape_value(&false.into(), None).unwrap(), "0");
        assert_eq!(e.escape_value(&42.into(), None).unwrap(), "42");
        assert_eq!(e.escape_value(&(-7i64).into(), None).unwrap(), "-7");
        assert_eq!(e.escape_value(&0.5f64.into(), None).unwrap(), "0.5");
        assert_eq!(e.escape_value(&"a".into(), None).unwrap(), "'a'");
    }

    #[test]
    fn test_list() {
        let value = DatabaseValue::List(vec![1.into(), "a".into()]);
        assert_eq!(mysql().escape_value(&value, None).unwrap(), "1, 'a'");

        let nested = DatabaseValue::List(vec![DatabaseValue::List(vec![1.into()])]);
        assert!(matches!(
            mysql().escape_value(&nested, None),
            Err(DatabaseError::UnsupportedValue(_))
        ));
        assert!(mysql()
            .escape_value(&DatabaseValue::List(Vec::new()), None)
            .is_err());
    }

    #[test]
    fn test_raw_bypasses_escaping() {
        let value = DatabaseValue::raw("NOW()");
        assert_eq!(mysql().escape_value(&value, None).unwrap(), "NOW()");
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        let err = mysql()
            .escape_value(&f64::NAN.into(), None)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UnsupportedValue(_)));
    }

    #[test]
    fn test_mysql_string_escaping() {
        let e = mysql();
        assert_eq!(
            e.escape_value(&"O'Reilly".into(), None).unwrap(),
            "'O\\'Reilly'"
        );
        assert_eq!(
            e.escape_value(&"a\\b\n\"c\"\0".into(), None).unwrap(),
            "'a\\\\b\\n\\\"c\\\"\\0'"
        );
    }

    #[test]
    fn test_postgres_string_escaping() {
        let e = postgres();
        assert_eq!(
            e.escape_value(&"O'Reilly".into(), None).unwrap(),
            "'O''Reilly'"
        );
        assert_eq!(e.escape_value(&"a\\b".into(), None).unwrap(), "'a\\b'");
        assert!(e.escape_value(&"nul\0".into(), None).is_err());
        assert_eq!(e.escape_value(&true.into(), None).unwrap(), "TRUE");
    }

    #[test]
    fn test_bytes_and_timestamp() {
        let bytes = DatabaseValue::Bytes(vec![0x0a, 0xff]);
        assert_eq!(mysql().escape_value(&bytes, None).unwrap(), "X'0AFF'");
        assert_eq!(
            postgres().escape_value(&bytes, None).unwrap(),
            "'\\x0AFF'::bytea"
        );

        let ts = DatabaseValue::Timestamp(1_700_000_000_000_000);
        assert_eq!(
            mysql().escape_value(&ts, None).unwrap(),
            "'2023-11-14 22:13:20.000000'"
        );
    }

    #[test]
    fn test_format_hints() {
        let e = mysql();
        assert_eq!(e.escape_value(&"42".into(), Some("%i")).unwrap(), "42");
        assert_eq!(e.escape_value(&3.9f64.into(), Some("%d")).unwrap(), "3");
        assert_eq!(e.escape_value(&"1.5".into(), Some("%f")).unwrap(), "1.5");
        assert_eq!(
            e.escape_value(&2.0f64.into(), Some("%.2f")).unwrap(),
            "2.00"
        );
        assert_eq!(e.escape_value(&5.into(), Some("%s")).unwrap(), "'5'");
        assert_eq!(
            e.escape_value(&"COUNT(*)".into(), Some("%r")).unwrap(),
            "COUNT(*)"
        );
        assert_eq!(
            e.escape_value(&"users.name".into(), Some("%n")).unwrap(),
            "`users`.`name`"
        );
        assert_eq!(
            e.escape_value(&DatabaseValue::list(vec!["1", "2"]), Some("%i"))
                .unwrap(),
            "1, 2"
        );
        assert_eq!(e.escape_value(&DatabaseValue::Null, Some("%i")).unwrap(), "NULL");
        // hints without a sigil are ignored
        assert_eq!(e.escape_value(&"x".into(), Some("int")).unwrap(), "'x'");
    }

    #[test]
    fn test_bad_hint_input() {
        let e = mysql();
        assert!(matches!(
            e.escape_value(&"abc".into(), Some("%i")),
            Err(DatabaseError::UnsupportedValue(_))
        ));
        assert!(e.escape_value(&1.into(), Some("%q")).is_err());
        assert!(e.escape_value(&1.into(), Some("%n")).is_err());
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(mysql().escape_identifier("users"), "`users`");
        assert_eq!(mysql().escape_identifier("*"), "*");
        assert_eq!(mysql().escape_identifier("u.*"), "`u`.*");
        assert_eq!(mysql().escape_identifier("we`ird"), "`we``ird`");
        assert_eq!(
            postgres().escape_identifier("public.users"),
            "\"public\".\"users\""
        );
        assert_eq!(
            mysql().escape_identifiers(&["id", "users.name"]),
            "`id`, `users`.`name`"
        );
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(mysql().escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
