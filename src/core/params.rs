//! Parameter collections for statement templates
//!
//! A [`Params`] value carries the ordered positional values consumed by `?`
//! and typed (`%s`, `%i`, ...) placeholders, and the keyed values consumed by
//! `:name` placeholders.

use super::value::DatabaseValue;
use std::collections::HashMap;

/// Positional and named parameters for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<DatabaseValue>,
    named: HashMap<String, DatabaseValue>,
}

impl Params {
    /// Create an empty parameter collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value
    #[must_use]
    pub fn bind(mut self, value: impl Into<DatabaseValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value
    #[must_use]
    pub fn named(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn push(&mut self, value: impl Into<DatabaseValue>) {
        self.positional.push(value.into());
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) {
        self.named.insert(name.into(), value.into());
    }

    /// Positional values in binding order
    pub fn positional(&self) -> &[DatabaseValue] {
        &self.positional
    }

    /// Look up a named value
    pub fn get(&self, name: &str) -> Option<&DatabaseValue> {
        self.named.get(name)
    }

    pub fn named_len(&self) -> usize {
        self.named.len()
    }

    /// Total number of values, positional and named
    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Append all values of `other`; named values of `other` win on conflict
    pub fn extend(&mut self, other: Params) {
        self.positional.extend(other.positional);
        self.named.extend(other.named);
    }
}

impl<T: Into<DatabaseValue>> From<Vec<T>> for Params {
    fn from(values: Vec<T>) -> Self {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: HashMap::new(),
        }
    }
}

impl From<HashMap<String, DatabaseValue>> for Params {
    fn from(named: HashMap<String, DatabaseValue>) -> Self {
        Self {
            positional: Vec::new(),
            named,
        }
    }
}

/// Build a [`Params`] collection
///
/// ```
/// use rust_db_toolkit::params;
///
/// let positional = params![5, "alice"];
/// assert_eq!(positional.positional().len(), 2);
///
/// let named = params! { "id" => 5, "name" => "alice" };
/// assert_eq!(named.named_len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::core::params::Params::new()
    };
    ($($key:literal => $value:expr),+ $(,)?) => {
        $crate::core::params::Params::new()$(.named($key, $value))+
    };
    ($($value:expr),+ $(,)?) => {
        $crate::core::params::Params::new()$(.bind($value))+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_named() {
        let params = Params::new().bind(1).named("name", "bob").bind(true);
        assert_eq!(
            params.positional(),
            &[DatabaseValue::Int(1), DatabaseValue::Bool(true)]
        );
        assert_eq!(
            params.get("name"),
            Some(&DatabaseValue::String("bob".to_string()))
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_macro_forms() {
        assert!(crate::params![].is_empty());

        let params = crate::params![1, "a", 2.5];
        assert_eq!(params.positional().len(), 3);

        let params = crate::params! { "id" => 7 };
        assert_eq!(params.get("id"), Some(&DatabaseValue::Int(7)));
    }

    #[test]
    fn test_extend() {
        let mut params = Params::from(vec![1, 2]);
        params.extend(Params::new().bind(3).named("x", 4));
        assert_eq!(params.positional().len(), 3);
        assert_eq!(params.get("x"), Some(&DatabaseValue::Int(4)));
    }
}
