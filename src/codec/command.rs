//! Decoded commands and their ordered parameters.

use uuid::Uuid;

use crate::catalog::MessageType;
use crate::error::{Result, TDDebugError};

/// Ordered `name=value` parameters.
///
/// Insertion order is preserved so re-encoding is deterministic. Names may
/// repeat (list-valued fields such as `Arg` are sent as repeated names).
/// Lookups are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    /// Empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder-style append
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Value for `name`, or [`TDDebugError::MissingParameter`]
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| TDDebugError::MissingParameter(name.to_string()))
    }

    /// Value for `name`, or the empty string when absent
    pub fn string_or_default(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    /// Boolean value; absent means `false`, malformed is an error.
    ///
    /// Accepts `true`/`false` in any case and `1`/`0`.
    pub fn bool_or_default(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            None => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(TDDebugError::invalid_value(name, v, "bool")),
        }
    }

    /// Integer value; absent means `0`, malformed is an error
    pub fn int_or_default(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| TDDebugError::invalid_value(name, v, "integer")),
        }
    }

    /// UUID value; absent or malformed is an error
    pub fn uuid(&self, name: &str) -> Result<Uuid> {
        let v = self.require(name)?;
        Uuid::parse_str(v).map_err(|_| TDDebugError::invalid_value(name, v, "uuid"))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no parameters
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A unit of communication: type, ordered parameters, optional correlation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Semantic kind
    pub message_type: MessageType,
    /// Ordered parameters
    pub params: Params,
    /// Correlation ID when this command travels inside an `IdEncapsulatedCommand`
    pub correlation_id: Option<Uuid>,
}

impl Command {
    /// Command with no parameters
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            params: Params::new(),
            correlation_id: None,
        }
    }

    /// Command with parameters
    pub fn with_params(message_type: MessageType, params: Params) -> Self {
        Self {
            message_type,
            params,
            correlation_id: None,
        }
    }

    /// Builder-style parameter append
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(name, value);
        self
    }

    /// Attach a correlation ID; the codec wraps the command when encoding
    pub fn correlated(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_preserve_order_and_repeats() {
        let params = Params::new()
            .with("Name", "dump")
            .with("Arg", "a")
            .with("Arg", "b");
        assert_eq!(params.get("Name"), Some("dump"));
        assert_eq!(params.get_all("Arg"), vec!["a", "b"]);
        let names: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Name", "Arg", "Arg"]);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let params = Params::new().with("Key", "v");
        assert_eq!(params.get("key"), None);
    }

    #[test]
    fn test_bool_defaults_and_errors() {
        let params = Params::new()
            .with("A", "TRUE")
            .with("B", "0")
            .with("C", "notabool");
        assert!(params.bool_or_default("A").unwrap());
        assert!(!params.bool_or_default("B").unwrap());
        assert!(!params.bool_or_default("Missing").unwrap());
        assert!(matches!(
            params.bool_or_default("C"),
            Err(TDDebugError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_int_defaults_and_errors() {
        let params = Params::new().with("Delay", "3").with("Bad", "x");
        assert_eq!(params.int_or_default("Delay").unwrap(), 3);
        assert_eq!(params.int_or_default("Missing").unwrap(), 0);
        assert!(params.int_or_default("Bad").is_err());
    }

    #[test]
    fn test_uuid_parsing() {
        let id = Uuid::new_v4();
        let params = Params::new().with("ID", id.to_string()).with("Bad", "nope");
        assert_eq!(params.uuid("ID").unwrap(), id);
        assert!(matches!(
            params.uuid("Bad"),
            Err(TDDebugError::InvalidValue { .. })
        ));
        assert!(matches!(
            params.uuid("Missing"),
            Err(TDDebugError::MissingParameter(_))
        ));
    }
}
