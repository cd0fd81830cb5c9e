//! Row and message types returned by the query executor.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// A single column value, reduced to what the readers need.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Float(v) => Some(*v as i64),
            SqlValue::Bool(b) => Some(*b as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One result row with columns in server order.
///
/// Column lookup is case-insensitive, matching SQL Server's default collation
/// for catalog names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Row::push`].
    pub fn with(mut self, name: &str, value: SqlValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(SqlValue::as_text)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(SqlValue::as_i64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(SqlValue::as_bool)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A message raised by the server while running a batch.
///
/// Number 0 marks an informational message (PRINT, low-severity notices).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub number: u32,
    pub line: u32,
    pub message: String,
}

impl ServerMessage {
    #[cfg(test)]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            number: 0,
            line: 0,
            message: message.into(),
        }
    }

    pub fn is_informational(&self) -> bool {
        self.number == 0
    }
}

/// Raw output of one statement on one server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// First result table only.
    pub rows: Vec<Row>,
    pub messages: Vec<ServerMessage>,
}

impl QueryOutput {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            messages: Vec::new(),
        }
    }
}

/// How to authenticate against each target.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    /// Windows integrated security.
    #[default]
    Integrated,
    /// Explicit SQL login.
    SqlLogin { user: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Integrated => write!(f, "Integrated"),
            Credential::SqlLogin { user, .. } => f
                .debug_struct("SqlLogin")
                .field("user", user)
                .field("password", &"***")
                .finish(),
        }
    }
}
