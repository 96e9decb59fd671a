use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::StoreError;

/// Open key-value record shape shared by bookmarks and sessions.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn to_value(&self) -> Value {
        json!({ "role": self.role.as_str(), "content": self.content })
    }
}

fn require_string(fields: &Fields, key: &str, kind: &'static str) -> Result<(), StoreError> {
    match fields.get(key) {
        Some(Value::String(_)) => Ok(()),
        Some(other) => Err(StoreError::InvalidRecord {
            kind,
            message: format!("`{key}` must be a string, found {other}"),
        }),
        None => Err(StoreError::InvalidRecord {
            kind,
            message: format!("missing required field `{key}`"),
        }),
    }
}

fn str_field<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// A saved document. Any fields are kept verbatim; only `title` is required.
///
/// Equality is structural over all fields, which is what bookmark
/// de-duplication relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields", into = "Fields")]
pub struct Bookmark {
    fields: Fields,
}

impl Bookmark {
    pub fn new(title: impl Into<String>) -> Self {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), Value::String(title.into()));
        Self { fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        // The required title cannot be replaced by a non-string.
        let value = value.into();
        if key != "title" || value.is_string() {
            self.fields.insert(key, value);
        }
        self
    }

    pub fn title(&self) -> &str {
        str_field(&self.fields, "title").unwrap_or_default()
    }

    pub fn content(&self) -> Option<&str> {
        str_field(&self.fields, "content")
    }

    pub fn doc_type(&self) -> Option<&str> {
        str_field(&self.fields, "type")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

impl TryFrom<Fields> for Bookmark {
    type Error = StoreError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        require_string(&fields, "title", "bookmark")?;
        Ok(Self { fields })
    }
}

impl TryFrom<Value> for Bookmark {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            other => Err(StoreError::InvalidRecord {
                kind: "bookmark",
                message: format!("expected an object, found {other}"),
            }),
        }
    }
}

impl From<Bookmark> for Fields {
    fn from(bookmark: Bookmark) -> Self {
        bookmark.fields
    }
}

/// A named conversation snapshot. Only `name` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields", into = "Fields")]
pub struct Session {
    fields: Fields,
}

impl Session {
    /// Snapshot `messages` under `name`.
    pub fn new(name: impl Into<String>, messages: &[Message]) -> Self {
        let mut fields = Fields::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        fields.insert(
            "messages".to_string(),
            Value::Array(messages.iter().map(Message::to_value).collect()),
        );
        Self { fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key != "name" || value.is_string() {
            self.fields.insert(key, value);
        }
        self
    }

    pub fn name(&self) -> &str {
        str_field(&self.fields, "name").unwrap_or_default()
    }

    /// Messages stored in the snapshot. Entries that are not well-formed
    /// messages are left out.
    pub fn messages(&self) -> Vec<Message> {
        self.fields
            .get("messages")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

impl TryFrom<Fields> for Session {
    type Error = StoreError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        require_string(&fields, "name", "session")?;
        Ok(Self { fields })
    }
}

impl TryFrom<Value> for Session {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            other => Err(StoreError::InvalidRecord {
                kind: "session",
                message: format!("expected an object, found {other}"),
            }),
        }
    }
}

impl From<Session> for Fields {
    fn from(session: Session) -> Self {
        session.fields
    }
}

/// The three record sequences a store owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    pub history: Vec<Message>,
    pub bookmarks: Vec<Bookmark>,
    pub sessions: Vec<Session>,
}

impl Records {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.bookmarks.is_empty() && self.sessions.is_empty()
    }
}
