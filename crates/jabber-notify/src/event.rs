//! Job execution data handed over by the host.

use serde_json::{Map, Value};

/// Job reference used to derive a display path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRef {
    pub name: String,
    pub group_path: Option<String>,
}

impl JobRef {
    pub fn new(name: impl Into<String>, group_path: Option<String>) -> Self {
        Self {
            name: name.into(),
            group_path,
        }
    }

    /// `group/name`, or `name` when the group is absent or blank.
    pub fn display_path(&self) -> String {
        match self.group_path.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => format!("{group}/{}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// A triggered job execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionEvent {
    pub user: String,
    pub href: String,
    pub job: JobRef,
}

impl ExecutionEvent {
    pub fn new(user: impl Into<String>, href: impl Into<String>, job: JobRef) -> Self {
        Self {
            user: user.into(),
            href: href.into(),
            job,
        }
    }

    /// Best-effort extraction from the host's execution data map.
    ///
    /// Missing or non-string entries become empty strings; a missing or
    /// non-object `job` yields an empty [`JobRef`].
    pub fn from_execution_data(data: &Map<String, Value>) -> Self {
        let job = data
            .get("job")
            .and_then(Value::as_object)
            .map(|job| JobRef {
                name: render(job.get("name")),
                group_path: job
                    .get("group")
                    .filter(|v| !v.is_null())
                    .map(|v| render(Some(v))),
            })
            .unwrap_or_default();

        Self {
            user: render(data.get("user")),
            href: render(data.get("href")),
            job,
        }
    }
}

/// String form of a loosely typed value; strings are taken verbatim.
fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
