use std::fmt;

use serde::{Deserialize, Serialize};

/// Portal-side identifier of a roster entry; the API has used both numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RosterEntryId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RosterEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RosterEntryId::Number(n) => write!(f, "{n}"),
            RosterEntryId::Text(s) => f.write_str(s),
        }
    }
}

/// A practitioner as listed by the portal's roster API.
///
/// Fields this service does not use are kept so `/get-roasters` returns them untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub roster_entry_id: RosterEntryId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub display_birth_date: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Roster entry as served to callers, with the derived display name.
#[derive(Debug, Clone, Serialize)]
pub struct NamedRosterEntry {
    #[serde(flatten)]
    pub entry: RosterEntry,
    pub name: String,
}

fn part(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

impl RosterEntry {
    /// "Last, First Middle, Suffix", skipping empty parts.
    pub fn display_name(&self) -> String {
        let mut name = String::new();
        if !part(&self.last_name).is_empty() {
            name.push_str(part(&self.last_name));
            name.push_str(", ");
        }
        if !part(&self.first_name).is_empty() {
            name.push_str(part(&self.first_name));
            name.push(' ');
        }
        if !part(&self.middle_name).is_empty() {
            name.push_str(part(&self.middle_name));
        }
        if !part(&self.suffix).is_empty() {
            name.push_str(", ");
            name.push_str(part(&self.suffix));
        }
        name
    }

    /// The string callers must type to select this entry.
    pub fn match_key(&self) -> String {
        format!(
            "{}, {} {}",
            part(&self.last_name),
            part(&self.first_name),
            part(&self.middle_name)
        )
        .trim()
        .to_string()
    }

    pub fn matches(&self, username: &str, birth_date: &str) -> bool {
        self.match_key() == username && self.display_birth_date.as_deref() == Some(birth_date)
    }

    pub fn with_name(self) -> NamedRosterEntry {
        let name = self.display_name();
        NamedRosterEntry { entry: self, name }
    }
}

/// Exact match on name and displayed birth date; first match wins.
pub fn find_entry<'a>(
    roster: &'a [RosterEntry],
    username: &str,
    birth_date: &str,
) -> Option<&'a RosterEntry> {
    roster.iter().find(|e| e.matches(username, birth_date))
}
