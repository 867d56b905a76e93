//! Channel directory and name-based exclusion.

use crate::domain::entities::{ChannelIdentity, Dialog};
use std::collections::HashMap;

/// Normalized key (`-100…`) → channel identity, built once per run.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    by_key: HashMap<String, ChannelIdentity>,
}

impl ChannelDirectory {
    /// Build from the dialog list. Dialogs that are not channels are left out.
    pub fn from_dialogs<'a>(dialogs: impl IntoIterator<Item = &'a Dialog>) -> Self {
        let by_key = dialogs
            .into_iter()
            .filter_map(|d| {
                let numeric_id = d.channel_id?;
                let identity = ChannelIdentity {
                    numeric_id,
                    display_name: d.name.clone(),
                    public_handle: d.username.clone(),
                };
                Some((identity.key(), identity))
            })
            .collect();
        Self { by_key }
    }

    pub fn get(&self, key: &str) -> Option<&ChannelIdentity> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Channel-name substrings whose channels are never recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    patterns: Vec<String>,
}

impl ExclusionList {
    /// Parse a comma-separated list. Spaces are removed; empty entries are dropped.
    pub fn parse(raw: &str) -> Self {
        let patterns = raw
            .replace(' ', "")
            .split(',')
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        Self { patterns }
    }

    /// True when the space-stripped display name contains any pattern.
    pub fn excludes(&self, display_name: &str) -> bool {
        let stripped = display_name.replace(' ', "");
        self.patterns.iter().any(|p| stripped.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ChatType;

    fn dialog(dialog_id: i64, channel_id: Option<i64>, name: &str, kind: ChatType) -> Dialog {
        Dialog {
            dialog_id,
            channel_id,
            name: name.into(),
            username: None,
            kind,
        }
    }

    #[test]
    fn directory_keeps_only_channels() {
        let dialogs = vec![
            dialog(-1001111, Some(1111), "News", ChatType::Channel),
            dialog(-1002222, Some(2222), "Chat", ChatType::Supergroup),
            dialog(77, None, "Alice", ChatType::Private),
            dialog(-5, None, "Old group", ChatType::Group),
        ];
        let dir = ChannelDirectory::from_dialogs(&dialogs);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get("-1001111").unwrap().display_name, "News");
        assert!(dir.get("77").is_none());
    }

    #[test]
    fn exclusion_matches_space_stripped_names() {
        let list = ExclusionList::parse("Test, Spam Bot");
        assert_eq!(list.patterns(), ["Test", "SpamBot"]);
        assert!(list.excludes("My Test Channel"));
        assert!(list.excludes("Daily Spam Bot feed"));
        assert!(!list.excludes("Market news"));
    }

    #[test]
    fn empty_exclusion_list_excludes_nothing() {
        let list = ExclusionList::parse(" , ");
        assert!(list.patterns().is_empty());
        assert!(!list.excludes("anything"));
    }
}
