//! Search sections for starting a conversation.

use crate::address::{Address, Topic};

/// One row of a search section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchContact {
    /// Peer address
    pub address: Address,
    /// Name to render
    pub title: String,
    /// Peer is allowed
    pub connected: bool,
    /// Existing one-to-one conversation, if any
    pub topic: Option<Topic>,
}

impl SearchContact {
    fn matches(&self, needle: &str) -> bool {
        self.address.as_str().contains(needle) || self.title.to_lowercase().contains(needle)
    }
}

/// Sections shown while the user types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSections {
    /// The raw query, offered as an address to message directly
    pub typed: Option<String>,
    /// Recent conversations matching the query
    pub recents: Vec<SearchContact>,
    /// Allowed contacts matching the query and not already in `recents`
    pub contacts: Vec<SearchContact>,
}

/// Filter `recents` and `contacts` by `query`, case-insensitively
pub fn build_sections(
    query: &str,
    recents: Vec<SearchContact>,
    contacts: Vec<SearchContact>,
) -> SearchSections {
    let query = query.trim();
    let needle = query.to_lowercase();

    let recents: Vec<SearchContact> = recents.into_iter().filter(|c| c.matches(&needle)).collect();
    let contacts = contacts
        .into_iter()
        .filter(|c| c.matches(&needle))
        .filter(|c| !recents.iter().any(|r| r.address == c.address))
        .collect();

    SearchSections {
        typed: (!query.is_empty()).then(|| query.to_string()),
        recents,
        contacts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::addr;

    fn contact(address: &str, title: &str) -> SearchContact {
        SearchContact {
            address: addr(address),
            title: title.to_string(),
            connected: true,
            topic: None,
        }
    }

    #[test]
    fn test_empty_query_lists_everything() {
        let sections = build_sections(
            "",
            vec![contact("0xB2", "bob.eth")],
            vec![contact("0xC3", "carol.eth")],
        );

        assert_eq!(sections.typed, None);
        assert_eq!(sections.recents.len(), 1);
        assert_eq!(sections.contacts.len(), 1);
    }

    #[test]
    fn test_filters_on_address_and_name() {
        let sections = build_sections(
            " CAROL ",
            vec![contact("0xB2", "bob.eth")],
            vec![contact("0xC3", "carol.eth"), contact("0xCAR0", "0xcar0")],
        );

        assert_eq!(sections.typed.as_deref(), Some("CAROL"));
        assert!(sections.recents.is_empty());
        assert_eq!(sections.contacts, vec![contact("0xC3", "carol.eth")]);
    }

    #[test]
    fn test_contacts_in_recents_are_dropped() {
        let sections = build_sections(
            "0x",
            vec![contact("0xB2", "bob.eth")],
            vec![contact("0xb2", "bob.eth"), contact("0xC3", "carol.eth")],
        );

        let contacts: Vec<&str> = sections.contacts.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(contacts, vec!["0xc3"]);
    }
}
