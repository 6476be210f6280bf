//! Word-list repository: named lists of word pairs stored on the server.
//!
//! Every call is an independent request; nothing is cached locally and there
//! is no transactional guarantee across calls.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::{ApiClient, ApiConfig};
use crate::error::{Result, SpyError};

/// HTTP client for `/wordlists`.
#[derive(Debug, Clone)]
pub struct WordListClient {
    api: ApiClient,
}

#[derive(Serialize)]
struct NewList<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct NewItem<'a> {
    item: &'a str,
}

impl WordListClient {
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidUrl`](crate::SpyError::InvalidUrl) for an
    /// unusable base URL, or an HTTP error if the client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }

    /// Names of all word lists.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP or decoding error.
    pub async fn list(&self) -> Result<Vec<String>> {
        let url = self.api.url(&["wordlists"])?;
        self.api
            .fetch_json("list word lists", || self.api.http().get(url.clone()))
            .await
    }

    /// Entries of one list, typically `"<civilian>,<spy>"` pairs.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP or decoding error.
    pub async fn items(&self, name: &str) -> Result<Vec<String>> {
        let url = self.api.url(&["wordlists", non_blank(name, "list name")?, "items"])?;
        self.api
            .fetch_json("fetch word list items", || self.api.http().get(url.clone()))
            .await
    }

    /// Create an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidInput`] for a blank name without sending
    /// anything; otherwise propagates the final HTTP error.
    pub async fn create(&self, name: &str) -> Result<()> {
        let body = NewList {
            name: non_blank(name, "list name")?,
        };
        let url = self.api.url(&["wordlists"])?;
        self.api
            .execute("create word list", || {
                self.api.http().post(url.clone()).json(&body)
            })
            .await?;
        debug!(list = body.name, "word list created");
        Ok(())
    }

    /// Delete a list and all its entries.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = non_blank(name, "list name")?;
        let url = self.api.url(&["wordlists", name])?;
        self.api
            .execute("delete word list", || self.api.http().delete(url.clone()))
            .await?;
        debug!(list = name, "word list deleted");
        Ok(())
    }

    /// Append an entry to a list.
    ///
    /// # Errors
    ///
    /// Returns [`SpyError::InvalidInput`] for a blank name or item without
    /// sending anything; otherwise propagates the final HTTP error.
    pub async fn add_item(&self, name: &str, item: &str) -> Result<()> {
        let body = NewItem {
            item: non_blank(item, "item")?,
        };
        let url = self.api.url(&["wordlists", non_blank(name, "list name")?, "items"])?;
        self.api
            .execute("add word list item", || {
                self.api.http().post(url.clone()).json(&body)
            })
            .await?;
        Ok(())
    }

    /// Remove an entry from a list. The entry travels as the `item` query parameter.
    ///
    /// # Errors
    ///
    /// Propagates the final HTTP error.
    pub async fn delete_item(&self, name: &str, item: &str) -> Result<()> {
        let mut url = self.api.url(&["wordlists", non_blank(name, "list name")?, "items"])?;
        url.query_pairs_mut().append_pair("item", item);
        self.api
            .execute("delete word list item", || {
                self.api.http().delete(url.clone())
            })
            .await?;
        Ok(())
    }
}

/// Trims `value`, rejecting it when nothing is left.
fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SpyError::InvalidInput(format!("{what} must not be blank")));
    }
    Ok(trimmed)
}

/// A civilian word and the spy's look-alike word.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WordPair {
    pub civilian: String,
    pub spy: String,
}

impl WordPair {
    pub fn new(civilian: impl Into<String>, spy: impl Into<String>) -> Self {
        Self {
            civilian: civilian.into(),
            spy: spy.into(),
        }
    }

    /// Parses `"<civilian>,<spy>"`; the full-width comma `，` works too.
    ///
    /// Returns `None` unless both halves are non-empty after trimming.
    pub fn parse(entry: &str) -> Option<Self> {
        let (civilian, spy) = entry.split_once([',', '，'])?;
        let (civilian, spy) = (civilian.trim(), spy.trim());
        if civilian.is_empty() || spy.is_empty() {
            return None;
        }
        Some(Self::new(civilian, spy))
    }

    /// The entry as stored in a list.
    pub fn to_entry(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WordPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.civilian, self.spy)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_ascii_and_full_width_commas() {
        assert_eq!(
            WordPair::parse("apple, pear"),
            Some(WordPair::new("apple", "pear"))
        );
        assert_eq!(
            WordPair::parse("苹果，梨"),
            Some(WordPair::new("苹果", "梨"))
        );
    }

    #[test]
    fn rejects_entries_without_two_words() {
        assert_eq!(WordPair::parse("apple"), None);
        assert_eq!(WordPair::parse("apple, "), None);
        assert_eq!(WordPair::parse(",pear"), None);
    }

    #[test]
    fn blank_input_is_rejected_after_trimming() {
        assert_eq!(non_blank("  pets ", "list name").unwrap(), "pets");
        assert!(matches!(
            non_blank(" \t ", "item"),
            Err(SpyError::InvalidInput(msg)) if msg == "item must not be blank"
        ));
    }

    #[test]
    fn entry_form_round_trips() {
        let pair = WordPair::new("coffee", "tea");
        assert_eq!(pair.to_entry(), "coffee,tea");
        assert_eq!(WordPair::parse(&pair.to_entry()).unwrap(), pair);
    }
}
