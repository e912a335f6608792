//! Search string tokenizer
//!
//! Turns `web owner:admin "staging box" is:expired op:or` into free text
//! plus typed filters. Anything that is not a recognised filter is kept as
//! free text, so a mistyped key never loses the user's input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys accepted in `key:value` items
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Id,
    User,
    Owner,
    Group,
    MainGroup,
    File,
    Client,
    Category,
    Tag,
    NameRegex,
}

impl FilterField {
    pub fn from_key(key: &str) -> Option<FilterField> {
        let field = match key.to_lowercase().as_str() {
            "id" => FilterField::Id,
            "user" => FilterField::User,
            "owner" => FilterField::Owner,
            "group" => FilterField::Group,
            "maingroup" => FilterField::MainGroup,
            "file" => FilterField::File,
            "client" => FilterField::Client,
            "category" => FilterField::Category,
            "tag" => FilterField::Tag,
            "name_regex" => FilterField::NameRegex,
            _ => return None,
        };
        Some(field)
    }
}

/// Flags set with `is:` / `not:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Expired,
    Private,
}

impl ConditionKind {
    fn from_value(value: &str) -> Option<ConditionKind> {
        match value.to_lowercase().as_str() {
            "expired" => Some(ConditionKind::Expired),
            "private" => Some(ConditionKind::Private),
            _ => None,
        }
    }
}

/// How item and condition filters combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

impl FilterOperator {
    pub fn from_str(s: &str) -> Option<FilterOperator> {
        match s.to_lowercase().as_str() {
            "and" => Some(FilterOperator::And),
            "or" => Some(FilterOperator::Or),
            _ => None,
        }
    }
}

/// A tokenized search string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchTokens {
    /// Free text left over after filters are taken out
    pub text: Option<String>,
    /// A repeated key keeps its last value
    pub items: BTreeMap<FilterField, String>,
    /// `true` for `is:`, `false` for `not:`
    pub conditions: BTreeMap<ConditionKind, bool>,
    pub operator: Option<FilterOperator>,
}

impl SearchTokens {
    pub fn has_filters(&self) -> bool {
        !self.items.is_empty() || !self.conditions.is_empty()
    }
}

/// Tokenize a search string. Blank input means "no filter" and yields `None`.
pub fn tokenize(input: &str) -> Option<SearchTokens> {
    if input.trim().is_empty() {
        return None;
    }

    let mut tokens = SearchTokens::default();
    let mut words: Vec<String> = Vec::new();

    for raw in split_words(input) {
        match classify(&raw) {
            Token::Item(field, value) => {
                tokens.items.insert(field, value);
            }
            Token::Condition(kind, set) => {
                tokens.conditions.insert(kind, set);
            }
            Token::Operator(op) => tokens.operator = Some(op),
            Token::Text(text) => {
                if !text.is_empty() {
                    words.push(text);
                }
            }
        }
    }

    if !words.is_empty() {
        tokens.text = Some(words.join(" "));
    }
    Some(tokens)
}

enum Token {
    Item(FilterField, String),
    Condition(ConditionKind, bool),
    Operator(FilterOperator),
    Text(String),
}

fn classify(raw: &str) -> Token {
    let text = || Token::Text(strip_quotes(raw));

    let Some((key, value)) = raw.split_once(':') else {
        return text();
    };
    let value = strip_quotes(value);

    match key.to_lowercase().as_str() {
        "is" | "not" => match ConditionKind::from_value(&value) {
            Some(kind) => Token::Condition(kind, key.eq_ignore_ascii_case("is")),
            None => text(),
        },
        "op" => match FilterOperator::from_str(&value) {
            Some(op) => Token::Operator(op),
            None => text(),
        },
        _ => match FilterField::from_key(key) {
            Some(field) if !value.is_empty() => Token::Item(field, value),
            _ => text(),
        },
    }
}

fn strip_quotes(s: &str) -> String {
    s.chars().filter(|c| *c != '"').collect()
}

/// Split on whitespace outside double quotes. An unterminated quote runs
/// to the end of the input.
fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_is_no_filter() {
        assert_eq!(tokenize(""), None);
        assert_eq!(tokenize("   \t "), None);
    }

    #[test]
    fn test_free_text_only() {
        let tokens = tokenize("  mail   server ").unwrap();
        assert_eq!(tokens.text.as_deref(), Some("mail server"));
        assert!(!tokens.has_filters());
        assert_eq!(tokens.operator, None);
    }

    #[test]
    fn test_items_and_text() {
        let tokens = tokenize("web owner:admin Category:Servers").unwrap();
        assert_eq!(tokens.text.as_deref(), Some("web"));
        assert_eq!(tokens.items[&FilterField::Owner], "admin");
        assert_eq!(tokens.items[&FilterField::Category], "Servers");
    }

    #[test]
    fn test_quoted_values() {
        let tokens = tokenize(r#"user:"john doe" "staging box""#).unwrap();
        assert_eq!(tokens.items[&FilterField::User], "john doe");
        assert_eq!(tokens.text.as_deref(), Some("staging box"));
    }

    #[test]
    fn test_conditions_and_operator() {
        let tokens = tokenize("is:expired NOT:private op:OR").unwrap();
        assert!(tokens.conditions[&ConditionKind::Expired]);
        assert!(!tokens.conditions[&ConditionKind::Private]);
        assert_eq!(tokens.operator, Some(FilterOperator::Or));
        assert_eq!(tokens.text, None);
    }

    #[test]
    fn test_last_value_wins() {
        let tokens = tokenize("tag:a tag:b is:expired not:expired").unwrap();
        assert_eq!(tokens.items[&FilterField::Tag], "b");
        assert!(!tokens.conditions[&ConditionKind::Expired]);
    }

    #[test]
    fn test_unknown_keys_become_text() {
        let tokens = tokenize("color:red is:shiny op:xor owner: http://x").unwrap();
        assert!(tokens.items.is_empty());
        assert!(tokens.conditions.is_empty());
        assert_eq!(tokens.operator, None);
        assert_eq!(
            tokens.text.as_deref(),
            Some("color:red is:shiny op:xor owner: http://x")
        );
    }

    #[test]
    fn test_all_keys_recognised() {
        let tokens = tokenize(
            "id:1 user:a owner:b group:c maingroup:d file:e client:f category:g tag:h name_regex:^x",
        )
        .unwrap();
        assert_eq!(tokens.items.len(), 10);
        assert_eq!(tokens.items[&FilterField::MainGroup], "d");
        assert_eq!(tokens.items[&FilterField::NameRegex], "^x");
    }
}
