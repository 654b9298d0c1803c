//! Key namespace topology
//!
//! Store keys are flat strings such as `orders.prod.v1.timeout`. The
//! configured [`KeyPrefixOrder`] says which leading `.`-separated segments
//! hold the application, profile and label. This module maps that order to
//! search prefixes for reads and back to an application identity for a
//! changed key.
//!
//! A configured value that itself contains `.` collides with the delimiter;
//! such keys are decoded by position only and may resolve to the wrong
//! application.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::KEY_DELIMITER;
use crate::constants::WILDCARD_APPLICATION;
use crate::Error;
use crate::Result;


/// One structured segment of a store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyPrefix {
    Application,
    Profile,
    Label,
}

impl KeyPrefix {
    pub fn key_token(&self) -> &'static str {
        match self {
            KeyPrefix::Application => "application",
            KeyPrefix::Profile => "profile",
            KeyPrefix::Label => "label",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.key_token())
    }
}

impl FromStr for KeyPrefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "application" => Ok(KeyPrefix::Application),
            "profile" => Ok(KeyPrefix::Profile),
            "label" => Ok(KeyPrefix::Label),
            other => Err(Error::InvalidConfig(format!(
                "unknown key prefix token `{}` (expected application, profile or label)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<KeyPrefix> for String {
    fn from(prefix: KeyPrefix) -> Self {
        prefix.key_token().to_string()
    }
}

/// Ordered, duplicate-free sequence of [`KeyPrefix`] tokens.
///
/// An empty order means the store has no structured namespace and every key
/// belongs to one flat application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyPrefix>", into = "Vec<KeyPrefix>")]
pub struct KeyPrefixOrder(Vec<KeyPrefix>);

impl KeyPrefixOrder {
    pub fn new(tokens: Vec<KeyPrefix>) -> Result<Self> {
        for (i, token) in tokens.iter().enumerate() {
            if tokens[..i].contains(token) {
                return Err(Error::InvalidConfig(format!(
                    "key prefix token `{}` appears more than once in key_prefix_order",
                    token
                )));
            }
        }
        Ok(Self(tokens))
    }

    /// Parses a comma separated token list such as `application,profile`.
    pub fn parse(list: &str) -> Result<Self> {
        let tokens = list
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(KeyPrefix::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(tokens)
    }

    pub fn tokens(&self) -> &[KeyPrefix] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(
        &self,
        prefix: KeyPrefix,
    ) -> Option<usize> {
        self.0.iter().position(|p| *p == prefix)
    }

    /// Builds the read prefix for one application / profile / label triple.
    ///
    /// Tokens are visited in configured order; each non-blank value is
    /// appended followed by `.`. Blank values emit no segment at all, and an
    /// empty order yields `""` (full scan).
    pub fn build_search_prefix(
        &self,
        application: &str,
        profile: &str,
        label: &str,
    ) -> String {
        let mut prefix = String::new();
        for token in &self.0 {
            let value = match token {
                KeyPrefix::Application => application,
                KeyPrefix::Profile => profile,
                KeyPrefix::Label => label,
            };
            if value.trim().is_empty() {
                continue;
            }
            prefix.push_str(value);
            prefix.push(KEY_DELIMITER);
        }
        prefix
    }

    /// Resolves the application a changed key belongs to.
    ///
    /// Returns [`WILDCARD_APPLICATION`] when the order has no application
    /// token or the key is too short to hold anything after the application
    /// segment.
    pub fn extract_application_name(
        &self,
        modified_key: &str,
    ) -> String {
        let Some(index) = self.position(KeyPrefix::Application) else {
            return WILDCARD_APPLICATION.to_string();
        };

        let segments: Vec<&str> = modified_key.split(KEY_DELIMITER).collect();
        if segments.len() > index + 1 {
            segments[index].to_string()
        } else {
            WILDCARD_APPLICATION.to_string()
        }
    }
}

impl TryFrom<Vec<KeyPrefix>> for KeyPrefixOrder {
    type Error = Error;

    fn try_from(tokens: Vec<KeyPrefix>) -> Result<Self> {
        Self::new(tokens)
    }
}

impl From<KeyPrefixOrder> for Vec<KeyPrefix> {
    fn from(order: KeyPrefixOrder) -> Self {
        order.0
    }
}

/// Free-function form of [`KeyPrefixOrder::build_search_prefix`].
pub fn build_search_prefix(
    order: &KeyPrefixOrder,
    application: &str,
    profile: &str,
    label: &str,
) -> String {
    order.build_search_prefix(application, profile, label)
}

/// Free-function form of [`KeyPrefixOrder::extract_application_name`].
pub fn extract_application_name(
    modified_key: &str,
    order: &KeyPrefixOrder,
) -> String {
    order.extract_application_name(modified_key)
}
