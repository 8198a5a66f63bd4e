//! Front matter embedded in a leading SQL comment.
//!
//! ```sql
//! /*
//! ---
//! depends_on:
//!   - ../types
//! ---
//! Accounts owned by people.
//! */
//! CREATE TABLE finance.account (...);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

static DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(-{3,})[ \t]*\r?$").expect("valid delimiter regex"));

/// Errors produced while decoding a front-matter block.
#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    /// The block between the delimiters is not valid YAML.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// The block is valid YAML but not a mapping.
    #[error("front matter must be a YAML mapping")]
    NotAMapping,
}

/// Metadata and documentation carried by a leading comment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    /// YAML mapping between the delimiter lines.
    pub data: Mapping,
    /// Free text after the closing delimiter.
    pub doc: String,
}

impl FrontMatter {
    /// Splits `sql` into its front matter and the remaining text.
    ///
    /// Returns `None` and the untouched input when the file does not open
    /// with a block comment.
    pub fn parse(sql: &str) -> Result<(Option<Self>, &str), FrontMatterError> {
        let leading = sql.len() - sql.trim_start().len();
        if !sql[leading..].starts_with("/*") {
            return Ok((None, sql));
        }

        let body_start = leading + 2;
        let Some(body_len) = sql[body_start..].find("*/") else {
            return Ok((None, sql));
        };
        let body = &sql[body_start..body_start + body_len];
        let rest = &sql[body_start + body_len + 2..];

        let Some((yaml, doc)) = split_delimited(body) else {
            return Ok((
                Some(Self {
                    data: Mapping::new(),
                    doc: body.trim().to_string(),
                }),
                rest,
            ));
        };

        let data = if yaml.trim().is_empty() {
            Mapping::new()
        } else {
            match serde_yaml::from_str::<Value>(yaml)? {
                Value::Mapping(mapping) => mapping,
                Value::Null => Mapping::new(),
                _ => return Err(FrontMatterError::NotAMapping),
            }
        };

        Ok((
            Some(Self {
                data,
                doc: doc.trim().to_string(),
            }),
            rest,
        ))
    }

    /// Renders the block back into a leading comment.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let yaml = serde_yaml::to_string(&self.data)?;
        Ok(format!("/*\n---\n{yaml}---\n{}\n*/\n", self.doc))
    }
}

/// Returns `(yaml, doc)` when `body` opens with a dash line that is closed by
/// an identical one.
fn split_delimited(body: &str) -> Option<(&str, &str)> {
    let mut lines = DELIMITER.captures_iter(body);
    let open = lines.next()?;
    let open_match = open.get(0)?;
    if !body[..open_match.start()].trim().is_empty() {
        return None;
    }

    let dashes = open.get(1)?.as_str();
    let close = lines.find(|c| c.get(1).is_some_and(|m| m.as_str() == dashes))?;
    let close_match = close.get(0)?;

    Some((
        &body[open_match.end()..close_match.start()],
        &body[close_match.end()..],
    ))
}
