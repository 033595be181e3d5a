// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # RBAC Rule-Set Document
//!
//! Structured form of the Rego policy published to the decision service.
//! Only the `role_permissions` mapping varies between documents; the package
//! header and the decision block are fixed.
//!
//! Rendering and parsing both go through [`schema`], so any mapping the
//! renderer can produce is accepted back by the parser. Grant descriptions are
//! never rendered; the parser accepts them when present.

use crate::domain::rbac::{PermissionGrant, RoleGrants, RolePermissionMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod schema {
    pub const PACKAGE: &str = "rbac.authz";
    pub const IMPORTS: &[&str] = &["rego.v1"];
    pub const MAPPING_RULE: &str = "role_permissions";
    pub const ACTION_FIELD: &str = "action";
    pub const OBJECT_FIELD: &str = "object";
    pub const DESCRIPTION_FIELD: &str = "description";
    pub const INDENT: &str = "    ";
    pub const FILE_EXTENSION: &str = "rego";
    pub const DECISION_RULE: &str = "allow";

    /// Data API path of the decision rule, e.g. `rbac/authz/allow`.
    pub fn decision_path() -> String {
        format!("{}/{}", PACKAGE.replace('.', "/"), DECISION_RULE)
    }
}

const DECISION_BLOCK: &str = r#"# logic that implements RBAC.
default allow := false
allow if {
    # lookup the list of roles for the user
    roles := input.roles

    # for each role in that list
    r := roles[_]

    # lookup the permissions list for role r
    permissions := role_permissions[r]

    # for each permission
    p := permissions[_]

    # check if the permission granted to r matches the user's request
    p == {"action": input.action, "object": input.object}
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct RuleSetParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("Failed to read rule-set {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed rule-set {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: RuleSetParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSetDocument {
    pub package: String,
    pub imports: Vec<String>,
    pub entries: RolePermissionMap,
}

impl RuleSetDocument {
    pub fn new(entries: RolePermissionMap) -> Self {
        Self {
            package: schema::PACKAGE.to_string(),
            imports: schema::IMPORTS.iter().map(|i| i.to_string()).collect(),
            entries,
        }
    }

    /// Render the document. Identical input yields byte-identical output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("package {}\n\n", self.package));
        for import in &self.imports {
            out.push_str(&format!("import {}\n", import));
        }
        if !self.imports.is_empty() {
            out.push('\n');
        }

        out.push_str(&format!("{} := {{\n", schema::MAPPING_RULE));
        for entry in &self.entries {
            out.push_str(&format!("{}{}: [\n", schema::INDENT, quote(&entry.role)));
            for grant in &entry.grants {
                out.push_str(&format!(
                    "{indent}{indent}{{{}: {}, {}: {}}},\n",
                    quote(schema::ACTION_FIELD),
                    quote(&grant.action),
                    quote(schema::OBJECT_FIELD),
                    quote(&grant.object),
                    indent = schema::INDENT,
                ));
            }
            out.push_str(&format!("{}],\n", schema::INDENT));
        }
        out.push_str("}\n\n");
        out.push_str(DECISION_BLOCK);
        out
    }

    pub fn parse(text: &str) -> Result<Self, RuleSetParseError> {
        let mut package = None;
        let mut imports = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("package ") {
                if package.is_none() {
                    package = Some(rest.trim().to_string());
                }
            } else if let Some(rest) = line.strip_prefix("import ") {
                imports.push(rest.trim().to_string());
            } else if line.starts_with(schema::MAPPING_RULE) && package.is_none() {
                return Err(RuleSetParseError {
                    line: number + 1,
                    message: "mapping declared before package".to_string(),
                });
            }
        }
        let package = package.ok_or_else(|| RuleSetParseError {
            line: 1,
            message: "missing package declaration".to_string(),
        })?;

        let start = find_mapping(text)?;
        let mut parser = LiteralParser::new(text, start);
        let literal = parser.value()?;
        let entries = to_entries(literal, parser.line_at(start))?;

        Ok(Self {
            package,
            imports,
            entries,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| RuleSetError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Byte offset of the `{` opening the mapping literal.
fn find_mapping(text: &str) -> Result<usize, RuleSetParseError> {
    let mut offset = 0;
    for (number, line) in text.split_inclusive('\n').enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(schema::MAPPING_RULE) {
            let rest_trimmed = rest.trim_start();
            if let Some(after) = rest_trimmed.strip_prefix(":=") {
                let after_trimmed = after.trim_start();
                if after_trimmed.starts_with('{') {
                    let consumed = line.len() - after_trimmed.len();
                    return Ok(offset + consumed);
                }
                return Err(RuleSetParseError {
                    line: number + 1,
                    message: format!("expected '{{' after '{} :='", schema::MAPPING_RULE),
                });
            }
        }
        offset += line.len();
    }
    Err(RuleSetParseError {
        line: text.lines().count().max(1),
        message: format!("no '{}' mapping found", schema::MAPPING_RULE),
    })
}

#[derive(Debug)]
enum Literal {
    Str(String),
    Array(Vec<(usize, Literal)>),
    Object(Vec<(usize, String, Literal)>),
}

struct LiteralParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str, pos: usize) -> Self {
        Self { text, pos }
    }

    fn line_at(&self, pos: usize) -> usize {
        self.text[..pos.min(self.text.len())].matches('\n').count() + 1
    }

    fn error(&self, message: impl Into<String>) -> RuleSetParseError {
        RuleSetParseError {
            line: self.line_at(self.pos),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == '#' {
                match self.text[self.pos..].find('\n') {
                    Some(end) => self.pos += end,
                    None => self.pos = self.text.len(),
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), RuleSetParseError> {
        self.skip_trivia();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of document", expected))),
        }
    }

    fn value(&mut self) -> Result<Literal, RuleSetParseError> {
        self.skip_trivia();
        match self.peek() {
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => self.string().map(Literal::Str),
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of document")),
        }
    }

    fn object(&mut self) -> Result<Literal, RuleSetParseError> {
        self.expect('{')?;
        let mut fields = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Literal::Object(fields));
            }
            let line = self.line_at(self.pos);
            let key = self.string()?;
            self.expect(':')?;
            let value = self.value()?;
            fields.push((line, key, value));
            if !self.separator('}')? {
                return Ok(Literal::Object(fields));
            }
        }
    }

    fn array(&mut self) -> Result<Literal, RuleSetParseError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Literal::Array(items));
            }
            let line = self.line_at(self.pos);
            items.push((line, self.value()?));
            if !self.separator(']')? {
                return Ok(Literal::Array(items));
            }
        }
    }

    /// Consume `,` (returns true, more items may follow) or `close` (returns false).
    fn separator(&mut self, close: char) -> Result<bool, RuleSetParseError> {
        self.skip_trivia();
        match self.peek() {
            Some(',') => {
                self.pos += 1;
                Ok(true)
            }
            Some(c) if c == close => {
                self.pos += 1;
                Ok(false)
            }
            Some(c) => Err(self.error(format!("expected ',' or '{}', found '{}'", close, c))),
            None => Err(self.error(format!("unterminated literal, expected '{}'", close))),
        }
    }

    fn string(&mut self) -> Result<String, RuleSetParseError> {
        self.skip_trivia();
        if self.peek() != Some('"') {
            return Err(self.error("expected string"));
        }
        let start = self.pos;
        let mut escaped = false;
        for (offset, c) in self.text[start + 1..].char_indices() {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => {
                    let end = start + 1 + offset + 1;
                    let raw = &self.text[start..end];
                    let decoded: String =
                        serde_json::from_str(raw).map_err(|e| self.error(format!("invalid string {}: {}", raw, e)))?;
                    self.pos = end;
                    return Ok(decoded);
                }
                '\n' => break,
                _ => escaped = false,
            }
        }
        Err(self.error("unterminated string"))
    }
}

fn to_entries(literal: Literal, line: usize) -> Result<RolePermissionMap, RuleSetParseError> {
    let Literal::Object(roles) = literal else {
        return Err(RuleSetParseError {
            line,
            message: format!("'{}' must be an object", schema::MAPPING_RULE),
        });
    };

    let mut entries: RolePermissionMap = Vec::with_capacity(roles.len());
    for (line, role, value) in roles {
        if entries.iter().any(|e| e.role == role) {
            return Err(RuleSetParseError {
                line,
                message: format!("role '{}' declared more than once", role),
            });
        }
        let Literal::Array(items) = value else {
            return Err(RuleSetParseError {
                line,
                message: format!("permissions of role '{}' must be a list", role),
            });
        };
        let grants = items
            .into_iter()
            .map(|(line, item)| to_grant(item, line))
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(RoleGrants::new(role, grants));
    }
    Ok(entries)
}

fn to_grant(literal: Literal, line: usize) -> Result<PermissionGrant, RuleSetParseError> {
    let Literal::Object(fields) = literal else {
        return Err(RuleSetParseError {
            line,
            message: "permission must be an object".to_string(),
        });
    };

    let mut action = None;
    let mut object = None;
    let mut description = None;
    for (line, key, value) in fields {
        let Literal::Str(value) = value else {
            return Err(RuleSetParseError {
                line,
                message: format!("field '{}' must be a string", key),
            });
        };
        let slot = match key.as_str() {
            schema::ACTION_FIELD => &mut action,
            schema::OBJECT_FIELD => &mut object,
            schema::DESCRIPTION_FIELD => &mut description,
            other => {
                return Err(RuleSetParseError {
                    line,
                    message: format!("unknown permission field '{}'", other),
                })
            }
        };
        *slot = Some(value);
    }

    match (action, object) {
        (Some(action), Some(object)) => Ok(PermissionGrant {
            action,
            object,
            description,
        }),
        _ => Err(RuleSetParseError {
            line,
            message: format!(
                "permission requires '{}' and '{}'",
                schema::ACTION_FIELD,
                schema::OBJECT_FIELD
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn mapping() -> RolePermissionMap {
        vec![
            RoleGrants::new(
                "admin",
                vec![PermissionGrant::new("GET", "APPS"), PermissionGrant::new("DELETE", "APPS")],
            ),
            RoleGrants::new("viewer", vec![PermissionGrant::new("GET", "APPS")]),
            RoleGrants::new("nobody", vec![]),
        ]
    }

    fn as_sets(map: &RolePermissionMap) -> Vec<(String, BTreeSet<PermissionGrant>)> {
        map.iter()
            .map(|e| (e.role.clone(), e.grants.iter().cloned().collect()))
            .collect()
    }

    #[test]
    fn test_render_layout() {
        let text = RuleSetDocument::new(vec![RoleGrants::new("admin", vec![PermissionGrant::new("GET", "APPS")])])
            .render();

        let expected_head = "package rbac.authz\n\nimport rego.v1\n\nrole_permissions := {\n    \"admin\": [\n        {\"action\": \"GET\", \"object\": \"APPS\"},\n    ],\n}\n\n# logic that implements RBAC.\ndefault allow := false\n";
        assert!(text.starts_with(expected_head), "unexpected layout:\n{}", text);
        assert!(text.ends_with("p == {\"action\": input.action, \"object\": input.object}\n}\n"));
    }

    #[test]
    fn test_decision_path_follows_package() {
        assert_eq!(schema::decision_path(), "rbac/authz/allow");
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(RuleSetDocument::new(mapping()).render(), RuleSetDocument::new(mapping()).render());
    }

    #[test]
    fn test_round_trip() {
        let text = RuleSetDocument::new(mapping()).render();
        let parsed = RuleSetDocument::parse(&text).unwrap();

        assert_eq!(parsed.package, "rbac.authz");
        assert_eq!(parsed.imports, vec!["rego.v1".to_string()]);
        assert_eq!(as_sets(&parsed.entries), as_sets(&mapping()));
    }

    #[test]
    fn test_round_trip_escapes() {
        let map = vec![RoleGrants::new(
            "ops \"eu\"",
            vec![PermissionGrant::new("POST", "APPS\\scale"), PermissionGrant::new("GET", "ñandú")],
        )];
        let parsed = RuleSetDocument::parse(&RuleSetDocument::new(map.clone()).render()).unwrap();
        assert_eq!(parsed.entries, map);
    }

    #[test]
    fn test_parse_accepts_descriptions_and_comments() {
        let text = r#"package rbac.authz

import rego.v1

# seeded by hand
role_permissions := {
    "admin": [
        {"action": "GET", "object": "USERS", "description": "List users"}, # inline
        {"object": "ROLES", "action": "PUT"}
    ]
}
"#;
        let parsed = RuleSetDocument::parse(text).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].grants[0].description.as_deref(), Some("List users"));
        assert_eq!(parsed.entries[0].grants[1], PermissionGrant::new("PUT", "ROLES"));
    }

    #[test]
    fn test_parse_reports_line_of_error() {
        let text = "package rbac.authz\n\nrole_permissions := {\n    \"admin\": [\n        {\"action\": \"GET\"},\n    ],\n}\n";
        let err = RuleSetDocument::parse(text).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.message.contains("requires"));
    }

    #[test]
    fn test_parse_rejects_missing_mapping_and_unterminated() {
        assert!(RuleSetDocument::parse("package rbac.authz\n").is_err());
        assert!(RuleSetDocument::parse("role_permissions := {}\n").is_err());

        let err = RuleSetDocument::parse("package p\nrole_permissions := {\n  \"admin\": [\n").unwrap_err();
        assert!(err.message.contains("unexpected end") || err.message.contains("unterminated"));
    }

    #[test]
    fn test_parse_rejects_duplicate_roles() {
        let text = "package p\nrole_permissions := {\"a\": [], \"a\": []}\n";
        let err = RuleSetDocument::parse(text).unwrap_err();
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RuleSetDocument::from_file(dir.path().join("absent.rego"));
        assert!(matches!(result, Err(RuleSetError::Io { .. })));
    }
}
