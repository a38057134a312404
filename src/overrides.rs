use std::collections::HashMap;

use crate::errors::{CredentialError, CredentialResult};
use crate::store::EnvMap;

/// One entry inside a tool's override block.
///
/// `KEY=VALUE` is literal text, `KEY->SOURCE` reads the ambient variable
/// `SOURCE`, and a bare `KEY` reads the ambient variable of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideEntry {
    Literal { key: String, value: String },
    Mapping { key: String, source: String },
    Passthrough { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct ToolOverride {
    entries: Vec<OverrideEntry>,
}

/// Parsed override expression: tool name -> override block. A later block
/// for the same tool replaces the earlier one wholesale; blocks are never
/// merged.
///
/// Ambient variables referenced by mapping/passthrough entries are read at
/// `resolve` time, not at parse time, so a missing variable only fails the
/// tool that actually needs it.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    tools: HashMap<String, ToolOverride>,
}

fn parse_entry(entry: &str, block: &str) -> CredentialResult<OverrideEntry> {
    // The operator appearing first decides the entry kind, so literal values
    // may contain arrows and mapped sources are never split on '='.
    let eq_pos = entry.find('=');
    let arrow_pos = entry.find("->");
    let is_literal = match (eq_pos, arrow_pos) {
        (None, None) => {
            return Ok(OverrideEntry::Passthrough {
                key: entry.to_string(),
            });
        }
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (Some(eq), Some(arrow)) => eq < arrow,
    };

    if is_literal {
        let eq = eq_pos.unwrap();
        let key = entry[..eq].trim();
        if key.is_empty() {
            return Err(CredentialError::OverrideParse(format!(
                "empty key in block '{}'",
                block
            )));
        }
        return Ok(OverrideEntry::Literal {
            key: key.to_string(),
            value: entry[eq + 1..].to_string(),
        });
    }

    let arrow = arrow_pos.unwrap();
    let key = entry[..arrow].trim();
    let source = entry[arrow + 2..].trim();
    if key.is_empty() {
        return Err(CredentialError::OverrideParse(format!(
            "empty key in block '{}'",
            block
        )));
    }
    if source.is_empty() {
        return Err(CredentialError::OverrideParse(format!(
            "'->' with no source variable in block '{}'",
            block
        )));
    }
    Ok(OverrideEntry::Mapping {
        key: key.to_string(),
        source: source.to_string(),
    })
}

impl OverrideSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Parse one override expression:
    /// `tool:ENTRY,ENTRY;tool2:ENTRY` with entries `K=V`, `K->SRC`, or `K`.
    pub fn parse(expr: &str) -> CredentialResult<Self> {
        let mut tools = HashMap::new();
        for block in expr.split(';') {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let colon = block.find(':').ok_or_else(|| {
                CredentialError::OverrideParse(format!("missing ':' in block '{}'", block))
            })?;
            let tool_name = block[..colon].trim();
            if tool_name.is_empty() {
                return Err(CredentialError::OverrideParse(format!(
                    "empty tool name in block '{}'",
                    block
                )));
            }

            let mut entries = Vec::new();
            for entry in block[colon + 1..].split(',') {
                let entry = entry.trim();
                if entry.is_empty() {
                    return Err(CredentialError::OverrideParse(format!(
                        "empty entry in block '{}'",
                        block
                    )));
                }
                entries.push(parse_entry(entry, block)?);
            }

            // Last block for a tool name wins outright.
            tools.insert(tool_name.to_string(), ToolOverride { entries });
        }
        Ok(Self { tools })
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    /// Resolve the override for a tool against the ambient environment.
    /// `Ok(None)` means no override applies and the caller falls through to
    /// cache/store/provider.
    pub fn resolve(&self, tool_name: &str) -> CredentialResult<Option<EnvMap>> {
        let Some(tool) = self.tools.get(tool_name) else {
            return Ok(None);
        };
        let mut env = EnvMap::new();
        for entry in &tool.entries {
            match entry {
                OverrideEntry::Literal { key, value } => {
                    env.insert(key.clone(), value.clone());
                }
                OverrideEntry::Mapping { key, source } => {
                    let value = std::env::var(source).map_err(|_| {
                        CredentialError::OverrideEnvMissing {
                            tool: tool_name.to_string(),
                            var: source.clone(),
                        }
                    })?;
                    env.insert(key.clone(), value);
                }
                OverrideEntry::Passthrough { key } => {
                    let value = std::env::var(key).map_err(|_| {
                        CredentialError::OverrideEnvMissing {
                            tool: tool_name.to_string(),
                            var: key.clone(),
                        }
                    })?;
                    env.insert(key.clone(), value);
                }
            }
        }
        Ok(Some(env))
    }
}
