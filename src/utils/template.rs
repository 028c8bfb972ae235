// Pre-parse template expansion for configuration documents
//
// `{{ NAME }}` placeholders are replaced before the YAML parser ever sees
// the text, so the parser receives plain YAML with no template syntax left.
// The `${NAME}` shell syntax is deliberately not honored.

use crate::utils::error::{WeiserError, WeiserResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex"));

/// Build the variable table used for placeholder resolution.
///
/// Precedence: the ambient environment wins over `.env` values, unless an
/// env file was explicitly passed, in which case the file wins.
pub fn template_vars(explicit_env_file: Option<&Path>) -> WeiserResult<HashMap<String, String>> {
    let mut vars: HashMap<String, String> = HashMap::new();

    match explicit_env_file {
        Some(path) => {
            vars.extend(std::env::vars());
            let iter = dotenvy::from_path_iter(path).map_err(|e| {
                WeiserError::config(format!("cannot read env file {}: {}", path.display(), e))
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| {
                    WeiserError::config(format!("invalid env file {}: {}", path.display(), e))
                })?;
                vars.insert(key, value);
            }
        },
        None => {
            // Default .env is optional; ambient values override its entries.
            if let Ok(iter) = dotenvy::dotenv_iter() {
                for (key, value) in iter.flatten() {
                    vars.insert(key, value);
                }
            }
            vars.extend(std::env::vars());
        },
    }

    Ok(vars)
}

/// Replace every `{{ NAME }}` placeholder in `text` from `vars`.
///
/// An unresolved placeholder is a ConfigError, never silently left behind
/// as a literal.
pub fn expand_placeholders(text: &str, vars: &HashMap<String, String>) -> WeiserResult<String> {
    let mut missing: Vec<String> = Vec::new();

    let expanded = PLACEHOLDER.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            },
        }
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        missing.sort();
        missing.dedup();
        Err(WeiserError::config(format!(
            "unresolved template variable(s): {}",
            missing.join(", ")
        )))
    }
}
