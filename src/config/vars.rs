//! Shell-style variable expansion for config text.
//!
//! The loader runs this over the raw YAML before parsing, so any scalar
//! in the file can come from the environment:
//!
//! - `$NAME` / `${NAME}` substitute the variable, failing when it is unset
//! - `${NAME:-fallback}` uses the fallback when unset or empty
//! - `${NAME-fallback}` uses the fallback only when unset
//! - `$$` produces a literal `$`

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

// One pattern covers all four reference forms; the alternation order
// matters, since `$$` must win before the bare-name branch sees it.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        | \$\{ (?P<name>[A-Za-z_][A-Za-z0-9_]*)
               (?: (?P<mode>:?-) (?P<fallback>[^}]*) )?
          \}
        | \$ (?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern must compile")
});

/// Expand environment variable references in `input`.
///
/// Unresolvable references are collected rather than short-circuited, so
/// a config with several gaps reports all of them in one pass. The Err
/// side carries one message per problem.
pub fn expand(input: &str) -> Result<String, Vec<String>> {
    let mut problems = Vec::new();

    let expanded = REFERENCE.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let name = caps
            .name("name")
            .or_else(|| caps.name("bare"))
            .map_or("", |m| m.as_str());
        let mode = caps.name("mode").map(|m| m.as_str());
        let fallback = caps.name("fallback").map(|m| m.as_str());

        match lookup(name, mode, fallback) {
            Ok(value) => value,
            Err(problem) => {
                problems.push(problem);
                // Leave the reference in place so the reported text
                // matches what the file actually says
                whole.to_string()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(problems)
    }
}

/// Resolve one reference against the process environment.
fn lookup(name: &str, mode: Option<&str>, fallback: Option<&str>) -> Result<String, String> {
    match env::var(name) {
        // A value with line breaks could smuggle extra YAML keys into
        // the document, so refuse it outright
        Ok(value) if value.contains('\n') || value.contains('\r') => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && mode == Some(":-") => {
            Ok(fallback.unwrap_or("").to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => fallback
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
