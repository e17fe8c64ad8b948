//! Service command-line argument parser
//!
//! Grammar:
//!
//! ```text
//! command  := token (WS token)*
//! token    := word | '"' chars '"' | '\'' chars '\''   (adjacent pieces concatenate)
//! flag     := ('-' | '--') name '=' value?
//! ```
//!
//! The first token of each command is the executable and is ignored. Tokens
//! matching `flag` map `--name` to `value` (split at the first `=`); a later
//! occurrence of the same flag replaces an earlier one. All other tokens,
//! including `--name value` pairs and unexpanded `$VARIABLES`, are ignored.

use eksaudit_core::ServiceFlags;

/// Parse one or more command lines into a flag map
pub fn parse_service_args<'a, I>(commands: I) -> ServiceFlags
where
    I: IntoIterator<Item = &'a str>,
{
    let mut flags = ServiceFlags::new();

    for command in commands {
        for token in tokenize(command).into_iter().skip(1) {
            if !token.starts_with('-') {
                continue;
            }
            if let Some((name, value)) = token.split_once('=') {
                if name.trim_start_matches('-').is_empty() {
                    continue;
                }
                flags.insert(name, value);
            }
        }
    }

    flags
}

/// Split a command line on whitespace, honouring single and double quotes
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}

/// Extract the command lines from a `systemctl show` `ExecStart=` value
///
/// systemd renders each command as `{ path=... ; argv[]=<cmd> ; ignore_errors=no ; ... }`.
/// A value without any `argv[]=` section is taken to be a raw command line.
pub fn exec_start_commands(value: &str) -> Vec<String> {
    const MARKER: &str = "argv[]=";

    if !value.contains(MARKER) {
        let trimmed = value.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    value
        .match_indices(MARKER)
        .map(|(idx, _)| {
            let rest = &value[idx + MARKER.len()..];
            let end = rest.find(" ;").unwrap_or(rest.len());
            rest[..end].trim().to_string()
        })
        .filter(|cmd| !cmd.is_empty())
        .collect()
}
