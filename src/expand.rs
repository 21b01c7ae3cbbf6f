use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::ast::{CommandList, ListItem, Stage};

/// Expand `~` and `$VAR`/`${VAR}` in a path string.
pub fn expand_path(s: &str) -> String {
    expand_variables(&expand_tilde(s))
}

fn expand_tilde(token: &str) -> String {
    if !token.starts_with('~') {
        return token.to_string();
    }

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "~".to_string());

    if token == "~" {
        return home;
    }
    if token.starts_with("~/") || token.starts_with("~\\") {
        return format!("{home}{}", &token[1..]);
    }
    // ~username is not supported — leave as-is.
    token.to_string()
}

fn expand_variables(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        match chars.peek() {
            Some(&'{') => {
                chars.next();
                let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                if name.is_empty() {
                    result.push_str("${}");
                } else {
                    result.push_str(&std::env::var(&name).unwrap_or_default());
                }
            }
            Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                result.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => {
                // Trailing or non-variable $ is literal.
                result.push('$');
            }
        }
    }

    result
}

/// Wildcard glob with home/env expansion. Keeps the literal pattern when
/// nothing matches, like an interactive shell passing the word through.
pub fn globpath(s: &str) -> Vec<String> {
    let expanded = expand_path(s);
    match glob::glob(&expanded) {
        Ok(paths) => {
            let mut matches: Vec<String> = paths
                .filter_map(|entry| entry.ok())
                .map(|path| path.to_string_lossy().into_owned())
                .collect();
            if matches.is_empty() {
                vec![expanded]
            } else {
                matches.sort();
                matches
            }
        }
        Err(_) => vec![expanded],
    }
}

/// Regular-expression based globbing: each path component is an anchored
/// regex matched against directory entries, walked level by level. Only
/// existing paths are returned.
pub fn regexpath(s: &str) -> Vec<String> {
    let expanded = expand_path(s);
    let path = Path::new(&expanded);
    let absolute = path.is_absolute();

    let parts: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Vec::new();
    }

    let mut bases: Vec<PathBuf> =
        vec![if absolute { PathBuf::from("/") } else { PathBuf::from(".") }];
    for part in &parts {
        let Ok(regex) = Regex::new(&format!("^(?:{part})$")) else {
            return Vec::new();
        };
        let mut next = Vec::new();
        for base in &bases {
            let Ok(entries) = fs::read_dir(base) else {
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
                .collect();
            names.sort();
            for name in names {
                if regex.is_match(&name) {
                    next.push(base.join(&name));
                }
            }
        }
        bases = next;
        if bases.is_empty() {
            break;
        }
    }

    bases
        .into_iter()
        .map(|path| {
            let trimmed = path.strip_prefix(".").map(Path::to_path_buf).unwrap_or(path);
            trimmed.to_string_lossy().into_owned()
        })
        .collect()
}

/// Apply tilde, variable, and glob expansion to every command token of a
/// parsed list — the step between parsing and execution.
pub fn expand_command_list(cmds: &[ListItem]) -> CommandList {
    cmds.iter()
        .map(|item| match item {
            ListItem::Stage(stage) => ListItem::Stage(expand_stage(stage)),
            ListItem::Pipe => ListItem::Pipe,
            ListItem::Background => ListItem::Background,
        })
        .collect()
}

fn expand_stage(stage: &Stage) -> Stage {
    match stage {
        Stage::Cmd(tokens) => Stage::Cmd(tokens.iter().flat_map(|t| expand_token(t)).collect()),
        Stage::And(left, right) => {
            Stage::And(expand_command_list(left), expand_command_list(right))
        }
        Stage::Or(left, right) => Stage::Or(expand_command_list(left), expand_command_list(right)),
    }
}

fn expand_token(token: &str) -> Vec<String> {
    let expanded = expand_path(token);
    if expanded.contains(['*', '?', '[']) {
        globpath(&expanded)
    } else {
        vec![expanded]
    }
}

/// Argument shapes that can stand in for a token list.
pub trait IntoArgs {
    fn into_args(self) -> Vec<String>;
}

impl IntoArgs for String {
    fn into_args(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoArgs for &str {
    fn into_args(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoArgs for Vec<String> {
    fn into_args(self) -> Vec<String> {
        self
    }
}

impl IntoArgs for &[String] {
    fn into_args(self) -> Vec<String> {
        self.to_vec()
    }
}

impl IntoArgs for &[&str] {
    fn into_args(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoArgs for i64 {
    fn into_args(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoArgs for f64 {
    fn into_args(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoArgs for bool {
    fn into_args(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

/// Normalise a scalar or list argument into a list of strings.
pub fn ensure_list_of_strs<T: IntoArgs>(x: T) -> Vec<String> {
    x.into_args()
}
