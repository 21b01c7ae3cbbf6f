use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::parser;
use crate::status::ProcStatus;

/// Output of a simple (two-argument) callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleOutput {
    /// Nothing to write.
    Empty,
    /// Written to stdout.
    Stdout(String),
    /// Written to stdout and stderr respectively; absent parts are skipped.
    Both(Option<String>, Option<String>),
}

/// Two-argument callable shape: `(args, stdin_text)`. Errors are swallowed
/// by the proxy runtime and become an unsuccessful exit.
pub type SimpleFn =
    dyn Fn(&[String], Option<&str>) -> Result<SimpleOutput, String> + Send + Sync;

/// Four-argument callable shape: `(args, stdin, stdout, stderr)`. Returning
/// `None` means success.
pub type StreamsFn = dyn Fn(&[String], &mut dyn BufRead, &mut dyn Write, &mut dyn Write) -> Option<ProcStatus>
    + Send
    + Sync;

/// A callable alias in one of its two accepted shapes.
#[derive(Clone)]
pub enum Callable {
    Simple(Arc<SimpleFn>),
    Streams(Arc<StreamsFn>),
}

impl Callable {
    /// Bind `prefix` as leading arguments, preserving the callable's shape.
    pub fn partial(self, prefix: Vec<String>) -> Callable {
        if prefix.is_empty() {
            return self;
        }
        match self {
            Callable::Simple(f) => Callable::Simple(Arc::new(move |args, stdin| {
                let mut full = prefix.clone();
                full.extend_from_slice(args);
                f(&full, stdin)
            })),
            Callable::Streams(f) => Callable::Streams(Arc::new(move |args, stdin, stdout, stderr| {
                let mut full = prefix.clone();
                full.extend_from_slice(args);
                f(&full, stdin, stdout, stderr)
            })),
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Simple(_) => f.write_str("Callable::Simple(..)"),
            Callable::Streams(_) => f.write_str("Callable::Streams(..)"),
        }
    }
}

/// A stored alias value: a token list subject to recursive expansion, or a
/// callable subject to partial application.
#[derive(Debug, Clone)]
pub enum AliasValue {
    Tokens(Vec<String>),
    Callable(Callable),
}

/// Result of looking up an alias with expansion applied.
#[derive(Debug)]
pub enum Expanded {
    Tokens(Vec<String>),
    Callable(Callable),
}

/// The alias table: command name → token list or callable.
#[derive(Debug, Default)]
pub struct Aliases {
    raw: HashMap<String, AliasValue>,
}

impl Aliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a token-list alias from a string, word-splitting by shell
    /// rules.
    pub fn insert_str(&mut self, key: &str, value: &str) {
        self.raw
            .insert(key.to_string(), AliasValue::Tokens(parser::tokenize(value)));
    }

    pub fn insert_tokens(&mut self, key: &str, tokens: Vec<String>) {
        self.raw.insert(key.to_string(), AliasValue::Tokens(tokens));
    }

    pub fn insert_callable(&mut self, key: &str, callable: Callable) {
        self.raw.insert(key.to_string(), AliasValue::Callable(callable));
    }

    pub fn insert_simple<F>(&mut self, key: &str, f: F)
    where
        F: Fn(&[String], Option<&str>) -> Result<SimpleOutput, String> + Send + Sync + 'static,
    {
        self.insert_callable(key, Callable::Simple(Arc::new(f)));
    }

    pub fn insert_streams<F>(&mut self, key: &str, f: F)
    where
        F: Fn(&[String], &mut dyn BufRead, &mut dyn Write, &mut dyn Write) -> Option<ProcStatus>
            + Send
            + Sync
            + 'static,
    {
        self.insert_callable(key, Callable::Streams(Arc::new(f)));
    }

    pub fn remove(&mut self, key: &str) -> Option<AliasValue> {
        self.raw.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    /// All alias names, unordered.
    pub fn names(&self) -> Vec<String> {
        self.raw.keys().cloned().collect()
    }

    /// The raw, unexpanded value for `key`.
    pub fn raw(&self, key: &str) -> Option<&AliasValue> {
        self.raw.get(key)
    }

    /// Look up `key`, recursively expanding token-list aliases.
    ///
    /// Expansion walks the leftmost token: if it names another alias it is
    /// spliced in and the walk continues, accumulating trailing arguments.
    /// A token already seen on the current path (or absent from the table)
    /// stops the walk, so self-references like `ls=ls --color=auto`
    /// terminate. Reaching a callable partially applies the accumulated
    /// arguments as a bound prefix.
    pub fn get(&self, key: &str) -> Option<Expanded> {
        let mut value = self.raw.get(key)?.clone();
        let mut seen: HashSet<String> = HashSet::from([key.to_string()]);
        let mut acc: Vec<String> = Vec::new();

        loop {
            match value {
                AliasValue::Callable(callable) => {
                    return Some(Expanded::Callable(callable.partial(acc)));
                }
                AliasValue::Tokens(mut tokens) => {
                    let Some(head) = tokens.first().cloned() else {
                        return Some(Expanded::Tokens(acc));
                    };
                    match self.raw.get(&head) {
                        Some(next) if !seen.contains(&head) => {
                            seen.insert(head);
                            let mut rest = tokens.split_off(1);
                            rest.extend(acc);
                            acc = rest;
                            value = next.clone();
                        }
                        _ => {
                            tokens.extend(acc);
                            return Some(Expanded::Tokens(tokens));
                        }
                    }
                }
            }
        }
    }
}
