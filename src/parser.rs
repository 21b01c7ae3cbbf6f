use crate::ast::{CommandList, ListItem, Stage};

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace ends it
    InWord,
    /// Inside double quotes — whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

/// Tokenize a shell input line into a list of words.
///
/// Handles:
/// - Unquoted words split by whitespace
/// - Double-quoted strings ("hello world" → one token)
/// - Single-quoted strings ('hello world' → one token)
/// - Backslash escapes (hello\ world → one token)
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            // ── Normal state: between tokens ──
            (State::Normal, ' ' | '\t') => {
                // Skip whitespace between tokens
            }
            (State::Normal, '"') => {
                state = State::InDoubleQuote;
            }
            (State::Normal, '\'') => {
                state = State::InSingleQuote;
            }
            (State::Normal, '\\') => {
                // Escape: take the next character literally
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                state = State::InWord;
            }
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            // ── InWord state: building an unquoted token ──
            (State::InWord, ' ' | '\t') => {
                tokens.push(std::mem::take(&mut current));
                state = State::Normal;
            }
            (State::InWord, '"') => {
                // Transition into double quotes mid-word (e.g., wo"rld")
                state = State::InDoubleQuote;
            }
            (State::InWord, '\'') => {
                state = State::InSingleQuote;
            }
            (State::InWord, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (State::InWord, c) => {
                current.push(c);
            }

            // ── InDoubleQuote state: inside "..." ──
            (State::InDoubleQuote, '"') => {
                // Closing quote — return to InWord (there might be more after the quote)
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => {
                // Inside double quotes, backslash only escapes: \ " $ `
                match chars.peek() {
                    Some(&'"' | &'\\' | &'$' | &'`') => {
                        if let Some(next) = chars.next() {
                            current.push(next);
                        }
                    }
                    _ => {
                        current.push('\\');
                    }
                }
            }
            (State::InDoubleQuote, c) => {
                current.push(c);
            }

            // ── InSingleQuote state: inside '...' ──
            (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InSingleQuote, c) => {
                // Everything is literal inside single quotes — no escaping at all
                current.push(c);
            }
        }
    }

    // Don't forget the last token if we were mid-word
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Parse a shell input line into a command list.
///
/// Top-level tokens split on `&&`/`||` (word forms `and`/`or` also
/// accepted) into left-associative composite stages, each segment splits on
/// `|` into pipeline stages, and a trailing `&` marks the pipeline as
/// background. Returns `Ok(None)` for empty input and a syntax-error
/// message for dangling operators.
pub fn parse_line(input: &str) -> Result<Option<CommandList>, String> {
    let mut tokens = tokenize(input);
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut background = false;
    if tokens.last().is_some_and(|t| t == "&") {
        tokens.pop();
        background = true;
        if tokens.is_empty() {
            return Err(syntax_error("&"));
        }
    }

    // Split on chain operators, keeping the operator that gates each segment.
    let mut first: Vec<String> = Vec::new();
    let mut rest: Vec<(ChainOp, Vec<String>)> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut pending: Option<ChainOp> = None;

    for token in tokens {
        match chain_op(&token) {
            Some(op) => {
                if current.is_empty() {
                    return Err(syntax_error(op.display()));
                }
                match pending.take() {
                    None => first = std::mem::take(&mut current),
                    Some(prev) => rest.push((prev, std::mem::take(&mut current))),
                }
                pending = Some(op);
            }
            None => current.push(token),
        }
    }

    match pending.take() {
        Some(op) if current.is_empty() => {
            return Err(format!(
                "coral: syntax error: expected command after `{}'",
                op.display()
            ));
        }
        Some(prev) => rest.push((prev, current)),
        None => first = current,
    }

    // Fold the chain left-associatively into nested composite stages.
    let mut list = parse_pipeline(first)?;
    for (op, segment) in rest {
        let right = parse_pipeline(segment)?;
        let stage = match op {
            ChainOp::And => Stage::And(list, right),
            ChainOp::Or => Stage::Or(list, right),
        };
        list = vec![ListItem::Stage(stage)];
    }

    if background {
        list.push(ListItem::Background);
    }
    Ok(Some(list))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChainOp {
    And,
    Or,
}

impl ChainOp {
    fn display(self) -> &'static str {
        match self {
            ChainOp::And => "&&",
            ChainOp::Or => "||",
        }
    }
}

// The word forms mirror the connective keywords the composite stages are
// named after; both spellings produce the same stage kinds.
fn chain_op(token: &str) -> Option<ChainOp> {
    match token {
        "&&" | "and" => Some(ChainOp::And),
        "||" | "or" => Some(ChainOp::Or),
        _ => None,
    }
}

/// Split one chain segment on `|` into pipeline stages.
fn parse_pipeline(tokens: Vec<String>) -> Result<CommandList, String> {
    let mut list: CommandList = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for token in tokens {
        if token == "|" {
            if current.is_empty() {
                return Err(syntax_error("|"));
            }
            list.push(ListItem::Stage(Stage::Cmd(std::mem::take(&mut current))));
            list.push(ListItem::Pipe);
        } else {
            current.push(token);
        }
    }

    if current.is_empty() {
        return Err(syntax_error("|"));
    }
    list.push(ListItem::Stage(Stage::Cmd(current)));
    Ok(list)
}

fn syntax_error(near: &str) -> String {
    format!("coral: syntax error near unexpected token `{near}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_tokens(item: &ListItem) -> Vec<String> {
        match item {
            ListItem::Stage(Stage::Cmd(tokens)) => tokens.clone(),
            other => panic!("expected a command stage, got {other:?}"),
        }
    }

    #[test]
    fn simple_command() {
        let tokens = tokenize("echo hello world");
        assert_eq!(tokens, vec!["echo", "hello", "world"]);
    }

    #[test]
    fn double_quotes_preserve_spaces() {
        let tokens = tokenize(r#"echo "hello   world""#);
        assert_eq!(tokens, vec!["echo", "hello   world"]);
    }

    #[test]
    fn single_quotes_no_escaping() {
        let tokens = tokenize(r"'hello\nworld'");
        assert_eq!(tokens, vec![r"hello\nworld"]);
    }

    #[test]
    fn backslash_escapes_space() {
        let tokens = tokenize(r"echo hello\ world");
        assert_eq!(tokens, vec!["echo", "hello world"]);
    }

    #[test]
    fn quotes_mid_word() {
        let tokens = tokenize(r#"he"llo wor"ld"#);
        assert_eq!(tokens, vec!["hello world"]);
    }

    #[test]
    fn backslash_in_double_quotes() {
        let tokens = tokenize(r#""hello\\world""#);
        assert_eq!(tokens, vec![r"hello\world"]);

        let tokens = tokenize(r#""hello\"world""#);
        assert_eq!(tokens, vec![r#"hello"world"#]);
    }

    #[test]
    fn empty_input_parses_to_none() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn pipeline_splits_on_pipe() {
        let cmds = parse_line("ls -l | wc").unwrap().unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(stage_tokens(&cmds[0]), vec!["ls", "-l"]);
        assert!(matches!(cmds[1], ListItem::Pipe));
        assert_eq!(stage_tokens(&cmds[2]), vec!["wc"]);
    }

    #[test]
    fn trailing_ampersand_marks_background() {
        let cmds = parse_line("sleep 5 &").unwrap().unwrap();
        assert!(matches!(cmds.last(), Some(ListItem::Background)));
        assert_eq!(stage_tokens(&cmds[0]), vec!["sleep", "5"]);
    }

    #[test]
    fn and_chain_becomes_composite_stage() {
        let cmds = parse_line("false && echo x").unwrap().unwrap();
        assert_eq!(cmds.len(), 1);
        let ListItem::Stage(Stage::And(left, right)) = &cmds[0] else {
            panic!("expected an `and` composite");
        };
        assert_eq!(stage_tokens(&left[0]), vec!["false"]);
        assert_eq!(stage_tokens(&right[0]), vec!["echo", "x"]);
    }

    #[test]
    fn word_form_connectives_build_composites() {
        let cmds = parse_line("false and echo x").unwrap().unwrap();
        assert_eq!(cmds.len(), 1);
        let ListItem::Stage(Stage::And(left, right)) = &cmds[0] else {
            panic!("expected an `and` composite");
        };
        assert_eq!(stage_tokens(&left[0]), vec!["false"]);
        assert_eq!(stage_tokens(&right[0]), vec!["echo", "x"]);

        let cmds = parse_line("false or echo y").unwrap().unwrap();
        assert!(matches!(&cmds[0], ListItem::Stage(Stage::Or(_, _))));

        assert!(parse_line("echo hi and").is_err());
    }

    #[test]
    fn chains_fold_left_associatively() {
        // a && b || c  →  (a && b) || c
        let cmds = parse_line("a && b || c").unwrap().unwrap();
        assert_eq!(cmds.len(), 1);
        let ListItem::Stage(Stage::Or(left, right)) = &cmds[0] else {
            panic!("expected an `or` composite at the top");
        };
        assert!(matches!(&left[0], ListItem::Stage(Stage::And(_, _))));
        assert_eq!(stage_tokens(&right[0]), vec!["c"]);
    }

    #[test]
    fn pipes_nest_inside_chain_segments() {
        let cmds = parse_line("ls | wc && echo done").unwrap().unwrap();
        let ListItem::Stage(Stage::And(left, _)) = &cmds[0] else {
            panic!("expected an `and` composite");
        };
        assert_eq!(left.len(), 3);
        assert!(matches!(left[1], ListItem::Pipe));
    }

    #[test]
    fn dangling_operators_are_errors() {
        assert!(parse_line("&& echo hi").is_err());
        assert!(parse_line("echo hi &&").is_err());
        assert!(parse_line("| wc").is_err());
        assert!(parse_line("ls |").is_err());
        assert!(parse_line("&").is_err());
    }
}
