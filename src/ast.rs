/// A single executable unit in a pipeline: a plain command, or a
/// short-circuit composite over two sub-command-lists.
#[derive(Debug, Clone)]
pub enum Stage {
    /// A command's tokens, redirection markers still embedded.
    Cmd(Vec<String>),
    /// `cmd1 && cmd2` — run `cmd2` only if `cmd1` succeeded.
    And(CommandList, CommandList),
    /// `cmd1 || cmd2` — run `cmd2` only if `cmd1` failed.
    Or(CommandList, CommandList),
}

/// One entry of a command list: a stage, or a connector between stages.
#[derive(Debug, Clone)]
pub enum ListItem {
    Stage(Stage),
    /// `|` — the previous stage's stdout feeds the next stage's stdin.
    Pipe,
    /// Trailing `&` — run the whole pipeline in the background.
    Background,
}

/// A parsed pipeline: stages separated by `Pipe`, optionally ending in
/// `Background`. Connectors only ever appear between stages, except for the
/// trailing background marker.
pub type CommandList = Vec<ListItem>;

/// Render a command list back to a shell-like string, for job displays.
pub fn render(cmds: &[ListItem]) -> String {
    let mut parts = Vec::new();
    for item in cmds {
        match item {
            ListItem::Stage(Stage::Cmd(tokens)) => parts.push(tokens.join(" ")),
            ListItem::Stage(Stage::And(left, right)) => {
                parts.push(format!("{} && {}", render(left), render(right)));
            }
            ListItem::Stage(Stage::Or(left, right)) => {
                parts.push(format!("{} || {}", render(left), render(right)));
            }
            ListItem::Pipe => parts.push("|".to_string()),
            ListItem::Background => parts.push("&".to_string()),
        }
    }
    parts.join(" ")
}
