use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

/// Build the "did you mean" block shown after a command-not-found error.
///
/// Candidates are alias names plus the entries of every `PATH` directory,
/// ranked by edit distance to the mistyped name. Returns an empty string
/// when nothing is close enough, otherwise a newline-prefixed block ready
/// to append to the diagnostic.
pub fn suggest_commands(name: &str, aliases: &[String], path_dirs: &[PathBuf]) -> String {
    let mut candidates: BTreeSet<String> = aliases.iter().cloned().collect();
    for dir in path_dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if let Ok(file_name) = entry.file_name().into_string() {
                candidates.insert(file_name);
            }
        }
    }

    let cutoff = threshold(name);
    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter(|candidate| candidate != name)
        .filter_map(|candidate| {
            let distance = levenshtein(name, &candidate);
            (distance <= cutoff).then_some((distance, candidate))
        })
        .collect();
    scored.sort();
    scored.truncate(3);

    if scored.is_empty() {
        return String::new();
    }

    let mut out = String::from("\nDid you mean one of the following?");
    for (_, candidate) in scored {
        out.push_str("\n    ");
        out.push_str(&candidate);
    }
    out
}

/// How far away a candidate may be and still count as similar. Transposed
/// letters cost two edits, so even short names allow a distance of two.
fn threshold(name: &str) -> usize {
    (1 + (name.len() + 3) / 4).min(3)
}

/// Classic two-row Levenshtein edit distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("grep", "griep"), 1);
    }

    #[test]
    fn close_alias_is_suggested() {
        let aliases = vec!["grep".to_string(), "gzip".to_string()];
        let block = suggest_commands("grpe", &aliases, &[]);
        assert!(block.contains("Did you mean"));
        assert!(block.contains("grep"));
        assert!(!block.contains("gzip"));
    }

    #[test]
    fn distant_names_produce_nothing() {
        let aliases = vec!["ls".to_string()];
        assert_eq!(suggest_commands("qqqqqqqq", &aliases, &[]), "");
    }

    #[test]
    fn suggestions_are_capped_at_three() {
        let aliases: Vec<String> = ["eat1", "eat2", "eat3", "eat4", "eat5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let block = suggest_commands("eat", &aliases, &[]);
        assert_eq!(block.matches("\n    ").count(), 3);
    }
}
