use std::io::{self, Write};

use coral::context::ShellContext;

fn main() {
    ctrlc::set_handler(|| {
        println!();
        let _ = io::stdout().flush();
    })
    .expect("Failed to set Ctrl-C handler");

    let ctx = ShellContext::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut last_exit_code: i32 = 0;

    loop {
        // Report background jobs that finished since the last prompt.
        for message in ctx.jobs().reap() {
            println!("{message}");
        }

        print!("coral> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    continue;
                }
                last_exit_code = ctx.run_line(trimmed);
                if let Some(code) = ctx.exit_requested() {
                    last_exit_code = code;
                    break;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                continue;
            }
            Err(error) => {
                eprintln!("Error reading input: {error}");
                break;
            }
        }
    }

    ctx.jobs().kill_all_jobs();
    std::process::exit(last_exit_code);
}
