//! Terminal prompts.

use std::io::{self, BufRead, IsTerminal, Write};

use herald_control::{Answer, Prompt};

/// Whether stdin is attached to a terminal.
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Ask `prompt` on stderr and read one line from stdin.
pub fn ask(prompt: &Prompt) -> io::Result<Answer> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(Answer::Typed(line))
}
