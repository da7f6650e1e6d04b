//! Yes/no confirmation.

use std::io::{self, BufRead, Write};

/// Asks `prompt` until the answer is `y` or `n` (either case).
///
/// An empty answer, or the end of input, picks `default`. The default
/// choice is shown in brackets: `Confirm [n]|y: `.
pub fn confirm<R: BufRead, W: Write>(mut input: R, mut output: W, prompt: &str, default: bool) -> io::Result<bool> {
    let choices = if default { "[y]|n" } else { "[n]|y" };
    loop {
        write!(output, "{prompt} {choices}: ")?;
        output.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(default);
        }
        match answer.trim() {
            "" => return Ok(default),
            "y" | "Y" => return Ok(true),
            "n" | "N" => return Ok(false),
            _ => writeln!(output, "please enter y or n.")?,
        }
    }
}
