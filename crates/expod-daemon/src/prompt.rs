//! Line-based device picker shown before a platform launch
//!
//! Runs on the blocking pool because it reads stdin. An empty answer or EOF
//! cancels the pick.

use std::io::{self, BufRead, Write};

use expod_core::prelude::*;

/// Maximum number of choices shown
const MAX_CHOICES: usize = 9;

/// Result of a pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickResult {
    /// Index into the choices
    Selected(usize),
    /// Empty answer or closed input
    Cancelled,
}

/// Ask the user to choose one of `choices` on the terminal
pub async fn pick_device(title: &str, choices: Vec<String>) -> Result<PickResult> {
    let title = title.to_string();
    tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let mut stderr = io::stderr();
        pick_from(&title, &choices, &mut stdin.lock(), &mut stderr)
    })
    .await
    .map_err(|e| Error::process(format!("Device prompt task failed: {}", e)))?
}

/// Render the menu to `output` and read answers from `input` until a valid one
pub fn pick_from<R: BufRead, W: Write>(
    title: &str,
    choices: &[String],
    input: &mut R,
    output: &mut W,
) -> Result<PickResult> {
    if choices.is_empty() {
        return Ok(PickResult::Cancelled);
    }
    let shown = &choices[..choices.len().min(MAX_CHOICES)];

    writeln!(output, "{}", title)?;
    for (i, choice) in shown.iter().enumerate() {
        writeln!(output, "  {}. {}", i + 1, choice)?;
    }

    loop {
        write!(output, "Select [1-{}] (enter to cancel): ", shown.len())?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(PickResult::Cancelled);
        }
        let answer = line.trim();
        if answer.is_empty() {
            return Ok(PickResult::Cancelled);
        }

        match answer.parse::<usize>() {
            Ok(n) if (1..=shown.len()).contains(&n) => return Ok(PickResult::Selected(n - 1)),
            _ => writeln!(output, "Invalid choice: {}", answer)?,
        }
    }
}
