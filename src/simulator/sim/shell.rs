use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Step(u32), // Step N ticks
  Status,
  Quit,
  Continue,
}

/// Parse one shell line. `None` means the line was rejected and a message was printed.
pub fn parse_command(line: &str) -> Option<Command> {
  let trimmed = line.trim();

  // Empty input: one tick
  if trimmed.is_empty() {
    return Some(Command::Step(1));
  }

  if let Some(rest) = trimmed.strip_prefix("si") {
    let num_str = rest.trim();
    if num_str.is_empty() {
      eprintln!("Error: 'si' requires a number, e.g., 'si 100'");
      return None;
    }
    return match num_str.parse::<u32>() {
      Ok(n) if n > 0 => Some(Command::Step(n)),
      Ok(_) => {
        eprintln!("Error: step count must be greater than 0");
        None
      },
      Err(e) => {
        eprintln!("Error: invalid number '{}': {}", num_str, e);
        None
      },
    };
  }

  match trimmed {
    "q" => Some(Command::Quit),
    "c" => Some(Command::Continue),
    "s" => Some(Command::Status),
    _ => {
      eprintln!(
        "Unknown command: '{}'. Use Enter to step, 'si 100' to step N ticks, 's' for status, 'c' to continue, 'q' to quit",
        trimmed
      );
      None
    },
  }
}

pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self { editor })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(sepconv) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          if let Some(cmd) = parse_command(trimmed) {
            return Ok(cmd);
          }
        },
        // Ctrl-C / Ctrl-D
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err).into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_commands() {
    assert_eq!(parse_command(""), Some(Command::Step(1)));
    assert_eq!(parse_command("si 100"), Some(Command::Step(100)));
    assert_eq!(parse_command("si0"), None);
    assert_eq!(parse_command("si"), None);
    assert_eq!(parse_command("si x"), None);
    assert_eq!(parse_command(" q "), Some(Command::Quit));
    assert_eq!(parse_command("c"), Some(Command::Continue));
    assert_eq!(parse_command("s"), Some(Command::Status));
    assert_eq!(parse_command("step"), None);
  }
}
