//! `.mem` memory images: one 16-bit two's-complement word per line in hex, `//` comments allowed.
//! The binary variant is a single run of '0'/'1' characters, 16 per word.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::arch::fixed::{Sample, DATA_WIDTH};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemFormat {
  #[default]
  Hex,
  Binary,
}

fn strip_comment(line: &str) -> &str {
  match line.find("//") {
    Some(pos) => &line[..pos],
    None => line,
  }
}

pub fn parse_hex(text: &str, path: &Path) -> Result<Vec<Sample>> {
  let mut words = Vec::new();
  for (idx, line) in text.lines().enumerate() {
    let body = strip_comment(line).trim();
    if body.is_empty() {
      continue;
    }
    let word = u16::from_str_radix(body, 16).map_err(|e| Error::MemFile {
      path: path.to_path_buf(),
      line: idx + 1,
      reason: format!("'{}' is not a 16-bit hex word: {}", body, e),
    })?;
    words.push(word as Sample);
  }
  Ok(words)
}

pub fn parse_binary(text: &str, path: &Path) -> Result<Vec<Sample>> {
  let mut bits = String::new();
  for (idx, line) in text.lines().enumerate() {
    for c in strip_comment(line).chars().filter(|c| !c.is_whitespace()) {
      if c != '0' && c != '1' {
        return Err(Error::MemFile {
          path: path.to_path_buf(),
          line: idx + 1,
          reason: format!("unexpected character '{}' in binary image", c),
        });
      }
      bits.push(c);
    }
  }

  let width = DATA_WIDTH as usize;
  let tail = bits.len() % width;
  if tail != 0 {
    log::warn!("{}: ignoring {} trailing bits", path.display(), tail);
  }
  let mut words = Vec::with_capacity(bits.len() / width);
  for chunk in bits.as_bytes().chunks_exact(width) {
    let word = chunk.iter().fold(0u16, |acc, &b| (acc << 1) | (b - b'0') as u16);
    words.push(word as Sample);
  }
  Ok(words)
}

pub fn read_mem(path: &Path, format: MemFormat) -> Result<Vec<Sample>> {
  let text = fs::read_to_string(path)?;
  let words = match format {
    MemFormat::Hex => parse_hex(&text, path)?,
    MemFormat::Binary => parse_binary(&text, path)?,
  };
  log::debug!("loaded {} words from {}", words.len(), path.display());
  Ok(words)
}

pub fn format_hex(data: &[Sample], description: &str) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "// {}", description);
  let _ = writeln!(out, "// Format: 16-bit signed fixed-point (Q8.8)");
  let _ = writeln!(out, "// Total entries: {}", data.len());
  let _ = writeln!(out, "//");
  for &v in data {
    let _ = writeln!(out, "{:04x}", v as u16);
  }
  out
}

pub fn format_binary(data: &[Sample]) -> String {
  let mut out = String::with_capacity(data.len() * DATA_WIDTH as usize + 1);
  for &v in data {
    let _ = write!(out, "{:016b}", v as u16);
  }
  out.push('\n');
  out
}

pub fn write_mem(path: &Path, data: &[Sample], format: MemFormat, description: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  let text = match format {
    MemFormat::Hex => format_hex(data, description),
    MemFormat::Binary => format_binary(data),
  };
  fs::write(path, text)?;
  log::info!("saved {} values to {}", data.len(), path.display());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_hex_with_header() {
    let text = "// Input Feature Map Data\n// Total entries: 3\n//\n0080\nff80\n\n7fff // max\n";
    let words = parse_hex(text, Path::new("in.mem")).unwrap();
    assert_eq!(words, vec![128, -128, Sample::MAX]);
  }

  #[test]
  fn test_parse_hex_reports_line() {
    let err = parse_hex("0001\nzz\n", Path::new("bad.mem")).unwrap_err();
    match err {
      Error::MemFile { line, .. } => assert_eq!(line, 2),
      other => panic!("unexpected error {:?}", other),
    }
    assert!(parse_hex("10000\n", Path::new("wide.mem")).is_err());
  }

  #[test]
  fn test_binary_single_line() {
    let text = "0000000100000000 1111111110000000\n";
    assert_eq!(parse_binary(text, Path::new("b.mem")).unwrap(), vec![256, -128]);
    // partial trailing word dropped
    assert_eq!(parse_binary("00000000000000011", Path::new("b.mem")).unwrap(), vec![1]);
    assert!(parse_binary("0102", Path::new("b.mem")).is_err());
  }

  #[test]
  fn test_written_hex_parses_back() {
    let data = vec![0, 1, -1, Sample::MIN, 0x1234];
    let text = format_hex(&data, "Convolution Weights");
    assert!(text.starts_with("// Convolution Weights\n"));
    assert!(text.contains("\nffff\n"));
    assert_eq!(parse_hex(&text, Path::new("w.mem")).unwrap(), data);
    assert_eq!(parse_binary(&format_binary(&data), Path::new("w.mem")).unwrap(), data);
  }

  #[test]
  fn test_write_and_read_file() {
    let dir = std::env::temp_dir().join(format!("sepconv-memfile-{}", std::process::id()));
    let path = dir.join("data.mem");
    write_mem(&path, &[5, -5], MemFormat::Hex, "test").unwrap();
    assert_eq!(read_mem(&path, MemFormat::Hex).unwrap(), vec![5, -5]);
    let _ = fs::remove_dir_all(&dir);
  }
}
