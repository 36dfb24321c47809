//! Writer for the `git fast-import` stream.
//!
//! Control lines are LF-terminated ASCII; payloads are written as raw bytes
//! behind an exact `data <len>` header.

use std::io::{self, Write};

/// File mode of an inline file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Normal,
    Executable,
    Symlink,
}

impl FileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FileMode::Normal => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
        }
    }
}

/// Header of one commit block
#[derive(Debug, Clone)]
pub struct CommitHeader<'a> {
    pub branch_ref: &'a str,
    pub mark: u32,
    pub committer: &'a str,
    pub timestamp: i64,
    pub offset: &'a str,
    pub encoding: &'a str,
    pub message: &'a [u8],
    pub from: Option<u32>,
}

pub struct ImportStream<W: Write> {
    out: W,
}

impl<W: Write> ImportStream<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write everything up to and including `deleteall`
    pub fn begin_commit(&mut self, header: &CommitHeader) -> io::Result<()> {
        writeln!(self.out, "commit {}", header.branch_ref)?;
        writeln!(self.out, "mark :{}", header.mark)?;
        writeln!(
            self.out,
            "committer {} <> {} {}",
            header.committer, header.timestamp, header.offset
        )?;
        writeln!(self.out, "encoding {}", header.encoding)?;
        self.data(header.message)?;
        if let Some(from) = header.from {
            writeln!(self.out, "from :{}", from)?;
        }
        writeln!(self.out, "deleteall")
    }

    /// One `M <mode> inline <path>` entry with its content
    pub fn inline_file(&mut self, mode: FileMode, path: &str, content: &[u8]) -> io::Result<()> {
        writeln!(self.out, "M {} inline {}", mode.as_str(), quote_path(path))?;
        self.data(content)
    }

    /// Lightweight tag pointing at `mark`
    pub fn tag(&mut self, name: &str, mark: u32) -> io::Result<()> {
        writeln!(self.out, "reset refs/tags/{}", name)?;
        writeln!(self.out, "from :{}", mark)?;
        writeln!(self.out)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn data(&mut self, bytes: &[u8]) -> io::Result<()> {
        writeln!(self.out, "data {}", bytes.len())?;
        self.out.write_all(bytes)?;
        writeln!(self.out)
    }
}

/// C-style quote a path when fast-import would otherwise misread it
pub fn quote_path(path: &str) -> String {
    let needs_quoting = path.starts_with('"') || path.contains('\n') || path.contains('\\');
    if !needs_quoting {
        return path.to_string();
    }

    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Encode a commit message in the charset announced by its `encoding` line.
///
/// Latin-1 and Latin-9 are mapped per character, with `?` for anything the
/// charset cannot hold; every other charset name gets the UTF-8 bytes.
pub fn encode_message(text: &str, encoding: &str) -> Vec<u8> {
    match encoding.to_ascii_lowercase().as_str() {
        "iso-8859-15" | "latin-9" | "latin9" => text.chars().map(latin9_byte).collect(),
        "iso-8859-1" | "latin-1" | "latin1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
        _ => text.as_bytes().to_vec(),
    }
}

fn latin9_byte(c: char) -> u8 {
    match c {
        '€' => 0xA4,
        'Š' => 0xA6,
        'š' => 0xA8,
        'Ž' => 0xB4,
        'ž' => 0xB8,
        'Œ' => 0xBC,
        'œ' => 0xBD,
        'Ÿ' => 0xBE,
        // Latin-1 code points replaced in Latin-9
        '\u{A4}' | '\u{A6}' | '\u{A8}' | '\u{B4}' | '\u{B8}' | '\u{BC}' | '\u{BD}' | '\u{BE}' => b'?',
        other => u8::try_from(u32::from(other)).unwrap_or(b'?'),
    }
}
