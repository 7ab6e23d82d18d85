// src/sys/tty.rs
//
// The AWS CLI captures stdin/stdout/stderr of a credential_process, so anything
// meant for the human has to go to the controlling terminal directly.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

const CONTROLLING_TERMINAL: &str = "/dev/tty";

pub struct ControllingTerminal {
    file: File,
}

impl ControllingTerminal {
    pub fn open() -> io::Result<Self> {
        Self::open_path(Path::new(CONTROLLING_TERMINAL))
    }

    fn open_path(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Writes `prompt` and returns the next line with surrounding whitespace removed.
    pub fn prompt(&mut self, prompt: &str) -> io::Result<String> {
        let reader = BufReader::new(self.file.try_clone()?);
        prompt_line(reader, &mut self.file, prompt)
    }

    pub fn notify(&mut self, message: &str) -> io::Result<()> {
        self.file.write_all(message.as_bytes())?;
        self.file.flush()
    }
}

pub(crate) fn prompt_line<R: BufRead, W: Write>(
    mut reader: R,
    writer: &mut W,
    prompt: &str,
) -> io::Result<String> {
    writer.write_all(prompt.as_bytes())?;
    writer.flush()?;

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "terminal closed before a line was read",
        ));
    }
    Ok(line.trim().to_string())
}
