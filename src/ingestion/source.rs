use anyhow::Context;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

enum State {
    /// File not opened yet; opening happens on the first read.
    Pending(PathBuf),
    Open(Lines<BufReader<File>>),
    Memory(std::vec::IntoIter<String>),
    Done,
}

/// A lazy, finite, single-pass sequence of text lines.
///
/// Lines are trimmed of surrounding whitespace. Once the end is reached (or a read fails) the
/// source stays exhausted.
pub struct LineSource {
    name: String,
    state: State,
}

impl LineSource {
    /// A source backed by a file. The file is opened on the first `next_line` call.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            state: State::Pending(path),
        }
    }

    /// A source over lines already in memory.
    pub fn from_lines<I, S>(name: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self {
            name: name.to_string(),
            state: State::Memory(lines.into_iter()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next line, or `Ok(None)` at the end of the source.
    pub async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        if let State::Pending(path) = &self.state {
            let path = path.clone();
            match File::open(&path).await {
                Ok(file) => self.state = State::Open(BufReader::new(file).lines()),
                Err(e) => {
                    self.state = State::Done;
                    return Err(anyhow::Error::new(e).context(format!("open {}", path.display())));
                }
            }
        }

        let read = match &mut self.state {
            State::Open(lines) => lines
                .next_line()
                .await
                .with_context(|| format!("read {}", self.name)),
            State::Memory(lines) => Ok(lines.next()),
            State::Pending(_) | State::Done => Ok(None),
        };

        match read {
            Ok(Some(line)) => Ok(Some(line.trim().to_string())),
            Ok(None) => {
                self.state = State::Done;
                Ok(None)
            }
            Err(e) => {
                self.state = State::Done;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource").field("name", &self.name).finish()
    }
}
