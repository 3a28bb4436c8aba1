//! Event runs stored as JSON lines
//!
//! Each run lives in `run<NNNNNN>.jsonl` inside one directory, one
//! [`EventPair`] object per line. Blank lines are ignored.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use aligner::{AlignError, EventPair, EventSource, EventStream, RunId};

use crate::HarnessError;

/// Event source reading runs from a directory of JSON-lines files
#[derive(Debug, Clone)]
pub struct JsonLinesEventSource {
    dir: PathBuf,
}

impl JsonLinesEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the events of `run`
    pub fn run_path(&self, run: RunId) -> PathBuf {
        run_file(&self.dir, run)
    }
}

/// `<dir>/run<NNNNNN>.jsonl`
pub fn run_file(dir: &Path, run: RunId) -> PathBuf {
    dir.join(format!("run{run:06}.jsonl"))
}

impl EventSource for JsonLinesEventSource {
    fn open(&mut self, run: RunId) -> Result<EventStream, AlignError> {
        let path = self.run_path(run);
        let file = File::open(&path).map_err(|e| AlignError::io(&path, e))?;
        log::debug!("Reading run {run} from {}", path.display());

        let lines = BufReader::new(file).lines().enumerate();
        Ok(Box::new(lines.filter_map(move |(idx, line)| {
            let line_no = idx + 1;
            match line {
                Err(e) => Some(Err(AlignError::EventStream(format!(
                    "{}:{line_no}: {e}",
                    path.display()
                )))),
                Ok(text) if text.trim().is_empty() => None,
                Ok(text) => Some(serde_json::from_str::<EventPair>(&text).map_err(|e| {
                    AlignError::EventStream(format!("{}:{line_no}: {e}", path.display()))
                })),
            }
        })))
    }
}

/// Write `events` as one run file, creating the parent directory.
pub fn write_run(path: &Path, events: &[EventPair]) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| HarnessError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer
            .write_all(b"\n")
            .map_err(|e| HarnessError::io(path, e))?;
    }
    writer.flush().map_err(|e| HarnessError::io(path, e))?;
    log::info!("Wrote {} events to {}", events.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use tempfile::TempDir;

    #[test]
    fn test_written_run_reads_back() {
        let dir = TempDir::new().unwrap();
        let events = vec![
            EventPair::new(0)
                .with_prediction(1, Vector2::new(0.5, -0.25))
                .with_hit(1, Vector2::new(0.4, -0.2)),
            EventPair::new(1).with_prediction(2, Vector2::new(1.0, 1.0)),
        ];
        write_run(&run_file(dir.path(), 7), &events).unwrap();

        let mut source = JsonLinesEventSource::new(dir.path());
        let read: Vec<EventPair> = source
            .open(7)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read, events);
    }

    #[test]
    fn test_blank_lines_skipped_and_bad_lines_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            run_file(dir.path(), 1),
            "{\"event\":0,\"sensors\":{}}\n\n{\"event\":\n",
        )
        .unwrap();

        let mut source = JsonLinesEventSource::new(dir.path());
        let items: Vec<_> = source.open(1).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(AlignError::EventStream(msg)) => assert!(msg.contains(":3:"), "{msg}"),
            other => panic!("expected a stream error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_run_file() {
        let dir = TempDir::new().unwrap();
        let mut source = JsonLinesEventSource::new(dir.path());
        assert!(matches!(source.open(3), Err(AlignError::Io { .. })));
    }
}
