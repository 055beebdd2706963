//! JSONL reading and writing

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for record loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at {path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load every non-blank line of a JSONL file. Any malformed line fails the
/// whole load.
pub fn load_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, LoadError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = serde_json::from_str(trimmed).map_err(|e| LoadError::Parse {
            path: path.display().to_string(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        rows.push(row);
    }

    Ok(rows)
}

/// Load a JSONL file, skipping lines that do not parse. A missing file
/// yields no rows.
pub fn load_jsonl_lenient<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, LoadError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!("Skipping {}:{}: {}", path.display(), idx + 1, e),
        }
    }

    Ok(rows)
}

/// Write records as JSONL, creating parent directories as needed
pub fn write_jsonl<'a, T, I>(path: impl AsRef<Path>, records: I) -> Result<usize, LoadError>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut count = 0;
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;

    Ok(count)
}
