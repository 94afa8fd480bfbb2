//! Classifier label files
//!
//! One label per line, optionally prefixed by its class index:
//! ```text
//! 0 Class 1
//! 1 Class 2
//! 2 Background
//! ```

use std::path::Path;

use crate::ClassifyError;

/// Parse label lines; the line order is the class order
pub fn parse_labels(text: &str) -> Result<Vec<String>, ClassifyError> {
    let mut labels = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let label = match line.split_once(char::is_whitespace) {
            Some((index, rest)) if index.parse::<usize>().is_ok() => rest.trim(),
            _ => line,
        };
        labels.push(label.to_string());
    }

    if labels.is_empty() {
        return Err(ClassifyError::Labels("no labels found".to_string()));
    }
    Ok(labels)
}

/// Read and parse a label file
pub fn load_labels(path: &Path) -> Result<Vec<String>, ClassifyError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ClassifyError::Labels(format!("{}: {}", path.display(), e)))?;
    parse_labels(&text)
}
