// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure the prediction core can surface. The core
// never retries and never swallows one of these; the
// application layer wraps them in anyhow contexts.
//
//   InputShape          — empty file/line, or mask metadata that
//                         disagrees with the tensors it describes
//   NumericInstability  — non-finite loss or gradient norm
//   Configuration       — unsupported hyperparameter combination
//   Persistence         — checkpoint / loss log read or write failure

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineDpError {
    #[error("input shape error{}: {reason}", file_suffix(.file_id))]
    InputShape {
        file_id: Option<String>,
        reason:  String,
    },

    #[error("non-finite {quantity} ({value}) at epoch {epoch}, batch {batch}")]
    NumericInstability {
        epoch:    usize,
        batch:    usize,
        quantity: &'static str,
        value:    f64,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error at '{}': {reason}", .path.display())]
    Persistence {
        path:   PathBuf,
        reason: String,
    },
}

impl LineDpError {
    pub fn input_shape(file_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InputShape {
            file_id: file_id.map(str::to_string),
            reason:  reason.into(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persistence {
            path:   path.into(),
            reason: reason.to_string(),
        }
    }
}

fn file_suffix(file_id: &Option<String>) -> String {
    match file_id {
        Some(id) => format!(" in file '{id}'"),
        None     => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, LineDpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape_message_names_file() {
        let err = LineDpError::input_shape(Some("src/Foo.java"), "file has no lines");
        assert_eq!(
            err.to_string(),
            "input shape error in file 'src/Foo.java': file has no lines"
        );
    }

    #[test]
    fn test_numeric_instability_message_names_batch() {
        let err = LineDpError::NumericInstability {
            epoch: 3, batch: 7, quantity: "loss", value: f64::NAN,
        };
        assert!(err.to_string().contains("epoch 3, batch 7"));
    }
}
