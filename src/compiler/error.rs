use std::fmt;

/// A problem found while emitting code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitError {
    pub line: usize,
    pub message: String,
}

/// Every error recorded during one emission, ordered by line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitErrors {
    pub file: String,
    pub errors: Vec<EmitError>,
}

impl EmitErrors {
    pub fn new(file: &str, mut errors: Vec<EmitError>) -> Self {
        errors.sort_by_key(|e| e.line);
        Self {
            file: file.to_string(),
            errors,
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.message.as_str())
    }
}

impl fmt::Display for EmitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}:{}: {}", self.file, error.line, error.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for EmitErrors {}
