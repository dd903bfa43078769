//! Errors raised by the stores.

use std::collections::HashMap;

/// Field name to the messages recorded against it
pub type FieldErrors = HashMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Input rejected before anything was written
    #[error("validation failed for {} field(s)", .0.len())]
    Validation(FieldErrors),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Single field validation error
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        StoreError::Validation(errors)
    }
}

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: FieldErrors,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return Ok(()) if no errors were recorded
    pub fn finish(self) -> Result<(), StoreError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(self.errors))
        }
    }
}
