use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, FieldError};

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Input types declare their field rules by implementing this.
pub trait Validate {
    fn validate(&self) -> Result<(), AppError>;
}

/// Collects every failing field instead of stopping at the first one.
#[derive(Debug, Default)]
pub struct Rules {
    errors: Vec<FieldError>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, field: &'static str, value: &str) -> Self {
        if value.trim().is_empty() {
            self.fail(field, format!("{field} is required"));
        }
        self
    }

    /// Only checked when the field is non-empty; pair with `required`.
    pub fn email(mut self, field: &'static str, value: &str) -> Self {
        if !value.is_empty() && !is_valid_email(value) {
            self.fail(field, format!("{field} is not a valid email"));
        }
        self
    }

    pub fn min_len(mut self, field: &'static str, value: &str, min: usize) -> Self {
        if !value.is_empty() && value.chars().count() < min {
            self.fail(field, format!("{field} must be at least {min} characters"));
        }
        self
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(self.errors))
        }
    }

    fn fail(&mut self, field: &'static str, message: String) {
        // first failure per field wins
        if !self.errors.iter().any(|e| e.field == field) {
            self.errors.push(FieldError { field, message });
        }
    }
}
