//! Custom test assertions
//!
//! Assertions returning errors instead of panicking, so one failing test
//! does not abort the whole run.

use std::fmt;

/// Custom assertion error with detailed information
#[derive(Debug)]
pub struct AssertionError {
    pub message: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n  Expected: {}\n  Actual: {}",
            self.message, self.expected, self.actual
        )
    }
}

impl std::error::Error for AssertionError {}

impl AssertionError {
    pub fn new(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Fail with an [`AssertionError`] unless `actual == expected`
pub fn assert_equal<T>(message: &str, expected: T, actual: T) -> Result<(), Box<dyn std::error::Error>>
where
    T: PartialEq + fmt::Debug,
{
    if actual != expected {
        return Err(Box::new(AssertionError::new(
            message,
            format!("{:?}", expected),
            format!("{:?}", actual),
        )));
    }
    Ok(())
}

/// Fail unless `result` is an error whose message mentions `needle`
pub fn assert_error_mentions<T, E>(
    message: &str,
    result: &Result<T, E>,
    needle: &str,
) -> Result<(), Box<dyn std::error::Error>>
where
    E: fmt::Display,
{
    match result {
        Ok(_) => Err(Box::new(AssertionError::new(
            message,
            format!("an error mentioning '{}'", needle),
            "Ok",
        ))),
        Err(err) if err.to_string().contains(needle) => Ok(()),
        Err(err) => Err(Box::new(AssertionError::new(
            message,
            format!("an error mentioning '{}'", needle),
            err.to_string(),
        ))),
    }
}
