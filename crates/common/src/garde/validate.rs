use crate::domain::DomainError;
use garde::{Report, Validate};

/// Run a request's garde rules, reporting violations as `InvalidArgument`
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    match value.validate() {
        Ok(()) => Ok(()),
        Err(report) => Err(DomainError::InvalidArgument(describe(&report))),
    }
}

/// One `path: message` entry per violation, comma separated. Violations on
/// the request itself carry no path.
fn describe(report: &Report) -> String {
    let mut out = String::new();
    for (path, error) in report.iter() {
        if !out.is_empty() {
            out.push_str(", ");
        }
        let path = path.to_string();
        if !path.is_empty() {
            out.push_str(&path);
            out.push_str(": ");
        }
        out.push_str(error.message());
    }
    out
}
