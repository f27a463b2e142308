use std::time::Duration;
use thiserror::Error;

/// A common error type returned by functions throughout the planner.
///
/// Only `ModelError`, configuration/parse errors and, depending on the exhaustion policy,
/// `SearchExhausted` ever reach a caller of the plan coordinator.  The solve-level variants
/// are absorbed by the coordinator's search loop and only show up in its logs and statistics.
#[derive(Clone, Debug, Error)]
pub enum PlanningError {
    #[error("{0}")]
    GenericError(String),
    #[error("{0}")]
    IdxOutOfBoundError(String),
    #[error("{0}")]
    ModelError(String),
    #[error("{0}")]
    ConfigError(String),
    #[error("{0}")]
    InvalidModeSequence(String),
    #[error("{0}")]
    IoError(String),
    #[error("{0}")]
    ParseError(String),
    #[error("no feasible mode sequence found after {attempts} attempts")]
    SearchExhausted { attempts: usize },
    #[error("{0}")]
    SolveInfeasible(String),
    #[error("solver ran out of time after {0:?}")]
    SolveTimeout(Duration),
    #[error("{0}")]
    SolveError(String)
}
impl PlanningError {
    pub fn new_generic_error_str(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: {} -- File: {}, Line: {}", s, file, line);
        return Self::GenericError(s);
    }
    pub fn new_idx_out_of_bound_error(given_idx: usize, length_of_array: usize, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Index {:?} is too large for the array of length {:?} -- File: {}, Line: {}", given_idx, length_of_array, file, line);
        return Self::IdxOutOfBoundError(s);
    }
    pub fn new_check_for_idx_out_of_bound_error(given_idx: usize, length_of_array: usize, file: &str, line: u32) -> Result<(), Self> {
        return if given_idx < length_of_array { Ok(()) } else {
            Err(Self::new_idx_out_of_bound_error(given_idx, length_of_array, file, line))
        }
    }
    pub fn new_model_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Model error.  {} -- File: {}, Line: {}", s, file, line);
        return Self::ModelError(s);
    }
    pub fn new_config_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Configuration error.  {} -- File: {}, Line: {}", s, file, line);
        return Self::ConfigError(s);
    }
    pub fn new_invalid_mode_sequence_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Invalid mode sequence.  {} -- File: {}, Line: {}", s, file, line);
        return Self::InvalidModeSequence(s);
    }
    pub fn new_io_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: IO error.  {} -- File: {}, Line: {}", s, file, line);
        return Self::IoError(s);
    }
    pub fn new_parse_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Parse error.  {} -- File: {}, Line: {}", s, file, line);
        return Self::ParseError(s);
    }
    pub fn new_solve_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Solver failure.  {} -- File: {}, Line: {}", s, file, line);
        return Self::SolveError(s);
    }
    pub fn new_solve_infeasible_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Infeasible program.  {} -- File: {}, Line: {}", s, file, line);
        return Self::SolveInfeasible(s);
    }
    /// Errors that must stop planning immediately instead of being absorbed by the search loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            PlanningError::ModelError(_) => { true }
            PlanningError::ConfigError(_) => { true }
            PlanningError::InvalidModeSequence(_) => { true }
            PlanningError::IoError(_) => { true }
            PlanningError::ParseError(_) => { true }
            _ => { false }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idx_check_passes_inside_bounds() {
        assert!(PlanningError::new_check_for_idx_out_of_bound_error(2, 3, file!(), line!()).is_ok());
        let err = PlanningError::new_check_for_idx_out_of_bound_error(3, 3, file!(), line!()).unwrap_err();
        assert!(matches!(err, PlanningError::IdxOutOfBoundError(_)));
    }

    #[test]
    fn only_setup_errors_are_fatal() {
        assert!(PlanningError::new_model_error("welded", file!(), line!()).is_fatal());
        assert!(!PlanningError::new_solve_error("nan", file!(), line!()).is_fatal());
        assert!(!PlanningError::SearchExhausted { attempts: 3 }.is_fatal());
        assert_eq!(PlanningError::SearchExhausted { attempts: 3 }.to_string(), "no feasible mode sequence found after 3 attempts");
    }
}
