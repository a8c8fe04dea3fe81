use std::result::Result as StdResult;

use anyhow::Result;
use libtorque::{Progress, TorqueError, ValidationReport};
use serde::Serialize;
use torque_term::{Output, OutputError, Spinner};

/// Convert output-layer failures into domain errors.
pub fn map_output_error(err: OutputError) -> TorqueError {
    match err {
        OutputError::Io(e) => TorqueError::IoError(e),
    }
}

/// Emit an output result, mapping errors into `TorqueError`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(map_output_error)?;
    Ok(())
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

/// List validation problems under a section header.
pub fn render_validation_errors(output: &dyn Output, report: &ValidationReport) -> Result<()> {
    let section = output.section("Validation errors:");
    for error in &report.errors {
        emit(section.fail(&format!("{}: {}", error.name, error.message)))?;
    }
    Ok(())
}

/// [`Progress`] shown as a terminal spinner.
pub struct SpinnerProgress {
    /// Underlying spinner.
    spinner: Spinner,
}

impl SpinnerProgress {
    /// Wrap `spinner`.
    pub fn new(spinner: Spinner) -> Self {
        Self { spinner }
    }

    /// Stop the spinner after a failed wait.
    pub fn fail(&self, msg: &str) {
        self.spinner.finish_fail(msg);
    }
}

impl Progress for SpinnerProgress {
    fn tick(&self, elapsed_seconds: u64) {
        self.spinner
            .set_message(&format!("Waiting for the sandbox to start [{elapsed_seconds} sec]"));
    }

    fn done(&self) {
        self.spinner.finish_success("Done");
    }
}
