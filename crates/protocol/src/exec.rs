//! The exec "protocol": hand each file to an external command.
//!
//! The command template comes from the job's `exec` option; `%s` expands
//! to the file path, and a template without `%s` gets the path appended.
//! A non-zero exit, a spawn failure, or a killed child all map onto the
//! exec worker exit code.

use std::path::Path;
use std::process::Command;

use afd_core::exit::WorkerExit;

use crate::error::TransferError;

/// Expands the template for one file.
#[must_use]
pub fn expand_template(template: &str, file: &Path) -> String {
    let path = file.display().to_string();
    if template.contains("%s") {
        template.replace("%s", &path)
    } else {
        format!("{template} {path}")
    }
}

/// Runs the job's command for one file.
pub fn run_for_file(template: &str, file: &Path) -> Result<(), TransferError> {
    let command_line = expand_template(template, file);
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(&command_line)
        .status()
        .map_err(|e| TransferError::io(WorkerExit::Exec, &e))?;
    if status.success() {
        Ok(())
    } else {
        Err(TransferError::new(
            WorkerExit::Exec,
            format!("{command_line:?} exited {status}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_percent_s() {
        assert_eq!(
            expand_template("convert %s /out", Path::new("/in/f.grib")),
            "convert /in/f.grib /out"
        );
    }

    #[test]
    fn template_without_marker_appends() {
        assert_eq!(
            expand_template("gzip -k", Path::new("/in/f")),
            "gzip -k /in/f"
        );
    }

    #[test]
    fn true_command_succeeds() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        run_for_file("true", tmp.path()).expect("succeeds");
    }

    #[test]
    fn failing_command_maps_to_exec_error() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let err = run_for_file("false", tmp.path()).unwrap_err();
        assert_eq!(err.exit_code(), WorkerExit::Exec);
    }

    #[test]
    fn missing_binary_maps_to_exec_error() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let err = run_for_file("/no/such/binary-here", tmp.path()).unwrap_err();
        assert_eq!(err.exit_code(), WorkerExit::Exec);
    }
}
