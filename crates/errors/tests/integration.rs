//! Integration tests for error types

#[cfg(test)]
mod tests {
    use kiln_errors::*;

    #[test]
    fn test_error_conversion() {
        let build_err = BuildError::PathNotFound {
            path: "/app".into(),
        };
        let err: Error = build_err.into();
        assert!(matches!(err, Error::Build(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BuildError::StepExecution {
            command: "poetry install".into(),
            exit_code: Some(1),
        };
        assert_eq!(
            err.to_string(),
            "command `poetry install` exited with status 1"
        );

        let err = BuildError::StepExecution {
            command: "sleep 10".into(),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "command `sleep 10` was terminated by a signal");
    }

    #[test]
    fn test_step_failure_names_step() {
        let err: Error = BuildError::SourceNotFound {
            pattern: "docker/*.sh".into(),
        }
        .into();
        let err = err.at_step(9, "set-file-permissions");

        assert_eq!(err.failed_step(), Some(9));
        assert_eq!(
            err.to_string(),
            "build failed at step 9 (set-file-permissions): build error: no files match docker/*.sh"
        );
        assert!(matches!(
            err.as_build_error(),
            Some(BuildError::SourceNotFound { .. })
        ));
        assert_eq!(err.user_code(), Some("build.source_not_found"));
    }

    #[test]
    fn test_manifest_failure_is_step_execution() {
        let err = BuildError::ManifestInstallFailed {
            manifest: "pyproject.toml".into(),
            command: "poetry install".into(),
            exit_code: Some(2),
        };
        assert!(err.is_step_execution());
        assert_eq!(err.exit_code(), Some(2));

        let missing = BuildError::ManifestMissing {
            path: "/app/pyproject.toml".into(),
        };
        assert!(!missing.is_step_execution());
        assert_eq!(missing.exit_code(), None);
    }

    #[test]
    fn test_error_clone() {
        let err = BuildError::InvalidMode { mode: "9z9".into() };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: Error = io_err.into();
        assert!(matches!(
            err,
            Error::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}
