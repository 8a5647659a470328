//! Tests for error types and conversions

use site_pipeline::core::{AppResult, PipelineError, PipelineResult};

#[test]
fn test_error_display() {
    let err = PipelineError::InvalidInput("category must not be empty".into());
    assert_eq!(err.to_string(), "invalid input: category must not be empty");

    let err = PipelineError::Storage("disk I/O error".into());
    assert_eq!(err.to_string(), "storage error: disk I/O error");

    let err = PipelineError::UnknownTask("reports".into());
    assert_eq!(err.to_string(), "unknown task: reports");
}

#[test]
fn test_serde_error_converts_to_encoding() {
    fn parse(input: &str) -> PipelineResult<serde_json::Value> {
        Ok(serde_json::from_str(input)?)
    }
    assert!(matches!(parse("{"), Err(PipelineError::Encoding(_))));
}

#[test]
fn test_sqlite_error_converts_to_storage() {
    let err: PipelineError = rusqlite::Error::InvalidQuery.into();
    assert!(matches!(err, PipelineError::Storage(_)));
}

#[test]
fn test_pipeline_error_into_anyhow() {
    fn body() -> AppResult<()> {
        Err(PipelineError::ResourceProbe("no procfs".into()))?;
        Ok(())
    }
    let err = body().unwrap_err();
    assert!(err.to_string().contains("no procfs"));
    assert!(err.downcast_ref::<PipelineError>().is_some());
}
