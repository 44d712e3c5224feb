//! Tests for error types

use pagesplit::error::ValidationError;
use pagesplit::Error;

#[test]
fn test_validation_error_wraps() {
    let error: Error = ValidationError::WeightSum(99.5).into();
    let error_str = format!("{error}");
    assert!(error_str.contains("Validation failed"));
    assert!(error_str.contains("sum to 100"));
    assert!(error_str.contains("99.5"));
}

#[test]
fn test_control_count_error() {
    let error = ValidationError::ControlCount(2);
    assert!(format!("{error}").contains("exactly one control"));
}

#[test]
fn test_unknown_variant_error() {
    let error = Error::UnknownVariant {
        experiment_id: "exp-1".to_string(),
        variant_id: "z".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown variant"));
    assert!(error_str.contains("exp-1"));
    assert!(error_str.contains("'z'"));
}

#[test]
fn test_invalid_kind_error() {
    let error = Error::InvalidKind("hover".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid event kind"));
    assert!(error_str.contains("hover"));
}

#[test]
fn test_invalid_transition_error() {
    let error = Error::InvalidTransition {
        from: "completed".to_string(),
        to: "running".to_string(),
    };
    assert_eq!(
        format!("{error}"),
        "Invalid status transition: completed -> running"
    );
}

#[test]
fn test_publication_failed_error() {
    let error = Error::PublicationFailed {
        content_unit: "article-1".to_string(),
        reason: "connection reset".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("article-1"));
    assert!(error_str.contains("connection reset"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.parquet");
    let error: Error = io.into();
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_serialization_error_conversion() {
    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json.into();
    assert!(matches!(error, Error::Serialization(_)));
}

#[test]
fn test_error_debug() {
    let error = Error::UnknownExperiment("exp-9".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("UnknownExperiment"));
}
