use amsi_core::errors::{AmsiError, ErrorInfo};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("bins", 50)
        .with_context("reason", "example")
}

#[test]
fn degenerate_error_surface() {
    let err = AmsiError::Degenerate(sample_info("D001", "zero mass"));
    assert_eq!(err.info().code, "D001");
    assert_eq!(err.info().context["bins"], "50");
    assert!(err.is_local());
}

#[test]
fn size_limit_error_surface() {
    let err = AmsiError::SizeLimit(sample_info("L001", "too many bins"));
    assert_eq!(err.family(), "SizeLimit");
}

#[test]
fn serde_errors_are_not_local() {
    let err = AmsiError::Serde(sample_info("S001", "disk full"));
    assert!(!err.is_local());
}

#[test]
fn display_includes_context_and_hint() {
    let err = AmsiError::Mask(sample_info("M001", "empty").with_hint("select a dimension"));
    let text = err.to_string();
    assert!(text.starts_with("unsupported mask: empty (code: M001)"));
    assert!(text.contains("bins=50"));
    assert!(text.ends_with("hint: select a dimension"));
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = AmsiError::Shape(ErrorInfo::new("S002", "rank mismatch"));
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["family"], "Shape");
    let decoded: AmsiError = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, err);
}
