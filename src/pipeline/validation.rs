use serde_json::{Map, Value};
use thiserror::Error;

use super::step::{
    BackgroundRemovalOptions, OptimizeOptions, OutputFormat, Resize, StepKind, StepOptions,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Pipeline must contain at least one step")]
    EmptyPipeline,
    #[error("Step {} is missing a type", .index + 1)]
    MissingStepType { index: usize },
    #[error("Invalid step type: {value}. Allowed types: optimize, remove_background")]
    UnknownStepType { index: usize, value: String },
    #[error("Quality must be an integer between 1 and 100")]
    InvalidQuality,
    #[error("Invalid format. Allowed formats: auto, jpg, png, webp")]
    InvalidFormat,
    #[error("Resize must be in the format WIDTHxHEIGHT (e.g., 800x600)")]
    InvalidResizeFormat,
    #[error("{} threshold must be an integer between 0 and 255", threshold_label(.field))]
    InvalidThreshold { field: &'static str },
    #[error("Erode size must be a non-negative integer")]
    InvalidErodeSize,
    #[error("Step {} ({kind}): {source}", .index + 1)]
    InvalidStep {
        index: usize,
        kind: StepKind,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Innermost error, skipping the per-step wrapper.
    pub fn root(&self) -> &ValidationError {
        match self {
            Self::InvalidStep { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::EmptyPipeline => "empty_pipeline",
            Self::MissingStepType { .. } => "missing_step_type",
            Self::UnknownStepType { .. } => "unknown_step_type",
            Self::InvalidQuality => "invalid_quality",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidResizeFormat => "invalid_resize_format",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::InvalidErodeSize => "invalid_erode_size",
            Self::InvalidStep { .. } => "invalid_step",
        }
    }

    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::MissingStepType { index }
            | Self::UnknownStepType { index, .. }
            | Self::InvalidStep { index, .. } => Some(*index),
            _ => None,
        }
    }
}

fn threshold_label(field: &str) -> &'static str {
    if field.contains("foreground") {
        "Foreground"
    } else {
        "Background"
    }
}

const FOREGROUND_THRESHOLD: &str = "alpha_matting_foreground_threshold";
const BACKGROUND_THRESHOLD: &str = "alpha_matting_background_threshold";

pub fn validate_optimize(raw: &Map<String, Value>) -> Result<OptimizeOptions, ValidationError> {
    let mut options = OptimizeOptions::default();

    if let Some(value) = present(raw, "quality") {
        options.quality = coerce_int(value)
            .filter(|v| (1..=100).contains(v))
            .and_then(|v| u8::try_from(v).ok())
            .ok_or(ValidationError::InvalidQuality)?;
    }

    if let Some(value) = present(raw, "format") {
        options.format = value
            .as_str()
            .and_then(OutputFormat::parse)
            .ok_or(ValidationError::InvalidFormat)?;
    }

    if let Some(value) = present(raw, "resize") {
        options.resize = Some(
            value
                .as_str()
                .and_then(Resize::parse)
                .ok_or(ValidationError::InvalidResizeFormat)?,
        );
    }

    if let Some(value) = present(raw, "strip_metadata") {
        options.strip_metadata = coerce_bool(value);
    }

    Ok(options)
}

pub fn validate_remove_background(
    raw: &Map<String, Value>,
) -> Result<BackgroundRemovalOptions, ValidationError> {
    let mut options = BackgroundRemovalOptions::default();

    if let Some(value) = present(raw, "alpha_matting") {
        options.alpha_matting = coerce_bool(value);
    }
    // Thresholds are bounds-checked even when alpha_matting is off.
    if let Some(value) = present(raw, FOREGROUND_THRESHOLD) {
        options.alpha_matting_foreground_threshold = threshold(value, FOREGROUND_THRESHOLD)?;
    }
    if let Some(value) = present(raw, BACKGROUND_THRESHOLD) {
        options.alpha_matting_background_threshold = threshold(value, BACKGROUND_THRESHOLD)?;
    }
    if let Some(value) = present(raw, "alpha_matting_erode_size") {
        options.alpha_matting_erode_size = coerce_int(value)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(ValidationError::InvalidErodeSize)?;
    }

    Ok(options)
}

/// Validates options for a single step of a known kind. Non-object options count as absent.
pub fn validate_step_options(
    kind: StepKind,
    raw: Option<&Value>,
) -> Result<StepOptions, ValidationError> {
    let empty = Map::new();
    let raw = raw.and_then(Value::as_object).unwrap_or(&empty);
    match kind {
        StepKind::Optimize => validate_optimize(raw).map(StepOptions::Optimize),
        StepKind::RemoveBackground => {
            validate_remove_background(raw).map(StepOptions::RemoveBackground)
        }
    }
}

/// Validates a whole pipeline up front; the first failing step rejects all of it.
pub fn validate_pipeline(raw_steps: &[Value]) -> Result<Vec<StepOptions>, ValidationError> {
    if raw_steps.is_empty() {
        return Err(ValidationError::EmptyPipeline);
    }

    raw_steps
        .iter()
        .enumerate()
        .map(|(index, step)| validate_pipeline_step(index, step))
        .collect()
}

fn validate_pipeline_step(index: usize, step: &Value) -> Result<StepOptions, ValidationError> {
    let Some(type_value) = step
        .get("type")
        .or_else(|| step.get("kind"))
        .filter(|v| !v.is_null())
    else {
        return Err(ValidationError::MissingStepType { index });
    };
    let kind = type_value
        .as_str()
        .and_then(StepKind::parse)
        .ok_or_else(|| ValidationError::UnknownStepType {
            index,
            value: type_value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| type_value.to_string()),
        })?;

    validate_step_options(kind, step.get("options")).map_err(|source| {
        ValidationError::InvalidStep {
            index,
            kind,
            source: Box::new(source),
        }
    })
}

fn present<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn threshold(value: &Value, field: &'static str) -> Result<u8, ValidationError> {
    coerce_int(value)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or(ValidationError::InvalidThreshold { field })
}

/// Integers, integral floats and trimmed decimal strings; everything else is rejected.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no" | "off"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("test input should be an object")
    }

    #[test]
    fn optimize_defaults_are_applied_and_deterministic() {
        let first = validate_optimize(&Map::new()).expect("empty options should validate");
        let second = validate_optimize(&Map::new()).expect("empty options should validate");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_value(&first).expect("options should serialize"),
            json!({"quality": 80, "format": "auto", "strip_metadata": true})
        );
    }

    #[test]
    fn optimize_accepts_numeric_strings_and_mixed_case_format() {
        let options = validate_optimize(&object(json!({
            "quality": " 60 ",
            "format": "WebP",
            "resize": "800x600",
            "strip_metadata": "0"
        })))
        .expect("options should validate");
        assert_eq!(options.quality, 60);
        assert_eq!(options.format, OutputFormat::Webp);
        assert_eq!(options.resize.map(|r| r.to_string()).as_deref(), Some("800x600"));
        assert!(!options.strip_metadata);
    }

    #[test]
    fn optimize_rejects_out_of_range_quality() {
        for bad in [json!(0), json!(101), json!(150), json!("abc"), json!(80.5), json!(true)] {
            let err = validate_optimize(&object(json!({ "quality": bad })))
                .expect_err("quality should be rejected");
            assert_eq!(err, ValidationError::InvalidQuality);
        }
    }

    #[test]
    fn optimize_rejects_unknown_format_and_bad_resize() {
        let err = validate_optimize(&object(json!({"format": "gif"})))
            .expect_err("gif is not an output format");
        assert_eq!(err, ValidationError::InvalidFormat);

        let err = validate_optimize(&object(json!({"resize": "800*600"})))
            .expect_err("resize token should be rejected");
        assert_eq!(err, ValidationError::InvalidResizeFormat);

        let options = validate_optimize(&object(json!({"resize": null})))
            .expect("null resize counts as absent");
        assert_eq!(options.resize, None);
    }

    #[test]
    fn background_removal_bounds_checks_thresholds_without_alpha_matting() {
        let err = validate_remove_background(&object(json!({
            "alpha_matting": false,
            "alpha_matting_background_threshold": 256
        })))
        .expect_err("threshold above 255 should fail");
        assert_eq!(
            err,
            ValidationError::InvalidThreshold {
                field: "alpha_matting_background_threshold"
            }
        );
        assert_eq!(
            err.to_string(),
            "Background threshold must be an integer between 0 and 255"
        );

        let err = validate_remove_background(&object(json!({"alpha_matting_erode_size": -1})))
            .expect_err("negative erode size should fail");
        assert_eq!(err, ValidationError::InvalidErodeSize);
    }

    #[test]
    fn background_removal_merges_defaults() {
        let options = validate_remove_background(&object(json!({
            "alpha_matting": true,
            "alpha_matting_foreground_threshold": "0"
        })))
        .expect("options should validate");
        assert_eq!(
            options,
            BackgroundRemovalOptions {
                alpha_matting: true,
                alpha_matting_foreground_threshold: 0,
                alpha_matting_background_threshold: 10,
                alpha_matting_erode_size: 10,
            }
        );
    }

    #[test]
    fn pipeline_rejects_empty_missing_and_unknown_types() {
        assert_eq!(validate_pipeline(&[]), Err(ValidationError::EmptyPipeline));

        let err = validate_pipeline(&[json!({"type": "optimize"}), json!({"options": {}})])
            .expect_err("missing type should fail");
        assert_eq!(err, ValidationError::MissingStepType { index: 1 });
        assert_eq!(err.to_string(), "Step 2 is missing a type");

        let err = validate_pipeline(&[json!({"type": "upscale"})])
            .expect_err("unknown type should fail");
        assert_eq!(
            err,
            ValidationError::UnknownStepType {
                index: 0,
                value: String::from("upscale")
            }
        );
    }

    #[test]
    fn pipeline_reports_first_invalid_step_with_index() {
        let err = validate_pipeline(&[
            json!({"type": "remove_background"}),
            json!({"type": "optimize", "options": {"quality": 70}}),
            json!({"type": "optimize", "options": {"quality": 150}}),
            json!({"type": "optimize", "options": {"format": "bmp"}}),
        ])
        .expect_err("third step should fail");

        assert_eq!(err.step_index(), Some(2));
        assert_eq!(err.root(), &ValidationError::InvalidQuality);
        assert_eq!(err.code(), "invalid_quality");
    }

    #[test]
    fn pipeline_accepts_kind_alias_and_ignores_non_object_options() {
        let steps = validate_pipeline(&[
            json!({"kind": "remove_background", "options": []}),
            json!({"type": "optimize", "options": {"quality": 60, "format": "png"}}),
        ])
        .expect("pipeline should validate");

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], StepOptions::defaults_for(StepKind::RemoveBackground));
        assert_eq!(
            steps[1],
            StepOptions::Optimize(OptimizeOptions {
                quality: 60,
                format: OutputFormat::Png,
                ..OptimizeOptions::default()
            })
        );
    }
}
