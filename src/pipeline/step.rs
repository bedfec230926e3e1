use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Optimize,
    RemoveBackground,
}

impl StepKind {
    pub const ALL: [Self; 2] = [Self::Optimize, Self::RemoveBackground];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimize => "optimize",
            Self::RemoveBackground => "remove_background",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Auto,
    Jpg,
    Png,
    Webp,
}

impl OutputFormat {
    pub const ALL: [Self; 4] = [Self::Auto, Self::Jpg, Self::Png, Self::Webp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == normalized)
    }
}

/// `WIDTHxHEIGHT` target box handed to the optimizer verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl Resize {
    pub fn parse(value: &str) -> Option<Self> {
        let (width_raw, height_raw) = value.split_once('x')?;
        let width = parse_positive_dimension(width_raw)?;
        let height = parse_positive_dimension(height_raw)?;
        Some(Self { width, height })
    }
}

fn parse_positive_dimension(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>().ok().filter(|v| *v > 0)
}

impl fmt::Display for Resize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for Resize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OptimizeOptions {
    pub quality: u8,
    pub format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,
    pub strip_metadata: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            format: OutputFormat::Auto,
            resize: None,
            strip_metadata: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BackgroundRemovalOptions {
    pub alpha_matting: bool,
    pub alpha_matting_foreground_threshold: u8,
    pub alpha_matting_background_threshold: u8,
    pub alpha_matting_erode_size: u32,
}

impl Default for BackgroundRemovalOptions {
    fn default() -> Self {
        Self {
            alpha_matting: false,
            alpha_matting_foreground_threshold: 240,
            alpha_matting_background_threshold: 10,
            alpha_matting_erode_size: 10,
        }
    }
}

/// Validated options for one step. Only the validator builds these from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum StepOptions {
    Optimize(OptimizeOptions),
    RemoveBackground(BackgroundRemovalOptions),
}

impl StepOptions {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Optimize(_) => StepKind::Optimize,
            Self::RemoveBackground(_) => StepKind::RemoveBackground,
        }
    }

    pub fn defaults_for(kind: StepKind) -> Self {
        match kind {
            StepKind::Optimize => Self::Optimize(OptimizeOptions::default()),
            StepKind::RemoveBackground => {
                Self::RemoveBackground(BackgroundRemovalOptions::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_kind_round_trips_wire_names() {
        assert_eq!(StepKind::parse("optimize"), Some(StepKind::Optimize));
        assert_eq!(
            StepKind::parse("remove_background"),
            Some(StepKind::RemoveBackground)
        );
        assert_eq!(StepKind::parse("Optimize"), None);
        assert_eq!(StepKind::parse("upscale"), None);
    }

    #[test]
    fn output_format_parse_is_case_insensitive_and_trimmed() {
        assert_eq!(OutputFormat::parse(" PNG "), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::parse("Auto"), Some(OutputFormat::Auto));
        assert_eq!(OutputFormat::parse("gif"), None);
    }

    #[test]
    fn resize_requires_two_positive_integer_components() {
        assert_eq!(
            Resize::parse("800x600"),
            Some(Resize {
                width: 800,
                height: 600
            })
        );
        assert_eq!(Resize::parse("0x600"), None);
        assert_eq!(Resize::parse("800X600"), None);
        assert_eq!(Resize::parse("800x"), None);
        assert_eq!(Resize::parse("+800x600"), None);
        assert_eq!(Resize::parse(" 800x600"), None);
        assert_eq!(Resize::parse("800x600x2"), None);
    }

    #[test]
    fn step_options_serialize_as_type_and_options() {
        let step = StepOptions::Optimize(OptimizeOptions {
            resize: Resize::parse("10x20"),
            ..OptimizeOptions::default()
        });
        assert_eq!(
            serde_json::to_value(&step).expect("step should serialize"),
            json!({
                "type": "optimize",
                "options": {
                    "quality": 80,
                    "format": "auto",
                    "resize": "10x20",
                    "strip_metadata": true
                }
            })
        );
    }
}
