//! Work items: one input file, its resolved outputs and the ffmpeg
//! directives that apply to it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the input base name in `--file-mask`
pub const NAME_PLACEHOLDER: &str = "{name}";
/// Suffix used when no file-name template is given
pub const DEFAULT_SUFFIX: &str = "_converted";

/// Transformations requested for the whole batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub bitrate: Option<String>,
    pub codec: Option<String>,
    pub container: Option<String>,
    pub remove_metadata: bool,
    pub remove_audio: bool,
    pub extract_audio: bool,
    pub resolution: Option<String>,
    pub orientation: Option<String>,
    pub file_mask: Option<String>,
}

impl TransformOptions {
    /// Audio extraction only runs when the audio track is kept
    pub fn wants_audio_extraction(&self) -> bool {
        self.extract_audio && !self.remove_audio
    }

    /// Orientation value that is set but maps to no rotation
    pub fn unrecognized_orientation(&self) -> Option<&str> {
        self.orientation
            .as_deref()
            .filter(|raw| !raw.trim().is_empty() && Orientation::parse(raw).is_none())
    }
}

/// Direction of a transpose filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransposeDirection {
    /// `transpose=1`
    Clockwise,
    /// `transpose=2`
    CounterClockwise,
}

/// Supported orientation values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "90" => Some(Orientation::Deg90),
            "180" => Some(Orientation::Deg180),
            "270" => Some(Orientation::Deg270),
            _ => None,
        }
    }

    /// The single rotation directive for this orientation
    pub fn directive(&self) -> Directive {
        match self {
            Orientation::Deg90 => Directive::Transpose(TransposeDirection::Clockwise),
            Orientation::Deg270 => Directive::Transpose(TransposeDirection::CounterClockwise),
            Orientation::Deg180 => Directive::Rotate180,
        }
    }
}

/// One transformation applied by the primary ffmpeg call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Directive {
    RemoveAudio,
    Bitrate(String),
    Codec(String),
    StripMetadata,
    Scale(String),
    Transpose(TransposeDirection),
    Rotate180,
}

impl Directive {
    /// Filter expression for directives that live in the `-vf` chain
    pub fn video_filter(&self) -> Option<String> {
        match self {
            Directive::Scale(resolution) => Some(format!("scale={}", resolution)),
            Directive::Transpose(TransposeDirection::Clockwise) => Some("transpose=1".to_string()),
            Directive::Transpose(TransposeDirection::CounterClockwise) => {
                Some("transpose=2".to_string())
            }
            Directive::Rotate180 => Some("rotate=PI".to_string()),
            _ => None,
        }
    }

    pub fn is_rotation(&self) -> bool {
        matches!(self, Directive::Transpose(_) | Directive::Rotate180)
    }

    fn push_output_args(&self, args: &mut Vec<String>) {
        match self {
            Directive::RemoveAudio => args.push("-an".to_string()),
            Directive::Bitrate(bitrate) => args.extend(["-b:v".to_string(), bitrate.clone()]),
            Directive::Codec(codec) => args.extend(["-c:v".to_string(), codec.clone()]),
            Directive::StripMetadata => {
                args.extend(["-map_metadata".to_string(), "-1".to_string()])
            }
            Directive::Scale(_) | Directive::Transpose(_) | Directive::Rotate180 => {}
        }
    }
}

/// Directives in their fixed order: audio removal, bitrate, codec, metadata,
/// scaling, orientation
pub fn compose_directives(options: &TransformOptions) -> Vec<Directive> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut directives = Vec::new();
    if options.remove_audio {
        directives.push(Directive::RemoveAudio);
    }
    if let Some(bitrate) = non_empty(&options.bitrate) {
        directives.push(Directive::Bitrate(bitrate));
    }
    if let Some(codec) = non_empty(&options.codec) {
        directives.push(Directive::Codec(codec));
    }
    if options.remove_metadata {
        directives.push(Directive::StripMetadata);
    }
    if let Some(resolution) = non_empty(&options.resolution) {
        directives.push(Directive::Scale(resolution));
    }
    if let Some(orientation) = options.orientation.as_deref().and_then(Orientation::parse) {
        directives.push(orientation.directive());
    }
    directives
}

/// Output path for `input` under `export_dir`.
///
/// The template's `{name}` placeholder receives the input base name; without
/// a template the name is `<base>_converted`. A container override replaces
/// the extension, otherwise the input extension is kept.
pub fn output_path(
    input: &Path,
    export_dir: &Path,
    template: Option<&str>,
    container: Option<&str>,
) -> PathBuf {
    let base = base_name(input);

    let name = match template.filter(|t| !t.is_empty()) {
        Some(template) => template.replace(NAME_PLACEHOLDER, &base),
        None => format!("{}{}", base, DEFAULT_SUFFIX),
    };

    let extension = match container.map(|c| c.trim().trim_start_matches('.')) {
        Some(container) if !container.is_empty() => Some(container.to_string()),
        _ => input
            .extension()
            .map(|ext| ext.to_string_lossy().to_string()),
    };

    let file_name = match extension {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    };
    export_dir.join(file_name)
}

/// Path of the extracted audio track for `input`
pub fn audio_output_path(input: &Path, export_dir: &Path) -> PathBuf {
    export_dir.join(format!("{}_audio.aac", base_name(input)))
}

fn base_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// One discovered input with everything needed to convert it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub input: PathBuf,
    pub output: PathBuf,
    pub audio_output: Option<PathBuf>,
    pub directives: Vec<Directive>,
}

impl WorkItem {
    pub fn new(input: PathBuf, export_dir: &Path, options: &TransformOptions) -> Self {
        let output = output_path(
            &input,
            export_dir,
            options.file_mask.as_deref(),
            options.container.as_deref(),
        );
        let audio_output = options
            .wants_audio_extraction()
            .then(|| audio_output_path(&input, export_dir));

        Self {
            directives: compose_directives(options),
            input,
            output,
            audio_output,
        }
    }

    /// The rotation directive, if any. There is never more than one.
    pub fn rotation(&self) -> Option<&Directive> {
        self.directives.iter().find(|d| d.is_rotation())
    }

    /// Arguments of the secondary audio extraction call
    pub fn audio_extraction_args(&self) -> Option<Vec<String>> {
        let audio_output = self.audio_output.as_ref()?;
        Some(vec![
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            audio_output.to_string_lossy().to_string(),
        ])
    }

    /// Arguments of the primary conversion call
    pub fn primary_args(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.input.to_string_lossy().to_string()];

        for directive in &self.directives {
            directive.push_output_args(&mut args);
        }

        let filters: Vec<String> = self
            .directives
            .iter()
            .filter_map(Directive::video_filter)
            .collect();
        if !filters.is_empty() {
            args.push("-vf".to_string());
            args.push(filters.join(","));
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}
