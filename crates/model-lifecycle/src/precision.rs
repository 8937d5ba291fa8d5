//! Per-capability weight precision

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Numeric precision of a capability's weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Weights as exported
    Full,
    /// 8-bit quantized sibling file
    Int8,
}

/// On-disk weight format, which decides how quantized siblings are named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    /// `model.onnx` -> `model_int8.onnx`
    Onnx,
    /// `ggml-base.bin` -> `ggml-base-q8_0.bin`
    Ggml,
}

impl WeightsFormat {
    fn int8_suffix(self) -> &'static str {
        match self {
            WeightsFormat::Onnx => "_int8",
            WeightsFormat::Ggml => "-q8_0",
        }
    }
}

impl Precision {
    /// Path of the weights to load for this precision. Paths that already
    /// name a quantized file are returned unchanged.
    pub fn resolve(self, path: &Path, format: WeightsFormat) -> PathBuf {
        if self == Precision::Full {
            return path.to_path_buf();
        }

        let suffix = format.int8_suffix();
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return path.to_path_buf();
        };
        if stem.ends_with(suffix) {
            return path.to_path_buf();
        }

        let file_name = match path.extension() {
            Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}{suffix}"),
        };
        path.with_file_name(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_keeps_path() {
        let path = Path::new("models/caption/blip.onnx");
        assert_eq!(Precision::Full.resolve(path, WeightsFormat::Onnx), path);
    }

    #[test]
    fn test_int8_sibling_names() {
        assert_eq!(
            Precision::Int8.resolve(Path::new("models/caption/blip.onnx"), WeightsFormat::Onnx),
            PathBuf::from("models/caption/blip_int8.onnx")
        );
        assert_eq!(
            Precision::Int8.resolve(Path::new("models/whisper/ggml-base.bin"), WeightsFormat::Ggml),
            PathBuf::from("models/whisper/ggml-base-q8_0.bin")
        );
    }

    #[test]
    fn test_already_quantized_unchanged() {
        let path = Path::new("models/whisper/ggml-small-q8_0.bin");
        assert_eq!(Precision::Int8.resolve(path, WeightsFormat::Ggml), path);
    }
}
