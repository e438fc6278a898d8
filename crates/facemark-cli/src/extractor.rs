//! Face extraction through an external program.
//!
//! The program is called as `<program> <image.png>` and must print a JSON
//! array of faces to stdout:
//!
//! ```json
//! [{"region": {"x": 10, "y": 20, "width": 64, "height": 64}, "embedding": [0.01, ...]}]
//! ```

use facemark_core::{DetectedFace, ExtractError, FaceExtractor};
use image::{ImageFormat, RgbImage};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::Command;

pub struct CommandExtractor {
    program: PathBuf,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FaceExtractor for CommandExtractor {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let tmp = tempfile::Builder::new()
            .prefix("facemark-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| ExtractError::Failed(format!("temp file: {e}")))?;

        {
            let mut writer = BufWriter::new(tmp.as_file());
            image
                .write_to(&mut writer, ImageFormat::Png)
                .map_err(|e| ExtractError::MalformedImage(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| ExtractError::Failed(format!("temp file: {e}")))?;
        }

        let output = Command::new(&self.program)
            .arg(tmp.path())
            .output()
            .map_err(|e| {
                ExtractError::Failed(format!("{}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        parse_faces(&output.stdout)
    }
}

fn parse_faces(stdout: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
    let faces: Vec<DetectedFace> =
        serde_json::from_slice(stdout).map_err(|e| ExtractError::InvalidOutput(e.to_string()))?;

    if let Some(first) = faces.first() {
        let dim = first.embedding.dim();
        if faces.iter().any(|f| f.embedding.dim() != dim) || dim == 0 {
            return Err(ExtractError::InvalidOutput(
                "embeddings within one image differ in length".into(),
            ));
        }
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_faces() {
        let out = br#"[{"region":{"x":1,"y":2,"width":3,"height":4},"embedding":[0.5,0.25]}]"#;
        let faces = parse_faces(out).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].region.width, 3.0);
        assert_eq!(faces[0].embedding.values(), &[0.5, 0.25]);
    }

    #[test]
    fn test_parse_no_faces() {
        assert!(parse_faces(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage_and_ragged_embeddings() {
        assert!(matches!(
            parse_faces(b"not json"),
            Err(ExtractError::InvalidOutput(_))
        ));
        let ragged = br#"[
            {"region":{"x":0,"y":0,"width":1,"height":1},"embedding":[0.1,0.2]},
            {"region":{"x":0,"y":0,"width":1,"height":1},"embedding":[0.1]}
        ]"#;
        assert!(matches!(
            parse_faces(ragged),
            Err(ExtractError::InvalidOutput(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_an_error() {
        let extractor = CommandExtractor::new("false");
        let img = RgbImage::new(2, 2);
        assert!(matches!(
            extractor.detect(&img),
            Err(ExtractError::Failed(_))
        ));
    }
}
