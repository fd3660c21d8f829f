//! Collection seed files.
//!
//! ```toml
//! [[collections]]
//! id = "collA"
//!
//! [[collections.tasks]]
//! task_id = "task1"
//! obs_id = "obs_1"
//! kwargs = { duration = 3.0 }
//! devices = [
//!     { name = "marker", kind = "marker" },
//!     { name = "Mic_Yeti", kind = "microphone" },
//! ]
//! ```

use std::path::Path;

use boothproto::Collection;
use serde::Deserialize;

use crate::{ObsLogError, Result};

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub collections: Vec<Collection>,
}

impl SeedFile {
    /// Parse TOML, or JSON when the text starts with `{`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim_start().starts_with('{') {
            return Ok(serde_json::from_str(text)?);
        }
        toml::from_str(text).map_err(|e| ObsLogError::Seed(e.to_string()))
    }
}

pub fn load_seed_file(path: &Path) -> Result<Vec<Collection>> {
    let text = std::fs::read_to_string(path)?;
    Ok(SeedFile::parse(&text)?.collections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boothproto::DeviceKind;

    #[test]
    fn test_parse_toml_seed() {
        let seed = SeedFile::parse(
            r#"
[[collections]]
id = "collA"

[[collections.tasks]]
task_id = "intro_sess"
obs_id = "obs_intro"

[[collections.tasks]]
task_id = "task1"
obs_id = "obs_1"
kwargs = { duration = 3.0 }
devices = [
    { name = "marker", kind = "marker" },
    { name = "Eyelink", kind = "eye_tracker" },
]
"#,
        )
        .unwrap();

        assert_eq!(seed.collections.len(), 1);
        let task1 = seed.collections[0].task("task1").unwrap();
        assert!(task1.requires(DeviceKind::EyeTracker));
        assert_eq!(task1.kwargs["duration"], serde_json::json!(3.0));
    }

    #[test]
    fn test_parse_json_seed() {
        let seed = SeedFile::parse(r#"{"collections": [{"id": "c", "tasks": []}]}"#).unwrap();
        assert_eq!(seed.collections[0].id, "c");
    }

    #[test]
    fn test_bad_seed() {
        assert!(matches!(
            SeedFile::parse("collections = 3"),
            Err(ObsLogError::Seed(_))
        ));
    }
}
