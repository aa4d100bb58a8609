//! # Built-in Assistant Tools
//!
//! The functions the assistant character advertises to the model. The vision
//! tools delegate to a camera peripheral that lives on the client device, not
//! on this server; when no peripheral is attached they fail, and the registry
//! turns that failure into an error string the model relays in character.

use super::{ExecutionAffinity, Tool};
use crate::error::AppError;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tracing::info;

fn no_camera(action: &str) -> AppError {
    AppError::Internal(format!(
        "no camera peripheral is attached to this server, cannot {}",
        action
    ))
}

/// Face-recognition identity check. Mandatory for "who am I?" questions per
/// the character instructions.
pub struct IdentifyUser;

impl Tool for IdentifyUser {
    fn name(&self) -> &'static str {
        "identify_user"
    }

    fn description(&self) -> &'static str {
        "Identify who is currently speaking by matching their face against saved profiles. \
         Call this whenever the user asks who they are or what their name is."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn affinity(&self) -> ExecutionAffinity {
        // Face embedding comparison is pure computation
        ExecutionAffinity::CpuBound
    }

    fn run(&self, _arguments: &Value) -> Result<String, AppError> {
        Err(no_camera("identify the user"))
    }
}

/// Capture and store a new face profile under a given name.
pub struct SaveNewUserFace;

impl Tool for SaveNewUserFace {
    fn name(&self) -> &'static str {
        "save_new_user_face"
    }

    fn description(&self) -> &'static str {
        "Save the current user's face under a name so they can be recognized later. \
         Use when someone introduces themselves and wants to be remembered."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name to store the face profile under"
                }
            },
            "required": ["name"]
        })
    }

    fn affinity(&self) -> ExecutionAffinity {
        // Capture + profile write is I/O against the device
        ExecutionAffinity::Blocking
    }

    fn run(&self, arguments: &Value) -> Result<String, AppError> {
        let name = arguments["name"].as_str().unwrap_or("unknown");
        info!(name = name, "face profile save requested");
        Err(no_camera(&format!("save a face profile for {}", name)))
    }
}

/// Describe what the webcam currently sees.
pub struct AnalyzeImageFromWebcam;

impl Tool for AnalyzeImageFromWebcam {
    fn name(&self) -> &'static str {
        "analyze_image_from_webcam"
    }

    fn description(&self) -> &'static str {
        "Take a webcam snapshot and describe what is visible. Use when the user \
         asks what you can see."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Optional specific question about the scene"
                }
            },
            "required": []
        })
    }

    fn affinity(&self) -> ExecutionAffinity {
        ExecutionAffinity::Blocking
    }

    fn run(&self, _arguments: &Value) -> Result<String, AppError> {
        Err(no_camera("capture an image"))
    }
}

/// Queue Ambit's favorite song for playback.
pub struct PlayFavoriteSong;

/// Song asset path, relative to the server's working directory.
const FAVORITE_SONG_PATH: &str = "assets/Favsong.mp3";

impl PlayFavoriteSong {
    /// Check the song asset and report the outcome as a tool result string.
    /// A missing file degrades to an error message the model relays in
    /// character rather than failing the turn.
    fn queue_song(path: &Path) -> String {
        match fs::metadata(path) {
            Ok(_) => {
                info!(path = %path.display(), "favorite song queued for playback");
                "Favorite song queued for playback.".to_string()
            }
            Err(_) => format!("Error: song file not found at {}", path.display()),
        }
    }
}

impl Tool for PlayFavoriteSong {
    fn name(&self) -> &'static str {
        "play_favorite_song"
    }

    fn description(&self) -> &'static str {
        "After responding with an introductory phrase, call this function to \
         play Ambit's favorite song. This function doesn't take any arguments."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn affinity(&self) -> ExecutionAffinity {
        // Reads the song asset off disk
        ExecutionAffinity::Blocking
    }

    fn run(&self, _arguments: &Value) -> Result<String, AppError> {
        Ok(Self::queue_song(Path::new(FAVORITE_SONG_PATH)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_favorite_song_takes_no_arguments() {
        let schema = PlayFavoriteSong.parameters_schema();
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn test_play_favorite_song_queues_existing_asset() {
        let path = std::env::temp_dir().join("ambit_favsong_test.mp3");
        fs::write(&path, b"mp3").unwrap();

        let result = PlayFavoriteSong::queue_song(&path);
        assert_eq!(result, "Favorite song queued for playback.");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_play_favorite_song_reports_missing_asset() {
        let result = PlayFavoriteSong::queue_song(Path::new("assets/nonexistent.mp3"));
        assert!(result.starts_with("Error: song file not found"));
    }

    #[test]
    fn test_camera_tools_fail_without_peripheral() {
        assert!(IdentifyUser.run(&json!({})).is_err());
        assert!(SaveNewUserFace.run(&json!({ "name": "Kyle" })).is_err());
        assert!(AnalyzeImageFromWebcam.run(&json!({})).is_err());
    }

    #[test]
    fn test_affinities_are_declared() {
        assert_eq!(IdentifyUser.affinity(), ExecutionAffinity::CpuBound);
        assert_eq!(SaveNewUserFace.affinity(), ExecutionAffinity::Blocking);
        assert_eq!(AnalyzeImageFromWebcam.affinity(), ExecutionAffinity::Blocking);
        assert_eq!(PlayFavoriteSong.affinity(), ExecutionAffinity::Blocking);
    }
}
