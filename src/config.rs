// cyber.json configuration

use crate::vm::RenderCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "cyber.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Extra render classifications, on top of the standard ones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    #[serde(rename = "2d")]
    pub two_d: Vec<String>,
    #[serde(rename = "3d")]
    pub three_d: Vec<String>,
    pub gui: Vec<String>,
}

impl RenderConfig {
    pub fn entries(&self) -> [(RenderCategory, &[String]); 3] {
        [
            (RenderCategory::TwoD, self.two_d.as_slice()),
            (RenderCategory::ThreeD, self.three_d.as_slice()),
            (RenderCategory::Gui, self.gui.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Compiled chunk to run when none is given on the command line
    pub main: Option<PathBuf>,
    pub max_stack: usize,
    /// Driver frames to run after the main program; 0 runs the main program only
    pub frames: u64,
    /// Fixed delta time reported by the headless host
    pub frame_time: f64,
    pub full_trace: bool,
    pub render: RenderConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            main: None,
            max_stack: crate::vm::STACK_MAX,
            frames: 0,
            frame_time: 1.0 / 60.0,
            full_trace: true,
            render: RenderConfig::default(),
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text, path)?;
        // `main` is relative to the config file
        if let (Some(main), Some(dir)) = (config.main.as_mut(), path.parent()) {
            if main.is_relative() {
                *main = dir.join(&*main);
            }
        }
        Ok(config)
    }

    /// Load `cyber.json` from `dir`, or the defaults when there is none
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack == 0 {
            return Err(ConfigError::Invalid("max_stack must be positive".into()));
        }
        if self.frame_time.is_nan() || self.frame_time <= 0.0 {
            return Err(ConfigError::Invalid("frame_time must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = VmConfig::from_json(
            r#"{ "max_stack": 1024, "render": { "2d": ["DrawStar"] } }"#,
            Path::new("cyber.json"),
        )
        .unwrap();
        assert_eq!(config.max_stack, 1024);
        assert_eq!(config.frames, 0);
        assert!(config.full_trace);
        assert_eq!(config.render.two_d, vec!["DrawStar"]);
        assert!(config.render.gui.is_empty());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = VmConfig::from_json(r#"{ "max_stack": 0 }"#, Path::new("x.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = VmConfig::from_json("{ nope", Path::new("x.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_discover_without_file_is_default() {
        let dir = std::env::temp_dir().join(format!("cyber_cfg_{}", std::process::id()));
        let config = VmConfig::discover(&dir).unwrap();
        assert_eq!(config, VmConfig::default());
    }

    #[test]
    fn test_apply_config_classifies_render_names() {
        let mut config = VmConfig::default();
        config.render.three_d.push("DrawTorus".into());
        let mut vm = crate::vm::VM::new();
        vm.apply_config(&config);

        let mut c = crate::bytecode::Chunk::new();
        let name = c.name_constant("draw").unwrap();
        c.emit(crate::bytecode::OpCode::CallUser, &[name, 0]);
        c.write_op(crate::bytecode::OpCode::Halt);
        c.define_function("draw");
        let torus = c.name_constant("drawtorus").unwrap();
        c.emit(crate::bytecode::OpCode::CallForeign, &[torus, 0]);
        c.write_op(crate::bytecode::OpCode::Return);
        vm.load_chunk(c);
        vm.run().unwrap();
        assert_eq!(vm.render_queue(RenderCategory::ThreeD).len(), 1);
    }
}
