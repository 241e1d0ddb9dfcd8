//! Project documents.
//!
//! The persisted shape is `{version, textures, shaders, functions, parameters, pipeline,
//! pipelineShaderChoiceId}`. Buffer values are not stored; they are regenerated from each
//! buffer's fill mode on load.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StudioError, StudioResult};
use crate::model::{Buffer, Function, Parameter, PipelineItem, Shader, check_buffer_size};
use crate::session::Session;

pub const PROJECT_VERSION: u32 = 1;

fn default_version() -> u32 {
    PROJECT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub textures: Vec<Buffer>,
    #[serde(default)]
    pub shaders: Vec<Shader>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub pipeline: Vec<PipelineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_shader_choice_id: Option<String>,
}

impl Project {
    pub fn from_session(session: &Session) -> Self {
        Self {
            version: PROJECT_VERSION,
            textures: session.buffers().to_vec(),
            shaders: session.shaders().to_vec(),
            functions: session.functions().to_vec(),
            parameters: session.parameters().to_vec(),
            pipeline: session.program().to_vec(),
            pipeline_shader_choice_id: session.pipeline_shader_choice_id().map(str::to_string),
        }
    }

    /// Build a session with freshly generated buffer values. An absent or dangling shader
    /// choice falls back to the first shader. Fails before allocating anything when a
    /// texture is too large.
    pub fn into_session(self) -> StudioResult<Session> {
        for buffer in &self.textures {
            check_buffer_size(&buffer.name, buffer.size)?;
        }
        let mut textures = self.textures;
        for buffer in &mut textures {
            buffer.regenerate();
        }
        let choice = self
            .pipeline_shader_choice_id
            .filter(|id| self.shaders.iter().any(|s| &s.id == id))
            .or_else(|| self.shaders.first().map(|s| s.id.clone()));
        Ok(Session::from_parts(
            textures,
            self.shaders,
            self.functions,
            self.parameters,
            self.pipeline,
            choice,
        ))
    }

    pub fn from_json_str(text: &str) -> StudioResult<Self> {
        serde_json::from_str(text).map_err(|e| StudioError::Project(e.to_string()))
    }

    pub fn to_json_string(&self) -> StudioResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StudioError::Project(e.to_string()))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read project at {}", path.display()))?;
        let project = Self::from_json_str(&text)
            .with_context(|| format!("failed to parse project at {}", path.display()))?;
        info!(
            target: "forge::session",
            path = %path.display(),
            textures = project.textures.len(),
            shaders = project.shaders.len(),
            "project loaded"
        );
        Ok(project)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_json_string()?;
        fs::write(path, text).with_context(|| format!("failed to write project to {}", path.display()))?;
        info!(target: "forge::session", path = %path.display(), "project saved");
        Ok(())
    }
}
