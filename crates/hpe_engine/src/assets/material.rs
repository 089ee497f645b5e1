//! Material assets
//!
//! A material names a shader program and carries its parameter set: base
//! colour, scalar uniforms and textures. Materials are immutable once loaded;
//! per-draw overrides happen in the render backend.

use super::image_loader::ImageData;
use super::AssetError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Shader used when a description does not name one
pub const DEFAULT_SHADER: &str = "lit";

/// A texture bound to a named material slot
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTexture {
    /// Sampler slot, e.g. `albedo`
    pub slot: String,
    /// Decoded pixels
    pub image: ImageData,
}

/// Immutable material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    /// Display name
    pub name: String,
    /// Shader program reference
    pub shader: String,
    /// RGBA base colour
    pub base_color: [f32; 4],
    /// Alpha-blended, drawn after opaque geometry
    pub translucent: bool,
    /// Scalar uniforms in a stable order
    pub uniforms: BTreeMap<String, f32>,
    /// Textures in slot order
    pub textures: Vec<MaterialTexture>,
}

impl MaterialAsset {
    /// Untextured material with the default shader
    pub fn solid(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            shader: DEFAULT_SHADER.to_string(),
            base_color,
            translucent: false,
            uniforms: BTreeMap::new(),
            textures: Vec::new(),
        }
    }

    /// Set the shader
    pub fn with_shader(mut self, shader: impl Into<String>) -> Self {
        self.shader = shader.into();
        self
    }

    /// Mark as translucent
    pub fn with_translucency(mut self, translucent: bool) -> Self {
        self.translucent = translucent;
        self
    }

    /// Add a scalar uniform
    pub fn with_uniform(mut self, name: impl Into<String>, value: f32) -> Self {
        self.uniforms.insert(name.into(), value);
        self
    }

    /// Material sampling a single albedo texture
    pub fn textured(name: impl Into<String>, image: ImageData) -> Self {
        let mut material = Self::solid(name, [1.0, 1.0, 1.0, 1.0]);
        material.textures.push(MaterialTexture {
            slot: "albedo".to_string(),
            image,
        });
        material
    }

    /// Blended draw, either flagged or with partial alpha
    pub fn is_translucent(&self) -> bool {
        self.translucent || self.base_color[3] < 1.0
    }
}

/// On-disk material description (`*.material.toml` / `*.material.ron`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialDescription {
    /// Display name, defaults to the file stem
    pub name: Option<String>,
    /// Shader program reference
    pub shader: String,
    /// RGBA base colour
    pub base_color: [f32; 4],
    /// Alpha-blended
    pub translucent: bool,
    /// Scalar uniforms
    pub uniforms: BTreeMap<String, f32>,
    /// Slot name to image path, relative to the description file
    pub textures: BTreeMap<String, String>,
}

impl Default for MaterialDescription {
    fn default() -> Self {
        Self {
            name: None,
            shader: DEFAULT_SHADER.to_string(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            translucent: false,
            uniforms: BTreeMap::new(),
            textures: BTreeMap::new(),
        }
    }
}

impl MaterialDescription {
    /// Parse a description; `ron` selects RON, anything else TOML
    pub fn parse(text: &str, ron_format: bool) -> Result<Self, String> {
        if ron_format {
            ron::from_str(text).map_err(|e| e.to_string())
        } else {
            toml::from_str(text).map_err(|e| e.to_string())
        }
    }

    /// Resolve textures relative to `base_dir` and build the asset
    pub fn into_material(self, fallback_name: &str, base_dir: &Path) -> Result<MaterialAsset, AssetError> {
        if self.base_color.iter().any(|c| !c.is_finite()) {
            return Err(AssetError::LoadFailed {
                path: fallback_name.to_string(),
                reason: "non-finite base colour".to_string(),
            });
        }

        let mut textures = Vec::with_capacity(self.textures.len());
        for (slot, relative) in self.textures {
            let image = ImageData::from_file(base_dir.join(&relative))?;
            textures.push(MaterialTexture { slot, image });
        }

        Ok(MaterialAsset {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            shader: self.shader,
            base_color: self.base_color,
            translucent: self.translucent,
            uniforms: self.uniforms,
            textures,
        })
    }
}
