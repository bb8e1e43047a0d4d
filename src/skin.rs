//! NPC skin resolution
//!
//! Turns a skin identifier into a [`SkinDescriptor`] by reading
//! `<dir>/<id>.png` (required) and `<dir>/<id>.json` (optional geometry).
//! Resolution is read-only; [`ensure_skin_dir`] is the only function here
//! that touches the filesystem for writing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Texture sizes the client accepts (width, height).
pub const ALLOWED_TEXTURE_SIZES: [(u32, u32); 3] = [(64, 32), (64, 64), (128, 128)];

/// Placeholder geometry id present in exported models. Rewritten to
/// `geometry.<skin id>` so several custom models never share one name.
pub const PLACEHOLDER_GEOMETRY: &str = "geometry.unknown";

/// Geometry the client falls back to when a skin carries no model.
pub const DEFAULT_GEOMETRY: &str = "geometry.humanoid.customSlim";

#[derive(Debug, thiserror::Error)]
pub enum SkinError {
    #[error("Missing texture file '{0}'")]
    MissingTexture(String),

    #[error("Invalid texture '{name}': {reason}")]
    InvalidTexture { name: String, reason: String },

    #[error("Invalid geometry '{name}': {reason}")]
    InvalidGeometry { name: String, reason: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// `{"geometry": {"default": "geometry.<id>"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePatch {
    pub geometry: GeometryIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryIdentifier {
    pub default: String,
}

impl ResourcePatch {
    pub fn with_default(geometry: impl Into<String>) -> Self {
        Self { geometry: GeometryIdentifier { default: geometry.into() } }
    }
}

/// Texture bytes plus optional model. Stored as one embedded document by
/// every backend; only this module and the backends look inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkinDescriptor {
    pub skin_id: String,
    /// Raw RGBA8 pixels, `width * height * 4` bytes.
    #[serde(with = "texture_base64")]
    pub texture: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub geometry_name: Option<String>,
    #[serde(default)]
    pub geometry_data: Option<String>,
    #[serde(default)]
    pub resource_patch: Option<ResourcePatch>,
    #[serde(default)]
    pub is_verified: bool,
}

impl Default for SkinDescriptor {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl SkinDescriptor {
    pub fn builder(skin_id: impl Into<String>) -> SkinBuilder {
        SkinBuilder::new(skin_id)
    }

    /// Filler skin every NPC starts with: 64x32 of `Z` bytes on the slim
    /// humanoid model.
    pub fn placeholder() -> Self {
        Self {
            skin_id: "npc.placeholder.CustomSlim".to_string(),
            texture: vec![b'Z'; 64 * 32 * 4],
            width: 64,
            height: 32,
            geometry_name: None,
            geometry_data: None,
            resource_patch: Some(ResourcePatch::with_default(DEFAULT_GEOMETRY)),
            is_verified: false,
        }
    }

    /// Geometry the client should render with.
    pub fn effective_geometry(&self) -> &str {
        self.geometry_name
            .as_deref()
            .or(self.resource_patch.as_ref().map(|p| p.geometry.default.as_str()))
            .unwrap_or(DEFAULT_GEOMETRY)
    }

    pub fn has_custom_geometry(&self) -> bool {
        self.geometry_data.is_some()
    }
}

/// Staged construction of a [`SkinDescriptor`]: texture first, then the
/// optional model, then `build()` once everything is known.
#[derive(Debug, Clone)]
pub struct SkinBuilder {
    skin_id: String,
    texture: Option<(Vec<u8>, u32, u32)>,
    geometry: Option<(String, String)>,
    verified: bool,
}

impl SkinBuilder {
    pub fn new(skin_id: impl Into<String>) -> Self {
        Self { skin_id: skin_id.into(), texture: None, geometry: None, verified: false }
    }

    pub fn texture(mut self, rgba: Vec<u8>, width: u32, height: u32) -> Self {
        self.texture = Some((rgba, width, height));
        self
    }

    /// Custom model: `name` becomes both the geometry name and the resource
    /// patch default.
    pub fn geometry(mut self, name: impl Into<String>, json: impl Into<String>) -> Self {
        self.geometry = Some((name.into(), json.into()));
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn build(self) -> SkinDescriptor {
        let placeholder = SkinDescriptor::placeholder();
        let (texture, width, height) = self
            .texture
            .unwrap_or((placeholder.texture, placeholder.width, placeholder.height));

        let (geometry_name, geometry_data, resource_patch) = match self.geometry {
            Some((name, json)) => {
                let patch = ResourcePatch::with_default(name.clone());
                (Some(name), Some(json), Some(patch))
            }
            None => (None, None, Some(ResourcePatch::with_default(DEFAULT_GEOMETRY))),
        };

        SkinDescriptor {
            skin_id: self.skin_id,
            texture,
            width,
            height,
            geometry_name,
            geometry_data,
            resource_patch,
            is_verified: self.verified,
        }
    }
}

/// Parsed geometry document. Accepts both the legacy layout (top-level
/// `"geometry.xxx": {...}` keys) and the `minecraft:geometry` array layout.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryModel {
    doc: serde_json::Value,
}

impl GeometryModel {
    pub fn parse(json: &str) -> Result<Self, String> {
        let doc: serde_json::Value = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let model = Self { doc };
        if model.identifiers().is_empty() {
            return Err("no geometry model found".to_string());
        }
        Ok(model)
    }

    /// Every model identifier declared in the document.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(list) = self.doc.get("minecraft:geometry").and_then(|v| v.as_array()) {
            ids.extend(
                list.iter()
                    .filter_map(|m| m.pointer("/description/identifier"))
                    .filter_map(|v| v.as_str())
                    .map(str::to_string),
            );
        }
        if let Some(obj) = self.doc.as_object() {
            ids.extend(obj.keys().filter(|k| k.starts_with("geometry.")).cloned());
        }
        ids
    }

    /// Compact JSON; object keys come out sorted, so equal models serialize
    /// to equal strings.
    pub fn to_canonical_json(&self) -> String {
        self.doc.to_string()
    }
}

pub fn texture_path(dir: &Path, skin_id: &str) -> PathBuf {
    dir.join(format!("{skin_id}.png"))
}

pub fn geometry_path(dir: &Path, skin_id: &str) -> PathBuf {
    dir.join(format!("{skin_id}.json"))
}

/// Geometry name a custom model gets once its placeholder is rewritten.
pub fn namespaced_geometry(skin_id: &str) -> String {
    format!("geometry.{skin_id}")
}

/// Decode a PNG and check its size. Returns raw RGBA8 pixels.
pub fn load_texture(path: &Path, skin_id: &str) -> Result<(Vec<u8>, u32, u32), SkinError> {
    let img = image::open(path).map_err(|e| SkinError::InvalidTexture {
        name: format!("{skin_id}.png"),
        reason: e.to_string(),
    })?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    if !ALLOWED_TEXTURE_SIZES.contains(&(width, height)) {
        return Err(SkinError::InvalidTexture {
            name: format!("{skin_id}.png"),
            reason: format!("{width}x{height}, must be 64x32, 64x64 or 128x128"),
        });
    }
    Ok((rgba.into_raw(), width, height))
}

/// Resolve `skin_id` against `dir`.
pub fn resolve(skin_id: &str, dir: &Path) -> Result<SkinDescriptor, SkinError> {
    let png = texture_path(dir, skin_id);
    let json = geometry_path(dir, skin_id);

    if !png.is_file() {
        return Err(SkinError::MissingTexture(format!("{skin_id}.png")));
    }

    let (rgba, width, height) = load_texture(&png, skin_id)?;
    let mut builder = SkinDescriptor::builder(format!("{skin_id}.Custom"))
        .texture(rgba, width, height);

    if json.is_file() {
        let raw = std::fs::read_to_string(&json).map_err(|source| SkinError::Io {
            path: json.display().to_string(),
            source,
        })?;
        let name = namespaced_geometry(skin_id);
        let rewritten = raw.replace(PLACEHOLDER_GEOMETRY, &name);
        let model = GeometryModel::parse(&rewritten).map_err(|reason| SkinError::InvalidGeometry {
            name: format!("{skin_id}.json"),
            reason,
        })?;
        tracing::debug!("[skin] [geometry] id={} models={:?}", skin_id, model.identifiers());
        builder = builder.geometry(name, model.to_canonical_json());
    }

    Ok(builder.verified(true).build())
}

/// Create the skin folder when it does not exist yet. Returns `true` when
/// it had to be created (nothing can be in it yet).
pub fn ensure_skin_dir(dir: &Path) -> std::io::Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)?;
    tracing::info!("[skin] [dir_created] path={}", dir.display());
    Ok(true)
}

mod texture_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
