//! Texture loading and the per-scene texture cache

use crate::backend::*;
use crate::error::{EngineError, EngineResult};
use image::{DynamicImage, GenericImageView};
use std::collections::HashMap;
use std::path::Path;

/// Cache key of the white texture bound when a material has none
pub const DEFAULT_TEXTURE: &str = "default";

/// Cache key of the flat normal map bound when a material has none
pub const DEFAULT_NORMAL_MAP: &str = "default_normal";

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();

        let img = image::open(path).map_err(|e| EngineError::Texture {
            path: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Load texture from encoded bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> EngineResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| EngineError::Texture {
            path: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], DEFAULT_TEXTURE)
    }

    /// Tangent-space (0, 0, 1), stored linear
    pub fn default_normal() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            ..Self::solid_color([128, 128, 255, 255], DEFAULT_NORMAL_MAP)
        }
    }

    /// Two-color checkerboard with 8 pixel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = if ((x / 8) + (y / 8)) % 2 == 0 { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// Texture and view living on the GPU
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
}

impl GpuTexture {
    pub fn create<B: GraphicsBackend>(backend: &mut B, data: &TextureData) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;

        let view = backend.create_texture_view(handle)?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self { handle, view })
    }
}

struct CachedTexture {
    data: TextureData,
    gpu: Option<GpuTexture>,
}

/// Textures keyed by path, each loaded at most once
pub struct TextureCache {
    entries: HashMap<String, CachedTexture>,
    /// Insertion order, for uploads and reverse-order release
    order: Vec<String>,
}

impl TextureCache {
    pub fn new() -> Self {
        let mut cache = Self {
            entries: HashMap::new(),
            order: Vec::new(),
        };
        cache.insert(DEFAULT_TEXTURE, TextureData::white());
        cache.insert(DEFAULT_NORMAL_MAP, TextureData::default_normal());
        cache
    }

    /// Load `path` unless it is cached already, returning its key
    pub fn create_texture<P: AsRef<Path>>(&mut self, path: P) -> EngineResult<String> {
        let key = path.as_ref().to_string_lossy().into_owned();
        if !self.entries.contains_key(&key) {
            let data = TextureData::from_file(path.as_ref())?;
            log::debug!("Loaded texture '{}' ({}x{})", key, data.width, data.height);
            self.insert(&key, data);
        }
        Ok(key)
    }

    /// Register already decoded pixels under `key`, replacing nothing
    pub fn insert(&mut self, key: &str, data: TextureData) -> String {
        if !self.entries.contains_key(key) {
            self.order.push(key.to_string());
            self.entries.insert(key.to_string(), CachedTexture { data, gpu: None });
        }
        key.to_string()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&TextureData> {
        self.entries.get(key).map(|entry| &entry.data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// GPU view for `key`, falling back to `fallback` when missing or not uploaded
    pub fn view_or(&self, key: Option<&str>, fallback: &str) -> Option<TextureViewHandle> {
        key.and_then(|k| self.entries.get(k))
            .and_then(|entry| entry.gpu)
            .or_else(|| self.entries.get(fallback).and_then(|entry| entry.gpu))
            .map(|gpu| gpu.view)
    }

    /// Upload every texture not yet on the GPU
    pub fn upload<B: GraphicsBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        for key in &self.order {
            if let Some(entry) = self.entries.get_mut(key) {
                if entry.gpu.is_none() {
                    entry.gpu = Some(GpuTexture::create(backend, &entry.data)?);
                }
            }
        }
        Ok(())
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for key in self.order.iter().rev() {
            if let Some(gpu) = self.entries.get_mut(key).and_then(|entry| entry.gpu.take()) {
                backend.destroy_texture_view(gpu.view);
                backend.destroy_texture(gpu.handle);
            }
        }
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_with_defaults() {
        let cache = TextureCache::new();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(DEFAULT_TEXTURE).unwrap().data, vec![255; 4]);
        assert_eq!(
            cache.get(DEFAULT_NORMAL_MAP).unwrap().format,
            TextureFormat::Rgba8Unorm
        );
    }

    #[test]
    fn missing_file_is_a_texture_error() {
        let mut cache = TextureCache::new();
        let err = cache.create_texture("does/not/exist.png").unwrap_err();
        assert!(matches!(err, EngineError::Texture { path, .. } if path.ends_with("exist.png")));
    }

    #[test]
    fn upload_once_and_fall_back() {
        let mut backend = RecordingBackend::new(4, 4);
        let mut cache = TextureCache::new();
        cache.insert("grid", TextureData::checkerboard(16, [0; 4], [255; 4]));

        cache.upload(&mut backend).unwrap();
        cache.upload(&mut backend).unwrap();
        assert_eq!(backend.texture_count(), 3);

        let fallback = cache.view_or(None, DEFAULT_TEXTURE);
        assert!(fallback.is_some());
        assert_eq!(cache.view_or(Some("unknown"), DEFAULT_TEXTURE), fallback);
        assert_ne!(cache.view_or(Some("grid"), DEFAULT_TEXTURE), fallback);

        cache.destroy(&mut backend);
        assert_eq!(backend.texture_count(), 0);
    }
}
