//! GPU texture cache
//!
//! Maps an engine texture identity (cache id plus the masked qualifier) to a
//! GPU texture. Entries are created on first reference, re-uploaded in place
//! when the engine marks the source realtime-changed, and dropped only as a
//! whole by [`TextureResourceCache::clear`].
//!
//! Entries are addressed by slotmap keys: a [`TextureId`] kept past a clear
//! resolves to nothing instead of to whatever entry reused its slot.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

use crate::render::api::{GraphicsBackend, TextureHandle, TextureRect};
use crate::render::scene::{MipLevel, TextureFormat, TextureInfo};
use crate::render::RenderError;

new_key_type! {
    /// Key of a cached texture entry
    pub struct TextureId;
}

/// Number of sampler modes a texture can be bound with in the bindless array
pub const BINDLESS_SAMPLER_MODES: usize = 4;

/// Identity of a cached texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    /// Engine cache id
    pub cache_id: u64,
    /// Palette index 0 is transparent
    pub masked: bool,
}

/// RGBA8 texel data ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureUpload {
    /// Width of the top mip
    pub width: u32,
    /// Height of the top mip
    pub height: u32,
    /// Mip chain in RGBA8, largest first
    pub mips: Vec<MipLevel>,
}

impl TextureUpload {
    /// 1x1 opaque white texture bound in place of missing slots
    pub fn null_texture() -> Self {
        Self {
            width: 1,
            height: 1,
            mips: vec![MipLevel::new(1, 1, vec![255, 255, 255, 255])],
        }
    }

    /// Convert every mip of an engine texture to RGBA8
    pub fn from_info(info: &TextureInfo, masked: bool) -> Result<Self, RenderError> {
        let mips = info
            .mips
            .iter()
            .map(|mip| {
                convert_texels(&info.format, mip, masked, mip.width, mip.height)
                    .map(|data| MipLevel::new(mip.width, mip.height, data))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if mips.is_empty() {
            return Err(RenderError::UnsupportedTexture(format!(
                "texture {} has no mip levels",
                info.cache_id
            )));
        }

        Ok(Self {
            width: mips[0].width,
            height: mips[0].height,
            mips,
        })
    }

    /// Convert a rectangle of the top mip to RGBA8
    pub fn from_info_rect(
        info: &TextureInfo,
        masked: bool,
        rect: TextureRect,
    ) -> Result<Self, RenderError> {
        let top = info.mips.first().ok_or_else(|| {
            RenderError::UnsupportedTexture(format!("texture {} has no mip levels", info.cache_id))
        })?;
        if !rect.fits_within(top.width, top.height) {
            return Err(RenderError::UnsupportedTexture(format!(
                "rectangle {rect:?} outside {}x{} texture {}",
                top.width, top.height, info.cache_id
            )));
        }

        let bpp = info.format.bytes_per_texel();
        let row_bytes = top.width as usize * bpp;
        let mut cropped = Vec::with_capacity(rect.width as usize * rect.height as usize * bpp);
        for row in rect.y..rect.y + rect.height {
            let start = row as usize * row_bytes + rect.x as usize * bpp;
            let end = start + rect.width as usize * bpp;
            let texels = top.data.get(start..end).ok_or_else(|| {
                RenderError::UnsupportedTexture(format!("texture {} data too short", info.cache_id))
            })?;
            cropped.extend_from_slice(texels);
        }

        let region = MipLevel::new(rect.width, rect.height, cropped);
        let data = convert_texels(&info.format, &region, masked, rect.width, rect.height)?;
        Ok(Self {
            width: rect.width,
            height: rect.height,
            mips: vec![MipLevel::new(rect.width, rect.height, data)],
        })
    }
}

fn convert_texels(
    format: &TextureFormat,
    mip: &MipLevel,
    masked: bool,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, RenderError> {
    let texels = width as usize * height as usize;
    let needed = texels * format.bytes_per_texel();
    let src = mip.data.get(..needed).ok_or_else(|| {
        RenderError::UnsupportedTexture(format!(
            "{width}x{height} mip needs {needed} bytes, has {}",
            mip.data.len()
        ))
    })?;

    let mut out = Vec::with_capacity(texels * 4);
    match format {
        TextureFormat::P8 { palette } => {
            for &index in src {
                if masked && index == 0 {
                    out.extend_from_slice(&[0, 0, 0, 0]);
                    continue;
                }
                let color = palette.get(usize::from(index)).ok_or_else(|| {
                    RenderError::UnsupportedTexture(format!("palette has no entry {index}"))
                })?;
                out.extend_from_slice(color);
            }
        }
        TextureFormat::Rgba8 => out.extend_from_slice(src),
        TextureFormat::Bgra8 => {
            for texel in src.chunks_exact(4) {
                out.extend_from_slice(&[texel[2], texel[1], texel[0], texel[3]]);
            }
        }
    }
    Ok(out)
}

/// A texture resident on the GPU
#[derive(Debug, Clone)]
pub struct CachedTexture {
    /// Identity this entry was created for
    pub key: TextureKey,
    /// Backend texture
    pub handle: TextureHandle,
    /// Width of the top mip
    pub width: u32,
    /// Height of the top mip
    pub height: u32,
    /// Slot in the bindless array per sampler mode, once assigned
    pub bindless_index: [Option<u32>; BINDLESS_SAMPLER_MODES],
}

/// Cache of GPU textures keyed by engine identity
#[derive(Debug, Default)]
pub struct TextureResourceCache {
    entries: SlotMap<TextureId, CachedTexture>,
    lookup: HashMap<TextureKey, TextureId>,
    null_texture: Option<TextureHandle>,
    generation: u64,
    uploads: u32,
    rect_uploads: u32,
}

impl TextureResourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the shared 1x1 white placeholder
    pub fn create_null_texture<B: GraphicsBackend>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        if self.null_texture.is_none() {
            self.null_texture = Some(backend.create_texture(&TextureUpload::null_texture())?);
        }
        Ok(())
    }

    /// Placeholder bound for missing texture slots
    pub fn null_texture(&self) -> Option<TextureHandle> {
        self.null_texture
    }

    /// Resolve an engine texture, uploading it when needed
    ///
    /// `None` in gives `None` out. A realtime-changed texture is re-uploaded
    /// into its existing GPU texture; the dirty flag is cleared only once
    /// that upload succeeds, so a failed one is retried on the next lookup.
    pub fn get<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        info: Option<&mut TextureInfo>,
        masked: bool,
    ) -> Result<Option<TextureId>, RenderError> {
        let Some(info) = info else {
            return Ok(None);
        };
        let key = TextureKey {
            cache_id: info.cache_id,
            masked,
        };

        if let Some(&id) = self.lookup.get(&key) {
            if info.realtime_changed {
                let upload = TextureUpload::from_info(info, masked)?;
                if let Some(entry) = self.entries.get_mut(id) {
                    backend.update_texture(entry.handle, &upload)?;
                    entry.width = upload.width;
                    entry.height = upload.height;
                    self.uploads += 1;
                }
                info.realtime_changed = false;
            }
            return Ok(Some(id));
        }

        let upload = TextureUpload::from_info(info, masked)?;
        let handle = backend.create_texture(&upload)?;
        info.realtime_changed = false;
        self.uploads += 1;

        let id = self.entries.insert(CachedTexture {
            key,
            handle,
            width: upload.width,
            height: upload.height,
            bindless_index: [None; BINDLESS_SAMPLER_MODES],
        });
        self.lookup.insert(key, id);
        log::trace!("[TEXTURE] Cached texture {} (masked: {masked})", info.cache_id);
        Ok(Some(id))
    }

    /// Re-upload a rectangle of an already cached texture
    ///
    /// Returns `false` when neither the masked nor the unmasked variant of
    /// the texture is cached yet.
    pub fn update_rect<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        info: &TextureInfo,
        rect: TextureRect,
    ) -> Result<bool, RenderError> {
        let mut updated = false;
        for masked in [false, true] {
            let key = TextureKey {
                cache_id: info.cache_id,
                masked,
            };
            let Some(entry) = self.lookup.get(&key).and_then(|&id| self.entries.get(id)) else {
                continue;
            };
            let upload = TextureUpload::from_info_rect(info, masked, rect)?;
            backend.update_texture_rect(entry.handle, &upload, rect)?;
            self.rect_uploads += 1;
            updated = true;
        }
        Ok(updated)
    }

    /// Cached entry for an id, if it is still live
    pub fn entry(&self, id: TextureId) -> Option<&CachedTexture> {
        self.entries.get(id)
    }

    /// Mutable cached entry for an id
    pub fn entry_mut(&mut self, id: TextureId) -> Option<&mut CachedTexture> {
        self.entries.get_mut(id)
    }

    /// Forget every bindless slot assignment
    pub fn reset_bindless_indices(&mut self) {
        for entry in self.entries.values_mut() {
            entry.bindless_index = [None; BINDLESS_SAMPLER_MODES];
        }
    }

    /// Backend texture for an id, falling back to the null texture
    pub fn handle_or_null(&self, id: Option<TextureId>) -> Option<TextureHandle> {
        id.and_then(|id| self.entries.get(id))
            .map(|entry| entry.handle)
            .or(self.null_texture)
    }

    /// Release every cached texture (the null texture stays)
    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, entry) in self.entries.drain() {
            backend.destroy_texture(entry.handle);
        }
        self.lookup.clear();
        self.generation += 1;
        log::debug!("[TEXTURE] Cache cleared (generation {})", self.generation);
    }

    /// Release everything including the null texture
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.clear(backend);
        if let Some(handle) = self.null_texture.take() {
            backend.destroy_texture(handle);
        }
    }

    /// Number of cached textures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No textures are cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Incremented by every clear
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Full texture uploads since the last counter reset
    pub fn uploads(&self) -> u32 {
        self.uploads
    }

    /// Rectangle uploads since the last counter reset
    pub fn rect_uploads(&self) -> u32 {
        self.rect_uploads
    }

    /// Reset the upload counters
    pub fn reset_counters(&mut self) {
        self.uploads = 0;
        self.rect_uploads = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{FailureInjection, HeadlessBackend};

    fn palette() -> Vec<[u8; 4]> {
        (0..=255u8).map(|i| [i, i, i, 255]).collect()
    }

    fn p8_texture(cache_id: u64) -> TextureInfo {
        TextureInfo::new(
            cache_id,
            TextureFormat::P8 { palette: palette() },
            MipLevel::new(2, 2, vec![0, 1, 2, 3]),
        )
    }

    #[test]
    fn test_null_input_gives_no_texture() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        assert_eq!(cache.get(&mut backend, None, false).unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_repeat_lookup_reuses_entry() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(1);

        let a = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        let b = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.uploads(), 1);
        assert_eq!(backend.live_textures(), 1);
    }

    #[test]
    fn test_masked_variant_is_separate_entry() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(1);

        let plain = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        let masked = cache.get(&mut backend, Some(&mut info), true).unwrap().unwrap();
        assert_ne!(plain, masked);
        assert_eq!(cache.len(), 2);

        let masked_handle = cache.entry(masked).unwrap().handle;
        let texels = backend.texture_data(masked_handle).unwrap();
        assert_eq!(&texels[..4], &[0, 0, 0, 0]);
        assert_eq!(&texels[4..8], &[1, 1, 1, 255]);
    }

    #[test]
    fn test_realtime_change_updates_in_place() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(1);

        let id = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        let handle = cache.entry(id).unwrap().handle;

        info.mips[0].data = vec![9, 9, 9, 9];
        info.realtime_changed = true;
        let again = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();

        assert_eq!(id, again);
        assert_eq!(cache.entry(again).unwrap().handle, handle);
        assert!(!info.realtime_changed);
        assert_eq!(cache.uploads(), 2);
        assert_eq!(&backend.texture_data(handle).unwrap()[..4], &[9, 9, 9, 255]);
    }

    #[test]
    fn test_failed_realtime_update_stays_dirty() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(1);

        let id = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        let handle = cache.entry(id).unwrap().handle;

        info.mips[0].data.truncate(3);
        info.realtime_changed = true;
        assert!(cache.get(&mut backend, Some(&mut info), false).is_err());
        assert!(info.realtime_changed);
        assert_eq!(backend.texture_updates(), 0);

        info.mips[0].data = vec![7, 7, 7, 7];
        cache.get(&mut backend, Some(&mut info), false).unwrap();
        assert!(!info.realtime_changed);
        assert_eq!(&backend.texture_data(handle).unwrap()[..4], &[7, 7, 7, 255]);
    }

    #[test]
    fn test_clear_invalidates_ids() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        cache.create_null_texture(&mut backend).unwrap();
        let mut info = p8_texture(1);

        let id = cache.get(&mut backend, Some(&mut info), false).unwrap().unwrap();
        cache.clear(&mut backend);

        assert!(cache.entry(id).is_none());
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.handle_or_null(Some(id)), cache.null_texture());
        assert_eq!(backend.live_textures(), 1);

        cache.release(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_bgra_is_swizzled() {
        let info = TextureInfo::new(
            3,
            TextureFormat::Bgra8,
            MipLevel::new(1, 1, vec![10, 20, 30, 40]),
        );
        let upload = TextureUpload::from_info(&info, false).unwrap();
        assert_eq!(upload.mips[0].data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_short_texel_data_is_rejected() {
        let info = TextureInfo::new(4, TextureFormat::Rgba8, MipLevel::new(2, 2, vec![0; 3]));
        assert!(matches!(
            TextureUpload::from_info(&info, false),
            Err(RenderError::UnsupportedTexture(_))
        ));
    }

    #[test]
    fn test_rect_update_requires_cached_texture() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(5);
        let rect = TextureRect {
            x: 1,
            y: 0,
            width: 1,
            height: 2,
        };

        assert!(!cache.update_rect(&mut backend, &info, rect).unwrap());
        cache.get(&mut backend, Some(&mut info), false).unwrap();
        assert!(cache.update_rect(&mut backend, &info, rect).unwrap());
        assert_eq!(cache.rect_uploads(), 1);
    }

    #[test]
    fn test_rect_past_texture_edge_is_rejected() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(5);
        cache.get(&mut backend, Some(&mut info), false).unwrap();

        let wrapping = TextureRect {
            x: u32::MAX,
            y: 0,
            width: 2,
            height: 2,
        };
        assert!(matches!(
            cache.update_rect(&mut backend, &info, wrapping),
            Err(RenderError::UnsupportedTexture(_))
        ));
        let tall = TextureRect {
            x: 0,
            y: 1,
            width: 1,
            height: u32::MAX,
        };
        assert!(cache.update_rect(&mut backend, &info, tall).is_err());
        assert_eq!(cache.rect_uploads(), 0);
        assert_eq!(backend.texture_updates(), 0);
    }

    #[test]
    fn test_rect_upload_crops_rows() {
        let info = TextureInfo::new(
            6,
            TextureFormat::P8 { palette: palette() },
            MipLevel::new(2, 2, vec![0, 1, 2, 3]),
        );
        let rect = TextureRect {
            x: 1,
            y: 0,
            width: 1,
            height: 2,
        };
        let upload = TextureUpload::from_info_rect(&info, false, rect).unwrap();
        assert_eq!(upload.mips[0].data, vec![1, 1, 1, 255, 3, 3, 3, 255]);
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let mut backend = HeadlessBackend::new(16, 16);
        backend.inject_failures(FailureInjection {
            texture_creation: true,
            ..Default::default()
        });
        let mut cache = TextureResourceCache::new();
        let mut info = p8_texture(1);
        assert!(cache.get(&mut backend, Some(&mut info), false).is_err());
        assert!(cache.is_empty());
    }
}
