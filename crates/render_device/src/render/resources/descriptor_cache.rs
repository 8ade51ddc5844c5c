//! Descriptor set cache
//!
//! Per-draw mode caches one four-texture set per distinct
//! (base, lightmap, macro, detail, sampler mode) key. Sets come from
//! fixed-size pools; a new pool is appended when the last one runs out and
//! pools are only ever released all together.
//!
//! Bindless mode instead keeps one global texture array. Each texture gets an
//! array slot per sampler mode on first use and vertices carry the slot
//! numbers, so the bound set never changes. Slot 0 always holds the null
//! texture.

use std::collections::HashMap;

use crate::render::api::{
    DescriptorPoolHandle, DescriptorSetHandle, GraphicsBackend, TextureBinding,
};
use crate::render::poly_flags::PolyFlags;
use crate::render::RenderError;

use super::sampler::SceneSamplers;
use super::texture_cache::{TextureId, TextureResourceCache, BINDLESS_SAMPLER_MODES};

/// Size of the global bindless texture array
pub const MAX_BINDLESS_TEXTURES: u32 = 16536;

/// Bindless slot holding the null texture
pub const NULL_BINDLESS_INDEX: u32 = 0;

/// Identity of a per-draw descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetKey {
    /// Base texture
    pub texture: Option<TextureId>,
    /// Lightmap
    pub light_map: Option<TextureId>,
    /// Macro texture
    pub macro_texture: Option<TextureId>,
    /// Detail (or fog) texture
    pub detail_texture: Option<TextureId>,
    /// NoSmooth in bit 0, clamp in bit 1
    pub sampler_mode: u32,
}

impl DescriptorSetKey {
    /// Key for a set of texture slots drawn with `flags`
    pub fn new(flags: PolyFlags, slots: [Option<TextureId>; 4], clamp: bool) -> Self {
        let [texture, light_map, macro_texture, detail_texture] = slots;
        Self {
            texture,
            light_map,
            macro_texture,
            detail_texture,
            sampler_mode: flags.sampler_mode(clamp),
        }
    }

    fn slots(&self) -> [Option<TextureId>; 4] {
        [self.texture, self.light_map, self.macro_texture, self.detail_texture]
    }
}

#[derive(Debug)]
struct BindlessTable {
    set: DescriptorSetHandle,
    next_index: u32,
    capacity: u32,
}

/// Cache of texture descriptor sets
#[derive(Debug)]
pub struct DescriptorSetCache {
    sets: HashMap<DescriptorSetKey, DescriptorSetHandle>,
    pools: Vec<DescriptorPoolHandle>,
    sets_left: u32,
    pool_size: u32,
    texture_generation: u64,
    bindless: Option<BindlessTable>,
}

impl DescriptorSetCache {
    /// Create an empty cache whose pools hold `pool_size` sets each
    pub fn new(pool_size: u32) -> Self {
        Self {
            sets: HashMap::new(),
            pools: Vec::new(),
            sets_left: 0,
            pool_size: pool_size.max(1),
            texture_generation: 0,
            bindless: None,
        }
    }

    /// Look up or create the set for a key
    ///
    /// Missing slots bind the null texture. The base texture is sampled with
    /// the key's sampler mode; the other slots use mode 0.
    pub fn get<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        textures: &TextureResourceCache,
        samplers: &SceneSamplers,
        key: DescriptorSetKey,
    ) -> Result<DescriptorSetHandle, RenderError> {
        if textures.generation() != self.texture_generation {
            log::warn!("[DESCRIPTOR] Texture cache was cleared without the descriptor cache");
            self.discard_sets(backend);
            self.texture_generation = textures.generation();
        }

        if let Some(&set) = self.sets.get(&key) {
            return Ok(set);
        }

        let null = textures.null_texture().ok_or(RenderError::NotInitialized)?;
        let mut bindings = [TextureBinding {
            texture: null,
            sampler: samplers.get(0),
        }; 4];
        for (slot, (binding, id)) in bindings.iter_mut().zip(key.slots()).enumerate() {
            binding.texture = textures.handle_or_null(id).unwrap_or(null);
            if slot == 0 {
                binding.sampler = samplers.get(key.sampler_mode);
            }
        }

        if self.sets_left == 0 {
            let pool = backend.create_descriptor_pool(self.pool_size)?;
            self.pools.push(pool);
            self.sets_left = self.pool_size;
            log::debug!("[DESCRIPTOR] Added descriptor pool {}", self.pools.len());
        }

        let pool = *self.pools.last().ok_or(RenderError::NotInitialized)?;
        let set = backend.allocate_descriptor_set(pool, &bindings)?;
        self.sets_left -= 1;
        self.sets.insert(key, set);
        Ok(set)
    }

    /// Create the global texture array and put the null texture in slot 0
    pub fn enable_bindless<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        textures: &TextureResourceCache,
        samplers: &SceneSamplers,
        capacity: u32,
    ) -> Result<(), RenderError> {
        let null = textures.null_texture().ok_or(RenderError::NotInitialized)?;
        let set = backend.create_bindless_set(capacity)?;
        let binding = TextureBinding {
            texture: null,
            sampler: samplers.get(0),
        };
        if let Err(e) = backend.write_bindless_slot(set, NULL_BINDLESS_INDEX, binding) {
            backend.destroy_bindless_set(set);
            return Err(e);
        }

        self.bindless = Some(BindlessTable {
            set,
            next_index: NULL_BINDLESS_INDEX + 1,
            capacity,
        });
        log::debug!("[DESCRIPTOR] Bindless texture array with {capacity} slots");
        Ok(())
    }

    /// The global texture array, when bindless mode is active
    pub fn bindless_set(&self) -> Option<DescriptorSetHandle> {
        self.bindless.as_ref().map(|table| table.set)
    }

    /// Array slot of a texture sampled with `sampler_mode`
    ///
    /// A texture without a slot for that mode is written into the next free
    /// one. Missing textures, and textures arriving after the array is full,
    /// resolve to the null slot.
    pub fn texture_array_index<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        textures: &mut TextureResourceCache,
        samplers: &SceneSamplers,
        texture: Option<TextureId>,
        sampler_mode: u32,
    ) -> u32 {
        let mode = sampler_mode as usize % BINDLESS_SAMPLER_MODES;
        let (Some(table), Some(id)) = (self.bindless.as_mut(), texture) else {
            return NULL_BINDLESS_INDEX;
        };
        let Some(entry) = textures.entry_mut(id) else {
            return NULL_BINDLESS_INDEX;
        };
        if let Some(index) = entry.bindless_index[mode] {
            return index;
        }

        if table.next_index >= table.capacity {
            log::warn!("[DESCRIPTOR] Bindless texture array is full ({} slots)", table.capacity);
            return NULL_BINDLESS_INDEX;
        }

        let index = table.next_index;
        let binding = TextureBinding {
            texture: entry.handle,
            sampler: samplers.get(sampler_mode),
        };
        if let Err(e) = backend.write_bindless_slot(table.set, index, binding) {
            log::warn!("[DESCRIPTOR] Failed to write bindless slot {index}: {e}");
            return NULL_BINDLESS_INDEX;
        }

        table.next_index += 1;
        entry.bindless_index[mode] = Some(index);
        index
    }

    /// Release every set and pool and restart bindless slot assignment
    ///
    /// Must run together with [`TextureResourceCache::clear`].
    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B, textures: &mut TextureResourceCache) {
        self.discard_sets(backend);
        textures.reset_bindless_indices();
        self.texture_generation = textures.generation();
    }

    /// Drop every set after the sampler table was rebuilt
    ///
    /// Cached sets and bindless slots reference the old samplers, so all of
    /// them are released and the null slot is rewritten.
    pub fn reset_samplers<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        textures: &mut TextureResourceCache,
        samplers: &SceneSamplers,
    ) -> Result<(), RenderError> {
        self.clear(backend, textures);
        let Some(table) = self.bindless.as_ref() else {
            return Ok(());
        };
        let null = textures.null_texture().ok_or(RenderError::NotInitialized)?;
        backend.write_bindless_slot(
            table.set,
            NULL_BINDLESS_INDEX,
            TextureBinding {
                texture: null,
                sampler: samplers.get(0),
            },
        )
    }

    fn discard_sets<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.sets.clear();
        for pool in self.pools.drain(..) {
            backend.destroy_descriptor_pool(pool);
        }
        self.sets_left = 0;
        if let Some(table) = self.bindless.as_mut() {
            table.next_index = NULL_BINDLESS_INDEX + 1;
        }
    }

    /// Release everything including the bindless array
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B, textures: &mut TextureResourceCache) {
        self.clear(backend, textures);
        if let Some(table) = self.bindless.take() {
            backend.destroy_bindless_set(table.set);
        }
    }

    /// Number of cached sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// No sets are cached
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of live pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessBackend;
    use crate::render::scene::{MipLevel, TextureFormat, TextureInfo};

    struct Fixture {
        backend: HeadlessBackend,
        textures: TextureResourceCache,
        samplers: SceneSamplers,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backend = HeadlessBackend::new(16, 16);
            let mut textures = TextureResourceCache::new();
            textures.create_null_texture(&mut backend).unwrap();
            let samplers = SceneSamplers::create(&mut backend, 0.0).unwrap();
            Self {
                backend,
                textures,
                samplers,
            }
        }

        fn texture(&mut self, cache_id: u64) -> TextureId {
            let mut info = TextureInfo::new(
                cache_id,
                TextureFormat::Rgba8,
                MipLevel::new(1, 1, vec![1, 2, 3, 4]),
            );
            self.textures
                .get(&mut self.backend, Some(&mut info), false)
                .unwrap()
                .unwrap()
        }

        fn get(&mut self, cache: &mut DescriptorSetCache, key: DescriptorSetKey) -> DescriptorSetHandle {
            cache
                .get(&mut self.backend, &self.textures, &self.samplers, key)
                .unwrap()
        }
    }

    #[test]
    fn test_same_key_same_set() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(1000);
        let tex = fx.texture(1);
        let key = DescriptorSetKey::new(PolyFlags::empty(), [Some(tex), None, None, None], false);

        let a = fx.get(&mut cache, key);
        let b = fx.get(&mut cache, key);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(fx.backend.allocated_descriptor_sets(), 1);
    }

    #[test]
    fn test_sampler_mode_is_part_of_key() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(1000);
        let tex = fx.texture(1);
        let slots = [Some(tex), None, None, None];

        let smooth = fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), slots, false));
        let point = fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::NO_SMOOTH, slots, false));
        let clamped = fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), slots, true));
        assert_ne!(smooth, point);
        assert_ne!(smooth, clamped);
        assert_ne!(point, clamped);

        let bindings = fx.backend.descriptor_set_bindings(point).unwrap();
        assert_eq!(bindings[0].sampler, fx.samplers.get(1));
        assert_eq!(bindings[1].sampler, fx.samplers.get(0));
    }

    #[test]
    fn test_missing_slots_bind_null_texture() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(1000);
        let set = fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), [None; 4], false));

        let null = fx.textures.null_texture().unwrap();
        let bindings = fx.backend.descriptor_set_bindings(set).unwrap();
        assert!(bindings.iter().all(|b| b.texture == null));
    }

    #[test]
    fn test_pools_grow_when_exhausted() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(2);
        let ids: Vec<_> = (1..=5).map(|i| fx.texture(i)).collect();

        for id in &ids {
            fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), [Some(*id), None, None, None], false));
        }
        assert_eq!(cache.pool_count(), 3);
        assert_eq!(cache.len(), 5);

        cache.clear(&mut fx.backend, &mut fx.textures);
        assert_eq!(cache.pool_count(), 0);
        assert!(cache.is_empty());
        assert_eq!(fx.backend.live_descriptor_pools(), 0);
    }

    #[test]
    fn test_stale_texture_generation_discards_sets() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(1000);
        let tex = fx.texture(1);
        fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), [Some(tex), None, None, None], false));

        fx.textures.clear(&mut fx.backend);
        fx.get(&mut cache, DescriptorSetKey::new(PolyFlags::empty(), [None; 4], false));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pool_count(), 1);
    }

    #[test]
    fn test_bindless_slots() {
        let mut fx = Fixture::new();
        let mut cache = DescriptorSetCache::new(1000);
        cache
            .enable_bindless(&mut fx.backend, &fx.textures, &fx.samplers, 3)
            .unwrap();
        let set = cache.bindless_set().unwrap();
        let a = fx.texture(1);
        let b = fx.texture(2);

        let index = |cache: &mut DescriptorSetCache, fx: &mut Fixture, id, mode| {
            cache.texture_array_index(&mut fx.backend, &mut fx.textures, &fx.samplers, id, mode)
        };

        assert_eq!(index(&mut cache, &mut fx, None, 0), NULL_BINDLESS_INDEX);
        assert_eq!(index(&mut cache, &mut fx, Some(a), 0), 1);
        assert_eq!(index(&mut cache, &mut fx, Some(a), 0), 1);
        assert_eq!(index(&mut cache, &mut fx, Some(a), 1), 2);
        assert_eq!(index(&mut cache, &mut fx, Some(b), 0), NULL_BINDLESS_INDEX);

        let slot = fx.backend.bindless_slot(set, 2).unwrap();
        assert_eq!(slot.sampler, fx.samplers.get(1));
        assert_eq!(
            fx.backend.bindless_slot(set, 0).unwrap().texture,
            fx.textures.null_texture().unwrap()
        );

        cache.clear(&mut fx.backend, &mut fx.textures);
        assert_eq!(index(&mut cache, &mut fx, Some(b), 0), 1);
        assert_eq!(fx.textures.entry(a).unwrap().bindless_index, [None; 4]);
    }
}
