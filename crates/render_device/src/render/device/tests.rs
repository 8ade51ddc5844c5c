use approx::assert_relative_eq;

use super::*;
use crate::config::{AntialiasMode, LightMode};
use crate::foundation::math::{Vec2, Vec3};
use crate::render::api::{BackendCapabilities, DrawCommand, HitRegion};
use crate::render::backends::headless::{FailureInjection, HeadlessBackend};
use crate::render::poly_flags::PipelineIndex;
use crate::render::resources::SceneVertex;
use crate::render::scene::{MipLevel, SavedPoly, SurfaceFacet, SurfaceInfo, Tile, TransTexture};

const SIZE: u32 = 64;

fn device_with(config: RenderDeviceConfig) -> RenderDevice<HeadlessBackend> {
    let mut device = RenderDevice::new(HeadlessBackend::new(SIZE, SIZE), config);
    assert!(device.init(SIZE, SIZE));
    device
}

fn device() -> RenderDevice<HeadlessBackend> {
    device_with(RenderDeviceConfig::default())
}

fn frame() -> SceneNode {
    SceneNode::new(SIZE, SIZE, 90.0)
}

fn texture(cache_id: u64) -> TextureInfo {
    TextureInfo::new(cache_id, TextureFormat::Rgba8, MipLevel::new(4, 4, vec![255; 64]))
}

fn begin(device: &mut RenderDevice<HeadlessBackend>, params: LockParams) -> SceneNode {
    let frame = frame();
    device.lock(params);
    device.set_scene_node(&frame);
    frame
}

fn draws(device: &RenderDevice<HeadlessBackend>) -> Vec<DrawCommand> {
    device.backend().recorded_draws().iter().map(|d| d.command).collect()
}

fn pipeline_key(device: &RenderDevice<HeadlessBackend>, draw: &DrawCommand) -> Option<PipelineKey> {
    device.backend().pipeline_desc(draw.pipeline).map(|desc| desc.key)
}

fn vertices(device: &RenderDevice<HeadlessBackend>, draw: &DrawCommand) -> Vec<SceneVertex> {
    device.backend().draw_vertices(draw)
}

fn trans(x: f32, y: f32, z: f32) -> TransTexture {
    TransTexture::new(Vec3::new(x, y, z), 0.0, 0.0)
}

#[test]
fn test_init_and_exit_balance_resources() {
    let mut device = device();
    assert!(device.is_initialized());
    assert_eq!(device.backend().live_pipelines(), PipelineIndex::COUNT + 3);
    assert_eq!(device.backend().live_samplers(), 16);
    assert_eq!(device.backend().live_textures(), 1);
    assert_eq!(device.backend().scene_buffer_capacity(), Some((1_000_000, 3_000_000)));

    device.exit();
    assert!(!device.is_initialized());
    assert_eq!(device.backend().live_pipelines(), 0);
    assert_eq!(device.backend().live_samplers(), 0);
    assert_eq!(device.backend().live_textures(), 0);
    assert_eq!(device.backend().scene_buffer_capacity(), None);

    device.exit();
    assert_eq!(device.backend().live_pipelines(), 0);
}

#[test]
fn test_init_failure_releases_partial_resources() {
    let mut device = RenderDevice::new(HeadlessBackend::new(SIZE, SIZE), RenderDeviceConfig::default());
    device.backend_mut().inject_failures(FailureInjection {
        pipelines_before_failure: Some(10),
        ..FailureInjection::default()
    });

    assert!(!device.init(SIZE, SIZE));
    assert!(!device.is_initialized());
    assert_eq!(device.backend().live_pipelines(), 0);
    assert_eq!(device.backend().live_samplers(), 0);
    assert_eq!(device.backend().live_textures(), 0);
    assert_eq!(device.backend().live_descriptor_pools(), 0);
}

#[test]
fn test_invalid_config_fails_init() {
    let config = RenderDeviceConfig::default().with_descriptor_pool_size(0);
    let mut device = RenderDevice::new(HeadlessBackend::new(SIZE, SIZE), config);
    assert!(!device.init(SIZE, SIZE));
    assert_eq!(device.backend().live_samplers(), 0);
}

#[test]
fn test_matching_state_merges_into_one_draw() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    for x in [0.0, 16.0, 32.0] {
        device.draw_tile(&frame, &mut info, &Tile::new(x, 0.0, 16.0, 16.0), PolyFlags::empty());
    }
    assert!(draws(&device).is_empty());

    assert_eq!(device.unlock(true), None);
    let draws = draws(&device);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].first_index, 0);
    assert_eq!(draws[0].index_count, 18);

    let stats = device.stats();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.tiles, 3);
    assert_eq!(stats.uploads, 1);
}

#[test]
fn test_alternating_state_keeps_submission_order() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);
    let tile = Tile::new(0.0, 0.0, 8.0, 8.0);

    device.draw_tile(&frame, &mut info, &tile, PolyFlags::empty());
    device.draw_tile(&frame, &mut info, &tile, PolyFlags::TRANSLUCENT);
    device.draw_tile(&frame, &mut info, &tile, PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 3);
    assert_eq!(
        draws.iter().map(|d| d.first_index).collect::<Vec<_>>(),
        vec![0, 6, 12]
    );
    assert_eq!(draws[0].pipeline, draws[2].pipeline);
    assert_ne!(draws[0].pipeline, draws[1].pipeline);
    assert_eq!(
        pipeline_key(&device, &draws[1]),
        Some(PipelineKey::for_flags(PolyFlags::TRANSLUCENT))
    );
}

#[test]
fn test_buffer_exhaustion_starts_new_generation() {
    let config = RenderDeviceConfig::default().with_scene_buffer_sizes(8, 12);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    for x in [0.0, 8.0, 16.0] {
        device.draw_tile(&frame, &mut info, &Tile::new(x, 0.0, 8.0, 8.0), PolyFlags::empty());
    }
    assert_eq!(device.backend().generations_finished(), 1);
    assert_eq!(draws(&device).len(), 1);
    assert_eq!(draws(&device)[0].index_count, 12);

    device.unlock(true);
    let draws = draws(&device);
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[1].first_index, 0);
    assert_eq!(draws[1].index_count, 6);
    assert_eq!(draws[0].pipeline, draws[1].pipeline);
    assert_eq!(device.stats().buffers_used, 2);
    assert_eq!(device.stats().tiles, 3);
}

#[test]
fn test_oversized_and_degenerate_polygons_are_dropped() {
    let config = RenderDeviceConfig::default().with_scene_buffer_sizes(8, 12);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    let big: Vec<TransTexture> = (0..10).map(|i| trans(i as f32, (i % 2) as f32, 10.0)).collect();
    device.draw_gouraud_polygon(&frame, &mut info, &big, PolyFlags::empty());
    device.draw_gouraud_polygon(&frame, &mut info, &big[..2], PolyFlags::empty());
    device.unlock(true);

    assert!(draws(&device).is_empty());
    assert_eq!(device.stats().gouraud_polygons, 0);
}

#[test]
fn test_gouraud_polygon_vertex_data() {
    let config = RenderDeviceConfig::default().with_light_mode(LightMode::BrighterActors);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    let mut pts = vec![trans(0.0, 0.0, 10.0), trans(1.0, 0.0, 10.0), trans(1.0, 1.0, 10.0)];
    for p in &mut pts {
        p.light = Vec3::new(0.25, 0.5, 0.75);
        p.fog = Vec4::new(0.1, 0.2, 0.3, 0.4);
        p.u = 2.0;
    }
    device.draw_gouraud_polygon(&frame, &mut info, &pts, PolyFlags::empty());
    device.draw_gouraud_polygon(&frame, &mut info, &pts, PolyFlags::MODULATED | PolyFlags::RENDER_FOG);
    device.draw_gouraud_polygon(&frame, &mut info, &pts, PolyFlags::TRANSLUCENT | PolyFlags::RENDER_FOG);
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 3);

    let lit = vertices(&device, &draws[0]);
    assert_eq!(lit.len(), 3);
    assert_eq!(lit[0].flags, VertexFlags::BRIGHT_ACTOR.bits());
    assert_eq!(lit[0].color, [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(lit[0].tex_coord2, [0.1, 0.2]);
    assert_eq!(lit[0].tex_coord3, [0.3, 0.4]);
    assert_relative_eq!(lit[0].tex_coord[0], 0.5);

    let modulated = vertices(&device, &draws[1]);
    assert_eq!(modulated[0].color, [1.0, 1.0, 1.0, 1.0]);
    assert_eq!(modulated[0].flags, 0);

    let translucent = vertices(&device, &draws[2]);
    assert_eq!(translucent[0].flags, 0);
    assert_eq!(device.stats().gouraud_polygons, 3);
}

#[test]
fn test_gouraud_fog_flag_only_for_unblended_polygons() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);
    let pts = [trans(0.0, 0.0, 10.0), trans(1.0, 0.0, 10.0), trans(1.0, 1.0, 10.0)];

    device.draw_gouraud_polygon(&frame, &mut info, &pts, PolyFlags::RENDER_FOG);
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(vertices(&device, &draws[0])[0].flags, VertexFlags::GOURAUD_FOG.bits());
}

#[test]
fn test_gouraud_triangles_cull_and_skip_outcoded() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    let a = trans(0.0, 0.0, 10.0);
    let b = trans(1.0, 0.0, 10.0);
    let c = trans(0.0, 1.0, 10.0);
    let mut outside = [a, b, c];
    for p in &mut outside {
        p.outcode = 0b0010;
    }
    let pts = [a, b, c, a, c, b, outside[0], outside[1], outside[2]];

    device.draw_gouraud_triangles(&frame, &mut info, &pts, PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].index_count, 3);
    let kept = vertices(&device, &draws[0]);
    assert_eq!(kept[1].position, [1.0, 0.0, 10.0]);
}

#[test]
fn test_gouraud_triangles_mirror_flips_culling() {
    let mut device = device();
    let mut frame = frame();
    frame.mirror = -1.0;
    device.lock(LockParams::default());
    device.set_scene_node(&frame);
    let mut info = texture(1);

    let a = trans(0.0, 0.0, 10.0);
    let b = trans(1.0, 0.0, 10.0);
    let c = trans(0.0, 1.0, 10.0);
    device.draw_gouraud_triangles(&frame, &mut info, &[a, b, c, a, c, b], PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws[0].index_count, 3);
    assert_eq!(vertices(&device, &draws[0])[1].position, [0.0, 1.0, 10.0]);
}

#[test]
fn test_two_sided_triangles_keep_both_faces_reversed() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    let a = trans(0.0, 0.0, 10.0);
    let b = trans(1.0, 0.0, 10.0);
    let c = trans(0.0, 1.0, 10.0);
    device.draw_gouraud_triangles(&frame, &mut info, &[a, b, c, a, c, b], PolyFlags::TWO_SIDED);
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws[0].index_count, 6);
    let emitted = vertices(&device, &draws[0]);
    assert_eq!(emitted[0].position, [0.0, 1.0, 10.0]);
    assert_eq!(emitted[2].position, [0.0, 0.0, 10.0]);
}

fn surface_facet() -> SurfaceFacet {
    SurfaceFacet {
        map_coords: crate::foundation::math::Coords::identity(),
        polys: vec![SavedPoly::new(vec![
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(2.0, 0.0, 10.0),
            Vec3::new(2.0, 2.0, 10.0),
            Vec3::new(0.0, 2.0, 10.0),
        ])],
    }
}

#[test]
fn test_complex_surface_layers_and_flags() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut base = texture(1);
    let mut light_map = texture(2);
    let mut detail = texture(3);

    let mut surface = SurfaceInfo {
        texture: Some(&mut base),
        light_map: Some(&mut light_map),
        detail_texture: Some(&mut detail),
        ..SurfaceInfo::default()
    };
    device.draw_complex_surface(&frame, &mut surface, &surface_facet());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].index_count, 6);

    let emitted = vertices(&device, &draws[0]);
    let expected = VertexFlags::LIGHT_MAP | VertexFlags::DETAIL_TEXTURE;
    assert_eq!(emitted[0].flags, expected.bits());
    // second fan vertex is (2, 0)
    assert_relative_eq!(emitted[1].tex_coord[0], 0.5);
    assert_relative_eq!(emitted[1].tex_coord2[0], 0.625);
    assert_eq!(device.stats().complex_surfaces, 1);
    assert_eq!(device.stats().uploads, 3);
}

#[test]
fn test_complex_surface_fog_map_replaces_detail() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut base = texture(1);
    let mut detail = texture(3);
    let mut fog = texture(4);

    let mut surface = SurfaceInfo {
        texture: Some(&mut base),
        detail_texture: Some(&mut detail),
        fog_map: Some(&mut fog),
        ..SurfaceInfo::default()
    };
    device.draw_complex_surface(&frame, &mut surface, &surface_facet());
    device.unlock(true);

    let draws = draws(&device);
    let emitted = vertices(&device, &draws[0]);
    assert_eq!(emitted[0].flags, VertexFlags::FOG_MAP.bits());
    assert_relative_eq!(emitted[1].tex_coord4[0], 0.625);
    // detail is never uploaded while a fog map is present
    assert_eq!(device.stats().uploads, 2);
}

#[test]
fn test_detail_textures_setting_disables_detail() {
    let config = RenderDeviceConfig::default()
        .with_detail_textures(false)
        .with_light_mode(LightMode::OneXBlending);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());
    let mut base = texture(1);
    let mut detail = texture(3);

    let mut surface = SurfaceInfo {
        texture: Some(&mut base),
        detail_texture: Some(&mut detail),
        ..SurfaceInfo::default()
    };
    device.draw_complex_surface(&frame, &mut surface, &surface_facet());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(vertices(&device, &draws[0])[0].flags, VertexFlags::ONE_X_BLENDING.bits());
}

#[test]
fn test_editor_highlight_pass_for_selected_surface() {
    let config = RenderDeviceConfig::default().with_editor_mode(true);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());
    let mut base = texture(1);

    let mut surface = SurfaceInfo {
        poly_flags: PolyFlags::SELECTED,
        texture: Some(&mut base),
        ..SurfaceInfo::default()
    };
    device.draw_complex_surface(&frame, &mut surface, &surface_facet());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 2);
    assert_eq!(
        pipeline_key(&device, &draws[1]),
        Some(PipelineKey::for_flags(PolyFlags::HIGHLIGHTED))
    );
    assert_eq!(vertices(&device, &draws[1])[0].color, [0.0, 0.0, 0.05, 0.20]);
}

#[test]
fn test_editor_flat_shaded_selected_color() {
    let config = RenderDeviceConfig::default().with_editor_mode(true);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());

    let mut surface = SurfaceInfo {
        poly_flags: PolyFlags::FLAT_SHADED | PolyFlags::SELECTED,
        flat_color: [102, 51, 0, 255],
        ..SurfaceInfo::default()
    };
    device.draw_complex_surface(&frame, &mut surface, &surface_facet());
    device.unlock(true);

    let draws = draws(&device);
    let color = vertices(&device, &draws[1])[0].color;
    assert_relative_eq!(color[0], 0.6, epsilon = 1e-6);
    assert_relative_eq!(color[1], 0.3, epsilon = 1e-6);
    assert_relative_eq!(color[3], 1.0);
}

#[test]
fn test_tile_projects_to_its_pixels() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);

    device.push_hit(b"T");
    device.draw_tile(&frame, &mut info, &Tile::new(8.0, 16.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);

    let backend = device.backend();
    assert_eq!(backend.hit_value(9, 17), Some(1));
    assert_eq!(backend.hit_value(11, 19), Some(1));
    assert_eq!(backend.hit_value(12, 17), Some(0));
    assert_eq!(backend.hit_value(9, 15), Some(0));
}

#[test]
fn test_modulated_palettized_tile_drops_other_flags() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let palette = vec![[255, 255, 255, 255]; 256];
    let mut info = TextureInfo::new(9, TextureFormat::P8 { palette }, MipLevel::new(2, 2, vec![1; 4]));

    let tile = Tile::new(0.0, 0.0, 4.0, 4.0).with_color(Vec4::new(0.5, 0.5, 0.5, 0.3));
    device.draw_tile(&frame, &mut info, &tile, PolyFlags::MODULATED | PolyFlags::MASKED);
    device.draw_tile(&frame, &mut texture(1), &tile, PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(
        pipeline_key(&device, &draws[0]),
        Some(PipelineKey::for_flags(PolyFlags::MODULATED))
    );
    assert_eq!(vertices(&device, &draws[0])[0].color, [1.0, 1.0, 1.0, 1.0]);
    assert_eq!(vertices(&device, &draws[1])[0].color, [0.5, 0.5, 0.5, 1.0]);
}

#[test]
fn test_tiles_use_clamped_sampler() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::NO_SMOOTH);
    device.unlock(true);

    let draws = draws(&device);
    let backend = device.backend();
    let bindings = backend
        .descriptor_set_bindings(draws[0].descriptor_set)
        .expect("descriptor set is live");
    let sampler = backend.sampler_desc(bindings[0].sampler).expect("sampler is live");
    assert_eq!(sampler, &crate::render::resources::SamplerDesc::for_mode(3, -0.5));
}

#[test]
fn test_editor_tile_depth_is_forced_in_ortho_views() {
    let config = RenderDeviceConfig::default().with_editor_mode(true);
    let mut device = device_with(config);
    let frame = frame().with_ortho(1.0);
    device.lock(LockParams::default());
    device.set_scene_node(&frame);

    let tile = Tile::new(0.0, 0.0, 4.0, 4.0).with_z(0.0);
    device.draw_tile(&frame, &mut texture(1), &tile, PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(vertices(&device, &draws[0])[0].position[2], 1.0);
}

fn hit_scene(region: HitRegion) -> Option<Vec<u8>> {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default().with_hit_region(region));
    let mut info = texture(1);

    device.push_hit(b"R1");
    device.draw_tile(&frame, &mut info, &Tile::new(0.0, 0.0, 32.0, 64.0), PolyFlags::empty());
    device.push_hit(b"R2");
    device.draw_tile(&frame, &mut info, &Tile::new(32.0, 0.0, 32.0, 64.0), PolyFlags::empty());
    device.pop_hit(2, false);
    device.pop_hit(2, false);
    device.unlock(false)
}

#[test]
fn test_nested_hit_regions_resolve_payloads() {
    let over_p2 = HitRegion {
        x: 40,
        y: 20,
        width: 4,
        height: 4,
    };
    assert_eq!(hit_scene(over_p2), Some(b"R1R2".to_vec()));

    let over_p1 = HitRegion {
        x: 4,
        y: 20,
        width: 4,
        height: 4,
    };
    assert_eq!(hit_scene(over_p1), Some(b"R1".to_vec()));
}

#[test]
fn test_push_hit_flushes_pending_geometry() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());

    device.push_hit(&[]);
    assert!(draws(&device).is_empty());

    device.push_hit(&[7, 7]);
    let recorded = device.backend().recorded_draws();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].constants.hit_index, 0);
}

#[test]
fn test_hit_region_over_nothing_returns_none() {
    let mut device = device();
    let region = HitRegion {
        x: 0,
        y: 0,
        width: 2,
        height: 2,
    };
    begin(&mut device, LockParams::default().with_hit_region(region));
    device.push_hit(b"X");
    assert_eq!(device.unlock(false), None);
    assert_eq!(device.backend().frames_presented(), 0);
}

#[test]
fn test_unlock_presents_with_vsync_setting() {
    let config = RenderDeviceConfig::default().with_vsync(false);
    let mut device = device_with(config);
    begin(&mut device, LockParams::default());
    assert!(device.is_locked());

    assert_eq!(device.unlock(true), None);
    assert!(!device.is_locked());
    assert_eq!(device.backend().frames_begun(), 1);
    assert_eq!(device.backend().frames_presented(), 1);
    assert_eq!(device.backend().last_vsync(), Some(false));
}

#[test]
fn test_flush_clears_textures_and_requests_precache() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    assert_eq!(device.backend().live_textures(), 2);

    device.flush(true);
    assert_eq!(draws(&device).len(), 1);
    assert_eq!(device.backend().live_textures(), 1);
    assert_eq!(device.backend().live_descriptor_pools(), 0);
    assert!(device.precache_requested());

    device.unlock(true);
    device.lock(LockParams::default());
    assert!(!device.precache_requested());
}

#[test]
fn test_flush_without_precache_in_editor() {
    let config = RenderDeviceConfig::default().with_editor_mode(true);
    let mut device = device_with(config);
    device.flush(true);
    assert!(!device.precache_requested());

    let mut device = device_with(RenderDeviceConfig::default().with_precache(false));
    device.flush(true);
    assert!(!device.precache_requested());
}

#[test]
fn test_precache_and_rect_updates() {
    let mut device = device();
    let mut info = texture(5);

    device.update_texture_rect(&info, 0, 0, 2, 2);
    assert_eq!(device.stats().rect_uploads, 0);

    device.precache_texture(&mut info, PolyFlags::empty());
    assert_eq!(device.stats().uploads, 1);
    assert_eq!(device.backend().live_textures(), 2);

    device.update_texture_rect(&info, 0, 0, 2, 2);
    assert_eq!(device.stats().rect_uploads, 1);
    assert_eq!(device.backend().texture_updates(), 1);
}

#[test]
fn test_rect_update_past_texture_edge_is_ignored() {
    let mut device = device();
    let mut info = texture(5);
    device.precache_texture(&mut info, PolyFlags::empty());

    device.update_texture_rect(&info, u32::MAX, 0, 2, 2);
    device.update_texture_rect(&info, 3, 3, 2, 2);
    assert_eq!(device.stats().rect_uploads, 0);
    assert_eq!(device.backend().texture_updates(), 0);
}

#[test]
fn test_realtime_changed_texture_is_updated_in_place() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);
    let tile = Tile::new(0.0, 0.0, 4.0, 4.0);

    device.draw_tile(&frame, &mut info, &tile, PolyFlags::empty());
    info.realtime_changed = true;
    device.draw_tile(&frame, &mut info, &tile, PolyFlags::empty());
    device.unlock(true);

    assert!(!info.realtime_changed);
    assert_eq!(device.backend().live_textures(), 2);
    assert_eq!(device.backend().texture_updates(), 1);
    assert_eq!(draws(&device).len(), 1);
}

#[test]
fn test_draw_stats_reports_and_resets() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    let mut info = texture(1);
    device.draw_tile(&frame, &mut info, &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.draw_tile(&frame, &mut info, &Tile::new(4.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);

    let line = device.draw_stats();
    assert!(line.contains("DrawCalls: 1"), "{line}");
    assert!(line.contains("Batches: 1"), "{line}");
    assert!(line.contains("Tiles: 2"), "{line}");
    assert!(line.contains("BuffersUsed: 1"), "{line}");

    assert_eq!(
        device.stats(),
        DeviceStats {
            buffers_used: 1,
            ..DeviceStats::default()
        }
    );
}

#[test]
fn test_clear_z_flushes_then_clears_depth() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());

    device.clear_z(&frame);
    assert_eq!(draws(&device).len(), 1);
    assert_eq!(device.backend().depth_clears(), 1);
}

#[test]
fn test_scene_node_sets_viewport_and_projection() {
    let mut device = device();
    let frame = SceneNode::new(32, 16, 90.0).with_origin(8, 4);
    device.lock(LockParams::default());
    device.set_scene_node(&frame);
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);

    let viewport = device.backend().viewport();
    assert_eq!(viewport.x, 8.0);
    assert_eq!(viewport.height, 16.0);

    let recorded = device.backend().recorded_draws()[0];
    let projection = recorded.constants.projection();
    let clip = projection * Vec4::new(1.0, 0.0, 1.0, 1.0);
    assert_relative_eq!(clip.x / clip.w, 1.0, epsilon = 1e-5);
}

#[test]
fn test_end_flash_draws_fullscreen_quad() {
    let mut device = device();
    let params = LockParams {
        flash_scale: Vec4::new(0.25, 0.25, 0.25, 0.0),
        flash_fog: Vec4::new(1.0, 0.5, 0.0, 0.0),
        ..LockParams::default()
    };
    let frame = begin(&mut device, params);
    device.end_flash();

    let recorded = device.backend().recorded_draws();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].constants.projection(), Mat4::identity());
    let draw = recorded[0].command;
    assert_eq!(
        pipeline_key(&device, &draw),
        Some(PipelineKey::Scene(PipelineIndex::from_raw(2)))
    );
    let quad = vertices(&device, &draw);
    assert_eq!(quad.len(), 6);
    assert_eq!(quad[0].color, [1.0, 0.5, 0.0, 0.5]);

    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);
    let last = device.backend().recorded_draws()[1];
    assert_ne!(last.constants.projection(), Mat4::identity());
}

#[test]
fn test_end_flash_without_flash_does_nothing() {
    let mut device = device();
    begin(&mut device, LockParams::default());
    device.end_flash();
    device.unlock(true);
    assert!(draws(&device).is_empty());
}

#[test]
fn test_set_res_rebuilds_pipelines_for_new_sample_count() {
    let mut device = device();
    assert_eq!(device.samples(), 1);

    device.config_mut().antialias_mode = AntialiasMode::Msaa4x;
    assert!(device.set_res(128, 96));
    assert_eq!(device.samples(), 4);
    assert_eq!(device.size(), (128, 96));
    assert_eq!(device.backend().target_size(), (128, 96));
    assert_eq!(device.backend().live_pipelines(), PipelineIndex::COUNT + 3);

    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);
    let draw = draws(&device)[0];
    let desc = device.backend().pipeline_desc(draw.pipeline).expect("pipeline is live");
    assert_eq!(desc.samples, 4);
}

#[test]
fn test_lock_applies_pending_antialias_change() {
    let mut device = device();
    device.config_mut().antialias_mode = AntialiasMode::Msaa2x;
    device.lock(LockParams::default());
    assert_eq!(device.samples(), 2);
}

#[test]
fn test_set_res_failure_keeps_device() {
    let mut device = device();
    device.backend_mut().inject_failures(FailureInjection {
        scene_targets: true,
        ..FailureInjection::default()
    });
    assert!(!device.set_res(128, 128));
    assert!(device.is_initialized());
    assert_eq!(device.size(), (SIZE, SIZE));
}

#[test]
fn test_failed_pipeline_rebuild_restores_targets() {
    let mut device = device();
    device.config_mut().antialias_mode = AntialiasMode::Msaa4x;
    device.backend_mut().inject_failures(FailureInjection {
        pipelines_before_failure: Some(3),
        ..FailureInjection::default()
    });

    assert!(!device.set_res(128, 96));
    assert!(device.is_initialized());
    assert_eq!(device.size(), (SIZE, SIZE));
    assert_eq!(device.samples(), 1);
    assert_eq!(device.backend().target_size(), (SIZE, SIZE));
    assert_eq!(device.backend().samples(), 1);
    assert_eq!(device.backend().live_pipelines(), PipelineIndex::COUNT + 3);

    device.backend_mut().inject_failures(FailureInjection::default());
    device.config_mut().antialias_mode = AntialiasMode::Off;
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);
    assert_eq!(draws(&device).len(), 1);
}

#[test]
fn test_lod_bias_change_applies_after_present() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.config_mut().lod_bias = 1.0;
    device.unlock(true);
    assert_eq!(device.backend().live_samplers(), 16);

    device.backend_mut().clear_recorded_draws();
    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);

    let draw = draws(&device)[0];
    let backend = device.backend();
    let bindings = backend.descriptor_set_bindings(draw.descriptor_set).expect("set is live");
    let sampler = backend.sampler_desc(bindings[0].sampler).expect("sampler is live");
    assert_relative_eq!(sampler.lod_bias, 1.0);
}

#[test]
fn test_bindless_vertices_carry_array_slots() {
    let config = RenderDeviceConfig::default().with_binding_mode(BindingMode::Bindless);
    let mut device = device_with(config);
    assert_eq!(device.binding_mode(), BindingMode::Bindless);

    let frame = begin(&mut device, LockParams::default());
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.draw_tile(&frame, &mut texture(2), &Tile::new(4.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 1);
    let emitted = vertices(&device, &draws[0]);
    assert_eq!(emitted[0].texture_binds, [1, 0, 0, 0]);
    assert_eq!(emitted[6].texture_binds, [2, 0, 0, 0]);

    let desc = device.backend().pipeline_desc(draws[0].pipeline).expect("pipeline is live");
    assert!(desc.bindless);
}

#[test]
fn test_bindless_falls_back_without_descriptor_indexing() {
    let backend = HeadlessBackend::new(SIZE, SIZE).with_capabilities(BackendCapabilities {
        descriptor_indexing: false,
        depth_clamp: true,
        max_samples: 1,
    });
    let config = RenderDeviceConfig::default().with_binding_mode(BindingMode::Bindless);
    let mut device = RenderDevice::new(backend, config);

    assert!(device.init(SIZE, SIZE));
    assert_eq!(device.binding_mode(), BindingMode::PerDrawSets);
}

#[test]
fn test_ortho_lines_become_points_or_vanish() {
    let mut device = device();
    let color = Vec4::new(1.0, 0.0, 0.0, 1.0);

    let frame = frame().with_ortho(1.0);
    device.lock(LockParams::default());
    device.set_scene_node(&frame);
    device.draw_3d_line(&frame, color, Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));
    device.draw_3d_line(&frame, color, Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.05, 0.0, 5.0));
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(draws.len(), 2);
    assert_eq!(pipeline_key(&device, &draws[0]), Some(PipelineKey::line(false)));
    assert_eq!(pipeline_key(&device, &draws[1]), Some(PipelineKey::Point));
    assert_eq!(draws[1].index_count, 6);

    device.backend_mut().clear_recorded_draws();
    let far = SceneNode::new(SIZE, SIZE, 90.0).with_ortho(ORTHO_LOW_DETAIL * 2.0);
    device.lock(LockParams::default());
    device.set_scene_node(&far);
    device.draw_3d_line(&far, color, Vec3::new(0.0, 0.0, 5.0), Vec3::new(1.0, 0.0, 5.0));
    device.unlock(true);
    assert!(device.backend().recorded_draws().is_empty());
}

#[test]
fn test_perspective_line_uses_occlusion_setting() {
    let config = RenderDeviceConfig::default().with_occlude_lines(true);
    let mut device = device_with(config);
    let frame = begin(&mut device, LockParams::default());

    device.draw_3d_line(
        &frame,
        Vec4::new(0.0, 1.0, 0.0, 0.5),
        Vec3::new(-1.0, 0.0, 4.0),
        Vec3::new(1.0, 0.0, 4.0),
    );
    device.unlock(true);

    let draws = draws(&device);
    assert_eq!(pipeline_key(&device, &draws[0]), Some(PipelineKey::line(true)));
    assert_eq!(draws[0].index_count, 2);
    assert_eq!(vertices(&device, &draws[0])[0].color, [0.0, 1.0, 0.0, 1.0]);
}

#[test]
fn test_2d_point_grows_by_half_pixel() {
    let mut device = device();
    let frame = begin(&mut device, LockParams::default());
    device.push_hit(b"P");
    device.draw_2d_point(
        &frame,
        Vec4::new(1.0, 1.0, 1.0, 1.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(12.0, 12.0),
        1.0,
    );
    device.unlock(true);

    let backend = device.backend();
    assert_eq!(backend.hit_value(10, 10), Some(1));
    assert_eq!(backend.hit_value(11, 11), Some(1));
    assert_eq!(backend.hit_value(8, 8), Some(0));
    assert_eq!(backend.hit_value(13, 13), Some(0));
}

#[test]
fn test_read_pixels_flushes_and_covers_target() {
    let mut device = RenderDevice::new(HeadlessBackend::new(SIZE, SIZE), RenderDeviceConfig::default());
    assert_eq!(device.read_pixels(), None);
    assert!(device.init(SIZE, SIZE));

    let params = LockParams {
        screen_clear: Vec4::new(0.0, 0.0, 1.0, 1.0),
        ..LockParams::default()
    };
    let frame = begin(&mut device, params);
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());

    let pixels = device.read_pixels().expect("pixels are read back");
    assert_eq!(draws(&device).len(), 1);
    assert_eq!(pixels.len(), (SIZE * SIZE * 4) as usize);
    assert_eq!(&pixels[..4], &[0, 0, 255, 255]);
    device.unlock(true);
}

#[test]
fn test_supported_texture_formats() {
    let device = device();
    assert!(device.supports_texture_format(&TextureFormat::Rgba8));
    assert!(device.supports_texture_format(&TextureFormat::Bgra8));
    assert!(device.supports_texture_format(&TextureFormat::P8 {
        palette: vec![[0; 4]; 256]
    }));
    assert!(!device.supports_texture_format(&TextureFormat::P8 { palette: Vec::new() }));
}

#[test]
fn test_per_frame_calls_before_init_are_ignored() {
    let mut device = RenderDevice::new(HeadlessBackend::new(SIZE, SIZE), RenderDeviceConfig::default());
    let frame = frame();
    device.lock(LockParams::default());
    device.set_scene_node(&frame);
    device.draw_tile(&frame, &mut texture(1), &Tile::new(0.0, 0.0, 4.0, 4.0), PolyFlags::empty());
    assert_eq!(device.unlock(true), None);
    assert!(draws(&device).is_empty());
    assert!(!device.set_res(SIZE, SIZE));
}
