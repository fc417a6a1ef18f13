// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display composition steps.
//!
//! These run on the compositor thread, in order, once per refresh:
//!
//! 1. [`rebuild_layer_list`] after visible regions have been computed for the
//!    display's layer stack,
//! 2. [`set_up_worklist`] to describe the layers to the composer, then
//!    [`prepare`] across all displays,
//! 3. [`compose_display`] to draw the GPU-composited layers,
//! 4. [`commit`] across all displays, then [`finish_frame`] per display to
//!    hand release fences back to the layers.

use alloc::vec::Vec;
use core::mem;

use lamina_core::buffer::Fence;
use lamina_core::layer::{LayerFlags, LayerId, LayerKind, LayerRuntime, LayerState, LayerTable};
use lamina_core::region::Region;
use lamina_core::scene::SceneState;
use lamina_core::transform::Transform;

use crate::device::DisplayDevice;
use crate::hwc::{Blending, CompositionType, HardwareComposer, HwcError, HwcHints, HwcLayer};
use crate::plan::{DrawContent, DrawItem, DrawOp, DrawPlan, FramebufferClear};
use crate::surface::{RenderEngine, RenderError};

/// Rebuilds the display's layer list.
///
/// A layer is listed if any of its visible, non-transparent area lands on the
/// panel. The undefined region is the panel minus everything `opaque`
/// (layer-stack space) covers. A display that cannot draw gets an empty list.
pub fn rebuild_layer_list(
    device: &mut DisplayDevice,
    scene: &SceneState,
    table: &LayerTable,
    opaque: &Region,
) {
    if !device.can_draw() {
        device.set_visible_layers(Vec::new(), Region::new());
        return;
    }
    let projection = *device.projection();
    let tr = projection.transform;
    let bounds = projection.bounds;
    let mut layers = Vec::new();
    for (id, _) in scene.layers_on(device.layer_stack()) {
        let Some(rt) = table.get(id) else {
            continue;
        };
        let drawn = tr
            .map_region(rt.visible_non_transparent_region())
            .intersect_rect(&bounds);
        if !drawn.is_empty() {
            layers.push(id);
        }
    }
    let undefined = Region::from_rect(bounds).subtract(&tr.map_region(opaque));
    device.set_visible_layers(layers, undefined);
}

fn blending(state: &LayerState, rt: &LayerRuntime) -> Blending {
    if rt.is_opaque(state) && state.alpha == 255 {
        Blending::None
    } else if state.flags.contains(LayerFlags::NON_PREMULTIPLIED) {
        Blending::Coverage
    } else {
        Blending::Premultiplied
    }
}

/// Describes a layer's placement to the composer.
///
/// Secure layers on insecure displays and transforms that are not a
/// combination of flips and quarter turns are left to the GPU.
pub fn set_geometry(entry: &mut HwcLayer, device: &DisplayDevice, state: &LayerState, rt: &LayerRuntime) {
    let projection = device.projection();
    if state.is_secure() && !device.is_secure() {
        entry.skip = true;
    }
    entry.blending = blending(state, rt);

    let layer_tr = state.transform();
    let frame = layer_tr
        .map_rect(&rt.compute_bounds())
        .intersect(&projection.viewport);
    entry.frame = projection.transform.map_rect(&frame);
    entry.crop = rt.compute_crop(state, &projection.viewport);
    entry.plane_alpha = state.alpha;

    let buffer_tr = Transform::from_orientation(rt.current_transform(), 0.0, 0.0);
    let orientation = (projection.transform * layer_tr * buffer_tr).orientation();
    if orientation.is_valid() {
        entry.transform = orientation;
    } else {
        entry.skip = true;
    }
}

/// Updates the parts of an entry that change every frame.
pub fn set_per_frame_data(entry: &mut HwcLayer, device: &DisplayDevice, rt: &LayerRuntime) {
    let projection = device.projection();
    entry.visible_region = projection
        .transform
        .map_region(&rt.visible_region().intersect_rect(&projection.viewport));
    entry.set_buffer(rt.active_buffer().copied());
}

/// Fills the display's worklist.
///
/// With `geometry_changed` (or a layer count mismatch) the list is rebuilt
/// and every entry's geometry is set again. `disable_overlays` forces all
/// layers onto the GPU.
pub fn set_up_worklist(
    device: &mut DisplayDevice,
    scene: &SceneState,
    table: &LayerTable,
    geometry_changed: bool,
    disable_overlays: bool,
) {
    let Some(mut list) = device.worklist.take() else {
        return;
    };
    let count = device.visible_layers().len();
    let rebuild = geometry_changed || list.len() != count;
    if rebuild {
        list.rebuild(count);
    }
    for (entry, &id) in list.layers_mut().iter_mut().zip(device.visible_layers()) {
        let (Some(state), Some(rt)) = (scene.layer(id), table.get(id)) else {
            entry.reset(id);
            entry.skip = true;
            continue;
        };
        if rebuild {
            entry.reset(id);
            set_geometry(entry, device, state, rt);
            if disable_overlays {
                entry.skip = true;
            }
        }
        set_per_frame_data(entry, device, rt);
    }
    device.worklist = Some(list);
}

/// Runs the composer's prepare over every display's worklist.
///
/// A failed prepare leaves every entry to the GPU. The error is returned
/// after the fallback so the caller can log it.
pub fn prepare<'a>(
    composer: &mut dyn HardwareComposer,
    devices: impl IntoIterator<Item = &'a mut DisplayDevice>,
) -> Result<(), HwcError> {
    let mut devices: Vec<&mut DisplayDevice> = devices.into_iter().collect();
    let mut lists: Vec<_> = devices
        .iter_mut()
        .filter_map(|d| d.worklist.as_mut())
        .collect();
    for list in &mut lists {
        list.begin_prepare();
    }
    let result = if lists.is_empty() {
        Ok(())
    } else {
        composer.prepare(&mut lists)
    };
    for list in &mut lists {
        if result.is_err() {
            list.fall_back_to_gles();
        } else {
            list.end_prepare();
        }
    }
    result
}

/// Builds the GPU draw plan for `dirty` (panel space).
///
/// When some layers are overlays the framebuffer starts transparent and an
/// opaque overlay above the bottom layer may punch a transparent hole where
/// the composer asks for it. Otherwise the part of the dirty area that no
/// opaque layer covers (plus any letterbox outside the scissor) is painted
/// black.
pub fn build_draw_plan(
    plan: &mut DrawPlan,
    device: &DisplayDevice,
    scene: &SceneState,
    table: &LayerTable,
    dirty: &Region,
) {
    plan.clear();
    let projection = device.projection();
    let list = device.worklist();
    let has_gles = device.has_gles_composition();

    if has_gles {
        if list.is_some_and(|l| l.has_overlay_composition()) {
            plan.clear = FramebufferClear::Transparent;
        } else {
            let letterbox =
                Region::from_rect(projection.bounds).subtract(&Region::from_rect(projection.scissor));
            let mut wormhole = device.undefined_region().union(&letterbox);
            wormhole.intersect_with(dirty);
            plan.wormhole = wormhole;
        }
        if !device.is_primary() && projection.scissor != projection.bounds {
            plan.scissor = Some(projection.scissor);
        }
    }

    for (i, &id) in device.visible_layers().iter().enumerate() {
        let (Some(state), Some(rt)) = (scene.layer(id), table.get(id)) else {
            continue;
        };
        let op = match list {
            None => DrawOp::Draw,
            Some(list) => match list.layers().get(i) {
                None => break,
                Some(entry) if entry.composition_type == CompositionType::Gles => DrawOp::Draw,
                Some(entry) => {
                    let clear = entry.hints.contains(HwcHints::CLEAR_FB)
                        && i > 0
                        && rt.is_opaque(state)
                        && state.alpha == 255
                        && has_gles;
                    if !clear {
                        continue;
                    }
                    DrawOp::Clear
                }
            },
        };
        let clip = dirty.intersect(&projection.transform.map_region(rt.visible_region()));
        if clip.is_empty() {
            continue;
        }
        if let Some(item) = draw_item(device, state, rt, id, op, clip) {
            plan.items.push(item);
        }
    }
}

fn draw_item(
    device: &DisplayDevice,
    state: &LayerState,
    rt: &LayerRuntime,
    layer: LayerId,
    op: DrawOp,
    clip: Region,
) -> Option<DrawItem> {
    let projection = device.projection();
    let content = if state.is_secure() && !device.is_secure() {
        DrawContent::Blackout
    } else {
        match rt.kind() {
            LayerKind::SolidColor { rgb } => DrawContent::Color(rgb),
            LayerKind::Normal { .. } => DrawContent::Buffer {
                buffer: *rt.active_buffer()?,
                crop: rt.content_crop().to_kurbo(),
                transform: rt.current_transform(),
                filtering: rt.needs_filtering() || projection.needs_filtering || rt.is_fixed_size(),
            },
        }
    };
    Some(DrawItem {
        layer,
        op,
        clip,
        bounds: rt.compute_bounds(),
        transform: projection.transform * state.transform(),
        content,
        alpha: state.alpha,
        blending: blending(state, rt),
    })
}

/// Attaches acquire fences to overlay entries. GPU entries wait on the
/// fence inside the render engine instead.
pub fn set_acquire_fences(device: &mut DisplayDevice, table: &LayerTable) {
    let layers = device.visible_layers().to_vec();
    let Some(list) = device.worklist.as_mut() else {
        return;
    };
    for (entry, id) in list.layers_mut().iter_mut().zip(layers) {
        entry.acquire_fence = match (entry.composition_type, table.get(id)) {
            (CompositionType::Overlay, Some(rt)) => rt
                .active_item()
                .map_or(Fence::NO_FENCE, |item| item.acquire_fence.clone()),
            _ => Fence::NO_FENCE,
        };
    }
}

/// What [`compose_display`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComposeReport {
    /// The display was composed and presented.
    pub presented: bool,
    /// The GPU rendered a plan.
    pub gpu_rendered: bool,
    /// Layers drawn by the GPU.
    pub drawn_layers: usize,
}

/// Composes one display: draws its GPU layers restricted to the pending
/// damage and queues the result.
///
/// A display without a composer worklist and without damage is skipped.
pub fn compose_display(
    device: &mut DisplayDevice,
    scene: &SceneState,
    table: &LayerTable,
    engine: &mut dyn RenderEngine,
    repaint_everything: bool,
) -> Result<ComposeReport, RenderError> {
    let mut report = ComposeReport::default();
    if !device.can_draw() {
        return Ok(report);
    }
    let mut dirty = device.take_damage(repaint_everything);
    let is_hwc = device.worklist().is_some();
    if !is_hwc && dirty.is_empty() {
        return Ok(report);
    }
    if !device.surface_mut().supports_partial_updates() {
        dirty = Region::from_rect(device.bounds());
    }

    let token = device.token();
    let mut plan = mem::replace(&mut device.plan, DrawPlan::new(token));
    build_draw_plan(&mut plan, device, scene, table, &dirty);
    set_acquire_fences(device, table);
    let result = if device.has_gles_composition() {
        report.gpu_rendered = true;
        report.drawn_layers = plan.drawn_layers();
        engine.render(device.surface_mut(), &plan)
    } else {
        Ok(())
    };
    device.plan = plan;
    result?;

    device.swap_buffers()?;
    device.flip();
    report.presented = true;
    Ok(report)
}

/// Runs the composer's commit over every display's worklist.
pub fn commit<'a>(
    composer: &mut dyn HardwareComposer,
    devices: impl IntoIterator<Item = &'a mut DisplayDevice>,
) -> Result<(), HwcError> {
    let mut devices: Vec<&mut DisplayDevice> = devices.into_iter().collect();
    let mut lists: Vec<_> = devices
        .iter_mut()
        .filter_map(|d| d.worklist.as_mut())
        .collect();
    if lists.is_empty() {
        return Ok(());
    }
    let result = composer.commit(&mut lists);
    for list in lists {
        list.end_commit();
    }
    result
}

/// Hands each displayed layer its release fence and tells the surface the
/// frame was committed.
pub fn finish_frame(device: &mut DisplayDevice, table: &mut LayerTable) {
    let retire = device.retire_fence();
    device.surface_mut().on_frame_committed(&retire);
    match device.worklist.as_ref() {
        Some(list) => {
            for (entry, &id) in list.layers().iter().zip(device.visible_layers()) {
                if let Some(rt) = table.get_mut(id) {
                    rt.on_layer_displayed(entry.release_fence.clone());
                }
            }
        }
        None => {
            for &id in device.visible_layers() {
                if let Some(rt) = table.get_mut(id) {
                    rt.on_layer_displayed(Fence::NO_FENCE);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::sync::Arc;
    use alloc::vec;
    use std::sync::Mutex;

    use lamina_core::buffer::{
        AcquireOutcome, BufferConsumer, BufferId, BufferItem, GraphicBuffer, PixelFormat,
        ScalingMode,
    };
    use lamina_core::display::{DisplayState, SurfaceId};
    use lamina_core::geometry::PixelRect;
    use lamina_core::layer::{ClientId, LayerIdAllocator};
    use lamina_core::output::{DisplayKind, DisplayToken};
    use lamina_core::time::{Duration, HostTime};
    use lamina_core::transform::Orientation;

    use super::*;
    use crate::device::testing::RecordingSurface;
    use crate::hwc::{HwcDisplayId, HwcEvents, Worklist};

    /// Hands out one buffer, then nothing.
    #[derive(Debug)]
    struct OneBuffer(Option<BufferItem>);

    impl OneBuffer {
        fn new(id: u64, w: u32, h: u32, format: PixelFormat) -> Self {
            Self(Some(BufferItem {
                buffer: GraphicBuffer {
                    id: BufferId(id),
                    width: w,
                    height: h,
                    format,
                },
                acquire_fence: Fence::signaled(HostTime(1)),
                crop: PixelRect::EMPTY,
                transform: Orientation::ROT_0,
                scaling_mode: ScalingMode::Freeze,
                timestamp: HostTime(0),
                frame_number: 1,
            }))
        }
    }

    impl BufferConsumer for OneBuffer {
        fn acquire_next_ready(&mut self, expected_present: HostTime) -> AcquireOutcome {
            _ = expected_present;
            self.0.take().map_or(AcquireOutcome::NoBuffer, AcquireOutcome::Acquired)
        }

        fn release(&mut self, buffer: BufferId, release_fence: Fence) {
            _ = (buffer, release_fence);
        }

        fn queued_frames(&self) -> usize {
            usize::from(self.0.is_some())
        }
    }

    struct Fixture {
        scene: SceneState,
        table: LayerTable,
        ids: LayerIdAllocator,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                scene: SceneState::new(),
                table: LayerTable::new(),
                ids: LayerIdAllocator::new(),
            }
        }

        /// Adds a latched buffer layer at `rect` with `z`.
        fn buffer_layer(&mut self, rect: PixelRect, z: i32, format: PixelFormat) -> LayerId {
            self.buffer_layer_with(rect, z, format, LayerFlags::empty())
        }

        fn buffer_layer_with(
            &mut self,
            rect: PixelRect,
            z: i32,
            format: PixelFormat,
            flags: LayerFlags,
        ) -> LayerId {
            let id = self.ids.allocate();
            let (w, h) = (rect.width().unsigned_abs(), rect.height().unsigned_abs());
            let mut state = LayerState::new(
                String::from("layer"),
                LayerKind::Normal { format },
                ClientId(1),
                u64::from(id.index()),
                w,
                h,
                flags,
            );
            state.set_position(f64::from(rect.left), f64::from(rect.top));
            state.set_z(z);
            let consumer = OneBuffer::new(u64::from(id.index()) + 1, w, h, format);
            let mut rt = LayerRuntime::new(&state, Some(Box::new(consumer)), 8);
            rt.commit(&state);
            _ = rt.latch(&state, HostTime(0));
            self.scene.add_layer(id, state).unwrap();
            self.table.insert(id, rt);
            id
        }

        fn solid_layer(&mut self, rect: PixelRect, z: i32, alpha: u8) -> LayerId {
            let id = self.ids.allocate();
            let mut state = LayerState::new(
                String::from("dim"),
                LayerKind::SolidColor { rgb: [0, 0, 0] },
                ClientId(1),
                u64::from(id.index()),
                rect.width().unsigned_abs(),
                rect.height().unsigned_abs(),
                LayerFlags::empty(),
            );
            state.set_position(f64::from(rect.left), f64::from(rect.top));
            state.set_z(z);
            state.set_alpha(alpha);
            let mut rt = LayerRuntime::new(&state, None, 8);
            rt.commit(&state);
            self.scene.add_layer(id, state).unwrap();
            self.table.insert(id, rt);
            id
        }

        fn device(&mut self, hwc: Option<HwcDisplayId>) -> DisplayDevice {
            let state = DisplayState::new(DisplayKind::Primary, String::from("panel"), true)
                .with_surface(SurfaceId(1), 100, 100);
            self.scene.set_display(DisplayToken::PRIMARY, state.clone());
            let mut device = DisplayDevice::new(
                DisplayToken::PRIMARY,
                &state,
                Box::new(RecordingSurface::default()),
                hwc,
            );
            let result = self
                .scene
                .compute_visible_regions(&mut self.table, device.layer_stack());
            rebuild_layer_list(&mut device, &self.scene, &self.table, &result.opaque);
            device
        }
    }

    /// Overlays every entry that has a buffer and hints `CLEAR_FB` on all
    /// but the first.
    #[derive(Debug, Default)]
    struct OverlayComposer {
        fail: bool,
        commits: usize,
    }

    impl HardwareComposer for OverlayComposer {
        fn is_available(&self) -> bool {
            true
        }

        fn set_event_sink(&mut self, sink: Arc<dyn HwcEvents>) {
            _ = sink;
        }

        fn allocate_display(&mut self, width: u32, height: u32) -> Result<HwcDisplayId, HwcError> {
            _ = (width, height);
            Err(HwcError::NoResources)
        }

        fn free_display(&mut self, display: HwcDisplayId) {
            _ = display;
        }

        fn prepare(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError> {
            if self.fail {
                return Err(HwcError::Driver(-22));
            }
            for list in lists {
                for (i, l) in list.layers_mut().iter_mut().enumerate() {
                    if !l.skip {
                        l.composition_type = CompositionType::Overlay;
                        if i > 0 {
                            l.hints = HwcHints::CLEAR_FB;
                        }
                    }
                }
            }
            Ok(())
        }

        fn commit(&mut self, lists: &mut [&mut Worklist]) -> Result<(), HwcError> {
            self.commits += 1;
            for list in lists {
                for l in list.layers_mut() {
                    l.release_fence = Fence::signaled(HostTime(7));
                }
                list.set_retire_fence(Fence::signaled(HostTime(9)));
            }
            Ok(())
        }

        fn set_vsync_enabled(&mut self, display: HwcDisplayId, enabled: bool) {
            _ = (display, enabled);
        }

        fn set_power(&mut self, display: HwcDisplayId, on: bool) -> Result<(), HwcError> {
            _ = (display, on);
            Ok(())
        }

        fn refresh_period(&self, display: HwcDisplayId) -> Duration {
            _ = display;
            Duration::from_millis(16)
        }
    }

    #[derive(Debug, Default)]
    struct RecordingEngine {
        plans: Arc<Mutex<Vec<DrawPlan>>>,
    }

    impl RenderEngine for RecordingEngine {
        fn render(
            &mut self,
            surface: &mut dyn crate::surface::DisplaySurface,
            plan: &DrawPlan,
        ) -> Result<(), RenderError> {
            _ = surface;
            self.plans.lock().unwrap().push(plan.clone());
            Ok(())
        }
    }

    #[test]
    fn layer_list_skips_occluded_layers() {
        let mut f = Fixture::new();
        let below = f.buffer_layer(PixelRect::new(10, 10, 20, 20), 0, PixelFormat::RGBX_8888);
        let above = f.buffer_layer(PixelRect::new(0, 0, 50, 50), 1, PixelFormat::RGBX_8888);
        let device = f.device(None);
        assert_eq!(device.visible_layers(), [above], "fully covered layer dropped");
        assert!(!device.visible_layers().contains(&below), "not listed");
        assert_eq!(
            device.undefined_region().area(),
            100 * 100 - 50 * 50,
            "panel minus opaque area"
        );
    }

    #[test]
    fn gpu_plan_paints_wormhole_within_damage() {
        let mut f = Fixture::new();
        let id = f.buffer_layer(PixelRect::new(0, 0, 50, 100), 0, PixelFormat::RGBX_8888);
        let device = f.device(None);
        let mut plan = DrawPlan::new(device.token());
        let dirty = Region::from_rect(PixelRect::new(0, 0, 100, 50));
        build_draw_plan(&mut plan, &device, &f.scene, &f.table, &dirty);
        assert_eq!(plan.clear, FramebufferClear::Keep, "no overlays");
        assert_eq!(
            plan.wormhole,
            Region::from_rect(PixelRect::new(50, 0, 100, 50)),
            "uncovered part of the damage"
        );
        assert_eq!(plan.items.len(), 1, "one layer");
        assert_eq!(plan.items[0].layer, id, "the layer");
        assert_eq!(
            plan.items[0].clip,
            Region::from_rect(PixelRect::new(0, 0, 50, 50)),
            "clipped to damage"
        );
        assert_eq!(plan.items[0].blending, Blending::None, "opaque");
    }

    #[test]
    fn geometry_describes_the_layer() {
        let mut f = Fixture::new();
        let id = f.buffer_layer(PixelRect::new(-20, 10, 30, 60), 0, PixelFormat::RGBA_8888);
        let mut device = f.device(Some(HwcDisplayId::PRIMARY));
        set_up_worklist(&mut device, &f.scene, &f.table, true, false);
        let list = device.worklist().unwrap();
        assert_eq!(list.len(), 1, "one entry");
        let e = &list.layers()[0];
        assert_eq!(e.layer, Some(id), "entry follows the layer");
        assert_eq!(e.frame, PixelRect::new(0, 10, 30, 60), "clipped to the viewport");
        assert_eq!(e.crop, kurbo::Rect::new(20.0, 0.0, 50.0, 50.0), "crop follows the clip");
        assert_eq!(e.blending, Blending::Premultiplied, "translucent format");
        assert_eq!(e.plane_alpha, 255, "opaque plane");
        assert!(!e.skip, "overlay candidate");
        assert!(e.buffer.is_some(), "buffer attached");
        assert!(list.geometry_changed(), "fresh geometry");
    }

    #[test]
    fn solid_color_layers_stay_on_gpu() {
        let mut f = Fixture::new();
        f.solid_layer(PixelRect::new(0, 0, 100, 100), 0, 128);
        let mut device = f.device(Some(HwcDisplayId::PRIMARY));
        set_up_worklist(&mut device, &f.scene, &f.table, true, false);
        let mut composer = OverlayComposer::default();
        prepare(&mut composer, [&mut device]).unwrap();
        let list = device.worklist().unwrap();
        assert_eq!(list.layers()[0].composition_type, CompositionType::Gles, "no buffer");
        assert_eq!(list.layers()[0].blending, Blending::Premultiplied, "half alpha");
    }

    #[test]
    fn overlays_clear_the_framebuffer_and_get_fences() {
        let mut f = Fixture::new();
        let dim = f.solid_layer(PixelRect::new(0, 0, 100, 100), 0, 128);
        let top = f.buffer_layer(PixelRect::new(0, 0, 40, 40), 1, PixelFormat::RGBX_8888);
        let mut device = f.device(Some(HwcDisplayId::PRIMARY));
        set_up_worklist(&mut device, &f.scene, &f.table, true, false);
        let mut composer = OverlayComposer::default();
        prepare(&mut composer, [&mut device]).unwrap();
        assert_eq!(
            device.frame_composition(),
            crate::surface::FrameComposition::Mixed,
            "dim on gpu, buffer on overlay"
        );

        let mut engine = RecordingEngine::default();
        let plans = engine.plans.clone();
        let report = compose_display(&mut device, &f.scene, &f.table, &mut engine, true).unwrap();
        assert!(report.presented && report.gpu_rendered, "mixed frame");
        let plans = plans.lock().unwrap();
        let plan = &plans[0];
        assert_eq!(plan.clear, FramebufferClear::Transparent, "overlays below the gpu layers");
        assert_eq!(plan.items.len(), 2, "dim drawn, overlay hole cleared");
        assert_eq!((plan.items[0].layer, plan.items[0].op), (dim, DrawOp::Draw), "dim");
        assert_eq!((plan.items[1].layer, plan.items[1].op), (top, DrawOp::Clear), "hole");
        assert!(
            device.worklist().unwrap().layers()[1].acquire_fence.is_valid(),
            "overlay waits on the producer"
        );

        commit(&mut composer, [&mut device]).unwrap();
        finish_frame(&mut device, &mut f.table);
        assert_eq!(composer.commits, 1, "committed once");
        assert_eq!(device.retire_fence().signal_time(), Some(HostTime(9)), "present fence");
        assert!(!device.worklist().unwrap().geometry_changed(), "geometry consumed");
    }

    #[test]
    fn failed_prepare_falls_back_to_gpu() {
        let mut f = Fixture::new();
        f.buffer_layer(PixelRect::new(0, 0, 40, 40), 0, PixelFormat::RGBX_8888);
        let mut device = f.device(Some(HwcDisplayId::PRIMARY));
        set_up_worklist(&mut device, &f.scene, &f.table, true, false);
        let mut composer = OverlayComposer {
            fail: true,
            ..OverlayComposer::default()
        };
        assert_eq!(
            prepare(&mut composer, [&mut device]),
            Err(HwcError::Driver(-22)),
            "error reported"
        );
        assert_eq!(device.frame_composition(), crate::surface::FrameComposition::Gles, "gpu");
    }

    #[test]
    fn disabled_overlays_force_gpu() {
        let mut f = Fixture::new();
        f.buffer_layer(PixelRect::new(0, 0, 40, 40), 0, PixelFormat::RGBX_8888);
        let mut device = f.device(Some(HwcDisplayId::PRIMARY));
        set_up_worklist(&mut device, &f.scene, &f.table, true, true);
        let mut composer = OverlayComposer::default();
        prepare(&mut composer, [&mut device]).unwrap();
        assert_eq!(device.worklist().unwrap().composition_counts(), (0, 1), "all gpu");
    }

    #[test]
    fn undamaged_gpu_display_is_not_composed() {
        let mut f = Fixture::new();
        f.buffer_layer(PixelRect::new(0, 0, 40, 40), 0, PixelFormat::RGBX_8888);
        let mut device = f.device(None);
        let mut engine = RecordingEngine::default();
        let first = compose_display(&mut device, &f.scene, &f.table, &mut engine, false).unwrap();
        assert!(first.presented, "initial damage");
        let second = compose_display(&mut device, &f.scene, &f.table, &mut engine, false).unwrap();
        assert!(!second.presented, "nothing changed");
        assert_eq!(device.page_flip_count(), 1, "one flip");
        assert_eq!(engine.plans.lock().unwrap().len(), 1, "one render");
        finish_frame(&mut device, &mut f.table);
    }

    #[test]
    fn secure_layer_is_blacked_out_on_insecure_display() {
        let mut f = Fixture::new();
        let id = f.buffer_layer_with(
            PixelRect::new(0, 0, 40, 40),
            0,
            PixelFormat::RGBX_8888,
            LayerFlags::SECURE,
        );

        let display = DisplayState::new(DisplayKind::Virtual, String::from("capture"), false)
            .with_surface(SurfaceId(2), 100, 100);
        let mut device = DisplayDevice::new(
            DisplayToken(5),
            &display,
            Box::new(RecordingSurface::default()),
            Some(HwcDisplayId(2)),
        );
        let result = f.scene.compute_visible_regions(&mut f.table, device.layer_stack());
        rebuild_layer_list(&mut device, &f.scene, &f.table, &result.opaque);
        set_up_worklist(&mut device, &f.scene, &f.table, true, false);
        assert!(device.worklist().unwrap().layers()[0].skip, "never an overlay");

        let mut plan = DrawPlan::new(device.token());
        let mut composer = OverlayComposer::default();
        prepare(&mut composer, [&mut device]).unwrap();
        build_draw_plan(&mut plan, &device, &f.scene, &f.table, &Region::from_rect(device.bounds()));
        assert_eq!(plan.items[0].content, DrawContent::Blackout, "hidden content");
        assert_eq!(vec![id], device.visible_layers(), "still listed");
    }
}
