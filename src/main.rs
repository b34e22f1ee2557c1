// A GPU-rendered declarative UI runtime
//
// Two threads: logic owns the widget state and publishes frame
// packets, render owns the Vulkan backend and turns packets into
// presented frames.

mod config;
mod render_system;

use candela::{CreateInfo, VulkanRenderer, WindowSystem};
use config::Config;
use render_system::{PacketRing, RenderLoop};
use trellis::dom::{LayoutKind, Style, StyleTable, UiNode, WidgetType};
use trellis::platform::HeadlessPlat;
use trellis::{draw, layout, CoordinateTransformer, FontAtlas, RenderFramePacket, ScrollContext};
use utils::log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// The font pixel height the atlas is rasterized at
const FONT_PIXEL_HEIGHT: u32 = 32;

// Built-in UI shaders, compiled from assets/shaders/ by build.rs
static UI_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.vert.spv"));
static UI_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.frag.spv"));
static UI_LEGACY_VERT_SPV: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/ui_legacy.vert.spv"));
static UI_LEGACY_FRAG_SPV: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/ui_legacy.frag.spv"));

fn load_or_die(path: &std::path::Path, what: &str) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Fatal: could not load {} at {}: {}", what, path.display(), e);
            std::process::exit(1);
        }
    }
}

/// The embedded shader, unless the config points at a replacement
fn shader_blob(override_path: &Option<std::path::PathBuf>, embedded: &[u8], what: &str) -> Vec<u8> {
    match override_path {
        Some(path) => load_or_die(path, what),
        None => embedded.to_vec(),
    }
}

/// A small starter scene: a titled panel with a slider and a
/// scrollable list.
fn demo_scene() -> (UiNode, StyleTable) {
    let mut styles = StyleTable::new();
    styles.insert(
        "panel".to_string(),
        Style {
            padding: 8.0,
            color: Some(trellis::Color::new(0.18, 0.18, 0.2, 1.0)),
            ..Default::default()
        },
    );

    let mut slider = UiNode::widget(WidgetType::HSlider, 200.0, 24.0);
    slider.min_value = 0.0;
    slider.max_value = 1.0;

    let mut list = UiNode::container(LayoutKind::Column).with_spacing(4.0);
    for i in 0..12 {
        list = list.with_child(
            UiNode::widget(WidgetType::Button, 180.0, 22.0)
                .with_text(&format!("entry {}", i))
                .with_scroll_area("sidebar"),
        );
    }

    let root = UiNode::container(LayoutKind::Column)
        .with_style("panel")
        .with_spacing(6.0)
        .with_child(UiNode::widget(WidgetType::Label, 200.0, 28.0).with_text("lantern"))
        .with_child(slider)
        .with_child(list);

    (root, styles)
}

fn main() {
    let config = Config::from_env();
    config.apply_log_sink();

    if config.backend != "vulkan" {
        log::error!("Fatal: unknown backend '{}'", config.backend);
        std::process::exit(1);
    }

    let vert_spv = shader_blob(&config.vert_spv_path, UI_VERT_SPV, "vertex shader");
    let frag_spv = shader_blob(&config.frag_spv_path, UI_FRAG_SPV, "fragment shader");
    let ttf = load_or_die(&config.font_path, "font");

    let atlas = match FontAtlas::new(&ttf, FONT_PIXEL_HEIGHT, &[]) {
        Ok(a) => a,
        Err(e) => {
            log::error!("Fatal: building the font atlas failed: {}", e);
            std::process::exit(1);
        }
    };

    let platform = Arc::new(HeadlessPlat::new(1280, 800));
    let (fb_w, fb_h) = platform.framebuffer_size();
    let transformer = CoordinateTransformer::new(1.0, 1.0, (fb_w as f32, fb_h as f32));

    let ring = Arc::new(PacketRing::new(RenderFramePacket::new(transformer)));
    let running = Arc::new(AtomicBool::new(true));

    // ---- render thread: owns every Vulkan object
    let render_thread = {
        let ring = ring.clone();
        let running = running.clone();
        let platform = platform.clone();
        let info = CreateInfo::builder(platform.clone())
            .vert_spv(vert_spv)
            .frag_spv(frag_spv)
            .legacy_shaders(UI_LEGACY_VERT_SPV.to_vec(), UI_LEGACY_FRAG_SPV.to_vec())
            .font_atlas(atlas.pixels().to_vec(), atlas.width(), atlas.height())
            .build();
        let screenshot_dir = config.logs_dir.join("screenshots");
        let interval = config.screenshot_interval;
        if interval > 0.0 {
            if let Err(e) = std::fs::create_dir_all(&screenshot_dir) {
                log::error!("Could not create {}: {}", screenshot_dir.display(), e);
            }
        }

        std::thread::spawn(move || {
            let mut rend = match VulkanRenderer::new(info) {
                Ok(r) => r,
                Err(e) => {
                    log::error!("Fatal: renderer init failed: {}", e);
                    running.store(false, Ordering::Release);
                    return;
                }
            };

            let render_loop = RenderLoop {
                ring: ring,
                running: running.clone(),
                screenshot_interval: interval,
                screenshot_dir: screenshot_dir,
            };
            render_loop.run(&mut rend, &|| platform.now());
        })
    };

    println!("Begin render loop...");
    let start = SystemTime::now();

    // ---- logic thread (this one): layout, scroll, publish
    let (scene, styles) = demo_scene();
    let mut widgets = layout::materialize_widgets(&scene, &styles);
    let mut scroll = ScrollContext::new(&mut widgets);

    while running.load(Ordering::Acquire) {
        platform.poll_events();

        // animate the slider so frames visibly change
        let t = platform.now();
        for w in widgets.iter_mut() {
            if w.widget_type == WidgetType::HSlider {
                w.value = (t.sin() * 0.5 + 0.5) as f32;
            }
        }
        scroll.apply_offsets(&mut widgets);

        let display = draw::build_display_list(&widgets, &atlas, &transformer);
        ring.publish(|packet| {
            packet.widgets.extend_from_slice(&widgets);
            packet.display = display.clone();
            packet.transformer = transformer;
        });

        std::thread::sleep(std::time::Duration::from_millis(16));
    }

    render_thread.join().ok();

    let end = SystemTime::now();
    println!(
        "uptime: {}",
        end.duration_since(start).unwrap().as_secs_f32()
    );
}
