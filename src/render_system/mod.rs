// The render system: packet ring and render thread
//
// The logic thread fills the back packet slot and flips it live; the
// render thread drains the front slot and turns it into GPU work.
// The two only ever meet at the ring's control mutex and at the
// shared shutdown flag.

use candela::{PushStage, RenderCommandList, RendererBackend};
use trellis::draw;
use trellis::RenderFramePacket;
use utils::log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Control half of the double-buffered packet handoff
struct RingControl {
    front: usize,
    back: usize,
    packet_ready: bool,
}

/// Two packet slots plus the swap bookkeeping.
///
/// The control mutex is held only for the index flip; packet data is
/// guarded per-slot so the render thread can keep reading the front
/// slot while the logic thread refills the back one.
pub struct PacketRing {
    slots: [Mutex<RenderFramePacket>; 2],
    control: Mutex<RingControl>,
}

impl PacketRing {
    pub fn new(initial: RenderFramePacket) -> Self {
        Self {
            slots: [Mutex::new(initial.clone()), Mutex::new(initial)],
            control: Mutex::new(RingControl {
                front: 0,
                back: 1,
                packet_ready: false,
            }),
        }
    }

    /// Logic-thread side: fill the back slot in place, then flip it
    /// to the front and mark it ready.
    pub fn publish<F: FnOnce(&mut RenderFramePacket)>(&self, fill: F) {
        let back_index = self.control.lock().unwrap().back;
        {
            let mut slot = self.slots[back_index].lock().unwrap();
            slot.clear();
            fill(&mut slot);
        }

        let mut control = self.control.lock().unwrap();
        let control = &mut *control;
        std::mem::swap(&mut control.front, &mut control.back);
        control.packet_ready = true;
    }

    /// Render-thread side: take the front slot if a fresh packet was
    /// published. The returned guard makes the render thread the
    /// sole accessor until it finishes the frame.
    pub fn acquire(&self) -> Option<MutexGuard<RenderFramePacket>> {
        let front_index = {
            let mut control = self.control.lock().unwrap();
            if !control.packet_ready {
                return None;
            }
            control.packet_ready = false;
            control.front
        };
        Some(self.slots[front_index].lock().unwrap())
    }
}

/// Translate one packet into the instance records and command list
/// for a frame. Pure; exercised directly by tests.
pub fn encode_packet(packet: &RenderFramePacket) -> (Vec<candela::GpuInstanceData>, RenderCommandList) {
    let instances = draw::to_instances(&packet.display, &packet.transformer);

    let mut list = RenderCommandList::new();
    list.bind_pipeline(0);
    let view_proj = packet.transformer.projection();
    list.push_constants(PushStage::VERTEX | PushStage::FRAGMENT, &view_proj);
    if !instances.is_empty() {
        list.draw_indexed(6, instances.len() as u32);
    }

    (instances, list)
}

/// Drives a backend from the packet ring until `running` clears.
///
/// Owns every per-frame decision on the render thread: packet
/// acquisition, re-rendering stale frames, and the periodic
/// screenshot schedule.
pub struct RenderLoop {
    pub ring: Arc<PacketRing>,
    pub running: Arc<AtomicBool>,
    /// Seconds between automatic screenshots, 0 disables
    pub screenshot_interval: f64,
    pub screenshot_dir: std::path::PathBuf,
}

impl RenderLoop {
    /// One iteration: translate the freshest packet (or re-render
    /// the previous one) and submit.
    pub fn frame(
        &self,
        rend: &mut dyn RendererBackend,
        last_list: &mut RenderCommandList,
        now: f64,
        last_shot: &mut f64,
    ) {
        if let Some(packet) = self.ring.acquire() {
            let (instances, list) = encode_packet(&packet);
            rend.frame_set_instances(&instances);
            *last_list = list;
            // the guard drops here: the packet is consumed and the
            // logic thread may reuse the slot
        }

        if self.screenshot_interval > 0.0 && now - *last_shot >= self.screenshot_interval {
            *last_shot = now;
            let path = self
                .screenshot_dir
                .join(format!("screen_{:.0}.png", now));
            rend.request_screenshot(&path.display().to_string());
        }

        // dropped frames are fine; a stale list re-presents the
        // previous packet
        if let Err(e) = rend.submit_commands(last_list) {
            log::error!("Frame submission failed: {}", e);
            self.running.store(false, Ordering::Release);
        }
    }

    pub fn run(&self, rend: &mut dyn RendererBackend, now_fn: &dyn Fn() -> f64) {
        let mut last_list = RenderCommandList::new();
        let mut last_shot = now_fn();

        while self.running.load(Ordering::Acquire) {
            self.frame(rend, &mut last_list, now_fn(), &mut last_shot);
        }
        log::debug!("Render loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis::dom::{Widget, WidgetType};
    use trellis::CoordinateTransformer;

    fn empty_packet() -> RenderFramePacket {
        RenderFramePacket::new(CoordinateTransformer::new(1.0, 1.0, (640.0, 480.0)))
    }

    #[test]
    fn acquire_without_publish_returns_none() {
        let ring = PacketRing::new(empty_packet());
        assert!(ring.acquire().is_none());
    }

    #[test]
    fn publish_then_acquire_hands_over_the_data() {
        let ring = PacketRing::new(empty_packet());
        ring.publish(|packet| {
            packet.widgets.push(Widget::new(WidgetType::Button));
        });

        let packet = ring.acquire().expect("packet should be ready");
        assert_eq!(packet.widgets.len(), 1);
    }

    #[test]
    fn acquire_consumes_the_ready_flag() {
        let ring = PacketRing::new(empty_packet());
        ring.publish(|_| {});
        assert!(ring.acquire().is_some());
        assert!(ring.acquire().is_none());
    }

    #[test]
    fn later_publish_wins() {
        let ring = PacketRing::new(empty_packet());
        ring.publish(|packet| {
            packet.widgets.push(Widget::new(WidgetType::Button));
        });
        ring.publish(|packet| {
            packet.widgets.push(Widget::new(WidgetType::Label));
            packet.widgets.push(Widget::new(WidgetType::Label));
        });

        let packet = ring.acquire().unwrap();
        assert_eq!(packet.widgets.len(), 2);
        assert_eq!(packet.widgets[0].widget_type, WidgetType::Label);
    }

    #[test]
    fn publishers_never_touch_an_acquired_packet() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Barrier;

        let ring = Arc::new(PacketRing::new(empty_packet()));
        let observed = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(2));

        // logic side: publish packets with a strictly growing widget
        // count
        let publisher = {
            let ring = ring.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                for i in 1..200usize {
                    ring.publish(|packet| {
                        for _ in 0..i {
                            packet.widgets.push(Widget::new(WidgetType::Rect));
                        }
                    });
                }
            })
        };

        // render side: every acquired packet must be internally
        // consistent and at least as new as the last one
        let consumer = {
            let ring = ring.clone();
            let observed = observed.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                let mut last = 0usize;
                for _ in 0..2000 {
                    if let Some(packet) = ring.acquire() {
                        let count = packet.widgets.len();
                        assert!(count >= last, "packet went backwards");
                        assert!(packet
                            .widgets
                            .iter()
                            .all(|w| w.widget_type == WidgetType::Rect));
                        last = count;
                        observed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };

        publisher.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn encode_packet_emits_one_instanced_draw() {
        let mut packet = empty_packet();
        let mut w = Widget::new(WidgetType::Panel);
        w.rect = utils::region::Rect::new(0.0, 0.0, 100.0, 50.0);
        w.padding = 0.0;
        packet.widgets.push(w);

        let atlas = {
            use std::collections::HashMap;
            trellis::FontAtlas::from_raw(vec![0u8; 16], 4, 4, 8.0, -2.0, 10.0, HashMap::new())
        };
        packet.display = draw::build_display_list(
            &packet.widgets,
            &atlas,
            &packet.transformer,
        );

        let (instances, list) = encode_packet(&packet);
        assert_eq!(instances.len(), 1);
        // pipeline bind, push constants, draw
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn empty_packet_still_encodes_a_clear_frame() {
        let packet = empty_packet();
        let (instances, list) = encode_packet(&packet);
        assert!(instances.is_empty());
        // no draw, but the frame still binds and pushes so the
        // backend presents a clear frame
        assert_eq!(list.len(), 2);
    }
}
