use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::warn;

use crate::app::entity::{Group, Node, NodeId};
use crate::app::input::{TouchEvent, TouchPhase};
use crate::app::rendering::context::DrawContext;
use crate::app::rendering::target::RenderTarget;

/// Red-channel value meaning "no touchable node here".
pub const PICK_BACKGROUND_ID: u8 = 0;

/// Picking buffer edge length relative to the logical viewport.
pub const PICK_BUFFER_SCALE: f32 = 0.5;

/// Cloneable handle the input thread uses to queue pointer events for the
/// next picking pass.
#[derive(Clone)]
pub struct TouchSender {
    tx: Sender<TouchEvent>,
}

impl TouchSender {
    pub fn send(&self, event: TouchEvent) {
        // A full teardown on the receiving side makes late events meaningless.
        let _ = self.tx.send(event);
    }
}

/// Maps touchable nodes to 8-bit picking ids and routes queued pointer
/// events to whichever node owns the pixel under them.
///
/// Ids are re-assigned every pass, so removed nodes never leave stale slots.
/// The id is encoded in the red channel of the picking buffer.
pub struct TouchMap {
    slots: HashMap<u8, NodeId>,
    next_slot: u8,
    exhausted_warned: bool,
    tx: Sender<TouchEvent>,
    rx: Receiver<TouchEvent>,
}

impl Default for TouchMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchMap {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            slots: HashMap::new(),
            next_slot: 1,
            exhausted_warned: false,
            tx,
            rx,
        }
    }

    pub fn sender(&self) -> TouchSender {
        TouchSender {
            tx: self.tx.clone(),
        }
    }

    /// Allocates (or reuses, within a pass) the picking color for `id`.
    /// Returns the background color once all 255 slots are taken.
    pub fn color_for(&mut self, id: NodeId) -> [u8; 4] {
        if let Some((slot, _)) = self.slots.iter().find(|(_, node)| **node == id) {
            return [*slot, 0, 0, 255];
        }
        if self.next_slot == 0 {
            if !self.exhausted_warned {
                warn!(limit = 255, "touch_map_slots_exhausted");
                self.exhausted_warned = true;
            }
            return [PICK_BACKGROUND_ID, 0, 0, 255];
        }
        let slot = self.next_slot;
        self.next_slot = self.next_slot.wrapping_add(1);
        self.slots.insert(slot, id);
        [slot, 0, 0, 255]
    }

    pub fn node_at_slot(&self, slot: u8) -> Option<NodeId> {
        if slot == PICK_BACKGROUND_ID {
            return None;
        }
        self.slots.get(&slot).copied()
    }

    /// Resets slot assignments and clears the picking buffer for a new pass.
    pub fn begin_pass(&mut self, buffer: &mut RenderTarget) {
        self.slots.clear();
        self.next_slot = 1;
        buffer.clear([PICK_BACKGROUND_ID, 0, 0, 255]);
    }

    /// Re-renders the picking buffer for the current tree. Slot assignments
    /// restart from 1 each pass.
    pub fn render_pass(&mut self, root: &Group, buffer: &mut RenderTarget) {
        self.begin_pass(buffer);

        let mut ctx = DrawContext::new(buffer);
        ctx.set_hard_alpha(true);
        ctx.stack.scale(PICK_BUFFER_SCALE, PICK_BUFFER_SCALE);
        root.render_pick(&mut ctx, self);
    }

    /// Drains queued events, resolves each against the picking buffer, and
    /// dispatches to the hit node. On `Up`, every other touchable node is
    /// told the pointer left.
    pub fn dispatch(&mut self, root: &mut Group, buffer: &RenderTarget) {
        while let Ok(event) = self.rx.try_recv() {
            let px = (event.position.x * PICK_BUFFER_SCALE).floor().max(0.0) as u32;
            let py = (event.position.y * PICK_BUFFER_SCALE).floor().max(0.0) as u32;
            let slot = buffer.sample(px, py)[0];
            let hit = self.node_at_slot(slot);

            if let Some(node_id) = hit {
                root.dispatch_to(node_id, &event);
            }
            if event.phase == TouchPhase::Up {
                root.broadcast_pointer_left(hit, event.pointer_id);
            }
        }
    }

    pub fn registered(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::entity::{FlatRect, Node, TouchNode};
    use crate::app::transform::{Transform2D, Vec2};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn button_at(x: f32, y: f32, size: f32, hits: Arc<AtomicUsize>) -> TouchNode {
        let mut rect = Box::new(FlatRect::new(Vec2::new(size, size), [255, 255, 255, 255]));
        *rect.transform_mut() = Transform2D::at(x, y);
        TouchNode::new(rect, Vec2::new(size, size), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            true
        })
    }

    #[test]
    fn color_for_assigns_sequential_slots_and_reuses() {
        let mut map = TouchMap::new();
        let a = NodeId::next();
        let b = NodeId::next();
        assert_eq!(map.color_for(a), [1, 0, 0, 255]);
        assert_eq!(map.color_for(b), [2, 0, 0, 255]);
        assert_eq!(map.color_for(a), [1, 0, 0, 255]);
        assert_eq!(map.registered(), 2);
    }

    #[test]
    fn exhausted_slots_fall_back_to_background() {
        let mut map = TouchMap::new();
        for _ in 0..255 {
            map.color_for(NodeId::next());
        }
        assert_eq!(map.color_for(NodeId::next()), [PICK_BACKGROUND_ID, 0, 0, 255]);
    }

    #[test]
    fn render_pass_restarts_slot_assignment() {
        let mut map = TouchMap::new();
        map.color_for(NodeId::next());
        map.color_for(NodeId::next());

        let root = Group::new();
        let mut buffer = RenderTarget::new(4, 4);
        map.render_pass(&root, &mut buffer);
        assert_eq!(map.registered(), 0);
        assert_eq!(buffer.sample(0, 0), [PICK_BACKGROUND_ID, 0, 0, 255]);
    }

    #[test]
    fn down_event_reaches_node_under_pointer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let button = button_at(10.0, 10.0, 20.0, Arc::clone(&hits));
        let mut root = Group::new();
        root.add_child(Box::new(button));

        let mut map = TouchMap::new();
        // Half-resolution buffer for a 64x64 logical viewport.
        let mut buffer = RenderTarget::new(32, 32);
        map.render_pass(&root, &mut buffer);

        let sender = map.sender();
        sender.send(TouchEvent {
            phase: TouchPhase::Down,
            pointer_id: 1,
            position: Vec2::new(20.0, 20.0),
        });
        sender.send(TouchEvent {
            phase: TouchPhase::Down,
            pointer_id: 1,
            position: Vec2::new(50.0, 50.0),
        });
        map.dispatch(&mut root, &buffer);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn up_event_notifies_other_nodes_pointer_left() {
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let button_a = button_at(0.0, 0.0, 10.0, Arc::clone(&hits_a));
        let button_b = button_at(40.0, 40.0, 10.0, Arc::clone(&hits_b));
        let b_id = button_b.id();
        let mut root = Group::new();
        root.add_child(Box::new(button_a));
        root.add_child(Box::new(button_b));

        let mut map = TouchMap::new();
        let mut buffer = RenderTarget::new(32, 32);
        map.render_pass(&root, &mut buffer);

        let sender = map.sender();
        // Press b, then release over a: b must learn the pointer left.
        sender.send(TouchEvent {
            phase: TouchPhase::Down,
            pointer_id: 2,
            position: Vec2::new(45.0, 45.0),
        });
        map.dispatch(&mut root, &buffer);
        assert!(root.find_node_mut(b_id).is_some());

        sender.send(TouchEvent {
            phase: TouchPhase::Up,
            pointer_id: 2,
            position: Vec2::new(5.0, 5.0),
        });
        map.dispatch(&mut root, &buffer);

        // a received the Up, b only the Down.
        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_nodes_resolve_to_topmost() {
        let hits_bottom = Arc::new(AtomicUsize::new(0));
        let hits_top = Arc::new(AtomicUsize::new(0));
        let bottom = button_at(0.0, 0.0, 20.0, Arc::clone(&hits_bottom));
        let top = button_at(0.0, 0.0, 20.0, Arc::clone(&hits_top));
        let mut root = Group::new();
        root.add_child(Box::new(bottom));
        root.add_child(Box::new(top));

        let mut map = TouchMap::new();
        let mut buffer = RenderTarget::new(16, 16);
        map.render_pass(&root, &mut buffer);
        map.sender().send(TouchEvent {
            phase: TouchPhase::Down,
            pointer_id: 1,
            position: Vec2::new(5.0, 5.0),
        });
        map.dispatch(&mut root, &buffer);

        assert_eq!(hits_bottom.load(Ordering::SeqCst), 0);
        assert_eq!(hits_top.load(Ordering::SeqCst), 1);
    }
}
