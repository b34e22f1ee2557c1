// The compute graph
//
// Ordered compute passes with ping-pong buffer support. Passes
// execute in declaration order; the backend inserts a full
// compute-to-anything barrier between consecutive dispatches.

extern crate utils as lantern_utils;
use crate::backend::RendererBackend;
use crate::stream::{BufferHandle, Stream};
use lantern_utils::log;

use std::cell::RefCell;
use std::rc::Rc;

/// Reserved binding slot for the graph's implicit global input
const GLOBAL_INPUT_SLOT: u32 = 1;

struct DoubleBufferInternal {
    handles: [BufferHandle; 2],
    read_index: usize,
}

/// A ping-pong pair of equally shaped streams.
///
/// The wrapper does not own the streams; the creator destroys them.
/// Reads resolve to the current read stream, writes to the opposite
/// one, and `swap` flips which is which.
#[derive(Clone)]
pub struct ComputeDoubleBuffer {
    internal: Rc<RefCell<DoubleBufferInternal>>,
}

impl ComputeDoubleBuffer {
    /// Wrap two compatible streams. The pair must have the same
    /// element size and count.
    pub fn new(stream_a: &Stream, stream_b: &Stream) -> Option<Self> {
        if stream_a.element_size() != stream_b.element_size()
            || stream_a.count() != stream_b.count()
        {
            log::error!("ComputeDoubleBuffer: stream layouts do not match");
            return None;
        }

        Some(Self {
            internal: Rc::new(RefCell::new(DoubleBufferInternal {
                handles: [stream_a.handle(), stream_b.handle()],
                read_index: 0,
            })),
        })
    }

    /// Toggle the read index
    pub fn swap(&self) {
        let mut internal = self.internal.borrow_mut();
        internal.read_index = 1 - internal.read_index;
    }

    pub fn read_handle(&self) -> BufferHandle {
        let internal = self.internal.borrow();
        internal.handles[internal.read_index]
    }

    pub fn write_handle(&self) -> BufferHandle {
        let internal = self.internal.borrow();
        internal.handles[1 - internal.read_index]
    }
}

enum ComputeBinding {
    Single(BufferHandle),
    DoubleRead(ComputeDoubleBuffer),
    DoubleWrite(ComputeDoubleBuffer),
}

struct ComputeResource {
    binding: u32,
    kind: ComputeBinding,
}

/// One recorded compute pass: a pipeline, a dispatch size, optional
/// push constants (copied), and the resources to bind.
pub struct ComputePass {
    pipeline_id: u32,
    group_x: u32,
    group_y: u32,
    group_z: u32,
    push_constants: Vec<u8>,
    resources: Vec<ComputeResource>,
}

impl ComputePass {
    /// Store a copy of the push constant bytes for this pass
    pub fn set_push_constants<T: Copy>(&mut self, data: &T) {
        self.push_constants = unsafe {
            std::slice::from_raw_parts(data as *const T as *const u8, std::mem::size_of::<T>())
        }
        .to_vec();
    }

    pub fn set_push_constant_bytes(&mut self, data: &[u8]) {
        self.push_constants = data.to_vec();
    }

    pub fn set_dispatch_size(&mut self, group_x: u32, group_y: u32, group_z: u32) {
        self.group_x = group_x;
        self.group_y = group_y;
        self.group_z = group_z;
    }

    /// Bind a single stream at `slot`
    pub fn bind_stream(&mut self, slot: u32, stream: &Stream) {
        self.resources.push(ComputeResource {
            binding: slot,
            kind: ComputeBinding::Single(stream.handle()),
        });
    }

    /// Bind the current "read" half of a double buffer at `slot`
    pub fn bind_buffer_read(&mut self, slot: u32, db: &ComputeDoubleBuffer) {
        self.resources.push(ComputeResource {
            binding: slot,
            kind: ComputeBinding::DoubleRead(db.clone()),
        });
    }

    /// Bind the opposite "write" half of a double buffer at `slot`
    pub fn bind_buffer_write(&mut self, slot: u32, db: &ComputeDoubleBuffer) {
        self.resources.push(ComputeResource {
            binding: slot,
            kind: ComputeBinding::DoubleWrite(db.clone()),
        });
    }
}

/// An ordered list of compute passes
pub struct ComputeGraph {
    passes: Vec<ComputePass>,
    /// Stream bound at the reserved slot before every pass
    global_input: BufferHandle,
}

impl ComputeGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            global_input: 0,
        }
    }

    /// Append a pass to the execution order and return it for
    /// further configuration
    pub fn add_pass(
        &mut self,
        pipeline_id: u32,
        group_x: u32,
        group_y: u32,
        group_z: u32,
    ) -> &mut ComputePass {
        self.passes.push(ComputePass {
            pipeline_id: pipeline_id,
            group_x: group_x,
            group_y: group_y,
            group_z: group_z,
            push_constants: Vec::new(),
            resources: Vec::new(),
        });
        self.passes.last_mut().unwrap()
    }

    /// Set the stream implicitly bound at the reserved global-input
    /// slot for every pass
    pub fn set_global_input(&mut self, stream: &Stream) {
        self.global_input = stream.handle();
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Execute all passes in order.
    ///
    /// Each pass rebinds its declared resources, dispatches, then
    /// waits out the dispatch so the next pass observes its writes.
    /// Streams whose handle is null are skipped with a log entry.
    pub fn execute(&self, rend: &mut dyn RendererBackend) {
        for pass in self.passes.iter() {
            if self.global_input != 0 {
                rend.compute_bind_buffer(self.global_input, GLOBAL_INPUT_SLOT);
            }

            for res in pass.resources.iter() {
                let handle = match &res.kind {
                    ComputeBinding::Single(h) => *h,
                    ComputeBinding::DoubleRead(db) => db.read_handle(),
                    ComputeBinding::DoubleWrite(db) => db.write_handle(),
                };
                if handle == 0 {
                    log::debug!("ComputeGraph: skipping null stream at slot {}", res.binding);
                    continue;
                }
                rend.compute_bind_buffer(handle, res.binding);
            }

            if let Err(e) = rend.compute_dispatch(
                pass.pipeline_id,
                pass.group_x,
                pass.group_y,
                pass.group_z,
                &pass.push_constants,
            ) {
                log::error!("ComputeGraph: dispatch failed: {}", e);
                continue;
            }

            // write -> read barrier between passes
            if let Err(e) = rend.compute_wait() {
                log::error!("ComputeGraph: compute_wait failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::StubBackend;
    use crate::stream::StreamType;

    fn make_stream(rend: &mut StubBackend, count: usize) -> Stream {
        Stream::new(rend, StreamType::Vec4, count, 0).unwrap()
    }

    #[test]
    fn double_swap_is_identity() {
        let mut rend = StubBackend::new();
        let a = make_stream(&mut rend, 8);
        let b = make_stream(&mut rend, 8);
        let db = ComputeDoubleBuffer::new(&a, &b).unwrap();

        let read0 = db.read_handle();
        let write0 = db.write_handle();
        db.swap();
        db.swap();
        assert_eq!(db.read_handle(), read0);
        assert_eq!(db.write_handle(), write0);
    }

    #[test]
    fn mismatched_streams_rejected() {
        let mut rend = StubBackend::new();
        let a = make_stream(&mut rend, 8);
        let b = make_stream(&mut rend, 16);
        assert!(ComputeDoubleBuffer::new(&a, &b).is_none());
    }

    #[test]
    fn passes_execute_in_order_with_their_bindings() {
        let mut rend = StubBackend::new();
        let input = make_stream(&mut rend, 4);
        let data = make_stream(&mut rend, 4);

        let mut graph = ComputeGraph::new();
        graph.set_global_input(&input);
        {
            let pass = graph.add_pass(1, 8, 1, 1);
            pass.bind_stream(2, &data);
            pass.set_push_constants(&42u32);
        }
        graph.add_pass(2, 4, 4, 1);

        graph.execute(&mut rend);

        assert_eq!(rend.dispatches.len(), 2);

        let (id, groups, pushc, bindings) = &rend.dispatches[0];
        assert_eq!(*id, 1);
        assert_eq!(*groups, (8, 1, 1));
        assert_eq!(pushc.as_slice(), &42u32.to_ne_bytes());
        assert_eq!(bindings.get(&1), Some(&input.handle()));
        assert_eq!(bindings.get(&2), Some(&data.handle()));

        // slot 2 must not leak into the second pass
        let (id, _, _, bindings) = &rend.dispatches[1];
        assert_eq!(*id, 2);
        assert_eq!(bindings.get(&1), Some(&input.handle()));
        assert_eq!(bindings.get(&2), None);
    }

    #[test]
    fn double_buffer_bindings_follow_swap() {
        let mut rend = StubBackend::new();
        let a = make_stream(&mut rend, 4);
        let b = make_stream(&mut rend, 4);
        let db = ComputeDoubleBuffer::new(&a, &b).unwrap();

        let mut graph = ComputeGraph::new();
        {
            let pass = graph.add_pass(1, 1, 1, 1);
            pass.bind_buffer_read(0, &db);
            pass.bind_buffer_write(2, &db);
        }

        graph.execute(&mut rend);
        {
            let (_, _, _, bindings) = &rend.dispatches[0];
            assert_eq!(bindings.get(&0), Some(&a.handle()));
            assert_eq!(bindings.get(&2), Some(&b.handle()));
        }

        // after a swap the same graph binds the other way around
        db.swap();
        graph.execute(&mut rend);
        {
            let (_, _, _, bindings) = &rend.dispatches[1];
            assert_eq!(bindings.get(&0), Some(&b.handle()));
            assert_eq!(bindings.get(&2), Some(&a.handle()));
        }
    }

    #[test]
    fn dispatch_size_can_be_updated() {
        let mut rend = StubBackend::new();
        let mut graph = ComputeGraph::new();
        graph.add_pass(1, 1, 1, 1).set_dispatch_size(16, 16, 1);
        graph.execute(&mut rend);
        assert_eq!(rend.dispatches[0].1, (16, 16, 1));
    }
}
