//! Render graph infrastructure.
//!
//! The render graph is an ordered list of passes executed strictly
//! sequentially against one command list. Before each pass runs, its named
//! inputs and outputs are resolved through the
//! [`RenderTargetCache`](crate::cache::RenderTargetCache) and the required
//! state transitions are recorded as a single batched barrier. There is no
//! reordering, parallelization or dead-pass elimination; passes execute in
//! the exact order they were added.
//!
//! # Example
//!
//! ```ignore
//! use render_frame::{DrawPass, RenderContext, RenderGraph};
//!
//! let mut graph = RenderGraph::new();
//! graph.add_draw_pass(
//!     DrawPass::new("geometry")
//!         .with_color_output("hdr")
//!         .with_depth_output("depth")
//!         .with_clear_color(0.0, 0.0, 0.0, 1.0)
//!         .with_clear_depth(1.0)
//!         .on_run(|ctx| {
//!             // record draws against ctx.cmd()
//!         }),
//! );
//!
//! let mut ctx = RenderContext::new(&device, &mut cache, &mut cmd);
//! graph.run(&mut ctx);
//! ```

mod pass;

pub use pass::{
    ComputeDrawPass, DrawPass, GenericPass, Pass, PassCallback, PassContext, PassKind,
    TransferPass,
};

use std::time::{Duration, Instant};

use crate::cache::RenderTargetCache;
use crate::device::{CommandList, RenderDevice};
use crate::sync::BarrierBatch;

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything [`RenderGraph::run`] needs for one execution.
pub struct RenderContext<'a> {
    /// The device commands are recorded against.
    pub device: &'a dyn RenderDevice,
    /// Cache resolving named targets to physical images.
    pub cache: &'a mut RenderTargetCache,
    /// Command list the whole graph records into.
    pub cmd: &'a mut CommandList,
}

impl<'a> RenderContext<'a> {
    /// Bundle the pieces of a graph execution.
    pub fn new(
        device: &'a dyn RenderDevice,
        cache: &'a mut RenderTargetCache,
        cmd: &'a mut CommandList,
    ) -> Self {
        Self { device, cache, cmd }
    }
}

/// Wall-clock duration of one pass's resolve and run.
///
/// Observational only; recorded for profiling overlays and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    /// Pass name.
    pub name: String,
    /// Pass kind.
    pub kind: PassKind,
    /// CPU time spent resolving targets and running callbacks.
    pub duration: Duration,
}

/// An ordered list of passes executed against one command list.
///
/// # Construction
///
/// Build a graph by adding fully-configured passes:
///
/// ```ignore
/// let mut graph = RenderGraph::new();
/// let geometry = graph.add_draw_pass(DrawPass::new("geometry").with_color_output("hdr"));
/// let tonemap = graph.add_draw_pass(
///     DrawPass::new("tonemap").with_input("hdr").with_color_output("backbuffer"),
/// );
/// ```
///
/// # Execution
///
/// [`Self::run`] iterates the pass list once in declaration order. Each pass
/// is resolved (named resources mapped to physical targets, barriers batched
/// and recorded) and then run (callback lists invoked in order).
#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: Vec<Pass>,
    timings: Vec<PassTiming>,
}

impl RenderGraph {
    /// Create a new empty render graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass to the end of the graph.
    ///
    /// Returns a `PassHandle` for referencing this pass.
    pub fn add_pass(&mut self, pass: Pass) -> PassHandle {
        let index = self.passes.len() as u32;
        log::trace!("RenderGraph: added pass '{}'", pass.name());
        self.passes.push(pass);
        PassHandle::new(index)
    }

    /// Add a draw pass to the end of the graph.
    pub fn add_draw_pass(&mut self, pass: DrawPass) -> PassHandle {
        self.add_pass(Pass::Draw(pass))
    }

    /// Add a compute draw pass to the end of the graph.
    pub fn add_compute_draw_pass(&mut self, pass: ComputeDrawPass) -> PassHandle {
        self.add_pass(Pass::ComputeDraw(pass))
    }

    /// Add a transfer pass to the end of the graph.
    pub fn add_transfer_pass(&mut self, pass: TransferPass) -> PassHandle {
        self.add_pass(Pass::Transfer(pass))
    }

    /// Add a generic pass to the end of the graph.
    pub fn add_generic_pass(&mut self, pass: GenericPass) -> PassHandle {
        self.add_pass(Pass::Generic(pass))
    }

    /// Get a pass by handle.
    pub fn pass(&self, handle: PassHandle) -> Option<&Pass> {
        self.passes.get(handle.index())
    }

    /// Get a mutable pass by handle.
    pub fn pass_mut(&mut self, handle: PassHandle) -> Option<&mut Pass> {
        self.passes.get_mut(handle.index())
    }

    /// All passes in declaration order.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Number of passes in the graph.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Check if the graph has no passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Remove all passes from the graph.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.timings.clear();
    }

    /// Execute every pass in declaration order.
    ///
    /// For each pass this resolves its named resources through the cache,
    /// records the batched barrier, then runs the callback lists. A pass
    /// completes fully before the next one starts.
    pub fn run(&mut self, ctx: &mut RenderContext<'_>) {
        log::trace!("RenderGraph: running {} passes", self.passes.len());
        self.timings.clear();

        let mut batch = BarrierBatch::new();
        for pass in &mut self.passes {
            let started = Instant::now();

            batch.clear();
            let resolved = pass.resolve(ctx.cache, &mut batch);
            batch.submit(ctx.device, ctx.cmd);
            pass.execute(ctx.device, ctx.cmd, resolved);

            self.timings.push(PassTiming {
                name: pass.name().to_string(),
                kind: pass.kind(),
                duration: started.elapsed(),
            });
        }
    }

    /// Per-pass timings from the most recent [`Self::run`].
    pub fn last_timings(&self) -> &[PassTiming] {
        &self.timings
    }
}

// Ensure RenderGraph is Send
static_assertions::assert_impl_all!(RenderGraph: Send);
