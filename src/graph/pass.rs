//! Render pass types.

use crate::cache::{RenderTargetCache, ResolvedTarget};
use crate::device::{ColorAttachmentInfo, CommandList, DepthAttachmentInfo, RenderDevice};
use crate::sync::{BarrierBatch, ResourceState};
use crate::types::{ClearValue, Extent2d};

/// A callback invoked while a pass runs.
///
/// Callbacks receive a [`PassContext`] giving access to the command list and
/// the targets resolved for the pass.
pub type PassCallback = Box<dyn FnMut(&mut PassContext<'_>) + Send>;

type ClearColorFn = Box<dyn Fn() -> [f32; 4] + Send>;
type ClearDepthFn = Box<dyn Fn() -> f32 + Send>;
type ExtentFn = Box<dyn Fn() -> Extent2d + Send>;

/// Kind of a render graph pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Rasterization inside a rendering bracket.
    Draw,
    /// Compute work reading and writing storage images.
    ComputeDraw,
    /// Copy and blit work.
    Transfer,
    /// Work with no automatic resource resolution.
    Generic,
}

/// A pass in the render graph.
///
/// Each variant carries its own declaration of named resources and callback
/// lists. Resolution policy (which state each named resource transitions to)
/// is decided by the variant.
#[derive(Debug)]
pub enum Pass {
    /// Rasterization pass.
    Draw(DrawPass),
    /// Compute pass with storage image access.
    ComputeDraw(ComputeDrawPass),
    /// Copy/blit pass.
    Transfer(TransferPass),
    /// Pass that manages its own synchronization.
    Generic(GenericPass),
}

impl Pass {
    /// Get the pass name.
    pub fn name(&self) -> &str {
        match self {
            Pass::Draw(p) => p.name(),
            Pass::ComputeDraw(p) => p.name(),
            Pass::Transfer(p) => p.name(),
            Pass::Generic(p) => p.name(),
        }
    }

    /// Get the pass kind.
    pub fn kind(&self) -> PassKind {
        match self {
            Pass::Draw(_) => PassKind::Draw,
            Pass::ComputeDraw(_) => PassKind::ComputeDraw,
            Pass::Transfer(_) => PassKind::Transfer,
            Pass::Generic(_) => PassKind::Generic,
        }
    }

    /// Get this pass as a draw pass, if it is one.
    pub fn as_draw(&self) -> Option<&DrawPass> {
        if let Pass::Draw(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a mutable draw pass, if it is one.
    pub fn as_draw_mut(&mut self) -> Option<&mut DrawPass> {
        if let Pass::Draw(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a compute draw pass, if it is one.
    pub fn as_compute_draw(&self) -> Option<&ComputeDrawPass> {
        if let Pass::ComputeDraw(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a mutable compute draw pass, if it is one.
    pub fn as_compute_draw_mut(&mut self) -> Option<&mut ComputeDrawPass> {
        if let Pass::ComputeDraw(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a transfer pass, if it is one.
    pub fn as_transfer(&self) -> Option<&TransferPass> {
        if let Pass::Transfer(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a mutable transfer pass, if it is one.
    pub fn as_transfer_mut(&mut self) -> Option<&mut TransferPass> {
        if let Pass::Transfer(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a generic pass, if it is one.
    pub fn as_generic(&self) -> Option<&GenericPass> {
        if let Pass::Generic(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a mutable generic pass, if it is one.
    pub fn as_generic_mut(&mut self) -> Option<&mut GenericPass> {
        if let Pass::Generic(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Check if this is a draw pass.
    pub fn is_draw(&self) -> bool {
        matches!(self, Pass::Draw(_))
    }

    /// Check if this is a compute draw pass.
    pub fn is_compute_draw(&self) -> bool {
        matches!(self, Pass::ComputeDraw(_))
    }

    /// Check if this is a transfer pass.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Pass::Transfer(_))
    }

    /// Check if this is a generic pass.
    pub fn is_generic(&self) -> bool {
        matches!(self, Pass::Generic(_))
    }

    /// Map the pass's named resources to physical targets, recording any
    /// required transitions into `batch`.
    ///
    /// Names with no physical target are omitted from the resolved set; pass
    /// bodies check for the targets they need.
    pub(super) fn resolve(
        &self,
        cache: &mut RenderTargetCache,
        batch: &mut BarrierBatch,
    ) -> ResolvedPass {
        match self {
            Pass::Draw(p) => p.resolve(cache, batch),
            Pass::ComputeDraw(p) => p.resolve(cache, batch),
            Pass::Transfer(p) => p.resolve(cache, batch),
            Pass::Generic(_) => ResolvedPass::default(),
        }
    }

    /// Run the pass's callback lists against the resolved targets.
    pub(super) fn execute(
        &mut self,
        device: &dyn RenderDevice,
        cmd: &mut CommandList,
        resolved: ResolvedPass,
    ) {
        match self {
            Pass::Draw(p) => p.execute(device, cmd, resolved),
            Pass::ComputeDraw(p) => p.execute(device, cmd, resolved),
            Pass::Transfer(p) => p.execute(device, cmd, resolved),
            Pass::Generic(p) => p.execute(device, cmd, resolved),
        }
    }
}

// ============================================================================
// Pass context
// ============================================================================

/// Execution context handed to every pass callback.
pub struct PassContext<'a> {
    device: &'a dyn RenderDevice,
    cmd: &'a mut CommandList,
    targets: &'a [ResolvedTarget],
    pass_name: &'a str,
    extent: Extent2d,
}

impl PassContext<'_> {
    /// The device commands are recorded against.
    pub fn device(&self) -> &dyn RenderDevice {
        self.device
    }

    /// The command list the pass records into.
    pub fn cmd(&mut self) -> &mut CommandList {
        self.cmd
    }

    /// Borrow the device and the command list together for recording.
    pub fn device_and_cmd(&mut self) -> (&dyn RenderDevice, &mut CommandList) {
        (self.device, self.cmd)
    }

    /// Look up a resolved target by its logical name.
    ///
    /// Returns `None` when the name did not resolve; the callback should skip
    /// the work depending on it.
    pub fn target(&self, name: &str) -> Option<&ResolvedTarget> {
        self.targets.iter().find(|target| target.name == name)
    }

    /// All targets resolved for this pass.
    pub fn targets(&self) -> &[ResolvedTarget] {
        self.targets
    }

    /// Name of the running pass.
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Render extent of the pass.
    ///
    /// For draw passes this is the rendering bracket extent; for other kinds
    /// it is the extent of the first resolved target, or zero.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }
}

/// Targets and attachment state produced by resolving a pass.
#[derive(Debug, Default)]
pub(super) struct ResolvedPass {
    targets: Vec<ResolvedTarget>,
    colors: Vec<ColorAttachmentInfo>,
    depth: Option<DepthAttachmentInfo>,
    extent: Extent2d,
}

fn run_callbacks(
    callbacks: &mut [PassCallback],
    device: &dyn RenderDevice,
    cmd: &mut CommandList,
    targets: &[ResolvedTarget],
    pass_name: &str,
    extent: Extent2d,
) {
    if callbacks.is_empty() {
        return;
    }
    let mut ctx = PassContext {
        device,
        cmd,
        targets,
        pass_name,
        extent,
    };
    for callback in callbacks.iter_mut() {
        callback(&mut ctx);
    }
}

// ============================================================================
// Draw pass
// ============================================================================

/// A rasterization pass.
///
/// Inputs transition to shader-read, color outputs to color-attachment and
/// the optional depth output to depth-attachment state. The `on_run` list
/// executes inside a begin/end rendering bracket over the declared outputs;
/// `on_begin` and `on_end` run outside the bracket, which is where staged
/// uploads belong since copies cannot be recorded inside a bracket.
pub struct DrawPass {
    name: String,
    inputs: Vec<String>,
    color_outputs: Vec<String>,
    depth_output: Option<String>,
    clear_color: Option<ClearColorFn>,
    clear_depth: Option<ClearDepthFn>,
    extent_fn: Option<ExtentFn>,
    on_begin: Vec<PassCallback>,
    on_run: Vec<PassCallback>,
    on_end: Vec<PassCallback>,
}

impl DrawPass {
    /// Create a new draw pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            color_outputs: Vec::new(),
            depth_output: None,
            clear_color: None,
            clear_depth: None,
            extent_fn: None,
            on_begin: Vec::new(),
            on_run: Vec::new(),
            on_end: Vec::new(),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a named input sampled by the pass.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Declare a named color output.
    pub fn with_color_output(mut self, name: impl Into<String>) -> Self {
        self.color_outputs.push(name.into());
        self
    }

    /// Declare the named depth output.
    pub fn with_depth_output(mut self, name: impl Into<String>) -> Self {
        self.depth_output = Some(name.into());
        self
    }

    /// Clear every color output to a fixed color on load.
    pub fn with_clear_color(self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.with_clear_color_fn(move || [r, g, b, a])
    }

    /// Clear every color output with a color computed at run time.
    pub fn with_clear_color_fn(mut self, f: impl Fn() -> [f32; 4] + Send + 'static) -> Self {
        self.clear_color = Some(Box::new(f));
        self
    }

    /// Clear the depth output to a fixed value on load.
    pub fn with_clear_depth(self, depth: f32) -> Self {
        self.with_clear_depth_fn(move || depth)
    }

    /// Clear the depth output with a value computed at run time.
    pub fn with_clear_depth_fn(mut self, f: impl Fn() -> f32 + Send + 'static) -> Self {
        self.clear_depth = Some(Box::new(f));
        self
    }

    /// Size the rendering bracket with a caller-supplied extent.
    ///
    /// Without this the bracket takes the extent of the first resolved
    /// attachment.
    pub fn with_extent_fn(mut self, f: impl Fn() -> Extent2d + Send + 'static) -> Self {
        self.extent_fn = Some(Box::new(f));
        self
    }

    /// Append a callback running before the rendering bracket.
    pub fn on_begin(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_begin.push(Box::new(callback));
        self
    }

    /// Append a callback running inside the rendering bracket.
    pub fn on_run(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_run.push(Box::new(callback));
        self
    }

    /// Append a callback running after the rendering bracket.
    pub fn on_end(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_end.push(Box::new(callback));
        self
    }

    /// Declared input names.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared color output names.
    pub fn color_outputs(&self) -> &[String] {
        &self.color_outputs
    }

    /// Declared depth output name.
    pub fn depth_output(&self) -> Option<&str> {
        self.depth_output.as_deref()
    }

    fn clear_color_value(&self) -> ClearValue {
        match &self.clear_color {
            Some(f) => {
                let [r, g, b, a] = f();
                ClearValue::color(r, g, b, a)
            }
            None => ClearValue::None,
        }
    }

    fn clear_depth_value(&self) -> ClearValue {
        match &self.clear_depth {
            Some(f) => ClearValue::depth(f()),
            None => ClearValue::None,
        }
    }

    fn resolve(&self, cache: &mut RenderTargetCache, batch: &mut BarrierBatch) -> ResolvedPass {
        let mut targets = Vec::new();
        let mut colors = Vec::new();
        let mut depth = None;
        let mut attachment_extent = None;

        for name in &self.inputs {
            match cache.transition(name, ResourceState::SHADER_READ, batch) {
                Some(target) => targets.push(target),
                None => log::warn!(
                    "DrawPass '{}': input '{}' has no physical target",
                    self.name,
                    name
                ),
            }
        }

        for name in &self.color_outputs {
            match cache.transition(name, ResourceState::COLOR_ATTACHMENT, batch) {
                Some(target) => {
                    attachment_extent.get_or_insert(target.extent);
                    colors.push(ColorAttachmentInfo {
                        view: target.view,
                        clear: self.clear_color_value(),
                    });
                    targets.push(target);
                }
                None => log::warn!(
                    "DrawPass '{}': color output '{}' has no physical target",
                    self.name,
                    name
                ),
            }
        }

        if let Some(name) = &self.depth_output {
            match cache.transition(name, ResourceState::DEPTH_ATTACHMENT, batch) {
                Some(target) => {
                    attachment_extent.get_or_insert(target.extent);
                    depth = Some(DepthAttachmentInfo {
                        view: target.view,
                        clear: self.clear_depth_value(),
                    });
                    targets.push(target);
                }
                None => log::warn!(
                    "DrawPass '{}': depth output '{}' has no physical target",
                    self.name,
                    name
                ),
            }
        }

        let extent = self
            .extent_fn
            .as_ref()
            .map(|f| f())
            .or(attachment_extent)
            .unwrap_or_default();

        ResolvedPass {
            targets,
            colors,
            depth,
            extent,
        }
    }

    fn execute(&mut self, device: &dyn RenderDevice, cmd: &mut CommandList, resolved: ResolvedPass) {
        let ResolvedPass {
            targets,
            colors,
            depth,
            extent,
        } = resolved;

        run_callbacks(&mut self.on_begin, device, cmd, &targets, &self.name, extent);

        let bracket = !extent.is_empty();
        if bracket {
            device.record_begin_rendering(cmd, &colors, depth.as_ref(), extent);
        } else {
            log::warn!(
                "DrawPass '{}': no render extent, rendering bracket skipped",
                self.name
            );
        }

        run_callbacks(&mut self.on_run, device, cmd, &targets, &self.name, extent);

        if bracket {
            device.record_end_rendering(cmd);
        }

        run_callbacks(&mut self.on_end, device, cmd, &targets, &self.name, extent);
    }
}

impl std::fmt::Debug for DrawPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawPass")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("color_outputs", &self.color_outputs)
            .field("depth_output", &self.depth_output)
            .field(
                "callbacks",
                &(self.on_begin.len() + self.on_run.len() + self.on_end.len()),
            )
            .finish()
    }
}

// ============================================================================
// Compute draw pass
// ============================================================================

/// A compute pass accessing named targets as storage images.
///
/// Both inputs and outputs transition to the general storage state so
/// shaders can read and write them directly.
pub struct ComputeDrawPass {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    on_begin: Vec<PassCallback>,
    on_run: Vec<PassCallback>,
    on_end: Vec<PassCallback>,
}

impl ComputeDrawPass {
    /// Create a new compute draw pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            on_begin: Vec::new(),
            on_run: Vec::new(),
            on_end: Vec::new(),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a named input read by the pass.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Declare a named output written by the pass.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Append a callback running before the pass body.
    pub fn on_begin(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_begin.push(Box::new(callback));
        self
    }

    /// Append a callback forming the pass body.
    pub fn on_run(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_run.push(Box::new(callback));
        self
    }

    /// Append a callback running after the pass body.
    pub fn on_end(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_end.push(Box::new(callback));
        self
    }

    /// Declared input names.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared output names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn resolve(&self, cache: &mut RenderTargetCache, batch: &mut BarrierBatch) -> ResolvedPass {
        let mut resolved = ResolvedPass::default();
        resolve_names(
            &self.name,
            &self.inputs,
            ResourceState::STORAGE,
            cache,
            batch,
            &mut resolved,
        );
        resolve_names(
            &self.name,
            &self.outputs,
            ResourceState::STORAGE,
            cache,
            batch,
            &mut resolved,
        );
        resolved
    }

    fn execute(&mut self, device: &dyn RenderDevice, cmd: &mut CommandList, resolved: ResolvedPass) {
        let ResolvedPass {
            targets, extent, ..
        } = resolved;
        run_callbacks(&mut self.on_begin, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_run, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_end, device, cmd, &targets, &self.name, extent);
    }
}

impl std::fmt::Debug for ComputeDrawPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDrawPass")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field(
                "callbacks",
                &(self.on_begin.len() + self.on_run.len() + self.on_end.len()),
            )
            .finish()
    }
}

// ============================================================================
// Transfer pass
// ============================================================================

/// A copy/blit pass.
///
/// Inputs transition to transfer-source, outputs to transfer-destination.
pub struct TransferPass {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    on_begin: Vec<PassCallback>,
    on_run: Vec<PassCallback>,
    on_end: Vec<PassCallback>,
}

impl TransferPass {
    /// Create a new transfer pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            on_begin: Vec::new(),
            on_run: Vec::new(),
            on_end: Vec::new(),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a named copy source.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Declare a named copy destination.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Append a callback running before the pass body.
    pub fn on_begin(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_begin.push(Box::new(callback));
        self
    }

    /// Append a callback forming the pass body.
    pub fn on_run(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_run.push(Box::new(callback));
        self
    }

    /// Append a callback running after the pass body.
    pub fn on_end(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_end.push(Box::new(callback));
        self
    }

    /// Declared source names.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared destination names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn resolve(&self, cache: &mut RenderTargetCache, batch: &mut BarrierBatch) -> ResolvedPass {
        let mut resolved = ResolvedPass::default();
        resolve_names(
            &self.name,
            &self.inputs,
            ResourceState::TRANSFER_SRC,
            cache,
            batch,
            &mut resolved,
        );
        resolve_names(
            &self.name,
            &self.outputs,
            ResourceState::TRANSFER_DST,
            cache,
            batch,
            &mut resolved,
        );
        resolved
    }

    fn execute(&mut self, device: &dyn RenderDevice, cmd: &mut CommandList, resolved: ResolvedPass) {
        let ResolvedPass {
            targets, extent, ..
        } = resolved;
        run_callbacks(&mut self.on_begin, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_run, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_end, device, cmd, &targets, &self.name, extent);
    }
}

impl std::fmt::Debug for TransferPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPass")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field(
                "callbacks",
                &(self.on_begin.len() + self.on_run.len() + self.on_end.len()),
            )
            .finish()
    }
}

// ============================================================================
// Generic pass
// ============================================================================

/// A pass with no automatic resource resolution.
///
/// Synchronization is handled entirely inside the callbacks. Useful for work
/// that touches resources the cache does not track.
pub struct GenericPass {
    name: String,
    on_begin: Vec<PassCallback>,
    on_run: Vec<PassCallback>,
    on_end: Vec<PassCallback>,
}

impl GenericPass {
    /// Create a new generic pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_begin: Vec::new(),
            on_run: Vec::new(),
            on_end: Vec::new(),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a callback running before the pass body.
    pub fn on_begin(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_begin.push(Box::new(callback));
        self
    }

    /// Append a callback forming the pass body.
    pub fn on_run(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_run.push(Box::new(callback));
        self
    }

    /// Append a callback running after the pass body.
    pub fn on_end(mut self, callback: impl FnMut(&mut PassContext<'_>) + Send + 'static) -> Self {
        self.on_end.push(Box::new(callback));
        self
    }

    fn execute(&mut self, device: &dyn RenderDevice, cmd: &mut CommandList, resolved: ResolvedPass) {
        let ResolvedPass {
            targets, extent, ..
        } = resolved;
        run_callbacks(&mut self.on_begin, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_run, device, cmd, &targets, &self.name, extent);
        run_callbacks(&mut self.on_end, device, cmd, &targets, &self.name, extent);
    }
}

impl std::fmt::Debug for GenericPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericPass")
            .field("name", &self.name)
            .field(
                "callbacks",
                &(self.on_begin.len() + self.on_run.len() + self.on_end.len()),
            )
            .finish()
    }
}

fn resolve_names(
    pass_name: &str,
    names: &[String],
    state: ResourceState,
    cache: &mut RenderTargetCache,
    batch: &mut BarrierBatch,
    resolved: &mut ResolvedPass,
) {
    for name in names {
        match cache.transition(name, state, batch) {
            Some(target) => {
                if resolved.extent.is_empty() {
                    resolved.extent = target.extent;
                }
                resolved.targets.push(target);
            }
            None => log::warn!("Pass '{pass_name}': '{name}' has no physical target"),
        }
    }
}

// Ensure Pass is Send
static_assertions::assert_impl_all!(Pass: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TargetDescriptor, TargetSize};
    use crate::device::DummyDevice;
    use crate::types::{ImageFormat, ImageUsage};
    use std::sync::Arc;

    fn test_cache() -> RenderTargetCache {
        let device = Arc::new(DummyDevice::new());
        RenderTargetCache::new(device, Extent2d::new(1920, 1080))
    }

    fn color_target(name: &str) -> TargetDescriptor {
        TargetDescriptor::color(name, ImageFormat::Rgba8Unorm)
    }

    #[test]
    fn test_draw_pass_builder() {
        let pass = DrawPass::new("geometry")
            .with_input("shadow_map")
            .with_color_output("hdr")
            .with_color_output("normals")
            .with_depth_output("depth");

        assert_eq!(pass.name(), "geometry");
        assert_eq!(pass.inputs(), &["shadow_map".to_string()]);
        assert_eq!(
            pass.color_outputs(),
            &["hdr".to_string(), "normals".to_string()]
        );
        assert_eq!(pass.depth_output(), Some("depth"));
    }

    #[test]
    fn test_draw_pass_clear_values() {
        let cleared = DrawPass::new("clear")
            .with_clear_color(0.1, 0.2, 0.3, 1.0)
            .with_clear_depth(1.0);
        assert_eq!(
            cleared.clear_color_value(),
            ClearValue::color(0.1, 0.2, 0.3, 1.0)
        );
        assert_eq!(cleared.clear_depth_value(), ClearValue::depth(1.0));

        let loading = DrawPass::new("load");
        assert_eq!(loading.clear_color_value(), ClearValue::None);
        assert_eq!(loading.clear_depth_value(), ClearValue::None);
    }

    #[test]
    fn test_clear_color_fn_evaluated_per_call() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let pass = DrawPass::new("animated").with_clear_color_fn(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            [0.0, 0.0, 0.0, 1.0]
        });

        pass.clear_color_value();
        pass.clear_color_value();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_pass_kind_and_accessors() {
        let mut draw = Pass::Draw(DrawPass::new("a"));
        let compute = Pass::ComputeDraw(ComputeDrawPass::new("b"));
        let transfer = Pass::Transfer(TransferPass::new("c"));
        let generic = Pass::Generic(GenericPass::new("d"));

        assert_eq!(draw.kind(), PassKind::Draw);
        assert_eq!(compute.kind(), PassKind::ComputeDraw);
        assert_eq!(transfer.kind(), PassKind::Transfer);
        assert_eq!(generic.kind(), PassKind::Generic);

        assert!(draw.is_draw() && !draw.is_generic());
        assert!(draw.as_draw().is_some());
        assert!(draw.as_draw_mut().is_some());
        assert!(draw.as_transfer().is_none());
        assert_eq!(compute.as_compute_draw().map(|p| p.name()), Some("b"));
        assert_eq!(transfer.as_transfer().map(|p| p.name()), Some("c"));
        assert_eq!(generic.as_generic().map(|p| p.name()), Some("d"));
    }

    #[test]
    fn test_draw_resolve_transitions() {
        let mut cache = test_cache();
        cache.get_target(&color_target("input"));
        cache.get_target(&color_target("color"));
        cache.get_target(&TargetDescriptor::depth("depth", ImageFormat::Depth32Float));

        let pass = DrawPass::new("main")
            .with_input("input")
            .with_color_output("color")
            .with_depth_output("depth");

        let mut batch = BarrierBatch::new();
        let resolved = pass.resolve(&mut cache, &mut batch);

        assert_eq!(resolved.targets.len(), 3);
        assert_eq!(resolved.colors.len(), 1);
        assert!(resolved.depth.is_some());
        assert_eq!(resolved.extent, Extent2d::new(1920, 1080));
        assert_eq!(batch.len(), 3);

        assert_eq!(
            cache.target("input").map(|t| t.state()),
            Some(ResourceState::SHADER_READ)
        );
        assert_eq!(
            cache.target("color").map(|t| t.state()),
            Some(ResourceState::COLOR_ATTACHMENT)
        );
        assert_eq!(
            cache.target("depth").map(|t| t.state()),
            Some(ResourceState::DEPTH_ATTACHMENT)
        );
    }

    #[test]
    fn test_compute_draw_resolve_uses_storage_state() {
        let mut cache = test_cache();
        cache.get_target(&color_target("src"));
        cache.get_target(&color_target("dst"));

        let pass = ComputeDrawPass::new("blur").with_input("src").with_output("dst");

        let mut batch = BarrierBatch::new();
        let resolved = pass.resolve(&mut cache, &mut batch);

        assert_eq!(resolved.targets.len(), 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            cache.target("src").map(|t| t.state()),
            Some(ResourceState::STORAGE)
        );
        assert_eq!(
            cache.target("dst").map(|t| t.state()),
            Some(ResourceState::STORAGE)
        );
    }

    #[test]
    fn test_transfer_resolve_states() {
        let mut cache = test_cache();
        cache.get_target(&color_target("src"));
        cache.get_target(&color_target("dst"));

        let pass = TransferPass::new("blit").with_input("src").with_output("dst");

        let mut batch = BarrierBatch::new();
        pass.resolve(&mut cache, &mut batch);

        assert_eq!(
            cache.target("src").map(|t| t.state()),
            Some(ResourceState::TRANSFER_SRC)
        );
        assert_eq!(
            cache.target("dst").map(|t| t.state()),
            Some(ResourceState::TRANSFER_DST)
        );
    }

    #[test]
    fn test_missing_target_omitted_from_resolution() {
        let mut cache = test_cache();

        let pass = DrawPass::new("main").with_color_output("ghost");
        let mut batch = BarrierBatch::new();
        let resolved = pass.resolve(&mut cache, &mut batch);

        assert!(resolved.targets.is_empty());
        assert!(resolved.colors.is_empty());
        assert!(batch.is_empty());
        assert!(resolved.extent.is_empty());
    }

    #[test]
    fn test_extent_fn_overrides_attachment_extent() {
        let mut cache = test_cache();
        cache.get_target(&color_target("color"));

        let pass = DrawPass::new("main")
            .with_color_output("color")
            .with_extent_fn(|| Extent2d::new(640, 480));

        let mut batch = BarrierBatch::new();
        let resolved = pass.resolve(&mut cache, &mut batch);

        assert_eq!(resolved.extent, Extent2d::new(640, 480));
    }

    #[test]
    fn test_half_res_target_drives_extent() {
        let mut cache = test_cache();
        cache.get_target(
            &TargetDescriptor::color("half", ImageFormat::Rgba8Unorm).with_size(TargetSize::HALF),
        );

        let pass = DrawPass::new("downsample").with_color_output("half");
        let mut batch = BarrierBatch::new();
        let resolved = pass.resolve(&mut cache, &mut batch);

        assert_eq!(resolved.extent, Extent2d::new(960, 540));
    }

    #[test]
    fn test_resolve_skips_redundant_transitions() {
        let mut cache = test_cache();
        cache.get_target(&color_target("color"));

        let pass = DrawPass::new("main").with_color_output("color");

        let mut first = BarrierBatch::new();
        pass.resolve(&mut cache, &mut first);
        assert_eq!(first.len(), 1);

        let mut second = BarrierBatch::new();
        pass.resolve(&mut cache, &mut second);
        assert!(second.is_empty());
    }
}
