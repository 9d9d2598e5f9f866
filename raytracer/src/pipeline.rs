use rt_utils::{PipelineHandle, PipelineOptions, ProgramGroupHandle, RayTracingDevice, StackBudget, StackSizes};

use crate::error::{device_error, RenderResult};

/// Radiance rays trace shadow rays from their closest hit, nothing deeper.
pub const MAX_TRACE_DEPTH: u32 = 2;
/// Instance acceleration structure over geometry acceleration structures.
pub const MAX_TRAVERSABLE_GRAPH_DEPTH: u32 = 2;

pub fn pipeline_options() -> PipelineOptions {
    PipelineOptions {
        num_payload_values: 2,
        num_attribute_values: 2,
        launch_params_name: String::from("sysParameter"),
        max_trace_depth: MAX_TRACE_DEPTH,
        single_level_instancing: true,
        debug_exceptions: cfg!(debug_assertions),
    }
}

/// Queries the stack usage of every group and reduces it to the per-program maximum.
pub fn accumulate_stack_sizes<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    groups: &[ProgramGroupHandle],
) -> RenderResult<StackSizes> {
    let mut sizes = StackSizes::default();
    for &group in groups {
        let group_sizes = device
            .program_group_stack_size(group)
            .map_err(device_error("stack size query"))?;
        sizes = sizes.max(group_sizes);
    }
    Ok(sizes)
}

/// Stack reservation for a pipeline where callables are only called directly and the
/// closest hit may trace up to `max_trace_depth - 1` further rays.
pub fn compute_stack_budget(sizes: &StackSizes, max_trace_depth: u32) -> StackBudget {
    let css_cc_tree = sizes.css_cc;
    let css_ch_or_ms_plus_cc_tree = sizes.css_ch.max(sizes.css_ms) + css_cc_tree;

    let continuation = sizes.css_rg
        + css_cc_tree
        + css_ch_or_ms_plus_cc_tree * (max_trace_depth.max(1) - 1)
        + max_trace_depth.min(1) * css_ch_or_ms_plus_cc_tree.max(sizes.css_ah + sizes.css_is);

    StackBudget {
        direct_callable_from_traversal: sizes.dss_dc,
        direct_callable_from_state: sizes.dss_dc,
        continuation,
        max_traversable_graph_depth: MAX_TRAVERSABLE_GRAPH_DEPTH,
    }
}

/// A linked pipeline with its stack budget applied, ready to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub handle: PipelineHandle,
    pub budget: StackBudget,
}

impl Pipeline {
    /// Links `groups` and applies the stack budget derived from their reported usage.
    pub fn build<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        groups: &[ProgramGroupHandle],
        options: &PipelineOptions,
    ) -> RenderResult<Self> {
        let handle = device
            .link_pipeline(groups, options)
            .map_err(device_error("pipeline link"))?;

        let sizes = accumulate_stack_sizes(device, groups)?;
        let budget = compute_stack_budget(&sizes, options.max_trace_depth);
        log::debug!("Stack sizes {:?} give budget {:?}", sizes, budget);

        device
            .set_pipeline_stack_size(handle, &budget)
            .map_err(device_error("pipeline stack size"))?;

        Ok(Self { handle, budget })
    }

    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        device.destroy_pipeline(self.handle).map_err(device_error("pipeline teardown"))
    }
}
