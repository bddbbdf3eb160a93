use ash::vk;
use serde_json::{Map, Value};
use tracing::debug;

use super::value;

/// Accessor for one overridable field, tagged with how its text is parsed.
pub(crate) enum Slot<T> {
    U32(fn(&mut T) -> &mut u32),
    U64(fn(&mut T) -> &mut u64),
    Size(fn(&mut T) -> &mut usize),
    F32(fn(&mut T) -> &mut f32),
    I32(fn(&mut T) -> &mut i32),
    SampleCounts(fn(&mut T) -> &mut vk::SampleCountFlags),
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

pub(crate) struct Field<T> {
    pub key: &'static str,
    pub slot: Slot<T>,
}

impl<T> Slot<T> {
    /// Parses `text` for this slot's kind and stores it. Unparseable text leaves the target
    /// untouched.
    fn assign(self, target: &mut T, key: &str, text: &str) -> bool {
        match self {
            Slot::U32(get) => value::parse(key, text).map(|v| *get(target) = v).is_some(),
            Slot::U64(get) => value::parse(key, text).map(|v| *get(target) = v).is_some(),
            Slot::Size(get) => value::parse(key, text).map(|v| *get(target) = v).is_some(),
            Slot::F32(get) => value::parse(key, text).map(|v| *get(target) = v).is_some(),
            Slot::I32(get) => value::parse(key, text).map(|v| *get(target) = v).is_some(),
            Slot::SampleCounts(get) => value::parse(key, text)
                .map(|v| *get(target) = vk::SampleCountFlags::from_raw(v))
                .is_some(),
        }
    }

    pub(crate) fn render(self, target: &mut T) -> String {
        match self {
            Slot::U32(get) => get(target).to_string(),
            Slot::U64(get) => get(target).to_string(),
            Slot::Size(get) => get(target).to_string(),
            Slot::F32(get) => get(target).to_string(),
            Slot::I32(get) => get(target).to_string(),
            Slot::SampleCounts(get) => get(target).as_raw().to_string(),
        }
    }
}

/// Applies every field of `fields` present in `section` onto `target`. Returns the number of
/// fields overridden.
pub(crate) fn apply_fields<T>(section: &Map<String, Value>, target: &mut T, fields: &[Field<T>]) -> usize {
    let mut applied = 0;
    for field in fields {
        let Some(text) = value::lookup_text(section, field.key) else {
            continue;
        };
        if field.slot.assign(target, field.key, &text) {
            debug!(key = field.key, value = %field.slot.render(target), "override applied");
            applied += 1;
        }
    }
    applied
}

macro_rules! field {
    ($key:literal => $kind:ident $($path:tt)+) => {
        Field {
            key: $key,
            slot: Slot::$kind(|target| &mut target.$($path)+),
        }
    };
}

/// Numeric identity fields and sparse residency flags of the properties record.
///
/// `devicetype`, `devicename` and the dotted `apiversion` need more than a numeric parse
/// and are handled by the caller.
pub(crate) static PROPERTY_FIELDS: &[Field<vk::PhysicalDeviceProperties>] = &[
    field!("apiversionraw" => U32 api_version),
    field!("driverversionraw" => U32 driver_version),
    field!("vendorid" => U32 vendor_id),
    field!("deviceid" => U32 device_id),
    field!("residencyStandard2DBlockShape" => U32 sparse_properties.residency_standard2_d_block_shape),
    field!("residencyStandard2DMSBlockShape" => U32 sparse_properties.residency_standard2_d_multisample_block_shape),
    field!("residencyStandard3DBlockShape" => U32 sparse_properties.residency_standard3_d_block_shape),
    field!("residencyAlignedMipSize" => U32 sparse_properties.residency_aligned_mip_size),
    field!("residencyNonResidentStrict" => U32 sparse_properties.residency_non_resident_strict),
];

pub(crate) static LIMIT_FIELDS: &[Field<vk::PhysicalDeviceLimits>] = &[
    field!("maxImageDimension1D" => U32 max_image_dimension1_d),
    field!("maxImageDimension2D" => U32 max_image_dimension2_d),
    field!("maxImageDimension3D" => U32 max_image_dimension3_d),
    field!("maxImageDimensionCube" => U32 max_image_dimension_cube),
    field!("maxImageArrayLayers" => U32 max_image_array_layers),
    field!("maxTexelBufferElements" => U32 max_texel_buffer_elements),
    field!("maxUniformBufferRange" => U32 max_uniform_buffer_range),
    field!("maxStorageBufferRange" => U32 max_storage_buffer_range),
    field!("maxPushConstantsSize" => U32 max_push_constants_size),
    field!("maxMemoryAllocationCount" => U32 max_memory_allocation_count),
    field!("maxSamplerAllocationCount" => U32 max_sampler_allocation_count),
    field!("bufferImageGranularity" => U64 buffer_image_granularity),
    field!("sparseAddressSpaceSize" => U64 sparse_address_space_size),
    field!("maxBoundDescriptorSets" => U32 max_bound_descriptor_sets),
    field!("maxPerStageDescriptorSamplers" => U32 max_per_stage_descriptor_samplers),
    field!("maxPerStageDescriptorUniformBuffers" => U32 max_per_stage_descriptor_uniform_buffers),
    field!("maxPerStageDescriptorStorageBuffers" => U32 max_per_stage_descriptor_storage_buffers),
    field!("maxPerStageDescriptorSampledImages" => U32 max_per_stage_descriptor_sampled_images),
    field!("maxPerStageDescriptorStorageImages" => U32 max_per_stage_descriptor_storage_images),
    field!("maxPerStageDescriptorInputAttachments" => U32 max_per_stage_descriptor_input_attachments),
    field!("maxPerStageResources" => U32 max_per_stage_resources),
    field!("maxDescriptorSetSamplers" => U32 max_descriptor_set_samplers),
    field!("maxDescriptorSetUniformBuffers" => U32 max_descriptor_set_uniform_buffers),
    field!("maxDescriptorSetUniformBuffersDynamic" => U32 max_descriptor_set_uniform_buffers_dynamic),
    field!("maxDescriptorSetStorageBuffers" => U32 max_descriptor_set_storage_buffers),
    field!("maxDescriptorSetStorageBuffersDynamic" => U32 max_descriptor_set_storage_buffers_dynamic),
    field!("maxDescriptorSetSampledImages" => U32 max_descriptor_set_sampled_images),
    field!("maxDescriptorSetStorageImages" => U32 max_descriptor_set_storage_images),
    field!("maxDescriptorSetInputAttachments" => U32 max_descriptor_set_input_attachments),
    field!("maxVertexInputAttributes" => U32 max_vertex_input_attributes),
    field!("maxVertexInputBindings" => U32 max_vertex_input_bindings),
    field!("maxVertexInputAttributeOffset" => U32 max_vertex_input_attribute_offset),
    field!("maxVertexInputBindingStride" => U32 max_vertex_input_binding_stride),
    field!("maxVertexOutputComponents" => U32 max_vertex_output_components),
    field!("maxTessellationGenerationLevel" => U32 max_tessellation_generation_level),
    field!("maxTessellationPatchSize" => U32 max_tessellation_patch_size),
    field!("maxTessellationControlPerVertexInputComponents" => U32 max_tessellation_control_per_vertex_input_components),
    field!("maxTessellationControlPerVertexOutputComponents" => U32 max_tessellation_control_per_vertex_output_components),
    field!("maxTessellationControlPerPatchOutputComponents" => U32 max_tessellation_control_per_patch_output_components),
    field!("maxTessellationControlTotalOutputComponents" => U32 max_tessellation_control_total_output_components),
    field!("maxTessellationEvaluationInputComponents" => U32 max_tessellation_evaluation_input_components),
    field!("maxTessellationEvaluationOutputComponents" => U32 max_tessellation_evaluation_output_components),
    field!("maxGeometryShaderInvocations" => U32 max_geometry_shader_invocations),
    field!("maxGeometryInputComponents" => U32 max_geometry_input_components),
    field!("maxGeometryOutputComponents" => U32 max_geometry_output_components),
    field!("maxGeometryOutputVertices" => U32 max_geometry_output_vertices),
    field!("maxGeometryTotalOutputComponents" => U32 max_geometry_total_output_components),
    field!("maxFragmentInputComponents" => U32 max_fragment_input_components),
    field!("maxFragmentOutputAttachments" => U32 max_fragment_output_attachments),
    field!("maxFragmentDualSrcAttachments" => U32 max_fragment_dual_src_attachments),
    field!("maxFragmentCombinedOutputResources" => U32 max_fragment_combined_output_resources),
    field!("maxComputeSharedMemorySize" => U32 max_compute_shared_memory_size),
    field!("maxComputeWorkGroupCount[0]" => U32 max_compute_work_group_count[0]),
    field!("maxComputeWorkGroupCount[1]" => U32 max_compute_work_group_count[1]),
    field!("maxComputeWorkGroupCount[2]" => U32 max_compute_work_group_count[2]),
    field!("maxComputeWorkGroupInvocations" => U32 max_compute_work_group_invocations),
    field!("maxComputeWorkGroupSize[0]" => U32 max_compute_work_group_size[0]),
    field!("maxComputeWorkGroupSize[1]" => U32 max_compute_work_group_size[1]),
    field!("maxComputeWorkGroupSize[2]" => U32 max_compute_work_group_size[2]),
    field!("subPixelPrecisionBits" => U32 sub_pixel_precision_bits),
    field!("subTexelPrecisionBits" => U32 sub_texel_precision_bits),
    field!("mipmapPrecisionBits" => U32 mipmap_precision_bits),
    field!("maxDrawIndexedIndexValue" => U32 max_draw_indexed_index_value),
    field!("maxDrawIndirectCount" => U32 max_draw_indirect_count),
    field!("maxSamplerLodBias" => F32 max_sampler_lod_bias),
    field!("maxSamplerAnisotropy" => F32 max_sampler_anisotropy),
    field!("maxViewports" => U32 max_viewports),
    field!("maxViewportDimensions[0]" => U32 max_viewport_dimensions[0]),
    field!("maxViewportDimensions[1]" => U32 max_viewport_dimensions[1]),
    field!("viewportBoundsRange[0]" => F32 viewport_bounds_range[0]),
    field!("viewportBoundsRange[1]" => F32 viewport_bounds_range[1]),
    field!("viewportSubPixelBits" => U32 viewport_sub_pixel_bits),
    field!("minMemoryMapAlignment" => Size min_memory_map_alignment),
    field!("minTexelBufferOffsetAlignment" => U64 min_texel_buffer_offset_alignment),
    field!("minUniformBufferOffsetAlignment" => U64 min_uniform_buffer_offset_alignment),
    field!("minStorageBufferOffsetAlignment" => U64 min_storage_buffer_offset_alignment),
    field!("minTexelOffset" => I32 min_texel_offset),
    field!("maxTexelOffset" => U32 max_texel_offset),
    field!("minTexelGatherOffset" => I32 min_texel_gather_offset),
    field!("maxTexelGatherOffset" => U32 max_texel_gather_offset),
    field!("minInterpolationOffset" => F32 min_interpolation_offset),
    field!("maxInterpolationOffset" => F32 max_interpolation_offset),
    field!("subPixelInterpolationOffsetBits" => U32 sub_pixel_interpolation_offset_bits),
    field!("maxFramebufferWidth" => U32 max_framebuffer_width),
    field!("maxFramebufferHeight" => U32 max_framebuffer_height),
    field!("maxFramebufferLayers" => U32 max_framebuffer_layers),
    field!("framebufferColorSampleCounts" => SampleCounts framebuffer_color_sample_counts),
    field!("framebufferDepthSampleCounts" => SampleCounts framebuffer_depth_sample_counts),
    field!("framebufferStencilSampleCounts" => SampleCounts framebuffer_stencil_sample_counts),
    field!("framebufferNoAttachmentsSampleCounts" => SampleCounts framebuffer_no_attachments_sample_counts),
    field!("maxColorAttachments" => U32 max_color_attachments),
    field!("sampledImageColorSampleCounts" => SampleCounts sampled_image_color_sample_counts),
    field!("sampledImageIntegerSampleCounts" => SampleCounts sampled_image_integer_sample_counts),
    field!("sampledImageDepthSampleCounts" => SampleCounts sampled_image_depth_sample_counts),
    field!("sampledImageStencilSampleCounts" => SampleCounts sampled_image_stencil_sample_counts),
    field!("storageImageSampleCounts" => SampleCounts storage_image_sample_counts),
    field!("maxSampleMaskWords" => U32 max_sample_mask_words),
    field!("timestampComputeAndGraphics" => U32 timestamp_compute_and_graphics),
    field!("timestampPeriod" => F32 timestamp_period),
    field!("maxClipDistances" => U32 max_clip_distances),
    field!("maxCullDistances" => U32 max_cull_distances),
    field!("maxCombinedClipAndCullDistances" => U32 max_combined_clip_and_cull_distances),
    field!("discreteQueuePriorities" => U32 discrete_queue_priorities),
    field!("pointSizeRange[0]" => F32 point_size_range[0]),
    field!("pointSizeRange[1]" => F32 point_size_range[1]),
    field!("lineWidthRange[0]" => F32 line_width_range[0]),
    field!("lineWidthRange[1]" => F32 line_width_range[1]),
    field!("pointSizeGranularity" => F32 point_size_granularity),
    field!("lineWidthGranularity" => F32 line_width_granularity),
    field!("strictLines" => U32 strict_lines),
    field!("standardSampleLocations" => U32 standard_sample_locations),
    field!("optimalBufferCopyOffsetAlignment" => U64 optimal_buffer_copy_offset_alignment),
    field!("optimalBufferCopyRowPitchAlignment" => U64 optimal_buffer_copy_row_pitch_alignment),
    field!("nonCoherentAtomSize" => U64 non_coherent_atom_size),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let mut seen = HashSet::new();
        for key in PROPERTY_FIELDS.iter().map(|f| f.key).chain(LIMIT_FIELDS.iter().map(|f| f.key)) {
            assert!(seen.insert(key), "duplicate key {key}");
        }
        // 106 members, six of them arrays contributing 14 elements
        assert_eq!(LIMIT_FIELDS.len(), 114);
    }

    #[test]
    fn every_limit_slot_is_distinct() {
        // Writing a unique marker through each accessor must be visible through no other.
        for (i, field) in LIMIT_FIELDS.iter().enumerate() {
            let mut limits = vk::PhysicalDeviceLimits::default();
            assert!(field.slot.assign(&mut limits, field.key, "3"));
            for (j, other) in LIMIT_FIELDS.iter().enumerate() {
                let expected = if i == j { "3" } else { "0" };
                assert_eq!(other.slot.render(&mut limits), expected, "{} leaked into {}", field.key, other.key);
            }
        }
    }
}
