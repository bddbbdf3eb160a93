mod fields;
mod value;

use std::path::{Path, PathBuf};

use ash::vk;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::common::write_c_str;
use crate::config::LayerConfig;

use fields::{LIMIT_FIELDS, PROPERTY_FIELDS};

pub const PROPERTIES_SECTION: &str = "deviceproperties";
pub const LIMITS_SECTION: &str = "devicelimits";

#[derive(thiserror::Error, Debug)]
pub enum DescriptionError {
    #[error("No device description configured")]
    NoPath,
    #[error("Unable to read device description {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed device description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Device description root is not an object")]
    NotAnObject,
}

/// The two overridable sections of an external device description.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    properties: Option<Map<String, Value>>,
    limits: Option<Map<String, Value>>,
}

impl DeviceDescription {
    /// Loads the configured description. Any failure is logged and treated as having nothing
    /// to overlay.
    pub fn load(config: &LayerConfig) -> Option<DeviceDescription> {
        match Self::from_config(config) {
            Ok(description) => Some(description),
            Err(DescriptionError::NoPath) => {
                debug!("no device description configured, reporting driver values");
                None
            }
            Err(err) => {
                warn!("{}, reporting driver values", err);
                None
            }
        }
    }

    pub fn from_config(config: &LayerConfig) -> Result<DeviceDescription, DescriptionError> {
        let path = config.description_path.as_deref().ok_or(DescriptionError::NoPath)?;
        Self::from_path(path)
    }

    pub fn from_path(path: &Path) -> Result<DeviceDescription, DescriptionError> {
        let text = std::fs::read_to_string(path).map_err(|source| DescriptionError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<DeviceDescription, DescriptionError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(root: Value) -> Result<DeviceDescription, DescriptionError> {
        let Value::Object(mut root) = root else {
            return Err(DescriptionError::NotAnObject);
        };

        Ok(DeviceDescription {
            properties: take_section(&mut root, PROPERTIES_SECTION),
            limits: take_section(&mut root, LIMITS_SECTION),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_none() && self.limits.is_none()
    }

    /// Overlays the description onto `properties`. Fields the description does not mention
    /// keep their current values. Returns the number of fields overridden.
    pub fn apply(&self, properties: &mut vk::PhysicalDeviceProperties) -> usize {
        let mut applied = 0;
        if let Some(section) = &self.properties {
            applied += apply_identity(section, properties);
        }
        if let Some(section) = &self.limits {
            applied += fields::apply_fields(section, &mut properties.limits, LIMIT_FIELDS);
        }
        applied
    }
}

fn take_section(root: &mut Map<String, Value>, name: &str) -> Option<Map<String, Value>> {
    match root.remove(name) {
        Some(Value::Object(section)) => Some(section),
        None | Some(Value::Null) => None,
        Some(_) => {
            warn!(section = name, "description section is not an object, ignoring");
            None
        }
    }
}

fn apply_identity(section: &Map<String, Value>, properties: &mut vk::PhysicalDeviceProperties) -> usize {
    let mut applied = fields::apply_fields(section, properties, PROPERTY_FIELDS);

    if value::lookup_text(section, "apiversionraw").is_none() {
        if let Some(text) = value::lookup_text(section, "apiversion") {
            match value::parse_api_version(&text) {
                Some(version) => {
                    properties.api_version = version;
                    applied += 1;
                }
                None => warn!(value = %text, "ignoring malformed apiversion"),
            }
        }
    }

    if let Some(token) = value::lookup_text(section, "devicetype") {
        match device_type_from_token(&token) {
            Some(device_type) => {
                properties.device_type = device_type;
                applied += 1;
            }
            None => warn!(value = %token, "unrecognized devicetype, keeping driver value"),
        }
    }

    if let Some(name) = value::lookup_text(section, "devicename") {
        if !write_c_str(&mut properties.device_name, &name) {
            warn!(name = %name, "devicename exceeds {} bytes, truncated", vk::MAX_PHYSICAL_DEVICE_NAME_SIZE - 1);
        }
        applied += 1;
    }

    applied
}

pub fn device_type_from_token(token: &str) -> Option<vk::PhysicalDeviceType> {
    match token {
        "OTHER" => Some(vk::PhysicalDeviceType::OTHER),
        "INTEGRATED_GPU" => Some(vk::PhysicalDeviceType::INTEGRATED_GPU),
        "DISCRETE_GPU" => Some(vk::PhysicalDeviceType::DISCRETE_GPU),
        "VIRTUAL_GPU" => Some(vk::PhysicalDeviceType::VIRTUAL_GPU),
        "CPU" => Some(vk::PhysicalDeviceType::CPU),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::read_c_str;
    use serde_json::json;
    use std::io::Write;

    fn driver_properties() -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 2, 182),
            driver_version: 2_000_000,
            vendor_id: 0x8086,
            device_id: 0x9bc4,
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension1_d: 16384,
                max_image_dimension2_d: 16384,
                max_compute_work_group_size: [1024, 1024, 64],
                buffer_image_granularity: 64,
                min_memory_map_alignment: 64,
                min_texel_offset: -8,
                max_texel_offset: 7,
                timestamp_period: 83.333,
                point_size_range: [1.0, 255.875],
                framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
                ..Default::default()
            },
            ..Default::default()
        };
        write_c_str(&mut properties.device_name, "Intel(R) UHD Graphics");
        properties
    }

    fn description(value: Value) -> DeviceDescription {
        DeviceDescription::from_value(value).unwrap()
    }

    fn render_limits(limits: &vk::PhysicalDeviceLimits) -> Vec<(&'static str, String)> {
        let mut limits = *limits;
        LIMIT_FIELDS
            .iter()
            .map(|field| (field.key, field.slot.render(&mut limits)))
            .collect()
    }

    #[test]
    fn partial_limits_leave_other_fields_untouched() {
        let overrides = json!({
            "maxImageDimension2D": "8192",
            "bufferImageGranularity": "1024",
            "minTexelOffset": "-16",
            "timestampPeriod": "1.5",
            "maxComputeWorkGroupSize": ["256", "256", "32"],
            "framebufferColorSampleCounts": "15",
        });
        let overridden: Vec<&str> = vec![
            "maxImageDimension2D",
            "bufferImageGranularity",
            "minTexelOffset",
            "timestampPeriod",
            "maxComputeWorkGroupSize[0]",
            "maxComputeWorkGroupSize[1]",
            "maxComputeWorkGroupSize[2]",
            "framebufferColorSampleCounts",
        ];

        let original = driver_properties();
        let mut properties = original;
        let applied = description(json!({ LIMITS_SECTION: overrides })).apply(&mut properties);
        assert_eq!(applied, overridden.len());

        for ((key, before), (_, after)) in render_limits(&original.limits)
            .into_iter()
            .zip(render_limits(&properties.limits))
        {
            if !overridden.contains(&key) {
                assert_eq!(before, after, "{key} changed without an override");
            }
        }

        let limits = &properties.limits;
        assert_eq!(limits.max_image_dimension2_d, 8192);
        assert_eq!(limits.buffer_image_granularity, 1024);
        assert_eq!(limits.min_texel_offset, -16);
        assert_eq!(limits.timestamp_period, 1.5);
        assert_eq!(limits.max_compute_work_group_size, [256, 256, 32]);
        assert_eq!(limits.framebuffer_color_sample_counts.as_raw(), 15);
        assert_eq!(properties.vendor_id, original.vendor_id);
        assert_eq!(read_c_str(&properties.device_name), "Intel(R) UHD Graphics");
    }

    #[test]
    fn identity_fields() {
        let mut properties = driver_properties();
        let applied = description(json!({
            PROPERTIES_SECTION: {
                "vendorid": "4318",
                "deviceid": "7937",
                "driverversionraw": "1823473664",
                "devicetype": "DISCRETE_GPU",
                "devicename": "Spoofed GPU",
                "residencyStandard2DMSBlockShape": "1",
                "residencyNonResidentStrict": true,
            }
        }))
        .apply(&mut properties);

        assert_eq!(applied, 7);
        assert_eq!(properties.vendor_id, 4318);
        assert_eq!(properties.device_id, 7937);
        assert_eq!(properties.driver_version, 1_823_473_664);
        assert_eq!(properties.device_type, vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(read_c_str(&properties.device_name), "Spoofed GPU");
        assert_eq!(properties.sparse_properties.residency_standard2_d_multisample_block_shape, 1);
        assert_eq!(properties.sparse_properties.residency_standard2_d_block_shape, 0);
        assert_eq!(properties.sparse_properties.residency_non_resident_strict, 1);
        assert_eq!(properties.api_version, driver_properties().api_version);
    }

    #[test]
    fn unknown_device_type_is_ignored() {
        let mut properties = driver_properties();
        let applied = description(json!({
            PROPERTIES_SECTION: { "devicetype": "QUANTUM_GPU" }
        }))
        .apply(&mut properties);

        assert_eq!(applied, 0);
        assert_eq!(properties.device_type, vk::PhysicalDeviceType::INTEGRATED_GPU);
    }

    #[test]
    fn long_device_name_is_bounded() {
        let mut properties = driver_properties();
        let name = "X".repeat(400);
        description(json!({ PROPERTIES_SECTION: { "devicename": name } })).apply(&mut properties);

        let stored = read_c_str(&properties.device_name);
        assert_eq!(stored.len(), vk::MAX_PHYSICAL_DEVICE_NAME_SIZE - 1);
        assert_eq!(properties.device_name[vk::MAX_PHYSICAL_DEVICE_NAME_SIZE - 1], 0);
    }

    #[test]
    fn raw_api_version_wins_over_dotted() {
        let mut properties = driver_properties();
        description(json!({
            PROPERTIES_SECTION: { "apiversion": "1.3.209" }
        }))
        .apply(&mut properties);
        assert_eq!(properties.api_version, vk::make_api_version(0, 1, 3, 209));

        let raw = vk::make_api_version(0, 1, 0, 3);
        description(json!({
            PROPERTIES_SECTION: { "apiversion": "1.3.209", "apiversionraw": raw.to_string() }
        }))
        .apply(&mut properties);
        assert_eq!(properties.api_version, raw);
    }

    #[test]
    fn bad_values_and_nulls_are_skipped() {
        let mut properties = driver_properties();
        let applied = description(json!({
            PROPERTIES_SECTION: { "vendorid": null, "deviceid": "not-a-number" },
            LIMITS_SECTION: { "maxImageDimension1D": "-5", "maxImageDimension2D": null },
        }))
        .apply(&mut properties);

        assert_eq!(applied, 0);
        assert_eq!(properties.vendor_id, 0x8086);
        assert_eq!(properties.device_id, 0x9bc4);
        assert_eq!(properties.limits.max_image_dimension1_d, 16384);
        assert_eq!(properties.limits.max_image_dimension2_d, 16384);
    }

    #[test]
    fn missing_sections_are_not_errors() {
        let description = description(json!({ "devicefeatures": { "alphaToOne": "1" } }));
        assert!(description.is_empty());

        let mut properties = driver_properties();
        assert_eq!(description.apply(&mut properties), 0);

        assert!(matches!(
            DeviceDescription::from_value(json!(["not", "an", "object"])),
            Err(DescriptionError::NotAnObject)
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({ LIMITS_SECTION: { "maxImageDimension2D": "8192" } })
        )
        .unwrap();

        let config = LayerConfig {
            description_path: Some(file.path().to_owned()),
        };
        let description = DeviceDescription::load(&config).unwrap();
        let mut properties = driver_properties();
        description.apply(&mut properties);
        assert_eq!(properties.limits.max_image_dimension2_d, 8192);
    }

    #[test]
    fn load_failures_mean_no_overlay() {
        assert!(DeviceDescription::load(&LayerConfig::default()).is_none());

        let missing = LayerConfig {
            description_path: Some(PathBuf::from("/nonexistent/spoof/device.json")),
        };
        assert!(DeviceDescription::load(&missing).is_none());
        assert!(matches!(
            DeviceDescription::from_config(&missing),
            Err(DescriptionError::Io { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            DeviceDescription::from_path(file.path()),
            Err(DescriptionError::Json(_))
        ));
    }
}
