//! Vulkan context management
//!
//! Headless instance, physical device selection and the logical device with
//! a single graphics queue. No surface is created: the scene targets are
//! offscreen images owned by the backend.

use std::ffi::{CStr, CString};

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::vk;
use ash::{Device, Entry, Instance};
use thiserror::Error;

use crate::render::RenderError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::InitializationFailed(reason) => Self::InitializationFailed(reason),
            other => Self::BackendError(other.to_string()),
        }
    }
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// API version the instance was created with
    pub api_version: u32,
    #[cfg(debug_assertions)]
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance without surface extensions
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let available = entry
            .try_enumerate_instance_version()
            .map_err(VulkanError::Api)?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = available.min(vk::API_VERSION_1_2);

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("Application name contains NUL".to_string()))?;
        let engine_name_cstr = CString::new("RenderDevice")
            .map_err(|_| VulkanError::InitializationFailed("Engine name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(api_version);

        let validation = cfg!(debug_assertions) && enable_validation;

        #[allow(unused_mut)]
        let mut extensions: Vec<*const i8> = Vec::new();
        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<CString> = if validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation")
                .map_err(|_| VulkanError::InitializationFailed("Invalid layer name".to_string()))?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        #[cfg(debug_assertions)]
        let debug_utils = if validation {
            let utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&utils)?;
            Some((utils, messenger))
        } else {
            None
        };

        log::info!(
            "[VULKAN] Instance created (API {}.{}, validation: {validation})",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version)
        );

        Ok(Self {
            entry,
            instance,
            api_version,
            #[cfg(debug_assertions)]
            debug_utils,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((utils, messenger)) = self.debug_utils.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Optional features the scene pass can use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    /// Anisotropic filtering
    pub sampler_anisotropy: bool,
    /// Depth clamping
    pub depth_clamp: bool,
    /// Mirror-once sampler addressing
    pub mirror_clamp_to_edge: bool,
    /// Partially bound, update-after-bind sampled image arrays
    pub descriptor_indexing: bool,
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Optional features found on the device
    pub features: DeviceFeatures,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device with a graphics queue, preferring discrete GPUs
    pub fn select_suitable_device(instance: &Instance, api_version: u32) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

        let mut candidates: Vec<Self> = devices
            .into_iter()
            .filter_map(|device| Self::evaluate_device(instance, device, api_version))
            .collect();
        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let info = candidates
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;

        log::info!("[VULKAN] Selected GPU: {} ({:?})", info.name(), info.features);
        Ok(info)
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice, api_version: u32) -> Option<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;

        let base = unsafe { instance.get_physical_device_features(device) };
        let mut features = DeviceFeatures {
            sampler_anisotropy: base.sampler_anisotropy == vk::TRUE,
            depth_clamp: base.depth_clamp == vk::TRUE,
            ..DeviceFeatures::default()
        };

        if api_version >= vk::API_VERSION_1_2 && properties.api_version >= vk::API_VERSION_1_2 {
            let mut vk12 = vk::PhysicalDeviceVulkan12Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut vk12);
            unsafe { instance.get_physical_device_features2(device, &mut features2) };

            features.mirror_clamp_to_edge = vk12.sampler_mirror_clamp_to_edge == vk::TRUE;
            features.descriptor_indexing = vk12.runtime_descriptor_array == vk::TRUE
                && vk12.descriptor_binding_partially_bound == vk::TRUE
                && vk12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
                && vk12.descriptor_binding_update_unused_while_pending == vk::TRUE
                && vk12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE;
        }

        Some(Self {
            device,
            properties,
            features,
            graphics_family,
        })
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl LogicalDevice {
    /// Create the device with every optional feature the GPU offers
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let features = physical.features;
        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(features.sampler_anisotropy)
            .depth_clamp(features.depth_clamp)
            .build();

        let mut vk12 = vk::PhysicalDeviceVulkan12Features::builder()
            .sampler_mirror_clamp_to_edge(features.mirror_clamp_to_edge)
            .runtime_descriptor_array(features.descriptor_indexing)
            .descriptor_binding_partially_bound(features.descriptor_indexing)
            .descriptor_binding_sampled_image_update_after_bind(features.descriptor_indexing)
            .descriptor_binding_update_unused_while_pending(features.descriptor_indexing)
            .shader_sampled_image_array_non_uniform_indexing(features.descriptor_indexing);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_features(&device_features);
        if features.mirror_clamp_to_edge || features.descriptor_indexing {
            create_info = create_info.push_next(&mut vk12);
        }

        let device =
            unsafe { instance.create_device(physical.device, &create_info, None) }.map_err(VulkanError::Api)?;
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            graphics_family: physical.graphics_family,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Core Vulkan objects shared by every backend resource
pub struct VulkanContext {
    /// Selected physical device information
    pub physical_device: PhysicalDeviceInfo,
    /// Logical device for operations
    pub device: LogicalDevice,
    /// Vulkan instance and debug utilities
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create instance and device
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(app_name, enable_validation)?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, instance.api_version)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            physical_device,
            device,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> &Device {
        &self.device.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Optional features enabled on the device
    pub fn features(&self) -> DeviceFeatures {
        self.physical_device.features
    }

    /// Find a memory type index matching `type_filter` with `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let memory_properties =
            unsafe { self.instance().get_physical_device_memory_properties(self.physical_device.device) };

        (0..memory_properties.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0
                    && memory_properties.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}
