use rt_utils::DeviceError;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Everything that can stop the renderer from being built or from rendering a frame.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{stage}: {source}")]
    Device {
        stage: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("program binary for module {module} could not be read from {path}")]
    MissingProgram { module: &'static str, path: String },
    #[error("invalid scene: {0}")]
    InvalidScene(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Wraps a device error with the stage it happened in and logs it.
///
/// ```ignore
/// device.synchronize().map_err(device_error("render"))?;
/// ```
pub fn device_error(stage: &'static str) -> impl FnOnce(DeviceError) -> RenderError {
    move |source| {
        log::error!("{} failed: {}", stage, source);
        RenderError::Device { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_keeps_operation_and_code() {
        let error = device_error("pipeline")(DeviceError::Call {
            operation: "link_pipeline",
            code: 7251,
            message: "link failed".to_string(),
        });
        let text = error.to_string();
        assert!(text.starts_with("pipeline: "));
        assert!(text.contains("link_pipeline"));
        assert!(text.contains("7251"));
    }
}
