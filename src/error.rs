use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("no layer link info in the create-info pNext chain")]
    MissingLayerLink,
    #[error("downstream function unavailable: {0}")]
    MissingFunction(&'static str),
    #[error("Vulkan error: {0}")]
    Vk(#[from] vk::Result),
}

pub type Result<T> = std::result::Result<T, LayerError>;

impl From<LayerError> for vk::Result {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::MissingLayerLink | LayerError::MissingFunction(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            LayerError::Vk(result) => result,
        }
    }
}
