pub mod env_helper;
mod local_config;
mod reference;

pub use local_config::{LocalConfig, DEFAULT_BLOCK_SAFETY_MARGIN, DEFAULT_INDUSTRY_SHARE};
pub use reference::{ProtocolReference, ReferenceData};
