pub mod barrier;
pub mod settings;

pub use barrier::{BarrierConfig, DEFAULT_BROKER_URL, DEFAULT_QUANTUM};
pub use settings::{Settings, SettingsError};
