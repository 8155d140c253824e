pub mod error;
pub mod ingress;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod settings;
pub mod store;

pub use error::{ConfigError, Result, ValidationErrors};
pub use ingress::{ControllerOptions, IngressController, ListWatch};
pub use lifecycle::{Shutdown, StopSignal};
pub use logging::{init_logging, LoggingError};
pub use model::{Config, ConfigDescriptor, ConfigEvent, ConfigKind, ConfigPayload, Event};
pub use monitor::{ConfigsMonitor, MonitorState};
pub use registry::{Handler, HandlerRegistry};
pub use settings::{load_settings, load_settings_from_str, Settings, SettingsError};
pub use store::{ConfigStore, ConfigStoreCache, MemoryStore};
