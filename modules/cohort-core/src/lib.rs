pub mod config;
pub mod error;
pub mod exchange;
pub mod file_config;
pub mod registry;
pub mod validator;

pub use config::EnvOverrides;
pub use error::{ConfigError, ReplicationError, ReplicationResult, ValidationError};
pub use exchange::{ExchangeRule, ExchangeRuleEngine, ExchangeRuleKind, RuleSettings};
pub use file_config::{load_config, FileConfig, IdentityConfig};
pub use registry::{ActiveTypeRegistry, TypeActivity};
pub use validator::{HeaderValidator, InstanceValidator};
