pub mod boot;
pub mod button;
pub mod config;
pub mod error;
pub mod page;
pub mod router;
pub mod store;
pub mod switch;
pub mod types;

pub use button::{ButtonDebouncer, ButtonEvent, ButtonPhase};
pub use config::{ButtonConfig, OutputPolarity, RuntimeConfig, SwitchConfig};
pub use error::{ConfigError, OutputError, StoreError, SwitchError};
pub use router::{parse_command, press_button, route, Response};
pub use store::{MemoryStore, NonVolatileStore};
pub use switch::{RelayOutput, RelaySwitch};
pub use types::{BootReport, Command, RelayState, Transition};
