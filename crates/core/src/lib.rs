pub mod clock;
pub mod config;
pub mod error;
pub mod priority;
pub mod window;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{env_opt, env_parse, init_tracing, load_dotenv};
pub use error::ConfigError;
pub use priority::Priority;
pub use window::{RingBuffer, SlidingWindow};
