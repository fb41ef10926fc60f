mod bridge;
mod errors;
mod params;
mod ready;
mod utils;
mod worker;
mod worker_template;

pub use bridge::SQLiteBridge;
pub use errors::SQLiteBridgeError;
pub use worker_template::{
    generate_worker_script, WorkerOptions, DEFAULT_LOG_LEVEL, DEFAULT_MODULE_URL,
    DEFAULT_WASM_URL,
};
