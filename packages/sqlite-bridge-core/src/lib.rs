mod bridge;
mod engine;
mod errors;
mod messages;
pub mod params;
mod session;
pub mod util;

#[cfg(target_arch = "wasm32")]
mod database;
#[cfg(target_arch = "wasm32")]
mod worker;

#[cfg(test)]
mod testing;

pub use bridge::WorkerBridge;
pub use engine::*;
pub use errors::BridgeError;
pub use messages::*;
pub use session::{Session, SessionStatus};

#[cfg(target_arch = "wasm32")]
pub use database::{SQLiteDatabase, SQLiteLoader};
#[cfg(target_arch = "wasm32")]
pub use worker::LOG_LEVEL_GLOBAL;

// Export the worker entry point
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
pub fn worker_main() {
    console_error_panic_hook::set_once();
    if let Err(err) = worker::main() {
        worker::report_startup_failure(&err);
    }
}
