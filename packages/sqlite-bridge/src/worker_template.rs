use serde::Deserialize;

/// Published location of the worker-side module built from `sqlite-bridge-core`.
pub const DEFAULT_MODULE_URL: &str =
    "https://unpkg.com/sqlite-bridge-core@0.1.0/sqlite_bridge_core.js";
pub const DEFAULT_WASM_URL: &str =
    "https://unpkg.com/sqlite-bridge-core@0.1.0/sqlite_bridge_core_bg.wasm";
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Where the worker loads its engine from, and how loudly it logs.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkerOptions {
    #[serde(default)]
    pub module_url: Option<String>,
    #[serde(default)]
    pub wasm_url: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl WorkerOptions {
    pub fn module_url(&self) -> &str {
        non_blank(&self.module_url).unwrap_or(DEFAULT_MODULE_URL)
    }

    pub fn wasm_url(&self) -> &str {
        non_blank(&self.wasm_url).unwrap_or(DEFAULT_WASM_URL)
    }

    pub fn log_level(&self) -> &str {
        non_blank(&self.log_level).unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn validate(&self) -> Result<(), String> {
        let level = self.log_level().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "logLevel must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level()
            ));
        }
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Generate the bootstrap script for the worker. Values are JSON-encoded
/// so they embed as JS string literals.
pub fn generate_worker_script(options: &WorkerOptions) -> String {
    let encode = |value: &str| {
        serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
    };
    let level = encode(&options.log_level().to_ascii_lowercase());
    let module_url = encode(options.module_url());
    let wasm_url = encode(options.wasm_url());

    format!(
        r#"self.__SQLITE_BRIDGE_LOG_LEVEL = {level};
const reportStartupFailure = (err) => {{
  const error = String((err && err.message) || err);
  self.postMessage({{ type: "worker-error", error }});
}};
try {{
  importScripts({module_url});
  wasm_bindgen({{ module_or_path: {wasm_url} }})
    .then(() => wasm_bindgen.worker_main())
    .catch(reportStartupFailure);
}} catch (err) {{
  reportStartupFailure(err);
}}
"#
    )
}
