//! File names and the starter template for taskwire configuration

/// Primary config file name
pub const DEFAULT_CONFIG_TOML: &str = "taskwire.toml";

/// YAML alternative to [`DEFAULT_CONFIG_TOML`]
pub const DEFAULT_CONFIG_YAML: &str = "taskwire.yaml";

/// Hidden variant, checked last
pub const ALT_CONFIG_FILE: &str = ".taskwire.toml";

const CONFIG_FILE_NAMES: [&str; 3] = [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_YAML, ALT_CONFIG_FILE];

/// Names probed in each directory, highest priority first
pub fn config_file_names() -> &'static [&'static str] {
    &CONFIG_FILE_NAMES
}

/// Starter config with every option at its default value
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# taskwire configuration

[tasks]
# Run independent tasks of a layer concurrently
parallel = true
# What to do when a task name is registered twice: "replace" or "reject"
duplicates = "replace"
# Abort sibling tasks of a layer as soon as one of them fails
cancel_on_failure = false
# Forward plan/progress messages to tracing
log_plan = false
"#;
