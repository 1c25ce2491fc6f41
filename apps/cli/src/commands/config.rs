//! Config command implementation.

use huddle_core::HuddleConfig;

/// Execute the config command.
///
/// Prints the effective configuration as TOML, or JSON with `--json`.
pub fn execute(config: &HuddleConfig, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
