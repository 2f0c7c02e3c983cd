//! Ambient configuration loading: reads `ralph.config.json` off disk and
//! folds it into a [`GateConfig`] (`spec.md` §6).

use std::path::Path;

use crate::gate_config::GateConfig;
use crate::gate_config::apply_config_file;

pub const CONFIG_FILE_NAME: &str = "ralph.config.json";

/// Builds a [`GateConfig`] from defaults, then layers `ralph.config.json`
/// from `dir` on top if present. Missing file is not an error — it just
/// means run with defaults, same as malformed JSON (`spec.md` §7).
pub fn load_gate_config(dir: &Path) -> GateConfig {
    let mut config = GateConfig::new();
    let path = dir.join(CONFIG_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(contents) => apply_config_file(&mut config, &contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
        }
    }
    config
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::GateAction;
    use crate::types::GateCategory;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_gate_config(dir.path());
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Gate);
    }

    #[test]
    fn present_config_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"approval_gates":{"enabled":true,"categories":{"shell":"allow"}}}"#,
        )
        .unwrap();
        let config = load_gate_config(dir.path());
        assert_eq!(config.action_for(GateCategory::Shell), GateAction::Allow);
    }
}
