use blockflow::app::{plan, PlannedStep};
use blockflow::config::StoreBackend;
use blockflow::utils::validation::Validate;
use blockflow::{AppConfig, FlowError};
use std::io::Write;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[server]
bind = "127.0.0.1:9000"

[sandbox]
image = "runner_image"
network = "sealed"
exec_timeout_secs = 5

[llm]
base_url = "http://localhost:8080/v1"
api_key = "${BLOCKFLOW_IT_LLM_KEY}"
temperature = 0.2

[store]
backend = "redis"
url = "redis://cache:6379"

[[auth.users]]
token = "alice_token"
username = "alice"

[bootstrap]
build_image = false
eager_sandbox = true

[[bootstrap.daemons]]
name = "cache"
command = ["redis-server", "redis-server.conf"]
ready_addr = "127.0.0.1:6379"

[[bootstrap.services]]
name = "gateway"
command = ["blockflow", "serve"]
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_config_file() {
    std::env::set_var("BLOCKFLOW_IT_LLM_KEY", "sk-from-env");
    let file = write_config(CONFIG);

    let config = AppConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.bind, "127.0.0.1:9000");
    assert_eq!(config.sandbox.image, "runner_image");
    assert_eq!(config.sandbox.memory, "100m");
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-from-env"));
    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.auth.users.len(), 1);
    assert_eq!(config.bootstrap.daemons[0].ready_timeout_secs, 30);
}

#[test]
fn test_plan_from_config_file() {
    let file = write_config(CONFIG);
    let config = AppConfig::from_file(file.path()).unwrap();

    let steps = plan(&config);
    let names: Vec<String> = steps.iter().map(PlannedStep::name).collect();
    assert_eq!(names, vec!["daemon:cache", "network", "sandbox", "service:gateway"]);

    let network = steps[1].describe("docker");
    assert_eq!(
        network,
        "docker network inspect sealed || docker network create --internal --driver bridge sealed"
    );
    match &steps[2] {
        PlannedStep::StartSandbox { args } => {
            assert_eq!(args[..2], ["run", "-d"]);
            assert!(args.contains(&"runner_image".to_string()));
        }
        other => panic!("unexpected step {:?}", other),
    }
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config("[llm]\ntemperature = 3.5\n");
    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(FlowError::InvalidConfigValueError { ref field, .. }) if field == "llm.temperature"
    ));

    let file = write_config("[server]\nbind = \"not an address\"\n");
    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());

    assert!(matches!(
        AppConfig::from_file("/definitely/missing/blockflow.toml"),
        Err(FlowError::ConfigError { .. })
    ));
}

#[test]
fn test_example_config_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
    let example = AppConfig::from_file(&path).unwrap();
    example.validate().unwrap();

    let defaults = AppConfig::default();
    let commands = |config: &AppConfig| -> Vec<(String, Vec<String>)> {
        config
            .bootstrap
            .services
            .iter()
            .map(|s| (s.name.clone(), s.command.clone()))
            .chain(config.bootstrap.daemons.iter().map(|d| (d.name.clone(), d.command.clone())))
            .collect()
    };
    assert_eq!(commands(&example), commands(&defaults));
    assert_eq!(plan(&example), plan(&defaults));
}
