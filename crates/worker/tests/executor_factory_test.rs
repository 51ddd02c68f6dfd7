use operations_core::config::ExecutorConfig;
use operations_core::errors::OperationsError;
use operations_worker::create_backend;

#[test]
fn test_creates_configured_backend() {
    let mut config = ExecutorConfig::default();
    assert_eq!(create_backend(&config).unwrap().name(), "simulated");

    config.backend = "shell".to_string();
    assert_eq!(create_backend(&config).unwrap().name(), "shell");

    config.backend = "agent".to_string();
    config.agent.url = Some("http://127.0.0.1:9100/tasks".to_string());
    assert_eq!(create_backend(&config).unwrap().name(), "agent");
}

#[test]
fn test_unknown_backend_is_rejected() {
    let config = ExecutorConfig {
        backend: "ssh".to_string(),
        ..ExecutorConfig::default()
    };
    assert!(matches!(
        create_backend(&config).err().unwrap(),
        OperationsError::Configuration(_)
    ));
}
