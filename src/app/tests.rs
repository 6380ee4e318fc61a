//! Application wiring tests

use crate::app::seed::seed_store;
use crate::app::startup::Application;
use crate::core::config::Settings;
use crate::plugin::api::PluginKey;
use crate::store::{MemoryStore, PluginStore, ScheduleStore};

const SEEDED: &str = r#"
[scheduler]
job_id_prefix = "job-"

[[seed.plugins]]
id = 10
name = "primary"
plugin_type = "storage"
plugin_name = "memory"
config = { namespace = "main" }

[[seed.plugins]]
name = "pulse"
plugin_type = "service"
plugin_name = "heartbeat"
config = { message = "ping", storage = "primary" }

[[seed.plugins]]
name = "spare"
plugin_type = "storage"
plugin_name = "memory"
enabled = false

[[seed.schedules]]
plugin = "pulse"
plugin_type = "service"
method = "interval"
method_config = "minutes=5"
command = "beat"
plugin_unique_id = "pulse"

[[seed.schedules]]
plugin = "primary"
plugin_type = "storage"
method = "cron"
method_config = "0 0 3"
command = "clear"
enabled = false
"#;

#[tokio::test]
async fn test_seed_store_is_idempotent_for_unique_schedules() {
    let settings = Settings::from_toml_str(SEEDED).unwrap();
    let store = MemoryStore::new();

    let summary = seed_store(&store, &settings.seed).await.unwrap();
    assert_eq!(summary.plugins, 3);
    assert_eq!(summary.schedules, 2);

    let primary = store.find_plugin("storage", "primary").await.unwrap().unwrap();
    assert_eq!(primary.id, 10);
    let schedules = store.list_schedules(primary.id, None).await.unwrap();
    assert_eq!(schedules.len(), 1);
    assert!(!schedules[0].enabled);
}

#[tokio::test]
async fn test_application_start_and_shutdown() {
    let settings = Settings::from_toml_str(SEEDED).unwrap();
    let app = Application::build(settings).await.unwrap();

    assert_eq!(app.start().await.unwrap(), 2);
    assert_eq!(
        app.plugins.loaded_keys(),
        vec![PluginKey::new("storage", "primary"), PluginKey::new("service", "pulse")]
    );
    assert_eq!(app.job_count(), 1);
    assert_eq!(app.runner.job_ids().len(), 1);
    assert!(app.runner.job_ids()[0].starts_with("job-"));

    app.shutdown().await;
    assert!(app.plugins.loaded_keys().is_empty());
    assert_eq!(app.job_count(), 0);
    assert!(app.runner.job_ids().is_empty());
}

#[tokio::test]
async fn test_scheduler_can_be_disabled() {
    let mut settings = Settings::from_toml_str(SEEDED).unwrap();
    settings.scheduler.enabled = false;
    let app = Application::build(settings).await.unwrap();

    assert_eq!(app.start().await.unwrap(), 2);
    assert!(app.schedules.is_none());
    assert_eq!(app.job_count(), 0);
    app.shutdown().await;
}
