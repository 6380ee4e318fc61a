//! Scheduled commands on a real tokio scheduler, and whole-process wiring
//! from a configuration file

mod common;

use common::{builtin_manager, seed, write_config};
use plugrack::app::startup::Application;
use plugrack::core::config::{ConfigError, Settings};
use plugrack::plugin::api::{HeartbeatPlugin, NewPlugin, PluginKey};
use plugrack::scheduler::api::{NewSchedule, ScheduleManager, TokioScheduler, TriggerOutcome};
use plugrack::store::ScheduleStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interval_schedule_beats_heartbeat() {
    let (manager, store) = builtin_manager();
    let runner = Arc::new(TokioScheduler::new());
    let schedules = ScheduleManager::new(manager.clone(), store.clone(), runner.clone());
    schedules.start().await.unwrap();

    let record = seed(&store, NewPlugin::new("service", "heartbeat", "pulse")).await;
    manager.get_or_create_record(&record).await.unwrap().unwrap();
    let schedule = store
        .create_schedule(NewSchedule::new(record.id, "interval", "seconds=1", "beat").with_enabled(true))
        .await
        .unwrap();
    assert_eq!(runner.job_ids(), vec![format!("scheduler_{}", schedule.id)]);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let pulse = manager.lookup(&PluginKey::new("service", "pulse")).unwrap();
    let beats = pulse.downcast::<HeartbeatPlugin>().unwrap().beats();
    assert!(beats >= 1, "heartbeat beat {beats} times");

    // disabling removes the job, so the count stops moving
    let mut disabled = schedule.clone();
    disabled.enabled = false;
    store.save_schedule(&disabled).await.unwrap();
    assert!(runner.job_ids().is_empty());
    let settled = pulse.downcast::<HeartbeatPlugin>().unwrap().beats();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(pulse.downcast::<HeartbeatPlugin>().unwrap().beats(), settled);

    schedules.stop();
    runner.shutdown();
}

#[tokio::test]
async fn test_trigger_outcome_for_builtin_command() {
    let (manager, store) = builtin_manager();
    let runner = Arc::new(TokioScheduler::new());
    let schedules = ScheduleManager::new(manager.clone(), store.clone(), runner.clone());

    let record = seed(
        &store,
        NewPlugin::new("service", "heartbeat", "pulse").with_config(json!({"message": "tick"})),
    )
    .await;
    let schedule = store
        .create_schedule(NewSchedule::new(record.id, "cron", "*/10", "beat").with_enabled(true))
        .await
        .unwrap();

    assert_eq!(
        schedules.trigger_schedule(schedule.id).await,
        TriggerOutcome::Executed(json!({"beats": 1, "message": "tick"}))
    );
    runner.shutdown();
}

#[tokio::test]
async fn test_application_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[plugins]
initialization_order = ["storage", "service"]

[logging]
level = "debug"
format = "ext"

[[seed.plugins]]
name = "primary"
plugin_type = "storage"
plugin_name = "memory"

[[seed.plugins]]
name = "pulse"
plugin_type = "service"
plugin_name = "heartbeat"
config = { storage = "primary" }

[[seed.schedules]]
plugin = "pulse"
plugin_type = "service"
method = "cron"
method_config = "0 */15"
command = "beat"
"#,
    );

    let settings = Settings::load(Some(path.as_path())).await.unwrap();
    assert_eq!(settings.logging.level, "debug");

    let app = Application::build(settings).await.unwrap();
    assert_eq!(app.start().await.unwrap(), 2);
    assert_eq!(app.job_count(), 1);

    app.shutdown().await;
    assert!(app.plugins.loaded_keys().is_empty());
    assert!(app.runner.job_ids().is_empty());
}

#[tokio::test]
async fn test_explicit_config_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = Settings::load(Some(missing.as_path())).await.unwrap_err();
    assert!(matches!(err, ConfigError::Missing { .. }));
}

#[tokio::test]
async fn test_bootstrap_order_failure_surfaces_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[plugins]
initialization_order = ["service", "storage"]

[[seed.plugins]]
name = "primary"
plugin_type = "storage"
plugin_name = "memory"

[[seed.plugins]]
name = "pulse"
plugin_type = "service"
plugin_name = "heartbeat"
config = { storage = "primary" }
"#,
    );

    let app = Application::build(Settings::load(Some(path.as_path())).await.unwrap())
        .await
        .unwrap();
    let err = app.start().await.unwrap_err();
    assert!(err.to_string().contains("not loaded"), "{err}");
    app.shutdown().await;
}
