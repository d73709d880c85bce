//! End-to-end lifecycle against a host configured from TOML, with the
//! file-backed status store and the shell collaborators.

use std::fs;
use std::sync::Arc;

use ext_core::{ErrorCode, ExtensionsConfig, LifecycleService};
use ext_test_utils::{ExtensionFixture, RecordingRegistrar, TestHost};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn write_config(host: &TestHost) -> std::path::PathBuf {
    let path = host.root().join("extensions.toml");
    let content = format!(
        r#"base_path = {:?}
protected = {{ Themes = "classic" }}
load_order = ["addon"]
switch_types = ["themes"]

[paths]
Modules = "modules"
Themes = "themes"
"#,
        host.root().display().to_string()
    );
    fs::write(&path, content).unwrap();
    path
}

fn populate(host: &TestHost) {
    host.add_extension("modules", ExtensionFixture::new("base"));
    host.add_extension("modules", ExtensionFixture::new("addon").requires(["base"]));
    host.add_extension("themes", ExtensionFixture::new("alpha"));
    host.add_extension("themes", ExtensionFixture::new("beta"));
    host.add_extension("themes", ExtensionFixture::new("classic"));
}

fn service(config: ExtensionsConfig) -> (LifecycleService, Arc<RecordingRegistrar>) {
    let registrar = Arc::new(RecordingRegistrar::new());
    let service = LifecycleService::builder(config, registrar.clone()).build();
    (service, registrar)
}

fn read_statuses(host: &TestHost) -> Value {
    let content = fs::read_to_string(host.root().join("storage/extensions.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn test_state_survives_restart() {
    let host = TestHost::new();
    populate(&host);
    let config = ExtensionsConfig::load(&write_config(&host)).unwrap();

    let (service, _) = service(config.clone());
    assert!(service.enable("base").is_success());
    assert!(service.enable("addon").is_success());
    assert!(service.enable("classic").is_success());
    assert!(service.enable("alpha").is_success());

    let switched = service.enable("beta");
    assert!(switched.is_success());
    assert_eq!(switched.string_list("switched_off"), vec!["alpha"]);

    let on_disk = read_statuses(&host);
    assert_eq!(on_disk["beta"]["enabled"], Value::Bool(true));
    assert_eq!(on_disk["beta"]["type"], Value::String("Themes".into()));
    assert_eq!(on_disk["alpha"]["enabled"], Value::Bool(false));
    assert_eq!(on_disk["classic"]["enabled"], Value::Bool(true));

    let (restarted, registrar) = self::service(config);
    assert_eq!(restarted.bootstrapper().warmup().unwrap(), 4);
    assert_eq!(
        registrar.registered_ids(),
        vec!["addon", "base", "beta", "classic"]
    );
    assert_eq!(restarted.enabled().unwrap().len(), 4);
}

#[test]
fn test_protection_rules_from_toml() {
    let host = TestHost::new();
    populate(&host);
    let config = ExtensionsConfig::load(&write_config(&host)).unwrap();
    let (service, _) = service(config);

    service.enable("classic");
    assert!(service.is_protected("classic"));
    assert!(service.delete("classic").has_code(ErrorCode::Protected));
    assert!(service.disable("classic").is_success());
    host.assert_exists("themes/classic");
}

#[test]
fn test_delete_removes_directory_and_record() {
    let host = TestHost::new();
    populate(&host);
    let config = ExtensionsConfig::load(&write_config(&host)).unwrap();
    let (service, _) = service(config);
    service.enable("alpha");

    let result = service.delete("alpha");
    assert!(result.is_success(), "{}", result.message);
    host.assert_missing("themes/alpha");
    assert!(read_statuses(&host).get("alpha").is_none());
    assert!(service.get("alpha").unwrap().is_none());
}

#[test]
fn test_discover_prunes_file_records() {
    let host = TestHost::new();
    populate(&host);
    fs::create_dir_all(host.root().join("storage")).unwrap();
    fs::write(
        host.root().join("storage/extensions.json"),
        r#"{"ghost": {"enabled": true, "type": "Modules"}, "base": {"enabled": true, "type": "Modules"}}"#,
    )
    .unwrap();
    let config = ExtensionsConfig::load(&write_config(&host)).unwrap();
    let (service, _) = service(config);

    let result = service.discover();
    assert_eq!(result.string_list("removed_orphaned"), vec!["ghost"]);

    let on_disk = read_statuses(&host);
    assert!(on_disk.get("ghost").is_none());
    assert_eq!(on_disk["base"]["enabled"], Value::Bool(true));
}

#[test]
fn test_corrupt_status_file_becomes_exception() {
    let host = TestHost::new();
    populate(&host);
    fs::create_dir_all(host.root().join("storage")).unwrap();
    fs::write(host.root().join("storage/extensions.json"), "{ not json").unwrap();
    let config = ExtensionsConfig::load(&write_config(&host)).unwrap();
    let (service, _) = service(config);

    let result = service.enable("base");
    assert!(result.has_code(ErrorCode::Exception));
    assert!(result.message.starts_with("Failed to enable extension:"));
}

#[cfg(unix)]
mod shell_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INDEX_WRITER: &str = r#"mkdir -p vendor && printf '%s' '{"packages":[{"name":"acme/payments","version":"1.5.0"}]}' > vendor/installed.json"#;

    fn shop_host() -> TestHost {
        let host = TestHost::new();
        host.add_extension(
            "modules",
            ExtensionFixture::new("shop").package("acme/payments", "^1.0"),
        );
        host
    }

    #[test]
    fn test_shell_installer_populates_index() {
        let host = shop_host();
        let mut config = host.config();
        config.installer.command = INDEX_WRITER.to_string();
        let (service, _) = service(config);

        assert_eq!(service.missing_packages("shop"), vec!["acme/payments"]);
        let result = service.enable("shop");
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(result.string_list("packages"), vec!["acme/payments"]);
        host.assert_exists("vendor/installed.json");
        assert!(service.missing_packages("shop").is_empty());
    }

    #[test]
    fn test_failing_installer_command() {
        let host = shop_host();
        let mut config = host.config();
        config.installer.command = "exit 3".to_string();
        let (service, _) = service(config);

        let result = service.enable("shop");
        assert!(result.has_code(ErrorCode::InstallFailed));
        assert!(service.enabled().unwrap().is_empty());
    }

    #[test]
    fn test_command_migrator_receives_extension_env() {
        let host = TestHost::new();
        host.add_extension("modules", ExtensionFixture::new("crm").with_migrations());
        let mut config = host.config();
        config.migrations.command =
            Some(r#"printf '%s\n' "$EXTENSION_ID" >> migrated.log && test -d "$EXTENSION_MIGRATIONS_DIR""#.to_string());
        let (service, _) = service(config);

        let result = service.install("crm");
        assert_eq!(result.message, "Extension installed with migrations");
        let log = fs::read_to_string(host.root().join("migrated.log")).unwrap();
        assert_eq!(log, "crm\n");
    }
}
