//! Package installation against a scripted transport.

use anyhow::Result;
use shellgate_core::api::ConsoleApi;
use shellgate_core::error::ErrorKind;
use shellgate_core::executor::CommandResult;
use shellgate_core::packages::{InstallOutcome, PackageEnvironmentManager};
use shellgate_core::redact::Redactor;
use shellgate_core::test_utils::{FakeTransport, console_with, engine_with, open_target};
use shellgate_core::{PathExpr, Target};
use std::sync::Arc;

const DISCOVERED: &str = "/home/deploy/venv\n/home/deploy\n";
const MANIFEST: &str = "# bot\nFlask==3.0.0\nrequests>=2\n-r base.txt\n";

/// Answers discovery, `pip list`, `cat` of the manifest and the installer.
fn pip_host(installed: &'static str, installer: CommandResult) -> Arc<FakeTransport> {
    Arc::new(FakeTransport::new(move |command| {
        let result = if command.contains("pyvenv.cfg") {
            CommandResult::new(0, DISCOVERED, "")
        } else if command.contains(" list --format=json") {
            CommandResult::new(0, installed, "")
        } else if command.starts_with("cat -- ") {
            CommandResult::new(0, MANIFEST, "")
        } else if command.contains(" install ") {
            installer.clone()
        } else {
            CommandResult::new(127, "", "unexpected command")
        };
        Ok(result)
    }))
}

fn manager(transport: Arc<FakeTransport>) -> PackageEnvironmentManager {
    PackageEnvironmentManager::new(
        engine_with(transport),
        shellgate_core::config::default_presets(),
    )
}

fn installer_runs(transport: &FakeTransport) -> Vec<String> {
    transport
        .commands()
        .into_iter()
        .filter(|c| c.contains(" install "))
        .collect()
}

fn target() -> Target {
    open_target("web-1")
}

#[tokio::test]
async fn environment_is_discovered_once_and_cached() -> Result<()> {
    let transport = pip_host("[]", CommandResult::new(0, "", ""));
    let manager = manager(transport.clone());

    let env = manager.ensure_environment(&target()).await?;
    assert_eq!(env, PathExpr::HomeRelative("venv".into()));

    manager.ensure_environment(&target()).await?;
    let discovery = transport.commands();
    assert_eq!(discovery.len(), 2);
    // The second lookup checks the cached environment first.
    assert!(discovery[1].contains("~/'venv/bin/python'"));
    Ok(())
}

#[tokio::test]
async fn installs_only_missing_packages() -> Result<()> {
    let transport = pip_host(
        r#"[{"name": "Flask", "version": "3.0.0"}]"#,
        CommandResult::new(0, "Successfully installed requests-2.31.0 urllib3-2.2.1\n", ""),
    );
    let manager = manager(transport.clone());

    let names = vec!["flask".to_string(), "requests".to_string()];
    let report = manager.install(&target(), &names, None).await?;

    assert_eq!(report.outcome, InstallOutcome::Installed);
    assert_eq!(report.already_installed, vec!["flask"]);
    assert_eq!(report.installed, vec!["requests"]);
    assert!(report.failed.is_empty());

    let runs = installer_runs(&transport);
    assert_eq!(runs.len(), 1);
    assert!(runs[0].starts_with("~/'venv/bin/python' -m pip install"));
    assert!(runs[0].ends_with(" 'requests'"));
    Ok(())
}

#[tokio::test]
async fn manifest_install_is_idempotent() -> Result<()> {
    let transport = pip_host(
        r#"[{"name": "flask", "version": "3.0.0"}, {"name": "requests", "version": "2.31.0"}]"#,
        CommandResult::new(0, "", ""),
    );
    let manager = manager(transport.clone());

    for _ in 0..2 {
        let report = manager
            .install_from_manifest(&target(), "requirements.txt", None)
            .await?;
        assert!(report.all_already_installed);
        assert_eq!(report.outcome, InstallOutcome::AllAlreadyInstalled);
        assert_eq!(report.already_installed, vec!["flask", "requests"]);
        assert!(report.output.is_empty());
    }
    assert!(installer_runs(&transport).is_empty());
    Ok(())
}

#[tokio::test]
async fn silent_installer_is_unclear_not_success() -> Result<()> {
    let transport = pip_host("[]", CommandResult::new(0, "Looking in indexes: https://pypi.org/simple\n", ""));
    let console: ConsoleApi = console_with(engine_with(transport), Redactor::default());

    let response = console
        .install(&target(), &["requests".to_string()], None)
        .await;
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::AmbiguousInstallOutcome));
    let report = response.report.expect("report is kept");
    assert_eq!(report.outcome, InstallOutcome::Unclear);
    assert_eq!(report.unconfirmed, vec!["requests"]);
    Ok(())
}

#[tokio::test]
async fn partial_failure_separates_the_three_sets() -> Result<()> {
    let transport = pip_host(
        r#"[{"name": "numpy", "version": "1.26.4"}]"#,
        CommandResult::new(
            1,
            "Successfully installed pandas-2.2.0\n",
            "ERROR: No matching distribution found for matplotlibb\n",
        ),
    );
    let manager = manager(transport);

    let names: Vec<String> = ["numpy", "pandas", "matplotlibb"].map(String::from).to_vec();
    let report = manager.install(&target(), &names, None).await?;
    assert_eq!(report.outcome, InstallOutcome::PartiallyFailed);
    assert_eq!(report.already_installed, vec!["numpy"]);
    assert_eq!(report.installed, vec!["pandas"]);
    assert_eq!(report.failed, vec!["matplotlibb"]);
    assert_eq!(report.errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn option_like_names_never_reach_the_installer() {
    let transport = pip_host("[]", CommandResult::new(0, "", ""));
    let manager = manager(transport.clone());

    let names = vec!["--index-url=https://evil.example".to_string()];
    let err = manager.install(&target(), &names, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(transport.commands().is_empty());
}

#[tokio::test]
async fn unknown_preset_is_not_found() {
    let transport = pip_host("[]", CommandResult::new(0, "", ""));
    let manager = manager(transport);
    let err = manager
        .install_preset(&target(), "no-such-preset", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn uninstall_reports_missing_packages() {
    let transport = Arc::new(FakeTransport::new(|command| {
        if command.contains("pyvenv.cfg") {
            Ok(CommandResult::new(0, DISCOVERED, ""))
        } else {
            Ok(CommandResult::new(
                0,
                "",
                "WARNING: Skipping nosuchpkg as it is not installed.\n",
            ))
        }
    }));
    let manager = manager(transport);
    let err = manager.uninstall(&target(), "nosuchpkg").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
