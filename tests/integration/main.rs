//! Integration tests for rescache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from the user's config and state
    fn rescache(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("rescache");
        cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
            .env("XDG_STATE_HOME", home.path().join("state"))
            .env("RESCACHE_CONFIG", home.path().join("config.toml"))
            .env("CI", "1");
        cmd
    }

    fn stdout_of(cmd: &mut Command) -> String {
        let output = cmd.output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("lock-name"))
            .stdout(predicate::str::contains("get"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("rescache"));
    }

    #[test]
    fn lock_name_is_deterministic() {
        let home = TempDir::new().unwrap();

        let first = stdout_of(rescache(&home).args([
            "lock-name",
            "--type",
            "git",
            "--source",
            "uri=https://x/y",
            "--source",
            "branch=main",
            "--resource-version",
            "ref=abc123",
            "--worker",
            "w1",
        ]));
        let reordered = stdout_of(rescache(&home).args([
            "lock-name",
            "--worker",
            "w1",
            "--source-json",
            r#"{"branch":"main","uri":"https://x/y"}"#,
            "--resource-version",
            "ref=abc123",
            "--type",
            "git",
        ]));

        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(first, reordered);
    }

    #[test]
    fn lock_name_differs_per_worker() {
        let home = TempDir::new().unwrap();
        let on = |worker: &str| {
            stdout_of(rescache(&home).args([
                "lock-name",
                "-t",
                "git",
                "-s",
                "uri=https://x/y",
                "-w",
                worker,
            ]))
        };

        assert_ne!(on("w1"), on("w2"));
    }

    #[test]
    fn lock_name_json() {
        let home = TempDir::new().unwrap();
        let out = stdout_of(rescache(&home).args([
            "lock-name",
            "-t",
            "git",
            "-s",
            "uri=https://x/y",
            "--json",
        ]));

        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["worker"], "local");
        assert_eq!(parsed["cache_key"].as_str().unwrap().len(), 64);
        assert_ne!(parsed["cache_key"], parsed["lock_name"]);
    }

    #[test]
    fn lock_name_rejects_empty_type() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["lock-name", "--type", ""])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn find_reports_missing_cache() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["find", "-t", "git", "-s", "uri=https://x/y"])
            .assert()
            .code(1)
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains("Not cached"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[worker]"));
    }

    #[test]
    fn config_set_then_show() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["config", "set", "worker.name", "w9"])
            .assert()
            .success();

        rescache(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("name = \"w9\""));
    }

    #[test]
    fn config_set_unknown_key() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn completions_generate() {
        let home = TempDir::new().unwrap();
        rescache(&home)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rescache"));
    }

    #[test]
    fn invalid_command() {
        let home = TempDir::new().unwrap();
        rescache(&home).arg("invalid-command").assert().failure();
    }
}
