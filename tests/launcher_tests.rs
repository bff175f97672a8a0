//! Launch resolution: descriptor parsing, shell fallback, relay command
//! construction, shebang handling and environment assembly

use muxd::config::Config;
use muxd::launcher::{
    build_environment, build_launch_spec, parse_connection_descriptor, ConnectionParams,
    LaunchRequest,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    Config::with_files_dir(tmp.path().join("files"))
}

fn env_value<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn write_executable(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, content).expect("write file");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

mod descriptor_parsing {
    use super::*;

    #[test]
    fn test_well_formed_descriptor_yields_all_fields() {
        let params = parse_connection_descriptor("ssh://alice@example.com:2222/#work");
        assert_eq!(params.username, "alice");
        assert_eq!(params.hostname, "example.com");
        assert_eq!(params.port, "2222");
        assert_eq!(params.session_name, "work");
        assert!(params.is_complete());
    }

    #[test]
    fn test_other_schemes_are_accepted() {
        let params = parse_connection_descriptor("mosh://u@h:1/#n");
        assert_eq!(params.username, "u");
        assert_eq!(params.hostname, "h");
    }

    #[test]
    fn test_malformed_descriptor_yields_all_empty_fields() {
        for descriptor in [
            "not-a-uri",
            "",
            "ssh://missing-at-sign:22/#x",
            "ssh://user@host:notaport/#x",
            "ssh://user@host:22",
            "://user@host:22/#x",
        ] {
            let params = parse_connection_descriptor(descriptor);
            assert_eq!(
                params,
                ConnectionParams::default(),
                "descriptor {descriptor:?} should not parse"
            );
            assert!(!params.is_complete());
        }
    }
}

mod resolution {
    use super::*;

    #[test]
    fn test_fail_safe_uses_platform_shell_verbatim() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let request = LaunchRequest {
            fail_safe: true,
            // Connection parameters are ignored in fail-safe mode.
            connection: parse_connection_descriptor("ssh://a@b:22/#c"),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");

        assert_eq!(spec.executable, config.failsafe_shell);
        assert!(spec.args.is_empty(), "no extra arguments in fail-safe mode");
        assert_eq!(env_value(&spec.env, "PATH"), Some("/usr/bin:/bin"));
        assert_eq!(env_value(&spec.env, "LD_LIBRARY_PATH"), None);
    }

    #[test]
    fn test_default_resolution_falls_back_to_platform_shell() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let spec =
            build_launch_spec(&LaunchRequest::default(), &config).expect("launch spec");
        assert_eq!(spec.executable, config.failsafe_shell);
        assert!(spec.args.is_empty());
        assert_eq!(spec.display_name, "sh");
    }

    #[test]
    fn test_bundled_shell_is_preferred_over_requested_executable() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let busybox = config.support_dir.join("busybox");
        // Not a script, so no shebang rewriting applies.
        write_executable(&busybox, b"\x7fELF fake");

        let request = LaunchRequest {
            executable: Some(PathBuf::from("/bin/cat")),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");

        assert_eq!(spec.executable, busybox);
        assert_eq!(spec.display_name, "busybox");
    }

    #[test]
    fn test_non_executable_bundled_shell_is_ignored() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let busybox = config.support_dir.join("busybox");
        write_executable(&busybox, b"\x7fELF fake");
        let mut perms = fs::metadata(&busybox).expect("metadata").permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&busybox, perms).expect("chmod");

        let spec =
            build_launch_spec(&LaunchRequest::default(), &config).expect("launch spec");
        assert_eq!(spec.executable, config.failsafe_shell);
    }

    #[test]
    fn test_connection_params_build_relay_invocation() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let request = LaunchRequest {
            connection: parse_connection_descriptor("ssh://alice@example.com:2222/#work"),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");

        let relay = config.support_dir.join("dbclient");
        assert_eq!(
            spec.args,
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("{} -y -y alice@example.com/2222", relay.display()),
            ]
        );
    }

    #[test]
    fn test_explicit_args_win_over_relay_construction() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let request = LaunchRequest {
            args: Some(vec!["-c".to_string(), "exit 0".to_string()]),
            connection: parse_connection_descriptor("ssh://a@b:22/#c"),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");
        assert_eq!(spec.args, vec!["-c".to_string(), "exit 0".to_string()]);
    }

    #[test]
    fn test_shebang_script_launches_through_its_interpreter() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let script = tmp.path().join("hello.sh");
        write_executable(&script, b"#!/bin/sh -e\necho hi\n");

        let request = LaunchRequest {
            executable: Some(script.clone()),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");

        assert_eq!(spec.executable, PathBuf::from("/bin/sh"));
        assert_eq!(
            spec.args,
            vec!["-e".to_string(), script.display().to_string()]
        );
        assert_eq!(spec.display_name, "sh");
    }

    #[test]
    fn test_shebang_interpreter_prefers_prefix_install() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let prefixed_sh = config.prefix_dir.join("bin").join("sh");
        write_executable(&prefixed_sh, b"\x7fELF fake");
        let script = tmp.path().join("hello.sh");
        write_executable(&script, b"#!/bin/sh\necho hi\n");

        let request = LaunchRequest {
            executable: Some(script),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");
        assert_eq!(spec.executable, prefixed_sh);
    }

    #[test]
    fn test_login_shell_prefixes_display_name() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let request = LaunchRequest {
            executable: Some(PathBuf::from("/bin/cat")),
            login_shell: true,
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");
        assert_eq!(spec.display_name, "-cat");
    }

    #[test]
    fn test_working_directory_defaults_to_home() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);

        let spec =
            build_launch_spec(&LaunchRequest::default(), &config).expect("launch spec");
        assert_eq!(spec.cwd, config.home_dir);

        let elsewhere = tmp.path().join("elsewhere");
        fs::create_dir_all(&elsewhere).expect("mkdir");
        let request = LaunchRequest {
            cwd: Some(elsewhere.clone()),
            ..LaunchRequest::default()
        };
        let spec = build_launch_spec(&request, &config).expect("launch spec");
        assert_eq!(spec.cwd, elsewhere);
    }

    #[test]
    fn test_launch_creates_home_and_tmp_dirs() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        assert!(!config.home_dir.exists());

        build_launch_spec(&LaunchRequest::default(), &config).expect("launch spec");
        assert!(config.home_dir.is_dir(), "home dir created");
        assert!(config.prefix_dir.join("tmp").is_dir(), "prefix tmp created");
    }
}

mod environment {
    use super::*;

    #[test]
    fn test_base_environment_points_into_the_prefix() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let env = build_environment(false, &config);

        assert_eq!(
            env_value(&env, "HOME"),
            Some(config.home_dir.display().to_string().as_str())
        );
        assert_eq!(
            env_value(&env, "PREFIX"),
            Some(config.prefix_dir.display().to_string().as_str())
        );
        let path = env_value(&env, "PATH").expect("PATH set");
        assert!(path.starts_with(&config.prefix_dir.join("bin").display().to_string()));
        assert!(env_value(&env, "LD_LIBRARY_PATH").is_some());
        assert_eq!(env_value(&env, "TERM"), Some("xterm-256color"));
    }

    #[test]
    fn test_fail_safe_shrinks_path_to_system_set() {
        let tmp = TempDir::new().expect("tempdir");
        let config = test_config(&tmp);
        let env = build_environment(true, &config);

        assert_eq!(env_value(&env, "PATH"), Some("/usr/bin:/bin"));
        assert_eq!(env_value(&env, "LD_LIBRARY_PATH"), None);
        // HOME and PREFIX stay, so a fail-safe shell can still inspect them.
        assert!(env_value(&env, "HOME").is_some());
        assert!(env_value(&env, "PREFIX").is_some());
    }
}
