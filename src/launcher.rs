//! Process launch resolution - executable, arguments, environment

use crate::config::Config;
use regex_lite::Regex;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("launch setup failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection parameters for a relayed remote session. All-empty means the
/// session is a plain local shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub username: String,
    pub hostname: String,
    pub port: String,
    pub session_name: String,
}

impl ConnectionParams {
    /// True when enough is present to build a relay command line.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.hostname.is_empty() && !self.port.is_empty()
    }
}

/// What the caller wants launched. Everything is optional; the empty request
/// resolves to the default interactive shell.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Executable override; `None` means default shell resolution.
    pub executable: Option<PathBuf>,
    /// Explicit argument override; wins over relay construction.
    pub args: Option<Vec<String>>,
    /// Working directory; defaults to the configured home.
    pub cwd: Option<PathBuf>,
    /// Use the platform shell verbatim with a minimal environment.
    pub fail_safe: bool,
    /// Present the process as a login shell.
    pub login_shell: bool,
    /// Requested session display name.
    pub name: Option<String>,
    pub connection: ConnectionParams,
    pub rows: u16,
    pub cols: u16,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            executable: None,
            args: None,
            cwd: None,
            fail_safe: false,
            login_shell: false,
            name: None,
            connection: ConnectionParams::default(),
            rows: 24,
            cols: 80,
        }
    }
}

/// Fully resolved launch: what to exec, with which argv, where, and with
/// which environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Basename-derived process label, `-` prefixed for login shells.
    pub display_name: String,
}

/// Parse a `scheme://user@host:port/#name` connection descriptor. Total:
/// anything that does not match yields all-empty fields rather than an error.
pub fn parse_connection_descriptor(descriptor: &str) -> ConnectionParams {
    static DESCRIPTOR: OnceLock<Regex> = OnceLock::new();
    let re = DESCRIPTOR.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://(.+)@(.+):(\d+)/#(.+)$").expect("valid regex")
    });

    match re.captures(descriptor) {
        Some(caps) => ConnectionParams {
            username: caps[1].to_string(),
            hostname: caps[2].to_string(),
            port: caps[3].to_string(),
            session_name: caps[4].to_string(),
        },
        None => {
            debug!(descriptor, "connection descriptor did not parse, using local shell");
            ConnectionParams::default()
        }
    }
}

/// Resolve a launch request against the configuration. Side effects are
/// limited to filesystem probes and creating the home and prefix tmp
/// directories a first session expects to exist.
pub fn build_launch_spec(request: &LaunchRequest, config: &Config) -> Result<LaunchSpec, LaunchError> {
    fs::create_dir_all(&config.home_dir)?;
    fs::create_dir_all(config.prefix_dir.join("tmp"))?;

    let cwd = request
        .cwd
        .clone()
        .unwrap_or_else(|| config.home_dir.clone());

    if request.fail_safe {
        let executable = config.failsafe_shell.clone();
        let display_name = display_name(&executable, request.login_shell);
        return Ok(LaunchSpec {
            args: Vec::new(),
            cwd,
            env: build_environment(true, config),
            executable,
            display_name,
        });
    }

    // Prefer a bundled statically linked shell over whatever was requested.
    let mut executable = request.executable.clone();
    for shell in &config.fallback_shells {
        let candidate = config.support_dir.join(shell);
        if is_executable(&candidate) {
            executable = Some(candidate);
            break;
        }
    }
    let executable = executable.unwrap_or_else(|| config.failsafe_shell.clone());

    let args = if let Some(explicit) = &request.args {
        explicit.clone()
    } else if request.connection.is_complete() {
        vec!["sh".to_string(), "-c".to_string(), relay_command(&request.connection, config)]
    } else {
        Vec::new()
    };

    let (executable, args) = resolve_shebang(executable, args, config)?;
    let display_name = display_name(&executable, request.login_shell);

    debug!(
        executable = %executable.display(),
        ?args,
        cwd = %cwd.display(),
        "resolved launch spec"
    );

    Ok(LaunchSpec {
        executable,
        args,
        cwd,
        env: build_environment(false, config),
        display_name,
    })
}

/// The relay invocation for a remote session: `<support>/<relay> <flags>
/// <user>@<host>/<port>`, run through `sh -c` by the caller.
fn relay_command(connection: &ConnectionParams, config: &Config) -> String {
    let mut line = config.support_dir.join(&config.relay_binary).display().to_string();
    for flag in &config.relay_flags {
        line.push(' ');
        line.push_str(flag);
    }
    line.push_str(&format!(
        " {}@{}/{}",
        connection.username, connection.hostname, connection.port
    ));
    line
}

/// When the target is a script with a shebang, launch the interpreter named
/// there with the script as first argument. Interpreters are preferred from
/// the prefix when installed there.
fn resolve_shebang(
    executable: PathBuf,
    args: Vec<String>,
    config: &Config,
) -> Result<(PathBuf, Vec<String>), LaunchError> {
    let Ok(content) = fs::read(&executable) else {
        // Unreadable targets are left for exec to report.
        return Ok((executable, args));
    };
    if !content.starts_with(b"#!") {
        return Ok((executable, args));
    }

    let first_line = content
        .split(|&b| b == b'\n')
        .next()
        .unwrap_or_default();
    let line = String::from_utf8_lossy(&first_line[2..]);
    let mut tokens = line.split_whitespace();
    let Some(interpreter) = tokens.next() else {
        return Ok((executable, args));
    };

    let interpreter_path = PathBuf::from(interpreter);
    let prefixed = interpreter_path
        .file_name()
        .map(|name| config.prefix_dir.join("bin").join(name));
    let resolved = match prefixed {
        Some(p) if is_executable(&p) => p,
        _ => interpreter_path,
    };

    let mut new_args: Vec<String> = tokens.map(str::to_string).collect();
    new_args.push(executable.display().to_string());
    new_args.extend(args);
    Ok((resolved, new_args))
}

/// Process label shown for the session: the executable basename, `-` prefixed
/// when it should present as a login shell.
fn display_name(executable: &Path, login_shell: bool) -> String {
    let base = executable
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.display().to_string());
    if login_shell {
        format!("-{base}")
    } else {
        base
    }
}

/// Assemble the child environment. Fail-safe mode shrinks PATH to the system
/// set and skips every prefix-derived entry.
pub fn build_environment(fail_safe: bool, config: &Config) -> Vec<(String, String)> {
    let mut env = vec![
        ("HOME".to_string(), config.home_dir.display().to_string()),
        ("PREFIX".to_string(), config.prefix_dir.display().to_string()),
        (
            "TMPDIR".to_string(),
            config.prefix_dir.join("tmp").display().to_string(),
        ),
        ("TERM".to_string(), "xterm-256color".to_string()),
        ("LANG".to_string(), "en_US.UTF-8".to_string()),
    ];

    if fail_safe {
        env.push(("PATH".to_string(), "/usr/bin:/bin".to_string()));
    } else {
        let bin = config.prefix_dir.join("bin");
        env.push((
            "PATH".to_string(),
            format!("{}:{}", bin.display(), bin.join("applets").display()),
        ));
        env.push((
            "LD_LIBRARY_PATH".to_string(),
            config.prefix_dir.join("lib").display().to_string(),
        ));
    }

    env
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
