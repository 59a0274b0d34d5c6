use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use blockpanel_core::{API_HOST, API_PORT};
use clap::Parser;

use crate::{shutdown::ShutdownTimings, supervisor::LaunchSpec};

const BACKEND_SCRIPT: &str = "api_server.py";
const APP_DIR_NAME: &str = "BlockPanel";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "blockpanel")]
pub struct HostArgs {
    /// Interpreter used to run the backend script.
    #[arg(long, default_value = "python")]
    pub python: String,

    #[arg(long)]
    pub backend_script: Option<PathBuf>,

    /// Resolve paths as in a source checkout even in release builds.
    #[arg(long, default_value_t = false)]
    pub dev: bool,

    /// Attach to a backend that is already running instead of spawning one.
    #[arg(long, default_value_t = false)]
    pub no_backend: bool,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingMode {
    Development,
    Installed,
}

impl PackagingMode {
    pub fn detect(force_dev: bool, dev_env: Option<&OsStr>) -> Self {
        let env_dev = dev_env.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        if force_dev || env_dev || cfg!(debug_assertions) {
            PackagingMode::Development
        } else {
            PackagingMode::Installed
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub mode: PackagingMode,
    /// `None` when attaching to an externally managed backend.
    pub launch: Option<LaunchSpec>,
    pub api_host: String,
    pub api_port: u16,
    pub data_dir: PathBuf,
    pub timings: ShutdownTimings,
}

impl HostConfig {
    pub fn from_args(args: HostArgs) -> Self {
        let mode = PackagingMode::detect(args.dev, std::env::var_os("BLOCKPANEL_DEV").as_deref());
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let launch = (!args.no_backend).then(|| {
            let script = resolve_backend_script(mode, args.backend_script, exe_dir.as_deref());
            LaunchSpec::python_script(&args.python, &script)
        });
        let data_dir = resolve_data_dir(
            args.data_dir,
            std::env::var_os("BLOCKPANEL_DATA_DIR").map(PathBuf::from),
        );

        Self {
            mode,
            launch,
            api_host: API_HOST.to_owned(),
            api_port: API_PORT,
            data_dir,
            timings: ShutdownTimings::default(),
        }
    }

    /// Config for a shell that talks to a backend someone else started.
    pub fn attach(api_host: impl Into<String>, api_port: u16, data_dir: PathBuf) -> Self {
        Self {
            mode: PackagingMode::Development,
            launch: None,
            api_host: api_host.into(),
            api_port,
            data_dir,
            timings: ShutdownTimings::default(),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

pub fn resolve_backend_script(
    mode: PackagingMode,
    explicit: Option<PathBuf>,
    exe_dir: Option<&Path>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    match mode {
        PackagingMode::Development => Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .map(|workspace| workspace.join("backend").join(BACKEND_SCRIPT))
            .unwrap_or_else(|| PathBuf::from("backend").join(BACKEND_SCRIPT)),
        PackagingMode::Installed => exe_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("resources")
            .join("backend")
            .join(BACKEND_SCRIPT),
    }
}

pub fn resolve_data_dir(explicit: Option<PathBuf>, env_override: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit.or(env_override) {
        return dir;
    }

    dirs::data_local_dir()
        .map(|base| base.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_script_wins_over_mode() {
        let explicit = PathBuf::from("/opt/panel/api_server.py");
        let resolved = resolve_backend_script(
            PackagingMode::Installed,
            Some(explicit.clone()),
            Some(Path::new("/usr/lib/blockpanel")),
        );
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn installed_script_lives_under_resources() {
        let resolved = resolve_backend_script(
            PackagingMode::Installed,
            None,
            Some(Path::new("/usr/lib/blockpanel")),
        );
        assert_eq!(
            resolved,
            PathBuf::from("/usr/lib/blockpanel/resources/backend/api_server.py")
        );
    }

    #[test]
    fn development_script_lives_in_workspace_backend_dir() {
        let resolved = resolve_backend_script(PackagingMode::Development, None, None);
        assert!(resolved.ends_with("backend/api_server.py"));
    }

    #[test]
    fn dev_env_flag_forces_development_mode() {
        assert_eq!(
            PackagingMode::detect(false, Some(OsStr::new("1"))),
            PackagingMode::Development
        );
        assert_eq!(
            PackagingMode::detect(true, None),
            PackagingMode::Development
        );
    }

    #[test]
    fn data_dir_prefers_flag_then_env() {
        let flag = PathBuf::from("/tmp/flag");
        let env = PathBuf::from("/tmp/env");
        assert_eq!(resolve_data_dir(Some(flag.clone()), Some(env.clone())), flag);
        assert_eq!(resolve_data_dir(None, Some(env.clone())), env);
        assert!(resolve_data_dir(None, None).ends_with(APP_DIR_NAME));
    }

    #[test]
    fn no_backend_flag_skips_launch() {
        let config = HostConfig::from_args(HostArgs {
            python: "python3".to_owned(),
            no_backend: true,
            data_dir: Some(PathBuf::from("/tmp/blockpanel-test")),
            ..HostArgs::default()
        });
        assert!(config.launch.is_none());
        assert_eq!(config.api_port, API_PORT);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/blockpanel-test/logs"));
    }
}
