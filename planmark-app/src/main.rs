use std::path::PathBuf;

use planmark_config::{AppConfig, ConfigError, FrontendMode};
use planmark_frontend::LaunchOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    let mut args = std::env::args().skip(1);
    let mut override_mode: Option<FrontendMode> = None;
    let mut script: Option<PathBuf> = None;
    let mut config_override: Option<PathBuf> = None;
    let mut load: Option<PathBuf> = None;
    let mut save: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--demo" => override_mode = Some(FrontendMode::Demo),
            "--replay" => {
                override_mode = Some(FrontendMode::Replay);
                script = Some(required_path(&mut args, "--replay", "命令脚本"));
            }
            "--config" => config_override = Some(required_path(&mut args, "--config", "配置文件")),
            "--load" => load = Some(required_path(&mut args, "--load", "设计文件")),
            "--save" => save = Some(required_path(&mut args, "--save", "设计文件")),
            other => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
        }
    }

    let (config, fallback) = load_configuration(config_override);
    init_logging(&config);
    if let Some(fallback) = &fallback {
        fallback.log();
    }
    info!("启动 planmark 标注引擎");

    let mut options = LaunchOptions::from_config(&config);
    if let Some(mode) = override_mode {
        options.mode = mode;
    }
    if script.is_some() {
        options.script = script;
    }
    options.load = load;
    options.save = save;

    match planmark_frontend::run(&config, &options) {
        Ok(report) => info!(
            executed = report.executed,
            failed = report.failed,
            "前端运行结束"
        ),
        Err(err) => {
            error!(error = %err, "前端运行失败");
            std::process::exit(1);
        }
    }
}

fn required_path(args: &mut impl Iterator<Item = String>, flag: &str, what: &str) -> PathBuf {
    let Some(path) = args.next() else {
        eprintln!("`{flag}` 需要提供{what}路径");
        std::process::exit(1);
    };
    PathBuf::from(path)
}

/// 配置回退的原因，等日志初始化后再输出。
#[derive(Debug)]
struct ConfigFallback {
    path: Option<PathBuf>,
    explicit: bool,
    error: ConfigError,
}

impl ConfigFallback {
    fn log(&self) {
        let message = if self.explicit {
            "加载指定配置失败，使用默认配置"
        } else {
            "加载默认配置失败，使用内建默认值"
        };
        match &self.path {
            Some(path) => warn!(path = %path.display(), error = %self.error, "{message}"),
            None => warn!(error = %self.error, "{message}"),
        }
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> (AppConfig, Option<ConfigFallback>) {
    let (result, explicit_path) = match override_path {
        Some(path) => (AppConfig::from_file(&path), Some(path)),
        None => (AppConfig::discover(), None),
    };
    match result {
        Ok(cfg) => (cfg, None),
        Err(error) => {
            let path = match &error {
                ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => Some(path.clone()),
                ConfigError::Invalid(_) | ConfigError::Context { .. } => explicit_path.clone(),
            };
            let fallback = ConfigFallback {
                path,
                explicit: explicit_path.is_some(),
                error,
            };
            (AppConfig::default(), Some(fallback))
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_override_falls_back_with_deferred_warning() {
        let dir = std::env::temp_dir().join(format!("planmark-app-{}", std::process::id()));
        let missing = dir.join("absent.toml");
        let (config, fallback) = load_configuration(Some(missing.clone()));
        assert_eq!(config.logging.level, AppConfig::default().logging.level);
        let fallback = fallback.expect("fallback recorded");
        assert!(fallback.explicit);
        assert_eq!(fallback.path, Some(missing));
        assert!(matches!(fallback.error, ConfigError::Io { .. }));
    }
}
