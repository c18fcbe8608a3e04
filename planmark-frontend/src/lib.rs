pub mod cli;
pub mod errors;
pub mod loader;
pub mod settings;

use std::path::PathBuf;

use errors::FrontendError;
use planmark_config::{AppConfig, FrontendMode};
use planmark_engine::session::MarkupSession;
use tracing::info;

pub use cli::ReplayReport;

/// 前端启动参数：运行模式、回放脚本以及设计文件的读写路径。
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub mode: FrontendMode,
    pub script: Option<PathBuf>,
    pub load: Option<PathBuf>,
    pub save: Option<PathBuf>,
}

impl LaunchOptions {
    /// 以配置文件中的前端设置为默认值。
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mode: config.frontend.default_mode,
            script: config.frontend.replay_script.clone(),
            ..Self::default()
        }
    }
}

/// 按启动参数运行文本前端：加载设计、执行演示或回放脚本、按需保存。
pub fn run(config: &AppConfig, options: &LaunchOptions) -> Result<ReplayReport, FrontendError> {
    let loaded = loader::load_design(options.load.as_deref())?;
    let mut session = MarkupSession::with_state(loaded.state, settings::session_settings(config));

    let report = match options.mode {
        FrontendMode::Demo => {
            info!("启动内置演示");
            cli::run_demo(&mut session)
        }
        FrontendMode::Replay => {
            let script = options.script.as_deref().ok_or(FrontendError::MissingScript)?;
            cli::run_script(script, &mut session)?
        }
    };

    if let Some(path) = options.save.as_deref() {
        loader::save_design(session.state(), path)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replay_without_script_is_rejected() {
        let options = LaunchOptions {
            mode: FrontendMode::Replay,
            ..LaunchOptions::default()
        };
        let err = run(&AppConfig::default(), &options).unwrap_err();
        assert!(matches!(err, FrontendError::MissingScript));
    }

    #[test]
    fn replay_saves_resulting_design() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("site.plan");
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(file, "purpose 学校").unwrap();
        let output = dir.path().join("design.json");

        let options = LaunchOptions {
            mode: FrontendMode::Replay,
            script: Some(script),
            load: None,
            save: Some(output.clone()),
        };
        let report = run(&AppConfig::default(), &options).unwrap();
        assert_eq!(report.failed, 0);

        let reloaded = loader::load_design(Some(&output)).unwrap();
        assert_eq!(reloaded.state.design_purpose, "学校");
    }
}
