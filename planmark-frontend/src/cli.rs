use std::fs;
use std::path::Path;

use planmark_engine::command::{CommandBus, CommandContext, CommandRequest};
use planmark_engine::session::MarkupSession;
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 内置演示脚本。
pub const DEMO_SCRIPT: &str = include_str!("../scripts/demo.plan");

/// 一次脚本回放的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub executed: usize,
    pub failed: usize,
}

/// 运行内置演示脚本并打印设计概览。
pub fn run_demo(session: &mut MarkupSession) -> ReplayReport {
    let bus = CommandBus::new();
    let names: Vec<&str> = bus
        .available_commands()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    println!("支持的命令: {}", names.join(", "));
    let report = run_lines(&bus, DEMO_SCRIPT, session);
    print_overview(session);
    report
}

/// 从文件回放命令脚本。脚本无法读取时返回错误，单条命令失败只记录警告。
pub fn run_script(path: &Path, session: &mut MarkupSession) -> Result<ReplayReport, FrontendError> {
    let script = fs::read_to_string(path).map_err(|source| FrontendError::Script {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "开始回放命令脚本");
    let report = run_lines(&CommandBus::new(), &script, session);
    print_overview(session);
    Ok(report)
}

/// 逐行执行命令文本。
pub fn run_lines(bus: &CommandBus, script: &str, session: &mut MarkupSession) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut context = CommandContext { session };
    for (number, line) in script.lines().enumerate() {
        let Some(request) = CommandRequest::parse(line) else {
            continue;
        };
        report.executed += 1;
        let response = bus.dispatch(&request, &mut context);
        let message = response.message.unwrap_or_default();
        if response.success {
            println!("[{:>3}] {} → {message}", number + 1, line.trim());
        } else {
            report.failed += 1;
            warn!(line = number + 1, command = %request.name, "命令执行失败: {message}");
            println!("[{:>3}] {} ✗ {message}", number + 1, line.trim());
        }
    }
    info!(executed = report.executed, failed = report.failed, "命令脚本执行完毕");
    report
}

fn print_overview(session: &MarkupSession) {
    let state = session.state();
    let summary = state.summary();
    println!("设计概览：");
    match state.ratio() {
        Some(ratio) => println!("  比例 = {ratio:.6} m/px"),
        None => println!("  比例 = 未标定"),
    }
    if !state.design_purpose.is_empty() {
        println!("  用途 = {}", state.design_purpose);
    }
    println!("  设备 {} 台", summary.equipment);
    println!("  线路 {} 条，共 {:.2} m", summary.lines, summary.cable_length_m);
    println!("  区域 {} 个，共 {:.2} m²", summary.zones, summary.zone_area_m2);
    println!(
        "  桥架 {} 段，共 {:.2} m",
        summary.containment_runs, summary.containment_length_m
    );
    match summary.pv_capacity_kwp {
        Some(kwp) => println!(
            "  光伏 {} 个阵列，{} 块组件，{kwp:.2} kWp",
            summary.pv_arrays, summary.pv_panels
        ),
        None => println!("  光伏 {} 个阵列，{} 块组件", summary.pv_arrays, summary.pv_panels),
    }
    println!("  任务 {} 项", summary.tasks);
    let history = session.history();
    println!("  历史 {}/{}", history.index() + 1, history.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn demo_script_runs_without_failures() {
        let mut session = MarkupSession::default();
        let report = run_demo(&mut session);
        assert_eq!(report.failed, 0);
        assert!(report.executed > 0);

        let summary = session.state().summary();
        assert!(session.state().scale_info.is_calibrated());
        assert_eq!(summary.zones, 1);
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.containment_runs, 1);
        assert_eq!(summary.equipment, 2);
        assert_eq!(summary.roof_masks, 1);
        assert_eq!(summary.pv_arrays, 2);
        assert_eq!(summary.tasks, 1);
    }

    #[test]
    fn failing_lines_are_counted_not_fatal() {
        let mut session = MarkupSession::default();
        let report = run_lines(
            &CommandBus::new(),
            "# 注释\npurpose 仓库\nbogus\nundo\n",
            &mut session,
        );
        assert_eq!(report.executed, 3);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn script_file_is_replayed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "purpose 仓库\nsummary").unwrap();
        let mut session = MarkupSession::default();
        let report = run_script(file.path(), &mut session).unwrap();
        assert_eq!(report, ReplayReport { executed: 2, failed: 0 });
        assert_eq!(session.state().design_purpose, "仓库");
    }

    #[test]
    fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MarkupSession::default();
        let err = run_script(&dir.path().join("none.plan"), &mut session).unwrap_err();
        assert!(matches!(err, FrontendError::Script { .. }));
    }
}
