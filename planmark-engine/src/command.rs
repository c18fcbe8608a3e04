use std::collections::HashMap;

use planmark_core::design::{
    CableSpec, ContainmentType, EntityId, PanelOrientation, PvPanelConfig, TaskStatus,
    VoltageClass,
};
use planmark_core::geometry::{Point2, Vector2};

use crate::drawing::{DetailsPayload, DrawingTool};
use crate::keymap::{Modifiers, resolve_shortcut};
use crate::pv::ArrayConfig;
use crate::session::{MarkupSession, SessionCommand, Tool};

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// 解析一行文本命令。空行与 `#` 注释返回 `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split_whitespace();
        let name = parts.next()?.to_ascii_lowercase();
        Some(Self {
            name,
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub session: &'a mut MarkupSession,
}

impl CommandContext<'_> {
    fn run(&mut self, command: SessionCommand) -> CommandResponse {
        match self.session.apply(command) {
            Ok(event) => CommandResponse::ok(event.to_string()),
            Err(error) => CommandResponse::err(error.to_string()),
        }
    }
}

type ParseFn = fn(&[String]) -> Result<SessionCommand, String>;

/// 将文本参数直接映射为一条会话命令的处理器。
struct MappedCommand {
    name: &'static str,
    usage: &'static str,
    parse: ParseFn,
}

impl CommandHandler for MappedCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn usage(&self) -> &'static str {
        self.usage
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match (self.parse)(&request.args) {
            Ok(command) => context.run(command),
            Err(reason) => CommandResponse::err(format!("{reason}；用法: {}", self.usage)),
        }
    }
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        for (name, usage, parse) in MAPPED_COMMANDS {
            bus.register(MappedCommand {
                name,
                usage,
                parse,
            });
        }
        bus.register(DragCommand);
        bus.register(TaskCommand);
        bus.register(SummaryCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    /// 按名称排序的命令及用法。
    pub fn available_commands(&self) -> Vec<(&'static str, &'static str)> {
        let mut commands: Vec<_> = self
            .handlers
            .values()
            .map(|handler| (handler.name(), handler.usage()))
            .collect();
        commands.sort_unstable();
        commands
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

const MAPPED_COMMANDS: [(&str, &str, ParseFn); 26] = [
    ("calibrate", "calibrate", |_| Ok(SessionCommand::SelectTool(Tool::Calibrate))),
    ("length", "length <meters>", |args| {
        Ok(SessionCommand::SubmitRealLength(args.join(" ")))
    }),
    ("tool", "tool <select|line mv|lv|dc|zone|containment <type>|roof|equipment <type>|array>", parse_tool),
    ("move", "move <x> <y>", |args| Ok(SessionCommand::PointerMove(point_arg(args, 0)?))),
    ("click", "click <x> <y>", |args| Ok(SessionCommand::Click(point_arg(args, 0)?))),
    ("dblclick", "dblclick <x> <y>", |args| {
        Ok(SessionCommand::DoubleClick(point_arg(args, 0)?))
    }),
    ("finish", "finish", |_| Ok(SessionCommand::Finish)),
    ("escape", "escape", |_| Ok(SessionCommand::Escape)),
    ("cable", "cable <type> <start_height_m> <end_height_m> <terminations> <label...>", parse_cable),
    ("size", "size <size>", |args| {
        if args.is_empty() {
            return Err("缺少规格".to_string());
        }
        Ok(SessionCommand::SubmitDetails(DetailsPayload::ContainmentSize(args.join(" "))))
    }),
    ("cancel-details", "cancel-details", |_| Ok(SessionCommand::CancelDetails)),
    ("pitch", "pitch <degrees>", |args| Ok(SessionCommand::SubmitPitch(number_arg(args, 0)?))),
    ("panel", "panel <length_m> <width_m> <wattage>", |args| {
        Ok(SessionCommand::SetPanelConfig(PvPanelConfig {
            length_m: number_arg(args, 0)?,
            width_m: number_arg(args, 1)?,
            wattage: number_arg(args, 2)?,
        }))
    }),
    ("array", "array <rows> <columns> [portrait|landscape]", parse_array),
    ("rotate", "rotate", |_| Ok(SessionCommand::Rotate)),
    ("undo", "undo", |_| Ok(SessionCommand::Undo)),
    ("redo", "redo", |_| Ok(SessionCommand::Redo)),
    ("select", "select [id]", |args| {
        Ok(match args.first() {
            Some(id) => SessionCommand::Select(EntityId::new(id.as_str())),
            None => SessionCommand::ClearSelection,
        })
    }),
    ("delete", "delete", |_| Ok(SessionCommand::RequestDelete)),
    ("confirm", "confirm <yes|no>", |args| match args.first().map(String::as_str) {
        Some("yes" | "y") => Ok(SessionCommand::ConfirmDelete(true)),
        Some("no" | "n") => Ok(SessionCommand::ConfirmDelete(false)),
        _ => Err("需要 yes 或 no".to_string()),
    }),
    ("purpose", "purpose <text...>", |args| {
        Ok(SessionCommand::SetDesignPurpose(args.join(" ")))
    }),
    ("snap", "snap <on|off>", |args| match args.first().map(String::as_str) {
        Some("on") => Ok(SessionCommand::SetSnapping(true)),
        Some("off") => Ok(SessionCommand::SetSnapping(false)),
        _ => Err("需要 on 或 off".to_string()),
    }),
    ("key", "key <chord, e.g. ctrl+z>", |args| {
        let chord = args.first().ok_or_else(|| "缺少按键".to_string())?;
        let (modifiers, key) = Modifiers::parse_chord(chord);
        resolve_shortcut(&key, modifiers)
            .map(SessionCommand::Shortcut)
            .ok_or_else(|| format!("未绑定的快捷键: {chord}"))
    }),
    ("raster", "raster <width> <height>", |args| {
        Ok(SessionCommand::SetRaster {
            width: number_arg(args, 0)?,
            height: number_arg(args, 1)?,
        })
    }),
    ("zoom", "zoom <factor> <x> <y>", |args| {
        Ok(SessionCommand::ZoomAt {
            factor: number_arg(args, 0)?,
            anchor: point_arg(args, 1)?,
        })
    }),
    ("pan", "pan <dx> <dy>", |args| {
        Ok(SessionCommand::PanBy(Vector2::new(
            number_arg(args, 0)?,
            number_arg(args, 1)?,
        )))
    }),
];

fn number_arg(args: &[String], index: usize) -> Result<f64, String> {
    let raw = args
        .get(index)
        .ok_or_else(|| format!("缺少第 {} 个参数", index + 1))?;
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("无效数字: {raw}")),
    }
}

fn count_arg(args: &[String], index: usize) -> Result<u32, String> {
    let raw = args
        .get(index)
        .ok_or_else(|| format!("缺少第 {} 个参数", index + 1))?;
    raw.parse::<u32>().map_err(|_| format!("无效整数: {raw}"))
}

fn point_arg(args: &[String], index: usize) -> Result<Point2, String> {
    Ok(Point2::new(number_arg(args, index)?, number_arg(args, index + 1)?))
}

fn parse_voltage(raw: &str) -> Result<VoltageClass, String> {
    match raw.to_ascii_lowercase().as_str() {
        "mv" => Ok(VoltageClass::Mv),
        "lv" | "lvac" | "lv/ac" => Ok(VoltageClass::LvAc),
        "dc" => Ok(VoltageClass::Dc),
        other => Err(format!("未知电压等级: {other}")),
    }
}

fn parse_containment(raw: &str) -> Result<ContainmentType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "tray" | "cable-tray" => Ok(ContainmentType::CableTray),
        "trunking" => Ok(ContainmentType::Trunking),
        "basket" | "wire-basket" => Ok(ContainmentType::WireBasket),
        "ladder" | "ladder-rack" => Ok(ContainmentType::LadderRack),
        "conduit" => Ok(ContainmentType::Conduit),
        "sleeve" => Ok(ContainmentType::Sleeve),
        other => Err(format!("未知桥架类型: {other}")),
    }
}

fn parse_tool(args: &[String]) -> Result<SessionCommand, String> {
    let kind = args.first().map(String::as_str).unwrap_or("select");
    let sub = args.get(1).map(String::as_str);
    let tool = match (kind, sub) {
        ("select", _) => Tool::Select,
        ("line", Some(class)) => Tool::Draw(DrawingTool::Line(parse_voltage(class)?)),
        ("zone", _) => Tool::Draw(DrawingTool::Zone),
        ("containment", Some(kind)) => {
            Tool::Draw(DrawingTool::Containment(parse_containment(kind)?))
        }
        ("roof", _) => Tool::Draw(DrawingTool::RoofMask),
        ("equipment", Some(kind)) => Tool::Equipment(kind.to_string()),
        ("array", _) => Tool::PvArray,
        (other, _) => return Err(format!("未知工具或缺少参数: {other}")),
    };
    Ok(SessionCommand::SelectTool(tool))
}

fn parse_cable(args: &[String]) -> Result<SessionCommand, String> {
    let cable_type = args.first().ok_or_else(|| "缺少电缆型号".to_string())?;
    let spec = CableSpec {
        cable_type: cable_type.clone(),
        start_height_m: number_arg(args, 1)?,
        end_height_m: number_arg(args, 2)?,
        termination_count: count_arg(args, 3)?,
        label: args.get(4..).map(|rest| rest.join(" ")).unwrap_or_default(),
    };
    Ok(SessionCommand::SubmitDetails(DetailsPayload::Cable(spec)))
}

fn parse_array(args: &[String]) -> Result<SessionCommand, String> {
    let orientation = match args.get(2).map(|raw| raw.to_ascii_lowercase()) {
        None => PanelOrientation::Portrait,
        Some(raw) if raw == "portrait" => PanelOrientation::Portrait,
        Some(raw) if raw == "landscape" => PanelOrientation::Landscape,
        Some(raw) => return Err(format!("未知朝向: {raw}")),
    };
    Ok(SessionCommand::ConfigureArray(ArrayConfig {
        rows: count_arg(args, 0)?,
        columns: count_arg(args, 1)?,
        orientation,
    }))
}

/// `drag <x0> <y0> <x1> <y1>`：拾取起点处的实体并拖到终点，结束时只提交一次。
struct DragCommand;

impl CommandHandler for DragCommand {
    fn name(&self) -> &'static str {
        "drag"
    }

    fn usage(&self) -> &'static str {
        "drag <x0> <y0> <x1> <y1>"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let (from, to) = match (point_arg(&request.args, 0), point_arg(&request.args, 2)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(reason), _) | (_, Err(reason)) => {
                return CommandResponse::err(format!("{reason}；用法: {}", self.usage()));
            }
        };
        let Some(id) = context.session.hit_test(from) else {
            return CommandResponse::err(format!("({:.1}, {:.1}) 处没有实体", from.x(), from.y()));
        };
        for command in [
            SessionCommand::BeginDrag { id, at: from },
            SessionCommand::DragTo(to),
        ] {
            let response = context.run(command);
            if !response.success {
                return response;
            }
        }
        context.run(SessionCommand::EndDrag)
    }
}

/// `task <title...> [link=<id>|link=selected] [assign=<name>]` 与
/// `task status <id> <todo|in-progress|done>`。
struct TaskCommand;

impl CommandHandler for TaskCommand {
    fn name(&self) -> &'static str {
        "task"
    }

    fn usage(&self) -> &'static str {
        "task <title...> [link=<id>|link=selected] [assign=<name>] | task status <id> <todo|in-progress|done>"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if request.args.first().map(String::as_str) == Some("status") {
            let status = match request.args.get(2).map(String::as_str) {
                Some("todo") => TaskStatus::Todo,
                Some("in-progress") => TaskStatus::InProgress,
                Some("done") => TaskStatus::Done,
                _ => return CommandResponse::err(format!("用法: {}", self.usage())),
            };
            let Some(id) = request.args.get(1) else {
                return CommandResponse::err(format!("用法: {}", self.usage()));
            };
            return context.run(SessionCommand::SetTaskStatus {
                id: EntityId::new(id.as_str()),
                status,
            });
        }

        let mut title = Vec::new();
        let mut linked_item_id = None;
        let mut assigned_to = None;
        for arg in &request.args {
            if let Some(link) = arg.strip_prefix("link=") {
                linked_item_id = if link == "selected" {
                    match context.session.selection().first() {
                        Some(id) => Some(id.clone()),
                        None => return CommandResponse::err("没有选中的实体可供关联"),
                    }
                } else {
                    Some(EntityId::new(link))
                };
            } else if let Some(name) = arg.strip_prefix("assign=") {
                assigned_to = Some(name.to_string());
            } else {
                title.push(arg.as_str());
            }
        }
        context.run(SessionCommand::AddTask {
            title: title.join(" "),
            linked_item_id,
            assigned_to,
        })
    }
}

/// 输出设计统计。
struct SummaryCommand;

impl CommandHandler for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn usage(&self) -> &'static str {
        "summary"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let state = context.session.state();
        let summary = state.summary();
        let scale = match state.ratio() {
            Some(ratio) => format!("{ratio:.6} m/px"),
            None => "未标定".to_string(),
        };
        let capacity = summary
            .pv_capacity_kwp
            .map_or_else(|| "-".to_string(), |kwp| format!("{kwp:.2} kWp"));
        CommandResponse::ok(format!(
            "比例 {scale}；设备 {}，线路 {}（{:.2} m），区域 {}（{:.2} m²），桥架 {}（{:.2} m），屋面 {}，阵列 {}（{} 块，{capacity}），任务 {}；历史 {}/{}",
            summary.equipment,
            summary.lines,
            summary.cable_length_m,
            summary.zones,
            summary.zone_area_m2,
            summary.containment_runs,
            summary.containment_length_m,
            summary.roof_masks,
            summary.pv_arrays,
            summary.pv_panels,
            summary.tasks,
            context.session.history().index() + 1,
            context.session.history().len(),
        ))
    }
}
