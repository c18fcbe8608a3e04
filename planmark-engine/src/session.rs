use std::fmt;

use planmark_core::design::{
    CableSpec, Containment, DesignState, Entity, EntityId, EntityKind, EntityRef, PvPanelConfig,
    SupplyLine, SupplyZone, Task, TaskStatus,
};
use planmark_core::geometry::{Footprint, Point2, Vector2, distance_to_segment, point_in_polygon};
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationState, ScaleCalibrator};
use crate::drawing::{
    CompletedShape, DetailsPayload, DrawingMachine, DrawingStep, DrawingTool, Measured,
};
use crate::errors::EngineError;
use crate::history::History;
use crate::keymap::ShortcutAction;
use crate::placement::{EquipmentCatalog, PlacementEngine};
use crate::pv::{ArrayConfig, DirectionStep, PvWorkflow, SnapSettings, validate_panel_config};
use crate::viewport::ViewportTransform;

const DEFAULT_VIEW_SIZE: (f64, f64) = (1280.0, 800.0);

/// 会话级参数，通常由配置文件提供。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub snap: SnapSettings,
    /// 闭合多边形、选中线条、屋面坡向点“附近”判定的像素容差。
    pub close_tolerance_px: f64,
    pub catalog: EquipmentCatalog,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            snap: SnapSettings::default(),
            close_tolerance_px: 10.0,
            catalog: EquipmentCatalog::builtin(),
        }
    }
}

/// 当前激活的工具。
#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    Select,
    Calibrate,
    Draw(DrawingTool),
    Equipment(String),
    PvArray,
}

impl Tool {
    #[inline]
    pub fn is_placement(&self) -> bool {
        matches!(self, Tool::Equipment(_))
    }

    pub fn label(&self) -> String {
        match self {
            Tool::Select => "select".to_string(),
            Tool::Calibrate => "calibrate".to_string(),
            Tool::Draw(tool) => tool.label().to_string(),
            Tool::Equipment(kind) => format!("equipment `{kind}`"),
            Tool::PvArray => "pv array".to_string(),
        }
    }
}

/// 会话接收的全部输入。点坐标均为文档像素坐标。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SelectTool(Tool),
    PointerMove(Point2),
    Click(Point2),
    DoubleClick(Point2),
    Finish,
    Escape,
    SubmitRealLength(String),
    SubmitDetails(DetailsPayload),
    CancelDetails,
    SubmitPitch(f64),
    SetPanelConfig(PvPanelConfig),
    ConfigureArray(ArrayConfig),
    Rotate,
    Undo,
    Redo,
    Select(EntityId),
    ClearSelection,
    RequestDelete,
    ConfirmDelete(bool),
    BeginDrag { id: EntityId, at: Point2 },
    DragTo(Point2),
    EndDrag,
    AddTask {
        title: String,
        linked_item_id: Option<EntityId>,
        assigned_to: Option<String>,
    },
    SetTaskStatus { id: EntityId, status: TaskStatus },
    SetDesignPurpose(String),
    SetSnapping(bool),
    Load(DesignState),
    SetRaster { width: f64, height: f64 },
    SetViewSize { width: f64, height: f64 },
    PanBy(Vector2),
    ZoomAt { factor: f64, anchor: Point2 },
    ResetView,
    Shortcut(ShortcutAction),
}

impl SessionCommand {
    /// 拖拽期间允许的命令：拖拽本身、中止与撤销重做、选择与视图操作。
    /// 其余命令可能提交历史，必须等拖拽结束。
    fn allowed_while_dragging(&self) -> bool {
        matches!(
            self,
            SessionCommand::BeginDrag { .. }
                | SessionCommand::DragTo(_)
                | SessionCommand::EndDrag
                | SessionCommand::Escape
                | SessionCommand::Undo
                | SessionCommand::Redo
                | SessionCommand::Load(_)
                | SessionCommand::PointerMove(_)
                | SessionCommand::Select(_)
                | SessionCommand::ClearSelection
                | SessionCommand::SetSnapping(_)
                | SessionCommand::SetRaster { .. }
                | SessionCommand::SetViewSize { .. }
                | SessionCommand::PanBy(_)
                | SessionCommand::ZoomAt { .. }
                | SessionCommand::ResetView
                | SessionCommand::Shortcut(_)
        )
    }
}

/// 删除确认前展示给用户的内容。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeletionPreview {
    pub targets: Vec<EntityId>,
    pub dependents: Vec<EntityId>,
}

/// 一条命令处理后的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Unchanged,
    ToolSelected(Tool),
    PreviewMoved,
    PointAdded(usize),
    ReferencePointSet,
    AwaitingRealLength { pixel_distance: f64 },
    Calibrated {
        ratio: f64,
        warning: Option<&'static str>,
    },
    AwaitingDetails { tool: DrawingTool, measurement: Measured },
    DetailsCancelled,
    AwaitingPitch,
    AwaitingDirection,
    DirectionPointSet,
    Committed { id: EntityId, kind: EntityKind },
    Updated { committed: bool },
    Rotated(u16),
    HistoryMoved { index: usize, len: usize },
    Selected(Vec<EntityId>),
    DeletePending(DeletionPreview),
    Deleted(Vec<EntityId>),
    DeleteDeclined,
    Dragging,
    DragFinished { committed: bool },
    DragReverted,
    Aborted,
    Loaded { entities: usize },
    ViewChanged(ViewportTransform),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Unchanged => write!(f, "无变化"),
            SessionEvent::ToolSelected(tool) => write!(f, "已切换工具: {}", tool.label()),
            SessionEvent::PreviewMoved => write!(f, "预览已更新"),
            SessionEvent::PointAdded(count) => write!(f, "已添加第 {count} 个点"),
            SessionEvent::ReferencePointSet => write!(f, "参考线起点已设置"),
            SessionEvent::AwaitingRealLength { pixel_distance } => {
                write!(f, "参考线长 {pixel_distance:.2} px，请输入真实长度（米）")
            }
            SessionEvent::Calibrated { ratio, warning } => {
                write!(f, "比例已设置: {ratio:.6} m/px")?;
                if let Some(warning) = warning {
                    write!(f, "（{warning}）")?;
                }
                Ok(())
            }
            SessionEvent::AwaitingDetails { tool, measurement } => {
                write!(f, "{} 已绘制（{}），请填写明细", tool.label(), describe(measurement))
            }
            SessionEvent::DetailsCancelled => write!(f, "已取消，几何已丢弃"),
            SessionEvent::AwaitingPitch => write!(f, "请输入屋面坡度（0-90°）"),
            SessionEvent::AwaitingDirection => write!(f, "请依次点击屋面最高点与最低点"),
            SessionEvent::DirectionPointSet => write!(f, "最高点已设置，请点击最低点"),
            SessionEvent::Committed { id, kind } => write!(f, "已添加 {} {id}", kind.label()),
            SessionEvent::Updated { committed: true } => write!(f, "设计已更新"),
            SessionEvent::Updated { committed: false } => write!(f, "设计未变化"),
            SessionEvent::Rotated(degrees) => write!(f, "旋转角: {degrees}°"),
            SessionEvent::HistoryMoved { index, len } => {
                write!(f, "历史位置 {}/{len}", index + 1)
            }
            SessionEvent::Selected(ids) if ids.is_empty() => write!(f, "选中集已清空"),
            SessionEvent::Selected(ids) => write!(f, "已选中 {} 个实体", ids.len()),
            SessionEvent::DeletePending(preview) => write!(
                f,
                "将删除 {} 个实体及 {} 个关联项，请确认",
                preview.targets.len(),
                preview.dependents.len()
            ),
            SessionEvent::Deleted(ids) => write!(f, "已删除 {} 个实体", ids.len()),
            SessionEvent::DeleteDeclined => write!(f, "已取消删除"),
            SessionEvent::Dragging => write!(f, "拖拽中"),
            SessionEvent::DragFinished { committed: true } => write!(f, "拖拽完成"),
            SessionEvent::DragFinished { committed: false } => write!(f, "位置未变化"),
            SessionEvent::DragReverted => write!(f, "阵列必须位于其屋面遮罩内，已恢复原位"),
            SessionEvent::Aborted => write!(f, "已中止当前操作"),
            SessionEvent::Loaded { entities } => write!(f, "已加载设计，共 {entities} 个实体"),
            SessionEvent::ViewChanged(view) => write!(f, "视口缩放 {:.3}", view.zoom),
        }
    }
}

fn describe(measurement: &Measured) -> String {
    match measurement {
        Measured::PathLength(length) => format!("{length:.2} m"),
        Measured::Area(area) => format!("{area:.2} m²"),
    }
}

#[derive(Debug, Clone)]
struct DragState {
    id: EntityId,
    kind: EntityKind,
    origin: DesignState,
    grab: Point2,
    anchor: Point2,
}

/// 标注会话：唯一持有历史记录的 reducer，所有修改都经由 `apply` 进入。
#[derive(Debug)]
pub struct MarkupSession {
    history: History<DesignState>,
    settings: SessionSettings,
    tool: Tool,
    calibrator: ScaleCalibrator,
    drawing: DrawingMachine,
    placement: PlacementEngine,
    pv: PvWorkflow,
    selection: Vec<EntityId>,
    pending_delete: Option<DeletionPreview>,
    drag: Option<DragState>,
    viewport: ViewportTransform,
    raster: Option<(f64, f64)>,
    view_size: (f64, f64),
}

impl MarkupSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_state(DesignState::new(), settings)
    }

    /// 以已有设计初始化会话。
    pub fn with_state(state: DesignState, settings: SessionSettings) -> Self {
        let calibrator = ScaleCalibrator::from_scale(&state.scale_info);
        Self {
            history: History::new(state),
            drawing: DrawingMachine::new(settings.close_tolerance_px),
            placement: PlacementEngine::new(settings.catalog.clone()),
            pv: PvWorkflow::new(settings.close_tolerance_px),
            settings,
            tool: Tool::Select,
            calibrator,
            selection: Vec::new(),
            pending_delete: None,
            drag: None,
            viewport: ViewportTransform::default(),
            raster: None,
            view_size: DEFAULT_VIEW_SIZE,
        }
    }

    #[inline]
    pub fn state(&self) -> &DesignState {
        self.history.current()
    }

    #[inline]
    pub fn history(&self) -> &History<DesignState> {
        &self.history
    }

    #[inline]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[inline]
    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    #[inline]
    pub fn selection(&self) -> &[EntityId] {
        &self.selection
    }

    #[inline]
    pub fn pending_deletion(&self) -> Option<&DeletionPreview> {
        self.pending_delete.as_ref()
    }

    #[inline]
    pub fn calibrator(&self) -> &ScaleCalibrator {
        &self.calibrator
    }

    #[inline]
    pub fn drawing(&self) -> &DrawingMachine {
        &self.drawing
    }

    #[inline]
    pub fn placement(&self) -> &PlacementEngine {
        &self.placement
    }

    #[inline]
    pub fn pv(&self) -> &PvWorkflow {
        &self.pv
    }

    #[inline]
    pub fn viewport(&self) -> ViewportTransform {
        self.viewport
    }

    #[inline]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// 设备放置预览。
    pub fn equipment_preview(&self) -> Option<Footprint> {
        if !self.tool.is_placement() {
            return None;
        }
        self.placement.preview(self.state().ratio())
    }

    /// 处理一条命令。错误不会改变设计状态与历史记录。
    pub fn apply(&mut self, command: SessionCommand) -> Result<SessionEvent, EngineError> {
        if self.drag.is_some() && !command.allowed_while_dragging() {
            return Err(EngineError::DragInProgress);
        }
        match command {
            SessionCommand::SelectTool(tool) => self.select_tool(tool),
            SessionCommand::PointerMove(point) => {
                self.placement.pointer_move(point);
                Ok(SessionEvent::PreviewMoved)
            }
            SessionCommand::Click(point) => self.click(point),
            SessionCommand::DoubleClick(point) => {
                let step = self.drawing.double_click(point)?;
                self.on_drawing_step(step)
            }
            SessionCommand::Finish => {
                let step = self.drawing.finish()?;
                self.on_drawing_step(step)
            }
            SessionCommand::Escape => Ok(self.escape()),
            SessionCommand::SubmitRealLength(input) => self.submit_real_length(&input),
            SessionCommand::SubmitDetails(payload) => {
                let completed = self.drawing.submit_details(payload)?;
                self.commit_shape(completed)
            }
            SessionCommand::CancelDetails => Ok(if self.drawing.cancel_details() {
                SessionEvent::DetailsCancelled
            } else {
                SessionEvent::Unchanged
            }),
            SessionCommand::SubmitPitch(pitch) => {
                self.pv.submit_pitch(pitch)?;
                Ok(SessionEvent::AwaitingDirection)
            }
            SessionCommand::SetPanelConfig(panel) => {
                validate_panel_config(&panel)?;
                let committed = self.commit("pv panel config", |state| DesignState {
                    pv_panel_config: Some(panel),
                    ..state.clone()
                });
                Ok(SessionEvent::Updated { committed })
            }
            SessionCommand::ConfigureArray(config) => {
                self.pv
                    .configure_array(config, self.history.current().pv_panel_config.as_ref())?;
                self.switch_tool(Tool::PvArray);
                Ok(SessionEvent::ToolSelected(Tool::PvArray))
            }
            SessionCommand::Rotate => self.rotate(),
            SessionCommand::Undo => Ok(self.step_history(true)),
            SessionCommand::Redo => Ok(self.step_history(false)),
            SessionCommand::Select(id) => {
                if !self.state().contains(&id) {
                    return Err(EngineError::EntityNotFound(id.to_string()));
                }
                self.selection = vec![id];
                Ok(SessionEvent::Selected(self.selection.clone()))
            }
            SessionCommand::ClearSelection => {
                self.selection.clear();
                Ok(SessionEvent::Selected(Vec::new()))
            }
            SessionCommand::RequestDelete => self.request_delete().map(SessionEvent::DeletePending),
            SessionCommand::ConfirmDelete(confirmed) => self.confirm_delete(confirmed),
            SessionCommand::BeginDrag { id, at } => self.begin_drag(id, at),
            SessionCommand::DragTo(point) => self.drag_to(point),
            SessionCommand::EndDrag => self.end_drag(),
            SessionCommand::AddTask {
                title,
                linked_item_id,
                assigned_to,
            } => self.add_task(title, linked_item_id, assigned_to),
            SessionCommand::SetTaskStatus { id, status } => {
                if self.state().tasks.iter().all(|task| task.id != id) {
                    return Err(EngineError::EntityNotFound(id.to_string()));
                }
                let committed = self.commit("task status", |state| {
                    let mut next = state.clone();
                    if let Some(task) = next.task_mut(&id) {
                        task.status = status;
                    }
                    next
                });
                Ok(SessionEvent::Updated { committed })
            }
            SessionCommand::SetDesignPurpose(purpose) => {
                let committed = self.commit("design purpose", |state| DesignState {
                    design_purpose: purpose,
                    ..state.clone()
                });
                Ok(SessionEvent::Updated { committed })
            }
            SessionCommand::SetSnapping(enabled) => {
                self.settings.snap.enabled = enabled;
                debug!(enabled, "阵列吸附开关已切换");
                Ok(SessionEvent::Updated { committed: false })
            }
            SessionCommand::Load(state) => Ok(self.load(state)),
            SessionCommand::SetRaster { width, height } => {
                self.raster = Some((width, height));
                Ok(self.reset_view())
            }
            SessionCommand::SetViewSize { width, height } => {
                self.view_size = (width, height);
                Ok(SessionEvent::Unchanged)
            }
            SessionCommand::PanBy(delta) => {
                self.viewport.pan_by(delta);
                Ok(SessionEvent::ViewChanged(self.viewport))
            }
            SessionCommand::ZoomAt { factor, anchor } => {
                self.viewport.zoom_at(factor, anchor);
                Ok(SessionEvent::ViewChanged(self.viewport))
            }
            SessionCommand::ResetView => Ok(self.reset_view()),
            SessionCommand::Shortcut(action) => self.apply(match action {
                ShortcutAction::Undo => SessionCommand::Undo,
                ShortcutAction::Redo => SessionCommand::Redo,
                ShortcutAction::Rotate => SessionCommand::Rotate,
                ShortcutAction::ResetView => SessionCommand::ResetView,
                ShortcutAction::Cancel => SessionCommand::Escape,
            }),
        }
    }

    /// 两段式删除的便捷入口：先计算级联范围，再由调用方决定是否确认。
    pub fn delete_with_confirmation<F>(
        &mut self,
        ids: &[EntityId],
        confirm: F,
    ) -> Result<SessionEvent, EngineError>
    where
        F: FnOnce(&DeletionPreview) -> bool,
    {
        self.selection = ids
            .iter()
            .filter(|id| self.history.current().contains(id))
            .cloned()
            .collect();
        let preview = self.request_delete()?;
        let confirmed = confirm(&preview);
        self.confirm_delete(confirmed)
    }

    fn commit<F>(&mut self, action: &'static str, updater: F) -> bool
    where
        F: FnOnce(&DesignState) -> DesignState,
    {
        let committed = self.history.commit(updater);
        if committed {
            info!(
                action,
                index = self.history.index(),
                len = self.history.len(),
                "设计已提交"
            );
        }
        committed
    }

    fn commit_entity(&mut self, entity: Entity) -> SessionEvent {
        let id = entity.id().clone();
        let kind = entity.kind();
        self.commit(kind.label(), move |state| {
            let mut next = state.clone();
            next.insert(entity);
            next
        });
        SessionEvent::Committed { id, kind }
    }

    fn switch_tool(&mut self, tool: Tool) {
        if self.tool.is_placement() && !tool.is_placement() {
            self.placement.deactivate();
        }
        self.tool = tool;
    }

    fn select_tool(&mut self, tool: Tool) -> Result<SessionEvent, EngineError> {
        match &tool {
            Tool::Draw(kind) => {
                let ratio = self.state().ratio();
                self.drawing.begin(*kind, ratio)?;
            }
            Tool::Equipment(kind) => self.placement.activate(kind)?,
            Tool::PvArray if !self.pv.is_placing() => return Err(EngineError::ArrayNotConfigured),
            Tool::Calibrate => self.calibrator.begin_reference_line(),
            Tool::Select | Tool::PvArray => {}
        }
        if !matches!(tool, Tool::Draw(_)) {
            self.drawing.escape();
        }
        if !matches!(tool, Tool::Calibrate) && self.calibrator.is_in_progress() {
            self.calibrator.cancel();
        }
        if !matches!(tool, Tool::PvArray) {
            self.pv.cancel();
        }
        debug!(tool = %tool.label(), "切换工具");
        self.switch_tool(tool.clone());
        Ok(SessionEvent::ToolSelected(tool))
    }

    fn click(&mut self, point: Point2) -> Result<SessionEvent, EngineError> {
        match self.tool.clone() {
            Tool::Select => {
                self.selection = self.hit_test(point).into_iter().collect();
                Ok(SessionEvent::Selected(self.selection.clone()))
            }
            Tool::Calibrate => {
                let drawn = matches!(
                    self.calibrator.add_reference_point(point)?,
                    CalibrationState::LineDrawn { .. }
                );
                if !drawn {
                    return Ok(SessionEvent::ReferencePointSet);
                }
                let pixel_distance = self.calibrator.request_real_length()?;
                Ok(SessionEvent::AwaitingRealLength { pixel_distance })
            }
            Tool::Draw(kind) => {
                if kind == DrawingTool::RoofMask && !self.pv.is_idle() {
                    return match self.pv.direction_click(point)? {
                        DirectionStep::HighestSet(_) => Ok(SessionEvent::DirectionPointSet),
                        DirectionStep::Completed(mask) => Ok(self.commit_entity(Entity::RoofMask(mask))),
                    };
                }
                if self.drawing.is_idle() {
                    let ratio = self.state().ratio();
                    self.drawing.begin(kind, ratio)?;
                }
                let step = self.drawing.click(point)?;
                self.on_drawing_step(step)
            }
            Tool::Equipment(_) => {
                let (item, _) = self.placement.place(point, self.state().ratio())?;
                Ok(self.commit_entity(Entity::Equipment(item)))
            }
            Tool::PvArray => {
                let placement = self
                    .pv
                    .place_array(point, self.history.current(), &self.settings.snap)?;
                Ok(self.commit_entity(Entity::PvArray(placement.item)))
            }
        }
    }

    fn on_drawing_step(&mut self, step: DrawingStep) -> Result<SessionEvent, EngineError> {
        match step {
            DrawingStep::PointAdded(count) => Ok(SessionEvent::PointAdded(count)),
            DrawingStep::AwaitingDetails { tool, measurement } => {
                Ok(SessionEvent::AwaitingDetails { tool, measurement })
            }
            DrawingStep::Completed(completed) => self.commit_shape(completed),
        }
    }

    fn commit_shape(&mut self, completed: CompletedShape) -> Result<SessionEvent, EngineError> {
        let ratio = self.state().ratio();
        let CompletedShape { shape, details } = completed;
        let entity = match shape.tool {
            DrawingTool::Line(class) => {
                let spec = match details {
                    Some(DetailsPayload::Cable(spec)) => spec,
                    _ => CableSpec::default(),
                };
                Entity::Line(SupplyLine::new(
                    EntityId::generate(),
                    shape.points,
                    ratio,
                    class,
                    spec,
                )?)
            }
            DrawingTool::Zone => {
                Entity::Zone(SupplyZone::new(EntityId::generate(), shape.points, ratio)?)
            }
            DrawingTool::Containment(kind) => {
                let size = match details {
                    Some(DetailsPayload::ContainmentSize(size)) => Some(size.trim().to_string()),
                    _ => None,
                };
                Entity::Containment(Containment::new(
                    EntityId::generate(),
                    kind,
                    size,
                    shape.points,
                    ratio,
                )?)
            }
            DrawingTool::RoofMask => {
                self.pv.begin_pitch(shape.points)?;
                return Ok(SessionEvent::AwaitingPitch);
            }
        };
        Ok(self.commit_entity(entity))
    }

    fn submit_real_length(&mut self, input: &str) -> Result<SessionEvent, EngineError> {
        let outcome = self.calibrator.submit_real_length(input)?;
        let ratio = outcome.scale.require_ratio()?;
        let warning = outcome.warning();
        let scale = outcome.scale;
        self.commit("calibrate", |state| DesignState {
            scale_info: scale,
            ..state.clone()
        });
        self.switch_tool(Tool::Select);
        Ok(SessionEvent::Calibrated { ratio, warning })
    }

    fn rotate(&mut self) -> Result<SessionEvent, EngineError> {
        let degrees = match self.tool {
            Tool::Equipment(_) => self.placement.rotate()?,
            Tool::PvArray => self.pv.rotate()?,
            _ => return Err(EngineError::NoPlacementTool),
        };
        Ok(SessionEvent::Rotated(degrees))
    }

    /// Escape：依次中止拖拽、绘制、屋面流程、标定、待确认删除与放置工具。
    fn escape(&mut self) -> SessionEvent {
        if let Some(drag) = self.drag.take() {
            self.history.live_update(|_| drag.origin);
            return SessionEvent::Aborted;
        }
        if self.drawing.escape() {
            return SessionEvent::Aborted;
        }
        let placing_arrays = self.pv.is_placing();
        if self.pv.cancel() {
            if placing_arrays {
                self.switch_tool(Tool::Select);
            }
            return SessionEvent::Aborted;
        }
        if self.calibrator.is_in_progress() {
            self.calibrator.cancel();
            return SessionEvent::Aborted;
        }
        if self.pending_delete.take().is_some() {
            return SessionEvent::DeleteDeclined;
        }
        if self.tool.is_placement() {
            self.switch_tool(Tool::Select);
            return SessionEvent::Aborted;
        }
        SessionEvent::Unchanged
    }

    fn step_history(&mut self, backwards: bool) -> SessionEvent {
        if let Some(drag) = self.drag.take() {
            self.history.live_update(|_| drag.origin);
        }
        let moved = if backwards {
            self.history.undo()
        } else {
            self.history.redo()
        };
        if !moved {
            return SessionEvent::Unchanged;
        }
        self.after_state_replaced();
        SessionEvent::HistoryMoved {
            index: self.history.index(),
            len: self.history.len(),
        }
    }

    /// 当前状态被整体替换后（撤销、重做、加载）同步运行时状态。
    fn after_state_replaced(&mut self) {
        let state = self.history.current();
        self.selection.retain(|id| state.contains(id));
        self.pending_delete = None;
        self.calibrator.sync(&state.scale_info);
    }

    fn request_delete(&mut self) -> Result<DeletionPreview, EngineError> {
        if self.selection.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        let cascade = self.state().cascade_ids(&self.selection);
        let dependents = cascade
            .into_iter()
            .filter(|id| !self.selection.contains(id))
            .collect();
        let preview = DeletionPreview {
            targets: self.selection.clone(),
            dependents,
        };
        debug!(
            targets = preview.targets.len(),
            dependents = preview.dependents.len(),
            "等待删除确认"
        );
        self.pending_delete = Some(preview.clone());
        Ok(preview)
    }

    fn confirm_delete(&mut self, confirmed: bool) -> Result<SessionEvent, EngineError> {
        let preview = self
            .pending_delete
            .take()
            .ok_or(EngineError::NoPendingDeletion)?;
        if !confirmed {
            return Ok(SessionEvent::DeleteDeclined);
        }
        let mut removed = Vec::new();
        self.commit("delete", |state| {
            let mut next = state.clone();
            removed = next.remove_with_dependents(&preview.targets);
            next
        });
        self.selection.clear();
        info!(removed = removed.len(), "已级联删除");
        Ok(SessionEvent::Deleted(removed))
    }

    fn begin_drag(&mut self, id: EntityId, at: Point2) -> Result<SessionEvent, EngineError> {
        if let Some(previous) = self.drag.take() {
            self.history.live_update(|_| previous.origin);
        }
        let state = self.history.current();
        let (kind, anchor) = match state.entity(&id) {
            Some(EntityRef::Equipment(item)) => (EntityKind::Equipment, item.anchor_point),
            Some(EntityRef::PvArray(array)) => (EntityKind::PvArray, array.anchor_point),
            Some(_) => return Err(EngineError::NotDraggable(id.to_string())),
            None => return Err(EngineError::EntityNotFound(id.to_string())),
        };
        self.drag = Some(DragState {
            id,
            kind,
            origin: state.clone(),
            grab: at,
            anchor,
        });
        Ok(SessionEvent::Dragging)
    }

    fn drag_to(&mut self, point: Point2) -> Result<SessionEvent, EngineError> {
        let drag = self.drag.as_ref().ok_or(EngineError::NoActiveDrag)?;
        let anchor = drag.anchor.translate(drag.grab.vector_to(point));
        let (id, kind) = (drag.id.clone(), drag.kind);
        self.history
            .live_update(|state| with_anchor(state, &id, kind, anchor));
        Ok(SessionEvent::Dragging)
    }

    /// 结束拖拽：先将原状态放回当前位置，再把拖拽结果作为一次提交。
    fn end_drag(&mut self) -> Result<SessionEvent, EngineError> {
        let drag = self.drag.take().ok_or(EngineError::NoActiveDrag)?;
        let dragged = self.history.current().clone();

        if drag.kind == EntityKind::PvArray && !array_inside_mask(&dragged, &drag.id) {
            warn!(id = %drag.id, "阵列拖出屋面遮罩，已恢复原位");
            self.history.live_update(|_| drag.origin);
            return Ok(SessionEvent::DragReverted);
        }

        self.history.live_update(|_| drag.origin);
        let committed = self.commit("drag", |_| dragged);
        Ok(SessionEvent::DragFinished { committed })
    }

    fn add_task(
        &mut self,
        title: String,
        linked_item_id: Option<EntityId>,
        assigned_to: Option<String>,
    ) -> Result<SessionEvent, EngineError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::InvalidDetails("task title must not be empty".into()));
        }
        if let Some(link) = &linked_item_id {
            if !self.state().contains(link) {
                return Err(EngineError::EntityNotFound(link.to_string()));
            }
        }
        let task = Task {
            id: EntityId::generate(),
            linked_item_id,
            title,
            status: TaskStatus::Todo,
            assigned_to: assigned_to.filter(|name| !name.trim().is_empty()),
        };
        Ok(self.commit_entity(Entity::Task(task)))
    }

    fn load(&mut self, state: DesignState) -> SessionEvent {
        let entities = state.entity_count();
        self.history.reset_with(state);
        self.drag = None;
        self.drawing.escape();
        self.pv.cancel();
        self.calibrator = ScaleCalibrator::from_scale(&self.history.current().scale_info);
        self.selection.clear();
        self.switch_tool(Tool::Select);
        self.after_state_replaced();
        self.reset_view();
        info!(entities, "设计已加载");
        SessionEvent::Loaded { entities }
    }

    /// 重置视图：优先适配底图，其次适配设计内容。
    fn reset_view(&mut self) -> SessionEvent {
        self.viewport = match (self.raster, self.state().bounds()) {
            (Some(raster), _) => ViewportTransform::fit_to(raster, self.view_size),
            (None, Some(bounds)) => ViewportTransform::fit_bounds(&bounds, self.view_size),
            (None, None) => ViewportTransform::default(),
        };
        SessionEvent::ViewChanged(self.viewport)
    }

    /// 命中测试，优先级：设备、阵列、线路、桥架、区域、屋面。
    pub fn hit_test(&self, point: Point2) -> Option<EntityId> {
        let state = self.state();
        let ratio = state.ratio();
        let tolerance = self.settings.close_tolerance_px;
        let near_path = |points: &[Point2]| {
            points
                .windows(2)
                .any(|pair| distance_to_segment(point, pair[0], pair[1]) <= tolerance)
        };

        if let Some(item) = state
            .equipment
            .iter()
            .rev()
            .find(|item| item.footprint(ratio).is_ok_and(|fp| fp.contains(point)))
        {
            return Some(item.id.clone());
        }
        if let Some(panel) = &state.pv_panel_config {
            if let Some(array) = state
                .pv_arrays
                .iter()
                .rev()
                .find(|array| array.footprint(panel, ratio).is_ok_and(|fp| fp.contains(point)))
            {
                return Some(array.id.clone());
            }
        }
        if let Some(line) = state.lines.iter().rev().find(|line| near_path(line.points())) {
            return Some(line.id().clone());
        }
        if let Some(run) = state.containment.iter().rev().find(|run| near_path(&run.points)) {
            return Some(run.id.clone());
        }
        if let Some(zone) = state
            .zones
            .iter()
            .rev()
            .find(|zone| point_in_polygon(point, &zone.points))
        {
            return Some(zone.id.clone());
        }
        state
            .roof_masks
            .iter()
            .rev()
            .find(|mask| mask.contains(point))
            .map(|mask| mask.id.clone())
    }
}

impl Default for MarkupSession {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

fn with_anchor(state: &DesignState, id: &EntityId, kind: EntityKind, anchor: Point2) -> DesignState {
    let mut next = state.clone();
    match kind {
        EntityKind::Equipment => {
            if let Some(item) = next.equipment_mut(id) {
                item.anchor_point = anchor;
            }
        }
        EntityKind::PvArray => {
            if let Some(array) = next.pv_array_mut(id) {
                array.anchor_point = anchor;
            }
        }
        _ => {}
    }
    next
}

fn array_inside_mask(state: &DesignState, id: &EntityId) -> bool {
    state
        .pv_arrays
        .iter()
        .find(|array| &array.id == id)
        .is_some_and(|array| {
            state
                .roof_mask(&array.roof_mask_id)
                .is_some_and(|mask| mask.contains(array.anchor_point))
        })
}
