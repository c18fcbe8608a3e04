use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GeometryError;
use crate::geometry::{
    self, Bounds2D, Footprint, Point2, point_in_polygon, polygon_area_m2, polyline_length_m,
};

pub const MIN_POLYLINE_POINTS: usize = 2;
pub const MIN_POLYGON_POINTS: usize = 3;
const MEASURE_EPSILON: f64 = 1e-9;

/// 持久化的测量值是否可用：有限且大于 0。
#[inline]
pub fn stored_measure_present(value: f64) -> bool {
    value.is_finite() && value > MEASURE_EPSILON
}

/// 实体 ID。跨实体引用一律使用纯字符串 ID，避免对象指针与循环引用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[inline]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// 生成新的随机 ID（UUID v4）。
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn require_points(
    shape: &'static str,
    points: &[Point2],
    required: usize,
) -> Result<(), GeometryError> {
    if points.len() < required {
        return Err(GeometryError::TooFewPoints {
            shape,
            required,
            actual: points.len(),
        });
    }
    Ok(())
}

/// 比例信息。`ratio_meters_per_pixel` 在完成标定前为空，重新标定时整体替换。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleInfo {
    #[serde(default)]
    pub pixel_distance: f64,
    #[serde(default)]
    pub real_distance_meters: f64,
    #[serde(default)]
    pub ratio_meters_per_pixel: Option<f64>,
}

impl ScaleInfo {
    /// 由参考线像素长度与真实长度计算比例。
    pub fn calibrated(pixel_distance: f64, real_distance_meters: f64) -> Result<Self, GeometryError> {
        let ratio = real_distance_meters / pixel_distance;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(GeometryError::InvalidRatio(ratio));
        }
        Ok(Self {
            pixel_distance,
            real_distance_meters,
            ratio_meters_per_pixel: Some(ratio),
        })
    }

    #[inline]
    pub fn ratio(&self) -> Option<f64> {
        self.ratio_meters_per_pixel
    }

    #[inline]
    pub fn is_calibrated(&self) -> bool {
        self.ratio_meters_per_pixel.is_some()
    }

    #[inline]
    pub fn require_ratio(&self) -> Result<f64, GeometryError> {
        self.ratio_meters_per_pixel.ok_or(GeometryError::ScaleNotSet)
    }
}

/// 设备图块。旋转角取值 {0, 45, …, 315}，锚点为图块中心。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentItem {
    pub id: EntityId,
    pub equipment_type: String,
    pub anchor_point: Point2,
    #[serde(default)]
    pub rotation_degrees: u16,
    pub real_width_m: f64,
    pub real_height_m: f64,
}

impl EquipmentItem {
    /// 按当前比例换算出的像素占地范围。
    pub fn footprint(&self, ratio: Option<f64>) -> Result<Footprint, GeometryError> {
        let width = geometry::meters_to_pixels(self.real_width_m, ratio)?;
        let height = geometry::meters_to_pixels(self.real_height_m, ratio)?;
        Ok(Footprint::centered(
            self.anchor_point,
            width,
            height,
            f64::from(self.rotation_degrees),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoltageClass {
    Mv,
    LvAc,
    Dc,
}

impl VoltageClass {
    /// LV/AC 电缆在绘制完成后需要补充电缆明细。
    #[inline]
    pub fn requires_details(self) -> bool {
        matches!(self, VoltageClass::LvAc)
    }

    pub fn label(self) -> &'static str {
        match self {
            VoltageClass::Mv => "MV",
            VoltageClass::LvAc => "LV/AC",
            VoltageClass::Dc => "DC",
        }
    }
}

/// 电缆明细表单提交的内容。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CableSpec {
    pub cable_type: String,
    pub start_height_m: f64,
    pub end_height_m: f64,
    pub termination_count: u32,
    pub label: String,
}

/// 供电线路。`path_length` 与 `total_length` 为派生字段，只能通过方法修改，
/// 保证 `total_length = path_length + start_height_m + end_height_m` 恒成立。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyLine {
    id: EntityId,
    points: Vec<Point2>,
    #[serde(default)]
    path_length: f64,
    #[serde(default)]
    start_height_m: f64,
    #[serde(default)]
    end_height_m: f64,
    #[serde(default)]
    total_length: f64,
    voltage_class: VoltageClass,
    #[serde(default)]
    cable_type: String,
    #[serde(default)]
    termination_count: u32,
    #[serde(default)]
    label: String,
}

impl SupplyLine {
    pub fn new(
        id: EntityId,
        points: Vec<Point2>,
        ratio: Option<f64>,
        voltage_class: VoltageClass,
        spec: CableSpec,
    ) -> Result<Self, GeometryError> {
        require_points("supply line", &points, MIN_POLYLINE_POINTS)?;
        let path_length = polyline_length_m(&points, ratio)?;
        let mut line = Self {
            id,
            points,
            path_length,
            start_height_m: spec.start_height_m,
            end_height_m: spec.end_height_m,
            total_length: 0.0,
            voltage_class,
            cable_type: spec.cable_type,
            termination_count: spec.termination_count,
            label: spec.label,
        };
        line.refresh_total();
        Ok(line)
    }

    #[inline]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    #[inline]
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    #[inline]
    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    #[inline]
    pub fn start_height_m(&self) -> f64 {
        self.start_height_m
    }

    #[inline]
    pub fn end_height_m(&self) -> f64 {
        self.end_height_m
    }

    #[inline]
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    #[inline]
    pub fn voltage_class(&self) -> VoltageClass {
        self.voltage_class
    }

    #[inline]
    pub fn cable_type(&self) -> &str {
        &self.cable_type
    }

    #[inline]
    pub fn termination_count(&self) -> u32 {
        self.termination_count
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_points(&mut self, points: Vec<Point2>, ratio: Option<f64>) -> Result<(), GeometryError> {
        require_points("supply line", &points, MIN_POLYLINE_POINTS)?;
        self.path_length = polyline_length_m(&points, ratio)?;
        self.points = points;
        self.refresh_total();
        Ok(())
    }

    pub fn set_heights(&mut self, start_height_m: f64, end_height_m: f64) {
        self.start_height_m = start_height_m;
        self.end_height_m = end_height_m;
        self.refresh_total();
    }

    pub fn apply_spec(&mut self, spec: CableSpec) {
        self.cable_type = spec.cable_type;
        self.termination_count = spec.termination_count;
        self.label = spec.label;
        self.set_heights(spec.start_height_m, spec.end_height_m);
    }

    /// 仅在路径长度缺失（为 0、负数或非有限值）时按比例补算，然后刷新总长度。
    /// 已有的测量值保持不变，与重新标定不追溯更新的规则一致。返回是否发生变化。
    pub fn fill_missing_length(&mut self, ratio: Option<f64>) -> Result<bool, GeometryError> {
        let mut changed = false;
        if !stored_measure_present(self.path_length) {
            self.path_length = polyline_length_m(&self.points, ratio)?;
            changed = true;
        }
        let total_changed = self.refresh_total();
        Ok(changed || total_changed)
    }

    /// 重新计算总长度，返回是否发生变化（用于加载时修复数据）。
    pub fn refresh_total(&mut self) -> bool {
        let total = self.path_length + self.start_height_m + self.end_height_m;
        let changed = total != self.total_length;
        self.total_length = total;
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainmentType {
    CableTray,
    Trunking,
    WireBasket,
    LadderRack,
    Conduit,
    Sleeve,
}

impl ContainmentType {
    /// 需要在绘制后选择规格的类型。
    #[inline]
    pub fn requires_size(self) -> bool {
        matches!(
            self,
            ContainmentType::CableTray
                | ContainmentType::Trunking
                | ContainmentType::WireBasket
                | ContainmentType::LadderRack
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ContainmentType::CableTray => "cable tray",
            ContainmentType::Trunking => "trunking",
            ContainmentType::WireBasket => "wire basket",
            ContainmentType::LadderRack => "ladder rack",
            ContainmentType::Conduit => "conduit",
            ContainmentType::Sleeve => "sleeve",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Containment {
    pub id: EntityId,
    pub containment_type: ContainmentType,
    #[serde(default)]
    pub size: Option<String>,
    pub points: Vec<Point2>,
    #[serde(default)]
    pub length: f64,
}

impl Containment {
    pub fn new(
        id: EntityId,
        containment_type: ContainmentType,
        size: Option<String>,
        points: Vec<Point2>,
        ratio: Option<f64>,
    ) -> Result<Self, GeometryError> {
        require_points("containment run", &points, MIN_POLYLINE_POINTS)?;
        let length = polyline_length_m(&points, ratio)?;
        Ok(Self {
            id,
            containment_type,
            size,
            points,
            length,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyZone {
    pub id: EntityId,
    pub points: Vec<Point2>,
    #[serde(default)]
    pub area_m2: f64,
}

impl SupplyZone {
    pub fn new(id: EntityId, points: Vec<Point2>, ratio: Option<f64>) -> Result<Self, GeometryError> {
        require_points("supply zone", &points, MIN_POLYGON_POINTS)?;
        let area_m2 = polygon_area_m2(&points, ratio)?;
        Ok(Self { id, points, area_m2 })
    }
}

/// 屋面遮罩：可用屋面区域的闭合多边形，带坡度与坡向。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoofMask {
    pub id: EntityId,
    pub points: Vec<Point2>,
    #[serde(default)]
    pub pitch_degrees: f64,
    #[serde(default)]
    pub azimuth_degrees: f64,
}

impl RoofMask {
    pub fn new(
        id: EntityId,
        points: Vec<Point2>,
        pitch_degrees: f64,
        azimuth_degrees: f64,
    ) -> Result<Self, GeometryError> {
        require_points("roof mask", &points, MIN_POLYGON_POINTS)?;
        Ok(Self {
            id,
            points,
            pitch_degrees,
            azimuth_degrees,
        })
    }

    #[inline]
    pub fn contains(&self, point: Point2) -> bool {
        point_in_polygon(point, &self.points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PanelOrientation {
    #[default]
    Portrait,
    Landscape,
}

/// 全局光伏组件参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvPanelConfig {
    pub length_m: f64,
    pub width_m: f64,
    pub wattage: f64,
}

impl PvPanelConfig {
    /// 单块组件在给定朝向下的（横向, 纵向）尺寸，单位米。
    pub fn oriented_size(&self, orientation: PanelOrientation) -> (f64, f64) {
        match orientation {
            PanelOrientation::Portrait => (self.width_m, self.length_m),
            PanelOrientation::Landscape => (self.length_m, self.width_m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvArrayItem {
    pub id: EntityId,
    pub roof_mask_id: EntityId,
    pub rows: u32,
    pub columns: u32,
    #[serde(default)]
    pub orientation: PanelOrientation,
    pub anchor_point: Point2,
    #[serde(default)]
    pub rotation_degrees: u16,
}

impl PvArrayItem {
    #[inline]
    pub fn panel_count(&self) -> u32 {
        self.rows * self.columns
    }

    /// 阵列真实尺寸（宽, 高），单位米。
    pub fn size_m(&self, panel: &PvPanelConfig) -> (f64, f64) {
        array_size_m(panel, self.orientation, self.rows, self.columns)
    }

    pub fn footprint(&self, panel: &PvPanelConfig, ratio: Option<f64>) -> Result<Footprint, GeometryError> {
        let (width_m, height_m) = self.size_m(panel);
        Ok(Footprint::from_corner(
            self.anchor_point,
            geometry::meters_to_pixels(width_m, ratio)?,
            geometry::meters_to_pixels(height_m, ratio)?,
            f64::from(self.rotation_degrees),
        ))
    }
}

/// 计算 rows × columns 阵列的真实尺寸（宽, 高）。
pub fn array_size_m(
    panel: &PvPanelConfig,
    orientation: PanelOrientation,
    rows: u32,
    columns: u32,
) -> (f64, f64) {
    let (across, down) = panel.oriented_size(orientation);
    (across * f64::from(columns), down * f64::from(rows))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

/// 任务仅通过 ID 反向关联实体，不拥有被关联对象。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    #[serde(default)]
    pub linked_item_id: Option<EntityId>,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Equipment,
    Line,
    Zone,
    Containment,
    RoofMask,
    PvArray,
    Task,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Equipment => "equipment",
            EntityKind::Line => "line",
            EntityKind::Zone => "zone",
            EntityKind::Containment => "containment",
            EntityKind::RoofMask => "roof mask",
            EntityKind::PvArray => "pv array",
            EntityKind::Task => "task",
        }
    }
}

/// 按实体类型区分的标签联合体。
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Equipment(EquipmentItem),
    Line(SupplyLine),
    Zone(SupplyZone),
    Containment(Containment),
    RoofMask(RoofMask),
    PvArray(PvArrayItem),
    Task(Task),
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Equipment(item) => &item.id,
            Entity::Line(line) => line.id(),
            Entity::Zone(zone) => &zone.id,
            Entity::Containment(run) => &run.id,
            Entity::RoofMask(mask) => &mask.id,
            Entity::PvArray(array) => &array.id,
            Entity::Task(task) => &task.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Equipment(_) => EntityKind::Equipment,
            Entity::Line(_) => EntityKind::Line,
            Entity::Zone(_) => EntityKind::Zone,
            Entity::Containment(_) => EntityKind::Containment,
            Entity::RoofMask(_) => EntityKind::RoofMask,
            Entity::PvArray(_) => EntityKind::PvArray,
            Entity::Task(_) => EntityKind::Task,
        }
    }
}

/// 对 `DesignState` 中实体的只读引用。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityRef<'a> {
    Equipment(&'a EquipmentItem),
    Line(&'a SupplyLine),
    Zone(&'a SupplyZone),
    Containment(&'a Containment),
    RoofMask(&'a RoofMask),
    PvArray(&'a PvArrayItem),
    Task(&'a Task),
}

impl EntityRef<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Equipment(_) => EntityKind::Equipment,
            EntityRef::Line(_) => EntityKind::Line,
            EntityRef::Zone(_) => EntityKind::Zone,
            EntityRef::Containment(_) => EntityKind::Containment,
            EntityRef::RoofMask(_) => EntityKind::RoofMask,
            EntityRef::PvArray(_) => EntityKind::PvArray,
            EntityRef::Task(_) => EntityKind::Task,
        }
    }
}

/// 设计统计信息。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignSummary {
    pub equipment: usize,
    pub lines: usize,
    pub zones: usize,
    pub containment_runs: usize,
    pub roof_masks: usize,
    pub pv_arrays: usize,
    pub tasks: usize,
    pub cable_length_m: f64,
    pub containment_length_m: f64,
    pub zone_area_m2: f64,
    pub pv_panels: u32,
    pub pv_capacity_kwp: Option<f64>,
}

/// 完整设计状态，是撤销/重做的基本单位。所有集合在反序列化时缺失即为空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignState {
    #[serde(default)]
    pub equipment: Vec<EquipmentItem>,
    #[serde(default)]
    pub lines: Vec<SupplyLine>,
    #[serde(default)]
    pub zones: Vec<SupplyZone>,
    #[serde(default)]
    pub containment: Vec<Containment>,
    #[serde(default)]
    pub roof_masks: Vec<RoofMask>,
    #[serde(default)]
    pub pv_arrays: Vec<PvArrayItem>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub scale_info: ScaleInfo,
    #[serde(default)]
    pub design_purpose: String,
    #[serde(default)]
    pub pv_panel_config: Option<PvPanelConfig>,
}

impl DesignState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ratio(&self) -> Option<f64> {
        self.scale_info.ratio()
    }

    /// 插入实体并返回其 ID。
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id().clone();
        match entity {
            Entity::Equipment(item) => self.equipment.push(item),
            Entity::Line(line) => self.lines.push(line),
            Entity::Zone(zone) => self.zones.push(zone),
            Entity::Containment(run) => self.containment.push(run),
            Entity::RoofMask(mask) => self.roof_masks.push(mask),
            Entity::PvArray(array) => self.pv_arrays.push(array),
            Entity::Task(task) => self.tasks.push(task),
        }
        id
    }

    pub fn entity(&self, id: &EntityId) -> Option<EntityRef<'_>> {
        if let Some(item) = self.equipment.iter().find(|item| &item.id == id) {
            return Some(EntityRef::Equipment(item));
        }
        if let Some(line) = self.lines.iter().find(|line| line.id() == id) {
            return Some(EntityRef::Line(line));
        }
        if let Some(zone) = self.zones.iter().find(|zone| &zone.id == id) {
            return Some(EntityRef::Zone(zone));
        }
        if let Some(run) = self.containment.iter().find(|run| &run.id == id) {
            return Some(EntityRef::Containment(run));
        }
        if let Some(mask) = self.roof_masks.iter().find(|mask| &mask.id == id) {
            return Some(EntityRef::RoofMask(mask));
        }
        if let Some(array) = self.pv_arrays.iter().find(|array| &array.id == id) {
            return Some(EntityRef::PvArray(array));
        }
        self.tasks
            .iter()
            .find(|task| &task.id == id)
            .map(EntityRef::Task)
    }

    #[inline]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entity(id).is_some()
    }

    pub fn equipment_mut(&mut self, id: &EntityId) -> Option<&mut EquipmentItem> {
        self.equipment.iter_mut().find(|item| &item.id == id)
    }

    pub fn pv_array_mut(&mut self, id: &EntityId) -> Option<&mut PvArrayItem> {
        self.pv_arrays.iter_mut().find(|array| &array.id == id)
    }

    pub fn task_mut(&mut self, id: &EntityId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| &task.id == id)
    }

    pub fn roof_mask(&self, id: &EntityId) -> Option<&RoofMask> {
        self.roof_masks.iter().find(|mask| &mask.id == id)
    }

    /// 返回包含该点的第一个屋面遮罩。
    pub fn roof_mask_containing(&self, point: Point2) -> Option<&RoofMask> {
        self.roof_masks.iter().find(|mask| mask.contains(point))
    }

    pub fn tasks_linked_to<'a>(&'a self, id: &'a EntityId) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks
            .iter()
            .filter(move |task| task.linked_item_id.as_ref() == Some(id))
    }

    /// 计算删除给定实体时需要一并移除的全部 ID（含自身）。
    ///
    /// 屋面遮罩连带其上的光伏阵列；任何被删除实体上关联的任务一并删除。
    /// 不存在的 ID 会被忽略。
    pub fn cascade_ids(&self, ids: &[EntityId]) -> Vec<EntityId> {
        let mut doomed: Vec<EntityId> = Vec::new();
        let mut seen: HashSet<EntityId> = HashSet::new();
        for id in ids {
            if self.contains(id) && seen.insert(id.clone()) {
                doomed.push(id.clone());
            }
        }

        for array in &self.pv_arrays {
            if seen.contains(&array.roof_mask_id) && seen.insert(array.id.clone()) {
                doomed.push(array.id.clone());
            }
        }

        for task in &self.tasks {
            let linked = task
                .linked_item_id
                .as_ref()
                .is_some_and(|link| seen.contains(link));
            if linked && seen.insert(task.id.clone()) {
                doomed.push(task.id.clone());
            }
        }
        doomed
    }

    /// 直接移除给定 ID 的实体，不做级联；返回移除数量。
    pub fn remove_entities(&mut self, ids: &[EntityId]) -> usize {
        let doomed: HashSet<&EntityId> = ids.iter().collect();
        let before = self.entity_count();
        self.equipment.retain(|item| !doomed.contains(&item.id));
        self.lines.retain(|line| !doomed.contains(line.id()));
        self.zones.retain(|zone| !doomed.contains(&zone.id));
        self.containment.retain(|run| !doomed.contains(&run.id));
        self.roof_masks.retain(|mask| !doomed.contains(&mask.id));
        self.pv_arrays.retain(|array| !doomed.contains(&array.id));
        self.tasks.retain(|task| !doomed.contains(&task.id));
        before - self.entity_count()
    }

    /// 级联删除：主实体与其依赖项在同一次修改中移除。
    pub fn remove_with_dependents(&mut self, ids: &[EntityId]) -> Vec<EntityId> {
        let doomed = self.cascade_ids(ids);
        self.remove_entities(&doomed);
        doomed
    }

    pub fn entity_count(&self) -> usize {
        self.equipment.len()
            + self.lines.len()
            + self.zones.len()
            + self.containment.len()
            + self.roof_masks.len()
            + self.pv_arrays.len()
            + self.tasks.len()
    }

    /// 所有几何点的范围；设备与阵列仅计入锚点。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        let points = self
            .equipment
            .iter()
            .map(|item| item.anchor_point)
            .chain(self.pv_arrays.iter().map(|array| array.anchor_point))
            .chain(self.lines.iter().flat_map(|line| line.points().iter().copied()))
            .chain(self.zones.iter().flat_map(|zone| zone.points.iter().copied()))
            .chain(self.containment.iter().flat_map(|run| run.points.iter().copied()))
            .chain(self.roof_masks.iter().flat_map(|mask| mask.points.iter().copied()));
        for point in points {
            bounds.include_point(point);
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    pub fn summary(&self) -> DesignSummary {
        let pv_panels: u32 = self.pv_arrays.iter().map(PvArrayItem::panel_count).sum();
        let pv_capacity_kwp = self
            .pv_panel_config
            .as_ref()
            .map(|panel| f64::from(pv_panels) * panel.wattage / 1000.0);
        DesignSummary {
            equipment: self.equipment.len(),
            lines: self.lines.len(),
            zones: self.zones.len(),
            containment_runs: self.containment.len(),
            roof_masks: self.roof_masks.len(),
            pv_arrays: self.pv_arrays.len(),
            tasks: self.tasks.len(),
            cable_length_m: self.lines.iter().map(SupplyLine::total_length).sum(),
            containment_length_m: self.containment.iter().map(|run| run.length).sum(),
            zone_area_m2: self.zones.iter().map(|zone| zone.area_m2).sum(),
            pv_panels,
            pv_capacity_kwp,
        }
    }
}
