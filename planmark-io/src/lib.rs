use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use planmark_core::design::{
    DesignState, EntityId, MIN_POLYGON_POINTS, MIN_POLYLINE_POINTS, PvPanelConfig, ScaleInfo,
    stored_measure_present,
};
use planmark_core::geometry::{Point2, polygon_area_m2, polyline_length_m};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const ROTATION_STEP: f64 = 45.0;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid design document: {0}")]
    InvalidDocument(String),
    #[error("failed to serialize design: {0}")]
    Serialize(String),
}

pub trait DesignLoader {
    fn load(&self, path: &Path) -> Result<DesignState, IoError>;
}

pub trait DesignSaver {
    fn save(&self, state: &DesignState, path: &Path) -> Result<(), IoError>;
}

/// 加载时对数据所做修复的记录。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    notes: Vec<String>,
}

impl RepairReport {
    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(repair = %message, "设计数据已修复");
        self.notes.push(message);
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// JSON 设计文件的读写。读取时容错并修复，写入时严格。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDesignStore;

impl JsonDesignStore {
    pub fn new() -> Self {
        Self
    }

    /// 读取并返回修复报告。
    pub fn load_with_report(&self, path: &Path) -> Result<(DesignState, RepairReport), IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let (state, report) = from_json_str(&data)?;
        debug!(
            path = %path.display(),
            entities = state.entity_count(),
            repairs = report.len(),
            "设计文件已读取"
        );
        Ok((state, report))
    }
}

impl DesignLoader for JsonDesignStore {
    fn load(&self, path: &Path) -> Result<DesignState, IoError> {
        self.load_with_report(path).map(|(state, _)| state)
    }
}

impl DesignSaver for JsonDesignStore {
    fn save(&self, state: &DesignState, path: &Path) -> Result<(), IoError> {
        let serialized = to_json_string(state)?;
        fs::write(path, serialized).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "设计文件已保存");
        Ok(())
    }
}

/// 解析 JSON 文本。只有语法错误或顶层不是对象时报错，其余问题逐项修复。
pub fn from_json_str(text: &str) -> Result<(DesignState, RepairReport), IoError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| IoError::InvalidDocument(err.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(IoError::InvalidDocument(
            "top-level value must be an object".to_string(),
        ));
    };

    let mut report = RepairReport::default();
    let state = DesignState {
        equipment: collection(&mut root, "equipment", &mut report),
        lines: collection(&mut root, "lines", &mut report),
        zones: collection(&mut root, "zones", &mut report),
        containment: collection(&mut root, "containment", &mut report),
        roof_masks: collection(&mut root, "roofMasks", &mut report),
        pv_arrays: collection(&mut root, "pvArrays", &mut report),
        tasks: collection(&mut root, "tasks", &mut report),
        scale_info: field(&mut root, "scaleInfo", &mut report).unwrap_or_default(),
        design_purpose: field(&mut root, "designPurpose", &mut report).unwrap_or_default(),
        pv_panel_config: field(&mut root, "pvPanelConfig", &mut report),
    };
    let state = repair_into(state, &mut report);
    Ok((state, report))
}

/// 严格序列化：所有字段都写出，非有限数值视为错误。
pub fn to_json_string(state: &DesignState) -> Result<String, IoError> {
    ensure_finite(state)?;
    serde_json::to_string_pretty(state).map_err(|err| IoError::Serialize(err.to_string()))
}

/// 修复内存中的设计，使其满足全部不变量。
pub fn repair(state: DesignState) -> (DesignState, RepairReport) {
    let mut report = RepairReport::default();
    let state = repair_into(state, &mut report);
    (state, report)
}

fn collection<T: DeserializeOwned>(
    root: &mut Map<String, Value>,
    key: &'static str,
    report: &mut RepairReport,
) -> Vec<T> {
    match root.remove(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::from_value(item) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    report.note(format!("{key}[{index}] dropped: {err}"));
                    None
                }
            })
            .collect(),
        Some(_) => {
            report.note(format!("{key} is not an array, treated as empty"));
            Vec::new()
        }
    }
}

fn field<T: DeserializeOwned>(
    root: &mut Map<String, Value>,
    key: &'static str,
    report: &mut RepairReport,
) -> Option<T> {
    match root.remove(key) {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                report.note(format!("{key} ignored: {err}"));
                None
            }
        },
    }
}

fn repair_into(mut state: DesignState, report: &mut RepairReport) -> DesignState {
    state.scale_info = repair_scale(state.scale_info, report);
    let ratio = state.ratio();

    if let Some(panel) = &state.pv_panel_config {
        if !panel_is_valid(panel) {
            report.note("pvPanelConfig has non-positive values, cleared");
            state.pv_panel_config = None;
        }
    }

    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut unique = |id: &EntityId, report: &mut RepairReport| {
        let fresh = seen.insert(id.clone());
        if !fresh {
            report.note(format!("duplicate id {id} dropped"));
        }
        fresh
    };

    state.equipment.retain(|item| unique(&item.id, report));
    state.lines.retain(|line| unique(line.id(), report));
    state.zones.retain(|zone| unique(&zone.id, report));
    state.containment.retain(|run| unique(&run.id, report));
    state.roof_masks.retain(|mask| unique(&mask.id, report));
    state.pv_arrays.retain(|array| unique(&array.id, report));
    state.tasks.retain(|task| unique(&task.id, report));

    state.equipment.retain(|item| {
        let valid = positive(item.real_width_m) && positive(item.real_height_m) && finite_point(item.anchor_point);
        if !valid {
            report.note(format!("equipment {} has invalid size or position, dropped", item.id));
        }
        valid
    });
    for item in &mut state.equipment {
        let normalized = normalize_rotation(item.rotation_degrees);
        if normalized != item.rotation_degrees {
            report.note(format!(
                "equipment {} rotation {}° snapped to {normalized}°",
                item.id, item.rotation_degrees
            ));
            item.rotation_degrees = normalized;
        }
    }

    state.lines.retain(|line| {
        let valid = enough_points(line.points(), MIN_POLYLINE_POINTS);
        if !valid {
            report.note(format!("line {} has fewer than 2 valid points, dropped", line.id()));
        }
        valid
    });
    for line in &mut state.lines {
        let changed = match ratio {
            Some(_) => line.fill_missing_length(ratio).unwrap_or(false),
            None => line.refresh_total(),
        };
        if changed {
            report.note(format!("line {} lengths recomputed", line.id()));
        }
    }

    state.zones.retain(|zone| {
        let valid = enough_points(&zone.points, MIN_POLYGON_POINTS);
        if !valid {
            report.note(format!("zone {} has fewer than 3 valid points, dropped", zone.id));
        }
        valid
    });
    if ratio.is_some() {
        for zone in &mut state.zones {
            if stored_measure_present(zone.area_m2) {
                continue;
            }
            if let Ok(area) = polygon_area_m2(&zone.points, ratio) {
                report.note(format!("zone {} area was missing, recomputed", zone.id));
                zone.area_m2 = area;
            }
        }
    }

    state.containment.retain(|run| {
        let valid = enough_points(&run.points, MIN_POLYLINE_POINTS);
        if !valid {
            report.note(format!("containment {} has fewer than 2 valid points, dropped", run.id));
        }
        valid
    });
    for run in &mut state.containment {
        if run.containment_type.requires_size()
            && run.size.as_deref().is_some_and(|size| size.trim().is_empty())
        {
            run.size = None;
        }
        if stored_measure_present(run.length) {
            continue;
        }
        if let Ok(length) = polyline_length_m(&run.points, ratio) {
            report.note(format!("containment {} length was missing, recomputed", run.id));
            run.length = length;
        }
    }

    state.roof_masks.retain(|mask| {
        let valid = enough_points(&mask.points, MIN_POLYGON_POINTS);
        if !valid {
            report.note(format!("roof mask {} has fewer than 3 valid points, dropped", mask.id));
        }
        valid
    });
    for mask in &mut state.roof_masks {
        let pitch = if mask.pitch_degrees.is_finite() {
            mask.pitch_degrees.clamp(0.0, 90.0)
        } else {
            0.0
        };
        if pitch != mask.pitch_degrees {
            report.note(format!("roof mask {} pitch clamped to {pitch}°", mask.id));
            mask.pitch_degrees = pitch;
        }
        let azimuth = if mask.azimuth_degrees.is_finite() {
            mask.azimuth_degrees.rem_euclid(360.0)
        } else {
            0.0
        };
        if azimuth != mask.azimuth_degrees {
            report.note(format!("roof mask {} azimuth normalized to {azimuth}°", mask.id));
            mask.azimuth_degrees = azimuth;
        }
    }

    let masks = state.roof_masks.clone();
    state.pv_arrays.retain(|array| {
        if array.rows == 0 || array.columns == 0 {
            report.note(format!("pv array {} has an empty grid, dropped", array.id));
            return false;
        }
        let inside = masks
            .iter()
            .find(|mask| mask.id == array.roof_mask_id)
            .is_some_and(|mask| mask.contains(array.anchor_point));
        if !inside {
            report.note(format!(
                "pv array {} is not inside roof mask {}, dropped",
                array.id, array.roof_mask_id
            ));
        }
        inside
    });
    for array in &mut state.pv_arrays {
        let normalized = normalize_rotation(array.rotation_degrees);
        if normalized != array.rotation_degrees {
            report.note(format!("pv array {} rotation snapped to {normalized}°", array.id));
            array.rotation_degrees = normalized;
        }
    }

    let live: HashSet<EntityId> = state
        .equipment
        .iter()
        .map(|item| item.id.clone())
        .chain(state.lines.iter().map(|line| line.id().clone()))
        .chain(state.zones.iter().map(|zone| zone.id.clone()))
        .chain(state.containment.iter().map(|run| run.id.clone()))
        .chain(state.roof_masks.iter().map(|mask| mask.id.clone()))
        .chain(state.pv_arrays.iter().map(|array| array.id.clone()))
        .collect();
    for task in &mut state.tasks {
        if let Some(link) = &task.linked_item_id {
            if !live.contains(link) {
                report.note(format!("task {} link to missing {link} cleared", task.id));
                task.linked_item_id = None;
            }
        }
    }

    state
}

fn repair_scale(scale: ScaleInfo, report: &mut RepairReport) -> ScaleInfo {
    let recomputed = ScaleInfo::calibrated(scale.pixel_distance, scale.real_distance_meters).ok();
    match (scale.ratio_meters_per_pixel, recomputed) {
        (Some(ratio), _) if positive(ratio) => scale,
        (Some(ratio), Some(fixed)) => {
            report.note(format!("scale ratio {ratio} is invalid, recomputed"));
            fixed
        }
        (Some(ratio), None) => {
            report.note(format!("scale ratio {ratio} is invalid, cleared"));
            ScaleInfo::default()
        }
        (None, Some(fixed)) => {
            report.note("scale ratio missing, recomputed from reference line");
            fixed
        }
        (None, None) => scale,
    }
}

fn panel_is_valid(panel: &PvPanelConfig) -> bool {
    positive(panel.length_m) && positive(panel.width_m) && positive(panel.wattage)
}

#[inline]
fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[inline]
fn finite_point(point: Point2) -> bool {
    point.x().is_finite() && point.y().is_finite()
}

fn enough_points(points: &[Point2], required: usize) -> bool {
    points.len() >= required && points.iter().all(|point| finite_point(*point))
}

/// 旋转角吸附到最近的 45° 倍数并对 360 取模。
fn normalize_rotation(degrees: u16) -> u16 {
    let snapped = (f64::from(degrees) / ROTATION_STEP).round() * ROTATION_STEP;
    (snapped as u32 % 360) as u16
}

fn ensure_finite(state: &DesignState) -> Result<(), IoError> {
    let points = state
        .equipment
        .iter()
        .map(|item| item.anchor_point)
        .chain(state.pv_arrays.iter().map(|array| array.anchor_point))
        .chain(state.lines.iter().flat_map(|line| line.points().iter().copied()))
        .chain(state.zones.iter().flat_map(|zone| zone.points.iter().copied()))
        .chain(state.containment.iter().flat_map(|run| run.points.iter().copied()))
        .chain(state.roof_masks.iter().flat_map(|mask| mask.points.iter().copied()));
    for point in points {
        if !finite_point(point) {
            return Err(IoError::InvalidDocument(format!(
                "non-finite coordinate ({}, {})",
                point.x(),
                point.y()
            )));
        }
    }
    if let Some(ratio) = state.ratio() {
        if !positive(ratio) {
            return Err(IoError::InvalidDocument(format!("invalid scale ratio {ratio}")));
        }
    }
    Ok(())
}
