use std::collections::BTreeMap;

use planmark_core::design::{EntityId, EquipmentItem};
use planmark_core::errors::GeometryError;
use planmark_core::geometry::{Footprint, Point2};
use tracing::debug;

use crate::errors::EngineError;

pub const ROTATION_STEP_DEGREES: u16 = 45;

/// 设备类型及其真实尺寸（米）。
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentSpec {
    pub equipment_type: String,
    pub width_m: f64,
    pub height_m: f64,
}

impl EquipmentSpec {
    pub fn new(equipment_type: impl Into<String>, width_m: f64, height_m: f64) -> Self {
        Self {
            equipment_type: equipment_type.into(),
            width_m,
            height_m,
        }
    }
}

/// 设备目录：按类型名查找尺寸。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquipmentCatalog {
    entries: BTreeMap<String, EquipmentSpec>,
}

impl EquipmentCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 内置的常用电气设备。
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (name, width, height) in [
            ("distribution-board", 0.6, 0.25),
            ("consumer-unit", 0.45, 0.2),
            ("inverter", 0.7, 0.3),
            ("battery", 1.0, 0.6),
            ("meter", 0.3, 0.2),
            ("isolator", 0.2, 0.15),
            ("socket", 0.15, 0.1),
            ("luminaire", 0.6, 0.6),
            ("ev-charger", 0.4, 0.3),
        ] {
            catalog.insert(EquipmentSpec::new(name, width, height));
        }
        catalog
    }

    /// 插入或覆盖同名条目。
    pub fn insert(&mut self, spec: EquipmentSpec) -> Option<EquipmentSpec> {
        self.entries.insert(spec.equipment_type.clone(), spec)
    }

    pub fn get(&self, equipment_type: &str) -> Option<&EquipmentSpec> {
        self.entries.get(equipment_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EquipmentSpec> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 旋转角加 45° 后对 360 取模。
#[inline]
pub fn next_rotation(rotation_degrees: u16) -> u16 {
    (rotation_degrees + ROTATION_STEP_DEGREES) % 360
}

/// 设备放置工具的临时状态：当前类型、旋转角与指针位置。
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    catalog: EquipmentCatalog,
    active: Option<String>,
    rotation_degrees: u16,
    cursor: Option<Point2>,
}

impl PlacementEngine {
    pub fn new(catalog: EquipmentCatalog) -> Self {
        Self {
            catalog,
            active: None,
            rotation_degrees: 0,
            cursor: None,
        }
    }

    #[inline]
    pub fn catalog(&self) -> &EquipmentCatalog {
        &self.catalog
    }

    #[inline]
    pub fn active_type(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[inline]
    pub fn rotation_degrees(&self) -> u16 {
        self.rotation_degrees
    }

    /// 切换到某种设备的放置工具。在放置工具之间切换时保留旋转角。
    pub fn activate(&mut self, equipment_type: &str) -> Result<(), EngineError> {
        if self.catalog.get(equipment_type).is_none() {
            return Err(EngineError::UnknownEquipment(equipment_type.to_string()));
        }
        self.active = Some(equipment_type.to_string());
        debug!(equipment_type, rotation = self.rotation_degrees, "设备放置工具已激活");
        Ok(())
    }

    /// 离开放置工具，旋转角归零。
    pub fn deactivate(&mut self) {
        self.active = None;
        self.cursor = None;
        self.rotation_degrees = 0;
    }

    pub fn pointer_move(&mut self, point: Point2) {
        self.cursor = Some(point);
    }

    pub fn rotate(&mut self) -> Result<u16, EngineError> {
        if self.active.is_none() {
            return Err(EngineError::NoPlacementTool);
        }
        self.rotation_degrees = next_rotation(self.rotation_degrees);
        Ok(self.rotation_degrees)
    }

    fn active_spec(&self) -> Result<&EquipmentSpec, EngineError> {
        let name = self.active.as_deref().ok_or(EngineError::NoPlacementTool)?;
        self.catalog
            .get(name)
            .ok_or_else(|| EngineError::UnknownEquipment(name.to_string()))
    }

    /// 跟随指针的预览占地范围；未标定或没有指针位置时为空。
    pub fn preview(&self, ratio: Option<f64>) -> Option<Footprint> {
        let cursor = self.cursor?;
        let spec = self.active_spec().ok()?;
        self.item_at(spec, cursor, EntityId::new("preview"))
            .footprint(ratio)
            .ok()
    }

    /// 在指定位置放置一个设备，返回新设备及其像素占地范围。
    pub fn place(
        &self,
        at: Point2,
        ratio: Option<f64>,
    ) -> Result<(EquipmentItem, Footprint), EngineError> {
        let spec = self.active_spec()?;
        if ratio.is_none() {
            return Err(GeometryError::ScaleNotSet.into());
        }
        let item = self.item_at(spec, at, EntityId::generate());
        let footprint = item.footprint(ratio)?;
        debug!(
            id = %item.id,
            equipment_type = %item.equipment_type,
            rotation = item.rotation_degrees,
            "设备已放置"
        );
        Ok((item, footprint))
    }

    fn item_at(&self, spec: &EquipmentSpec, at: Point2, id: EntityId) -> EquipmentItem {
        EquipmentItem {
            id,
            equipment_type: spec.equipment_type.clone(),
            anchor_point: at,
            rotation_degrees: self.rotation_degrees,
            real_width_m: spec.width_m,
            real_height_m: spec.height_m,
        }
    }
}

impl Default for PlacementEngine {
    fn default() -> Self {
        Self::new(EquipmentCatalog::builtin())
    }
}
