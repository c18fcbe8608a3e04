use planmark_core::design::{DesignState, EntityId, PanelOrientation, PvArrayItem, PvPanelConfig, RoofMask};
use planmark_core::errors::GeometryError;
use planmark_core::geometry::{
    Footprint, Point2, SnapKind, distance, distance_to_polygon_boundary,
    nearest_alignment_candidates, point_in_polygon,
};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::placement::next_rotation;

const MIN_MASK_POINTS: usize = 3;
const MAX_PITCH_DEGREES: f64 = 90.0;

/// 阵列行列与组件朝向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayConfig {
    pub rows: u32,
    pub columns: u32,
    pub orientation: PanelOrientation,
}

/// 阵列吸附参数（像素）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapSettings {
    pub enabled: bool,
    pub corner_tolerance_px: f64,
    pub edge_tolerance_px: f64,
}

impl SnapSettings {
    #[inline]
    pub fn tolerance(&self, kind: SnapKind) -> f64 {
        match kind {
            SnapKind::Corner => self.corner_tolerance_px,
            SnapKind::Edge => self.edge_tolerance_px,
        }
    }
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            corner_tolerance_px: 10.0,
            edge_tolerance_px: 10.0,
        }
    }
}

/// 屋面与阵列工作流所处阶段。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PvPhase {
    #[default]
    Idle,
    PromptPitch {
        points: Vec<Point2>,
    },
    SetDirection {
        points: Vec<Point2>,
        pitch_degrees: f64,
        highest: Option<Point2>,
    },
    PlaceArray {
        config: ArrayConfig,
        rotation_degrees: u16,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectionStep {
    HighestSet(Point2),
    Completed(RoofMask),
}

/// 一次阵列放置的结果。`snapped` 为吸附所采用的候选类型。
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayPlacement {
    pub item: PvArrayItem,
    pub footprint: Footprint,
    pub snapped: Option<SnapKind>,
}

/// 校验全局组件参数：尺寸与功率都必须为正数。
pub fn validate_panel_config(panel: &PvPanelConfig) -> Result<(), EngineError> {
    for (name, value) in [
        ("length", panel.length_m),
        ("width", panel.width_m),
        ("wattage", panel.wattage),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::InvalidPanelConfig(format!(
                "{name} must be a positive number, got {value}"
            )));
        }
    }
    Ok(())
}

/// 由最高点指向最低点的坡向角，归一化到 [0, 360)。
pub fn azimuth_degrees(highest: Point2, lowest: Point2) -> f64 {
    let dy = lowest.y() - highest.y();
    let dx = lowest.x() - highest.x();
    let degrees = dy.atan2(dx).to_degrees().rem_euclid(360.0);
    if degrees >= 360.0 { 0.0 } else { degrees }
}

/// 屋面遮罩（坡度、坡向）与阵列放置的多步流程。
#[derive(Debug, Clone)]
pub struct PvWorkflow {
    phase: PvPhase,
    near_tolerance: f64,
}

impl PvWorkflow {
    pub fn new(near_tolerance: f64) -> Self {
        Self {
            phase: PvPhase::Idle,
            near_tolerance: near_tolerance.max(0.0),
        }
    }

    #[inline]
    pub fn phase(&self) -> &PvPhase {
        &self.phase
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, PvPhase::Idle)
    }

    #[inline]
    pub fn is_placing(&self) -> bool {
        matches!(self.phase, PvPhase::PlaceArray { .. })
    }

    /// 屋面多边形绘制完成，进入坡度输入。
    pub fn begin_pitch(&mut self, points: Vec<Point2>) -> Result<(), EngineError> {
        if points.len() < MIN_MASK_POINTS {
            return Err(GeometryError::TooFewPoints {
                shape: "roof mask",
                required: MIN_MASK_POINTS,
                actual: points.len(),
            }
            .into());
        }
        self.phase = PvPhase::PromptPitch { points };
        debug!("屋面轮廓完成，等待坡度");
        Ok(())
    }

    pub fn submit_pitch(&mut self, pitch_degrees: f64) -> Result<(), EngineError> {
        let PvPhase::PromptPitch { points } = &mut self.phase else {
            return Err(EngineError::RoofStage("a pitch"));
        };
        if !pitch_degrees.is_finite() || !(0.0..=MAX_PITCH_DEGREES).contains(&pitch_degrees) {
            return Err(EngineError::InvalidPitch(pitch_degrees));
        }
        let points = std::mem::take(points);
        self.phase = PvPhase::SetDirection {
            points,
            pitch_degrees,
            highest: None,
        };
        debug!(pitch_degrees, "坡度已设置，等待坡向");
        Ok(())
    }

    /// 坡向点击：先最高点，再最低点。点必须位于遮罩内部或边界附近。
    pub fn direction_click(&mut self, point: Point2) -> Result<DirectionStep, EngineError> {
        let PvPhase::SetDirection {
            points,
            pitch_degrees,
            highest,
        } = &mut self.phase
        else {
            return Err(EngineError::RoofStage("a direction point"));
        };
        let near = distance_to_polygon_boundary(point, points)
            .is_some_and(|gap| gap <= self.near_tolerance);
        if !point_in_polygon(point, points) && !near {
            return Err(EngineError::DirectionPointOutsideMask);
        }

        let Some(high) = *highest else {
            *highest = Some(point);
            return Ok(DirectionStep::HighestSet(point));
        };
        if distance(high, point) <= f64::EPSILON {
            return Err(EngineError::DegenerateDirection);
        }
        let azimuth = azimuth_degrees(high, point);
        let mask = RoofMask::new(
            EntityId::generate(),
            std::mem::take(points),
            *pitch_degrees,
            azimuth,
        )?;
        self.phase = PvPhase::Idle;
        info!(id = %mask.id, pitch = mask.pitch_degrees, azimuth, "屋面遮罩已完成");
        Ok(DirectionStep::Completed(mask))
    }

    /// 放弃当前流程。返回是否有进行中的步骤。
    pub fn cancel(&mut self) -> bool {
        let active = !self.is_idle();
        self.phase = PvPhase::Idle;
        active
    }

    /// 配置阵列并进入放置阶段。需要先设置全局组件参数。
    pub fn configure_array(
        &mut self,
        config: ArrayConfig,
        panel: Option<&PvPanelConfig>,
    ) -> Result<(), EngineError> {
        let panel = panel.ok_or(EngineError::PanelConfigMissing)?;
        validate_panel_config(panel)?;
        if config.rows == 0 || config.columns == 0 {
            return Err(EngineError::InvalidArrayConfig(format!(
                "rows and columns must be at least 1, got {}x{}",
                config.rows, config.columns
            )));
        }
        self.phase = PvPhase::PlaceArray {
            config,
            rotation_degrees: 0,
        };
        debug!(rows = config.rows, columns = config.columns, "阵列已配置");
        Ok(())
    }

    pub fn rotate(&mut self) -> Result<u16, EngineError> {
        let PvPhase::PlaceArray {
            rotation_degrees, ..
        } = &mut self.phase
        else {
            return Err(EngineError::ArrayNotConfigured);
        };
        *rotation_degrees = next_rotation(*rotation_degrees);
        Ok(*rotation_degrees)
    }

    /// 在点击位置放置阵列。放置阶段在放置后保持，直到 Escape。
    pub fn place_array(
        &self,
        click: Point2,
        state: &DesignState,
        snap: &SnapSettings,
    ) -> Result<ArrayPlacement, EngineError> {
        let PvPhase::PlaceArray {
            config,
            rotation_degrees,
        } = &self.phase
        else {
            return Err(EngineError::ArrayNotConfigured);
        };
        let panel = state
            .pv_panel_config
            .as_ref()
            .ok_or(EngineError::PanelConfigMissing)?;
        let ratio = Some(state.scale_info.require_ratio()?);
        let mask = state
            .roof_mask_containing(click)
            .ok_or(EngineError::OutsideRoofMask {
                x: click.x(),
                y: click.y(),
            })?;

        let mut item = PvArrayItem {
            id: EntityId::generate(),
            roof_mask_id: mask.id.clone(),
            rows: config.rows,
            columns: config.columns,
            orientation: config.orientation,
            anchor_point: click,
            rotation_degrees: *rotation_degrees,
        };
        let raw = item.footprint(panel, ratio)?;

        let mut snapped = None;
        let mut footprint = raw;
        if snap.enabled {
            let existing: Vec<Footprint> = state
                .pv_arrays
                .iter()
                .filter(|array| array.roof_mask_id == mask.id)
                .filter_map(|array| array.footprint(panel, ratio).ok())
                .collect();
            let best = nearest_alignment_candidates(&raw, &existing, |kind| snap.tolerance(kind))
                .into_iter()
                .find(|candidate| mask.contains(candidate.anchor));
            if let Some(candidate) = best {
                debug!(kind = ?candidate.kind, distance = candidate.distance, "阵列已吸附");
                item.anchor_point = candidate.anchor;
                footprint = raw.translate(candidate.offset);
                snapped = Some(candidate.kind);
            }
        }

        Ok(ArrayPlacement {
            item,
            footprint,
            snapped,
        })
    }
}

impl Default for PvWorkflow {
    fn default() -> Self {
        Self::new(10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmark_core::design::{Entity, ScaleInfo};

    fn square(origin: f64, size: f64) -> Vec<Point2> {
        vec![
            Point2::new(origin, origin),
            Point2::new(origin + size, origin),
            Point2::new(origin + size, origin + size),
            Point2::new(origin, origin + size),
        ]
    }

    fn panel() -> PvPanelConfig {
        PvPanelConfig {
            length_m: 2.0,
            width_m: 1.0,
            wattage: 400.0,
        }
    }

    fn config() -> ArrayConfig {
        ArrayConfig {
            rows: 1,
            columns: 2,
            orientation: PanelOrientation::Portrait,
        }
    }

    /// ratio 0.1：单块组件 10×20 像素，1×2 阵列为 20×20 像素。
    fn roof_state() -> DesignState {
        let mut state = DesignState {
            scale_info: ScaleInfo::calibrated(100.0, 10.0).unwrap(),
            pv_panel_config: Some(panel()),
            ..DesignState::default()
        };
        state.insert(Entity::RoofMask(
            RoofMask::new(EntityId::new("roof"), square(0.0, 1000.0), 30.0, 180.0).unwrap(),
        ));
        state.insert(Entity::PvArray(PvArrayItem {
            id: EntityId::new("a1"),
            roof_mask_id: EntityId::new("roof"),
            rows: 1,
            columns: 2,
            orientation: PanelOrientation::Portrait,
            anchor_point: Point2::new(100.0, 100.0),
            rotation_degrees: 0,
        }));
        state
    }

    fn placing() -> PvWorkflow {
        let mut workflow = PvWorkflow::default();
        workflow.configure_array(config(), Some(&panel())).unwrap();
        workflow
    }

    #[test]
    fn azimuth_points_from_highest_to_lowest() {
        let east = azimuth_degrees(Point2::new(0.0, 50.0), Point2::new(100.0, 50.0));
        assert!(east.abs() < 1e-9);
        let up = azimuth_degrees(Point2::new(50.0, 100.0), Point2::new(50.0, 0.0));
        assert!((up - 270.0).abs() < 1e-9);
        let down = azimuth_degrees(Point2::new(50.0, 0.0), Point2::new(50.0, 100.0));
        assert!((down - 90.0).abs() < 1e-9);
    }

    #[test]
    fn roof_mask_flow_produces_mask() {
        let mut workflow = PvWorkflow::new(5.0);
        workflow.begin_pitch(square(0.0, 100.0)).unwrap();
        assert_eq!(workflow.submit_pitch(120.0), Err(EngineError::InvalidPitch(120.0)));
        workflow.submit_pitch(35.0).unwrap();

        assert_eq!(
            workflow.direction_click(Point2::new(300.0, 300.0)),
            Err(EngineError::DirectionPointOutsideMask)
        );
        // 边界外 3 像素仍视为“附近”
        let step = workflow.direction_click(Point2::new(50.0, 103.0)).unwrap();
        assert_eq!(step, DirectionStep::HighestSet(Point2::new(50.0, 103.0)));
        assert_eq!(
            workflow.direction_click(Point2::new(50.0, 103.0)),
            Err(EngineError::DegenerateDirection)
        );

        let DirectionStep::Completed(mask) = workflow.direction_click(Point2::new(50.0, 10.0)).unwrap() else {
            panic!("second click completes the mask");
        };
        assert_eq!(mask.pitch_degrees, 35.0);
        assert!((mask.azimuth_degrees - 270.0).abs() < 1e-9);
        assert_eq!(mask.points.len(), 4);
        assert!(workflow.is_idle());
    }

    #[test]
    fn leaving_direction_step_cancels() {
        let mut workflow = PvWorkflow::default();
        workflow.begin_pitch(square(0.0, 100.0)).unwrap();
        workflow.submit_pitch(10.0).unwrap();
        workflow.direction_click(Point2::new(10.0, 10.0)).unwrap();
        assert!(workflow.cancel());
        assert!(workflow.is_idle());
        assert_eq!(workflow.submit_pitch(10.0), Err(EngineError::RoofStage("a pitch")));
    }

    #[test]
    fn array_configuration_requires_panel_config() {
        let mut workflow = PvWorkflow::default();
        assert_eq!(
            workflow.configure_array(config(), None),
            Err(EngineError::PanelConfigMissing)
        );
        let zero = ArrayConfig { rows: 0, ..config() };
        assert!(matches!(
            workflow.configure_array(zero, Some(&panel())),
            Err(EngineError::InvalidArrayConfig(_))
        ));
        assert!(!workflow.is_placing());
    }

    #[test]
    fn array_snaps_to_existing_corner() {
        let state = roof_state();
        let placement = placing()
            .place_array(Point2::new(122.0, 101.0), &state, &SnapSettings::default())
            .unwrap();
        assert_eq!(placement.snapped, Some(SnapKind::Corner));
        assert_eq!(placement.item.anchor_point, Point2::new(120.0, 100.0));
        assert_eq!(placement.item.roof_mask_id, EntityId::new("roof"));
        assert_eq!(placement.item.panel_count(), 2);
    }

    #[test]
    fn click_near_existing_origin_snaps_to_that_corner() {
        let state = roof_state();
        let placement = placing()
            .place_array(Point2::new(102.0, 101.0), &state, &SnapSettings::default())
            .unwrap();
        assert_eq!(placement.snapped, Some(SnapKind::Corner));
        assert_eq!(placement.item.anchor_point, Point2::new(100.0, 100.0));
    }

    #[test]
    fn array_keeps_raw_position_outside_tolerance_or_when_disabled() {
        let state = roof_state();
        let workflow = placing();
        let far = workflow
            .place_array(Point2::new(150.0, 150.0), &state, &SnapSettings::default())
            .unwrap();
        assert_eq!(far.snapped, None);
        assert_eq!(far.item.anchor_point, Point2::new(150.0, 150.0));

        let disabled = SnapSettings {
            enabled: false,
            ..SnapSettings::default()
        };
        let raw = workflow
            .place_array(Point2::new(122.0, 101.0), &state, &disabled)
            .unwrap();
        assert_eq!(raw.item.anchor_point, Point2::new(122.0, 101.0));
    }

    #[test]
    fn array_outside_roof_mask_is_rejected() {
        let state = roof_state();
        let err = placing()
            .place_array(Point2::new(2000.0, 10.0), &state, &SnapSettings::default())
            .unwrap_err();
        assert_eq!(err, EngineError::OutsideRoofMask { x: 2000.0, y: 10.0 });
        assert_eq!(
            PvWorkflow::default().place_array(Point2::new(10.0, 10.0), &state, &SnapSettings::default()),
            Err(EngineError::ArrayNotConfigured)
        );
    }

    #[test]
    fn rotation_applies_to_array_footprint() {
        let state = roof_state();
        let mut workflow = placing();
        assert_eq!(workflow.rotate(), Ok(45));
        assert_eq!(workflow.rotate(), Ok(90));
        let placement = workflow
            .place_array(Point2::new(500.0, 500.0), &state, &SnapSettings::default())
            .unwrap();
        assert_eq!(placement.item.rotation_degrees, 90);
        let bounds = placement.footprint.bounds();
        assert!((bounds.width() - 20.0).abs() < 1e-9);
    }
}
