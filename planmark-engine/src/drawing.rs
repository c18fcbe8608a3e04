use planmark_core::design::{CableSpec, ContainmentType, VoltageClass};
use planmark_core::errors::GeometryError;
use planmark_core::geometry::{Point2, distance, polygon_area_m2, polyline_length_m};
use tracing::debug;

use crate::errors::EngineError;

const DUPLICATE_EPSILON: f64 = 1e-9;

/// 逐点绘制类工具。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawingTool {
    Line(VoltageClass),
    Zone,
    Containment(ContainmentType),
    RoofMask,
}

impl DrawingTool {
    /// 闭合多边形工具：点击首点附近即闭合。
    #[inline]
    pub fn is_closed(self) -> bool {
        matches!(self, DrawingTool::Zone | DrawingTool::RoofMask)
    }

    #[inline]
    pub fn min_points(self) -> usize {
        if self.is_closed() { 3 } else { 2 }
    }

    /// 完成绘制后需要先补充明细才能提交。
    pub fn requires_details(self) -> bool {
        match self {
            DrawingTool::Line(class) => class.requires_details(),
            DrawingTool::Containment(kind) => kind.requires_size(),
            DrawingTool::Zone | DrawingTool::RoofMask => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DrawingTool::Line(_) => "supply line",
            DrawingTool::Zone => "supply zone",
            DrawingTool::Containment(_) => "containment run",
            DrawingTool::RoofMask => "roof mask",
        }
    }
}

/// 绘制完成时计算的真实尺寸。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measured {
    PathLength(f64),
    Area(f64),
}

/// 已采集完毕的几何。
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedShape {
    pub tool: DrawingTool,
    pub points: Vec<Point2>,
    pub measurement: Measured,
}

/// 明细表单提交的内容。
#[derive(Debug, Clone, PartialEq)]
pub enum DetailsPayload {
    Cable(CableSpec),
    ContainmentSize(String),
}

/// 可以提交进历史记录的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedShape {
    pub shape: CapturedShape,
    pub details: Option<DetailsPayload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DrawingPhase {
    #[default]
    Idle,
    Capturing {
        tool: DrawingTool,
        points: Vec<Point2>,
        ratio: f64,
    },
    PendingDetails(CapturedShape),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawingStep {
    PointAdded(usize),
    AwaitingDetails { tool: DrawingTool, measurement: Measured },
    Completed(CompletedShape),
}

/// 绘制状态机：Idle → Capturing → {Completed | PendingDetails → Completed}。
///
/// 状态机本身不修改设计，`Completed` 由会话负责提交到历史记录。
#[derive(Debug, Clone)]
pub struct DrawingMachine {
    phase: DrawingPhase,
    close_tolerance: f64,
}

impl DrawingMachine {
    pub fn new(close_tolerance: f64) -> Self {
        Self {
            phase: DrawingPhase::Idle,
            close_tolerance: close_tolerance.max(0.0),
        }
    }

    #[inline]
    pub fn phase(&self) -> &DrawingPhase {
        &self.phase
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, DrawingPhase::Idle)
    }

    pub fn tool(&self) -> Option<DrawingTool> {
        match &self.phase {
            DrawingPhase::Idle => None,
            DrawingPhase::Capturing { tool, .. } => Some(*tool),
            DrawingPhase::PendingDetails(shape) => Some(shape.tool),
        }
    }

    /// 正在采集的点，用于预览。
    pub fn points(&self) -> &[Point2] {
        match &self.phase {
            DrawingPhase::Capturing { points, .. } => points,
            DrawingPhase::PendingDetails(shape) => &shape.points,
            DrawingPhase::Idle => &[],
        }
    }

    /// 开始绘制。未标定时拒绝，任何进行中的绘制被丢弃。
    pub fn begin(&mut self, tool: DrawingTool, ratio: Option<f64>) -> Result<(), EngineError> {
        let ratio = ratio.ok_or(GeometryError::ScaleNotSet)?;
        self.phase = DrawingPhase::Capturing {
            tool,
            points: Vec::new(),
            ratio,
        };
        debug!(tool = tool.label(), "开始绘制");
        Ok(())
    }

    pub fn click(&mut self, point: Point2) -> Result<DrawingStep, EngineError> {
        let DrawingPhase::Capturing { tool, points, .. } = &mut self.phase else {
            return Err(EngineError::NotDrawing);
        };
        let closes = tool.is_closed()
            && points.len() >= tool.min_points()
            && distance(points[0], point) <= self.close_tolerance;
        if closes {
            debug!("点击首点附近，闭合多边形");
            return self.finish();
        }
        points.push(point);
        Ok(DrawingStep::PointAdded(points.len()))
    }

    /// 双击：追加该点（与末点重合时不重复追加）并完成绘制。
    pub fn double_click(&mut self, point: Point2) -> Result<DrawingStep, EngineError> {
        let DrawingPhase::Capturing { points, .. } = &mut self.phase else {
            return Err(EngineError::NotDrawing);
        };
        let duplicate = points
            .last()
            .is_some_and(|last| distance(*last, point) <= DUPLICATE_EPSILON);
        if !duplicate {
            points.push(point);
        }
        self.finish()
    }

    /// 结束采集。点数不足时返回错误并保持采集状态。
    pub fn finish(&mut self) -> Result<DrawingStep, EngineError> {
        let DrawingPhase::Capturing { tool, points, ratio } = &self.phase else {
            return Err(EngineError::NotDrawing);
        };
        let tool = *tool;
        if points.len() < tool.min_points() {
            return Err(EngineError::InsufficientPoints {
                tool: tool.label(),
                required: tool.min_points(),
                actual: points.len(),
            });
        }
        let measurement = if tool.is_closed() {
            Measured::Area(polygon_area_m2(points, Some(*ratio))?)
        } else {
            Measured::PathLength(polyline_length_m(points, Some(*ratio))?)
        };
        let shape = CapturedShape {
            tool,
            points: points.clone(),
            measurement,
        };

        if tool.requires_details() {
            debug!(tool = tool.label(), "几何采集完成，等待明细");
            self.phase = DrawingPhase::PendingDetails(shape);
            return Ok(DrawingStep::AwaitingDetails { tool, measurement });
        }
        self.phase = DrawingPhase::Idle;
        Ok(DrawingStep::Completed(CompletedShape {
            shape,
            details: None,
        }))
    }

    /// Escape：任意非空闲状态回到 Idle。返回是否中止了绘制。
    pub fn escape(&mut self) -> bool {
        let aborted = !self.is_idle();
        if aborted {
            debug!("绘制已中止");
        }
        self.phase = DrawingPhase::Idle;
        aborted
    }

    /// 提交明细。校验失败时保持 `PendingDetails`。
    pub fn submit_details(&mut self, payload: DetailsPayload) -> Result<CompletedShape, EngineError> {
        let DrawingPhase::PendingDetails(shape) = &self.phase else {
            return Err(EngineError::NoPendingDetails);
        };
        validate_details(shape.tool, &payload)?;
        let shape = shape.clone();
        self.phase = DrawingPhase::Idle;
        Ok(CompletedShape {
            shape,
            details: Some(payload),
        })
    }

    /// 取消明细表单，丢弃几何，不产生历史记录。
    pub fn cancel_details(&mut self) -> bool {
        if matches!(self.phase, DrawingPhase::PendingDetails(_)) {
            self.phase = DrawingPhase::Idle;
            return true;
        }
        false
    }
}

impl Default for DrawingMachine {
    fn default() -> Self {
        Self::new(10.0)
    }
}

fn validate_details(tool: DrawingTool, payload: &DetailsPayload) -> Result<(), EngineError> {
    match (tool, payload) {
        (DrawingTool::Line(class), DetailsPayload::Cable(spec)) if class.requires_details() => {
            if spec.cable_type.trim().is_empty() {
                return Err(EngineError::InvalidDetails("cable type must not be empty".into()));
            }
            if spec.label.trim().is_empty() {
                return Err(EngineError::InvalidDetails("label must not be empty".into()));
            }
            for (name, height) in [("start", spec.start_height_m), ("end", spec.end_height_m)] {
                if !height.is_finite() || height < 0.0 {
                    return Err(EngineError::InvalidDetails(format!(
                        "{name} height must be a non-negative number"
                    )));
                }
            }
            Ok(())
        }
        (DrawingTool::Containment(kind), DetailsPayload::ContainmentSize(size))
            if kind.requires_size() =>
        {
            if size.trim().is_empty() {
                return Err(EngineError::InvalidDetails("size must not be empty".into()));
            }
            Ok(())
        }
        (tool, _) => Err(EngineError::InvalidDetails(format!(
            "payload does not match {}",
            tool.label()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cable() -> CableSpec {
        CableSpec {
            cable_type: "4C 16mm SWA".into(),
            start_height_m: 2.0,
            end_height_m: 1.0,
            termination_count: 2,
            label: "DB1".into(),
        }
    }

    #[test]
    fn begin_requires_scale() {
        let mut machine = DrawingMachine::default();
        let err = machine.begin(DrawingTool::Zone, None).unwrap_err();
        assert_eq!(err, EngineError::Geometry(GeometryError::ScaleNotSet));
        assert!(machine.is_idle());
    }

    #[test]
    fn closing_click_completes_zone_without_duplicate_point() {
        let mut machine = DrawingMachine::new(5.0);
        machine.begin(DrawingTool::Zone, Some(0.1)).unwrap();
        for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)] {
            machine.click(Point2::new(x, y)).unwrap();
        }
        let step = machine.click(Point2::new(2.0, 1.0)).unwrap();
        let DrawingStep::Completed(done) = step else {
            panic!("zone should close");
        };
        assert_eq!(done.shape.points.len(), 4);
        let Measured::Area(area) = done.shape.measurement else {
            panic!("zone is measured by area");
        };
        assert!((area - 100.0).abs() < 1e-9);
        assert!(machine.is_idle());
    }

    #[test]
    fn near_first_point_does_not_close_open_tools() {
        let mut machine = DrawingMachine::new(5.0);
        machine.begin(DrawingTool::Line(VoltageClass::Mv), Some(0.1)).unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        machine.click(Point2::new(50.0, 0.0)).unwrap();
        machine.click(Point2::new(50.0, 50.0)).unwrap();
        let step = machine.click(Point2::new(1.0, 1.0)).unwrap();
        assert_eq!(step, DrawingStep::PointAdded(4));
    }

    #[test]
    fn double_click_does_not_duplicate_last_point() {
        let mut machine = DrawingMachine::default();
        machine.begin(DrawingTool::Line(VoltageClass::Dc), Some(0.1)).unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        machine.click(Point2::new(30.0, 40.0)).unwrap();
        let DrawingStep::Completed(done) = machine.double_click(Point2::new(30.0, 40.0)).unwrap() else {
            panic!("dc line commits without details");
        };
        assert_eq!(done.shape.points.len(), 2);
        assert_eq!(done.shape.measurement, Measured::PathLength(5.0));
        assert!(done.details.is_none());
    }

    #[test]
    fn finishing_with_too_few_points_keeps_capturing() {
        let mut machine = DrawingMachine::default();
        machine.begin(DrawingTool::RoofMask, Some(0.1)).unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        machine.click(Point2::new(10.0, 0.0)).unwrap();
        let err = machine.finish().unwrap_err();
        assert!(matches!(err, EngineError::InsufficientPoints { required: 3, actual: 2, .. }));
        assert_eq!(machine.points().len(), 2);
    }

    #[test]
    fn lv_cable_waits_for_valid_details() {
        let mut machine = DrawingMachine::default();
        machine.begin(DrawingTool::Line(VoltageClass::LvAc), Some(0.1)).unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        machine.click(Point2::new(100.0, 0.0)).unwrap();
        let step = machine.finish().unwrap();
        assert!(matches!(step, DrawingStep::AwaitingDetails { .. }));

        let mut bad = cable();
        bad.start_height_m = -1.0;
        assert!(matches!(
            machine.submit_details(DetailsPayload::Cable(bad)),
            Err(EngineError::InvalidDetails(_))
        ));
        assert!(matches!(
            machine.submit_details(DetailsPayload::ContainmentSize("100mm".into())),
            Err(EngineError::InvalidDetails(_))
        ));
        assert!(matches!(machine.phase(), DrawingPhase::PendingDetails(_)));

        let done = machine.submit_details(DetailsPayload::Cable(cable())).unwrap();
        assert_eq!(done.details, Some(DetailsPayload::Cable(cable())));
        assert!(machine.is_idle());
    }

    #[test]
    fn sized_containment_can_be_cancelled() {
        let mut machine = DrawingMachine::default();
        machine
            .begin(DrawingTool::Containment(ContainmentType::CableTray), Some(0.1))
            .unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        machine.double_click(Point2::new(10.0, 0.0)).unwrap();
        assert!(machine.cancel_details());
        assert!(machine.is_idle());
        assert_eq!(
            machine.submit_details(DetailsPayload::ContainmentSize("50mm".into())),
            Err(EngineError::NoPendingDetails)
        );
    }

    #[test]
    fn escape_aborts_any_phase() {
        let mut machine = DrawingMachine::default();
        assert!(!machine.escape());
        machine.begin(DrawingTool::Zone, Some(1.0)).unwrap();
        machine.click(Point2::new(0.0, 0.0)).unwrap();
        assert!(machine.escape());
        assert!(machine.is_idle());
        assert_eq!(machine.click(Point2::new(1.0, 1.0)), Err(EngineError::NotDrawing));
    }
}
