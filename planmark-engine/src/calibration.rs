use planmark_core::design::ScaleInfo;
use planmark_core::geometry::{Point2, distance};
use tracing::{debug, warn};

use crate::errors::EngineError;

const MIN_REFERENCE_PIXELS: f64 = 1e-9;

/// 标定状态机：等待参考线 → 参考线已绘制 → 等待真实长度 → 已标定。
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    AwaitingReferenceLine { start: Option<Point2> },
    LineDrawn { start: Point2, end: Point2, pixel_distance: f64 },
    AwaitingRealLength { start: Point2, end: Point2, pixel_distance: f64 },
    Calibrated(ScaleInfo),
}

/// 标定完成的结果；若替换了旧比例，`replaced` 携带旧值。
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub scale: ScaleInfo,
    pub replaced: Option<ScaleInfo>,
}

impl CalibrationOutcome {
    pub fn warning(&self) -> Option<&'static str> {
        self.replaced.as_ref().map(|_| {
            "scale replaced: existing geometry keeps its pixel coordinates, previously derived real-world measurements are not recomputed"
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScaleCalibrator {
    state: CalibrationState,
    previous: Option<ScaleInfo>,
}

impl ScaleCalibrator {
    pub fn new() -> Self {
        Self {
            state: CalibrationState::AwaitingReferenceLine { start: None },
            previous: None,
        }
    }

    /// 按设计中已有的比例初始化。
    pub fn from_scale(scale: &ScaleInfo) -> Self {
        let mut calibrator = Self::new();
        calibrator.sync(scale);
        calibrator
    }

    #[inline]
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    #[inline]
    pub fn is_in_progress(&self) -> bool {
        match &self.state {
            CalibrationState::AwaitingReferenceLine { start } => {
                start.is_some() || self.previous.is_some()
            }
            CalibrationState::LineDrawn { .. } | CalibrationState::AwaitingRealLength { .. } => true,
            CalibrationState::Calibrated(_) => false,
        }
    }

    /// 在未进行标定时，将状态与设计中的比例对齐（撤销、加载之后调用）。
    pub fn sync(&mut self, scale: &ScaleInfo) {
        if self.is_in_progress() {
            return;
        }
        self.state = if scale.is_calibrated() {
            CalibrationState::Calibrated(scale.clone())
        } else {
            CalibrationState::AwaitingReferenceLine { start: None }
        };
    }

    /// 开始绘制参考线。已标定时允许重新进入，旧比例会在完成时被整体替换。
    pub fn begin_reference_line(&mut self) {
        if let CalibrationState::Calibrated(scale) = &self.state {
            self.previous = Some(scale.clone());
        }
        self.state = CalibrationState::AwaitingReferenceLine { start: None };
        debug!("开始绘制标定参考线");
    }

    /// 追加参考线端点。第二个点落下后进入 `LineDrawn`。
    pub fn add_reference_point(&mut self, point: Point2) -> Result<&CalibrationState, EngineError> {
        match self.state {
            CalibrationState::AwaitingReferenceLine { start: None } => {
                self.state = CalibrationState::AwaitingReferenceLine {
                    start: Some(point),
                };
            }
            CalibrationState::AwaitingReferenceLine { start: Some(start) } => {
                let pixel_distance = distance(start, point);
                if pixel_distance <= MIN_REFERENCE_PIXELS {
                    return Err(EngineError::DegenerateReferenceLine);
                }
                debug!(pixel_distance, "参考线绘制完成");
                self.state = CalibrationState::LineDrawn {
                    start,
                    end: point,
                    pixel_distance,
                };
            }
            _ => return Err(EngineError::CalibrationStage("a reference point")),
        }
        Ok(&self.state)
    }

    /// 打开真实长度输入：`LineDrawn` → `AwaitingRealLength`，返回参考线像素长度。
    pub fn request_real_length(&mut self) -> Result<f64, EngineError> {
        match self.state {
            CalibrationState::LineDrawn {
                start,
                end,
                pixel_distance,
            } => {
                self.state = CalibrationState::AwaitingRealLength {
                    start,
                    end,
                    pixel_distance,
                };
                Ok(pixel_distance)
            }
            _ => Err(EngineError::CalibrationStage("a real length prompt")),
        }
    }

    /// 提交真实长度（米）。非数字或不大于 0 时拒绝，状态保持不变。
    pub fn submit_real_length(&mut self, input: &str) -> Result<CalibrationOutcome, EngineError> {
        let CalibrationState::AwaitingRealLength { pixel_distance, .. } = self.state else {
            return Err(EngineError::CalibrationStage("a real length"));
        };
        let real = parse_real_length(input)?;
        let scale = ScaleInfo::calibrated(pixel_distance, real)?;
        let outcome = CalibrationOutcome {
            scale: scale.clone(),
            replaced: self.previous.take(),
        };
        if let Some(old) = &outcome.replaced {
            warn!(
                old_ratio = ?old.ratio_meters_per_pixel,
                new_ratio = ?scale.ratio_meters_per_pixel,
                "比例已重新标定，既有几何的真实尺寸不会追溯更新"
            );
        }
        self.state = CalibrationState::Calibrated(scale);
        Ok(outcome)
    }

    /// 放弃进行中的标定，恢复到之前的比例（若有）。
    pub fn cancel(&mut self) {
        self.state = match self.previous.take() {
            Some(scale) => CalibrationState::Calibrated(scale),
            None => CalibrationState::AwaitingReferenceLine { start: None },
        };
    }
}

impl Default for ScaleCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_real_length(input: &str) -> Result<f64, EngineError> {
    match input.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(EngineError::InvalidLength(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawn(calibrator: &mut ScaleCalibrator, length: f64) {
        calibrator.begin_reference_line();
        calibrator.add_reference_point(Point2::new(0.0, 0.0)).unwrap();
        calibrator.add_reference_point(Point2::new(length, 0.0)).unwrap();
        calibrator.request_real_length().unwrap();
    }

    #[test]
    fn ratio_is_real_length_over_pixel_distance() {
        let mut calibrator = ScaleCalibrator::new();
        drawn(&mut calibrator, 100.0);
        let outcome = calibrator.submit_real_length("10").unwrap();
        assert_eq!(outcome.scale.ratio(), Some(0.1));
        assert!(outcome.replaced.is_none());
        assert!(outcome.warning().is_none());
        assert!(matches!(calibrator.state(), CalibrationState::Calibrated(_)));
    }

    #[test]
    fn invalid_lengths_are_rejected_without_state_change() {
        let mut calibrator = ScaleCalibrator::new();
        drawn(&mut calibrator, 50.0);
        let before = calibrator.state().clone();
        for input in ["abc", "0", "-3", "", "NaN", "inf"] {
            let err = calibrator.submit_real_length(input).unwrap_err();
            assert_eq!(err, EngineError::InvalidLength(input.to_string()));
            assert_eq!(calibrator.state(), &before);
        }
        assert!(calibrator.submit_real_length(" 2.5 ").is_ok());
    }

    #[test]
    fn zero_length_reference_line_is_rejected() {
        let mut calibrator = ScaleCalibrator::new();
        calibrator.begin_reference_line();
        calibrator.add_reference_point(Point2::new(5.0, 5.0)).unwrap();
        let err = calibrator.add_reference_point(Point2::new(5.0, 5.0)).unwrap_err();
        assert_eq!(err, EngineError::DegenerateReferenceLine);
        assert!(matches!(
            calibrator.state(),
            CalibrationState::AwaitingReferenceLine { start: Some(_) }
        ));
    }

    #[test]
    fn submit_requires_open_prompt() {
        let mut calibrator = ScaleCalibrator::new();
        assert!(matches!(
            calibrator.submit_real_length("10"),
            Err(EngineError::CalibrationStage(_))
        ));
    }

    #[test]
    fn recalibration_replaces_ratio_and_warns() {
        let mut calibrator = ScaleCalibrator::new();
        drawn(&mut calibrator, 100.0);
        calibrator.submit_real_length("10").unwrap();

        drawn(&mut calibrator, 200.0);
        let outcome = calibrator.submit_real_length("10").unwrap();
        assert_eq!(outcome.scale.ratio(), Some(0.05));
        assert_eq!(outcome.replaced.and_then(|s| s.ratio()), Some(0.1));
    }

    #[test]
    fn cancel_restores_previous_scale() {
        let mut calibrator = ScaleCalibrator::new();
        drawn(&mut calibrator, 100.0);
        calibrator.submit_real_length("10").unwrap();
        calibrator.begin_reference_line();
        calibrator.add_reference_point(Point2::new(1.0, 1.0)).unwrap();
        calibrator.cancel();
        match calibrator.state() {
            CalibrationState::Calibrated(scale) => assert_eq!(scale.ratio(), Some(0.1)),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn reentering_calibration_counts_as_in_progress() {
        let mut calibrator = ScaleCalibrator::new();
        assert!(!calibrator.is_in_progress());
        drawn(&mut calibrator, 100.0);
        calibrator.submit_real_length("10").unwrap();
        calibrator.begin_reference_line();
        assert!(calibrator.is_in_progress());
        calibrator.cancel();
        assert!(!calibrator.is_in_progress());
        assert!(matches!(calibrator.state(), CalibrationState::Calibrated(_)));
    }

    #[test]
    fn sync_follows_design_scale_when_idle() {
        let mut calibrator = ScaleCalibrator::new();
        calibrator.sync(&ScaleInfo::calibrated(10.0, 1.0).unwrap());
        assert!(matches!(calibrator.state(), CalibrationState::Calibrated(_)));
        calibrator.sync(&ScaleInfo::default());
        assert!(matches!(
            calibrator.state(),
            CalibrationState::AwaitingReferenceLine { start: None }
        ));
    }
}
