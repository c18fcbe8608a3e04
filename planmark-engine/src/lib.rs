pub mod calibration;
pub mod command;
pub mod drawing;
pub mod history;
pub mod keymap;
pub mod placement;
pub mod pv;
pub mod session;

pub mod errors {
    use planmark_core::errors::GeometryError;
    use thiserror::Error;

    /// 引擎层错误。全部属于可恢复的用户提示，不会破坏设计状态或历史记录。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum EngineError {
        #[error(transparent)]
        Geometry(#[from] GeometryError),
        #[error("invalid real length `{0}`: expected a positive number")]
        InvalidLength(String),
        #[error("reference line has zero length")]
        DegenerateReferenceLine,
        #[error("calibration is not waiting for {0}")]
        CalibrationStage(&'static str),
        #[error("entity with id {0} not found")]
        EntityNotFound(String),
        #[error("no drawing in progress")]
        NotDrawing,
        #[error("{tool} requires at least {required} points, got {actual}")]
        InsufficientPoints {
            tool: &'static str,
            required: usize,
            actual: usize,
        },
        #[error("no geometry is waiting for details")]
        NoPendingDetails,
        #[error("invalid details: {0}")]
        InvalidDetails(String),
        #[error("no placement tool is active")]
        NoPlacementTool,
        #[error("unknown equipment type `{0}`")]
        UnknownEquipment(String),
        #[error("pv panel configuration is not set")]
        PanelConfigMissing,
        #[error("invalid pv panel configuration: {0}")]
        InvalidPanelConfig(String),
        #[error("invalid array configuration: {0}")]
        InvalidArrayConfig(String),
        #[error("point ({x:.1}, {y:.1}) is not inside any roof mask")]
        OutsideRoofMask { x: f64, y: f64 },
        #[error("pitch {0}° is outside 0-90°")]
        InvalidPitch(f64),
        #[error("roof mask workflow is not waiting for {0}")]
        RoofStage(&'static str),
        #[error("direction point is not on or near the roof mask")]
        DirectionPointOutsideMask,
        #[error("highest and lowest points coincide")]
        DegenerateDirection,
        #[error("array placement is not configured")]
        ArrayNotConfigured,
        #[error("nothing is selected")]
        EmptySelection,
        #[error("no deletion is awaiting confirmation")]
        NoPendingDeletion,
        #[error("entity {0} cannot be dragged")]
        NotDraggable(String),
        #[error("no drag in progress")]
        NoActiveDrag,
        #[error("a drag is in progress: finish or cancel it first")]
        DragInProgress,
    }
}

pub mod viewport {
    use planmark_core::geometry::{Bounds2D, Point2, Vector2};

    const DEFAULT_ZOOM: f64 = 1.0;
    pub const MIN_ZOOM: f64 = 0.01;
    pub const MAX_ZOOM: f64 = 1_000.0;

    /// 视口变换：屏幕坐标 = 文档坐标 × zoom + pan。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct ViewportTransform {
        pub zoom: f64,
        pub pan: Vector2,
    }

    impl ViewportTransform {
        #[inline]
        fn clamp_zoom(value: f64) -> f64 {
            value.clamp(MIN_ZOOM, MAX_ZOOM)
        }

        pub fn new(zoom: f64, pan: Vector2) -> Self {
            Self {
                zoom: Self::clamp_zoom(zoom),
                pan,
            }
        }

        /// 将指针事件的屏幕坐标映射到文档像素空间。
        #[inline]
        pub fn screen_to_document(&self, screen: Point2) -> Point2 {
            Point2::from_vec((screen.as_vec2() - self.pan.as_vec2()) / self.zoom)
        }

        #[inline]
        pub fn document_to_screen(&self, document: Point2) -> Point2 {
            Point2::from_vec(document.as_vec2() * self.zoom + self.pan.as_vec2())
        }

        pub fn pan_by(&mut self, delta: Vector2) {
            self.pan = Vector2::from(self.pan.as_vec2() + delta.as_vec2());
        }

        /// 以屏幕上的某点为中心缩放，该点对应的文档位置保持不动。
        pub fn zoom_at(&mut self, factor: f64, screen_anchor: Point2) {
            if !factor.is_finite() || factor <= 0.0 {
                return;
            }
            let fixed = self.screen_to_document(screen_anchor);
            self.zoom = Self::clamp_zoom(self.zoom * factor);
            let moved = self.document_to_screen(fixed);
            self.pan = Vector2::from(self.pan.as_vec2() + (screen_anchor.as_vec2() - moved.as_vec2()));
        }

        /// 重置视图：让整张底图完整居中显示在视口内。
        pub fn fit_to(image: (f64, f64), view: (f64, f64)) -> Self {
            let (image_w, image_h) = image;
            let (view_w, view_h) = view;
            if image_w <= 0.0 || image_h <= 0.0 || view_w <= 0.0 || view_h <= 0.0 {
                return Self::default();
            }
            let zoom = Self::clamp_zoom((view_w / image_w).min(view_h / image_h));
            let pan = Vector2::new(
                (view_w - image_w * zoom) / 2.0,
                (view_h - image_h * zoom) / 2.0,
            );
            Self { zoom, pan }
        }

        /// 没有底图尺寸时，退化为适配设计内容范围。
        pub fn fit_bounds(bounds: &Bounds2D, view: (f64, f64)) -> Self {
            if bounds.is_empty() {
                return Self::default();
            }
            let fitted = Self::fit_to((bounds.width().max(1.0), bounds.height().max(1.0)), view);
            let offset = bounds.min().as_vec2() * fitted.zoom;
            Self {
                zoom: fitted.zoom,
                pan: Vector2::from(fitted.pan.as_vec2() - offset),
            }
        }
    }

    impl Default for ViewportTransform {
        fn default() -> Self {
            Self {
                zoom: DEFAULT_ZOOM,
                pan: Vector2::new(0.0, 0.0),
            }
        }
    }

}
