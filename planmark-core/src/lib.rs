pub mod design;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum GeometryError {
        #[error("scale is not set; calibrate the drawing first")]
        ScaleNotSet,
        #[error("invalid scale ratio {0}")]
        InvalidRatio(f64),
        #[error("{shape} requires at least {required} points, got {actual}")]
        TooFewPoints {
            shape: &'static str,
            required: usize,
            actual: usize,
        },
    }
}

pub mod geometry {
    use std::cmp::Ordering;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    use crate::errors::GeometryError;

    /// 文档像素空间中的二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance_to(self, other: Point2) -> f64 {
            distance(self, other)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量，用于平移与吸附偏移量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算设计范围与视口适配。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.x() - self.min.x()
            }
        }

        #[inline]
        pub fn height(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.y() - self.min.y()
            }
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }
    }

    #[inline]
    pub fn distance(a: Point2, b: Point2) -> f64 {
        (b.x() - a.x()).hypot(b.y() - a.y())
    }

    /// 折线总长度（像素）。少于两个点时为 0。
    pub fn polyline_length(points: &[Point2]) -> f64 {
        points
            .windows(2)
            .map(|pair| distance(pair[0], pair[1]))
            .sum()
    }

    /// 鞋带公式求多边形面积（像素²），取绝对值。少于三个点时为 0。
    pub fn polygon_area(points: &[Point2]) -> f64 {
        let n = points.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice_area = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            twice_area += points[i].x() * points[j].y();
            twice_area -= points[j].x() * points[i].y();
        }
        twice_area.abs() / 2.0
    }

    /// 射线法（奇数穿越规则）判断点是否位于多边形内。
    ///
    /// 边界约定：采用半开区间判定，对轴对齐多边形而言，位于最小 x / 最小 y
    /// 边上的点视为内部，位于最大 x / 最大 y 边上的点视为外部。
    /// 少于三个顶点的多边形不包含任何点。
    pub fn point_in_polygon(point: Point2, polygon: &[Point2]) -> bool {
        if polygon.len() < 3 {
            return false;
        }
        let (x, y) = (point.x(), point.y());
        let mut inside = false;
        let mut j = polygon.len() - 1;
        for i in 0..polygon.len() {
            let (xi, yi) = (polygon[i].x(), polygon[i].y());
            let (xj, yj) = (polygon[j].x(), polygon[j].y());
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// 点到线段的最短距离。
    pub fn distance_to_segment(point: Point2, start: Point2, end: Point2) -> f64 {
        let segment = end.as_vec2() - start.as_vec2();
        let len_sq = segment.length_squared();
        if len_sq <= f64::EPSILON {
            return distance(point, start);
        }
        let t = ((point.as_vec2() - start.as_vec2()).dot(segment) / len_sq).clamp(0.0, 1.0);
        let projection = Point2::from_vec(start.as_vec2() + segment * t);
        distance(point, projection)
    }

    /// 点到闭合多边形边界的最短距离；空多边形返回 `None`。
    pub fn distance_to_polygon_boundary(point: Point2, polygon: &[Point2]) -> Option<f64> {
        match polygon.len() {
            0 => None,
            1 => Some(distance(point, polygon[0])),
            n => (0..n)
                .map(|i| distance_to_segment(point, polygon[i], polygon[(i + 1) % n]))
                .min_by(f64::total_cmp),
        }
    }

    fn checked_ratio(ratio: Option<f64>) -> Result<f64, GeometryError> {
        match ratio {
            None => Err(GeometryError::ScaleNotSet),
            Some(value) if value.is_finite() && value > 0.0 => Ok(value),
            Some(value) => Err(GeometryError::InvalidRatio(value)),
        }
    }

    #[inline]
    pub fn pixels_to_meters(pixels: f64, ratio: Option<f64>) -> Result<f64, GeometryError> {
        Ok(pixels * checked_ratio(ratio)?)
    }

    #[inline]
    pub fn meters_to_pixels(meters: f64, ratio: Option<f64>) -> Result<f64, GeometryError> {
        Ok(meters / checked_ratio(ratio)?)
    }

    /// 面积换算使用比例的平方。
    #[inline]
    pub fn square_pixels_to_square_meters(
        area_px: f64,
        ratio: Option<f64>,
    ) -> Result<f64, GeometryError> {
        let ratio = checked_ratio(ratio)?;
        Ok(area_px * ratio * ratio)
    }

    pub fn polyline_length_m(points: &[Point2], ratio: Option<f64>) -> Result<f64, GeometryError> {
        pixels_to_meters(polyline_length(points), ratio)
    }

    pub fn polygon_area_m2(points: &[Point2], ratio: Option<f64>) -> Result<f64, GeometryError> {
        square_pixels_to_square_meters(polygon_area(points), ratio)
    }

    /// 旋转矩形（设备图块、光伏阵列的占地范围），角点按原点、宽边、对角、高边顺序排列。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Footprint {
        corners: [Point2; 4],
        width: f64,
        height: f64,
        rotation_degrees: f64,
    }

    impl Footprint {
        /// 以原点角为锚点构造（光伏阵列）。
        pub fn from_corner(origin: Point2, width: f64, height: f64, rotation_degrees: f64) -> Self {
            let (u, v) = Self::axes(rotation_degrees);
            let o = origin.as_vec2();
            Self {
                corners: [
                    origin,
                    Point2::from_vec(o + u * width),
                    Point2::from_vec(o + u * width + v * height),
                    Point2::from_vec(o + v * height),
                ],
                width,
                height,
                rotation_degrees,
            }
        }

        /// 以中心为锚点构造（设备图块）。
        pub fn centered(center: Point2, width: f64, height: f64, rotation_degrees: f64) -> Self {
            let (u, v) = Self::axes(rotation_degrees);
            let origin = center.as_vec2() - u * (width / 2.0) - v * (height / 2.0);
            Self::from_corner(Point2::from_vec(origin), width, height, rotation_degrees)
        }

        fn axes(rotation_degrees: f64) -> (DVec2, DVec2) {
            let (sin, cos) = rotation_degrees.to_radians().sin_cos();
            (DVec2::new(cos, sin), DVec2::new(-sin, cos))
        }

        #[inline]
        pub fn origin(&self) -> Point2 {
            self.corners[0]
        }

        #[inline]
        pub fn corners(&self) -> [Point2; 4] {
            self.corners
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.width
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.height
        }

        #[inline]
        pub fn rotation_degrees(&self) -> f64 {
            self.rotation_degrees
        }

        pub fn edge_midpoints(&self) -> [Point2; 4] {
            let c = self.corners.map(Point2::as_vec2);
            [
                Point2::from_vec((c[0] + c[1]) * 0.5),
                Point2::from_vec((c[1] + c[2]) * 0.5),
                Point2::from_vec((c[2] + c[3]) * 0.5),
                Point2::from_vec((c[3] + c[0]) * 0.5),
            ]
        }

        pub fn centroid(&self) -> Point2 {
            Point2::from_vec((self.corners[0].as_vec2() + self.corners[2].as_vec2()) * 0.5)
        }

        pub fn bounds(&self) -> Bounds2D {
            let mut bounds = Bounds2D::empty();
            for corner in self.corners {
                bounds.include_point(corner);
            }
            bounds
        }

        #[inline]
        pub fn contains(&self, point: Point2) -> bool {
            point_in_polygon(point, &self.corners)
        }

        pub fn translate(&self, offset: Vector2) -> Self {
            Self {
                corners: self.corners.map(|corner| corner.translate(offset)),
                ..*self
            }
        }
    }

    /// 吸附候选类型；排序时角点优先于边。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum SnapKind {
        Corner,
        Edge,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct SnapCandidate {
        /// 吸附后新图形的锚点（原点角）。
        pub anchor: Point2,
        pub offset: Vector2,
        pub kind: SnapKind,
        pub distance: f64,
    }

    /// 计算新图形相对既有图形的对齐候选：角点对角点、边中点对边中点。
    ///
    /// 每个候选都是一次平移，超出对应容差的被丢弃。
    /// 结果按距离升序，距离相同时角点优先。
    pub fn nearest_alignment_candidates<F>(
        candidate: &Footprint,
        existing: &[Footprint],
        tolerance: F,
    ) -> Vec<SnapCandidate>
    where
        F: Fn(SnapKind) -> f64,
    {
        let mut found = Vec::new();
        for shape in existing {
            collect_pairs(
                SnapKind::Corner,
                &candidate.corners(),
                &shape.corners(),
                tolerance(SnapKind::Corner),
                candidate,
                &mut found,
            );
            collect_pairs(
                SnapKind::Edge,
                &candidate.edge_midpoints(),
                &shape.edge_midpoints(),
                tolerance(SnapKind::Edge),
                candidate,
                &mut found,
            );
        }

        found.sort_by(|a, b| match a.distance.total_cmp(&b.distance) {
            Ordering::Equal => a.kind.cmp(&b.kind),
            other => other,
        });
        found
    }

    fn collect_pairs(
        kind: SnapKind,
        moving: &[Point2; 4],
        fixed: &[Point2; 4],
        tolerance: f64,
        candidate: &Footprint,
        out: &mut Vec<SnapCandidate>,
    ) {
        for from in moving {
            for to in fixed {
                let offset = from.vector_to(*to);
                let distance = offset.length();
                if distance <= tolerance {
                    out.push(SnapCandidate {
                        anchor: candidate.origin().translate(offset),
                        offset,
                        kind,
                        distance,
                    });
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn square(size: f64) -> Vec<Point2> {
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(size, 0.0),
                Point2::new(size, size),
                Point2::new(0.0, size),
            ]
        }

        #[test]
        fn distance_and_polyline_length() {
            assert_eq!(distance(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0)), 5.0);
            let path = [
                Point2::new(0.0, 0.0),
                Point2::new(3.0, 4.0),
                Point2::new(3.0, 10.0),
            ];
            assert_eq!(polyline_length(&path), 11.0);
            assert_eq!(polyline_length(&path[..1]), 0.0);
        }

        #[test]
        fn polygon_area_is_winding_independent() {
            let mut points = square(100.0);
            assert_eq!(polygon_area(&points), 10_000.0);
            points.reverse();
            assert_eq!(polygon_area(&points), 10_000.0);
            assert_eq!(polygon_area(&points[..2]), 0.0);
        }

        #[test]
        fn square_area_in_square_meters() {
            let area = polygon_area_m2(&square(100.0), Some(0.1)).unwrap();
            assert!((area - 100.0).abs() < 1e-9);
        }

        #[test]
        fn real_units_require_scale() {
            assert_eq!(
                polyline_length_m(&square(10.0), None),
                Err(GeometryError::ScaleNotSet)
            );
            assert_eq!(
                meters_to_pixels(1.0, Some(0.0)),
                Err(GeometryError::InvalidRatio(0.0))
            );
            assert_eq!(meters_to_pixels(1.0, Some(0.1)).unwrap(), 10.0);
        }

        #[test]
        fn point_in_polygon_boundary_convention() {
            let polygon = square(100.0);
            assert!(point_in_polygon(Point2::new(50.0, 50.0), &polygon));
            assert!(!point_in_polygon(Point2::new(150.0, 50.0), &polygon));
            // 最小边视为内部，最大边视为外部
            assert!(point_in_polygon(Point2::new(0.0, 50.0), &polygon));
            assert!(point_in_polygon(Point2::new(50.0, 0.0), &polygon));
            assert!(!point_in_polygon(Point2::new(100.0, 50.0), &polygon));
            assert!(!point_in_polygon(Point2::new(50.0, 100.0), &polygon));
            assert!(!point_in_polygon(Point2::new(1.0, 1.0), &polygon[..2]));
        }

        #[test]
        fn point_in_concave_polygon() {
            let l_shape = [
                Point2::new(0.0, 0.0),
                Point2::new(20.0, 0.0),
                Point2::new(20.0, 10.0),
                Point2::new(10.0, 10.0),
                Point2::new(10.0, 20.0),
                Point2::new(0.0, 20.0),
            ];
            assert!(point_in_polygon(Point2::new(5.0, 15.0), &l_shape));
            assert!(!point_in_polygon(Point2::new(15.0, 15.0), &l_shape));
        }

        #[test]
        fn boundary_distance() {
            let polygon = square(10.0);
            let d = distance_to_polygon_boundary(Point2::new(12.0, 5.0), &polygon).unwrap();
            assert!((d - 2.0).abs() < 1e-12);
            assert!(distance_to_polygon_boundary(Point2::new(0.0, 0.0), &[]).is_none());
            let degenerate = distance_to_segment(
                Point2::new(3.0, 4.0),
                Point2::new(0.0, 0.0),
                Point2::new(0.0, 0.0),
            );
            assert_eq!(degenerate, 5.0);
        }

        #[test]
        fn footprint_rotation_and_centering() {
            let footprint = Footprint::centered(Point2::new(50.0, 50.0), 20.0, 10.0, 0.0);
            assert_eq!(footprint.origin(), Point2::new(40.0, 45.0));
            assert_eq!(footprint.centroid(), Point2::new(50.0, 50.0));

            let rotated = Footprint::from_corner(Point2::new(0.0, 0.0), 10.0, 4.0, 90.0);
            let corners = rotated.corners();
            assert!((corners[1].x()).abs() < 1e-9);
            assert!((corners[1].y() - 10.0).abs() < 1e-9);
            assert!((corners[3].x() + 4.0).abs() < 1e-9);
            let bounds = rotated.bounds();
            assert!((bounds.width() - 4.0).abs() < 1e-9);
            assert!((bounds.height() - 10.0).abs() < 1e-9);
        }

        #[test]
        fn snaps_to_exact_corner_within_tolerance() {
            let existing = [Footprint::from_corner(Point2::new(0.0, 0.0), 100.0, 50.0, 0.0)];
            let moving = Footprint::from_corner(Point2::new(103.0, 2.0), 100.0, 50.0, 0.0);
            let candidates = nearest_alignment_candidates(&moving, &existing, |_| 10.0);
            let best = candidates.first().expect("candidate within tolerance");
            assert_eq!(best.kind, SnapKind::Corner);
            assert_eq!(best.anchor, Point2::new(100.0, 0.0));
        }

        #[test]
        fn no_candidates_outside_tolerance() {
            let existing = [Footprint::from_corner(Point2::new(0.0, 0.0), 100.0, 50.0, 0.0)];
            let moving = Footprint::from_corner(Point2::new(130.0, 20.0), 100.0, 50.0, 0.0);
            assert!(nearest_alignment_candidates(&moving, &existing, |_| 10.0).is_empty());
        }

        #[test]
        fn edge_candidates_respect_their_own_tolerance() {
            // 较窄的新阵列：角点距离较远，边中点对齐更近
            let existing = [Footprint::from_corner(Point2::new(0.0, 0.0), 100.0, 100.0, 0.0)];
            let moving = Footprint::from_corner(Point2::new(101.0, 30.0), 50.0, 40.0, 0.0);
            let candidates = nearest_alignment_candidates(&moving, &existing, |kind| match kind {
                SnapKind::Corner => 5.0,
                SnapKind::Edge => 15.0,
            });
            let best = candidates.first().expect("edge candidate");
            assert_eq!(best.kind, SnapKind::Edge);
            assert_eq!(best.anchor, Point2::new(100.0, 30.0));
        }

        #[test]
        fn origin_corner_snaps_even_when_shapes_coincide() {
            let existing = [Footprint::from_corner(Point2::new(0.0, 0.0), 100.0, 50.0, 0.0)];
            let moving = Footprint::from_corner(Point2::new(2.0, 1.0), 100.0, 50.0, 0.0);
            let candidates = nearest_alignment_candidates(&moving, &existing, |_| 5.0);
            let best = candidates.first().expect("origin corner candidate");
            assert_eq!(best.kind, SnapKind::Corner);
            assert_eq!(best.anchor, Point2::new(0.0, 0.0));
        }

        #[test]
        fn corner_wins_ties_against_edge() {
            // 同尺寸阵列右侧贴齐：角点与边中点的平移距离完全相同
            let existing = [Footprint::from_corner(Point2::new(0.0, 0.0), 100.0, 50.0, 0.0)];
            let moving = Footprint::from_corner(Point2::new(103.0, 0.0), 100.0, 50.0, 0.0);
            let candidates = nearest_alignment_candidates(&moving, &existing, |_| 5.0);
            let last_corner = candidates
                .iter()
                .rposition(|c| c.kind == SnapKind::Corner && c.distance == 3.0)
                .expect("corner at 3 px");
            let first_edge = candidates
                .iter()
                .position(|c| c.kind == SnapKind::Edge && c.distance == 3.0)
                .expect("edge at 3 px");
            assert!(last_corner < first_edge);
            assert_eq!(candidates[0].kind, SnapKind::Corner);
            assert_eq!(candidates[0].anchor, Point2::new(100.0, 0.0));
        }

        #[test]
        fn bounds_track_points() {
            let mut bounds = Bounds2D::empty();
            assert!(bounds.is_empty());
            bounds.include_point(Point2::new(-5.0, 2.0));
            bounds.include_point(Point2::new(5.0, 8.0));
            assert_eq!(bounds.center(), Point2::new(0.0, 5.0));
            assert_eq!(bounds.width(), 10.0);
            assert_eq!(bounds.height(), 6.0);
        }
    }
}
