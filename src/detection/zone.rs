// 区域过滤 - 判断检测框中心点是否落在统计区域内

use crate::storage::{Zone, ZonePoint};

/// 射线法判断点是否在多边形内（坐标均为归一化值）
///
/// 少于3个顶点的多边形视为无效，任何点都不在其内
pub fn point_in_polygon(x: f64, y: f64, polygon: &[ZonePoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let ZonePoint(xi, yi) = polygon[i];
        let ZonePoint(xj, yj) = polygon[j];

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// 判断点是否需要计数：未配置区域时全部计数，否则落在任一区域内才计数
pub fn is_counted(x: f64, y: f64, zones: &[Zone]) -> bool {
    zones.is_empty() || zones.iter().any(|zone| point_in_polygon(x, y, &zone.points))
}
