// ==========================================
// 制造撮合平台 - 履约核心 - 产能记录领域模型
// ==========================================
// 红线: available_capacity = total − utilization ≥ 0, 只推导不落库
// 用途: 每个 (供应商, 日期) 一条, 产能的唯一事实来源
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// CapacityRecord - 产能记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityRecord {
    // ===== 主键 =====
    pub supplier_id: String,
    pub capacity_date: NaiveDate,

    // ===== 产能参数 =====
    pub total_capacity: i64,      // 总产能 (件)
    pub current_utilization: i64, // 已承诺产能 (件)

    // ===== 资源元数据 =====
    pub machines: Option<i32>,
    pub workers: Option<i32>,
    pub shifts: Option<i32>,

    pub revision: i64, // 乐观锁版本号
}

impl CapacityRecord {
    pub fn new(supplier_id: String, capacity_date: NaiveDate, total_capacity: i64) -> Self {
        Self {
            supplier_id,
            capacity_date,
            total_capacity,
            current_utilization: 0,
            machines: None,
            workers: None,
            shifts: None,
            revision: 0,
        }
    }
}

// ==========================================
// Trait: CapacityConstraint
// ==========================================
// 用途: 匹配/提交前的产能约束检查接口
pub trait CapacityConstraint {
    /// 剩余产能 (推导值)
    fn available_capacity(&self) -> i64;

    /// 是否可承接指定数量
    fn can_commit(&self, quantity: i64) -> bool;

    /// 提交后剩余产能占总产能的比例 (0.0 - 1.0)
    fn headroom_ratio_after(&self, quantity: i64) -> f64;
}

impl CapacityConstraint for CapacityRecord {
    fn available_capacity(&self) -> i64 {
        self.total_capacity - self.current_utilization
    }

    fn can_commit(&self, quantity: i64) -> bool {
        quantity > 0 && self.available_capacity() >= quantity
    }

    fn headroom_ratio_after(&self, quantity: i64) -> f64 {
        if self.total_capacity <= 0 {
            return 0.0;
        }
        let remaining = (self.available_capacity() - quantity).max(0) as f64;
        (remaining / self.total_capacity as f64).clamp(0.0, 1.0)
    }
}

// ==========================================
// Supplier - 供应商档案
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub supplier_id: String,
    pub name: String,
    pub verified: bool,
    pub active: bool,
    pub performance_score: f64,       // 0 - 100
    pub specializations: Vec<String>, // 专长品类
    pub lead_time_days: i64,          // 常规交期 (天)
}

impl Supplier {
    /// 专长是否覆盖请求品类 (大小写不敏感)
    pub fn specializes_in(&self, specialization: &str) -> bool {
        let wanted = specialization.trim().to_lowercase();
        self.specializations
            .iter()
            .any(|s| s.trim().to_lowercase() == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: i64, used: i64) -> CapacityRecord {
        let mut r = CapacityRecord::new(
            "S1".to_string(),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            total,
        );
        r.current_utilization = used;
        r
    }

    #[test]
    fn test_available_is_derived() {
        let r = record(100, 40);
        assert_eq!(r.available_capacity(), 60);
        assert!(r.can_commit(60));
        assert!(!r.can_commit(61));
        assert!(!r.can_commit(0));
    }

    #[test]
    fn test_headroom_ratio_after() {
        let r = record(200, 50);
        assert!((r.headroom_ratio_after(50) - 0.5).abs() < 1e-9);
        assert_eq!(r.headroom_ratio_after(500), 0.0);
        assert_eq!(record(0, 0).headroom_ratio_after(1), 0.0);
    }
}
