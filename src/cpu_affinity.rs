//! # CPU亲和性绑定管理模块
//!
//! 将基准测试工作线程绑定到特定CPU核心，让每个工作线程独占一个核心，
//! 使测得的算力反映独立核心的吞吐能力（含缓存与亲和性效应）。
//!
//! ## 分配规则
//! ```text
//! 工作线程 i → 核心 available_cores[i % available_cores.len()]
//! ```
//!
//! ## 容错处理
//! 绑定只是建议性的：无法获取核心列表、工作线程数超过核心数导致复用、
//! 或平台不支持绑定时，工作线程都会以未绑定状态继续运行，不会中断整个基准测试。
//!
//! | 平台 | 支持状态 | 特殊说明 |
//! |------|----------|----------|
//! | Linux | ✅ 完全支持 | 使用sched_setaffinity |
//! | macOS | ⚠️ 部分支持 | 需要特殊权限，可能受限 |
//! | Windows | ✅ 完全支持 | 使用SetThreadAffinityMask |

use std::collections::HashMap;
use tracing::{debug, info, warn};

#[cfg(feature = "cpu-affinity")]
use core_affinity::{get_core_ids, set_for_current, CoreId};

/// 分配给某个工作线程的CPU核心
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSlot {
    /// 系统核心编号
    pub id: usize,
    #[cfg(feature = "cpu-affinity")]
    core: CoreId,
}

/// CPU绑定配置
#[derive(Debug, Clone)]
pub struct CpuAffinityConfig {
    /// 是否启用CPU绑定
    pub enabled: bool,
}

impl Default for CpuAffinityConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl CpuAffinityConfig {
    /// 轮询分配（默认）
    pub fn round_robin() -> Self {
        Self { enabled: true }
    }

    /// 禁用CPU绑定
    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// CPU绑定管理器
///
/// 在协调线程中创建并完成分配，工作线程只拿到各自的 [`CoreSlot`]。
pub struct CpuAffinityManager {
    /// 系统可用的CPU核心列表
    available_cores: Vec<CoreSlot>,
    /// 工作线程到CPU核心的映射
    worker_core_mapping: HashMap<usize, CoreSlot>,
    /// 是否启用CPU绑定
    enabled: bool,
}

impl CpuAffinityManager {
    /// 创建新的CPU绑定管理器
    pub fn new(config: &CpuAffinityConfig) -> Self {
        let available_cores = detect_cores();

        let enabled = config.enabled && !available_cores.is_empty();

        if config.enabled && available_cores.is_empty() {
            warn!("CPU绑定已启用但无法获取CPU核心信息，工作线程将以未绑定状态运行");
        } else if !config.enabled {
            info!("CPU绑定功能已禁用");
        } else {
            info!("CPU绑定功能已启用，系统检测到 {} 个可绑定核心", available_cores.len());
            #[cfg(target_os = "macos")]
            info!("注意：在macOS环境下，CPU绑定可能需要特殊权限或可能不被完全支持");
        }

        Self {
            available_cores,
            worker_core_mapping: HashMap::new(),
            enabled,
        }
    }

    /// 获取系统逻辑CPU核心数量
    pub fn get_cpu_count() -> usize {
        num_cpus::get()
    }

    /// 获取系统物理CPU核心数量
    pub fn get_physical_cpu_count() -> usize {
        num_cpus::get_physical()
    }

    /// 可用于绑定的核心数量
    pub fn available_core_count(&self) -> usize {
        self.available_cores.len()
    }

    /// 为工作线程分配CPU核心：`worker_index % 可用核心数`
    pub fn assign_cpu_core(&mut self, worker_index: usize) -> Option<CoreSlot> {
        if !self.enabled {
            return None;
        }

        let slot = self.available_cores[worker_index % self.available_cores.len()];
        if worker_index >= self.available_cores.len() {
            debug!(
                "工作线程 {} 与其他线程共享CPU核心 {} (工作线程数超过核心数)",
                worker_index, slot.id
            );
        }

        self.worker_core_mapping.insert(worker_index, slot);
        debug!("工作线程 {} 分配到CPU核心 {}", worker_index, slot.id);
        Some(slot)
    }

    /// 获取CPU绑定统计信息
    pub fn get_affinity_stats(&self) -> CpuAffinityStats {
        CpuAffinityStats {
            total_cpu_cores: Self::get_cpu_count(),
            physical_cpu_cores: Self::get_physical_cpu_count(),
            available_cores: self.available_core_count(),
            enabled: self.enabled,
            bound_workers: self.worker_core_mapping.len(),
        }
    }
}

/// CPU绑定统计信息
#[derive(Debug, Clone)]
pub struct CpuAffinityStats {
    /// 系统总CPU核心数
    pub total_cpu_cores: usize,
    /// 物理CPU核心数
    pub physical_cpu_cores: usize,
    /// 可用核心数
    pub available_cores: usize,
    /// 是否启用CPU绑定
    pub enabled: bool,
    /// 已分配核心的工作线程数量
    pub bound_workers: usize,
}

#[cfg(feature = "cpu-affinity")]
fn detect_cores() -> Vec<CoreSlot> {
    get_core_ids()
        .unwrap_or_else(|| {
            warn!("无法获取系统CPU核心信息");
            Vec::new()
        })
        .into_iter()
        .map(|core| CoreSlot { id: core.id, core })
        .collect()
}

#[cfg(not(feature = "cpu-affinity"))]
fn detect_cores() -> Vec<CoreSlot> {
    Vec::new()
}

/// 将当前线程绑定到指定核心
///
/// 返回是否绑定成功；失败时只记录警告，调用方继续以未绑定状态运行。
pub fn bind_current_thread(worker_index: usize, slot: Option<CoreSlot>) -> bool {
    let Some(slot) = slot else {
        debug!("工作线程 {} 未分配CPU核心，以未绑定状态运行", worker_index);
        return false;
    };

    if set_affinity(slot) {
        debug!("工作线程 {} 已绑定到CPU核心 {}", worker_index, slot.id);
        true
    } else {
        warn!(
            "无法将工作线程 {} 绑定到CPU核心 {}，以未绑定状态继续",
            worker_index, slot.id
        );
        false
    }
}

#[cfg(feature = "cpu-affinity")]
fn set_affinity(slot: CoreSlot) -> bool {
    set_for_current(slot.core)
}

#[cfg(not(feature = "cpu-affinity"))]
fn set_affinity(_slot: CoreSlot) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_manager_assigns_nothing() {
        let mut manager = CpuAffinityManager::new(&CpuAffinityConfig::disabled());
        assert!(!manager.get_affinity_stats().enabled);
        assert_eq!(manager.assign_cpu_core(0), None);
        assert_eq!(manager.get_affinity_stats().bound_workers, 0);
    }

    #[test]
    fn test_round_robin_wraps_by_core_count() {
        let mut manager = CpuAffinityManager::new(&CpuAffinityConfig::round_robin());
        if !manager.get_affinity_stats().enabled {
            // 宿主环境不支持获取核心列表时无从验证分配
            return;
        }
        let cores = manager.available_core_count();
        let first = manager.assign_cpu_core(0);
        let wrapped = manager.assign_cpu_core(cores);
        assert!(first.is_some());
        assert_eq!(first, wrapped);
        assert_eq!(manager.get_affinity_stats().bound_workers, 2);
    }

    #[test]
    fn test_bind_without_slot_degrades() {
        assert!(!bind_current_thread(7, None));
    }
}
