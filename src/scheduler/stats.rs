//! ランナー統計と共有テレメトリ
//!
//! 各ランナーは自分のカウンタを持ち、実行毎にそのコピーを [`Telemetry`] に
//! 公開します。読み出し側はスナップショットを受け取り、数ワードをコピーする
//! クリティカルセクション以上はブロックしません。

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::error::Fault;
use crate::power_stage::PowerStageState;

/// クリティカルランナーのカウンタ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct CriticalStats {
    /// 完了した実行回数
    pub invocations: u32,
    /// `release + period` より後に完了した実行
    pub overruns: u32,
    /// キューせずに破棄したリリース
    pub skipped_releases: u32,
    /// 本体がエラーを返した実行
    pub tick_errors: u32,
    /// 直近の実行時間 [μs]
    pub last_exec_us: u32,
    /// 最大実行時間 [μs]
    pub max_exec_us: u32,
}

impl CriticalStats {
    pub const fn new() -> Self {
        Self {
            invocations: 0,
            overruns: 0,
            skipped_releases: 0,
            tick_errors: 0,
            last_exec_us: 0,
            max_exec_us: 0,
        }
    }

    pub(crate) fn record_execution(&mut self, exec_us: u32) {
        self.invocations = self.invocations.wrapping_add(1);
        self.last_exec_us = exec_us;
        self.max_exec_us = self.max_exec_us.max(exec_us);
    }
}

/// バックグラウンドランナーのカウンタ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct BackgroundStats {
    /// 完了した実行回数
    pub invocations: u32,
    /// サスペンド0を返した実行
    pub zero_suspends: u32,
    /// 直近の実行が要求したサスペンド [ms]
    pub last_suspend_ms: u32,
}

impl BackgroundStats {
    pub const fn new() -> Self {
        Self {
            invocations: 0,
            zero_suspends: 0,
            last_suspend_ms: 0,
        }
    }
}

/// クリティカル・バックグラウンド間で共有する状態
///
/// `const` で構築でき、`static` に置ける:
///
/// ```
/// use twist_scheduler::scheduler::Telemetry;
///
/// static TELEMETRY: Telemetry = Telemetry::new();
/// assert_eq!(TELEMETRY.critical_stats().invocations, 0);
/// ```
///
/// パワーステージ状態を書き込むのはクリティカルタスクのみ:
///
/// ```compile_fail
/// use twist_scheduler::power_stage::PowerStageState;
/// use twist_scheduler::scheduler::Telemetry;
///
/// let telemetry = Telemetry::new();
/// telemetry.publish_power_stage(PowerStageState::Enabled);
/// ```
pub struct Telemetry {
    critical: Mutex<CriticalSectionRawMutex, Cell<CriticalStats>>,
    background: Mutex<CriticalSectionRawMutex, Cell<BackgroundStats>>,
    power_stage: Mutex<CriticalSectionRawMutex, Cell<PowerStageState>>,
    fault: Signal<CriticalSectionRawMutex, Fault>,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            critical: Mutex::new(Cell::new(CriticalStats::new())),
            background: Mutex::new(Cell::new(BackgroundStats::new())),
            power_stage: Mutex::new(Cell::new(PowerStageState::Disabled)),
            fault: Signal::new(),
        }
    }

    pub fn critical_stats(&self) -> CriticalStats {
        self.critical.lock(|stats| stats.get())
    }

    pub fn background_stats(&self) -> BackgroundStats {
        self.background.lock(|stats| stats.get())
    }

    /// クリティカルタスクが最後に公開したパワーステージ状態
    pub fn power_stage(&self) -> PowerStageState {
        self.power_stage.lock(|state| state.get())
    }

    pub(crate) fn publish_critical(&self, stats: CriticalStats) {
        self.critical.lock(|cell| cell.set(stats));
    }

    pub(crate) fn publish_background(&self, stats: BackgroundStats) {
        self.background.lock(|cell| cell.set(stats));
    }

    pub(crate) fn publish_power_stage(&self, state: PowerStageState) {
        self.power_stage.lock(|cell| cell.set(state));
    }

    /// バックグラウンド側へフォールトを通知（未取得のフォールトは上書き）
    pub fn raise(&self, fault: Fault) {
        self.fault.signal(fault);
    }

    /// 未取得のフォールトを取り出す
    pub fn take_fault(&self) -> Option<Fault> {
        self.fault.try_take()
    }

    /// 次のフォールトを待つ
    pub async fn wait_fault(&self) -> Fault {
        self.fault.wait().await
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
