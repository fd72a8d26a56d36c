//! 2レートタスクスケジューラ
//!
//! 実行コンテキストは2つ: 他の全てをプリエンプトする固定周期のクリティカルタスクと、
//! 自己ペースのバックグラウンドタスク。ライフサイクルは `create -> start -> launch` で、
//! [`Scheduler::launch`] が起動済みタスクをランナーに渡し、ランタイム
//! （ターゲットではembassy Executor、ホストではシミュレーション）が実行し続けます。
//!
//! スケジューラは [`ConfiguredHardware`] からしか構築できないため、タスク登録前に
//! 全ての設定呼び出しが完了しています:
//!
//! ```compile_fail
//! use twist_scheduler::hardware::mock::{MockLed, MockTwist};
//! use twist_scheduler::scheduler::{Scheduler, Telemetry};
//! use twist_scheduler::tasks::{CriticalControl, Heartbeat, Idle};
//!
//! let telemetry = Telemetry::new();
//! // 未設定のハードウェアは `ConfiguredHardware` ではない
//! let scheduler: Scheduler<'_, MockTwist, Heartbeat<MockLed>, CriticalControl<Idle>> =
//!     Scheduler::new(MockTwist::new(), &telemetry);
//! ```
//!
//! 設定済みの場合:
//!
//! ```
//! use twist_scheduler::config::{HardwareConfig, CRITICAL_PERIOD_US};
//! use twist_scheduler::hardware::mock::{MockLed, MockTwist};
//! use twist_scheduler::scheduler::{Scheduler, Telemetry};
//! use twist_scheduler::tasks::{CriticalControl, Heartbeat, Idle};
//!
//! let telemetry = Telemetry::new();
//! let hw = HardwareConfig::spin_twist_default()?.apply(MockTwist::new())?;
//!
//! let mut scheduler = Scheduler::new(hw, &telemetry);
//! let background = scheduler.create_background(Heartbeat::new(MockLed::new()))?;
//! scheduler.create_critical(CriticalControl::new(Idle), CRITICAL_PERIOD_US)?;
//! scheduler.start_background(background)?;
//! scheduler.start_critical()?;
//! let (_background, _critical) = scheduler.launch()?;
//! # Ok::<(), twist_scheduler::error::Error>(())
//! ```

#[cfg(target_os = "none")]
pub mod embassy;
pub mod stats;

pub use stats::{BackgroundStats, CriticalStats, Telemetry};

use crate::config::{ConfiguredHardware, MIN_CRITICAL_PERIOD_US};
use crate::error::{Fault, SchedulerError, TickError};
use crate::power_stage::PowerStageState;

/// タスクの実行コンテキスト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum TaskKind {
    Background,
    Critical,
}

/// 登録時に返される識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct TaskHandle {
    kind: TaskKind,
    index: u8,
}

impl TaskHandle {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

/// タスク毎のライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum TaskState {
    Created,
    Started,
    /// 1回以上実行済み
    Running,
}

/// バックグラウンド実行が次回までに要求する待ち時間
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct Suspend {
    ms: u32,
}

impl Suspend {
    pub const fn millis(ms: u32) -> Self {
        Self { ms }
    }

    pub const fn as_millis(&self) -> u32 {
        self.ms
    }

    pub const fn as_micros(&self) -> u64 {
        self.ms as u64 * 1000
    }

    pub const fn is_zero(&self) -> bool {
        self.ms == 0
    }
}

/// 単調増加のマイクロ秒時刻源
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// 周期を過ぎて完了したクリティカル実行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub struct Overrun {
    /// リリースから完了まで [μs]
    pub elapsed_us: u32,
    pub period_us: u32,
}

impl From<Overrun> for Fault {
    fn from(overrun: Overrun) -> Self {
        Fault::Overrun {
            elapsed_us: overrun.elapsed_us,
            period_us: overrun.period_us,
        }
    }
}

/// バックグラウンド実行から見えるもの
pub struct BackgroundContext<'t> {
    telemetry: &'t Telemetry,
    invocation: u32,
}

impl<'t> BackgroundContext<'t> {
    /// これより前の実行回数
    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    pub fn telemetry(&self) -> &'t Telemetry {
        self.telemetry
    }

    /// クリティカル側が通知したフォールトを取り出す
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.telemetry.take_fault()
    }

    pub fn power_stage(&self) -> PowerStageState {
        self.telemetry.power_stage()
    }
}

/// クリティカル実行から見えるもの
pub struct CriticalContext<'t> {
    telemetry: &'t Telemetry,
    release_us: u64,
    invocation: u32,
}

impl<'t> CriticalContext<'t> {
    /// この実行のリリース時刻 [μs]
    pub fn release_us(&self) -> u64 {
        self.release_us
    }

    /// これより前の実行回数
    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    pub fn telemetry(&self) -> &'t Telemetry {
        self.telemetry
    }

    /// バックグラウンド側へフォールトを通知
    pub fn raise(&self, fault: Fault) {
        self.telemetry.raise(fault);
    }
}

/// 協調的・自己ペースのタスク本体
pub trait BackgroundTask {
    /// 1単位の処理を行い、次回実行までの待ち時間を返す
    ///
    /// 返す [`Suspend`] は0以外であること。0は他の協調タスクを飢餓させる。
    /// ランナーはカウントしてログ出力し、ランタイムはyieldのみで再実行する。
    fn run(&mut self, ctx: &mut BackgroundContext<'_>) -> Suspend;
}

/// ハードウェア `H` を駆動する固定周期のタスク本体
pub trait CriticalTask<H> {
    /// 1回分の実行。ブロックせず、周期内に十分余裕をもって完了すること。
    /// エラーはランナーが捕捉し、タイマは止めない。
    fn tick(&mut self, hw: &mut H, ctx: &mut CriticalContext<'_>) -> Result<(), TickError>;

    /// 実行が周期を過ぎて完了した後に呼ばれる
    fn on_overrun(&mut self, _hw: &mut H, _overrun: Overrun, _ctx: &mut CriticalContext<'_>) {}
}

struct Slot<T> {
    task: T,
    state: TaskState,
}

struct CriticalSlot<C> {
    slot: Slot<C>,
    period_us: u32,
}

/// タスク登録とライフサイクル
pub struct Scheduler<'t, H, B, C> {
    hw: H,
    telemetry: &'t Telemetry,
    background: Option<Slot<B>>,
    critical: Option<CriticalSlot<C>>,
}

impl<'t, H, B, C> Scheduler<'t, H, B, C>
where
    B: BackgroundTask,
    C: CriticalTask<H>,
{
    pub fn new(hw: ConfiguredHardware<H>, telemetry: &'t Telemetry) -> Self {
        Self {
            hw: hw.into_inner(),
            telemetry,
            background: None,
            critical: None,
        }
    }

    /// バックグラウンドタスク本体を登録
    pub fn create_background(&mut self, task: B) -> Result<TaskHandle, SchedulerError> {
        if self.background.is_some() {
            return Err(SchedulerError::ContextUnavailable(TaskKind::Background));
        }
        self.background = Some(Slot {
            task,
            state: TaskState::Created,
        });
        debug!("Background task registered");
        Ok(TaskHandle {
            kind: TaskKind::Background,
            index: 0,
        })
    }

    /// クリティカルタスク本体を周期 [μs] とともに登録
    pub fn create_critical(
        &mut self,
        task: C,
        period_us: u32,
    ) -> Result<TaskHandle, SchedulerError> {
        if self.critical.is_some() {
            return Err(SchedulerError::ContextUnavailable(TaskKind::Critical));
        }
        if period_us < MIN_CRITICAL_PERIOD_US {
            return Err(SchedulerError::InvalidPeriod(period_us));
        }
        self.critical = Some(CriticalSlot {
            slot: Slot {
                task,
                state: TaskState::Created,
            },
            period_us,
        });
        debug!("Critical task registered, period {} us", period_us);
        Ok(TaskHandle {
            kind: TaskKind::Critical,
            index: 0,
        })
    }

    pub fn start_background(&mut self, handle: TaskHandle) -> Result<(), SchedulerError> {
        if handle.kind != TaskKind::Background || handle.index != 0 {
            return Err(SchedulerError::UnknownHandle);
        }
        let slot = self
            .background
            .as_mut()
            .ok_or(SchedulerError::UnknownHandle)?;
        if slot.state != TaskState::Created {
            return Err(SchedulerError::AlreadyStarted(TaskKind::Background));
        }
        slot.state = TaskState::Started;
        info!("Background task started");
        Ok(())
    }

    /// クリティカルタイマを起動（バックグラウンドタスクを先に起動すること）
    pub fn start_critical(&mut self) -> Result<(), SchedulerError> {
        let background_started = self
            .background
            .as_ref()
            .is_some_and(|slot| slot.state == TaskState::Started);
        let critical = self
            .critical
            .as_mut()
            .ok_or(SchedulerError::NotRegistered(TaskKind::Critical))?;
        if critical.slot.state != TaskState::Created {
            return Err(SchedulerError::AlreadyStarted(TaskKind::Critical));
        }
        if !background_started {
            return Err(SchedulerError::OrderViolation);
        }
        critical.slot.state = TaskState::Started;
        info!("Critical task started, period {} us", critical.period_us);
        Ok(())
    }

    pub fn background_state(&self) -> Option<TaskState> {
        self.background.as_ref().map(|slot| slot.state)
    }

    pub fn critical_state(&self) -> Option<TaskState> {
        self.critical.as_ref().map(|critical| critical.slot.state)
    }

    /// 起動済みの両タスクをランナーに渡す
    pub fn launch(
        self,
    ) -> Result<(BackgroundRunner<'t, B>, CriticalRunner<'t, H, C>), SchedulerError> {
        let background = self
            .background
            .ok_or(SchedulerError::NotRegistered(TaskKind::Background))?;
        let critical = self
            .critical
            .ok_or(SchedulerError::NotRegistered(TaskKind::Critical))?;
        if background.state != TaskState::Started {
            return Err(SchedulerError::NotStarted(TaskKind::Background));
        }
        if critical.slot.state != TaskState::Started {
            return Err(SchedulerError::NotStarted(TaskKind::Critical));
        }

        let background = BackgroundRunner {
            task: background.task,
            state: TaskState::Started,
            telemetry: self.telemetry,
            stats: BackgroundStats::new(),
        };
        let critical = CriticalRunner {
            hw: self.hw,
            task: critical.slot.task,
            period_us: critical.period_us,
            state: TaskState::Started,
            telemetry: self.telemetry,
            stats: CriticalStats::new(),
        };
        Ok((background, critical))
    }
}

/// 起動済みバックグラウンドタスク
pub struct BackgroundRunner<'t, B> {
    task: B,
    state: TaskState,
    telemetry: &'t Telemetry,
    stats: BackgroundStats,
}

impl<'t, B: BackgroundTask> BackgroundRunner<'t, B> {
    /// 本体を1回実行し、要求されたサスペンドを返す
    pub fn invoke(&mut self) -> Suspend {
        self.state = TaskState::Running;
        let mut ctx = BackgroundContext {
            telemetry: self.telemetry,
            invocation: self.stats.invocations,
        };
        let suspend = self.task.run(&mut ctx);

        self.stats.invocations = self.stats.invocations.wrapping_add(1);
        self.stats.last_suspend_ms = suspend.as_millis();
        if suspend.is_zero() {
            self.stats.zero_suspends = self.stats.zero_suspends.wrapping_add(1);
            warn!("Background task returned a zero suspend");
        }
        self.telemetry.publish_background(self.stats);
        suspend
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn stats(&self) -> BackgroundStats {
        self.stats
    }

    pub fn task(&self) -> &B {
        &self.task
    }
}

/// ハードウェアを所有する起動済みクリティカルタスク
pub struct CriticalRunner<'t, H, C> {
    hw: H,
    task: C,
    period_us: u32,
    state: TaskState,
    telemetry: &'t Telemetry,
    stats: CriticalStats,
}

impl<'t, H, C: CriticalTask<H>> CriticalRunner<'t, H, C> {
    /// `release_us` のリリースに対して本体を1回実行
    ///
    /// `release_us + period` より後の完了はオーバーラン。カウントし、[`Fault`] として
    /// 通知し、[`CriticalTask::on_overrun`] に渡す。
    pub fn invoke<K: Clock>(&mut self, release_us: u64, clock: &K) -> Option<Overrun> {
        self.state = TaskState::Running;
        let mut ctx = CriticalContext {
            telemetry: self.telemetry,
            release_us,
            invocation: self.stats.invocations,
        };

        let start_us = clock.now_us();
        let result = self.task.tick(&mut self.hw, &mut ctx);
        let end_us = clock.now_us();

        self.stats.record_execution(saturate_us(end_us.saturating_sub(start_us)));
        if let Err(err) = result {
            self.stats.tick_errors = self.stats.tick_errors.wrapping_add(1);
            ctx.raise(Fault::Tick(err));
        }

        let elapsed_us = saturate_us(end_us.saturating_sub(release_us));
        let overrun = if elapsed_us > self.period_us {
            let overrun = Overrun {
                elapsed_us,
                period_us: self.period_us,
            };
            self.stats.overruns = self.stats.overruns.wrapping_add(1);
            warn!("Critical overrun: {} us > {} us", elapsed_us, self.period_us);
            ctx.raise(overrun.into());
            self.task.on_overrun(&mut self.hw, overrun, &mut ctx);
            Some(overrun)
        } else {
            None
        };

        self.telemetry.publish_critical(self.stats);
        overrun
    }

    /// `prev_release_us` の次のリリース（逃したものはスキップ）
    pub fn next_release(&mut self, prev_release_us: u64, now_us: u64) -> u64 {
        let release = next_release(prev_release_us, now_us, self.period_us);
        if release.skipped > 0 {
            self.stats.skipped_releases = self.stats.skipped_releases.wrapping_add(release.skipped);
            self.telemetry.publish_critical(self.stats);
            debug!("Skipped {} critical releases", release.skipped);
        }
        release.at_us
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn stats(&self) -> CriticalStats {
        self.stats
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn task(&self) -> &C {
        &self.task
    }
}

/// 次のクリティカルリリース
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub at_us: u64,
    /// より後のリリースが既に到来していたため破棄したリリース
    pub skipped: u32,
}

/// キューしないリリース計算
///
/// 次のリリースは `prev + period`。時刻が既にそれを過ぎている場合は到来済みの
/// 最新のリリースだけを残し、それ以前はスキップとしてカウントする。遅れた実行が
/// 連続実行を引き起こすことはない。
pub fn next_release(prev_us: u64, now_us: u64, period_us: u32) -> Release {
    let period = u64::from(period_us.max(1));
    let next = prev_us.saturating_add(period);
    if next >= now_us {
        return Release {
            at_us: next,
            skipped: 0,
        };
    }
    let skipped = (now_us - next) / period;
    Release {
        at_us: next + skipped * period,
        skipped: u32::try_from(skipped).unwrap_or(u32::MAX),
    }
}

fn saturate_us(us: u64) -> u32 {
    u32::try_from(us).unwrap_or(u32::MAX)
}
