//! ホスト用の決定的シミュレーション
//!
//! 2つのランナーを仮想マイクロ秒クロック上で実行します。クリティカルリリースは
//! Executor生成の1周期後から周期毎に発生し、バックグラウンドの起床と同時刻なら
//! クリティカルが優先されます。タスク本体は共有する [`SimClock`] を進めることで
//! 仮想時間を消費します。
//!
//! バックグラウンド処理はプリエンプト可能です。バックグラウンド本体が消費した時間は
//! 本体の実行中は保留され（クロックは実行開始時刻のまま）、その後クリティカル
//! リリースの合間に消費されます。そのためクリティカルタスクは周期を守り、
//! クリティカルの実行時間分だけバックグラウンドの完了が遅れます。次の
//! バックグラウンド起床はその完了時刻から数えます。サスペンド0は1μsのyieldとして
//! 扱います。

use core::cell::Cell;

use crate::scheduler::{
    BackgroundRunner, BackgroundTask, Clock, CriticalRunner, CriticalTask, Suspend,
};

/// 仮想マイクロ秒クロック
#[derive(Debug, Default)]
pub struct SimClock {
    now_us: Cell<u64>,
    /// バックグラウンド本体の実行中に積算した処理時間
    deferred_us: Cell<Option<u64>>,
}

impl SimClock {
    pub const fn new() -> Self {
        Self {
            now_us: Cell::new(0),
            deferred_us: Cell::new(None),
        }
    }

    pub fn advance(&self, us: u64) {
        match self.deferred_us.get() {
            Some(deferred) => self.deferred_us.set(Some(deferred + us)),
            None => self.now_us.set(self.now_us.get() + us),
        }
    }

    /// クロックを `us` まで進める（過去の時刻は無視）
    pub fn set(&self, us: u64) {
        let now = self.now_us.get();
        match self.deferred_us.get() {
            Some(deferred) => self
                .deferred_us
                .set(Some(deferred.max(us.saturating_sub(now)))),
            None if us > now => self.now_us.set(us),
            None => {}
        }
    }

    fn defer(&self) {
        self.deferred_us.set(Some(0));
    }

    fn take_deferred(&self) -> u64 {
        self.deferred_us.take().unwrap_or(0)
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}

/// 本体は戻ったが処理時間を消費しきっていないバックグラウンド実行
#[derive(Debug, Clone, Copy)]
struct BackgroundWork {
    remaining_us: u64,
    suspend: Suspend,
}

/// バックグラウンド・クリティカル各1ランナー用のシングルスレッドExecutor
pub struct SimExecutor<'c, 't, H, B, C> {
    clock: &'c SimClock,
    background: BackgroundRunner<'t, B>,
    critical: CriticalRunner<'t, H, C>,
    in_progress: Option<BackgroundWork>,
    next_background_us: u64,
    next_critical_us: u64,
}

impl<'c, 't, H, B, C> SimExecutor<'c, 't, H, B, C>
where
    B: BackgroundTask,
    C: CriticalTask<H>,
{
    pub fn new(
        clock: &'c SimClock,
        (background, critical): (BackgroundRunner<'t, B>, CriticalRunner<'t, H, C>),
    ) -> Self {
        let now = clock.now_us();
        let next_critical_us = now + u64::from(critical.period_us());
        Self {
            clock,
            background,
            critical,
            in_progress: None,
            next_background_us: now,
            next_critical_us,
        }
    }

    /// 今から `duration_us` 以内に到来する全ての実行を行う
    pub fn run_for(&mut self, duration_us: u64) {
        let end_us = self.clock.now_us() + duration_us;
        loop {
            let now_us = self.clock.now_us();
            let background_due = match self.in_progress {
                Some(work) => now_us + work.remaining_us,
                None => self.next_background_us,
            };
            let due = self.next_critical_us.min(background_due);
            if due > end_us {
                self.spend_background(end_us.saturating_sub(now_us));
                break;
            }
            self.spend_background(due.saturating_sub(now_us));
            self.clock.set(due);

            if let Some(work) = self.in_progress.filter(|work| work.remaining_us == 0) {
                self.in_progress = None;
                self.next_background_us = self.clock.now_us() + suspend_us(work.suspend);
            } else if self.next_critical_us <= background_due {
                let release = self.next_critical_us;
                self.critical.invoke(release, self.clock);
                self.next_critical_us = self.critical.next_release(release, self.clock.now_us());
            } else {
                self.clock.defer();
                let suspend = self.background.invoke();
                self.in_progress = Some(BackgroundWork {
                    remaining_us: self.clock.take_deferred(),
                    suspend,
                });
            }
        }
        self.clock.set(end_us);
    }

    fn spend_background(&mut self, us: u64) {
        if let Some(work) = &mut self.in_progress {
            work.remaining_us -= us.min(work.remaining_us);
        }
    }

    pub fn clock(&self) -> &'c SimClock {
        self.clock
    }

    pub fn background(&self) -> &BackgroundRunner<'t, B> {
        &self.background
    }

    pub fn critical(&self) -> &CriticalRunner<'t, H, C> {
        &self.critical
    }

    /// バックグラウンド実行が処理時間を消費中かどうか
    pub fn background_busy(&self) -> bool {
        self.in_progress.is_some()
    }

    /// 次のクリティカルリリース [μs]
    pub fn next_critical_us(&self) -> u64 {
        self.next_critical_us
    }

    /// 次のバックグラウンド起床 [μs]（実行中の処理が完了してから有効）
    pub fn next_background_us(&self) -> u64 {
        self.next_background_us
    }
}

fn suspend_us(suspend: Suspend) -> u64 {
    if suspend.is_zero() {
        1
    } else {
        suspend.as_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HardwareConfig, BACKGROUND_PERIOD_MS, CRITICAL_PERIOD_US};
    use crate::error::{Fault, TickError};
    use crate::hardware::mock::{Call, MockLed, MockTwist};
    use crate::hardware::{
        BoardVersion, DeadTime, DutyCycle, Leg, RegulationMode, ShieldVersion,
    };
    use crate::power_stage::PowerStageState;
    use crate::scheduler::{BackgroundContext, Scheduler, Telemetry};
    use crate::tasks::{ControlLaw, CriticalControl, Heartbeat, Idle};
    use std::cell::RefCell;
    use std::vec::Vec;

    const PERIOD: u64 = CRITICAL_PERIOD_US as u64;

    /// 実行時刻を記録するバックグラウンド本体
    struct Recorder<'c> {
        clock: &'c SimClock,
        suspend_ms: u32,
        times: Vec<u64>,
    }

    impl BackgroundTask for Recorder<'_> {
        fn run(&mut self, _ctx: &mut BackgroundContext<'_>) -> Suspend {
            self.times.push(self.clock.now_us());
            Suspend::millis(self.suspend_ms)
        }
    }

    /// 実行毎に仮想時間 `work_us` を消費するバックグラウンド本体
    struct Worker<'c> {
        clock: &'c SimClock,
        work_us: u64,
        suspend_ms: u32,
        starts: Vec<u64>,
    }

    impl BackgroundTask for Worker<'_> {
        fn run(&mut self, _ctx: &mut BackgroundContext<'_>) -> Suspend {
            self.starts.push(self.clock.now_us());
            self.clock.advance(self.work_us);
            Suspend::millis(self.suspend_ms)
        }
    }

    /// 毎ステップ一定時間を消費する制御則
    struct Busy<'c> {
        clock: &'c SimClock,
        cost_us: u64,
    }

    impl ControlLaw<MockTwist> for Busy<'_> {
        fn step(&mut self, _hw: &mut MockTwist) -> Result<(), TickError> {
            self.clock.advance(self.cost_us);
            Ok(())
        }
    }

    /// 各ステップの開始・終了を記録し、指定ステップで時間を消費する制御則
    struct Traced<'c> {
        clock: &'c SimClock,
        spans: &'c RefCell<Vec<(u64, u64)>>,
        slow_step: Option<(usize, u64)>,
    }

    impl ControlLaw<MockTwist> for Traced<'_> {
        fn step(&mut self, _hw: &mut MockTwist) -> Result<(), TickError> {
            let start = self.clock.now_us();
            let n = self.spans.borrow().len();
            if let Some((slow, cost)) = self.slow_step {
                if n == slow {
                    self.clock.advance(cost);
                }
            }
            self.spans.borrow_mut().push((start, self.clock.now_us()));
            Ok(())
        }
    }

    fn reference_scheduler<'t, B, C>(
        telemetry: &'t Telemetry,
        background: B,
        critical: C,
    ) -> (BackgroundRunner<'t, B>, CriticalRunner<'t, MockTwist, C>)
    where
        B: BackgroundTask,
        C: CriticalTask<MockTwist>,
    {
        let config = HardwareConfig::builder()
            .board(BoardVersion::Spin1_0)
            .shield(ShieldVersion::TwistV1_3)
            .all_buck(RegulationMode::Voltage)
            .adc_decimation(1)
            .all_dead_time(200, 200)
            .leg_phase_shift(Leg::Leg2, 180)
            .default_channels()
            .all_duty_cycle(0.9)
            .build()
            .unwrap();
        let hw = config.apply(MockTwist::new()).unwrap();

        let mut scheduler = Scheduler::new(hw, telemetry);
        let handle = scheduler.create_background(background).unwrap();
        scheduler.create_critical(critical, CRITICAL_PERIOD_US).unwrap();
        scheduler.start_background(handle).unwrap();
        scheduler.start_critical().unwrap();
        scheduler.launch().unwrap()
    }

    #[test]
    fn test_first_tick_enables_power_stage() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(Idle),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        // 設定は適用済み、パワーステージは未起動
        let hw = sim.critical().hardware();
        assert!(hw.calls().any(|call| call == Call::AdcDecimation(1)));
        assert!(hw
            .calls()
            .any(|call| call == Call::DeadTime(Leg::Leg2, DeadTime::new(200, 200))));
        assert!(hw.calls().any(|call| call == Call::PhaseShift(Leg::Leg2, 180)));
        assert!(hw
            .calls()
            .any(|call| call == Call::DutyCycle(Leg::Leg1, DutyCycle::new(0.9).unwrap())));
        assert_eq!(hw.start_count(), 0);
        assert!(!sim.critical().task().power_stage().is_enabled());

        sim.run_for(PERIOD);
        assert_eq!(sim.critical().stats().invocations, 1);
        assert!(sim.critical().task().power_stage().is_enabled());
        assert_eq!(sim.critical().hardware().start_count(), 1);
        assert_eq!(telemetry.power_stage(), PowerStageState::Enabled);
    }

    #[test]
    fn test_enable_is_idempotent() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(Idle),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(10 * PERIOD);
        assert_eq!(sim.critical().stats().invocations, 10);
        assert!(sim.critical().task().power_stage().is_enabled());
        assert_eq!(sim.critical().hardware().start_count(), 1);
    }

    #[test]
    fn test_enabled_is_monotonic() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(Idle),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(PERIOD);
        for _ in 0..200 {
            sim.run_for(PERIOD);
            assert!(sim.critical().task().power_stage().is_enabled());
        }
        assert_eq!(sim.critical().hardware().start_count(), 1);
    }

    #[test]
    fn test_background_suspend_honoured() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let recorder = Recorder {
            clock: &clock,
            suspend_ms: BACKGROUND_PERIOD_MS,
            times: Vec::new(),
        };
        let runners = reference_scheduler(&telemetry, recorder, CriticalControl::new(Idle));
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(2_500_000);
        assert_eq!(sim.background().task().times, [0, 1_000_000, 2_000_000]);
        // サスペンド中もクリティカルtickは妨げられない
        assert_eq!(sim.critical().stats().invocations, 5000);
        assert_eq!(sim.critical().stats().overruns, 0);
        assert_eq!(sim.critical().stats().skipped_releases, 0);
    }

    #[test]
    fn test_background_work_preempted_by_critical() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let worker = Worker {
            clock: &clock,
            work_us: 2_000,
            suspend_ms: 1,
            starts: Vec::new(),
        };
        let runners = reference_scheduler(&telemetry, worker, CriticalControl::new(Idle));
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(5_000);
        // 500〜5000usの全リリースが定刻に実行される
        assert_eq!(sim.critical().stats().invocations, 10);
        assert_eq!(sim.critical().stats().overruns, 0);
        assert_eq!(sim.critical().stats().skipped_releases, 0);
        // 処理 0..2000、サスペンド1ms、処理 3000..5000
        assert_eq!(sim.background().task().starts, [0, 3_000]);
        assert!(!sim.background_busy());
        assert_eq!(sim.next_background_us(), 6_000);
    }

    #[test]
    fn test_critical_execution_delays_background_completion() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let worker = Worker {
            clock: &clock,
            work_us: 1_000,
            suspend_ms: 1,
            starts: Vec::new(),
        };
        let law = Busy {
            clock: &clock,
            cost_us: 100,
        };
        let runners = reference_scheduler(&telemetry, worker, CriticalControl::new(law));
        let mut sim = SimExecutor::new(&clock, runners);

        // バックグラウンドは 0..500、600..1000、1100..1200 で実行
        sim.run_for(1_100);
        assert!(sim.background_busy());
        sim.run_for(400);
        assert!(!sim.background_busy());
        assert_eq!(sim.next_background_us(), 2_200);
        assert_eq!(sim.critical().stats().invocations, 3);
        assert_eq!(sim.critical().stats().overruns, 0);
    }

    #[test]
    fn test_background_never_before_suspend_elapsed() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let recorder = Recorder {
            clock: &clock,
            suspend_ms: 7,
            times: Vec::new(),
        };
        let runners = reference_scheduler(&telemetry, recorder, CriticalControl::new(Idle));
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(100_000);
        let times = &sim.background().task().times;
        assert_eq!(times.len(), 15);
        assert!(times.windows(2).all(|pair| pair[1] - pair[0] >= 7_000));
    }

    #[test]
    fn test_critical_invocations_never_overlap() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let spans = RefCell::new(Vec::new());
        let law = Traced {
            clock: &clock,
            spans: &spans,
            slow_step: Some((3, 300)),
        };
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(law),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(50 * PERIOD);
        let spans = spans.borrow();
        assert_eq!(spans.len(), 50);
        assert!(spans.windows(2).all(|pair| pair[0].1 <= pair[1].0));
        assert!(spans.iter().all(|&(start, end)| start <= end));
    }

    #[test]
    fn test_overrun_flagged_without_reset() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let spans = RefCell::new(Vec::new());
        // 4番目のステップ（リリース2000us）は1200usかかり3200usで終了
        let law = Traced {
            clock: &clock,
            spans: &spans,
            slow_step: Some((3, 1200)),
        };
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(law),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(10 * PERIOD);
        let stats = sim.critical().stats();
        assert_eq!(stats.overruns, 1);
        // 2500は逃し、3000が遅れて実行
        assert_eq!(stats.skipped_releases, 1);
        assert_eq!(stats.max_exec_us, 1200);
        assert!(sim.critical().task().power_stage().is_enabled());
        assert_eq!(sim.critical().hardware().start_count(), 1);
        assert_eq!(
            telemetry.take_fault(),
            Some(Fault::Overrun {
                elapsed_us: 1200,
                period_us: CRITICAL_PERIOD_US
            })
        );
    }

    #[test]
    fn test_heartbeat_reports_overrun() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let spans = RefCell::new(Vec::new());
        let law = Traced {
            clock: &clock,
            spans: &spans,
            slow_step: Some((0, 800)),
        };
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(law),
        );
        let mut sim = SimExecutor::new(&clock, runners);

        // ハートビートは0秒と1秒、500usのオーバーランは1秒で拾う
        sim.run_for(1_000_000);
        assert!(matches!(
            sim.background().task().latched_fault(),
            Some(Fault::Overrun { .. })
        ));
        assert_eq!(sim.next_background_us(), 1_000_000 + 100_000);
    }

    #[test]
    fn test_zero_suspend_yields() {
        let telemetry = Telemetry::new();
        let clock = SimClock::new();
        let recorder = Recorder {
            clock: &clock,
            suspend_ms: 0,
            times: Vec::new(),
        };
        let runners = reference_scheduler(&telemetry, recorder, CriticalControl::new(Idle));
        let mut sim = SimExecutor::new(&clock, runners);

        sim.run_for(PERIOD);
        // バックグラウンドがビジーでもクリティカルは定刻に実行
        assert_eq!(sim.critical().stats().invocations, 1);
        assert_eq!(sim.critical().stats().overruns, 0);
        assert_eq!(sim.background().stats().invocations, 501);
        assert_eq!(sim.background().stats().zero_suspends, 501);
    }

    #[test]
    fn test_clock_reaches_end() {
        let clock = SimClock::new();
        let telemetry = Telemetry::new();
        let runners = reference_scheduler(
            &telemetry,
            Heartbeat::new(MockLed::new()),
            CriticalControl::new(Idle),
        );
        let mut sim = SimExecutor::new(&clock, runners);
        sim.run_for(1234);
        assert_eq!(sim.clock().now_us(), 1234);
        assert_eq!(sim.next_critical_us(), 1500);
    }
}
