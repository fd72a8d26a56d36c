//! クリティカル制御タスク
//!
//! 割り込みExecutor上でクリティカル周期毎に実行します。最初のtickで
//! パワーステージを起動し、以降はパワーステージ有効中に制御則を実行します。

use crate::config::CRITICAL_LOG_INTERVAL;
use crate::error::{Fault, TickError};
use crate::hardware::PowerHardware;
use crate::power_stage::{EnableOutcome, PowerStage};
use crate::scheduler::{CriticalContext, CriticalTask, Overrun};

/// パワーステージ有効中、tick毎に1回実行されるコンバータ制御則
pub trait ControlLaw<H> {
    fn step(&mut self, hw: &mut H) -> Result<(), TickError>;
}

/// 何もしない制御則
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl<H> ControlLaw<H> for Idle {
    fn step(&mut self, _hw: &mut H) -> Result<(), TickError> {
        Ok(())
    }
}

/// tickが周期をオーバーランした時のエスカレーション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
pub enum OverrunPolicy {
    /// カウントして通知、パワーステージはスイッチングを継続
    #[default]
    Flag,
    /// 通知してパワーステージを停止
    TripPowerStage,
}

pub struct CriticalControl<L> {
    power_stage: PowerStage,
    law: L,
    policy: OverrunPolicy,
    log_counter: u32,
}

impl<L> CriticalControl<L> {
    pub const fn new(law: L) -> Self {
        Self {
            power_stage: PowerStage::new(),
            law,
            policy: OverrunPolicy::Flag,
            log_counter: 0,
        }
    }

    pub fn with_policy(mut self, policy: OverrunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn power_stage(&self) -> &PowerStage {
        &self.power_stage
    }

    pub fn law(&self) -> &L {
        &self.law
    }

    pub fn policy(&self) -> OverrunPolicy {
        self.policy
    }
}

impl<H, L> CriticalTask<H> for CriticalControl<L>
where
    H: PowerHardware,
    L: ControlLaw<H>,
{
    fn tick(&mut self, hw: &mut H, ctx: &mut CriticalContext<'_>) -> Result<(), TickError> {
        match self.power_stage.ensure_enabled(hw) {
            EnableOutcome::Started => {
                ctx.telemetry().publish_power_stage(self.power_stage.state());
            }
            EnableOutcome::Failed(err) => {
                ctx.telemetry().publish_power_stage(self.power_stage.state());
                ctx.raise(Fault::PowerStage(err));
            }
            EnableOutcome::AlreadyEnabled | EnableOutcome::Inhibited => {}
        }

        // CRITICAL_LOG_INTERVAL tick毎にログ出力
        self.log_counter += 1;
        if self.log_counter >= CRITICAL_LOG_INTERVAL {
            self.log_counter = 0;
            debug!(
                "Critical tick {}: power stage {}",
                ctx.invocation(),
                self.power_stage.state()
            );
        }

        if self.power_stage.is_enabled() {
            self.law.step(hw)
        } else {
            Ok(())
        }
    }

    fn on_overrun(&mut self, hw: &mut H, overrun: Overrun, ctx: &mut CriticalContext<'_>) {
        match self.policy {
            OverrunPolicy::Flag => {}
            OverrunPolicy::TripPowerStage => {
                error!(
                    "Tripping power stage after overrun ({} us)",
                    overrun.elapsed_us
                );
                if let Err(err) = self.power_stage.trip(hw) {
                    ctx.raise(Fault::PowerStage(err));
                }
                ctx.telemetry().publish_power_stage(self.power_stage.state());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::error::PowerStageError;
    use crate::hardware::mock::{Call, MockTwist};
    use crate::power_stage::PowerStageState;
    use crate::scheduler::{
        BackgroundContext, BackgroundTask, Clock, CriticalRunner, Scheduler, Suspend, Telemetry,
    };
    use core::cell::Cell;

    struct Clk(Cell<u64>);

    impl Clock for Clk {
        fn now_us(&self) -> u64 {
            self.0.get()
        }
    }

    struct Noop;

    impl BackgroundTask for Noop {
        fn run(&mut self, _ctx: &mut BackgroundContext<'_>) -> Suspend {
            Suspend::millis(1000)
        }
    }

    /// ステップ数をカウントし、指定時に失敗する
    #[derive(Default)]
    struct Counting {
        steps: u32,
        fail: bool,
    }

    impl ControlLaw<MockTwist> for Counting {
        fn step(&mut self, _hw: &mut MockTwist) -> Result<(), TickError> {
            self.steps += 1;
            if self.fail {
                Err(TickError::Actuation)
            } else {
                Ok(())
            }
        }
    }

    fn launch<'t, L: ControlLaw<MockTwist>>(
        telemetry: &'t Telemetry,
        hw: MockTwist,
        control: CriticalControl<L>,
    ) -> CriticalRunner<'t, MockTwist, CriticalControl<L>> {
        let hw = HardwareConfig::spin_twist_default()
            .unwrap()
            .apply(hw)
            .unwrap();
        let mut scheduler = Scheduler::new(hw, telemetry);
        let handle = scheduler.create_background(Noop).unwrap();
        scheduler.create_critical(control, 500).unwrap();
        scheduler.start_background(handle).unwrap();
        scheduler.start_critical().unwrap();
        scheduler.launch().unwrap().1
    }

    #[test]
    fn test_first_tick_enables_then_steps() {
        let telemetry = Telemetry::new();
        let clock = Clk(Cell::new(500));
        let mut runner = launch(
            &telemetry,
            MockTwist::new(),
            CriticalControl::new(Counting::default()),
        );
        assert_eq!(telemetry.power_stage(), PowerStageState::Disabled);

        runner.invoke(500, &clock);
        assert!(runner.task().power_stage().is_enabled());
        assert_eq!(runner.hardware().start_count(), 1);
        assert_eq!(runner.hardware().calls().last(), Some(Call::StartAll));
        assert_eq!(runner.task().law().steps, 1);
        assert_eq!(telemetry.power_stage(), PowerStageState::Enabled);
    }

    #[test]
    fn test_failed_start_never_steps_law() {
        let telemetry = Telemetry::new();
        let clock = Clk(Cell::new(0));
        let mut runner = launch(
            &telemetry,
            MockTwist::new().fail_start(PowerStageError::CommandRejected),
            CriticalControl::new(Counting::default()),
        );

        for n in 1..=5 {
            clock.0.set(n * 500);
            runner.invoke(n * 500, &clock);
        }
        assert_eq!(runner.hardware().start_count(), 1);
        assert_eq!(runner.task().law().steps, 0);
        assert_eq!(
            telemetry.power_stage(),
            PowerStageState::Faulted(PowerStageError::CommandRejected)
        );
        assert_eq!(
            telemetry.take_fault(),
            Some(Fault::PowerStage(PowerStageError::CommandRejected))
        );
        // タイマは動作継続
        assert_eq!(runner.stats().invocations, 5);
    }

    #[test]
    fn test_law_error_captured() {
        let telemetry = Telemetry::new();
        let clock = Clk(Cell::new(500));
        let law = Counting {
            steps: 0,
            fail: true,
        };
        let mut runner = launch(&telemetry, MockTwist::new(), CriticalControl::new(law));

        runner.invoke(500, &clock);
        assert!(runner.task().power_stage().is_enabled());
        assert_eq!(runner.stats().tick_errors, 1);
        assert_eq!(
            telemetry.take_fault(),
            Some(Fault::Tick(TickError::Actuation))
        );
    }

    #[test]
    fn test_overrun_flag_keeps_power_stage_enabled() {
        let telemetry = Telemetry::new();
        let clock = Clk(Cell::new(500));
        let mut runner = launch(&telemetry, MockTwist::new(), CriticalControl::new(Idle));
        runner.invoke(500, &clock);

        clock.0.set(2000);
        assert!(runner.invoke(1000, &clock).is_some());
        assert!(runner.task().power_stage().is_enabled());
        assert_eq!(runner.hardware().stop_count(), 0);
    }

    #[test]
    fn test_overrun_trip_policy_stops_power_stage() {
        let telemetry = Telemetry::new();
        let clock = Clk(Cell::new(500));
        let control = CriticalControl::new(Idle).with_policy(OverrunPolicy::TripPowerStage);
        let mut runner = launch(&telemetry, MockTwist::new(), control);
        runner.invoke(500, &clock);

        clock.0.set(2000);
        runner.invoke(1000, &clock);
        assert_eq!(runner.task().power_stage().state(), PowerStageState::Tripped);
        assert_eq!(runner.hardware().stop_count(), 1);
        assert!(!runner.hardware().is_switching());
        assert_eq!(telemetry.power_stage(), PowerStageState::Tripped);

        // Trippedはオフのまま
        clock.0.set(2500);
        runner.invoke(2500, &clock);
        assert_eq!(runner.hardware().start_count(), 1);
    }
}
