//! ハートビート（バックグラウンド）タスク
//!
//! 周期毎にステータスLEDをトグルします。クリティカル側がフォールトを通知すると
//! ログ出力してラッチし、LEDを高速点滅させます。

use crate::config::{BACKGROUND_PERIOD_MS, FAULT_BLINK_MS};
use crate::error::Fault;
use crate::hardware::StatusLed;
use crate::scheduler::{BackgroundContext, BackgroundTask, Suspend};

pub struct Heartbeat<L> {
    led: L,
    period_ms: u32,
    fault: Option<Fault>,
}

impl<L: StatusLed> Heartbeat<L> {
    pub const fn new(led: L) -> Self {
        Self {
            led,
            period_ms: BACKGROUND_PERIOD_MS,
            fault: None,
        }
    }

    /// フォールトなし時の点滅周期 [ms]、0不可
    pub fn with_period(mut self, period_ms: u32) -> Self {
        self.period_ms = period_ms;
        self
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    /// 最初に受け取ったフォールト
    pub fn latched_fault(&self) -> Option<Fault> {
        self.fault
    }
}

impl<L: StatusLed> BackgroundTask for Heartbeat<L> {
    fn run(&mut self, ctx: &mut BackgroundContext<'_>) -> Suspend {
        if ctx.invocation() == 0 {
            info!("Heartbeat running, period {} ms", self.period_ms);
        }

        if let Some(fault) = ctx.take_fault() {
            match self.fault {
                None => {
                    error!("Fault latched: {}", fault);
                    self.fault = Some(fault);
                }
                Some(_) => warn!("Fault: {}", fault),
            }
        }

        self.led.toggle();

        if self.fault.is_some() {
            Suspend::millis(FAULT_BLINK_MS)
        } else {
            Suspend::millis(self.period_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::error::{PowerStageError, TickError};
    use crate::hardware::mock::{MockLed, MockTwist};
    use crate::scheduler::{BackgroundRunner, CriticalContext, CriticalTask, Scheduler, Telemetry};

    struct Nothing;

    impl CriticalTask<MockTwist> for Nothing {
        fn tick(
            &mut self,
            _hw: &mut MockTwist,
            _ctx: &mut CriticalContext<'_>,
        ) -> Result<(), TickError> {
            Ok(())
        }
    }

    fn launch(
        telemetry: &Telemetry,
        heartbeat: Heartbeat<MockLed>,
    ) -> BackgroundRunner<'_, Heartbeat<MockLed>> {
        let hw = HardwareConfig::spin_twist_default()
            .unwrap()
            .apply(MockTwist::new())
            .unwrap();
        let mut scheduler = Scheduler::new(hw, telemetry);
        let handle = scheduler.create_background(heartbeat).unwrap();
        scheduler.create_critical(Nothing, 500).unwrap();
        scheduler.start_background(handle).unwrap();
        scheduler.start_critical().unwrap();
        scheduler.launch().unwrap().0
    }

    #[test]
    fn test_toggles_and_suspends_for_period() {
        let telemetry = Telemetry::new();
        let mut runner = launch(&telemetry, Heartbeat::new(MockLed::new()));

        assert_eq!(runner.invoke(), Suspend::millis(BACKGROUND_PERIOD_MS));
        assert!(runner.task().led().is_on());
        assert_eq!(runner.invoke(), Suspend::millis(BACKGROUND_PERIOD_MS));
        assert!(!runner.task().led().is_on());
        assert_eq!(runner.task().led().toggles(), 2);
    }

    #[test]
    fn test_custom_period() {
        let telemetry = Telemetry::new();
        let mut runner = launch(&telemetry, Heartbeat::new(MockLed::new()).with_period(250));
        assert_eq!(runner.invoke(), Suspend::millis(250));
        assert_eq!(telemetry.background_stats().last_suspend_ms, 250);
    }

    #[test]
    fn test_fault_latches_fast_blink() {
        let telemetry = Telemetry::new();
        let mut runner = launch(&telemetry, Heartbeat::new(MockLed::new()));
        runner.invoke();

        let first = Fault::PowerStage(PowerStageError::DriverFault);
        telemetry.raise(first);
        assert_eq!(runner.invoke(), Suspend::millis(FAULT_BLINK_MS));
        assert_eq!(runner.task().latched_fault(), Some(first));

        // 後続のフォールトは通知のみ、最初のものをラッチしたまま
        telemetry.raise(Fault::Overrun {
            elapsed_us: 900,
            period_us: 500,
        });
        assert_eq!(runner.invoke(), Suspend::millis(FAULT_BLINK_MS));
        assert_eq!(runner.task().latched_fault(), Some(first));

        // 新しいフォールトはないが高速点滅を継続
        assert_eq!(runner.invoke(), Suspend::millis(FAULT_BLINK_MS));
        assert_eq!(runner.task().led().toggles(), 4);
    }
}
