#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod fmt;

#[cfg(all(target_os = "none", not(feature = "defmt")))]
use panic_halt as _;
#[cfg(all(target_os = "none", feature = "defmt"))]
use {defmt_rtt as _, panic_probe as _};

#[cfg(target_os = "none")]
use {
    embassy_executor::{InterruptExecutor, Spawner},
    embassy_stm32::{
        gpio::{Level, Output, OutputType, Speed},
        interrupt,
        interrupt::{InterruptExt, Priority},
        time::Hertz,
        timer::{
            complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
            low_level::CountingMode,
            simple_pwm::PwmPin,
        },
        Peripherals,
    },
    embassy_time::{Duration, Timer},
    twist_scheduler::{
        config::{pwm::SWITCHING_FREQUENCY_HZ, HardwareConfig, CRITICAL_PERIOD_US},
        error::Error,
        hardware::stm32::{create_clock_config, Led, Stm32Twist},
        scheduler::{
            embassy::{run_background, run_critical},
            BackgroundRunner, CriticalRunner, Scheduler, Telemetry,
        },
        tasks::{CriticalControl, Heartbeat, Idle},
    },
};

#[cfg(target_os = "none")]
static TELEMETRY: Telemetry = Telemetry::new();

#[cfg(target_os = "none")]
static CRITICAL_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[cfg(target_os = "none")]
#[interrupt]
unsafe fn UART4() {
    CRITICAL_EXECUTOR.on_interrupt();
}

#[cfg(target_os = "none")]
type Background = BackgroundRunner<'static, Heartbeat<Led>>;

#[cfg(target_os = "none")]
type Critical = CriticalRunner<'static, Stm32Twist, CriticalControl<Idle>>;

#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn background_task(runner: Background) {
    run_background(runner).await
}

#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn critical_task(runner: Critical) {
    run_critical(runner).await
}

/// コンバータを設定して両タスクを登録
#[cfg(target_os = "none")]
fn setup(p: Peripherals) -> Result<(Background, Critical), Error> {
    let led = Led::new(Output::new(p.PC6, Level::Low, Speed::Low));

    let pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PA8, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PA7, OutputType::PushPull)),
        Some(PwmPin::new(p.PA9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PB0, OutputType::PushPull)),
        None,
        None,
        None,
        None,
        Hertz(SWITCHING_FREQUENCY_HZ),
        CountingMode::CenterAlignedBothInterrupts,
    );

    let hw = HardwareConfig::spin_twist_default()?.apply(Stm32Twist::new(pwm))?;

    let mut scheduler = Scheduler::new(hw, &TELEMETRY);
    let background = scheduler.create_background(Heartbeat::new(led))?;
    scheduler.create_critical(CriticalControl::new(Idle), CRITICAL_PERIOD_US)?;
    scheduler.start_background(background)?;
    scheduler.start_critical()?;
    Ok(scheduler.launch()?)
}

#[cfg(target_os = "none")]
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(create_clock_config());

    info!("═══════════════════════════════════════════════════════════════════");
    info!("    twist-scheduler • SPIN STM32G474RE @ 170MHz • TWIST shield");
    info!("═══════════════════════════════════════════════════════════════════");

    let (background, critical) = match setup(p) {
        Ok(runners) => runners,
        Err(err) => {
            error!("Setup failed: {}", err);
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };

    // バックグラウンドタスクを先に起動し、次にクリティカル用Executorを開始
    spawner.spawn(background_task(background).unwrap());

    interrupt::UART4.set_priority(Priority::P1);
    let critical_spawner = CRITICAL_EXECUTOR.start(interrupt::UART4);
    critical_spawner.spawn(critical_task(critical).unwrap());

    info!("Scheduler running");
}

/// ホストビルド: シミュレーションしたシールド上でスケジューラを数秒間実行
#[cfg(not(target_os = "none"))]
fn main() -> Result<(), twist_scheduler::error::Error> {
    use twist_scheduler::config::{HardwareConfig, CRITICAL_PERIOD_US};
    use twist_scheduler::hardware::mock::{MockLed, MockTwist};
    use twist_scheduler::scheduler::{Scheduler, Telemetry};
    use twist_scheduler::sim::{SimClock, SimExecutor};
    use twist_scheduler::tasks::{CriticalControl, Heartbeat, Idle};

    const RUN_US: u64 = 3_000_000;

    let telemetry = Telemetry::new();
    let clock = SimClock::new();

    let hw = HardwareConfig::spin_twist_default()?.apply(MockTwist::new())?;
    let mut scheduler = Scheduler::new(hw, &telemetry);
    let background = scheduler.create_background(Heartbeat::new(MockLed::new()))?;
    scheduler.create_critical(CriticalControl::new(Idle), CRITICAL_PERIOD_US)?;
    scheduler.start_background(background)?;
    scheduler.start_critical()?;

    let mut sim = SimExecutor::new(&clock, scheduler.launch()?);
    sim.run_for(RUN_US);

    let critical = telemetry.critical_stats();
    let background = telemetry.background_stats();
    println!("simulated {} ms", RUN_US / 1000);
    println!("power stage: {:?}", telemetry.power_stage());
    println!(
        "critical: {} invocations, {} overruns, {} skipped releases, {} tick errors",
        critical.invocations, critical.overruns, critical.skipped_releases, critical.tick_errors
    );
    println!(
        "background: {} invocations, last suspend {} ms",
        background.invocations, background.last_suspend_ms
    );
    println!(
        "start commands: {}, LED toggles: {}",
        sim.critical().hardware().start_count(),
        sim.background().task().led().toggles()
    );
    Ok(())
}
