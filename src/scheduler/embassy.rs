//! 2つのランナー用のembassyランタイム
//!
//! クリティカルループは `InterruptExecutor` 上で動かし、バックグラウンドループを
//! 実行するスレッドモードExecutorをプリエンプトします。embassyタスクはジェネリックに
//! できないため、ファームウェア側で具体的な `#[embassy_executor::task]` 関数で
//! ラップします。

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant, Timer};

use super::{BackgroundRunner, BackgroundTask, Clock, CriticalRunner, CriticalTask};

/// タイムドライバのクロック
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_us(&self) -> u64 {
        Instant::now().as_micros()
    }
}

/// バックグラウンドタスクを要求されたサスペンド毎にスリープしながら実行し続ける
pub async fn run_background<B: BackgroundTask>(mut runner: BackgroundRunner<'_, B>) {
    info!("Background loop running");
    loop {
        let suspend = runner.invoke();
        if suspend.is_zero() {
            yield_now().await;
        } else {
            Timer::after(Duration::from_millis(u64::from(suspend.as_millis()))).await;
        }
    }
}

/// クリティカルタスクを絶対時刻のリリースで実行し続ける
///
/// 最初のリリースはループ開始の1周期後。オーバーランで逃したリリースは
/// キューせずスキップする。
pub async fn run_critical<H, C: CriticalTask<H>>(mut runner: CriticalRunner<'_, H, C>) {
    let clock = EmbassyClock;
    let mut release = clock.now_us() + u64::from(runner.period_us());
    info!("Critical loop running, period {} us", runner.period_us());
    loop {
        Timer::at(Instant::from_micros(release)).await;
        runner.invoke(release, &clock);
        release = runner.next_release(release, clock.now_us());
    }
}
